//! Run configuration
//!
//! [`RunConfig`] is the explicit, per-run configuration object: turn bound,
//! fallback model provider, session, hooks, run-level guardrails, tool
//! concurrency, streaming buffer, deadline and tracing. Nothing is read from
//! process-wide state, so runs with different configurations can execute side
//! by side.
//!
//! [`RunSettings`] is the plain, serde-friendly subset that can be loaded
//! from JSON and turned into a `RunConfig`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentsError, Result};
use crate::guardrail::{InputGuardrail, OutputGuardrail};
use crate::hooks::RunHooks;
use crate::memory::Session;
use crate::model::ModelProvider;
use crate::tracing::TraceExporter;

pub const DEFAULT_MAX_TURNS: usize = 10;
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Whether spans are recorded and what they may contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    /// Copy tool arguments, tool outputs and model text into spans.
    pub include_sensitive_data: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_sensitive_data: true,
        }
    }
}

impl TracingConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            include_sensitive_data: false,
        }
    }
}

/// Configuration for a single run.
#[derive(Clone)]
pub struct RunConfig {
    /// Upper bound on model calls. Exceeding it fails the run.
    pub max_turns: usize,

    /// Provider used for agents that name their model instead of carrying one.
    pub model_provider: Option<Arc<dyn ModelProvider>>,

    /// Conversation history loaded before the run and appended to on success.
    pub session: Option<Arc<dyn Session>>,

    /// Run hooks, invoked in this order.
    pub hooks: Vec<Arc<dyn RunHooks>>,

    /// Evaluated after the starting agent's input guardrails.
    pub input_guardrails: Vec<Arc<dyn InputGuardrail>>,

    /// Evaluated after the final agent's output guardrails.
    pub output_guardrails: Vec<Arc<dyn OutputGuardrail>>,

    /// Limit on concurrently executing tool calls for agents with
    /// `parallel_tool_calls`. `None` means unbounded.
    pub max_tool_concurrency: Option<usize>,

    /// Capacity of the streaming event queue.
    pub stream_buffer: usize,

    /// Wall-clock limit on the whole run.
    pub deadline: Option<Duration>,

    pub tracing: TracingConfig,

    /// Receives the finished trace of every run.
    pub trace_exporter: Option<Arc<dyn TraceExporter>>,

    /// Name of the trace.
    pub workflow_name: String,
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("max_turns", &self.max_turns)
            .field("model_provider", &self.model_provider.is_some())
            .field("session", &self.session.is_some())
            .field("hooks", &self.hooks.len())
            .field("input_guardrails", &self.input_guardrails.len())
            .field("output_guardrails", &self.output_guardrails.len())
            .field("max_tool_concurrency", &self.max_tool_concurrency)
            .field("stream_buffer", &self.stream_buffer)
            .field("deadline", &self.deadline)
            .field("tracing", &self.tracing)
            .field("workflow_name", &self.workflow_name)
            .finish()
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            model_provider: None,
            session: None,
            hooks: Vec::new(),
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            max_tool_concurrency: None,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            deadline: None,
            tracing: TracingConfig::default(),
            trace_exporter: None,
            workflow_name: "Agent workflow".to_string(),
        }
    }
}

impl RunConfig {
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_model_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.model_provider = Some(provider);
        self
    }

    pub fn with_session(mut self, session: Arc<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Appends a run hook.
    pub fn with_hooks(mut self, hooks: Arc<dyn RunHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }

    pub fn with_input_guardrail(mut self, guardrail: Arc<dyn InputGuardrail>) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: Arc<dyn OutputGuardrail>) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    pub fn with_max_tool_concurrency(mut self, limit: usize) -> Self {
        self.max_tool_concurrency = Some(limit.max(1));
        self
    }

    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity.max(1);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }

    pub fn with_trace_exporter(mut self, exporter: Arc<dyn TraceExporter>) -> Self {
        self.trace_exporter = Some(exporter);
        self
    }

    pub fn with_workflow_name(mut self, name: impl Into<String>) -> Self {
        self.workflow_name = name.into();
        self
    }

    /// Builds a configuration from plain settings; collaborators start empty.
    pub fn from_settings(settings: RunSettings) -> Result<Self> {
        if settings.max_turns == 0 {
            return Err(AgentsError::configuration("max_turns must be at least 1"));
        }
        if settings.stream_buffer == 0 {
            return Err(AgentsError::configuration(
                "stream_buffer must be at least 1",
            ));
        }
        let mut config = RunConfig {
            max_turns: settings.max_turns,
            max_tool_concurrency: settings.max_tool_concurrency.map(|n| n.max(1)),
            stream_buffer: settings.stream_buffer,
            deadline: settings.deadline_ms.map(Duration::from_millis),
            tracing: settings.tracing,
            ..RunConfig::default()
        };
        if let Some(name) = settings.workflow_name {
            config.workflow_name = name;
        }
        Ok(config)
    }
}

/// Serializable run settings.
///
/// ```rust
/// use agents_runtime::config::{RunConfig, RunSettings};
///
/// let settings = RunSettings::from_json(r#"{"max_turns": 4, "deadline_ms": 1500}"#).unwrap();
/// let config = RunConfig::from_settings(settings).unwrap();
/// assert_eq!(config.max_turns, 4);
/// assert_eq!(config.stream_buffer, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub max_turns: usize,
    pub stream_buffer: usize,
    pub max_tool_concurrency: Option<usize>,
    pub deadline_ms: Option<u64>,
    pub tracing: TracingConfig,
    pub workflow_name: Option<String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            max_tool_concurrency: None,
            deadline_ms: None,
            tracing: TracingConfig::default(),
            workflow_name: None,
        }
    }
}

impl RunSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.max_turns, 10);
        assert_eq!(config.stream_buffer, 64);
        assert!(config.model_provider.is_none());
        assert!(config.tracing.enabled);
    }

    #[test]
    fn test_settings_round_trip_into_config() {
        let settings = RunSettings::from_json(
            r#"{
                "max_turns": 3,
                "max_tool_concurrency": 0,
                "tracing": {"include_sensitive_data": false},
                "workflow_name": "Support"
            }"#,
        )
        .unwrap();
        assert!(settings.tracing.enabled);

        let config = RunConfig::from_settings(settings).unwrap();
        assert_eq!(config.max_turns, 3);
        assert_eq!(config.max_tool_concurrency, Some(1));
        assert!(!config.tracing.include_sensitive_data);
        assert_eq!(config.workflow_name, "Support");
        assert_eq!(config.deadline, None);
    }

    #[test]
    fn test_invalid_settings() {
        let zero_turns = RunSettings {
            max_turns: 0,
            ..RunSettings::default()
        };
        assert!(matches!(
            RunConfig::from_settings(zero_turns),
            Err(AgentsError::Configuration { .. })
        ));
        assert!(RunSettings::from_json("{\"max_turns\": \"many\"}").is_err());
    }

    #[test]
    fn test_builders_clamp() {
        let config = RunConfig::default()
            .with_stream_buffer(0)
            .with_max_tool_concurrency(0)
            .with_deadline(Duration::from_secs(2));
        assert_eq!(config.stream_buffer, 1);
        assert_eq!(config.max_tool_concurrency, Some(1));
        assert_eq!(config.deadline, Some(Duration::from_secs(2)));
    }
}
