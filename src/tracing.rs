//! # Run traces
//!
//! A trace covers one run end to end and is made of spans: one per agent
//! activation, with model generations, tool calls, guardrail verdicts and
//! handoffs nested under it. The runner owns the [`TracingContext`] for its
//! run, so no locking is involved. Recording is gated by the run's
//! [`TracingConfig`]; when it is disabled the context only hands out ids.
//!
//! Finished traces go to the [`TraceExporter`] configured on the run.
//! Structured log events are emitted through the `tracing` crate either way.
//!
//! ```rust
//! use agents_runtime::config::TracingConfig;
//! use agents_runtime::tracing::{SpanType, TracingContext};
//!
//! let mut trace = TracingContext::new("Support", &TracingConfig::default());
//! let agent = trace.start_span(SpanType::Agent {
//!     agent_name: "Triage".to_string(),
//!     tools: vec!["lookup".to_string()],
//!     handoffs: vec![],
//! });
//! let tool = trace.start_span(SpanType::Custom {
//!     name: "cache".to_string(),
//!     metadata: serde_json::json!({"hit": true}),
//! });
//! trace.end_span(&tool);
//! trace.end_span(&agent);
//!
//! assert_eq!(trace.spans().len(), 2);
//! assert_eq!(trace.spans()[1].parent_id.as_deref(), Some(agent.as_str()));
//! ```

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TracingConfig;
use crate::error::Result;
use crate::guardrail::GuardrailPhase;
use crate::usage::Usage;

pub type TraceId = String;
pub type SpanId = String;

pub fn gen_trace_id() -> TraceId {
    format!("trace_{}", Uuid::new_v4().simple())
}

pub fn gen_span_id() -> SpanId {
    format!("span_{}", Uuid::new_v4().simple())
}

const REDACTED: &str = "<redacted>";

/// The kind of work a span covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpanType {
    /// One agent activation, from becoming current to handing off or finishing.
    Agent {
        agent_name: String,
        tools: Vec<String>,
        handoffs: Vec<String>,
    },
    /// One model call.
    Generation {
        model: String,
        prompt_tokens: usize,
        completion_tokens: usize,
        output: Value,
    },
    Tool {
        tool_name: String,
        arguments: Value,
        output: Value,
    },
    Guardrail {
        guardrail_name: String,
        phase: GuardrailPhase,
        triggered: bool,
    },
    Handoff {
        from_agent: String,
        to_agent: String,
    },
    Custom {
        name: String,
        metadata: Value,
    },
}

/// A unit of work within a trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: SpanId,
    pub trace_id: TraceId,
    pub parent_id: Option<SpanId>,
    pub span_type: SpanType,
    pub start_time: DateTime<Utc>,
    /// `None` while the span is open.
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Span {
    pub fn new(trace_id: TraceId, parent_id: Option<SpanId>, span_type: SpanType) -> Self {
        Self {
            id: gen_span_id(),
            trace_id,
            parent_id,
            span_type,
            start_time: Utc::now(),
            end_time: None,
            error: None,
        }
    }

    pub fn complete(&mut self) {
        self.end_time = Some(Utc::now());
    }

    pub fn fail(&mut self, error: String) {
        self.error = Some(error);
        self.complete();
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }
}

/// Spans of one run.
#[derive(Debug)]
pub struct TracingContext {
    trace_id: TraceId,
    workflow_name: String,
    enabled: bool,
    include_sensitive_data: bool,
    open: Vec<SpanId>,
    spans: Vec<Span>,
}

impl TracingContext {
    pub fn new(workflow_name: impl Into<String>, config: &TracingConfig) -> Self {
        let trace_id = gen_trace_id();
        let workflow_name = workflow_name.into();
        if config.enabled {
            info!(trace_id = %trace_id, workflow = %workflow_name, "starting trace");
        }
        Self {
            trace_id,
            workflow_name,
            enabled: config.enabled,
            include_sensitive_data: config.include_sensitive_data,
            open: Vec::new(),
            spans: Vec::new(),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// `value` when sensitive data may be recorded, a placeholder otherwise.
    pub fn sensitive(&self, value: Value) -> Value {
        if self.include_sensitive_data {
            value
        } else {
            Value::String(REDACTED.to_string())
        }
    }

    /// Opens a span as a child of the innermost open span.
    pub fn start_span(&mut self, span_type: SpanType) -> SpanId {
        if !self.enabled {
            return gen_span_id();
        }
        let span = Span::new(self.trace_id.clone(), self.open.last().cloned(), span_type);
        let id = span.id.clone();
        debug!(span_id = %id, "span started");
        self.spans.push(span);
        self.open.push(id.clone());
        id
    }

    /// Records a span that starts and ends at once, e.g. a guardrail verdict.
    pub fn record_span(&mut self, span_type: SpanType) {
        let id = self.start_span(span_type);
        self.end_span(&id);
    }

    pub fn end_span(&mut self, span_id: &str) {
        if let Some(span) = self.spans.iter_mut().find(|s| s.id == span_id) {
            if span.end_time.is_none() {
                span.complete();
            }
        }
        self.open.retain(|id| id != span_id);
    }

    pub fn record_error(&mut self, span_id: &str, error: String) {
        if let Some(span) = self.spans.iter_mut().find(|s| s.id == span_id) {
            warn!(span_id = %span_id, error = %error, "span failed");
            span.fail(error);
        }
        self.open.retain(|id| id != span_id);
    }

    /// Fills in the usage and output of a generation span.
    pub fn finish_generation(&mut self, span_id: &str, usage: &Usage, output: Value) {
        let output = self.sensitive(output);
        if let Some(span) = self.spans.iter_mut().find(|s| s.id == span_id) {
            if let SpanType::Generation {
                prompt_tokens,
                completion_tokens,
                output: recorded,
                ..
            } = &mut span.span_type
            {
                *prompt_tokens = usage.prompt_tokens;
                *completion_tokens = usage.completion_tokens;
                *recorded = output;
            }
        }
        self.end_span(span_id);
    }

    /// Fills in the output of a tool span.
    pub fn finish_tool(&mut self, span_id: &str, output: Value) {
        let output = self.sensitive(output);
        if let Some(span) = self.spans.iter_mut().find(|s| s.id == span_id) {
            if let SpanType::Tool {
                output: recorded, ..
            } = &mut span.span_type
            {
                *recorded = output;
            }
        }
        self.end_span(span_id);
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Closes any open spans, failing them with `error` if given, and exports the trace.
    pub fn finish(
        mut self,
        error: Option<&str>,
        exporter: Option<&Arc<dyn TraceExporter>>,
    ) -> Result<()> {
        let open: Vec<SpanId> = self.open.iter().rev().cloned().collect();
        for id in open {
            match error {
                Some(message) => self.record_error(&id, message.to_string()),
                None => self.end_span(&id),
            }
        }
        if !self.enabled {
            return Ok(());
        }
        info!(trace_id = %self.trace_id, spans = self.spans.len(), "trace finished");
        match exporter {
            Some(exporter) => exporter.export(&self.trace_id, &self.workflow_name, self.spans),
            None => Ok(()),
        }
    }
}

/// Receives finished traces.
pub trait TraceExporter: Send + Sync {
    fn export(&self, trace_id: &str, workflow_name: &str, spans: Vec<Span>) -> Result<()>;
}

/// Writes a summary of each trace to the log.
#[derive(Debug, Clone, Default)]
pub struct LogExporter;

impl TraceExporter for LogExporter {
    fn export(&self, trace_id: &str, workflow_name: &str, spans: Vec<Span>) -> Result<()> {
        info!(trace_id = %trace_id, workflow = %workflow_name, spans = spans.len(), "exporting trace");
        for span in &spans {
            debug!(
                trace_id = %trace_id,
                span_id = %span.id,
                duration_ms = span.duration_ms().unwrap_or_default(),
                error = span.error.as_deref().unwrap_or(""),
                "{:?}",
                span.span_type
            );
        }
        Ok(())
    }
}

/// A finished trace, as kept by [`InMemoryExporter`].
#[derive(Debug, Clone)]
pub struct ExportedTrace {
    pub trace_id: TraceId,
    pub workflow_name: String,
    pub spans: Vec<Span>,
}

/// Keeps finished traces in memory.
#[derive(Debug, Default)]
pub struct InMemoryExporter {
    traces: Mutex<Vec<ExportedTrace>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traces(&self) -> Vec<ExportedTrace> {
        match self.traces.lock() {
            Ok(traces) => traces.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl TraceExporter for InMemoryExporter {
    fn export(&self, trace_id: &str, workflow_name: &str, spans: Vec<Span>) -> Result<()> {
        let mut traces = match self.traces.lock() {
            Ok(traces) => traces,
            Err(poisoned) => poisoned.into_inner(),
        };
        traces.push(ExportedTrace {
            trace_id: trace_id.to_string(),
            workflow_name: workflow_name.to_string(),
            spans,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn agent_span(name: &str) -> SpanType {
        SpanType::Agent {
            agent_name: name.to_string(),
            tools: vec![],
            handoffs: vec![],
        }
    }

    #[test]
    fn test_nesting_follows_open_spans() {
        let mut trace = TracingContext::new("wf", &TracingConfig::default());
        let agent = trace.start_span(agent_span("A"));
        let generation = trace.start_span(SpanType::Generation {
            model: "m".to_string(),
            prompt_tokens: 0,
            completion_tokens: 0,
            output: Value::Null,
        });
        trace.finish_generation(&generation, &Usage::new(5, 7), serde_json::json!("hi"));
        trace.record_span(SpanType::Handoff {
            from_agent: "A".to_string(),
            to_agent: "B".to_string(),
        });
        trace.end_span(&agent);

        let spans = trace.spans();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[1].parent_id.as_deref(), Some(agent.as_str()));
        assert_eq!(spans[2].parent_id.as_deref(), Some(agent.as_str()));
        match &spans[1].span_type {
            SpanType::Generation {
                prompt_tokens,
                output,
                ..
            } => {
                assert_eq!(*prompt_tokens, 5);
                assert_eq!(output, &serde_json::json!("hi"));
            }
            other => panic!("unexpected span {:?}", other),
        }
        assert!(spans.iter().all(|s| s.end_time.is_some()));
    }

    #[test]
    fn test_disabled_records_nothing() {
        let mut trace = TracingContext::new("wf", &TracingConfig::disabled());
        let id = trace.start_span(agent_span("A"));
        trace.end_span(&id);
        assert!(trace.spans().is_empty());
    }

    #[test]
    fn test_sensitive_data_redacted() {
        let config = TracingConfig {
            enabled: true,
            include_sensitive_data: false,
        };
        let mut trace = TracingContext::new("wf", &config);
        let tool = trace.start_span(SpanType::Tool {
            tool_name: "lookup".to_string(),
            arguments: trace.sensitive(serde_json::json!({"ssn": "123"})),
            output: Value::Null,
        });
        trace.finish_tool(&tool, serde_json::json!("secret"));
        match &trace.spans()[0].span_type {
            SpanType::Tool {
                arguments, output, ..
            } => {
                assert_eq!(arguments, &serde_json::json!("<redacted>"));
                assert_eq!(output, &serde_json::json!("<redacted>"));
            }
            other => panic!("unexpected span {:?}", other),
        }
    }

    #[test]
    fn test_finish_exports_and_fails_open_spans() {
        let exporter = Arc::new(InMemoryExporter::new());
        let dyn_exporter: Arc<dyn TraceExporter> = exporter.clone();
        let mut trace = TracingContext::new("Support", &TracingConfig::default());
        let trace_id = trace.trace_id().to_string();
        trace.start_span(agent_span("A"));
        trace.finish(Some("boom"), Some(&dyn_exporter)).unwrap();

        let traces = exporter.traces();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].trace_id, trace_id);
        assert_eq!(traces[0].workflow_name, "Support");
        assert_eq!(traces[0].spans[0].error.as_deref(), Some("boom"));
    }
}
