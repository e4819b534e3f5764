//! # Agent Handoff System
//!
//! A handoff transfers the "current agent" role from one agent to another in
//! the middle of a run. The model sees each declared handoff as a tool named
//! `transfer_to_<target>`; calling it is a handoff directive.
//!
//! A directive moves through a fixed progression, enforced by the types:
//!
//! ```text
//! HandoffRequest --apply_filter--> FilteredHandoff --invoke_callback--> ReadyHandoff --activate--> HandoffActivation
//! ```
//!
//! The input filter rewrites the transcript the target agent will see. The
//! callback, when configured, receives the shared context and the directive's
//! arguments (validated into a typed payload) before the target becomes
//! current. The run's item log is never rewritten by a filter.
//!
//! ### Example: A Multi-Agent Help Desk
//!
//! ```rust
//! use agents_runtime::{Agent, Handoff};
//!
//! let tech_support = Agent::simple("Technical Support", "You are a technical support specialist.")
//!     .with_handoff_description("Handles technical support questions about our product.");
//!
//! let triage = Agent::simple("Triage", "You route questions to specialists.")
//!     .with_handoff(Handoff::new(tech_support));
//!
//! assert_eq!(triage.handoffs()[0].tool_name(), "transfer_to_technical_support");
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::agent::Agent;
use crate::context::RunContext;
use crate::error::{AgentsError, Result};
use crate::items::{HandoffOutputItem, RunItem};
use crate::model::ToolSpec;
use crate::schema::{self, Strictness};

/// Transcript handed to a filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandoffInputData {
    /// The model-facing transcript before the handoff turn.
    pub history: Vec<RunItem>,
    /// Items produced in the handoff turn.
    pub new_items: Vec<RunItem>,
}

impl HandoffInputData {
    pub fn new(history: Vec<RunItem>, new_items: Vec<RunItem>) -> Self {
        Self { history, new_items }
    }

    /// `history` followed by `new_items`.
    pub fn all_items(&self) -> Vec<RunItem> {
        self.history
            .iter()
            .chain(self.new_items.iter())
            .cloned()
            .collect()
    }
}

pub type HandoffInputFilter = Arc<dyn Fn(HandoffInputData) -> HandoffInputData + Send + Sync>;

/// Receives the context, the handoff's current tool name and the raw arguments.
type OnHandoffFn =
    dyn Fn(RunContext, String, Value) -> BoxFuture<'static, Result<()>> + Send + Sync;

/// A declared handoff target.
#[derive(Clone)]
pub struct Handoff {
    tool_name: String,
    tool_description: String,
    agent: Arc<Agent>,
    input_filter: Option<HandoffInputFilter>,
    input_schema: Option<Value>,
    on_handoff: Option<Arc<OnHandoffFn>>,
}

impl Handoff {
    /// A handoff to `agent` named `transfer_to_<snake_case(agent name)>`.
    pub fn new(agent: Agent) -> Self {
        let tool_name = default_tool_name(agent.name());
        let tool_description = default_tool_description(&agent);
        Self {
            tool_name,
            tool_description,
            agent: Arc::new(agent),
            input_filter: None,
            input_schema: None,
            on_handoff: None,
        }
    }

    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = name.into();
        self
    }

    pub fn with_tool_description(mut self, description: impl Into<String>) -> Self {
        self.tool_description = description.into();
        self
    }

    /// Rewrites the transcript the target agent receives.
    pub fn with_input_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(HandoffInputData) -> HandoffInputData + Send + Sync + 'static,
    {
        self.input_filter = Some(Arc::new(filter));
        self
    }

    /// Callback run before the target becomes current.
    pub fn on_handoff<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RunContext) -> Result<()> + Send + Sync + 'static,
    {
        self.on_handoff = Some(Arc::new(move |ctx: RunContext, _name: String, _args: Value| {
            let outcome = callback(&ctx);
            async move { outcome }.boxed()
        }));
        self
    }

    /// Callback receiving a typed payload parsed from the directive's arguments.
    ///
    /// The payload schema is advertised to the model; arguments that do not
    /// deserialize into `T` abort the run with a model behavior error.
    pub fn on_handoff_with_input<T, F, Fut>(mut self, callback: F) -> Self
    where
        T: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(RunContext, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let callback = Arc::new(callback);
        self.input_schema = Some(schema::schema_for::<T>());
        self.on_handoff = Some(Arc::new(move |ctx: RunContext, tool_name: String, args: Value| {
            let callback = callback.clone();
            async move {
                let payload: T = serde_json::from_value(args).map_err(|e| {
                    AgentsError::model_behavior(format!(
                        "invalid input for handoff '{}': {}",
                        tool_name, e
                    ))
                })?;
                callback(ctx, payload).await
            }
            .boxed()
        }));
        self
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn tool_description(&self) -> &str {
        &self.tool_description
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn agent_name(&self) -> &str {
        self.agent.name()
    }

    pub fn has_input_filter(&self) -> bool {
        self.input_filter.is_some()
    }

    /// The handoff as a tool the model can call.
    pub fn spec(&self) -> ToolSpec {
        let parameters = self.input_schema.clone().unwrap_or_else(|| {
            serde_json::json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            })
        });
        ToolSpec {
            name: self.tool_name.clone(),
            description: self.tool_description.clone(),
            parameters,
            strict: true,
        }
    }
}

impl fmt::Debug for Handoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff")
            .field("tool_name", &self.tool_name)
            .field("agent", &self.agent.name())
            .field("has_input_filter", &self.input_filter.is_some())
            .field("has_callback", &self.on_handoff.is_some())
            .finish()
    }
}

/// `transfer_to_` followed by the agent name in snake case.
pub fn default_tool_name(agent_name: &str) -> String {
    format!("transfer_to_{}", snake_case(agent_name))
}

fn default_tool_description(agent: &Agent) -> String {
    let mut description = format!(
        "Handoff to the {} agent to handle the request.",
        agent.name()
    );
    if let Some(extra) = agent.handoff_description() {
        description.push(' ');
        description.push_str(extra);
    }
    description
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            if ch.is_uppercase() {
                if prev_lower {
                    out.push('_');
                }
                out.extend(ch.to_lowercase());
                prev_lower = false;
            } else {
                out.push(ch);
                prev_lower = ch.is_lowercase() || ch.is_numeric();
            }
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    out.trim_end_matches('_').to_string()
}

/// A matched handoff directive, before its filter has run.
pub struct HandoffRequest<'a> {
    handoff: &'a Handoff,
    from_agent: String,
    call_id: String,
    arguments: Value,
}

impl<'a> HandoffRequest<'a> {
    pub fn new(
        handoff: &'a Handoff,
        from_agent: impl Into<String>,
        call_id: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self {
            handoff,
            from_agent: from_agent.into(),
            call_id: call_id.into(),
            arguments,
        }
    }

    /// Produces the history handed to the target. Without a filter the data passes unchanged.
    pub fn apply_filter(self, data: HandoffInputData) -> FilteredHandoff<'a> {
        let data = match &self.handoff.input_filter {
            Some(filter) => filter(data),
            None => data,
        };
        FilteredHandoff {
            request: self,
            data,
        }
    }
}

/// A handoff whose transcript has been filtered.
pub struct FilteredHandoff<'a> {
    request: HandoffRequest<'a>,
    data: HandoffInputData,
}

impl<'a> FilteredHandoff<'a> {
    pub fn data(&self) -> &HandoffInputData {
        &self.data
    }

    /// Validates the payload and runs the callback, if any.
    pub async fn invoke_callback(self, ctx: &RunContext) -> Result<ReadyHandoff<'a>> {
        let handoff = self.request.handoff;
        if let Some(schema) = &handoff.input_schema {
            schema::validate(schema, &self.request.arguments, Strictness::Lenient).map_err(
                |e| {
                    AgentsError::model_behavior(format!(
                        "invalid input for handoff '{}': {}",
                        handoff.tool_name, e
                    ))
                },
            )?;
        }
        if let Some(callback) = &handoff.on_handoff {
            callback(
                ctx.clone(),
                handoff.tool_name.clone(),
                self.request.arguments.clone(),
            )
            .await?;
        }
        Ok(ReadyHandoff {
            request: self.request,
            data: self.data,
        })
    }
}

/// A handoff ready to switch the current agent.
pub struct ReadyHandoff<'a> {
    request: HandoffRequest<'a>,
    data: HandoffInputData,
}

impl ReadyHandoff<'_> {
    pub fn target(&self) -> &Agent {
        self.request.handoff.agent()
    }

    pub fn activate(self) -> HandoffActivation {
        let handoff = self.request.handoff;
        let output = HandoffOutputItem {
            call_id: self.request.call_id,
            from_agent: self.request.from_agent,
            to_agent: handoff.agent_name().to_string(),
        };
        HandoffActivation {
            agent: handoff.agent.clone(),
            transcript: self.data.all_items(),
            output,
        }
    }
}

/// The outcome of a completed handoff.
#[derive(Debug)]
pub struct HandoffActivation {
    /// The new current agent.
    pub agent: Arc<Agent>,
    /// Transcript the new agent starts from, before `output` is appended.
    pub transcript: Vec<RunItem>,
    pub output: HandoffOutputItem,
}
