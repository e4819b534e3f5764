//! Result types for agent execution

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::agent::Agent;
use crate::error::Result;
use crate::guardrail::GuardrailResult;
use crate::items::{value_to_text, RunItem};
use crate::usage::UsageStats;

/// The terminal artifact of a successful run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// What the model saw first: session history followed by the caller's input.
    pub input: Vec<RunItem>,
    /// Items produced by the run, in causal order.
    pub items: Vec<RunItem>,
    /// The final message text, a tool output chosen by the tool-use behavior,
    /// or the parsed structured output.
    pub final_output: Value,
    /// The agent that was current when the run finished.
    pub last_agent: Arc<Agent>,
    pub input_guardrail_results: Vec<GuardrailResult>,
    pub output_guardrail_results: Vec<GuardrailResult>,
    /// Number of model calls made.
    pub turns: usize,
    pub usage: UsageStats,
    pub trace_id: String,
}

impl RunResult {
    /// The final output as text; strings are returned without quotes.
    pub fn final_output_text(&self) -> String {
        value_to_text(&self.final_output)
    }

    /// The final output deserialized into `T`.
    pub fn final_output_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.final_output.clone())?)
    }

    /// Input followed by the new items, ready to seed a follow-up run.
    pub fn to_input_list(&self) -> Vec<RunItem> {
        self.input
            .iter()
            .chain(self.items.iter())
            .cloned()
            .collect()
    }

    pub fn last_agent_name(&self) -> &str {
        self.last_agent.name()
    }
}
