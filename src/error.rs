//! Error types for the agents runtime

use std::time::Duration;

use thiserror::Error;

use crate::guardrail::{GuardrailPhase, GuardrailResult};
use crate::items::RunItem;

/// Result type alias for the agents runtime
pub type Result<T> = std::result::Result<T, AgentsError>;

/// Main error type for the agents runtime.
///
/// Every variant except [`AgentsError::ToolExecution`] always aborts a run.
/// Tool failures are recovered in-band unless the tool opted out of recovery.
#[derive(Debug, Error)]
pub enum AgentsError {
    /// An agent or run is misconfigured (missing model, duplicate tool names,
    /// a handoff to an undeclared agent).
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The turn bound was exceeded. Carries whatever was produced so far.
    #[error("Maximum turns exceeded: {max_turns}")]
    MaxTurnsExceeded {
        max_turns: usize,
        items: Vec<RunItem>,
    },

    /// An input or output guardrail tripped.
    #[error("{phase} guardrail tripped: {}", result.guardrail_name)]
    GuardrailTripped {
        phase: GuardrailPhase,
        result: Box<GuardrailResult>,
    },

    /// The model referenced an unknown tool or produced an unparseable directive.
    #[error("Model behavior error: {message}")]
    ModelBehavior { message: String },

    /// A tool failed and its failure policy does not recover.
    #[error("Tool execution error in '{tool}': {message}")]
    ToolExecution { tool: String, message: String },

    /// The run did not finish before the configured deadline.
    #[error("Run deadline of {timeout:?} exceeded")]
    DeadlineExceeded { timeout: Duration },

    /// The model provider failed to produce a response.
    #[error("Model provider error: {message}")]
    Model { message: String },

    /// An error raised by caller-supplied code (hooks, handoff callbacks).
    #[error("User error: {message}")]
    User { message: String },

    /// Session store error
    #[error("Session error: {0}")]
    Session(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AgentsError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn model_behavior(message: impl Into<String>) -> Self {
        Self::ModelBehavior {
            message: message.into(),
        }
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self::User {
            message: message.into(),
        }
    }

    /// Whether a fresh run (possibly with a larger bound) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::MaxTurnsExceeded { .. } | Self::DeadlineExceeded { .. }
        )
    }

    /// Items produced before the run aborted, when the error carries them.
    pub fn partial_items(&self) -> &[RunItem] {
        match self {
            Self::MaxTurnsExceeded { items, .. } => items,
            _ => &[],
        }
    }

    /// The tripped guardrail, if this is a guardrail error.
    pub fn tripped_guardrail(&self) -> Option<(GuardrailPhase, &GuardrailResult)> {
        match self {
            Self::GuardrailTripped { phase, result } => Some((*phase, result)),
            _ => None,
        }
    }
}
