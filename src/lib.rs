//! # Agents runtime
//!
//! A turn-based orchestration runtime for LLM-backed agents. An [`Agent`]
//! declares instructions, tools, handoff targets and guardrails; the
//! [`Runner`] drives it against a [`ModelProvider`](model::ModelProvider)
//! until it produces a final output, hands control to another agent, or
//! exceeds its turn bound.
//!
//! ## Core Concepts
//!
//! - **Agent**: immutable descriptor of an LLM-backed participant
//! - **Tools**: typed functions the model may call, executed through a Tower
//!   service stack that validates arguments and enforces timeouts
//! - **Handoffs**: transfer of the current-agent role, with transcript filters
//! - **Guardrails**: input and output checks that abort a run when tripped
//! - **Hooks**: strict lifecycle observers
//! - **Sessions**: conversation history loaded before and stored after a run
//!
//! ## Getting Started
//!
//! ```rust
//! use agents_runtime::model::{ModelResponse, ScriptedProvider};
//! use agents_runtime::tool::function_tool;
//! use agents_runtime::{Agent, RunConfig, Runner};
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//! use std::sync::Arc;
//!
//! #[derive(Debug, Deserialize, JsonSchema)]
//! struct AddArgs {
//!     a: i64,
//!     b: i64,
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> agents_runtime::Result<()> {
//! let add = function_tool("add", "Add two numbers", |args: AddArgs| async move {
//!     Ok::<_, agents_runtime::tool::ToolError>(args.a + args.b)
//! });
//!
//! // A scripted model: call the tool, then answer.
//! let provider = Arc::new(
//!     ScriptedProvider::new("stub")
//!         .with_response(ModelResponse::tool_call("call_1", "add", serde_json::json!({"a": 2, "b": 3})))
//!         .with_message("2 + 3 = 5"),
//! );
//!
//! let agent = Agent::simple("Math", "You add numbers.").with_tool(Arc::new(add));
//! let config = RunConfig::default().with_model_provider(provider);
//!
//! let result = Runner::run(agent, "add 2 and 3", config).await?;
//! assert_eq!(result.final_output_text(), "2 + 3 = 5");
//! assert_eq!(result.items.len(), 3);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod guardrail;
pub mod handoff;
pub mod handoff_filters;
pub mod hooks;
pub mod items;
pub mod memory;
pub mod model;
pub mod result;
pub mod runner;
pub mod schema;
pub mod sqlite_session;
pub mod stream;
pub mod tool;
pub mod tool_service;
pub mod tracing;
pub mod usage;

pub use agent::{Agent, AgentConfig, AgentTool, Instructions, ModelRef, OutputSchema};
pub use config::{RunConfig, RunSettings, TracingConfig};
pub use context::{RunContext, ToolContext};
pub use error::{AgentsError, Result};
pub use guardrail::{GuardrailOutput, GuardrailPhase, GuardrailResult, InputGuardrail, OutputGuardrail};
pub use handoff::Handoff;
pub use hooks::{AgentHooks, RunHooks};
pub use items::{RunInput, RunItem};
pub use memory::{InMemorySession, Session};
pub use model::{ModelProvider, ModelResponse};
pub use result::RunResult;
pub use runner::Runner;
pub use sqlite_session::SqliteSession;
pub use stream::{StreamEvent, StreamedRun};
pub use tool::{FunctionTool, Tool, ToolError, ToolUseBehavior};
pub use usage::{Usage, UsageStats};

// Re-export Tower traits used to compose tool stacks
pub use tower::{Layer, Service, ServiceExt};
