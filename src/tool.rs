//! Tool system for agents
//!
//! Tools are named callables the model can invoke. Each tool declares an
//! argument schema, whether unknown argument fields are rejected, and what
//! happens when it fails. Execution itself goes through the tower stack in
//! [`tool_service`](crate::tool_service).

use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::context::{RunContext, ToolContext};
use crate::model::ToolSpec;
use crate::schema::{self, Strictness};

/// Why a tool invocation failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Failed(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

type FailureFn = dyn Fn(&ToolContext, &ToolError) -> String + Send + Sync;

/// What the runtime does with a failed invocation.
#[derive(Clone, Default)]
pub enum FailurePolicy {
    /// Turn the error into a short readable message for the model.
    #[default]
    Default,
    /// Produce the message with a caller-supplied function.
    Custom(Arc<FailureFn>),
    /// Abort the run with [`AgentsError::ToolExecution`](crate::AgentsError::ToolExecution).
    Propagate,
}

impl FailurePolicy {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&ToolContext, &ToolError) -> String + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// The message recorded as the tool's output, or `None` to propagate.
    pub fn recover(&self, ctx: &ToolContext, error: &ToolError) -> Option<String> {
        match self {
            FailurePolicy::Default => Some(default_failure_message(error)),
            FailurePolicy::Custom(f) => Some(f(ctx, error)),
            FailurePolicy::Propagate => None,
        }
    }
}

impl Debug for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Default => write!(f, "Default"),
            FailurePolicy::Custom(_) => write!(f, "Custom"),
            FailurePolicy::Propagate => write!(f, "Propagate"),
        }
    }
}

pub fn default_failure_message(error: &ToolError) -> String {
    format!(
        "An error occurred while running the tool. Please try again. Error: {}",
        error
    )
}

/// Trait for all tools that can be used by agents
#[async_trait]
pub trait Tool: Send + Sync + Debug {
    /// Name the model calls the tool by; unique within an agent.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    fn strictness(&self) -> Strictness {
        Strictness::Strict
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Default
    }

    /// Upper bound on a single invocation.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Run the tool with already validated arguments.
    async fn invoke(&self, ctx: ToolContext, arguments: Value) -> Result<Value, ToolError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
            strict: self.strictness() == Strictness::Strict,
        }
    }
}

type ToolFn = dyn Fn(ToolContext, Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync;

/// A tool backed by a closure.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    parameters_schema: Value,
    strictness: Strictness,
    failure_policy: FailurePolicy,
    timeout: Option<Duration>,
    function: Arc<ToolFn>,
}

impl Debug for FunctionTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("strictness", &self.strictness)
            .field("failure_policy", &self.failure_policy)
            .finish()
    }
}

impl FunctionTool {
    /// A synchronous tool over raw JSON arguments.
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: Value,
        function: F,
    ) -> Self
    where
        F: Fn(Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        let function = Arc::new(function);
        Self::with_function(name, description, parameters_schema, move |_ctx, args| {
            let function = function.clone();
            async move { function(args) }.boxed()
        })
    }

    /// An asynchronous tool that also receives the invocation context.
    pub fn from_async<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: Value,
        function: F,
    ) -> Self
    where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self::with_function(name, description, parameters_schema, move |ctx, args| {
            function(ctx, args).boxed()
        })
    }

    /// A string-to-string tool taking `{"input": "..."}`.
    pub fn simple<F>(name: &str, description: &str, function: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        Self::new(
            name,
            description,
            serde_json::json!({
                "type": "object",
                "properties": {
                    "input": {"type": "string", "description": "Input to the function"}
                },
                "required": ["input"]
            }),
            move |args: Value| {
                let input = args
                    .get("input")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(Value::String(function(input)))
            },
        )
    }

    fn with_function<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: Value,
        function: F,
    ) -> Self
    where
        F: Fn(ToolContext, Value) -> BoxFuture<'static, Result<Value, ToolError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters_schema,
            strictness: Strictness::Strict,
            failure_policy: FailurePolicy::Default,
            timeout: None,
            function: Arc::new(function),
        }
    }

    /// Permit argument fields the schema does not declare.
    pub fn lenient(mut self) -> Self {
        self.strictness = Strictness::Lenient;
        self
    }

    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters_schema.clone()
    }

    fn strictness(&self) -> Strictness {
        self.strictness
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy.clone()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn invoke(&self, ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
        (self.function)(ctx, arguments).await
    }
}

/// A typed tool: arguments are deserialized into `A`, whose schema comes from `schemars`.
///
/// ```rust
/// use agents_runtime::tool::{function_tool, ToolError};
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct AddArgs { a: i64, b: i64 }
///
/// let add = function_tool("add", "Add two integers", |args: AddArgs| async move {
///     Ok::<_, ToolError>(args.a + args.b)
/// });
/// # use agents_runtime::Tool;
/// assert_eq!(add.name(), "add");
/// ```
pub fn function_tool<A, R, F, Fut>(name: &str, description: &str, function: F) -> FunctionTool
where
    A: DeserializeOwned + JsonSchema + Send + 'static,
    R: Serialize + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ToolError>> + Send + 'static,
{
    let function = Arc::new(function);
    context_tool(name, description, move |_ctx: ToolContext, args: A| {
        let function = function.clone();
        async move { function(args).await }
    })
}

/// Like [`function_tool`], but the closure also receives the [`ToolContext`].
pub fn context_tool<A, R, F, Fut>(name: &str, description: &str, function: F) -> FunctionTool
where
    A: DeserializeOwned + JsonSchema + Send + 'static,
    R: Serialize + 'static,
    F: Fn(ToolContext, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ToolError>> + Send + 'static,
{
    let function = Arc::new(function);
    FunctionTool::from_async(
        name,
        description,
        schema::schema_for::<A>(),
        move |ctx, raw: Value| {
            let function = function.clone();
            async move {
                let args: A = serde_json::from_value(raw)
                    .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
                let output = function(ctx, args).await?;
                serde_json::to_value(output).map_err(|e| ToolError::Failed(e.to_string()))
            }
        },
    )
}

/// Outcome of one tool invocation within a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionToolResult {
    pub tool_name: String,
    pub call_id: String,
    pub output: Value,
    /// True when `output` is a recovered failure message.
    pub is_error: bool,
}

/// Whether a batch of tool results ends the run.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolDecision {
    /// Call the model again with the tool outputs.
    Continue,
    /// Finish the run with this final output.
    Stop(Value),
}

type DecideFn = dyn Fn(&RunContext, &[FunctionToolResult]) -> ToolDecision + Send + Sync;

/// How an agent treats the results of its tool calls.
#[derive(Clone, Default)]
pub enum ToolUseBehavior {
    /// Feed outputs back to the model.
    #[default]
    RunLlmAgain,
    /// The first tool's output is the final output.
    StopOnFirstTool,
    /// Stop when any of the named tools ran; its output is the final output.
    StopAtTools(Vec<String>),
    /// Caller-supplied decision.
    Custom(Arc<DecideFn>),
}

impl ToolUseBehavior {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&RunContext, &[FunctionToolResult]) -> ToolDecision + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Decide on one turn's batch of results, in model order.
    pub fn decide(&self, ctx: &RunContext, results: &[FunctionToolResult]) -> ToolDecision {
        match self {
            ToolUseBehavior::RunLlmAgain => ToolDecision::Continue,
            ToolUseBehavior::StopOnFirstTool => results
                .first()
                .map(|r| ToolDecision::Stop(r.output.clone()))
                .unwrap_or(ToolDecision::Continue),
            ToolUseBehavior::StopAtTools(names) => results
                .iter()
                .find(|r| names.iter().any(|n| n == &r.tool_name))
                .map(|r| ToolDecision::Stop(r.output.clone()))
                .unwrap_or(ToolDecision::Continue),
            ToolUseBehavior::Custom(f) => f(ctx, results),
        }
    }
}

impl Debug for ToolUseBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolUseBehavior::RunLlmAgain => write!(f, "RunLlmAgain"),
            ToolUseBehavior::StopOnFirstTool => write!(f, "StopOnFirstTool"),
            ToolUseBehavior::StopAtTools(names) => f.debug_tuple("StopAtTools").field(names).finish(),
            ToolUseBehavior::Custom(_) => write!(f, "Custom"),
        }
    }
}
