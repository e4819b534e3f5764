//! Tool invocation as a Tower stack.
//!
//! Every call goes through the same composition:
//!
//! ```text
//! ValidateArgumentsLayer -> [TimeoutLayer] -> ToolService -> Tool::invoke
//! ```
//!
//! Argument validation runs before the tool body, so a strict tool never
//! observes undeclared fields. The timeout layer is only present when the tool
//! declares one. Failures come back as [`ToolError`] and are resolved by the
//! tool's [`FailurePolicy`](crate::tool::FailurePolicy) in [`execute_tool`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tower::util::BoxService;
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, warn};

use crate::context::ToolContext;
use crate::error::{AgentsError, Result};
use crate::schema::{self, Strictness};
use crate::tool::{FunctionToolResult, Tool, ToolError};

type BoxedFuture = Pin<Box<dyn Future<Output = std::result::Result<Value, ToolError>> + Send>>;

/// One invocation: who is calling, and with what arguments.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub ctx: ToolContext,
    pub arguments: Value,
}

/// Boxed stack the runner drives for a single call.
pub type ToolBoxService = BoxService<ToolRequest, Value, ToolError>;

/// Base executor adapting `dyn Tool` to a Tower service.
#[derive(Clone)]
pub struct ToolService {
    tool: Arc<dyn Tool>,
}

impl ToolService {
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        Self { tool }
    }
}

impl Service<ToolRequest> for ToolService {
    type Response = Value;
    type Error = ToolError;
    type Future = BoxedFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ToolRequest) -> Self::Future {
        let tool = self.tool.clone();
        Box::pin(async move { tool.invoke(req.ctx, req.arguments).await })
    }
}

/// Rejects arguments that do not match the tool's schema.
#[derive(Clone, Debug)]
pub struct ValidateArgumentsLayer {
    schema: Value,
    strictness: Strictness,
}

impl ValidateArgumentsLayer {
    pub fn new(schema: Value, strictness: Strictness) -> Self {
        Self { schema, strictness }
    }

    pub fn strict(schema: Value) -> Self {
        Self::new(schema, Strictness::Strict)
    }

    pub fn lenient(schema: Value) -> Self {
        Self::new(schema, Strictness::Lenient)
    }
}

#[derive(Clone, Debug)]
pub struct ValidateArgumentsService<S> {
    inner: S,
    schema: Value,
    strictness: Strictness,
}

impl<S> Layer<S> for ValidateArgumentsLayer {
    type Service = ValidateArgumentsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ValidateArgumentsService {
            inner,
            schema: self.schema.clone(),
            strictness: self.strictness,
        }
    }
}

impl<S> Service<ToolRequest> for ValidateArgumentsService<S>
where
    S: Service<ToolRequest, Response = Value, Error = ToolError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Value;
    type Error = ToolError;
    type Future = BoxedFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ToolRequest) -> Self::Future {
        let mut inner = self.inner.clone();
        let checked = schema::validate(&self.schema, &req.arguments, self.strictness);
        Box::pin(async move {
            checked.map_err(ToolError::InvalidArguments)?;
            inner.call(req).await
        })
    }
}

/// Bounds a single invocation.
#[derive(Clone, Copy, Debug)]
pub struct TimeoutLayer {
    duration: Duration,
}

impl TimeoutLayer {
    pub fn from_duration(duration: Duration) -> Self {
        Self { duration }
    }
}

#[derive(Clone, Debug)]
pub struct TimeoutService<S> {
    inner: S,
    duration: Duration,
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            duration: self.duration,
        }
    }
}

impl<S> Service<ToolRequest> for TimeoutService<S>
where
    S: Service<ToolRequest, Response = Value, Error = ToolError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Value;
    type Error = ToolError;
    type Future = BoxedFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ToolRequest) -> Self::Future {
        let mut inner = self.inner.clone();
        let duration = self.duration;
        Box::pin(async move {
            match tokio::time::timeout(duration, inner.call(req)).await {
                Ok(res) => res,
                Err(_elapsed) => Err(ToolError::Timeout(duration)),
            }
        })
    }
}

/// Builds the boxed stack for `tool` from its declared strictness and timeout.
pub fn build_tool_stack(tool: Arc<dyn Tool>) -> ToolBoxService {
    let validate = ValidateArgumentsLayer::new(tool.parameters_schema(), tool.strictness());
    let timeout = tool.timeout();
    let base = ToolService::new(tool);
    match timeout {
        Some(duration) => {
            BoxService::new(validate.layer(TimeoutLayer::from_duration(duration).layer(base)))
        }
        None => BoxService::new(validate.layer(base)),
    }
}

/// Runs one call through the stack and applies the tool's failure policy.
///
/// A recovered failure becomes an `is_error` result carrying the readable
/// message; a propagated one becomes [`AgentsError::ToolExecution`].
pub(crate) async fn execute_tool(
    tool: Arc<dyn Tool>,
    ctx: ToolContext,
    arguments: Value,
) -> Result<FunctionToolResult> {
    let name = tool.name().to_string();
    let call_id = ctx.tool_call_id.clone();
    let policy = tool.failure_policy();
    let stack = build_tool_stack(tool);

    let outcome = stack
        .oneshot(ToolRequest {
            ctx: ctx.clone(),
            arguments,
        })
        .await;

    match outcome {
        Ok(output) => {
            debug!(tool = %name, call_id = %call_id, "tool completed");
            Ok(FunctionToolResult {
                tool_name: name,
                call_id,
                output,
                is_error: false,
            })
        }
        Err(error) => match policy.recover(&ctx, &error) {
            Some(message) => {
                warn!(tool = %name, call_id = %call_id, error = %error, "tool failed, recovering");
                Ok(FunctionToolResult {
                    tool_name: name,
                    call_id,
                    output: Value::String(message),
                    is_error: true,
                })
            }
            None => Err(AgentsError::ToolExecution {
                tool: name,
                message: error.to_string(),
            }),
        },
    }
}
