//! Model abstraction for LLM interactions
//!
//! The runtime treats the language model as an opaque collaborator: given an
//! agent's instructions and the ordered transcript, it returns one response
//! holding optional text and zero or more tool-call directives. Providers may
//! also stream; the default [`ModelProvider::stream`] replays a completed
//! response as word-sized text deltas.
//!
//! [`ScriptedProvider`] and [`FnProvider`] are deterministic providers for
//! tests and offline use.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentsError, Result};
use crate::items::RunItem;
use crate::usage::Usage;

/// Per-agent sampling and execution settings passed to the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// When true, tool calls of one turn execute concurrently.
    pub parallel_tool_calls: bool,
}

/// A function the model may call, as advertised to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub strict: bool,
}

/// Everything a provider needs for one turn.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Model name when the agent refers to its model by name.
    pub model: Option<String>,
    pub agent_name: String,
    pub instructions: String,
    pub transcript: Vec<RunItem>,
    pub tools: Vec<ToolSpec>,
    pub handoffs: Vec<ToolSpec>,
    pub output_schema: Option<Value>,
    pub settings: ModelSettings,
}

/// A tool-call directive. `arguments` is the raw JSON text the model produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDirective {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

/// Response from the model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallDirective>,
    pub usage: Usage,
}

impl ModelResponse {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: vec![],
            usage: Usage::new(0, 0),
        }
    }

    pub fn tool_call(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self::tool_calls(vec![ToolCallDirective {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.to_string(),
        }])
    }

    pub fn tool_calls(tool_calls: Vec<ToolCallDirective>) -> Self {
        Self {
            text: None,
            tool_calls,
            usage: Usage::new(0, 0),
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The message text, when non-empty.
    pub fn non_empty_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }
}

/// One increment of a streamed model response.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelStreamEvent {
    TextDelta(String),
    /// Terminal event carrying the full response.
    Completed(ModelResponse),
}

pub type ModelStream = BoxStream<'static, Result<ModelStreamEvent>>;

/// Trait for model providers
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Produce a complete response for one turn.
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse>;

    /// Produce a response incrementally. Must end with exactly one
    /// [`ModelStreamEvent::Completed`] whose text equals the concatenated deltas.
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream> {
        let response = self.complete(request).await?;
        let mut events: Vec<Result<ModelStreamEvent>> = text_chunks(response.text.as_deref())
            .into_iter()
            .map(|chunk| Ok(ModelStreamEvent::TextDelta(chunk)))
            .collect();
        events.push(Ok(ModelStreamEvent::Completed(response)));
        Ok(stream::iter(events).boxed())
    }

    /// Label used for usage accounting and spans.
    fn model_name(&self) -> &str;
}

/// Splits text into word-sized chunks whose concatenation is the input.
pub(crate) fn text_chunks(text: Option<&str>) -> Vec<String> {
    text.map(|t| t.split_inclusive(' ').map(str::to_string).collect())
        .unwrap_or_default()
}

/// Provider that replays a fixed queue of responses.
///
/// Records every request it receives so tests can assert what each agent saw.
pub struct ScriptedProvider {
    model: String,
    responses: Mutex<VecDeque<ModelResponse>>,
    fallback: Option<ModelResponse>,
    requests: Mutex<Vec<ModelRequest>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            responses: Mutex::new(VecDeque::new()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_response(self, response: ModelResponse) -> Self {
        lock(&self.responses).push_back(response);
        self
    }

    pub fn with_message(self, text: impl Into<String>) -> Self {
        self.with_response(ModelResponse::message(text))
    }

    pub fn with_tool_call(
        self,
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        self.with_response(ModelResponse::tool_call(call_id, name, arguments))
    }

    /// Response returned forever once the queue is drained.
    pub fn with_fallback(mut self, response: ModelResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request);
        let next = lock(&self.responses).pop_front();
        next.or_else(|| self.fallback.clone())
            .ok_or_else(|| AgentsError::Model {
                message: format!("script for '{}' is exhausted", self.model),
            })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

impl fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("model", &self.model)
            .field("calls", &self.call_count())
            .finish()
    }
}

type ResponseFn = dyn Fn(&ModelRequest) -> Result<ModelResponse> + Send + Sync;

/// Provider computing each response from the request, e.g. from the transcript.
#[derive(Clone)]
pub struct FnProvider {
    model: String,
    respond: Arc<ResponseFn>,
    calls: Arc<AtomicUsize>,
}

impl FnProvider {
    pub fn new<F>(model: impl Into<String>, respond: F) -> Self
    where
        F: Fn(&ModelRequest) -> Result<ModelResponse> + Send + Sync + 'static,
    {
        Self {
            model: model.into(),
            respond: Arc::new(respond),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for FnProvider {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(&request)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

impl fmt::Debug for FnProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProvider")
            .field("model", &self.model)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
