//! # Run context
//!
//! The caller's context is an opaque value threaded through every tool
//! invocation, guardrail evaluation, hook and handoff callback. The runtime
//! never inspects it; it only hands out the same shared reference, so a value
//! seen after a handoff is the very value the run started with.
//!
//! Context values that need mutation should carry their own interior
//! mutability (`Mutex`, atomics).

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::model::ModelProvider;
use crate::usage::{Usage, UsageStats};

/// Shared, cheap-to-clone handle on the caller's context and run usage.
#[derive(Clone)]
pub struct RunContext {
    value: Arc<dyn Any + Send + Sync>,
    usage: Arc<Mutex<UsageStats>>,
}

impl RunContext {
    /// Wraps a caller-supplied context value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wraps an already shared context value without copying it.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value,
            usage: Arc::new(Mutex::new(UsageStats::new())),
        }
    }

    /// A context carrying `()`.
    pub fn empty() -> Self {
        Self::new(())
    }

    /// Borrows the context as `T`, if that is its type.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Whether both handles point at the same context value.
    pub fn same_context(&self, other: &RunContext) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }

    /// Snapshot of usage recorded so far, nested runs included.
    pub fn usage(&self) -> UsageStats {
        match self.usage.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn record_usage(&self, model: &str, agent: &str, usage: Usage) {
        let mut stats = match self.usage.lock() {
            Ok(stats) => stats,
            Err(poisoned) => poisoned.into_inner(),
        };
        stats.record(model, agent, usage);
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("usage", &self.usage())
            .finish_non_exhaustive()
    }
}

/// What a tool sees when it is invoked.
#[derive(Clone)]
pub struct ToolContext {
    /// The run's shared context.
    pub run: RunContext,
    /// Name of the agent that requested the call.
    pub agent_name: String,
    pub tool_name: String,
    /// Call id assigned by the model.
    pub tool_call_id: String,
    /// The run's fallback provider, used by nested runs.
    pub(crate) model_provider: Option<Arc<dyn ModelProvider>>,
}

impl ToolContext {
    pub fn new(
        run: RunContext,
        agent_name: impl Into<String>,
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
    ) -> Self {
        Self {
            run,
            agent_name: agent_name.into(),
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            model_provider: None,
        }
    }

    pub fn with_model_provider(mut self, provider: Option<Arc<dyn ModelProvider>>) -> Self {
        self.model_provider = provider;
        self
    }

    /// Shorthand for `self.run.get::<T>()`.
    pub fn context<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.run.get::<T>()
    }
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("agent_name", &self.agent_name)
            .field("tool_name", &self.tool_name)
            .field("tool_call_id", &self.tool_call_id)
            .finish()
    }
}
