//! Lifecycle hooks.
//!
//! [`RunHooks`] observe a whole run; [`AgentHooks`] are attached to a single
//! agent and fire only while it is current. Every method has a no-op default.
//!
//! Hooks are strict: they are awaited in registration order at each
//! transition, run hooks before the current agent's hooks, and the first
//! `Err` aborts the run with that error.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::agent::Agent;
use crate::context::RunContext;
use crate::error::Result;
use crate::items::{ToolCallItem, ToolOutputItem};

/// Observer of every agent in a run.
#[async_trait]
pub trait RunHooks: Send + Sync {
    /// An agent became current (run start or after a handoff).
    async fn on_agent_start(&self, _ctx: &RunContext, _agent: &Agent) -> Result<()> {
        Ok(())
    }

    /// An agent produced the run's final output.
    async fn on_agent_end(&self, _ctx: &RunContext, _agent: &Agent, _output: &Value) -> Result<()> {
        Ok(())
    }

    async fn on_tool_start(
        &self,
        _ctx: &RunContext,
        _agent: &Agent,
        _call: &ToolCallItem,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_tool_end(
        &self,
        _ctx: &RunContext,
        _agent: &Agent,
        _call: &ToolCallItem,
        _output: &ToolOutputItem,
    ) -> Result<()> {
        Ok(())
    }

    /// Control moved from `from` to `to`.
    async fn on_handoff(&self, _ctx: &RunContext, _from: &Agent, _to: &Agent) -> Result<()> {
        Ok(())
    }
}

/// Observer attached to one agent.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    async fn on_start(&self, _ctx: &RunContext, _agent: &Agent) -> Result<()> {
        Ok(())
    }

    async fn on_end(&self, _ctx: &RunContext, _agent: &Agent, _output: &Value) -> Result<()> {
        Ok(())
    }

    async fn on_tool_start(
        &self,
        _ctx: &RunContext,
        _agent: &Agent,
        _call: &ToolCallItem,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_tool_end(
        &self,
        _ctx: &RunContext,
        _agent: &Agent,
        _call: &ToolCallItem,
        _output: &ToolOutputItem,
    ) -> Result<()> {
        Ok(())
    }

    /// This agent received control from `source`.
    async fn on_handoff(&self, _ctx: &RunContext, _agent: &Agent, _source: &Agent) -> Result<()> {
        Ok(())
    }
}

/// Logs every transition at `info`.
#[derive(Debug, Clone, Default)]
pub struct LoggingHooks;

#[async_trait]
impl RunHooks for LoggingHooks {
    async fn on_agent_start(&self, _ctx: &RunContext, agent: &Agent) -> Result<()> {
        info!(agent = %agent.name(), "agent started");
        Ok(())
    }

    async fn on_agent_end(&self, _ctx: &RunContext, agent: &Agent, _output: &Value) -> Result<()> {
        info!(agent = %agent.name(), "agent finished");
        Ok(())
    }

    async fn on_tool_start(&self, _ctx: &RunContext, agent: &Agent, call: &ToolCallItem) -> Result<()> {
        info!(agent = %agent.name(), tool = %call.tool_name, call_id = %call.call_id, "tool started");
        Ok(())
    }

    async fn on_tool_end(
        &self,
        _ctx: &RunContext,
        agent: &Agent,
        call: &ToolCallItem,
        output: &ToolOutputItem,
    ) -> Result<()> {
        info!(
            agent = %agent.name(),
            tool = %call.tool_name,
            is_error = output.is_error,
            "tool finished"
        );
        Ok(())
    }

    async fn on_handoff(&self, _ctx: &RunContext, from: &Agent, to: &Agent) -> Result<()> {
        info!(from = %from.name(), to = %to.name(), "handoff");
        Ok(())
    }
}

/// Fans each transition out to run hooks, then to the agent's own hooks.
#[derive(Clone, Default)]
pub(crate) struct HookDispatcher {
    run_hooks: Vec<Arc<dyn RunHooks>>,
}

impl HookDispatcher {
    pub(crate) fn new(run_hooks: Vec<Arc<dyn RunHooks>>) -> Self {
        Self { run_hooks }
    }

    pub(crate) async fn agent_start(&self, ctx: &RunContext, agent: &Agent) -> Result<()> {
        for hook in &self.run_hooks {
            hook.on_agent_start(ctx, agent).await?;
        }
        if let Some(hooks) = agent.hooks() {
            hooks.on_start(ctx, agent).await?;
        }
        Ok(())
    }

    pub(crate) async fn agent_end(&self, ctx: &RunContext, agent: &Agent, output: &Value) -> Result<()> {
        for hook in &self.run_hooks {
            hook.on_agent_end(ctx, agent, output).await?;
        }
        if let Some(hooks) = agent.hooks() {
            hooks.on_end(ctx, agent, output).await?;
        }
        Ok(())
    }

    pub(crate) async fn tool_start(
        &self,
        ctx: &RunContext,
        agent: &Agent,
        call: &ToolCallItem,
    ) -> Result<()> {
        for hook in &self.run_hooks {
            hook.on_tool_start(ctx, agent, call).await?;
        }
        if let Some(hooks) = agent.hooks() {
            hooks.on_tool_start(ctx, agent, call).await?;
        }
        Ok(())
    }

    pub(crate) async fn tool_end(
        &self,
        ctx: &RunContext,
        agent: &Agent,
        call: &ToolCallItem,
        output: &ToolOutputItem,
    ) -> Result<()> {
        for hook in &self.run_hooks {
            hook.on_tool_end(ctx, agent, call, output).await?;
        }
        if let Some(hooks) = agent.hooks() {
            hooks.on_tool_end(ctx, agent, call, output).await?;
        }
        Ok(())
    }

    /// Target agent hooks fire for the receiving agent.
    pub(crate) async fn handoff(&self, ctx: &RunContext, from: &Agent, to: &Agent) -> Result<()> {
        for hook in &self.run_hooks {
            hook.on_handoff(ctx, from, to).await?;
        }
        if let Some(hooks) = to.hooks() {
            hooks.on_handoff(ctx, to, from).await?;
        }
        Ok(())
    }
}
