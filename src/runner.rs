//! # Runner (orientation)
//!
//! The `Runner` drives a run as a sequence of turns. Each turn asks the
//! current agent's model for a response and reacts to it: a handoff switches
//! the current agent, tool calls are executed through the tool service stack
//! (`tool_service.rs`) and the tool-use behavior decides whether to call the
//! model again, and a plain message is the candidate final output.
//!
//! Two histories are kept. `items` is the append-only record returned in
//! [`RunResult::items`]. `transcript` is what the model sees next; it starts
//! as the run input and is rewritten by handoff input filters.

use std::sync::Arc;

use futures::future::join_all;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::agent::{Agent, ModelRef};
use crate::config::RunConfig;
use crate::context::{RunContext, ToolContext};
use crate::error::{AgentsError, Result};
use crate::guardrail::{
    GuardrailPhase, GuardrailResult, GuardrailRunner, InputGuardrail, OutputGuardrail,
};
use crate::handoff::{HandoffInputData, HandoffRequest};
use crate::hooks::HookDispatcher;
use crate::items::{
    HandoffCallItem, MessageItem, Role, RunInput, RunItem, ToolCallItem, ToolOutputItem,
};
use crate::model::{ModelProvider, ModelRequest, ModelResponse, ModelStreamEvent, ToolCallDirective};
use crate::result::RunResult;
use crate::stream::{self, EventSink, StreamEvent, StreamedRun};
use crate::tool::{FunctionToolResult, Tool, ToolDecision};
use crate::tool_service::execute_tool;
use crate::tracing::{SpanId, SpanType, TracingContext};

const IGNORED_HANDOFF_MESSAGE: &str = "Multiple handoffs detected, ignoring this one.";

fn truncate_for_log(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let mut out: String = s.chars().take(max).collect();
        out.push('…');
        out
    } else {
        s.to_string()
    }
}

fn format_transcript_for_log(items: &[RunItem]) -> String {
    let mut lines = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let line = match item {
            RunItem::Message(m) => {
                let role = match m.role {
                    Role::User => "USER    ",
                    Role::System => "SYSTEM  ",
                    Role::Assistant => "ASSIST  ",
                };
                format!("{:02} {} | {}", idx, role, truncate_for_log(&m.content, 160))
            }
            RunItem::ToolCall(c) => format!(
                "{:02} CALL     | id={} name={} args={}",
                idx,
                c.call_id,
                c.tool_name,
                truncate_for_log(&c.arguments.to_string(), 120)
            ),
            RunItem::ToolOutput(o) => format!(
                "{:02} TOOL     | id={} payload={}",
                idx,
                o.call_id,
                truncate_for_log(&o.text(), 120)
            ),
            RunItem::HandoffCall(h) => {
                format!("{:02} HANDOFF? | {} via {}", idx, h.from_agent, h.tool_name)
            }
            RunItem::HandoffOutput(h) => {
                format!("{:02} HANDOFF  | {} -> {}", idx, h.from_agent, h.to_agent)
            }
        };
        lines.push(line);
    }
    lines.join("\n")
}

/// What the model asked for in one response, after name resolution.
enum Directive<'a> {
    Tool {
        tool: &'a Arc<dyn Tool>,
        call_id: String,
        arguments: Value,
    },
    Handoff {
        index: usize,
        call_id: String,
        tool_name: String,
        arguments: Value,
    },
}

fn parse_arguments(directive: &ToolCallDirective) -> Result<Value> {
    if directive.arguments.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(&directive.arguments).map_err(|e| {
        AgentsError::model_behavior(format!(
            "could not parse arguments of '{}': {}",
            directive.name, e
        ))
    })
}

/// Resolves every directive by name against the agent's tools, then its handoffs.
fn classify<'a>(agent: &'a Agent, calls: &[ToolCallDirective]) -> Result<Vec<Directive<'a>>> {
    let mut directives = Vec::with_capacity(calls.len());
    for call in calls {
        let arguments = parse_arguments(call)?;
        if let Some(tool) = agent.find_tool(&call.name) {
            directives.push(Directive::Tool {
                tool,
                call_id: call.call_id.clone(),
                arguments,
            });
        } else if let Some(index) = agent
            .handoffs()
            .iter()
            .position(|h| h.tool_name() == call.name)
        {
            directives.push(Directive::Handoff {
                index,
                call_id: call.call_id.clone(),
                tool_name: call.name.clone(),
                arguments,
            });
        } else if call.name.starts_with("transfer_to_") {
            return Err(AgentsError::configuration(format!(
                "agent '{}' has no handoff named '{}'",
                agent.name(),
                call.name
            )));
        } else {
            return Err(AgentsError::model_behavior(format!(
                "model called unknown tool '{}' on agent '{}'",
                call.name,
                agent.name()
            )));
        }
    }
    Ok(directives)
}

/// Mutable state of one run.
struct RunState {
    agent: Arc<Agent>,
    input: Vec<RunItem>,
    items: Vec<RunItem>,
    transcript: Vec<RunItem>,
    turns: usize,
    /// Whether start hooks have fired for the current agent.
    agent_started: bool,
    agent_span: Option<SpanId>,
    input_guardrail_results: Vec<GuardrailResult>,
    output_guardrail_results: Vec<GuardrailResult>,
}

impl RunState {
    fn new(agent: Arc<Agent>, input: Vec<RunItem>) -> Self {
        Self {
            agent,
            transcript: input.clone(),
            input,
            items: Vec::new(),
            turns: 0,
            agent_started: false,
            agent_span: None,
            input_guardrail_results: Vec::new(),
            output_guardrail_results: Vec::new(),
        }
    }

    /// Appends to both histories and announces the item.
    async fn push(&mut self, item: RunItem, sink: &EventSink) {
        self.items.push(item.clone());
        self.transcript.push(item.clone());
        sink.emit(StreamEvent::RunItemCreated(item)).await;
    }
}

/// How a turn ended.
enum TurnOutcome {
    /// Call the model again with the same or a new agent.
    Continue,
    Finished(Value),
}

/// The main runner for executing agents
pub struct Runner;

impl Runner {
    /// Runs `agent` to completion with an empty context.
    ///
    /// ```rust
    /// use agents_runtime::model::ScriptedProvider;
    /// use agents_runtime::{Agent, RunConfig, Runner};
    /// use std::sync::Arc;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> agents_runtime::Result<()> {
    /// let provider = Arc::new(ScriptedProvider::new("stub").with_message("Hello!"));
    /// let agent = Agent::simple("Greeter", "Say hello").with_provider(provider);
    ///
    /// let result = Runner::run(agent, "Hi", RunConfig::default()).await?;
    /// assert_eq!(result.final_output_text(), "Hello!");
    /// assert_eq!(result.turns, 1);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(
        agent: Agent,
        input: impl Into<RunInput>,
        config: RunConfig,
    ) -> Result<RunResult> {
        Self::run_with_context(agent, input, RunContext::empty(), config).await
    }

    /// Runs `agent` with a caller-supplied context shared by every tool,
    /// guardrail, hook and nested run.
    pub async fn run_with_context(
        agent: Agent,
        input: impl Into<RunInput>,
        ctx: RunContext,
        config: RunConfig,
    ) -> Result<RunResult> {
        Self::execute(agent, input.into(), ctx, config, EventSink::disabled()).await
    }

    /// Starts the run on a background task and returns a handle on its events.
    pub async fn run_streamed(
        agent: Agent,
        input: impl Into<RunInput>,
        ctx: RunContext,
        config: RunConfig,
    ) -> Result<StreamedRun> {
        agent.validate()?;
        Self::resolve_model(&agent, &config)?;
        let input = input.into();
        let (sink, events) = EventSink::channel(config.stream_buffer);
        let slot = stream::result_slot();
        let task_slot = slot.clone();
        let task = tokio::spawn(async move {
            // Held until the result is stored so consumers never see the end
            // of the stream before the result.
            let keep_open = sink.clone();
            let result = Self::execute(agent, input, ctx, config, sink).await;
            stream::fill_slot(&task_slot, result);
            drop(keep_open);
        });
        Ok(StreamedRun::new(events, slot, task))
    }

    #[instrument(name = "run", skip_all, fields(agent = %agent.name()))]
    async fn execute(
        agent: Agent,
        input: RunInput,
        ctx: RunContext,
        config: RunConfig,
        sink: EventSink,
    ) -> Result<RunResult> {
        agent.validate()?;
        if config.max_turns == 0 {
            return Err(AgentsError::configuration("max_turns must be at least 1"));
        }
        // A missing model surfaces before any guardrail or hook runs.
        Self::resolve_model(&agent, &config)?;

        let guardrail_text = input.guardrail_text();
        let new_input = input.into_items();
        let mut full_input = match &config.session {
            Some(session) => {
                let history = session.get_items(None).await?;
                debug!(session_id = %session.session_id(), items = history.len(), "loaded session");
                history
            }
            None => Vec::new(),
        };
        full_input.extend(new_input.iter().cloned());

        let state = RunState::new(Arc::new(agent), full_input);
        let looped = Self::run_loop(state, guardrail_text, &ctx, &config, &sink);
        let result = match config.deadline {
            Some(timeout) => match tokio::time::timeout(timeout, looped).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(?timeout, "run deadline exceeded");
                    Err(AgentsError::DeadlineExceeded { timeout })
                }
            },
            None => looped.await,
        }?;

        if let Some(session) = &config.session {
            let mut to_store = new_input;
            to_store.extend(result.items.iter().cloned());
            session.add_items(to_store).await?;
        }
        Ok(result)
    }

    async fn run_loop(
        mut state: RunState,
        guardrail_text: String,
        ctx: &RunContext,
        config: &RunConfig,
        sink: &EventSink,
    ) -> Result<RunResult> {
        let mut trace = TracingContext::new(config.workflow_name.clone(), &config.tracing);
        info!(
            agent = %state.agent.name(),
            trace_id = %trace.trace_id(),
            max_turns = config.max_turns,
            "starting run"
        );

        let outcome = Self::drive(&mut state, &guardrail_text, ctx, config, sink, &mut trace).await;
        match outcome {
            Ok(final_output) => {
                let trace_id = trace.trace_id().to_string();
                if let Err(export_error) = trace.finish(None, config.trace_exporter.as_ref()) {
                    warn!(error = %export_error, "failed to export trace");
                }
                info!(agent = %state.agent.name(), turns = state.turns, "run completed");
                Ok(RunResult {
                    input: state.input,
                    items: state.items,
                    final_output,
                    last_agent: state.agent,
                    input_guardrail_results: state.input_guardrail_results,
                    output_guardrail_results: state.output_guardrail_results,
                    turns: state.turns,
                    usage: ctx.usage(),
                    trace_id,
                })
            }
            Err(error) => {
                warn!(agent = %state.agent.name(), turns = state.turns, error = %error, "run failed");
                let message = error.to_string();
                if let Err(export_error) = trace.finish(Some(&message), config.trace_exporter.as_ref())
                {
                    warn!(error = %export_error, "failed to export trace");
                }
                Err(error)
            }
        }
    }

    async fn drive(
        state: &mut RunState,
        guardrail_text: &str,
        ctx: &RunContext,
        config: &RunConfig,
        sink: &EventSink,
        trace: &mut TracingContext,
    ) -> Result<Value> {
        sink.emit(StreamEvent::AgentUpdated {
            agent: state.agent.name().to_string(),
        })
        .await;

        let guards: Vec<Arc<dyn InputGuardrail>> = state
            .agent
            .input_guardrails()
            .iter()
            .chain(config.input_guardrails.iter())
            .cloned()
            .collect();
        if !guards.is_empty() {
            let checked =
                GuardrailRunner::check_input(&guards, ctx, &state.agent, guardrail_text).await;
            record_guardrail_spans(trace, GuardrailPhase::Input, &checked);
            state.input_guardrail_results = checked?;
        }

        let hooks = HookDispatcher::new(config.hooks.clone());
        loop {
            state.turns += 1;
            if state.turns > config.max_turns {
                warn!(max_turns = config.max_turns, "maximum turns exceeded");
                return Err(AgentsError::MaxTurnsExceeded {
                    max_turns: config.max_turns,
                    items: state.items.clone(),
                });
            }

            let agent = state.agent.clone();
            if !state.agent_started {
                state.agent_started = true;
                state.agent_span = Some(trace.start_span(SpanType::Agent {
                    agent_name: agent.name().to_string(),
                    tools: agent.tools().iter().map(|t| t.name().to_string()).collect(),
                    handoffs: agent
                        .handoffs()
                        .iter()
                        .map(|h| h.agent_name().to_string())
                        .collect(),
                }));
                hooks.agent_start(ctx, &agent).await?;
            }

            debug!(
                agent = %agent.name(),
                turn = state.turns,
                "transcript:\n{}",
                format_transcript_for_log(&state.transcript)
            );
            let response = Self::call_model(&agent, state, ctx, config, sink, trace).await?;
            match Self::react(&agent, response, state, ctx, config, sink, trace, &hooks).await? {
                TurnOutcome::Continue => continue,
                TurnOutcome::Finished(output) => {
                    if let Some(span) = state.agent_span.take() {
                        trace.end_span(&span);
                    }
                    return Ok(output);
                }
            }
        }
    }

    fn resolve_model(
        agent: &Agent,
        config: &RunConfig,
    ) -> Result<(Arc<dyn ModelProvider>, Option<String>)> {
        match agent.model() {
            Some(ModelRef::Provider(provider)) => Ok((provider.clone(), None)),
            Some(ModelRef::Name(name)) => match &config.model_provider {
                Some(provider) => Ok((provider.clone(), Some(name.clone()))),
                None => Err(AgentsError::configuration(format!(
                    "agent '{}' names model '{}' but the run has no model provider",
                    agent.name(),
                    name
                ))),
            },
            None => config.model_provider.clone().map(|p| (p, None)).ok_or_else(|| {
                AgentsError::configuration(format!(
                    "agent '{}' has no model and the run has no model provider",
                    agent.name()
                ))
            }),
        }
    }

    async fn call_model(
        agent: &Agent,
        state: &RunState,
        ctx: &RunContext,
        config: &RunConfig,
        sink: &EventSink,
        trace: &mut TracingContext,
    ) -> Result<ModelResponse> {
        let (provider, model) = Self::resolve_model(agent, config)?;
        let model_label = model
            .clone()
            .unwrap_or_else(|| provider.model_name().to_string());
        let request = ModelRequest {
            model,
            agent_name: agent.name().to_string(),
            instructions: agent.instructions_for(ctx),
            transcript: state.transcript.clone(),
            tools: agent.tool_specs(),
            handoffs: agent.handoff_specs(),
            output_schema: agent.output_schema().map(|s| s.schema.clone()),
            settings: agent.model_settings().clone(),
        };

        let span = trace.start_span(SpanType::Generation {
            model: model_label.clone(),
            prompt_tokens: 0,
            completion_tokens: 0,
            output: Value::Null,
        });
        let response = if sink.is_enabled() {
            Self::stream_model(provider.as_ref(), request, agent.name(), sink).await
        } else {
            provider.complete(request).await
        };
        let response = match response {
            Ok(response) => response,
            Err(error) => {
                trace.record_error(&span, error.to_string());
                return Err(error);
            }
        };

        ctx.record_usage(&model_label, agent.name(), response.usage.clone());
        let output = serde_json::to_value(&response)?;
        trace.finish_generation(&span, &response.usage, output);
        debug!(
            agent = %agent.name(),
            model = %model_label,
            tool_calls = response.tool_calls.len(),
            has_text = response.non_empty_text().is_some(),
            "model responded"
        );
        Ok(response)
    }

    async fn stream_model(
        provider: &dyn ModelProvider,
        request: ModelRequest,
        agent_name: &str,
        sink: &EventSink,
    ) -> Result<ModelResponse> {
        let mut events = provider.stream(request).await?;
        let mut completed = None;
        while let Some(event) = events.next().await {
            match event? {
                ModelStreamEvent::TextDelta(delta) => {
                    sink.emit(StreamEvent::RawTextDelta {
                        agent: agent_name.to_string(),
                        delta,
                    })
                    .await;
                }
                ModelStreamEvent::Completed(response) => completed = Some(response),
            }
        }
        completed.ok_or_else(|| {
            AgentsError::model_behavior("model stream ended without a completed response")
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn react(
        agent: &Arc<Agent>,
        response: ModelResponse,
        state: &mut RunState,
        ctx: &RunContext,
        config: &RunConfig,
        sink: &EventSink,
        trace: &mut TracingContext,
        hooks: &HookDispatcher,
    ) -> Result<TurnOutcome> {
        let turn_start = state.transcript.len();
        if let Some(text) = response.non_empty_text() {
            state
                .push(
                    RunItem::Message(MessageItem::assistant(agent.name(), text)),
                    sink,
                )
                .await;
        }

        if !response.has_tool_calls() {
            let text = response.text.unwrap_or_default();
            let output = Self::finalize(agent, &text, state, ctx, config, trace).await?;
            hooks.agent_end(ctx, agent, &output).await?;
            return Ok(TurnOutcome::Finished(output));
        }

        let directives = classify(agent, &response.tool_calls)?;
        let (handoffs, tools): (Vec<_>, Vec<_>) = directives
            .into_iter()
            .partition(|d| matches!(d, Directive::Handoff { .. }));

        if !handoffs.is_empty() {
            if !tools.is_empty() {
                debug!(
                    agent = %agent.name(),
                    skipped = tools.len(),
                    "handoff requested, skipping tool calls of this turn"
                );
            }
            Self::handoff(agent, handoffs, turn_start, state, ctx, sink, trace, hooks).await?;
            return Ok(TurnOutcome::Continue);
        }

        let results = Self::run_tools(agent, tools, state, ctx, config, sink, trace, hooks).await?;
        match agent.tool_use_behavior().decide(ctx, &results) {
            ToolDecision::Continue => Ok(TurnOutcome::Continue),
            ToolDecision::Stop(output) => {
                debug!(agent = %agent.name(), "tool use behavior stopped the run");
                let text = crate::items::value_to_text(&output);
                Self::check_output(agent, &text, state, ctx, config, trace).await?;
                hooks.agent_end(ctx, agent, &output).await?;
                Ok(TurnOutcome::Finished(output))
            }
        }
    }

    /// Runs output guardrails on a candidate final message and parses
    /// structured output when the agent declares a schema.
    async fn finalize(
        agent: &Agent,
        text: &str,
        state: &mut RunState,
        ctx: &RunContext,
        config: &RunConfig,
        trace: &mut TracingContext,
    ) -> Result<Value> {
        Self::check_output(agent, text, state, ctx, config, trace).await?;
        match agent.output_schema() {
            Some(schema) => schema.parse(text).map_err(|e| {
                AgentsError::model_behavior(format!(
                    "final output of '{}' does not match its schema: {}",
                    agent.name(),
                    e
                ))
            }),
            None => Ok(Value::String(text.to_string())),
        }
    }

    async fn check_output(
        agent: &Agent,
        text: &str,
        state: &mut RunState,
        ctx: &RunContext,
        config: &RunConfig,
        trace: &mut TracingContext,
    ) -> Result<()> {
        let guards: Vec<Arc<dyn OutputGuardrail>> = agent
            .output_guardrails()
            .iter()
            .chain(config.output_guardrails.iter())
            .cloned()
            .collect();
        if guards.is_empty() {
            return Ok(());
        }
        let checked = GuardrailRunner::check_output(&guards, ctx, agent, text).await;
        record_guardrail_spans(trace, GuardrailPhase::Output, &checked);
        state.output_guardrail_results.extend(checked?);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn handoff(
        agent: &Arc<Agent>,
        handoffs: Vec<Directive<'_>>,
        turn_start: usize,
        state: &mut RunState,
        ctx: &RunContext,
        sink: &EventSink,
        trace: &mut TracingContext,
        hooks: &HookDispatcher,
    ) -> Result<()> {
        let mut requested = handoffs.into_iter().filter_map(|d| match d {
            Directive::Handoff {
                index,
                call_id,
                tool_name,
                arguments,
            } => Some((index, call_id, tool_name, arguments)),
            Directive::Tool { .. } => None,
        });
        let Some((index, call_id, tool_name, arguments)) = requested.next() else {
            return Ok(());
        };
        let ignored: Vec<_> = requested.collect();

        // Every handoff call is recorded so each output below has its call.
        let calls = std::iter::once((&call_id, &tool_name, &arguments))
            .chain(ignored.iter().map(|(_, id, name, args)| (id, name, args)));
        for (id, name, args) in calls {
            state
                .push(
                    RunItem::HandoffCall(HandoffCallItem {
                        call_id: id.clone(),
                        tool_name: name.clone(),
                        arguments: args.clone(),
                        from_agent: agent.name().to_string(),
                    }),
                    sink,
                )
                .await;
        }

        let handoff = &agent.handoffs()[index];
        let target = handoff.agent();
        target.validate()?;
        info!(from = %agent.name(), to = %target.name(), "handoff");

        let history = state.transcript[..turn_start].to_vec();
        let new_items = state.transcript[turn_start..].to_vec();
        let request = HandoffRequest::new(handoff, agent.name(), call_id, arguments);
        let filtered = request.apply_filter(HandoffInputData::new(history, new_items));
        let ready = filtered.invoke_callback(ctx).await?;
        hooks.handoff(ctx, agent, ready.target()).await?;
        let activation = ready.activate();

        trace.record_span(SpanType::Handoff {
            from_agent: agent.name().to_string(),
            to_agent: activation.agent.name().to_string(),
        });
        if let Some(span) = state.agent_span.take() {
            trace.end_span(&span);
        }

        state.transcript = activation.transcript;
        state.agent = activation.agent;
        state.agent_started = false;
        state.push(RunItem::HandoffOutput(activation.output), sink).await;

        for (_, call_id, tool_name, _) in ignored {
            warn!(agent = %agent.name(), handoff = %tool_name, "ignoring additional handoff");
            state
                .push(
                    RunItem::ToolOutput(ToolOutputItem {
                        call_id,
                        tool_name,
                        output: Value::String(IGNORED_HANDOFF_MESSAGE.to_string()),
                        agent: agent.name().to_string(),
                        is_error: true,
                    }),
                    sink,
                )
                .await;
        }

        sink.emit(StreamEvent::AgentUpdated {
            agent: state.agent.name().to_string(),
        })
        .await;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_tools(
        agent: &Arc<Agent>,
        tools: Vec<Directive<'_>>,
        state: &mut RunState,
        ctx: &RunContext,
        config: &RunConfig,
        sink: &EventSink,
        trace: &mut TracingContext,
        hooks: &HookDispatcher,
    ) -> Result<Vec<FunctionToolResult>> {
        let calls: Vec<(Arc<dyn Tool>, ToolCallItem)> = tools
            .into_iter()
            .filter_map(|d| match d {
                Directive::Tool {
                    tool,
                    call_id,
                    arguments,
                } => Some((
                    tool.clone(),
                    ToolCallItem {
                        call_id,
                        tool_name: tool.name().to_string(),
                        arguments,
                        agent: agent.name().to_string(),
                    },
                )),
                Directive::Handoff { .. } => None,
            })
            .collect();

        let tool_ctx = |call: &ToolCallItem| {
            ToolContext::new(ctx.clone(), agent.name(), &call.tool_name, &call.call_id)
                .with_model_provider(config.model_provider.clone())
        };

        let parallel = agent.model_settings().parallel_tool_calls && calls.len() > 1;
        let mut results = Vec::with_capacity(calls.len());

        if parallel {
            for (_, call) in &calls {
                hooks.tool_start(ctx, agent, call).await?;
                state.push(RunItem::ToolCall(call.clone()), sink).await;
            }
            let spans: Vec<SpanId> = calls
                .iter()
                .map(|(_, call)| {
                    trace.start_span(SpanType::Tool {
                        tool_name: call.tool_name.clone(),
                        arguments: trace.sensitive(call.arguments.clone()),
                        output: Value::Null,
                    })
                })
                .collect();
            let limit = config.max_tool_concurrency.unwrap_or(calls.len()).max(1);
            let semaphore = Arc::new(Semaphore::new(limit));
            debug!(agent = %agent.name(), calls = calls.len(), limit, "running tools in parallel");
            let outcomes = join_all(calls.iter().map(|(tool, call)| {
                let semaphore = semaphore.clone();
                let tool = tool.clone();
                let tctx = tool_ctx(call);
                let arguments = call.arguments.clone();
                async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| AgentsError::ToolExecution {
                            tool: tool.name().to_string(),
                            message: e.to_string(),
                        })?;
                    execute_tool(tool, tctx, arguments).await
                }
            }))
            .await;
            for (((_, call), outcome), span) in calls.iter().zip(outcomes).zip(spans) {
                let result = match outcome {
                    Ok(result) => result,
                    Err(error) => {
                        trace.record_error(&span, error.to_string());
                        return Err(error);
                    }
                };
                trace.finish_tool(&span, result.output.clone());
                Self::record_tool_output(agent, call, &result, state, ctx, sink, hooks).await?;
                results.push(result);
            }
        } else {
            for (tool, call) in calls {
                hooks.tool_start(ctx, agent, &call).await?;
                state.push(RunItem::ToolCall(call.clone()), sink).await;
                let span = trace.start_span(SpanType::Tool {
                    tool_name: call.tool_name.clone(),
                    arguments: trace.sensitive(call.arguments.clone()),
                    output: Value::Null,
                });
                let result = match execute_tool(tool, tool_ctx(&call), call.arguments.clone()).await
                {
                    Ok(result) => result,
                    Err(error) => {
                        trace.record_error(&span, error.to_string());
                        return Err(error);
                    }
                };
                trace.finish_tool(&span, result.output.clone());
                Self::record_tool_output(agent, &call, &result, state, ctx, sink, hooks).await?;
                results.push(result);
            }
        }
        Ok(results)
    }

    async fn record_tool_output(
        agent: &Agent,
        call: &ToolCallItem,
        result: &FunctionToolResult,
        state: &mut RunState,
        ctx: &RunContext,
        sink: &EventSink,
        hooks: &HookDispatcher,
    ) -> Result<()> {
        let output = ToolOutputItem {
            call_id: result.call_id.clone(),
            tool_name: result.tool_name.clone(),
            output: result.output.clone(),
            agent: agent.name().to_string(),
            is_error: result.is_error,
        };
        state.push(RunItem::ToolOutput(output.clone()), sink).await;
        hooks.tool_end(ctx, agent, call, &output).await
    }
}

fn record_guardrail_spans(
    trace: &mut TracingContext,
    phase: GuardrailPhase,
    checked: &Result<Vec<GuardrailResult>>,
) {
    match checked {
        Ok(results) => {
            for result in results {
                trace.record_span(SpanType::Guardrail {
                    guardrail_name: result.guardrail_name.clone(),
                    phase,
                    triggered: result.tripwire_triggered,
                });
            }
        }
        Err(error) => {
            if let Some((_, result)) = error.tripped_guardrail() {
                trace.record_span(SpanType::Guardrail {
                    guardrail_name: result.guardrail_name.clone(),
                    phase,
                    triggered: true,
                });
            }
        }
    }
}
