//! # Guardrails (orientation)
//!
//! Input and output guardrails are lightweight checks on agent I/O. Input
//! guardrails run once, before the first model call, against the raw input.
//! Output guardrails run against every candidate final output. Each check is
//! `(context, agent, subject) -> GuardrailOutput`; the pipeline attaches the
//! guardrail's name to produce a [`GuardrailResult`].
//!
//! Within a phase, guardrails are ordered by descending priority (declaration
//! order breaks ties) and evaluated concurrently. The first tripped result in
//! that order aborts the run, whatever order the checks completed in.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::Agent;
use crate::config::RunConfig;
use crate::context::RunContext;
use crate::error::{AgentsError, Result};
use crate::model::ModelProvider;
use crate::result::RunResult;
use crate::runner::Runner;

/// Which side of the run a guardrail protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailPhase {
    Input,
    Output,
}

impl fmt::Display for GuardrailPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardrailPhase::Input => write!(f, "input"),
            GuardrailPhase::Output => write!(f, "output"),
        }
    }
}

/// What a single check returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailOutput {
    pub tripwire_triggered: bool,
    /// Arbitrary metadata for the caller (reasons, scores, nested output).
    pub output_info: Value,
}

impl GuardrailOutput {
    pub fn pass() -> Self {
        Self {
            tripwire_triggered: false,
            output_info: Value::Null,
        }
    }

    pub fn trip(output_info: Value) -> Self {
        Self {
            tripwire_triggered: true,
            output_info,
        }
    }

    pub fn with_info(mut self, output_info: Value) -> Self {
        self.output_info = output_info;
        self
    }
}

/// Verdict of a named guardrail, retained on the run result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub guardrail_name: String,
    pub tripwire_triggered: bool,
    pub output_info: Value,
}

impl GuardrailResult {
    pub fn new(guardrail_name: impl Into<String>, output: GuardrailOutput) -> Self {
        Self {
            guardrail_name: guardrail_name.into(),
            tripwire_triggered: output.tripwire_triggered,
            output_info: output.output_info,
        }
    }

    pub fn passed(guardrail_name: impl Into<String>) -> Self {
        Self::new(guardrail_name, GuardrailOutput::pass())
    }

    pub fn tripped(guardrail_name: impl Into<String>, output_info: Value) -> Self {
        Self::new(guardrail_name, GuardrailOutput::trip(output_info))
    }
}

/// Trait for input guardrails that validate user input before processing.
#[async_trait]
pub trait InputGuardrail: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> i32 {
        0
    }
    async fn check(&self, ctx: &RunContext, agent: &Agent, input: &str) -> Result<GuardrailOutput>;
}

/// Trait for output guardrails that validate a candidate final output.
#[async_trait]
pub trait OutputGuardrail: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> i32 {
        0
    }
    async fn check(&self, ctx: &RunContext, agent: &Agent, output: &str)
        -> Result<GuardrailOutput>;
}

/// Evaluates one phase of guardrails.
pub struct GuardrailRunner;

impl GuardrailRunner {
    /// All verdicts in evaluation order, or the first tripped one as an error.
    pub async fn check_input(
        guards: &[Arc<dyn InputGuardrail>],
        ctx: &RunContext,
        agent: &Agent,
        input: &str,
    ) -> Result<Vec<GuardrailResult>> {
        let mut ordered = guards.to_vec();
        ordered.sort_by_key(|g| std::cmp::Reverse(g.priority()));
        let outputs = join_all(ordered.iter().map(|g| g.check(ctx, agent, input))).await;
        let names = ordered.iter().map(|g| g.name().to_string());
        Self::settle(GuardrailPhase::Input, names, outputs)
    }

    pub async fn check_output(
        guards: &[Arc<dyn OutputGuardrail>],
        ctx: &RunContext,
        agent: &Agent,
        output: &str,
    ) -> Result<Vec<GuardrailResult>> {
        let mut ordered = guards.to_vec();
        ordered.sort_by_key(|g| std::cmp::Reverse(g.priority()));
        let outputs = join_all(ordered.iter().map(|g| g.check(ctx, agent, output))).await;
        let names = ordered.iter().map(|g| g.name().to_string());
        Self::settle(GuardrailPhase::Output, names, outputs)
    }

    fn settle(
        phase: GuardrailPhase,
        names: impl Iterator<Item = String>,
        outputs: Vec<Result<GuardrailOutput>>,
    ) -> Result<Vec<GuardrailResult>> {
        let mut results = Vec::with_capacity(outputs.len());
        for (name, output) in names.zip(outputs) {
            results.push(GuardrailResult::new(name, output?));
        }
        if let Some(tripped) = results.iter().find(|r| r.tripwire_triggered) {
            warn!(%phase, guardrail = %tripped.guardrail_name, "guardrail tripped");
            return Err(AgentsError::GuardrailTripped {
                phase,
                result: Box::new(tripped.clone()),
            });
        }
        debug!(%phase, count = results.len(), "guardrails passed");
        Ok(results)
    }
}

type InputCheckFn = dyn Fn(&RunContext, &Agent, &str) -> GuardrailOutput + Send + Sync;

/// An input guardrail backed by a closure.
#[derive(Clone)]
pub struct FnInputGuardrail {
    name: String,
    priority: i32,
    check: Arc<InputCheckFn>,
}

impl FnInputGuardrail {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&RunContext, &Agent, &str) -> GuardrailOutput + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority: 0,
            check: Arc::new(check),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl InputGuardrail for FnInputGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn check(&self, ctx: &RunContext, agent: &Agent, input: &str) -> Result<GuardrailOutput> {
        Ok((self.check)(ctx, agent, input))
    }
}

type OutputCheckFn = dyn Fn(&RunContext, &Agent, &str) -> GuardrailOutput + Send + Sync;

/// An output guardrail backed by a closure.
#[derive(Clone)]
pub struct FnOutputGuardrail {
    name: String,
    priority: i32,
    check: Arc<OutputCheckFn>,
}

impl FnOutputGuardrail {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&RunContext, &Agent, &str) -> GuardrailOutput + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority: 0,
            check: Arc::new(check),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl OutputGuardrail for FnOutputGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn check(
        &self,
        ctx: &RunContext,
        agent: &Agent,
        output: &str,
    ) -> Result<GuardrailOutput> {
        Ok((self.check)(ctx, agent, output))
    }
}

/// Trips when the subject is longer than `max_length` characters.
#[derive(Debug, Clone)]
pub struct MaxLengthGuardrail {
    name: String,
    max_length: usize,
}

impl MaxLengthGuardrail {
    pub fn new(max_length: usize) -> Self {
        Self {
            name: format!("MaxLength_{}", max_length),
            max_length,
        }
    }

    fn evaluate(&self, subject: &str) -> GuardrailOutput {
        let length = subject.chars().count();
        if length > self.max_length {
            GuardrailOutput::trip(serde_json::json!({
                "reason": format!("exceeds maximum length of {} characters", self.max_length),
                "length": length,
            }))
        } else {
            GuardrailOutput::pass()
        }
    }
}

#[async_trait]
impl InputGuardrail for MaxLengthGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, _ctx: &RunContext, _agent: &Agent, input: &str) -> Result<GuardrailOutput> {
        Ok(self.evaluate(input))
    }
}

#[async_trait]
impl OutputGuardrail for MaxLengthGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        _ctx: &RunContext,
        _agent: &Agent,
        output: &str,
    ) -> Result<GuardrailOutput> {
        Ok(self.evaluate(output))
    }
}

/// Blocks content containing any of a list of patterns, case-insensitively.
///
/// ```rust
/// use agents_runtime::guardrail::{GuardrailOutput, PatternBlockGuardrail};
///
/// let filter = PatternBlockGuardrail::new("ProfanityFilter", vec!["darn".to_string()]);
/// assert!(!filter.evaluate("What a wonderful day!").tripwire_triggered);
/// assert!(filter.evaluate("Oh, DARN it!").tripwire_triggered);
/// ```
#[derive(Debug, Clone)]
pub struct PatternBlockGuardrail {
    name: String,
    patterns: Vec<String>,
}

impl PatternBlockGuardrail {
    pub fn new(name: impl Into<String>, patterns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            patterns,
        }
    }

    pub fn evaluate(&self, subject: &str) -> GuardrailOutput {
        let lower = subject.to_lowercase();
        match self
            .patterns
            .iter()
            .find(|p| lower.contains(&p.to_lowercase()))
        {
            Some(pattern) => GuardrailOutput::trip(serde_json::json!({
                "reason": "blocked pattern",
                "pattern": pattern,
            })),
            None => GuardrailOutput::pass(),
        }
    }
}

#[async_trait]
impl InputGuardrail for PatternBlockGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, _ctx: &RunContext, _agent: &Agent, input: &str) -> Result<GuardrailOutput> {
        Ok(self.evaluate(input))
    }
}

#[async_trait]
impl OutputGuardrail for PatternBlockGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        _ctx: &RunContext,
        _agent: &Agent,
        output: &str,
    ) -> Result<GuardrailOutput> {
        Ok(self.evaluate(output))
    }
}

type VerdictFn = dyn Fn(&RunResult) -> GuardrailOutput + Send + Sync;

/// A guardrail that asks another agent.
///
/// The checking agent runs as a nested run sharing the caller's context; its
/// result is turned into a verdict by `verdict`. A common pattern gives the
/// checker an output schema and reads a boolean field from
/// [`RunResult::final_output`].
#[derive(Clone)]
pub struct AgentGuardrail {
    name: String,
    agent: Agent,
    verdict: Arc<VerdictFn>,
    model_provider: Option<Arc<dyn ModelProvider>>,
    max_turns: usize,
}

impl AgentGuardrail {
    pub fn new<F>(name: impl Into<String>, agent: Agent, verdict: F) -> Self
    where
        F: Fn(&RunResult) -> GuardrailOutput + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            agent,
            verdict: Arc::new(verdict),
            model_provider: None,
            max_turns: 3,
        }
    }

    /// Provider for a checking agent whose model is referenced by name.
    pub fn with_model_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.model_provider = Some(provider);
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    async fn evaluate(&self, ctx: &RunContext, subject: &str) -> Result<GuardrailOutput> {
        let mut config = RunConfig::default().with_max_turns(self.max_turns);
        if let Some(provider) = &self.model_provider {
            config = config.with_model_provider(provider.clone());
        }
        let result =
            Runner::run_with_context(self.agent.clone(), subject, ctx.clone(), config).await?;
        Ok((self.verdict)(&result))
    }
}

#[async_trait]
impl InputGuardrail for AgentGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &RunContext, _agent: &Agent, input: &str) -> Result<GuardrailOutput> {
        self.evaluate(ctx, input).await
    }
}

#[async_trait]
impl OutputGuardrail for AgentGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        ctx: &RunContext,
        _agent: &Agent,
        output: &str,
    ) -> Result<GuardrailOutput> {
        self.evaluate(ctx, output).await
    }
}
