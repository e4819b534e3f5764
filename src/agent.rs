//! # Agent (orientation)
//!
//! An `Agent` is an immutable capability descriptor: a name, an instruction
//! source, a model reference, an ordered tool set, ordered handoff targets,
//! input/output guardrails, an optional output schema and a tool-use
//! behavior. The builder methods consume and return the agent, and
//! [`Agent::clone_with`] derives a new descriptor with overridden fields;
//! clones share only immutable, reference-counted parts.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde_json::Value;

use crate::config::RunConfig;
use crate::context::{RunContext, ToolContext};
use crate::error::{AgentsError, Result};
use crate::guardrail::{InputGuardrail, OutputGuardrail};
use crate::handoff::Handoff;
use crate::hooks::AgentHooks;
use crate::model::{ModelProvider, ModelSettings, ToolSpec};
use crate::runner::Runner;
use crate::schema::{self, Strictness};
use crate::tool::{Tool, ToolError, ToolUseBehavior};

type DynamicInstructions = dyn Fn(&RunContext, &Agent) -> String + Send + Sync;

/// Where an agent's instructions come from.
#[derive(Clone)]
pub enum Instructions {
    Static(String),
    /// Computed from the run context at every turn.
    Dynamic(Arc<DynamicInstructions>),
}

impl fmt::Debug for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instructions::Static(text) => f.debug_tuple("Static").field(text).finish(),
            Instructions::Dynamic(_) => write!(f, "Dynamic"),
        }
    }
}

impl From<&str> for Instructions {
    fn from(text: &str) -> Self {
        Instructions::Static(text.to_string())
    }
}

impl From<String> for Instructions {
    fn from(text: String) -> Self {
        Instructions::Static(text)
    }
}

/// How an agent reaches its model.
#[derive(Clone)]
pub enum ModelRef {
    /// A model name passed to the run's provider.
    Name(String),
    /// A provider owned by the agent.
    Provider(Arc<dyn ModelProvider>),
}

impl fmt::Debug for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelRef::Name(name) => f.debug_tuple("Name").field(name).finish(),
            ModelRef::Provider(provider) => f
                .debug_tuple("Provider")
                .field(&provider.model_name())
                .finish(),
        }
    }
}

/// JSON schema the final output must satisfy.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub schema: Value,
    /// Reject fields the schema does not declare.
    pub strict: bool,
}

impl OutputSchema {
    pub fn new(schema: Value) -> Self {
        Self {
            schema,
            strict: true,
        }
    }

    pub fn of<T: JsonSchema>() -> Self {
        Self::new(schema::schema_for::<T>())
    }

    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }

    /// Parses `text` as JSON and checks it against the schema.
    pub fn parse(&self, text: &str) -> std::result::Result<Value, String> {
        let value: Value =
            serde_json::from_str(text.trim()).map_err(|e| format!("output is not JSON: {}", e))?;
        let strictness = if self.strict {
            Strictness::Strict
        } else {
            Strictness::Lenient
        };
        schema::validate(&self.schema, &value, strictness)?;
        Ok(value)
    }
}

/// Defines the complete configuration for an [`Agent`].
#[derive(Clone)]
pub struct AgentConfig {
    pub name: String,
    pub instructions: Instructions,
    /// Shown to other agents that can hand off to this one.
    pub handoff_description: Option<String>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub handoffs: Vec<Handoff>,
    pub input_guardrails: Vec<Arc<dyn InputGuardrail>>,
    pub output_guardrails: Vec<Arc<dyn OutputGuardrail>>,
    /// `None` defers to the run's provider.
    pub model: Option<ModelRef>,
    pub model_settings: ModelSettings,
    pub output_schema: Option<OutputSchema>,
    pub tool_use_behavior: ToolUseBehavior,
    pub hooks: Option<Arc<dyn AgentHooks>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Assistant".to_string(),
            instructions: Instructions::Static("You are a helpful assistant.".to_string()),
            handoff_description: None,
            tools: vec![],
            handoffs: vec![],
            input_guardrails: vec![],
            output_guardrails: vec![],
            model: None,
            model_settings: ModelSettings::default(),
            output_schema: None,
            tool_use_behavior: ToolUseBehavior::default(),
            hooks: None,
        }
    }
}

/// An LLM-backed participant in a run.
///
/// ```rust
/// use agents_runtime::tool::FunctionTool;
/// use agents_runtime::Agent;
/// use std::sync::Arc;
///
/// let weather = Arc::new(FunctionTool::simple(
///     "get_weather",
///     "Gets the current weather for a city.",
///     |city| format!("The weather in {} is sunny.", city),
/// ));
///
/// let agent = Agent::simple("WeatherBot", "You provide weather updates.")
///     .with_model("gpt-4o-mini")
///     .with_tool(weather)
///     .with_temperature(0.5);
///
/// assert_eq!(agent.tools().len(), 1);
/// assert_eq!(agent.model_settings().temperature, Some(0.5));
/// assert!(agent.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct Agent {
    pub config: AgentConfig,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// An agent with just a name and static instructions.
    pub fn simple(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self::new(AgentConfig {
            name: name.into(),
            instructions: Instructions::Static(instructions.into()),
            ..Default::default()
        })
    }

    /// A new descriptor with fields overridden by `update`.
    pub fn clone_with(&self, update: impl FnOnce(&mut AgentConfig)) -> Self {
        let mut config = self.config.clone();
        update(&mut config);
        Self::new(config)
    }

    pub fn with_instructions(mut self, instructions: impl Into<Instructions>) -> Self {
        self.config.instructions = instructions.into();
        self
    }

    pub fn with_dynamic_instructions<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunContext, &Agent) -> String + Send + Sync + 'static,
    {
        self.config.instructions = Instructions::Dynamic(Arc::new(f));
        self
    }

    pub fn with_handoff_description(mut self, description: impl Into<String>) -> Self {
        self.config.handoff_description = Some(description.into());
        self
    }

    /// Refers to the model by name; the run's provider serves it.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(ModelRef::Name(model.into()));
        self
    }

    /// Gives the agent its own provider.
    pub fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.config.model = Some(ModelRef::Provider(provider));
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.config.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.config.tools.extend(tools);
        self
    }

    pub fn with_handoff(mut self, handoff: Handoff) -> Self {
        self.config.handoffs.push(handoff);
        self
    }

    pub fn with_handoffs(mut self, handoffs: Vec<Handoff>) -> Self {
        self.config.handoffs.extend(handoffs);
        self
    }

    /// Shorthand for `with_handoff(Handoff::new(agent))`.
    pub fn with_handoff_to(self, agent: Agent) -> Self {
        self.with_handoff(Handoff::new(agent))
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.config.model_settings.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.config.model_settings.max_tokens = Some(max_tokens);
        self
    }

    /// Executes one turn's tool calls concurrently.
    pub fn with_parallel_tool_calls(mut self, enabled: bool) -> Self {
        self.config.model_settings.parallel_tool_calls = enabled;
        self
    }

    pub fn with_model_settings(mut self, settings: ModelSettings) -> Self {
        self.config.model_settings = settings;
        self
    }

    pub fn with_input_guardrail(mut self, guardrail: Arc<dyn InputGuardrail>) -> Self {
        self.config.input_guardrails.push(guardrail);
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: Arc<dyn OutputGuardrail>) -> Self {
        self.config.output_guardrails.push(guardrail);
        self
    }

    pub fn with_output_schema(mut self, schema: OutputSchema) -> Self {
        self.config.output_schema = Some(schema);
        self
    }

    /// Structured output described by `T`'s JSON schema.
    pub fn with_output_type<T: JsonSchema>(self) -> Self {
        self.with_output_schema(OutputSchema::of::<T>())
    }

    pub fn with_tool_use_behavior(mut self, behavior: ToolUseBehavior) -> Self {
        self.config.tool_use_behavior = behavior;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn AgentHooks>) -> Self {
        self.config.hooks = Some(hooks);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The instructions for this turn.
    pub fn instructions_for(&self, ctx: &RunContext) -> String {
        match &self.config.instructions {
            Instructions::Static(text) => text.clone(),
            Instructions::Dynamic(f) => f(ctx, self),
        }
    }

    pub fn handoff_description(&self) -> Option<&str> {
        self.config.handoff_description.as_deref()
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.config.tools
    }

    pub fn handoffs(&self) -> &[Handoff] {
        &self.config.handoffs
    }

    pub fn input_guardrails(&self) -> &[Arc<dyn InputGuardrail>] {
        &self.config.input_guardrails
    }

    pub fn output_guardrails(&self) -> &[Arc<dyn OutputGuardrail>] {
        &self.config.output_guardrails
    }

    pub fn model(&self) -> Option<&ModelRef> {
        self.config.model.as_ref()
    }

    pub fn model_settings(&self) -> &ModelSettings {
        &self.config.model_settings
    }

    pub fn output_schema(&self) -> Option<&OutputSchema> {
        self.config.output_schema.as_ref()
    }

    pub fn tool_use_behavior(&self) -> &ToolUseBehavior {
        &self.config.tool_use_behavior
    }

    pub fn hooks(&self) -> Option<&Arc<dyn AgentHooks>> {
        self.config.hooks.as_ref()
    }

    pub fn find_tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.config.tools.iter().find(|t| t.name() == name)
    }

    pub fn find_handoff(&self, tool_name: &str) -> Option<&Handoff> {
        self.config
            .handoffs
            .iter()
            .find(|h| h.tool_name() == tool_name)
    }

    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.config.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn handoff_specs(&self) -> Vec<ToolSpec> {
        self.config.handoffs.iter().map(|h| h.spec()).collect()
    }

    /// Checks that tool and handoff names are unique and the agent is named.
    pub fn validate(&self) -> Result<()> {
        if self.config.name.trim().is_empty() {
            return Err(AgentsError::configuration("agent name must not be empty"));
        }
        let mut seen = std::collections::HashSet::new();
        let names = self
            .config
            .tools
            .iter()
            .map(|t| t.name())
            .chain(self.config.handoffs.iter().map(|h| h.tool_name()));
        for name in names {
            if !seen.insert(name) {
                return Err(AgentsError::configuration(format!(
                    "agent '{}' declares '{}' more than once",
                    self.config.name, name
                )));
            }
        }
        Ok(())
    }

    /// Wraps this agent as a tool. Invoking it starts a nested run that
    /// shares the caller's context and returns the nested final output.
    pub fn as_tool(&self, name: impl Into<String>, description: impl Into<String>) -> AgentTool {
        AgentTool {
            name: name.into(),
            description: description.into(),
            agent: self.clone(),
            max_turns: crate::config::DEFAULT_MAX_TURNS,
        }
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.config.name)
            .field("model", &self.config.model)
            .field(
                "tools",
                &self.config.tools.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field(
                "handoffs",
                &self
                    .config
                    .handoffs
                    .iter()
                    .map(|h| h.tool_name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// An agent exposed through the [`Tool`] interface.
#[derive(Clone, Debug)]
pub struct AgentTool {
    name: String,
    description: String,
    agent: Agent,
    max_turns: usize,
}

impl AgentTool {
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "input": {"type": "string", "description": "Request for the agent"}
            },
            "required": ["input"]
        })
    }

    async fn invoke(&self, ctx: ToolContext, arguments: Value) -> std::result::Result<Value, ToolError> {
        let input = arguments
            .get("input")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut config = RunConfig::default().with_max_turns(self.max_turns);
        if let Some(provider) = ctx.model_provider.clone() {
            config = config.with_model_provider(provider);
        }
        let result = Runner::run_with_context(self.agent.clone(), input, ctx.run.clone(), config)
            .await
            .map_err(|e| ToolError::failed(e.to_string()))?;
        Ok(Value::String(result.final_output_text()))
    }
}
