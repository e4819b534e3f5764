//! Items representing the causal history of a run
//!
//! Every discrete unit a run produces is a [`RunItem`]: messages, tool calls
//! and their outputs, handoff calls and their outputs. Items carry no random
//! ids or wall-clock timestamps; ids come from the model's call ids, so the
//! same model behaviour always yields the same serialized history.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A text message from the user or an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageItem {
    pub role: Role,
    pub content: String,
    /// The agent that produced the message; `None` for user input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl MessageItem {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            agent: None,
        }
    }

    pub fn assistant(agent: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            agent: Some(agent.into()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            agent: None,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallItem {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub agent: String,
}

/// The result of a tool invocation, or the readable error that replaced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutputItem {
    pub call_id: String,
    pub tool_name: String,
    pub output: Value,
    pub agent: String,
    /// True when `output` is a recovered failure message.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolOutputItem {
    /// The output as the model sees it.
    pub fn text(&self) -> String {
        value_to_text(&self.output)
    }
}

/// A handoff directive emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffCallItem {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub from_agent: String,
}

/// Record of a completed transfer of control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffOutputItem {
    pub call_id: String,
    pub from_agent: String,
    pub to_agent: String,
}

/// One step of a run's causal history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunItem {
    Message(MessageItem),
    ToolCall(ToolCallItem),
    ToolOutput(ToolOutputItem),
    HandoffCall(HandoffCallItem),
    HandoffOutput(HandoffOutputItem),
}

impl RunItem {
    /// Stable, lowercase name of the variant; used for events and storage.
    pub fn kind(&self) -> &'static str {
        match self {
            RunItem::Message(_) => "message",
            RunItem::ToolCall(_) => "tool_call",
            RunItem::ToolOutput(_) => "tool_output",
            RunItem::HandoffCall(_) => "handoff_call",
            RunItem::HandoffOutput(_) => "handoff_output",
        }
    }

    /// True for ordinary tool calls and tool outputs.
    pub fn is_tool_item(&self) -> bool {
        matches!(self, RunItem::ToolCall(_) | RunItem::ToolOutput(_))
    }

    pub fn is_handoff_item(&self) -> bool {
        matches!(self, RunItem::HandoffCall(_) | RunItem::HandoffOutput(_))
    }

    /// The agent that produced the item, if any.
    pub fn agent_name(&self) -> Option<&str> {
        match self {
            RunItem::Message(m) => m.agent.as_deref(),
            RunItem::ToolCall(c) => Some(&c.agent),
            RunItem::ToolOutput(o) => Some(&o.agent),
            RunItem::HandoffCall(h) => Some(&h.from_agent),
            RunItem::HandoffOutput(h) => Some(&h.from_agent),
        }
    }
}

/// Input to a run: plain text or a prior transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum RunInput {
    Text(String),
    Items(Vec<RunItem>),
}

impl RunInput {
    pub fn into_items(self) -> Vec<RunItem> {
        match self {
            RunInput::Text(text) => vec![RunItem::Message(MessageItem::user(text))],
            RunInput::Items(items) => items,
        }
    }

    /// Text seen by input guardrails: the latest user message.
    pub fn guardrail_text(&self) -> String {
        match self {
            RunInput::Text(text) => text.clone(),
            RunInput::Items(items) => items
                .iter()
                .rev()
                .find_map(|item| match item {
                    RunItem::Message(m) if m.role == Role::User => Some(m.content.clone()),
                    _ => None,
                })
                .unwrap_or_default(),
        }
    }
}

impl From<&str> for RunInput {
    fn from(s: &str) -> Self {
        RunInput::Text(s.to_string())
    }
}

impl From<String> for RunInput {
    fn from(s: String) -> Self {
        RunInput::Text(s)
    }
}

impl From<Vec<RunItem>> for RunInput {
    fn from(items: Vec<RunItem>) -> Self {
        RunInput::Items(items)
    }
}

/// Helper functions for working with items
pub struct ItemHelpers;

impl ItemHelpers {
    /// Concatenated text of all assistant messages.
    pub fn text_message_outputs(items: &[RunItem]) -> String {
        items
            .iter()
            .filter_map(|item| match item {
                RunItem::Message(m) if m.role == Role::Assistant => Some(m.content.as_str()),
                _ => None,
            })
            .collect()
    }

    /// The last assistant message, if any.
    pub fn last_assistant_message(items: &[RunItem]) -> Option<&MessageItem> {
        items.iter().rev().find_map(|item| match item {
            RunItem::Message(m) if m.role == Role::Assistant => Some(m),
            _ => None,
        })
    }

    /// Items of one kind, in order.
    pub fn filter_kind<'a>(items: &'a [RunItem], kind: &str) -> Vec<&'a RunItem> {
        items.iter().filter(|item| item.kind() == kind).collect()
    }
}

pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
