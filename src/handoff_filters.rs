//! Ready-made handoff input filters.
//!
//! Each filter is a pure function over [`HandoffInputData`] and can be passed
//! to [`Handoff::with_input_filter`](crate::Handoff::with_input_filter).

use crate::handoff::HandoffInputData;
use crate::items::{MessageItem, RunItem};

/// Drops every ordinary tool call and tool output. Messages and handoff items are kept.
pub fn remove_all_tools(data: HandoffInputData) -> HandoffInputData {
    let keep = |items: Vec<RunItem>| -> Vec<RunItem> {
        items.into_iter().filter(|item| !item.is_tool_item()).collect()
    };
    HandoffInputData {
        history: keep(data.history),
        new_items: keep(data.new_items),
    }
}

/// Keeps only the last `n` messages of the history.
pub fn keep_last_messages(
    n: usize,
) -> impl Fn(HandoffInputData) -> HandoffInputData + Send + Sync + 'static {
    move |data: HandoffInputData| {
        let messages: Vec<RunItem> = data
            .history
            .into_iter()
            .filter(|item| matches!(item, RunItem::Message(_)))
            .collect();
        let skip = messages.len().saturating_sub(n);
        HandoffInputData {
            history: messages.into_iter().skip(skip).collect(),
            new_items: data.new_items,
        }
    }
}

/// Replaces every occurrence of each pattern in message text with `replacement`.
pub fn redact(
    patterns: Vec<String>,
    replacement: impl Into<String>,
) -> impl Fn(HandoffInputData) -> HandoffInputData + Send + Sync + 'static {
    let replacement = replacement.into();
    move |data: HandoffInputData| {
        let scrub = |items: Vec<RunItem>| -> Vec<RunItem> {
            items
                .into_iter()
                .map(|item| match item {
                    RunItem::Message(mut message) => {
                        for pattern in patterns.iter().filter(|p| !p.is_empty()) {
                            message.content = message.content.replace(pattern.as_str(), &replacement);
                        }
                        RunItem::Message(message)
                    }
                    other => other,
                })
                .collect()
        };
        HandoffInputData {
            history: scrub(data.history),
            new_items: scrub(data.new_items),
        }
    }
}

/// Replaces the history with one system message produced by `summarizer`.
pub fn summarize<F>(summarizer: F) -> impl Fn(HandoffInputData) -> HandoffInputData + Send + Sync + 'static
where
    F: Fn(&[RunItem]) -> String + Send + Sync + 'static,
{
    move |data: HandoffInputData| {
        let summary = summarizer(&data.history);
        HandoffInputData {
            history: vec![RunItem::Message(MessageItem::system(format!(
                "Summary of the conversation so far: {}",
                summary
            )))],
            new_items: data.new_items,
        }
    }
}
