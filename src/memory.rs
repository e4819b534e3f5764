//! Conversation sessions
//!
//! A [`Session`] is an append-only conversation log keyed by a session id.
//! The runner loads it before a run, prepends its items to the input, and
//! appends the run's input and new items only when the run succeeds.

use std::collections::VecDeque;
use std::fmt::Debug;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::items::{MessageItem, RunItem};

/// Defines the interface for session storage implementations.
#[async_trait]
pub trait Session: Send + Sync + Debug {
    fn session_id(&self) -> &str;

    /// Stored items in order; with a limit, only the most recent `limit`.
    async fn get_items(&self, limit: Option<usize>) -> Result<Vec<RunItem>>;

    async fn add_items(&self, items: Vec<RunItem>) -> Result<()>;

    /// Removes and returns the most recent item.
    async fn pop_item(&self) -> Result<Option<RunItem>>;

    async fn clear_session(&self) -> Result<()>;

    /// Only the message items of the history.
    async fn get_messages(&self, limit: Option<usize>) -> Result<Vec<MessageItem>> {
        let items = self.get_items(limit).await?;
        Ok(items
            .into_iter()
            .filter_map(|item| match item {
                RunItem::Message(message) => Some(message),
                _ => None,
            })
            .collect())
    }
}

/// A session kept in process memory.
#[derive(Debug)]
pub struct InMemorySession {
    session_id: String,
    items: Mutex<VecDeque<RunItem>>,
}

impl InMemorySession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            items: Mutex::new(VecDeque::new()),
        }
    }
}

#[async_trait]
impl Session for InMemorySession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn get_items(&self, limit: Option<usize>) -> Result<Vec<RunItem>> {
        let items = self.items.lock().await;
        let skip = limit.map_or(0, |n| items.len().saturating_sub(n));
        Ok(items.iter().skip(skip).cloned().collect())
    }

    async fn add_items(&self, new_items: Vec<RunItem>) -> Result<()> {
        self.items.lock().await.extend(new_items);
        Ok(())
    }

    async fn pop_item(&self) -> Result<Option<RunItem>> {
        Ok(self.items.lock().await.pop_back())
    }

    async fn clear_session(&self) -> Result<()> {
        self.items.lock().await.clear();
        Ok(())
    }
}
