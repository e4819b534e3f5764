//! Streaming execution.
//!
//! [`Runner::run_streamed`](crate::Runner::run_streamed) spawns the turn loop
//! on a background task and returns a [`StreamedRun`]. The task emits
//! [`StreamEvent`]s in causal order over a bounded channel; when the consumer
//! falls behind, the producer waits.
//!
//! Dropping the event stream does not cancel the run. The producer ignores
//! send failures, runs to completion, and stores its result in the handle
//! before closing the channel, so once the stream is exhausted
//! [`StreamedRun::result`] is available without awaiting.

use std::sync::{Arc, Mutex};

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{AgentsError, Result};
use crate::items::RunItem;
use crate::result::RunResult;

/// One incremental notification from a streamed run.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental model text.
    RawTextDelta { agent: String, delta: String },
    /// An item was appended to the run's history.
    RunItemCreated(RunItem),
    /// A new agent became current (also emitted for the starting agent).
    AgentUpdated { agent: String },
}

impl StreamEvent {
    pub fn text_delta(&self) -> Option<&str> {
        match self {
            StreamEvent::RawTextDelta { delta, .. } => Some(delta),
            _ => None,
        }
    }
}

/// Producer half, owned by the running turn loop.
#[derive(Clone)]
pub(crate) struct EventSink {
    sender: Option<mpsc::Sender<StreamEvent>>,
}

impl EventSink {
    /// A sink that drops everything, for blocking runs.
    pub(crate) fn disabled() -> Self {
        Self { sender: None }
    }

    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { sender: Some(tx) }, rx)
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Waits for queue space; a departed consumer is not an error.
    pub(crate) async fn emit(&self, event: StreamEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event).await;
        }
    }
}

type ResultSlot = Arc<Mutex<Option<Result<RunResult>>>>;

pub(crate) fn result_slot() -> ResultSlot {
    Arc::new(Mutex::new(None))
}

pub(crate) fn fill_slot(slot: &ResultSlot, result: Result<RunResult>) {
    let mut guard = match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = Some(result);
}

/// Handle on a run executing in the background.
pub struct StreamedRun {
    events: Option<mpsc::Receiver<StreamEvent>>,
    slot: ResultSlot,
    task: Option<JoinHandle<()>>,
}

impl StreamedRun {
    pub(crate) fn new(
        events: mpsc::Receiver<StreamEvent>,
        slot: ResultSlot,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            events: Some(events),
            slot,
            task: Some(task),
        }
    }

    /// The event sequence. It can be taken once; later calls yield an empty stream.
    pub fn events(&mut self) -> BoxStream<'static, StreamEvent> {
        match self.events.take() {
            Some(rx) => ReceiverStream::new(rx).boxed(),
            None => futures::stream::empty().boxed(),
        }
    }

    /// Whether the run has finished.
    pub fn is_complete(&self) -> bool {
        match self.slot.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    /// Takes the result once the run has finished.
    ///
    /// Returns `None` while the run is still going, and after the result has
    /// already been taken.
    pub fn result(&self) -> Option<Result<RunResult>> {
        match self.slot.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Waits for the run to finish and takes its result, discarding unread events.
    pub async fn wait(mut self) -> Result<RunResult> {
        drop(self.events.take());
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| AgentsError::Model {
                message: format!("streamed run task failed: {}", e),
            })?;
        }
        self.result().unwrap_or_else(|| {
            Err(AgentsError::Model {
                message: "streamed run result was already taken".to_string(),
            })
        })
    }
}

impl std::fmt::Debug for StreamedRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamedRun")
            .field("events_taken", &self.events.is_none())
            .field("complete", &self.is_complete())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_sink_is_silent() {
        let sink = EventSink::disabled();
        assert!(!sink.is_enabled());
        sink.emit(StreamEvent::AgentUpdated {
            agent: "A".to_string(),
        })
        .await;
    }

    #[tokio::test]
    async fn test_events_are_take_once_and_ordered() {
        let (sink, rx) = EventSink::channel(4);
        let slot = result_slot();
        let task_slot = slot.clone();
        let task = tokio::spawn(async move {
            for i in 0..10 {
                sink.emit(StreamEvent::RawTextDelta {
                    agent: "A".to_string(),
                    delta: i.to_string(),
                })
                .await;
            }
            fill_slot(
                &task_slot,
                Err(AgentsError::model_behavior("no result in this test")),
            );
        });
        let mut run = StreamedRun::new(rx, slot, task);

        let deltas: Vec<String> = run
            .events()
            .filter_map(|e| async move { e.text_delta().map(str::to_string) })
            .collect()
            .await;
        assert_eq!(deltas.concat(), "0123456789");
        assert!(run.is_complete());
        assert_eq!(run.events().count().await, 0);
        assert!(run.result().is_some());
        assert!(run.result().is_none());
    }

    #[tokio::test]
    async fn test_dropped_consumer_does_not_block_producer() {
        let (sink, rx) = EventSink::channel(1);
        let slot = result_slot();
        let task_slot = slot.clone();
        let task = tokio::spawn(async move {
            for _ in 0..5 {
                sink.emit(StreamEvent::AgentUpdated {
                    agent: "A".to_string(),
                })
                .await;
            }
            fill_slot(&task_slot, Err(AgentsError::user("done")));
        });
        let run = StreamedRun::new(rx, slot, task);
        let result = run.wait().await;
        assert!(matches!(result, Err(AgentsError::User { .. })));
    }
}
