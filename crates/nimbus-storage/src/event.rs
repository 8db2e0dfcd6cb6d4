//! Transfer lifecycle events
//!
//! A transfer reports through a single [`EventStream`]. Backend signals from
//! task creation, progress and completion are fanned into one channel, and the
//! stream runs a small state machine over it:
//!
//! ```text
//!   Idle ──Initiated──▶ Started ──Progress──▶ Started
//!    │                     │
//!    └──Completed/Failed───┴──Completed/Failed──▶ Terminal
//! ```
//!
//! Anything that arrives once the stream is terminal is dropped.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::error::{text, TransferError};

/// Bytes moved so far in one transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    pub completed_bytes: u64,
    /// Total size, when the backend knows it
    pub total_bytes: Option<u64>,
}

impl Progress {
    pub fn new(completed_bytes: u64, total_bytes: Option<u64>) -> Self {
        Self {
            completed_bytes,
            total_bytes,
        }
    }

    /// Fraction complete in `0.0..=1.0`, if the total is known
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some((self.completed_bytes as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// A running backend transfer
pub trait TransferTask: Send + Sync + fmt::Debug {
    fn id(&self) -> Uuid;

    /// Ask the backend to stop the transfer
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

/// Handle to an in-flight transfer, carried by [`TransferEvent::Initiated`]
#[derive(Clone, Debug)]
pub struct TransferReference {
    task: Arc<dyn TransferTask>,
}

impl TransferReference {
    pub fn new(task: Arc<dyn TransferTask>) -> Self {
        Self { task }
    }

    pub fn id(&self) -> Uuid {
        self.task.id()
    }

    pub fn cancel(&self) {
        self.task.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }
}

/// A transfer lifecycle event
#[derive(Clone, Debug)]
pub enum TransferEvent<R> {
    Initiated(TransferReference),
    Progress(Progress),
    Completed(R),
    Failed(TransferError),
}

impl<R> TransferEvent<R> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EmitterState {
    Idle,
    Started,
    Terminal,
}

impl EmitterState {
    fn next<R>(self, event: &TransferEvent<R>) -> Option<Self> {
        match (self, event) {
            (Self::Idle, TransferEvent::Initiated(_)) => Some(Self::Started),
            (Self::Started, TransferEvent::Progress(_)) => Some(Self::Started),
            (Self::Idle | Self::Started, e) if e.is_terminal() => Some(Self::Terminal),
            _ => None,
        }
    }
}

pub(crate) type EventSender<R> = mpsc::UnboundedSender<TransferEvent<R>>;

/// The ordered event stream of one transfer
pub struct EventStream<R> {
    rx: mpsc::UnboundedReceiver<TransferEvent<R>>,
    state: EmitterState,
}

impl<R> EventStream<R> {
    pub(crate) fn channel() -> (EventSender<R>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                rx,
                state: EmitterState::Idle,
            },
        )
    }

    /// A stream that holds a single terminal event
    pub(crate) fn terminal(event: TransferEvent<R>) -> Self {
        let (tx, stream) = Self::channel();
        // The receiver is alive, so this cannot fail.
        let _ = tx.send(event);
        stream
    }

    pub(crate) fn failed(err: TransferError) -> Self {
        Self::terminal(TransferEvent::Failed(err))
    }

    /// Next accepted event, or `None` once a terminal event has been returned
    pub async fn recv(&mut self) -> Option<TransferEvent<R>> {
        while self.state != EmitterState::Terminal {
            let Some(event) = self.rx.recv().await else {
                self.finish();
                return Some(TransferEvent::Failed(TransferError::from_text(
                    text::STREAM_CLOSED,
                )));
            };

            match self.state.next(&event) {
                Some(EmitterState::Terminal) => {
                    self.finish();
                    return Some(event);
                }
                Some(state) => {
                    self.state = state;
                    return Some(event);
                }
                None => debug!(state = ?self.state, "Dropping out-of-order transfer event"),
            }
        }
        None
    }

    fn finish(&mut self) {
        self.state = EmitterState::Terminal;
        self.rx.close();
    }

    /// Drain the stream into a vector
    pub async fn collect(mut self) -> Vec<TransferEvent<R>> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        events
    }

    /// Deliver every event to `sink`, in order
    pub async fn for_each<F>(mut self, mut sink: F)
    where
        F: FnMut(TransferEvent<R>),
    {
        while let Some(event) = self.recv().await {
            sink(event);
        }
    }

    /// Wait for the terminal event, discarding the others
    pub async fn result(mut self) -> Result<R, TransferError> {
        while let Some(event) = self.recv().await {
            match event {
                TransferEvent::Completed(result) => return Ok(result),
                TransferEvent::Failed(err) => return Err(err),
                _ => {}
            }
        }
        Err(TransferError::from_text(text::STREAM_CLOSED))
    }
}

impl<R: Send + 'static> EventStream<R> {
    /// Drive `sink` from a background task
    pub fn forward_to<F>(self, sink: F) -> JoinHandle<()>
    where
        F: FnMut(TransferEvent<R>) + Send + 'static,
    {
        tokio::spawn(self.for_each(sink))
    }
}

impl<R> fmt::Debug for EventStream<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default)]
    struct FakeTask {
        cancelled: AtomicBool,
    }

    impl TransferTask for FakeTask {
        fn id(&self) -> Uuid {
            Uuid::nil()
        }

        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
    }

    fn reference() -> TransferReference {
        TransferReference::new(Arc::new(FakeTask::default()))
    }

    #[test]
    fn test_progress_fraction() {
        assert_eq!(Progress::new(50, Some(200)).fraction(), Some(0.25));
        assert_eq!(Progress::new(0, Some(0)).fraction(), Some(1.0));
        assert_eq!(Progress::new(10, None).fraction(), None);
    }

    #[tokio::test]
    async fn test_nothing_follows_terminal() {
        let (tx, stream) = EventStream::<u32>::channel();
        tx.send(TransferEvent::Initiated(reference())).unwrap();
        tx.send(TransferEvent::Progress(Progress::new(1, Some(2)))).unwrap();
        tx.send(TransferEvent::Completed(7)).unwrap();
        tx.send(TransferEvent::Progress(Progress::new(2, Some(2)))).unwrap();
        tx.send(TransferEvent::Failed(TransferError::not_found())).unwrap();

        let events = stream.collect().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2], TransferEvent::Completed(7)));
        assert!(tx.send(TransferEvent::Completed(8)).is_err());
    }

    #[tokio::test]
    async fn test_initiated_only_once_and_first() {
        let (tx, stream) = EventStream::<u32>::channel();
        tx.send(TransferEvent::Progress(Progress::new(1, None))).unwrap();
        tx.send(TransferEvent::Initiated(reference())).unwrap();
        tx.send(TransferEvent::Initiated(reference())).unwrap();
        tx.send(TransferEvent::Failed(TransferError::http_status(500))).unwrap();

        let events = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], TransferEvent::Initiated(_)));
        assert!(matches!(events[1], TransferEvent::Failed(_)));
    }

    #[tokio::test]
    async fn test_closed_channel_yields_failure() {
        let (tx, stream) = EventStream::<u32>::channel();
        tx.send(TransferEvent::Initiated(reference())).unwrap();
        drop(tx);

        let events = stream.collect().await;
        assert_eq!(events.len(), 2);
        match &events[1] {
            TransferEvent::Failed(err) => {
                assert_eq!(err.description(), "Transfer ended without a completion signal")
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reference_delegates_cancel() {
        let task = Arc::new(FakeTask::default());
        let reference = TransferReference::new(task.clone());
        reference.cancel();
        assert!(task.is_cancelled());
        assert!(reference.is_cancelled());
    }

    #[tokio::test]
    async fn test_forward_to_sink() {
        let stream = EventStream::<u32>::terminal(TransferEvent::Completed(3));
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        stream
            .forward_to(move |event| {
                let _ = seen_tx.send(event.is_terminal());
            })
            .await
            .unwrap();
        assert_eq!(seen_rx.recv().await, Some(true));
        assert_eq!(seen_rx.recv().await, None);
    }
}
