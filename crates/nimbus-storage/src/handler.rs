//! Per-transfer callback handlers
//!
//! Each handler owns a sender into the transfer's [`EventStream`] and nothing
//! else. A backend receives one of each when a transfer starts, acknowledges
//! task creation first, then reports progress, then completes exactly once.
//!
//! [`EventStream`]: crate::event::EventStream

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{text, BackendError, TransferError};
use crate::event::{EventSender, Progress, TransferEvent, TransferReference, TransferTask};

/// A backend's answer to "create this transfer"
pub type TaskCreation = Result<Option<Arc<dyn TransferTask>>, BackendError>;

/// Transport-level failure reported alongside a completion
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct TransportError {
    pub code: i64,
    pub message: String,
}

impl TransportError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Final signal of a backend transfer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendCompletion {
    /// HTTP status, absent when no response was received
    pub status: Option<u16>,
    pub payload: Option<Bytes>,
    pub error: Option<TransportError>,
}

impl BackendCompletion {
    pub fn ok(payload: Option<Bytes>) -> Self {
        Self {
            status: Some(200),
            payload,
            error: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn no_response(error: Option<TransportError>) -> Self {
        Self {
            status: None,
            payload: None,
            error,
        }
    }
}

/// Map a backend completion to its payload or a transfer error.
///
/// | Condition                  | Outcome                         |
/// |----------------------------|---------------------------------|
/// | no response                | `Unknown("Missing HTTP Status")` |
/// | 404                        | `NotFound`                      |
/// | other non-200              | `HttpStatusError`               |
/// | transport error on 200     | `Unknown("Error with code: N")` |
/// | 200                        | payload                         |
pub fn classify_completion(completion: BackendCompletion) -> Result<Option<Bytes>, TransferError> {
    let Some(status) = completion.status else {
        return Err(TransferError::from_text(text::MISSING_HTTP_STATUS));
    };

    // TODO: map throttling and 5xx statuses to a retryable error kind once a
    // retry layer exists above the orchestrator.
    match status {
        200 => {}
        404 => return Err(TransferError::not_found()),
        status => return Err(TransferError::http_status(status)),
    }

    if let Some(error) = completion.error {
        return Err(TransferError::unknown(
            format!("Error with code: {}", error.code),
            "",
        ));
    }

    Ok(completion.payload)
}

fn send<R>(tx: &EventSender<R>, event: TransferEvent<R>) {
    if tx.send(event).is_err() {
        debug!("Event stream closed, dropping transfer event");
    }
}

/// Turns the backend's task-creation result into `Initiated` or `Failed`
pub struct TaskCreatedHandler<R> {
    tx: EventSender<R>,
}

impl<R> TaskCreatedHandler<R> {
    pub(crate) fn new(tx: EventSender<R>) -> Self {
        Self { tx }
    }

    pub fn handle(self, creation: TaskCreation) {
        let event = match creation {
            Err(err) => {
                let inner = err.inner_message();
                warn!(error = %err, inner = %inner, "Transfer task creation failed");
                TransferEvent::Failed(TransferError::unknown(
                    format!("Error: {}", inner),
                    text::TASK_CREATION.recovery_suggestion,
                ))
            }
            Ok(None) => TransferEvent::Failed(TransferError::from_text(text::NO_TASK)),
            Ok(Some(task)) => {
                debug!(task = %task.id(), "Transfer initiated");
                TransferEvent::Initiated(TransferReference::new(task))
            }
        };
        send(&self.tx, event);
    }
}

/// Forwards backend progress as `Progress` events
pub struct ProgressHandler<R> {
    tx: EventSender<R>,
}

impl<R> ProgressHandler<R> {
    pub(crate) fn new(tx: EventSender<R>) -> Self {
        Self { tx }
    }

    pub fn handle(&self, progress: Progress) {
        send(&self.tx, TransferEvent::Progress(progress));
    }
}

impl<R> Clone for ProgressHandler<R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Classifies the backend's completion into the terminal event
pub struct CompletionHandler<R> {
    tx: EventSender<R>,
    into_result: Box<dyn FnOnce(Option<Bytes>) -> R + Send>,
}

impl<R> CompletionHandler<R> {
    pub(crate) fn new(
        tx: EventSender<R>,
        into_result: impl FnOnce(Option<Bytes>) -> R + Send + 'static,
    ) -> Self {
        Self {
            tx,
            into_result: Box::new(into_result),
        }
    }

    pub fn handle(self, completion: BackendCompletion) {
        let event = match classify_completion(completion) {
            Ok(payload) => TransferEvent::Completed((self.into_result)(payload)),
            Err(err) => {
                debug!(error = %err, "Transfer failed");
                TransferEvent::Failed(err)
            }
        };
        send(&self.tx, event);
    }
}

/// The callbacks a backend receives for one transfer
pub struct TransferHandlers<R> {
    pub created: TaskCreatedHandler<R>,
    pub progress: ProgressHandler<R>,
    pub completion: CompletionHandler<R>,
}

impl<R> TransferHandlers<R> {
    pub(crate) fn new(
        tx: EventSender<R>,
        into_result: impl FnOnce(Option<Bytes>) -> R + Send + 'static,
    ) -> Self {
        Self {
            created: TaskCreatedHandler::new(tx.clone()),
            progress: ProgressHandler::new(tx.clone()),
            completion: CompletionHandler::new(tx, into_result),
        }
    }
}
