//! # Nimbus Storage
//!
//! Transfer orchestration for object storage.
//!
//! This crate provides:
//! - **Key policy**: access-level key derivation and request validation
//! - **Transfer events**: a single ordered event stream per transfer
//! - **Orchestration**: downloads, uploads, pre-signed URLs, listing, removal
//! - **S3 backend**: an S3-compatible [`TransferBackend`] over HTTP
//!
//! ## Example
//!
//! ```rust,ignore
//! use nimbus_storage::{StorageConfig, StorageGetRequest, TransferEvent, TransferOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = TransferOrchestrator::from_config(
//!         StorageConfig::new("http://localhost:9000", "photos"),
//!         "us-east-1:identity",
//!     )?;
//!
//!     let mut events = orchestrator.get(StorageGetRequest::new("holiday.jpg"));
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             TransferEvent::Progress(p) => println!("{:?}", p.fraction()),
//!             TransferEvent::Completed(result) => println!("done: {:?}", result),
//!             TransferEvent::Failed(err) => eprintln!("{}", err),
//!             TransferEvent::Initiated(_) => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod backend;
mod config;
mod error;
mod event;
mod handler;
mod orchestrator;
pub mod policy;
pub mod s3;
mod sigv4;
mod types;

pub use backend::{DownloadJob, ListedObject, TransferBackend, UploadJob};
pub use config::{Credentials, StorageConfig};
pub use error::{text, BackendError, ErrorText, Result, StorageError, TransferError, ValidationError};
pub use event::{EventStream, Progress, TransferEvent, TransferReference, TransferTask};
pub use handler::{
    classify_completion, BackendCompletion, CompletionHandler, ProgressHandler, TaskCreatedHandler,
    TaskCreation, TransferHandlers, TransportError,
};
pub use orchestrator::TransferOrchestrator;
pub use s3::{S3TransferBackend, S3TransferTask};
pub use types::*;
