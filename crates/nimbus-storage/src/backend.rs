//! Transfer backend interface

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use crate::error::BackendError;
use crate::handler::TransferHandlers;
use crate::policy;
use crate::types::{StorageGetResult, StoragePutResult, UploadSize, UploadSource};

/// A download the backend should run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadJob {
    pub service_key: String,
    /// Write to this file instead of collecting the payload in memory
    pub file: Option<PathBuf>,
}

/// An upload the backend should run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadJob {
    pub service_key: String,
    pub source: UploadSource,
    pub content_type: Option<String>,
    /// Metadata with wire-prefixed keys
    pub metadata: Option<HashMap<String, String>>,
}

impl UploadJob {
    /// Classify the payload; reads file metadata for file sources
    pub async fn size(&self) -> UploadSize {
        policy::classify_upload_size(&self.source).await
    }
}

/// An object returned by a listing, keyed by its full service key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedObject {
    pub service_key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// The mechanism that actually moves bytes.
///
/// `start_download` and `start_upload` must return without waiting on I/O.
/// An implementation hands the task-creation result to
/// `handlers.created` before it starts any work. On creation failure it
/// drops the remaining handlers unused. Otherwise it reports zero or more
/// progress updates, then calls `handlers.completion` exactly once.
#[async_trait]
pub trait TransferBackend: Send + Sync {
    fn start_download(&self, job: DownloadJob, handlers: TransferHandlers<StorageGetResult>);

    fn start_upload(&self, job: UploadJob, handlers: TransferHandlers<StoragePutResult>);

    /// Pre-signed GET URL for `service_key`, valid for `expires_secs`
    fn presigned_url(&self, service_key: &str, expires_secs: u64) -> Result<Url, BackendError>;

    /// Objects whose service key starts with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<ListedObject>, BackendError>;

    async fn remove(&self, service_key: &str) -> Result<(), BackendError>;
}
