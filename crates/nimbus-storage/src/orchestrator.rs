//! Transfer orchestration
//!
//! [`TransferOrchestrator`] validates a logical request, derives its service
//! key, hands the transfer to a [`TransferBackend`] and returns the transfer's
//! [`EventStream`] right away. Nothing here waits on I/O except `list` and
//! `remove`, which are plain request/response calls.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::backend::{DownloadJob, TransferBackend, UploadJob};
use crate::config::StorageConfig;
use crate::error::{text, Result, StorageError, TransferError};
use crate::event::{EventStream, TransferEvent};
use crate::handler::TransferHandlers;
use crate::policy::{self, access_level_prefix, derive_service_key};
use crate::s3::S3TransferBackend;
use crate::types::*;

/// Drives downloads and uploads for one identity
pub struct TransferOrchestrator {
    backend: Arc<dyn TransferBackend>,
    identity_id: String,
    default_url_expiry: u64,
}

impl TransferOrchestrator {
    /// Create an orchestrator acting as `identity_id`
    pub fn new(backend: Arc<dyn TransferBackend>, identity_id: impl Into<String>) -> Result<Self> {
        let identity_id = identity_id.into();
        if identity_id.is_empty() {
            return Err(StorageError::Config("identity id must not be empty".to_string()));
        }

        Ok(Self {
            backend,
            identity_id,
            default_url_expiry: StorageConfig::default().default_url_expiry,
        })
    }

    /// Create an orchestrator over the S3-compatible HTTP backend
    pub fn from_config(config: StorageConfig, identity_id: impl Into<String>) -> Result<Self> {
        let default_url_expiry = config.default_url_expiry;
        let backend = S3TransferBackend::new(config)?;
        Ok(Self::new(Arc::new(backend), identity_id)?.with_default_url_expiry(default_url_expiry))
    }

    /// Expiry used for pre-signed URLs when the request sets none
    pub fn with_default_url_expiry(mut self, secs: u64) -> Self {
        self.default_url_expiry = secs;
        self
    }

    pub fn identity_id(&self) -> &str {
        &self.identity_id
    }

    fn effective_identity<'a>(&'a self, target: Option<&'a str>) -> &'a str {
        target.unwrap_or(&self.identity_id)
    }

    /// Fetch an object into memory, a file, or a pre-signed URL
    #[instrument(skip(self), fields(key = %request.key, level = %request.access_level))]
    pub fn get(&self, request: StorageGetRequest) -> EventStream<StorageGetResult> {
        if let Err(err) = request.validate() {
            warn!(error = %err, "Rejected get request");
            return EventStream::failed(err.into());
        }

        let identity = self.effective_identity(request.target_identity_id.as_deref());
        let service_key = derive_service_key(request.access_level, identity, &request.key);

        match request.destination {
            TransferDestination::Data => self.download(service_key, None),
            TransferDestination::File(path) => self.download(service_key, Some(path)),
            TransferDestination::Url { expires } => self.presigned_url(&service_key, expires),
        }
    }

    /// Download `service_key`, to `file` when given and into memory otherwise
    pub fn download(
        &self,
        service_key: String,
        file: Option<PathBuf>,
    ) -> EventStream<StorageGetResult> {
        let (tx, stream) = EventStream::channel();
        let destination = file.clone();
        let handlers = TransferHandlers::new(tx, move |payload| match destination {
            Some(path) => StorageGetResult::File(path),
            None => StorageGetResult::Data(payload.unwrap_or_default()),
        });

        debug!(%service_key, to_file = file.is_some(), "Starting download");
        self.backend
            .start_download(DownloadJob { service_key, file }, handlers);
        stream
    }

    fn presigned_url(
        &self,
        service_key: &str,
        expires: Option<i64>,
    ) -> EventStream<StorageGetResult> {
        // Validation has already rejected non-positive values.
        let expires = expires
            .and_then(|secs| u64::try_from(secs).ok())
            .unwrap_or(self.default_url_expiry);

        match self.backend.presigned_url(service_key, expires) {
            Ok(url) => EventStream::terminal(TransferEvent::Completed(StorageGetResult::Url(url))),
            Err(err) => {
                warn!(error = %err, "Failed to pre-sign URL");
                EventStream::failed(TransferError::unknown(
                    format!("Error: {}", err.inner_message()),
                    text::TASK_CREATION.recovery_suggestion,
                ))
            }
        }
    }

    /// Upload an object from memory or a file
    #[instrument(skip(self, request), fields(key = %request.key, level = %request.access_level))]
    pub fn put(&self, request: StoragePutRequest) -> EventStream<StoragePutResult> {
        if let Err(err) = request.validate() {
            warn!(error = %err, "Rejected put request");
            return EventStream::failed(err.into());
        }

        let service_key = derive_service_key(request.access_level, &self.identity_id, &request.key);
        let content_type = request
            .content_type
            .or_else(|| guess_content_type(&request.source));
        let metadata = policy::service_metadata(request.metadata.as_ref());

        let (tx, stream) = EventStream::channel();
        let key = request.key;
        let handlers = TransferHandlers::new(tx, move |_| StoragePutResult { key });

        info!(%service_key, "Starting upload");
        self.backend.start_upload(
            UploadJob {
                service_key,
                source: request.source,
                content_type,
                metadata,
            },
            handlers,
        );
        stream
    }

    /// List objects at an access level, optionally under a path
    #[instrument(skip(self))]
    pub async fn list(&self, request: StorageListRequest) -> Result<StorageListResult> {
        request.validate()?;

        let identity = self.effective_identity(request.target_identity_id.as_deref());
        let prefix = access_level_prefix(request.access_level, identity);
        let search = format!("{}{}", prefix, request.path.as_deref().unwrap_or_default());

        let items = self
            .backend
            .list(&search)
            .await?
            .into_iter()
            .filter_map(|object| {
                let key = object.service_key.strip_prefix(&prefix)?.to_string();
                Some(StorageListItem {
                    key,
                    size: object.size,
                    etag: object.etag,
                    last_modified: object.last_modified,
                })
            })
            .collect();

        Ok(StorageListResult { items })
    }

    /// Remove one object
    #[instrument(skip(self))]
    pub async fn remove(&self, request: StorageRemoveRequest) -> Result<StoragePutResult> {
        request.validate()?;

        let service_key = derive_service_key(request.access_level, &self.identity_id, &request.key);
        self.backend.remove(&service_key).await?;
        Ok(StoragePutResult { key: request.key })
    }
}

fn guess_content_type(source: &UploadSource) -> Option<String> {
    match source {
        UploadSource::File(path) => mime_guess::from_path(path).first_raw().map(str::to_string),
        UploadSource::Data(_) => None,
    }
}
