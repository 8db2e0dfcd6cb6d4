//! S3-compatible transfer backend over HTTP

mod multipart;
mod xml;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Body, Client, Method, Response};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::backend::{DownloadJob, ListedObject, TransferBackend, UploadJob};
use crate::config::StorageConfig;
use crate::error::{BackendError, Result, StorageError};
use crate::event::{Progress, TransferTask};
use crate::handler::{BackendCompletion, ProgressHandler, TransferHandlers, TransportError};
use crate::sigv4;
use crate::types::{StorageGetResult, StoragePutResult, UploadSize, UploadSource};

/// Transport error codes reported in completions
pub mod code {
    pub const UNKNOWN: i64 = -1;
    pub const CANCELLED: i64 = -999;
    pub const TIMED_OUT: i64 = -1001;
    pub const CANNOT_CONNECT: i64 = -1004;
    pub const CONNECTION_LOST: i64 = -1005;
    pub const CANNOT_READ_FILE: i64 = -3001;
    pub const CANNOT_WRITE_FILE: i64 = -3003;
}

/// Size of the slices a single-request upload body is streamed in
const UPLOAD_SLICE: usize = 64 * 1024;

fn transport_error(err: &reqwest::Error) -> TransportError {
    let code = if err.is_timeout() {
        code::TIMED_OUT
    } else if err.is_connect() {
        code::CANNOT_CONNECT
    } else if err.is_body() || err.is_decode() {
        code::CONNECTION_LOST
    } else {
        code::UNKNOWN
    };
    TransportError::new(code, err.to_string())
}

fn io_error(code: i64, err: &std::io::Error) -> TransportError {
    TransportError::new(code, err.to_string())
}

fn cancelled_error() -> TransportError {
    TransportError::new(code::CANCELLED, "cancelled")
}

fn cancelled() -> BackendCompletion {
    BackendCompletion::no_response(Some(cancelled_error()))
}

/// A transfer running on the tokio runtime.
///
/// Cancellation is cooperative: the transfer stops at its next await point
/// and cleans up what it started (partial files, multipart uploads) before
/// it completes.
#[derive(Debug)]
pub struct S3TransferTask {
    id: Uuid,
    cancel: CancellationToken,
}

impl TransferTask for S3TransferTask {
    fn id(&self) -> Uuid {
        self.id
    }

    fn cancel(&self) {
        debug!(task = %self.id, "Cancelling transfer");
        self.cancel.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Transfer backend for S3-compatible object stores, path-style addressed
#[derive(Clone)]
pub struct S3TransferBackend {
    inner: Arc<Inner>,
}

struct Inner {
    config: StorageConfig,
    base: Url,
    http: Client,
}

impl fmt::Debug for S3TransferBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3TransferBackend")
            .field("config", &self.inner.config)
            .finish()
    }
}

impl S3TransferBackend {
    /// Create a new backend with the given configuration
    pub fn new(config: StorageConfig) -> Result<Self> {
        let base = Url::parse(config.base_url())
            .map_err(|e| StorageError::Config(format!("invalid endpoint: {}", e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            config
                .user_agent
                .parse()
                .map_err(|_| StorageError::Config("invalid user agent".to_string()))?,
        );

        let http = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(StorageError::Http)?;

        Ok(Self {
            inner: Arc::new(Inner { config, base, http }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    /// Spawn `work` as a cancellable task, acknowledging creation first
    fn spawn<R, F>(
        &self,
        handlers: TransferHandlers<R>,
        work: impl FnOnce(Arc<Inner>, ProgressHandler<R>, CancellationToken) -> F,
    ) where
        R: Send + 'static,
        F: std::future::Future<Output = BackendCompletion> + Send + 'static,
    {
        let TransferHandlers {
            created,
            progress,
            completion,
        } = handlers;

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                created.handle(Err(BackendError::with_source("no async runtime available", e)));
                return;
            }
        };

        let cancel = CancellationToken::new();
        let task = Arc::new(S3TransferTask {
            id: Uuid::new_v4(),
            cancel: cancel.clone(),
        });
        created.handle(Ok(Some(task)));

        let work = work(Arc::clone(&self.inner), progress, cancel);
        runtime.spawn(async move {
            completion.handle(work.await);
        });
    }
}

#[async_trait]
impl TransferBackend for S3TransferBackend {
    fn start_download(&self, job: DownloadJob, handlers: TransferHandlers<StorageGetResult>) {
        let url = match self.inner.object_url(&job.service_key) {
            Ok(url) => url,
            Err(e) => return handlers.created.handle(Err(e)),
        };
        self.spawn(handlers, move |inner, progress, cancel| async move {
            inner.download(url, job.file, progress, &cancel).await
        });
    }

    fn start_upload(&self, job: UploadJob, handlers: TransferHandlers<StoragePutResult>) {
        let url = match self.inner.object_url(&job.service_key) {
            Ok(url) => url,
            Err(e) => return handlers.created.handle(Err(e)),
        };
        self.spawn(handlers, move |inner, progress, cancel| async move {
            let size = job.size().await;
            debug!(service_key = %job.service_key, ?size, "Classified upload");
            match size {
                UploadSize::Normal => inner.upload(url, job, progress, &cancel).await,
                UploadSize::Large => inner.upload_multipart(url, job, progress, &cancel).await,
            }
        });
    }

    fn presigned_url(&self, service_key: &str, expires_secs: u64) -> std::result::Result<Url, BackendError> {
        let url = self.inner.object_url(service_key)?;
        match &self.inner.config.credentials {
            Some(credentials) => sigv4::presign_url(
                url,
                credentials,
                &self.inner.config.region,
                expires_secs,
                Utc::now(),
            ),
            None => {
                debug!(%service_key, "No credentials configured, returning unsigned URL");
                Ok(url)
            }
        }
    }

    #[instrument(skip(self))]
    async fn list(&self, prefix: &str) -> std::result::Result<Vec<ListedObject>, BackendError> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query = vec![("list-type", "2"), ("prefix", prefix)];
            if let Some(token) = &continuation {
                query.push(("continuation-token", token.as_str()));
            }
            let url = self.inner.bucket_url(&sigv4::encode_query(query))?;

            let response = self
                .inner
                .execute(Method::GET, url, HeaderMap::new(), None)
                .await?;
            let text = Inner::success_text(response).await?;
            let page: xml::ListBucketResult = xml::parse(&text)?;

            objects.extend(page.contents.into_iter().map(ListedObject::from));
            match page.next_continuation_token {
                Some(token) if page.is_truncated => continuation = Some(token),
                _ => break,
            }
        }

        debug!(count = objects.len(), "Listed objects");
        Ok(objects)
    }

    #[instrument(skip(self))]
    async fn remove(&self, service_key: &str) -> std::result::Result<(), BackendError> {
        let url = self.inner.object_url(service_key)?;
        let response = self
            .inner
            .execute(Method::DELETE, url, HeaderMap::new(), None)
            .await?;
        Inner::success_text(response).await?;
        Ok(())
    }
}

impl Inner {
    fn object_url(&self, service_key: &str) -> std::result::Result<Url, BackendError> {
        let mut url = self.base.clone();
        let path = format!(
            "{}/{}/{}",
            self.base.path().trim_end_matches('/'),
            sigv4::uri_encode(&self.config.bucket, true),
            sigv4::uri_encode(service_key, false)
        );
        url.set_path(&path);
        Ok(url)
    }

    fn bucket_url(&self, query: &str) -> std::result::Result<Url, BackendError> {
        let mut url = self.base.clone();
        let path = format!(
            "{}/{}",
            self.base.path().trim_end_matches('/'),
            sigv4::uri_encode(&self.config.bucket, true)
        );
        url.set_path(&path);
        url.set_query(Some(query));
        Ok(url)
    }

    async fn execute(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<Body>,
    ) -> std::result::Result<Response, BackendError> {
        let mut builder = self.http.request(method, url).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let mut request = builder.build()?;

        if let Some(credentials) = &self.config.credentials {
            sigv4::sign_request(&mut request, credentials, &self.config.region, Utc::now())?;
        }

        debug!("Sending {} request to {}", request.method(), request.url());
        Ok(self.http.execute(request).await?)
    }

    async fn success_text(response: Response) -> std::result::Result<String, BackendError> {
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::new(xml::error_message(&text, status.as_u16())));
        }
        Ok(text)
    }

    /// Send one transfer request, mapping failures to a completion
    async fn send(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<Body>,
    ) -> std::result::Result<Response, BackendCompletion> {
        self.execute(method, url, headers, body).await.map_err(|err| {
            warn!(error = %err, "Transfer request failed");
            let transport = std::error::Error::source(&err)
                .and_then(|source| source.downcast_ref::<reqwest::Error>())
                .map(transport_error)
                .unwrap_or_else(|| TransportError::new(code::UNKNOWN, err.inner_message()));
            BackendCompletion::no_response(Some(transport))
        })
    }

    /// [`Inner::send`], giving up with a cancelled completion if `cancel` fires first
    async fn send_until_cancelled(
        &self,
        cancel: &CancellationToken,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<Body>,
    ) -> std::result::Result<Response, BackendCompletion> {
        tokio::select! {
            result = self.send(method, url, headers, body) => result,
            _ = cancel.cancelled() => {
                debug!("Transfer request cancelled");
                Err(cancelled())
            }
        }
    }

    async fn download(
        &self,
        url: Url,
        file: Option<std::path::PathBuf>,
        progress: ProgressHandler<StorageGetResult>,
        cancel: &CancellationToken,
    ) -> BackendCompletion {
        let mut response = match self
            .send_until_cancelled(cancel, Method::GET, url, HeaderMap::new(), None)
            .await
        {
            Ok(response) => response,
            Err(completion) => return completion,
        };

        let status = response.status().as_u16();
        if status != 200 {
            debug!(status, "Download answered with non-OK status");
            return BackendCompletion::status(status);
        }

        let total = response.content_length();
        let mut writer = match &file {
            Some(path) => match tokio::fs::File::create(path).await {
                Ok(file) => Some(file),
                Err(e) => {
                    return BackendCompletion {
                        status: Some(status),
                        payload: None,
                        error: Some(io_error(code::CANNOT_WRITE_FILE, &e)),
                    }
                }
            },
            None => None,
        };

        let mut buffer = Vec::new();
        let mut completed = 0u64;
        let mut failure = loop {
            let next = tokio::select! {
                next = response.chunk() => next,
                _ = cancel.cancelled() => break Some(cancelled_error()),
            };
            match next {
                Ok(Some(chunk)) => {
                    completed += chunk.len() as u64;
                    if let Some(file) = writer.as_mut() {
                        if let Err(e) = file.write_all(&chunk).await {
                            break Some(io_error(code::CANNOT_WRITE_FILE, &e));
                        }
                    } else {
                        buffer.extend_from_slice(&chunk);
                    }
                    progress.handle(Progress::new(completed, total));
                }
                Ok(None) => break None,
                Err(e) => break Some(transport_error(&e)),
            }
        };

        if failure.is_none() {
            if let Some(file) = writer.as_mut() {
                if let Err(e) = file.flush().await {
                    failure = Some(io_error(code::CANNOT_WRITE_FILE, &e));
                }
            }
        }

        if let (Some(err), Some(path)) = (&failure, &file) {
            debug!(code = err.code, "Download failed, discarding partial file");
            drop(writer);
            discard_partial(path).await;
        }
        if failure.as_ref().is_some_and(|err| err.code == code::CANCELLED) {
            return cancelled();
        }

        BackendCompletion {
            status: Some(status),
            payload: file.is_none().then(|| Bytes::from(buffer)),
            error: failure,
        }
    }

    async fn upload(
        &self,
        url: Url,
        job: UploadJob,
        progress: ProgressHandler<StoragePutResult>,
        cancel: &CancellationToken,
    ) -> BackendCompletion {
        let data = match read_source(&job.source).await {
            Ok(data) => data,
            Err(e) => return BackendCompletion::no_response(Some(io_error(code::CANNOT_READ_FILE, &e))),
        };

        let mut headers = match object_headers(&job) {
            Ok(headers) => headers,
            Err(e) => return BackendCompletion::no_response(Some(TransportError::new(code::UNKNOWN, e.to_string()))),
        };
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(data.len() as u64));

        let response = match self
            .send_until_cancelled(
                cancel,
                Method::PUT,
                url,
                headers,
                Some(progress_body(data, progress)),
            )
            .await
        {
            Ok(response) => response,
            Err(completion) => return completion,
        };
        BackendCompletion::status(response.status().as_u16())
    }
}

/// Content type and wire metadata headers for an object write
fn object_headers(job: &UploadJob) -> std::result::Result<HeaderMap, BackendError> {
    let mut headers = HeaderMap::new();
    if let Some(content_type) = &job.content_type {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type)
                .map_err(|e| BackendError::with_source("invalid content type", e))?,
        );
    }
    for (name, value) in job.metadata.iter().flatten() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| BackendError::with_source("invalid metadata key", e))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| BackendError::with_source("invalid metadata value", e))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Remove a download destination left incomplete by a failed transfer
async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial download"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial download"),
    }
}

async fn read_source(source: &UploadSource) -> std::io::Result<Bytes> {
    match source {
        UploadSource::Data(data) => Ok(data.clone()),
        UploadSource::File(path) => read_file(path).await,
    }
}

async fn read_file(path: &Path) -> std::io::Result<Bytes> {
    Ok(Bytes::from(tokio::fs::read(path).await?))
}

/// Stream `data` as a request body, reporting progress per slice
fn progress_body<R: Send + 'static>(data: Bytes, progress: ProgressHandler<R>) -> Body {
    let total = data.len() as u64;
    let slices: Vec<Bytes> = (0..data.len())
        .step_by(UPLOAD_SLICE)
        .map(|start| data.slice(start..(start + UPLOAD_SLICE).min(data.len())))
        .collect();

    let mut sent = 0u64;
    let stream = futures::stream::iter(slices).map(move |slice| {
        sent += slice.len() as u64;
        progress.handle(Progress::new(sent, Some(total)));
        Ok::<_, std::io::Error>(slice)
    });
    Body::wrap_stream(stream)
}
