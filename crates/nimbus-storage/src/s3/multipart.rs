//! Multipart upload support for large objects

use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Body, Method};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{cancelled, code, io_error, object_headers, transport_error, xml, Inner};
use crate::backend::UploadJob;
use crate::event::Progress;
use crate::handler::{BackendCompletion, ProgressHandler, TransportError};
use crate::sigv4;
use crate::types::{StoragePutResult, UploadSource};

/// Reads an upload source one part at a time
enum PartReader {
    Data { data: Bytes, offset: usize },
    File(tokio::fs::File),
}

impl PartReader {
    /// Open `source`, returning the reader and the total size in bytes
    async fn open(source: &UploadSource) -> std::io::Result<(Self, u64)> {
        match source {
            UploadSource::Data(data) => Ok((
                Self::Data {
                    data: data.clone(),
                    offset: 0,
                },
                data.len() as u64,
            )),
            UploadSource::File(path) => {
                let file = tokio::fs::File::open(path).await?;
                let total = file.metadata().await?.len();
                Ok((Self::File(file), total))
            }
        }
    }

    async fn next_part(&mut self, size: usize) -> std::io::Result<Option<Bytes>> {
        match self {
            Self::Data { data, offset } => {
                if *offset >= data.len() {
                    return Ok(None);
                }
                let end = (*offset + size).min(data.len());
                let part = data.slice(*offset..end);
                *offset = end;
                Ok(Some(part))
            }
            Self::File(file) => {
                let mut buf = Vec::with_capacity(size);
                (&mut *file).take(size as u64).read_to_end(&mut buf).await?;
                Ok((!buf.is_empty()).then(|| Bytes::from(buf)))
            }
        }
    }
}

/// An in-progress multipart upload
struct MultipartUpload {
    url: Url,
    upload_id: String,
    parts: Vec<(u32, String)>,
}

impl MultipartUpload {
    fn part_url(&self, part_number: u32) -> Url {
        with_query(
            &self.url,
            &[
                ("partNumber", part_number.to_string().as_str()),
                ("uploadId", self.upload_id.as_str()),
            ],
        )
    }

    fn upload_url(&self) -> Url {
        with_query(&self.url, &[("uploadId", self.upload_id.as_str())])
    }
}

fn with_query(url: &Url, pairs: &[(&str, &str)]) -> Url {
    let mut url = url.clone();
    url.set_query(Some(&sigv4::encode_query(pairs.iter().copied())));
    url
}

fn malformed(status: u16, message: impl Into<String>) -> BackendCompletion {
    BackendCompletion {
        status: Some(status),
        payload: None,
        error: Some(TransportError::new(code::UNKNOWN, message)),
    }
}

impl Inner {
    /// Upload `job` in parts of `multipart_chunk_size`.
    ///
    /// Once the upload has been initiated, a failed part or a cancellation
    /// aborts it on the server before the completion is returned. The
    /// initiate and complete requests themselves always run to the end.
    pub(super) async fn upload_multipart(
        &self,
        url: Url,
        job: UploadJob,
        progress: ProgressHandler<StoragePutResult>,
        cancel: &CancellationToken,
    ) -> BackendCompletion {
        let (mut reader, total) = match PartReader::open(&job.source).await {
            Ok(opened) => opened,
            Err(e) => {
                return BackendCompletion::no_response(Some(io_error(code::CANNOT_READ_FILE, &e)))
            }
        };

        let mut upload = match self.initiate(url, &job).await {
            Ok(upload) => upload,
            Err(completion) => return completion,
        };
        info!(upload_id = %upload.upload_id, total, "Started multipart upload");

        match self
            .upload_parts(&mut upload, &mut reader, total, &progress, cancel)
            .await
        {
            Ok(()) => self.complete(&upload).await,
            Err(completion) => {
                self.abort(&upload).await;
                completion
            }
        }
    }

    async fn initiate(
        &self,
        url: Url,
        job: &UploadJob,
    ) -> Result<MultipartUpload, BackendCompletion> {
        let headers = object_headers(job).map_err(|e| {
            BackendCompletion::no_response(Some(TransportError::new(code::UNKNOWN, e.to_string())))
        })?;

        let response = self
            .send(Method::POST, with_query(&url, &[("uploads", "")]), headers, None)
            .await?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(BackendCompletion::status(status));
        }

        let text = response.text().await.map_err(|e| BackendCompletion {
            status: Some(status),
            payload: None,
            error: Some(transport_error(&e)),
        })?;
        let result: xml::InitiateMultipartUploadResult =
            xml::parse(&text).map_err(|_| malformed(status, "Missing UploadId"))?;

        Ok(MultipartUpload {
            url,
            upload_id: result.upload_id,
            parts: Vec::new(),
        })
    }

    async fn upload_parts(
        &self,
        upload: &mut MultipartUpload,
        reader: &mut PartReader,
        total: u64,
        progress: &ProgressHandler<StoragePutResult>,
        cancel: &CancellationToken,
    ) -> Result<(), BackendCompletion> {
        let part_size = self.config.multipart_chunk_size.max(1) as usize;
        let mut part_number = 1u32;
        let mut sent = 0u64;

        loop {
            if cancel.is_cancelled() {
                info!(upload_id = %upload.upload_id, part_number, "Multipart upload cancelled");
                return Err(cancelled());
            }

            let part = match reader.next_part(part_size).await {
                Ok(Some(part)) => part,
                Ok(None) => break,
                Err(e) => {
                    return Err(BackendCompletion::no_response(Some(io_error(
                        code::CANNOT_READ_FILE,
                        &e,
                    ))))
                }
            };
            let len = part.len() as u64;

            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
            let response = self
                .send_until_cancelled(
                    cancel,
                    Method::PUT,
                    upload.part_url(part_number),
                    headers,
                    Some(Body::from(part)),
                )
                .await?;

            let status = response.status().as_u16();
            if status != 200 {
                return Err(BackendCompletion::status(status));
            }
            let etag = response
                .headers()
                .get(header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim_matches('"').to_string())
                .ok_or_else(|| malformed(status, "Missing ETag"))?;

            debug!(part_number, len, "Uploaded part");
            upload.parts.push((part_number, etag));
            sent += len;
            progress.handle(Progress::new(sent, Some(total)));
            part_number += 1;
        }

        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        Ok(())
    }

    async fn complete(&self, upload: &MultipartUpload) -> BackendCompletion {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml"),
        );
        let body = xml::complete_multipart_upload(&upload.parts);

        let response = match self
            .send(Method::POST, upload.upload_url(), headers, Some(Body::from(body)))
            .await
        {
            Ok(response) => response,
            Err(completion) => return completion,
        };

        let status = response.status().as_u16();
        if status != 200 {
            return BackendCompletion::status(status);
        }

        // A completion can fail after the 200 header has been sent.
        match response.text().await {
            Ok(text) if text.contains("<Error>") => {
                malformed(status, xml::error_message(&text, status))
            }
            Ok(_) => BackendCompletion::ok(None),
            Err(e) => BackendCompletion {
                status: Some(status),
                payload: None,
                error: Some(transport_error(&e)),
            },
        }
    }

    async fn abort(&self, upload: &MultipartUpload) {
        match self
            .send(Method::DELETE, upload.upload_url(), HeaderMap::new(), None)
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!(upload_id = %upload.upload_id, "Aborted multipart upload")
            }
            Ok(response) => warn!(
                upload_id = %upload.upload_id,
                status = response.status().as_u16(),
                "Failed to abort multipart upload"
            ),
            Err(_) => warn!(upload_id = %upload.upload_id, "Failed to abort multipart upload"),
        }
    }
}
