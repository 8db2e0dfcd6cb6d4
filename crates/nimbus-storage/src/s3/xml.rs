//! S3 XML response bodies

use chrono::{DateTime, Utc};
use quick_xml::escape::escape;
use serde::Deserialize;

use crate::backend::ListedObject;
use crate::error::BackendError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ListBucketResult {
    #[serde(default)]
    pub contents: Vec<Contents>,
    #[serde(default)]
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct Contents {
    pub key: String,
    #[serde(default)]
    pub size: u64,
    pub e_tag: Option<String>,
    pub last_modified: Option<String>,
}

impl From<Contents> for ListedObject {
    fn from(contents: Contents) -> Self {
        Self {
            service_key: contents.key,
            size: contents.size,
            etag: contents.e_tag.map(|etag| etag.trim_matches('"').to_string()),
            last_modified: contents
                .last_modified
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|d| d.with_timezone(&Utc)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct InitiateMultipartUploadResult {
    pub upload_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ErrorBody {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

pub(crate) fn parse<'de, T: Deserialize<'de>>(xml: &'de str) -> Result<T, BackendError> {
    quick_xml::de::from_str(xml).map_err(|e| BackendError::with_source("malformed XML response", e))
}

/// Describe an S3 error response, falling back to the status code
pub(crate) fn error_message(body: &str, status: u16) -> String {
    match parse::<ErrorBody>(body) {
        Ok(err) => format!("S3 error ({}): {}", err.code, err.message),
        Err(_) => format!("S3 error (HTTP{})", status),
    }
}

/// Body of a CompleteMultipartUpload request; ETags are XML-escaped
pub(crate) fn complete_multipart_upload(parts: &[(u32, String)]) -> String {
    let mut xml = String::from("<CompleteMultipartUpload>");
    for (part_number, etag) in parts {
        xml.push_str(&format!(
            "<Part><PartNumber>{}</PartNumber><ETag>\"{}\"</ETag></Part>",
            part_number,
            escape(etag.as_str())
        ));
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}
