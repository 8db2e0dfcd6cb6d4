//! Common types for the storage core

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use url::Url;

use crate::error::ValidationError;
use crate::policy;

/// Visibility scope of a stored object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[default]
    Public,
    Protected,
    Private,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Protected => "protected",
            Self::Private => "private",
        }
    }

    /// Whether keys at this level are namespaced by an identity
    pub fn has_identity_segment(&self) -> bool {
        matches!(self, Self::Protected | Self::Private)
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a download should land
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TransferDestination {
    /// Keep the object in memory
    #[default]
    Data,
    /// Write the object to a local file
    File(PathBuf),
    /// Produce a pre-signed URL, optionally expiring after `expires` seconds
    Url { expires: Option<i64> },
}

/// What an upload reads from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadSource {
    Data(Bytes),
    File(PathBuf),
}

/// Whether an upload goes out in one request or as a multipart upload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadSize {
    Normal,
    Large,
}

/// Result of a completed get
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageGetResult {
    /// Object data, for in-memory downloads
    Data(Bytes),
    /// Location of the downloaded file
    File(PathBuf),
    /// Pre-signed URL
    Url(Url),
}

impl StorageGetResult {
    pub fn data(&self) -> Option<&Bytes> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }
}

/// Result of a completed put or remove
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoragePutResult {
    /// The caller's logical key
    pub key: String,
}

/// A single listed object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageListItem {
    /// Logical key, with the access level prefix removed
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// ETag
    pub etag: Option<String>,
    /// Last modified time
    pub last_modified: Option<DateTime<Utc>>,
}

/// Result of listing objects
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageListResult {
    pub items: Vec<StorageListItem>,
}

/// Download an object into memory, a file, or a pre-signed URL
#[derive(Clone, Debug, Default)]
pub struct StorageGetRequest {
    pub key: String,
    pub access_level: AccessLevel,
    /// Read another identity's protected objects
    pub target_identity_id: Option<String>,
    pub destination: TransferDestination,
}

impl StorageGetRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_access_level(mut self, access_level: AccessLevel) -> Self {
        self.access_level = access_level;
        self
    }

    pub fn with_target_identity(mut self, identity_id: impl Into<String>) -> Self {
        self.target_identity_id = Some(identity_id.into());
        self
    }

    pub fn with_destination(mut self, destination: TransferDestination) -> Self {
        self.destination = destination;
        self
    }

    /// Run every applicable validator, returning the first failure
    pub fn validate(&self) -> Result<(), ValidationError> {
        policy::validate_target_identity(self.target_identity_id.as_deref(), self.access_level)?;
        policy::validate_key(&self.key)?;
        policy::validate_destination(&self.destination)
    }
}

/// Upload an object from memory or a file
#[derive(Clone, Debug)]
pub struct StoragePutRequest {
    pub key: String,
    pub source: UploadSource,
    pub access_level: AccessLevel,
    pub content_type: Option<String>,
    /// User metadata; keys must be lowercase
    pub metadata: Option<HashMap<String, String>>,
}

impl StoragePutRequest {
    pub fn new(key: impl Into<String>, source: UploadSource) -> Self {
        Self {
            key: key.into(),
            source,
            access_level: AccessLevel::default(),
            content_type: None,
            metadata: None,
        }
    }

    pub fn with_access_level(mut self, access_level: AccessLevel) -> Self {
        self.access_level = access_level;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        policy::validate_key(&self.key)?;
        policy::validate_content_type(self.content_type.as_deref())?;
        policy::validate_metadata(self.metadata.as_ref())
    }
}

/// List objects under an optional path
#[derive(Clone, Debug, Default)]
pub struct StorageListRequest {
    pub access_level: AccessLevel,
    pub target_identity_id: Option<String>,
    pub path: Option<String>,
}

impl StorageListRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_access_level(mut self, access_level: AccessLevel) -> Self {
        self.access_level = access_level;
        self
    }

    pub fn with_target_identity(mut self, identity_id: impl Into<String>) -> Self {
        self.target_identity_id = Some(identity_id.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        policy::validate_target_identity(self.target_identity_id.as_deref(), self.access_level)?;
        policy::validate_path(self.path.as_deref())
    }
}

/// Remove a single object
#[derive(Clone, Debug, Default)]
pub struct StorageRemoveRequest {
    pub key: String,
    pub access_level: AccessLevel,
}

impl StorageRemoveRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_access_level(mut self, access_level: AccessLevel) -> Self {
        self.access_level = access_level;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        policy::validate_key(&self.key)
    }
}
