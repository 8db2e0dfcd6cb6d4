//! Storage configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Static access credentials used to sign backend requests
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Temporary session token, if the credentials are short-lived
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Object store endpoint URL
    pub endpoint: String,
    /// Bucket holding every object
    pub bucket: String,
    /// Signing region
    pub region: String,
    /// Signing credentials; requests go out unsigned without them
    pub credentials: Option<Credentials>,
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Multipart chunk size (bytes)
    pub multipart_chunk_size: u64,
    /// Expiry for pre-signed URLs when the request sets none (seconds)
    pub default_url_expiry: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            bucket: "nimbus".to_string(),
            region: "us-east-1".to_string(),
            credentials: None,
            timeout: Duration::from_secs(30),
            user_agent: format!("nimbus-storage/{}", env!("CARGO_PKG_VERSION")),
            multipart_chunk_size: 8 * 1024 * 1024, // 8 MB
            default_url_expiry: 18_000,            // 5 hours
        }
    }
}

impl StorageConfig {
    /// Create a new config with the given endpoint and bucket
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Set the signing credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the signing region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the multipart chunk size
    pub fn with_multipart_chunk_size(mut self, chunk_size: u64) -> Self {
        self.multipart_chunk_size = chunk_size;
        self
    }

    /// Set the default pre-signed URL expiry
    pub fn with_default_url_expiry(mut self, secs: u64) -> Self {
        self.default_url_expiry = secs;
        self
    }

    /// Endpoint without a trailing slash
    pub fn base_url(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }
}
