//! API client error types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ApiError>;

/// A token provider could not produce a token
#[derive(Error, Debug)]
#[error("{message}")]
pub struct AuthTokenError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl AuthTokenError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// API client errors
#[derive(Error, Debug)]
pub enum ApiError {
    /// The request could not be built
    #[error("{description}")]
    Unknown {
        description: String,
        recovery_suggestion: String,
    },

    /// A collaborator failed while the request was being built
    #[error("{description}")]
    Operation {
        description: String,
        recovery_suggestion: String,
        #[source]
        source: AuthTokenError,
    },

    /// The server answered with a non-success status
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A header value could not be encoded
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApiError {
    pub fn unknown(description: impl Into<String>, recovery_suggestion: impl Into<String>) -> Self {
        Self::Unknown {
            description: description.into(),
            recovery_suggestion: recovery_suggestion.into(),
        }
    }

    /// Check if the server answered with `status`
    pub fn is_status(&self, status: u16) -> bool {
        matches!(self, Self::HttpStatus { status: s, .. } if *s == status)
    }
}
