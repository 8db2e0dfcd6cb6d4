//! Storage error types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;

/// A user-facing description paired with a recovery suggestion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorText {
    pub description: &'static str,
    pub recovery_suggestion: &'static str,
}

impl ErrorText {
    const fn new(description: &'static str, recovery_suggestion: &'static str) -> Self {
        Self {
            description,
            recovery_suggestion,
        }
    }
}

/// Fixed user-visible error strings, keyed by error kind.
pub mod text {
    use super::ErrorText;

    pub const KEY_IS_EMPTY: ErrorText = ErrorText::new(
        "The key is empty",
        "Specify a non-empty key for the object.",
    );
    pub const PATH_IS_EMPTY: ErrorText = ErrorText::new(
        "The path is empty",
        "Omit the path or specify a non-empty one.",
    );
    pub const CONTENT_TYPE_IS_EMPTY: ErrorText = ErrorText::new(
        "The content type is empty",
        "Omit the content type or specify a non-empty one.",
    );
    pub const METADATA_KEYS_INVALID: ErrorText = ErrorText::new(
        "Metadata keys must be lowercase",
        "Convert every metadata key to lowercase.",
    );
    pub const IDENTITY_ID_IS_EMPTY: ErrorText = ErrorText::new(
        "The target identity id is empty",
        "Omit the target identity id or specify a non-empty one.",
    );
    pub const PRIVATE_WITH_TARGET: ErrorText = ErrorText::new(
        "A target identity id cannot be used with the private access level",
        "Use the protected access level to read another identity's objects.",
    );
    pub const EXPIRES_IS_INVALID: ErrorText = ErrorText::new(
        "The expiry must be greater than zero",
        "Specify a positive number of seconds for the URL expiry.",
    );
    pub const KEY_NOT_FOUND: ErrorText = ErrorText::new(
        "The key was not found",
        "Make sure the key exists before downloading it.",
    );
    pub const HTTP_STATUS: ErrorText = ErrorText::new("", "Check the status code");
    pub const TASK_CREATION: ErrorText =
        ErrorText::new("", "Check the backend configuration and try again.");
    pub const MISSING_HTTP_STATUS: ErrorText = ErrorText::new("Missing HTTP Status", "");
    pub const NO_TASK: ErrorText = ErrorText::new("No ContinuationBlock data", "");
    pub const STREAM_CLOSED: ErrorText =
        ErrorText::new("Transfer ended without a completion signal", "");
}

/// Request validation failures, raised before any network call.
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{}", text::KEY_IS_EMPTY.description)]
    KeyIsEmpty,
    #[error("{}", text::PATH_IS_EMPTY.description)]
    PathIsEmpty,
    #[error("{}", text::CONTENT_TYPE_IS_EMPTY.description)]
    ContentTypeIsEmpty,
    #[error("{}", text::METADATA_KEYS_INVALID.description)]
    MetadataKeysInvalid,
    #[error("{}", text::IDENTITY_ID_IS_EMPTY.description)]
    IdentityIdIsEmpty,
    #[error("{}", text::PRIVATE_WITH_TARGET.description)]
    PrivateWithTarget,
    #[error("{}", text::EXPIRES_IS_INVALID.description)]
    ExpiresIsInvalid,
}

impl ValidationError {
    pub fn text(&self) -> ErrorText {
        match self {
            Self::KeyIsEmpty => text::KEY_IS_EMPTY,
            Self::PathIsEmpty => text::PATH_IS_EMPTY,
            Self::ContentTypeIsEmpty => text::CONTENT_TYPE_IS_EMPTY,
            Self::MetadataKeysInvalid => text::METADATA_KEYS_INVALID,
            Self::IdentityIdIsEmpty => text::IDENTITY_ID_IS_EMPTY,
            Self::PrivateWithTarget => text::PRIVATE_WITH_TARGET,
            Self::ExpiresIsInvalid => text::EXPIRES_IS_INVALID,
        }
    }

    pub fn description(&self) -> &'static str {
        self.text().description
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        self.text().recovery_suggestion
    }
}

/// Failures reported by a transfer, delivered as a terminal event.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum TransferError {
    /// The object does not exist
    #[error("{description}")]
    NotFound {
        description: String,
        recovery_suggestion: String,
    },

    /// The backend answered with a non-200 status
    #[error("{description}")]
    HttpStatusError {
        status: u16,
        description: String,
        recovery_suggestion: String,
    },

    /// The request was rejected before a transfer started
    #[error("{0}")]
    Validation(ValidationError),

    /// Anything else
    #[error("{description}")]
    Unknown {
        description: String,
        recovery_suggestion: String,
    },
}

impl TransferError {
    pub fn not_found() -> Self {
        Self::NotFound {
            description: text::KEY_NOT_FOUND.description.to_string(),
            recovery_suggestion: text::KEY_NOT_FOUND.recovery_suggestion.to_string(),
        }
    }

    pub fn http_status(status: u16) -> Self {
        Self::HttpStatusError {
            status,
            description: format!("status code {}", status),
            recovery_suggestion: text::HTTP_STATUS.recovery_suggestion.to_string(),
        }
    }

    pub fn unknown(description: impl Into<String>, recovery_suggestion: impl Into<String>) -> Self {
        Self::Unknown {
            description: description.into(),
            recovery_suggestion: recovery_suggestion.into(),
        }
    }

    pub(crate) fn from_text(text: ErrorText) -> Self {
        Self::unknown(text.description, text.recovery_suggestion)
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Validation(err) => err.description(),
            Self::NotFound { description, .. }
            | Self::HttpStatusError { description, .. }
            | Self::Unknown { description, .. } => description,
        }
    }

    pub fn recovery_suggestion(&self) -> &str {
        match self {
            Self::Validation(err) => err.recovery_suggestion(),
            Self::NotFound {
                recovery_suggestion,
                ..
            }
            | Self::HttpStatusError {
                recovery_suggestion,
                ..
            }
            | Self::Unknown {
                recovery_suggestion,
                ..
            } => recovery_suggestion,
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The validation failure, if the request never reached a backend
    pub fn validation(&self) -> Option<ValidationError> {
        match self {
            Self::Validation(err) => Some(*err),
            _ => None,
        }
    }
}

impl From<ValidationError> for TransferError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

/// Error raised by a transfer backend outside of a transfer's completion,
/// e.g. when a task cannot be created or a listing fails.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct BackendError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl BackendError {
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

    /// Message of the innermost error in the source chain.
    pub fn inner_message(&self) -> String {
        let mut current: &(dyn std::error::Error + 'static) = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current.to_string()
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        Self::with_source("HTTP request failed", err)
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source("I/O failed", err)
    }
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Request validation failed
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Transfer failed
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Backend error
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}
