//! Key derivation and request validation
//!
//! Every validator returns on the first violated rule. Callers run all the
//! validators that apply to a request before any network call is made; the
//! request types in [`crate::types`] do this through their `validate` methods.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::types::{AccessLevel, TransferDestination, UploadSize, UploadSource};

/// Prefix applied to every user metadata key on the wire
pub const METADATA_KEY_PREFIX: &str = "x-amz-meta-";

/// Uploads strictly larger than this many bytes are classified as large
pub const LARGE_UPLOAD_THRESHOLD: u64 = 10_000_000;

/// Key prefix for an access level.
///
/// `identity_id` is only used for `protected` and `private`, where it must be
/// non-empty.
pub fn access_level_prefix(access_level: AccessLevel, identity_id: &str) -> String {
    if access_level.has_identity_segment() {
        format!("{}/{}/", access_level, identity_id)
    } else {
        format!("{}/", access_level)
    }
}

/// Backend storage key for a logical key
pub fn derive_service_key(access_level: AccessLevel, identity_id: &str, key: &str) -> String {
    access_level_prefix(access_level, identity_id) + key
}

/// Rewrite user metadata keys with [`METADATA_KEY_PREFIX`]
pub fn service_metadata(
    metadata: Option<&HashMap<String, String>>,
) -> Option<HashMap<String, String>> {
    metadata.map(|metadata| {
        metadata
            .iter()
            .map(|(k, v)| (format!("{}{}", METADATA_KEY_PREFIX, k), v.clone()))
            .collect()
    })
}

pub fn validate_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::KeyIsEmpty);
    }
    Ok(())
}

pub fn validate_path(path: Option<&str>) -> Result<(), ValidationError> {
    if path.is_some_and(str::is_empty) {
        return Err(ValidationError::PathIsEmpty);
    }
    Ok(())
}

pub fn validate_content_type(content_type: Option<&str>) -> Result<(), ValidationError> {
    if content_type.is_some_and(str::is_empty) {
        return Err(ValidationError::ContentTypeIsEmpty);
    }
    Ok(())
}

pub fn validate_metadata(
    metadata: Option<&HashMap<String, String>>,
) -> Result<(), ValidationError> {
    let Some(metadata) = metadata else {
        return Ok(());
    };
    if metadata.keys().any(|k| *k != k.to_lowercase()) {
        return Err(ValidationError::MetadataKeysInvalid);
    }
    Ok(())
}

/// Private objects are never addressable through another identity.
pub fn validate_target_identity(
    target_identity_id: Option<&str>,
    access_level: AccessLevel,
) -> Result<(), ValidationError> {
    let Some(target) = target_identity_id else {
        return Ok(());
    };
    if target.is_empty() {
        return Err(ValidationError::IdentityIdIsEmpty);
    }
    if access_level == AccessLevel::Private {
        return Err(ValidationError::PrivateWithTarget);
    }
    Ok(())
}

pub fn validate_destination(destination: &TransferDestination) -> Result<(), ValidationError> {
    match destination {
        TransferDestination::Url {
            expires: Some(expires),
        } if *expires <= 0 => Err(ValidationError::ExpiresIsInvalid),
        _ => Ok(()),
    }
}

/// Classify an upload by payload size.
///
/// A file whose size cannot be read is treated as a normal upload; the
/// failure is logged rather than returned. File sizes are read with
/// `tokio::fs`, so this is called from the transfer task rather than from
/// `TransferOrchestrator::put`.
pub async fn classify_upload_size(source: &UploadSource) -> UploadSize {
    let size = match source {
        UploadSource::Data(data) => data.len() as u64,
        UploadSource::File(path) => match file_size(path).await {
            Ok(size) => size,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read upload file size");
                return UploadSize::Normal;
            }
        },
    };
    debug!(size, "Classifying upload");

    if size > LARGE_UPLOAD_THRESHOLD {
        UploadSize::Large
    } else {
        UploadSize::Normal
    }
}

async fn file_size(path: &Path) -> std::io::Result<u64> {
    Ok(tokio::fs::metadata(path).await?.len())
}
