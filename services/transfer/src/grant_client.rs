//! Grant acquisition.
//!
//! A grant authority exchanges a file name, owner prefix, content type and
//! caller identity for a signed, time-limited write URL, or an object key for
//! a time-limited read URL. Nothing local is mutated by a grant request.

use crate::types::{ReadGrant, WriteGrant};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from the grant authority
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GrantError {
    #[error("Invalid grant request: {0}")]
    InvalidRequest(String),

    #[error("Grant authority unreachable: {0}")]
    Unreachable(String),

    #[error("Grant authority rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Malformed grant response: {0}")]
    MalformedResponse(String),
}

/// Who is asking, and for which owner context (e.g. an event slug)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessScope {
    pub owner_context: String,
    pub caller_identity: String,
}

impl AccessScope {
    pub fn new(owner_context: impl Into<String>, caller_identity: impl Into<String>) -> Self {
        Self {
            owner_context: owner_context.into(),
            caller_identity: caller_identity.into(),
        }
    }
}

/// Issues write and read grants
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GrantAuthority: Send + Sync {
    /// Request a write grant; the object key is
    /// `{owner_prefix}/{caller_identity}/{timestamp_ms}-{file_name}`.
    async fn request_write_grant(
        &self,
        file_name: &str,
        owner_prefix: &str,
        content_type: &str,
        caller_identity: &str,
    ) -> Result<WriteGrant, GrantError>;

    /// Request a read grant for an existing object
    async fn request_read_grant(
        &self,
        object_key: &str,
        scope: &AccessScope,
        expiry: Duration,
    ) -> Result<ReadGrant, GrantError>;
}

/// Check the inputs of a write grant request
pub fn validate_write_request(file_name: &str, content_type: &str) -> Result<(), GrantError> {
    if file_name.trim().is_empty() {
        return Err(GrantError::InvalidRequest("file name is empty".to_string()));
    }
    if file_name.contains('/') {
        return Err(GrantError::InvalidRequest(format!(
            "file name must not contain '/': {}",
            file_name
        )));
    }
    if !is_valid_mime(content_type) {
        return Err(GrantError::InvalidRequest(format!(
            "not a valid content type: {:?}",
            content_type
        )));
    }
    Ok(())
}

/// `type/subtype` with RFC 6838 token characters, parameters allowed
pub fn is_valid_mime(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    let Some((kind, subtype)) = essence.split_once('/') else {
        return false;
    };

    let is_token = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "!#$&-^_.+".contains(c))
    };

    is_token(kind) && is_token(subtype)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_mime_types() {
        assert!(is_valid_mime("image/jpeg"));
        assert!(is_valid_mime("video/quicktime"));
        assert!(is_valid_mime("application/vnd.api+json"));
        assert!(is_valid_mime("text/plain; charset=utf-8"));
    }

    #[test]
    fn test_invalid_mime_types() {
        assert!(!is_valid_mime(""));
        assert!(!is_valid_mime("jpeg"));
        assert!(!is_valid_mime("image/"));
        assert!(!is_valid_mime("/jpeg"));
        assert!(!is_valid_mime("image/jp eg"));
    }

    #[test]
    fn test_validate_write_request() {
        assert!(validate_write_request("cake.jpg", "image/jpeg").is_ok());
        assert!(matches!(
            validate_write_request("", "image/jpeg"),
            Err(GrantError::InvalidRequest(_))
        ));
        assert!(matches!(
            validate_write_request("../cake.jpg", "image/jpeg"),
            Err(GrantError::InvalidRequest(_))
        ));
        assert!(matches!(
            validate_write_request("cake.jpg", "whatever"),
            Err(GrantError::InvalidRequest(_))
        ));
    }
}
