//! JSON bodies exchanged with the grant authority.
//!
//! Field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Write grant request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteGrantRequest {
    pub file_name: String,
    pub prefix: String,
    pub content_type: String,
    pub caller_identity: String,
}

/// Write grant response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteGrantResponse {
    pub presigned_url: String,
    pub key: String,
    pub bucket: String,
    pub expires_in: u64,
}

/// Read grant request for an existing object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadGrantRequest {
    pub image_key: String,
    pub owner_context: String,
    pub caller_identity: String,
    /// Requested lifetime; the authority may clamp it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

/// Read grant response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadGrantResponse {
    pub url: String,
    pub expires_in: u64,
}

/// Authorized proxy download request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyDownloadRequest {
    pub image_key: String,
    pub owner_context: String,
    pub caller_identity: String,
}

/// Authorized proxy download response; `data` is base64
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyDownloadResponse {
    pub data: String,
    pub content_type: String,
}

/// One entry of the list-objects response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedObject {
    pub key: String,
    pub presigned_url: String,
    pub expires_at: DateTime<Utc>,
}

/// List-objects response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListObjectsResponse {
    pub images: Vec<ListedObject>,
}

/// Delete-object request, scoped like a read
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteObjectRequest {
    pub key: String,
    pub owner_context: String,
    pub caller_identity: String,
}

/// Delete-object response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteObjectResponse {
    pub deleted: bool,
}

/// Error body returned by the grant authority
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
