//! HTTP client for the grant authority.
//!
//! Bearer-authenticated JSON calls for write/read grants, the authorized
//! proxy download, and the gallery list/delete endpoints.

use crate::config::ApiConfig;
use crate::download::{DownloadError, DownloadedObject, ProxyDownloader};
use crate::grant_client::{validate_write_request, AccessScope, GrantAuthority, GrantError};
use crate::types::{ObjectDescriptor, ReadGrant, WriteGrant};
use crate::uploader::TransferError;
use crate::wire::{
    DeleteObjectRequest, DeleteObjectResponse, ErrorResponse, ListObjectsResponse,
    ProxyDownloadRequest, ProxyDownloadResponse, ReadGrantRequest, ReadGrantResponse,
    WriteGrantRequest, WriteGrantResponse,
};
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Default content type of proxied objects that carry none
const DEFAULT_PROXY_CONTENT_TYPE: &str = "image/jpeg";

/// Errors from the authority API
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Authority returned HTTP {status} ({code}): {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Invalid response body: {0}")]
    InvalidBody(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl From<ApiError> for GrantError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Transport(e) => GrantError::Unreachable(e.to_string()),
            ApiError::Status {
                status, message, ..
            } if status == StatusCode::FORBIDDEN.as_u16() => GrantError::AccessDenied(message),
            ApiError::Status {
                status, message, ..
            } => GrantError::Rejected { status, message },
            ApiError::InvalidBody(message) => GrantError::MalformedResponse(message),
            ApiError::Client(message) => GrantError::Unreachable(message),
        }
    }
}

impl From<ApiError> for DownloadError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Transport(e) => DownloadError::Transfer(TransferError::from(e)),
            ApiError::Status {
                status, message, ..
            } => match StatusCode::from_u16(status) {
                Ok(StatusCode::FORBIDDEN) => DownloadError::AccessDenied(message),
                Ok(StatusCode::NOT_FOUND) => DownloadError::NotFound(message),
                _ => DownloadError::Transfer(TransferError::NetworkOrServer {
                    status: Some(status),
                    message,
                }),
            },
            ApiError::InvalidBody(message) => DownloadError::Decode(message),
            ApiError::Client(message) => DownloadError::Transfer(TransferError::NetworkOrServer {
                status: None,
                message,
            }),
        }
    }
}

/// Bearer-authenticated client for the grant authority
#[derive(Clone)]
pub struct HttpApiClient {
    client: Client,
    config: ApiConfig,
}

impl HttpApiClient {
    /// Create a client with its own connection pool
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ApiError::Client(e.to_string()))?;
        Ok(Self::with_client(client, config))
    }

    /// Create a client sharing an existing connection pool
    pub fn with_client(client: Client, config: ApiConfig) -> Self {
        Self { client, config }
    }

    /// Underlying HTTP client for authority requests
    pub fn http(&self) -> &Client {
        &self.client
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.bearer_token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.config.bearer_token)
        }
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.config.endpoint(path);
        let response = self
            .authorize(self.client.post(&url))
            .json(body)
            .send()
            .await?;
        decode(response).await
    }

    /// List a gallery's objects with display URLs
    #[instrument(skip(self))]
    pub async fn list_objects(
        &self,
        slug: &str,
        caller_identity: &str,
    ) -> Result<Vec<ObjectDescriptor>, ApiError> {
        let url = self.config.endpoint(&self.config.list_path);
        let response = self
            .authorize(self.client.get(&url))
            .query(&[("slug", slug), ("userId", caller_identity)])
            .send()
            .await?;
        let listing: ListObjectsResponse = decode(response).await?;

        debug!(count = listing.images.len(), "Listed objects");
        Ok(listing
            .images
            .into_iter()
            .map(|item| ObjectDescriptor {
                key: item.key,
                display_url: item.presigned_url,
                expires_at: item.expires_at,
            })
            .collect())
    }

    /// Delete one object in the scope's gallery
    #[instrument(skip(self, scope), fields(owner_context = %scope.owner_context))]
    pub async fn delete_object(&self, key: &str, scope: &AccessScope) -> Result<bool, ApiError> {
        let response: DeleteObjectResponse = self
            .post_json(
                &self.config.delete_path,
                &DeleteObjectRequest {
                    key: key.to_string(),
                    owner_context: scope.owner_context.clone(),
                    caller_identity: scope.caller_identity.clone(),
                },
            )
            .await?;
        Ok(response.deleted)
    }
}

/// Turn a response into `R`, or an [`ApiError::Status`] for non-2xx
async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, ApiError> {
    let status = response.status();
    let body = response.bytes().await?;

    if !status.is_success() {
        let (code, message) = match serde_json::from_slice::<ErrorResponse>(&body) {
            Ok(err) => (err.code, err.error),
            Err(_) => (
                "HTTP_ERROR".to_string(),
                String::from_utf8_lossy(&body).chars().take(512).collect(),
            ),
        };
        return Err(ApiError::Status {
            status: status.as_u16(),
            code,
            message,
        });
    }

    serde_json::from_slice(&body).map_err(|e| ApiError::InvalidBody(e.to_string()))
}

#[async_trait]
impl GrantAuthority for HttpApiClient {
    #[instrument(skip(self))]
    async fn request_write_grant(
        &self,
        file_name: &str,
        owner_prefix: &str,
        content_type: &str,
        caller_identity: &str,
    ) -> Result<WriteGrant, GrantError> {
        validate_write_request(file_name, content_type)?;

        let request = WriteGrantRequest {
            file_name: file_name.to_string(),
            prefix: owner_prefix.to_string(),
            content_type: content_type.to_string(),
            caller_identity: caller_identity.to_string(),
        };
        let response: WriteGrantResponse = self
            .post_json(&self.config.upload_grant_path, &request)
            .await?;

        if response.presigned_url.is_empty() || response.key.is_empty() {
            return Err(GrantError::MalformedResponse(
                "write grant without URL or key".to_string(),
            ));
        }

        debug!(object_key = %response.key, expires_in = response.expires_in, "Write grant issued");
        Ok(WriteGrant {
            url: response.presigned_url,
            object_key: response.key,
            bucket: response.bucket,
            expires_in: Duration::from_secs(response.expires_in),
            issued_at: Instant::now(),
        })
    }

    #[instrument(skip(self, scope), fields(owner_context = %scope.owner_context))]
    async fn request_read_grant(
        &self,
        object_key: &str,
        scope: &AccessScope,
        expiry: Duration,
    ) -> Result<ReadGrant, GrantError> {
        let request = ReadGrantRequest {
            image_key: object_key.to_string(),
            owner_context: scope.owner_context.clone(),
            caller_identity: scope.caller_identity.clone(),
            expires_in: Some(expiry.as_secs()),
        };
        let response: ReadGrantResponse = self
            .post_json(&self.config.read_grant_path, &request)
            .await?;

        Ok(ReadGrant {
            url: response.url,
            expires_in: Duration::from_secs(response.expires_in),
            issued_at: Instant::now(),
        })
    }
}

#[async_trait]
impl ProxyDownloader for HttpApiClient {
    #[instrument(skip(self, scope), fields(owner_context = %scope.owner_context))]
    async fn download_via_proxy(
        &self,
        object_key: &str,
        scope: &AccessScope,
    ) -> Result<DownloadedObject, DownloadError> {
        let request = ProxyDownloadRequest {
            image_key: object_key.to_string(),
            owner_context: scope.owner_context.clone(),
            caller_identity: scope.caller_identity.clone(),
        };
        let response: ProxyDownloadResponse = self
            .post_json(&self.config.proxy_download_path, &request)
            .await?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(response.data.as_bytes())
            .map_err(|e| DownloadError::Decode(e.to_string()))?;
        let content_type = if response.content_type.is_empty() {
            DEFAULT_PROXY_CONTENT_TYPE.to_string()
        } else {
            response.content_type
        };

        Ok(DownloadedObject {
            bytes: Bytes::from(bytes),
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16, message: &str) -> ApiError {
        ApiError::Status {
            status,
            code: "X".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_status_maps_to_grant_error() {
        assert_eq!(
            GrantError::from(status(403, "not yours")),
            GrantError::AccessDenied("not yours".to_string())
        );
        assert_eq!(
            GrantError::from(status(413, "quota")),
            GrantError::Rejected {
                status: 413,
                message: "quota".to_string()
            }
        );
        assert!(matches!(
            GrantError::from(ApiError::InvalidBody("eof".into())),
            GrantError::MalformedResponse(_)
        ));
    }

    #[test]
    fn test_status_maps_to_download_error() {
        assert!(matches!(
            DownloadError::from(status(403, "denied")),
            DownloadError::AccessDenied(_)
        ));
        assert!(matches!(
            DownloadError::from(status(404, "gone")),
            DownloadError::NotFound(_)
        ));
        assert!(matches!(
            DownloadError::from(status(500, "boom")),
            DownloadError::Transfer(TransferError::NetworkOrServer {
                status: Some(500),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_invalid_write_request_never_hits_network() {
        // Nothing listens on this address; validation must fail first.
        let client = HttpApiClient::new(ApiConfig::new("http://127.0.0.1:9")).unwrap();
        let err = client
            .request_write_grant("", "party", "image/jpeg", "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, GrantError::InvalidRequest(_)));
    }
}
