//! Download fallback chain.
//!
//! An object is fetched by trying an ordered list of strategies, each
//! independently time-boxed, until one succeeds:
//!
//! 1. [`AuthorizedProxyDownload`]: bytes come back inline from the grant
//!    authority after its own access check.
//! 2. [`FreshGrantDownload`]: a new short-lived read grant, then a direct GET
//!    against the object store.

use crate::grant_client::{AccessScope, GrantAuthority, GrantError};
use crate::keys::{content_type_for, member_name_from_key};
use crate::types::{FailureKind, ObjectDescriptor, ReadGrant};
use crate::uploader::TransferError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Errors from a download strategy
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DownloadError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Grant(#[from] GrantError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Download strategy timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Invalid payload: {0}")]
    Decode(String),

    #[error("No download strategy configured")]
    NoStrategy,
}

impl DownloadError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DownloadError::AccessDenied(_) => FailureKind::AccessDenied,
            DownloadError::Grant(GrantError::AccessDenied(_)) => FailureKind::AccessDenied,
            DownloadError::Grant(_) => FailureKind::Grant,
            DownloadError::Transfer(err) => err.kind(),
            DownloadError::TimedOut(_) => FailureKind::Timeout,
            DownloadError::NotFound(_) | DownloadError::Decode(_) | DownloadError::NoStrategy => {
                FailureKind::NetworkOrServer
            }
        }
    }
}

/// Object bytes plus their stored content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedObject {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Fetches object bytes through an intermediary that checks access
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProxyDownloader: Send + Sync {
    async fn download_via_proxy(
        &self,
        object_key: &str,
        scope: &AccessScope,
    ) -> Result<DownloadedObject, DownloadError>;
}

/// One way of getting an object's bytes
#[async_trait]
pub trait DownloadStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(
        &self,
        object: &ObjectDescriptor,
        scope: &AccessScope,
    ) -> Result<DownloadedObject, DownloadError>;
}

/// Inline download through the authority
pub struct AuthorizedProxyDownload {
    proxy: Arc<dyn ProxyDownloader>,
}

impl AuthorizedProxyDownload {
    pub fn new(proxy: Arc<dyn ProxyDownloader>) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl DownloadStrategy for AuthorizedProxyDownload {
    fn name(&self) -> &'static str {
        "authorized_proxy"
    }

    async fn fetch(
        &self,
        object: &ObjectDescriptor,
        scope: &AccessScope,
    ) -> Result<DownloadedObject, DownloadError> {
        self.proxy.download_via_proxy(&object.key, scope).await
    }
}

/// Direct GET under a freshly issued read grant
pub struct FreshGrantDownload {
    grants: Arc<dyn GrantAuthority>,
    client: Client,
    ttl: Duration,
}

impl FreshGrantDownload {
    pub fn new(grants: Arc<dyn GrantAuthority>, client: Client, ttl: Duration) -> Self {
        Self {
            grants,
            client,
            ttl,
        }
    }
}

#[async_trait]
impl DownloadStrategy for FreshGrantDownload {
    fn name(&self) -> &'static str {
        "fresh_grant"
    }

    async fn fetch(
        &self,
        object: &ObjectDescriptor,
        scope: &AccessScope,
    ) -> Result<DownloadedObject, DownloadError> {
        let grant = self
            .grants
            .request_read_grant(&object.key, scope, self.ttl)
            .await?;
        fetch_with_read_grant(&self.client, &grant, &object.key).await
    }
}

/// GET an object through a read grant
#[instrument(skip(client, grant))]
pub async fn fetch_with_read_grant(
    client: &Client,
    grant: &ReadGrant,
    object_key: &str,
) -> Result<DownloadedObject, DownloadError> {
    let response = client
        .get(&grant.url)
        .send()
        .await
        .map_err(TransferError::from)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(match status {
            StatusCode::NOT_FOUND => DownloadError::NotFound(object_key.to_string()),
            _ => TransferError::http(status, &body).into(),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| content_type_for(member_name_from_key(object_key)).to_string());
    let bytes = response.bytes().await.map_err(TransferError::from)?;

    debug!(size = bytes.len(), "Fetched object");
    Ok(DownloadedObject {
        bytes,
        content_type,
    })
}

/// Which strategy produced an object, and how many fell through before it
#[derive(Debug, Clone)]
pub struct ChainSuccess {
    pub object: DownloadedObject,
    pub strategy: &'static str,
    pub fallbacks: usize,
}

/// Ordered strategies, first success wins
pub struct FallbackChain {
    strategies: Vec<Arc<dyn DownloadStrategy>>,
    strategy_timeout: Duration,
}

impl FallbackChain {
    pub fn new(strategies: Vec<Arc<dyn DownloadStrategy>>, strategy_timeout: Duration) -> Self {
        Self {
            strategies,
            strategy_timeout,
        }
    }

    /// Proxy first, then a fresh read grant
    pub fn standard(
        proxy: Arc<dyn ProxyDownloader>,
        grants: Arc<dyn GrantAuthority>,
        client: Client,
        read_grant_ttl: Duration,
        strategy_timeout: Duration,
    ) -> Self {
        let proxy: Arc<dyn DownloadStrategy> = Arc::new(AuthorizedProxyDownload::new(proxy));
        let fresh: Arc<dyn DownloadStrategy> =
            Arc::new(FreshGrantDownload::new(grants, client, read_grant_ttl));
        Self::new(vec![proxy, fresh], strategy_timeout)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try each strategy in order; the error of the last one is returned
    /// when all fail.
    #[instrument(skip(self, object, scope), fields(object_key = %object.key))]
    pub async fn fetch(
        &self,
        object: &ObjectDescriptor,
        scope: &AccessScope,
    ) -> Result<ChainSuccess, DownloadError> {
        let mut last_error = DownloadError::NoStrategy;

        for (index, strategy) in self.strategies.iter().enumerate() {
            let attempt =
                tokio::time::timeout(self.strategy_timeout, strategy.fetch(object, scope)).await;

            match attempt {
                Ok(Ok(downloaded)) => {
                    if index > 0 {
                        metrics::counter!("transfer.export.fallbacks").increment(1);
                    }
                    debug!(strategy = strategy.name(), "Download succeeded");
                    return Ok(ChainSuccess {
                        object: downloaded,
                        strategy: strategy.name(),
                        fallbacks: index,
                    });
                }
                Ok(Err(e)) => {
                    warn!(strategy = strategy.name(), error = %e, "Download strategy failed");
                    last_error = e;
                }
                Err(_) => {
                    warn!(strategy = strategy.name(), "Download strategy timed out");
                    last_error = DownloadError::TimedOut(self.strategy_timeout);
                }
            }
        }

        Err(last_error)
    }
}
