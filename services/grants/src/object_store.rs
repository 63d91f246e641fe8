//! Bucket access behind a trait so the API can be exercised without S3.

use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client as S3Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors from the object store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Failed to sign URL: {0}")]
    Presign(String),

    #[error("Object store request failed: {0}")]
    Backend(String),
}

/// Operations the grant service needs from a bucket
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Signed PUT URL bound to `content_type`
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<String, StoreError>;

    /// Signed GET URL
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StoreError>;

    /// Object bytes and stored content type
    async fn fetch(&self, key: &str) -> Result<(Vec<u8>, Option<String>), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Keys under `prefix`, in store order
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// S3-compatible bucket (AWS, MinIO, LocalStack)
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn presigning(ttl: Duration) -> Result<PresigningConfig, StoreError> {
    PresigningConfig::expires_in(ttl).map_err(|e| StoreError::Presign(e.to_string()))
}

fn backend<E>(e: E) -> StoreError
where
    E: std::error::Error,
{
    StoreError::Backend(DisplayErrorContext(e).to_string())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning(ttl)?)
            .await
            .map_err(|e| StoreError::Presign(DisplayErrorContext(e).to_string()))?;

        Ok(presigned.uri().to_string())
    }

    #[instrument(skip(self))]
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StoreError> {
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning(ttl)?)
            .await
            .map_err(|e| StoreError::Presign(DisplayErrorContext(e).to_string()))?;

        Ok(presigned.uri().to_string())
    }

    #[instrument(skip(self))]
    async fn fetch(&self, key: &str) -> Result<(Vec<u8>, Option<String>), StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .is_some_and(|service| service.is_no_such_key());
                if missing {
                    StoreError::NotFound(key.to_string())
                } else {
                    backend(e)
                }
            })?;

        let content_type = output.content_type().map(str::to_string);
        let data = output.body.collect().await.map_err(backend)?.into_bytes();

        debug!(size_bytes = data.len(), "Fetched object");
        Ok((data.to_vec(), content_type))
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(backend)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(backend)?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
        }

        debug!(count = keys.len(), "Listed objects");
        Ok(keys)
    }
}
