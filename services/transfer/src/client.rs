//! Wiring of the transfer layer from configuration.

use crate::api_client::{ApiError, HttpApiClient};
use crate::batch::BatchUploader;
use crate::config::TransferConfig;
use crate::download::FallbackChain;
use crate::export::ExportPipeline;
use crate::queue::ConcurrencyQueue;
use crate::retry::{RetryOrchestrator, RetryPolicy};
use crate::strategy::StrategySelector;
use crate::uploader::HttpUploader;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Uploads and exports sharing one queue and one connection pool
#[derive(Clone)]
pub struct TransferClient {
    api: Arc<HttpApiClient>,
    uploads: BatchUploader,
    exports: ExportPipeline,
}

impl TransferClient {
    pub fn from_config(config: &TransferConfig) -> Result<Self, ApiError> {
        let api = Arc::new(HttpApiClient::new(config.api.clone())?);
        let queue = ConcurrencyQueue::new(config.queue.max_concurrent);

        // Large PUTs and GETs must not inherit the authority request timeout.
        let transfers = Client::builder()
            .build()
            .map_err(|e| ApiError::Client(e.to_string()))?;

        let uploader = Arc::new(HttpUploader::new(
            transfers.clone(),
            config.upload.chunk_size_bytes,
        ));
        let orchestrator = RetryOrchestrator::new(
            api.clone(),
            uploader,
            StrategySelector::new(config.upload.streamed_threshold_bytes),
            RetryPolicy::from_config(&config.retry),
        )
        .with_max_payload(config.upload.max_file_size_bytes);

        let chain = FallbackChain::standard(
            api.clone(),
            api.clone(),
            transfers,
            Duration::from_secs(config.export.read_grant_ttl_secs),
            config.export.strategy_timeout(),
        );

        Ok(Self {
            uploads: BatchUploader::new(queue.clone(), Arc::new(orchestrator)),
            exports: ExportPipeline::new(queue.clone(), Arc::new(chain)),
            api,
        })
    }

    /// Authority client for list and delete
    pub fn api(&self) -> &HttpApiClient {
        &self.api
    }

    pub fn uploads(&self) -> &BatchUploader {
        &self.uploads
    }

    pub fn exports(&self) -> &ExportPipeline {
        &self.exports
    }
}
