//! Export of a gallery selection into one ZIP archive.
//!
//! Every selected object is downloaded through the fallback chain as its own
//! queued task. Each task tags its own outcome, so the join never
//! short-circuits: one object failing both strategies only removes that
//! object from the archive.

use crate::archive::{Archive, ArchiveError};
use crate::download::FallbackChain;
use crate::grant_client::AccessScope;
use crate::queue::ConcurrencyQueue;
use crate::types::{BatchSummary, FailureKind, ObjectDescriptor, TransferOutcome};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Errors that abort a whole export
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Nothing selected for export")]
    EmptySelection,

    #[error("Archive assembly failed: {0}")]
    ArchiveAssembly(#[from] ArchiveError),
}

/// Result for one selected object
#[derive(Debug, Clone, Serialize)]
pub struct ExportItemReport {
    pub key: String,
    /// Member name inside the archive, for successful downloads
    pub member_name: Option<String>,
    /// Strategy that produced the bytes
    pub strategy: Option<&'static str>,
    pub outcome: TransferOutcome,
}

/// Archive plus per-item results in selection order
#[derive(Debug, Clone)]
pub struct ExportReport {
    /// Serialized ZIP; `None` when no object could be downloaded
    pub archive: Option<Vec<u8>>,
    pub items: Vec<ExportItemReport>,
    pub summary: BatchSummary,
}

/// Downloads a selection and bundles it
#[derive(Clone)]
pub struct ExportPipeline {
    queue: ConcurrencyQueue,
    chain: Arc<FallbackChain>,
}

impl ExportPipeline {
    pub fn new(queue: ConcurrencyQueue, chain: Arc<FallbackChain>) -> Self {
        Self { queue, chain }
    }

    #[instrument(skip_all, fields(owner_context = %scope.owner_context, selected = selection.len()))]
    pub async fn export(
        &self,
        selection: &[ObjectDescriptor],
        scope: &AccessScope,
    ) -> Result<ExportReport, ExportError> {
        if selection.is_empty() {
            return Err(ExportError::EmptySelection);
        }
        debug!(strategies = ?self.chain.strategy_names(), "Starting export");

        let handles: Vec<_> = selection
            .iter()
            .cloned()
            .map(|object| {
                let chain = self.chain.clone();
                let scope = scope.clone();
                self.queue
                    .submit(async move { chain.fetch(&object, &scope).await })
            })
            .collect();
        let results = join_all(handles).await;

        // Members are added in selection order so names are stable across runs.
        let mut archive = Archive::new();
        let mut items = Vec::with_capacity(selection.len());
        for (index, (object, result)) in selection.iter().zip(results).enumerate() {
            let item = match result {
                Ok(Ok(success)) => {
                    let size = success.object.bytes.len() as u64;
                    let member = archive.add_object(&object.key, index, success.object.bytes);
                    metrics::counter!("transfer.export.items.succeeded").increment(1);
                    ExportItemReport {
                        key: object.key.clone(),
                        member_name: Some(member),
                        strategy: Some(success.strategy),
                        outcome: TransferOutcome::Success {
                            bytes_transferred: size,
                        },
                    }
                }
                Ok(Err(e)) => {
                    warn!(object_key = %object.key, error = %e, "Object could not be downloaded");
                    metrics::counter!("transfer.export.items.failed").increment(1);
                    ExportItemReport {
                        key: object.key.clone(),
                        member_name: None,
                        strategy: None,
                        outcome: TransferOutcome::failure(e.kind(), e.to_string()),
                    }
                }
                Err(e) => {
                    error!(object_key = %object.key, error = %e, "Download task panicked");
                    metrics::counter!("transfer.export.items.failed").increment(1);
                    ExportItemReport {
                        key: object.key.clone(),
                        member_name: None,
                        strategy: None,
                        outcome: TransferOutcome::failure(
                            FailureKind::NetworkOrServer,
                            e.to_string(),
                        ),
                    }
                }
            };
            items.push(item);
        }

        let summary = BatchSummary::from_outcomes(items.iter().map(|item| &item.outcome));
        let archive = if archive.is_empty() {
            None
        } else {
            Some(archive.serialize()?)
        };

        info!(
            summary = %summary,
            archive_bytes = archive.as_ref().map(|a| a.len()).unwrap_or(0),
            "Export finished"
        );

        Ok(ExportReport {
            archive,
            items,
            summary,
        })
    }
}
