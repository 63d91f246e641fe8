//! Batch uploads through the concurrency queue.

use crate::queue::{ConcurrencyQueue, QueueError};
use crate::retry::{RetryOrchestrator, UploadReport, UploadRequest};
use crate::types::{BatchSummary, FailureKind, ProgressEvent, ProgressSink, TransferOutcome};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Progress observer receiving the item's index in the batch
pub type ItemProgress = Arc<dyn Fn(usize, ProgressEvent) + Send + Sync>;

/// Per-item reports, in submission order, plus the tally
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub items: Vec<UploadReport>,
    pub summary: BatchSummary,
}

/// Submits one retrying upload per item to a shared queue
#[derive(Clone)]
pub struct BatchUploader {
    queue: ConcurrencyQueue,
    orchestrator: Arc<RetryOrchestrator>,
}

impl BatchUploader {
    pub fn new(queue: ConcurrencyQueue, orchestrator: Arc<RetryOrchestrator>) -> Self {
        Self {
            queue,
            orchestrator,
        }
    }

    /// Upload every item and wait for all of them.
    ///
    /// Items are started in order, at most `max_concurrent` at a time. A
    /// failed item never affects its siblings.
    #[instrument(skip_all, fields(batch_id = tracing::field::Empty, items = items.len()))]
    pub async fn upload_batch(
        &self,
        items: Vec<UploadRequest>,
        progress: Option<ItemProgress>,
        cancel: Option<CancellationToken>,
    ) -> BatchReport {
        let batch_id = Uuid::new_v4();
        tracing::Span::current().record("batch_id", tracing::field::display(batch_id));

        let names: Vec<String> = items.iter().map(|item| item.file_name.clone()).collect();
        let handles: Vec<_> = items
            .into_iter()
            .enumerate()
            .map(|(index, request)| {
                let orchestrator = self.orchestrator.clone();
                let cancel = cancel.clone();
                let sink = progress.clone().map(|observer| -> ProgressSink {
                    Arc::new(move |event: ProgressEvent| observer(index, event))
                });
                self.queue.submit(async move {
                    orchestrator.run(&request, sink, cancel.as_ref()).await
                })
            })
            .collect();

        let items: Vec<UploadReport> = join_all(handles)
            .await
            .into_iter()
            .zip(names)
            .map(|(result, file_name)| match result {
                Ok(report) => report,
                Err(QueueError::TaskPanicked) => {
                    error!(file_name = %file_name, "Upload task panicked");
                    UploadReport {
                        file_name,
                        object_key: None,
                        outcome: TransferOutcome::failure(
                            FailureKind::NetworkOrServer,
                            QueueError::TaskPanicked.to_string(),
                        ),
                        attempts: 0,
                    }
                }
            })
            .collect();

        let summary = BatchSummary::from_outcomes(items.iter().map(|item| &item.outcome));
        info!(summary = %summary, status = ?summary.status(), "Batch upload finished");

        BatchReport {
            batch_id,
            items,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::strategy::StrategySelector;
    use crate::test_support::{FakeGrants, FlakyUploader};
    use crate::types::BatchStatus;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    fn item(name: &str) -> UploadRequest {
        UploadRequest {
            file_name: name.to_string(),
            content_type: "image/jpeg".to_string(),
            body: Bytes::from_static(b"jpeg bytes"),
            owner_prefix: "party".to_string(),
            caller_identity: "alice".to_string(),
        }
    }

    fn uploader_with(failures: &[(&str, u32)]) -> (BatchUploader, Arc<FlakyUploader>) {
        let store = FlakyUploader::new(failures, Duration::from_millis(100));
        let orchestrator = RetryOrchestrator::new(
            FakeGrants::new(Duration::from_secs(3600)),
            store.clone(),
            StrategySelector::default(),
            RetryPolicy::default(),
        );
        (
            BatchUploader::new(ConcurrencyQueue::new(3), Arc::new(orchestrator)),
            store,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_flaky_item_still_completes_batch() {
        let (batch, store) = uploader_with(&[("c.jpg", 2)]);
        let names = ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"];
        let start = Instant::now();

        let report = batch
            .upload_batch(names.iter().map(|n| item(n)).collect(), None, None)
            .await;

        assert_eq!(report.summary.to_string(), "5 of 5");
        assert_eq!(report.summary.status(), BatchStatus::AllSucceeded);

        let flaky = &report.items[2];
        assert_eq!(flaky.file_name, "c.jpg");
        assert_eq!(flaky.attempts, 3);
        assert!(start.elapsed() >= Duration::from_secs(6));

        // The other four finish without any backoff delay.
        for name in ["a.jpg", "b.jpg", "d.jpg", "e.jpg"] {
            let finished = store.finished(name);
            assert_eq!(finished.len(), 1);
            assert!(finished[0] - start < Duration::from_secs(1), "{name} was delayed");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_and_total_failure_states() {
        let (batch, _) = uploader_with(&[("b.jpg", 5)]);
        let report = batch
            .upload_batch(vec![item("a.jpg"), item("b.jpg")], None, None)
            .await;
        assert_eq!(report.summary.status(), BatchStatus::Partial);
        assert_eq!(report.summary.to_string(), "1 of 2");
        assert_eq!(
            report.items[1].outcome.failure_kind(),
            Some(FailureKind::NetworkOrServer)
        );

        let (batch, _) = uploader_with(&[("a.jpg", 5)]);
        let report = batch.upload_batch(vec![item("a.jpg")], None, None).await;
        assert_eq!(report.summary.status(), BatchStatus::AllFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_keep_submission_order() {
        let (batch, _) = uploader_with(&[("first.jpg", 1)]);
        let report = batch
            .upload_batch(vec![item("first.jpg"), item("second.jpg")], None, None)
            .await;

        let names: Vec<_> = report.items.iter().map(|i| i.file_name.as_str()).collect();
        assert_eq!(names, vec!["first.jpg", "second.jpg"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_tagged_with_index() {
        let (batch, _) = uploader_with(&[]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let progress: ItemProgress =
            Arc::new(move |index: usize, event: ProgressEvent| {
                captured.lock().push((index, event.fraction))
            });

        batch
            .upload_batch(vec![item("a.jpg"), item("b.jpg")], Some(progress), None)
            .await;

        let mut seen = seen.lock().clone();
        seen.sort_by_key(|(index, _)| *index);
        assert_eq!(seen, vec![(0, 1.0), (1, 1.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_pending_items() {
        let (batch, store) = uploader_with(&[]);
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let items = (0..6).map(|i| item(&format!("{}.jpg", i))).collect();
        let report = batch.upload_batch(items, None, Some(token)).await;

        // The first three were in flight and finish; the rest never start.
        assert_eq!(store.started_count(), 3);
        assert_eq!(report.summary.success_count, 3);
        assert!(report.items[3..]
            .iter()
            .all(|i| i.outcome.failure_kind() == Some(FailureKind::Cancelled)));
    }
}
