//! PUT against a write grant.
//!
//! Two transports share the [`ObjectUploader`] contract: a direct PUT with the
//! whole body, and a streamed PUT whose body is fed chunk by chunk so progress
//! can be observed.

use crate::strategy::TransferStrategy;
use crate::types::{FailureKind, GrantWindow, ProgressEvent, ProgressSink, WriteGrant};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, StatusCode};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors from a single transfer attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("Transfer failed ({}): {message}", describe_status(.status))]
    NetworkOrServer {
        status: Option<u16>,
        message: String,
    },

    #[error("Transfer timed out: {0}")]
    Timeout(String),

    #[error("Grant expired before the transfer was accepted")]
    GrantExpired,
}

fn describe_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("HTTP {}", code),
        None => "network".to_string(),
    }
}

impl TransferError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TransferError::NetworkOrServer { .. } => FailureKind::NetworkOrServer,
            TransferError::Timeout(_) => FailureKind::Timeout,
            TransferError::GrantExpired => FailureKind::GrantExpired,
        }
    }

    pub(crate) fn http(status: StatusCode, body: &str) -> Self {
        let message = if body.is_empty() {
            status.canonical_reason().unwrap_or("unexpected status").to_string()
        } else {
            body.chars().take(512).collect()
        };
        TransferError::NetworkOrServer {
            status: Some(status.as_u16()),
            message,
        }
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransferError::Timeout(err.to_string())
        } else {
            TransferError::NetworkOrServer {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

/// Sends a payload to the object store under a write grant
#[async_trait]
pub trait ObjectUploader: Send + Sync {
    /// Upload `body` and return the number of bytes accepted.
    ///
    /// Only [`TransferStrategy::Streamed`] reports progress.
    async fn upload(
        &self,
        body: Bytes,
        grant: &WriteGrant,
        content_type: &str,
        strategy: TransferStrategy,
        progress: Option<ProgressSink>,
    ) -> Result<u64, TransferError>;
}

/// reqwest-backed uploader
#[derive(Clone)]
pub struct HttpUploader {
    client: Client,
    chunk_size: usize,
}

impl HttpUploader {
    pub fn new(client: Client, chunk_size: usize) -> Self {
        Self {
            client,
            chunk_size: chunk_size.max(1),
        }
    }

    #[instrument(skip(self, body, grant), fields(object_key = %grant.object_key, size = body.len()))]
    async fn put_direct(
        &self,
        body: Bytes,
        grant: &WriteGrant,
        content_type: &str,
    ) -> Result<u64, TransferError> {
        let size = body.len() as u64;
        let response = self
            .client
            .put(&grant.url)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        check_response(response, grant).await?;
        debug!("Direct upload accepted");
        Ok(size)
    }

    #[instrument(skip(self, body, grant, progress), fields(object_key = %grant.object_key, size = body.len()))]
    async fn put_streamed(
        &self,
        body: Bytes,
        grant: &WriteGrant,
        content_type: &str,
        progress: Option<ProgressSink>,
    ) -> Result<u64, TransferError> {
        let total = body.len() as u64;
        let tracker = Arc::new(ProgressTracker::new(total, progress));

        let chunk_size = self.chunk_size;
        let chunk_count = body.len().div_ceil(chunk_size);
        let stream_tracker = tracker.clone();
        let stream = futures::stream::iter((0..chunk_count).map(move |index| {
            let start = index * chunk_size;
            let end = (start + chunk_size).min(body.len());
            let chunk = body.slice(start..end);
            stream_tracker.advance(chunk.len() as u64);
            Ok::<Bytes, std::io::Error>(chunk)
        }));

        let response = self
            .client
            .put(&grant.url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, total)
            .body(Body::wrap_stream(stream))
            .send()
            .await?;

        check_response(response, grant).await?;
        tracker.finish();
        debug!(bytes = tracker.sent(), "Streamed upload accepted");
        Ok(total)
    }
}

#[async_trait]
impl ObjectUploader for HttpUploader {
    async fn upload(
        &self,
        body: Bytes,
        grant: &WriteGrant,
        content_type: &str,
        strategy: TransferStrategy,
        progress: Option<ProgressSink>,
    ) -> Result<u64, TransferError> {
        match strategy {
            TransferStrategy::Direct => self.put_direct(body, grant, content_type).await,
            TransferStrategy::Streamed => {
                self.put_streamed(body, grant, content_type, progress).await
            }
        }
    }
}

/// Map a non-2xx response to a [`TransferError`]
async fn check_response(
    response: reqwest::Response,
    grant: &WriteGrant,
) -> Result<(), TransferError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(rejection(status, &body, grant))
}

/// A 403 means the signature window closed when the grant has run out or
/// the store says so (S3: "Request has expired").
fn rejection(status: StatusCode, body: &str, grant: &WriteGrant) -> TransferError {
    if status == StatusCode::FORBIDDEN && (grant.is_expired() || body.contains("expired")) {
        return TransferError::GrantExpired;
    }
    TransferError::http(status, body)
}

/// Converts byte counts into monotonic progress events.
///
/// Events are emitted only when the whole percentage increases, capped at 99%
/// until the store accepts the body; [`finish`](Self::finish) emits 1.0.
struct ProgressTracker {
    total: u64,
    sent: AtomicU64,
    last_percent: AtomicU32,
    sink: Option<ProgressSink>,
}

impl ProgressTracker {
    fn new(total: u64, sink: Option<ProgressSink>) -> Self {
        Self {
            total,
            sent: AtomicU64::new(0),
            last_percent: AtomicU32::new(0),
            sink,
        }
    }

    fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    fn advance(&self, bytes: u64) {
        let sent = self.sent.fetch_add(bytes, Ordering::SeqCst) + bytes;
        if self.total == 0 {
            return;
        }
        let percent = ((sent.min(self.total) * 100) / self.total).min(99) as u32;
        self.emit_if_higher(percent);
    }

    fn finish(&self) {
        self.emit_if_higher(100);
    }

    fn emit_if_higher(&self, percent: u32) {
        let Some(sink) = &self.sink else {
            return;
        };
        let previous = self.last_percent.fetch_max(percent, Ordering::SeqCst);
        if percent > previous {
            sink(ProgressEvent::new(percent as f64 / 100.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn recording_sink() -> (ProgressSink, Arc<Mutex<Vec<f64>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let captured = events.clone();
        let sink: ProgressSink = Arc::new(move |event: ProgressEvent| {
            captured.lock().push(event.fraction);
        });
        (sink, events)
    }

    #[test]
    fn test_progress_is_monotonic_and_ends_at_one() {
        let (sink, events) = recording_sink();
        let tracker = ProgressTracker::new(1000, Some(sink));

        for _ in 0..10 {
            tracker.advance(100);
        }
        tracker.finish();

        let events = events.lock();
        assert!(events.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(events.last().copied(), Some(1.0));
        assert!(events[..events.len() - 1].iter().all(|f| *f < 1.0));
    }

    #[test]
    fn test_progress_skips_unchanged_percent() {
        let (sink, events) = recording_sink();
        let tracker = ProgressTracker::new(10_000, Some(sink));

        tracker.advance(1);
        tracker.advance(1);
        tracker.advance(100);

        assert_eq!(*events.lock(), vec![0.01]);
    }

    #[test]
    fn test_empty_body_reports_completion() {
        let (sink, events) = recording_sink();
        let tracker = ProgressTracker::new(0, Some(sink));
        tracker.finish();
        assert_eq!(*events.lock(), vec![1.0]);
    }

    fn grant(expires_in: Duration) -> WriteGrant {
        WriteGrant {
            url: "https://store.example.com/put/1".to_string(),
            object_key: "party/alice/1-cake.jpg".to_string(),
            bucket: "media".to_string(),
            expires_in,
            issued_at: tokio::time::Instant::now(),
        }
    }

    const S3_EXPIRED: &str = "<Error><Code>AccessDenied</Code>\
        <Message>Request has expired</Message></Error>";
    const S3_BAD_SIGNATURE: &str = "<Error><Code>SignatureDoesNotMatch</Code>\
        <Message>The request signature we calculated does not match</Message></Error>";

    #[test]
    fn test_expired_message_on_forbidden_is_grant_expired() {
        let live = grant(Duration::from_secs(3600));
        assert_eq!(
            rejection(StatusCode::FORBIDDEN, S3_EXPIRED, &live),
            TransferError::GrantExpired
        );
    }

    #[test]
    fn test_forbidden_after_window_is_grant_expired() {
        let spent = grant(Duration::ZERO);
        assert_eq!(
            rejection(StatusCode::FORBIDDEN, S3_BAD_SIGNATURE, &spent),
            TransferError::GrantExpired
        );
    }

    #[test]
    fn test_forbidden_on_live_grant_stays_network_or_server() {
        let live = grant(Duration::from_secs(3600));
        let err = rejection(StatusCode::FORBIDDEN, S3_BAD_SIGNATURE, &live);
        assert_eq!(err.kind(), FailureKind::NetworkOrServer);
        assert!(matches!(
            err,
            TransferError::NetworkOrServer {
                status: Some(403),
                ..
            }
        ));
    }

    #[test]
    fn test_other_statuses_never_map_to_grant_expired() {
        let spent = grant(Duration::ZERO);
        let err = rejection(StatusCode::BAD_REQUEST, S3_EXPIRED, &spent);
        assert_eq!(err.kind(), FailureKind::NetworkOrServer);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(TransferError::GrantExpired.kind(), FailureKind::GrantExpired);
        assert_eq!(
            TransferError::Timeout("slow".into()).kind(),
            FailureKind::Timeout
        );
        let err = TransferError::http(StatusCode::INTERNAL_SERVER_ERROR, "");
        assert_eq!(err.kind(), FailureKind::NetworkOrServer);
        assert_eq!(err.to_string(), "Transfer failed (HTTP 500): Internal Server Error");
    }
}
