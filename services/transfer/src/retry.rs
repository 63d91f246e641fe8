//! Bounded retries with exponential backoff around one upload.
//!
//! Each transfer walks an explicit state machine:
//!
//! ```text
//! Pending -> Attempting(1) -> Succeeded
//!                |
//!                +--> (backoff) -> Attempting(2) -> ... -> Failed
//! ```
//!
//! Before every attempt the orchestrator re-selects the transfer strategy and
//! makes sure it holds a write grant that will not expire within the refresh
//! margin. The backoff sleep yields to the runtime, so other queued transfers
//! keep running while one item waits.

use crate::config::RetryConfig;
use crate::grant_client::{validate_write_request, GrantAuthority, GrantError};
use crate::strategy::StrategySelector;
use crate::types::{FailureKind, GrantWindow, ProgressEvent, ProgressSink, TransferOutcome, WriteGrant};
use crate::uploader::{ObjectUploader, TransferError};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Retry parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Grants expiring within this window are replaced before an attempt
    pub refresh_margin: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            refresh_margin: config.grant_refresh_margin(),
        }
    }

    /// Deterministic doubling schedule starting at `base_delay`
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Delay after the `failure`-th consecutive failure: 2s, 4s, 8s with the
    /// defaults
    pub fn delay(&self, failure: u32) -> Duration {
        let mut backoff = self.backoff();
        let mut delay = self.base_delay;
        for _ in 0..failure.max(1) {
            delay = backoff.next_backoff().unwrap_or(self.max_delay);
        }
        delay
    }
}

/// Per-transfer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RetryState {
    Pending,
    Attempting { attempt: u32 },
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
}

impl RetryState {
    /// Pending -> Attempting(1)
    pub fn start(self) -> Self {
        match self {
            RetryState::Pending => RetryState::Attempting { attempt: 1 },
            other => other,
        }
    }

    pub fn on_success(self) -> Self {
        match self {
            RetryState::Attempting { attempt } => RetryState::Succeeded { attempts: attempt },
            other => other,
        }
    }

    /// Attempting(n) -> Attempting(n + 1), or Failed once `max_attempts`
    /// consecutive attempts have failed
    pub fn on_failure(self, max_attempts: u32) -> Self {
        match self {
            RetryState::Attempting { attempt } if attempt >= max_attempts => {
                RetryState::Failed { attempts: attempt }
            }
            RetryState::Attempting { attempt } => RetryState::Attempting {
                attempt: attempt + 1,
            },
            other => other,
        }
    }

    /// Attempting(n) -> Failed(n) for failures retrying cannot fix
    pub fn abort(self) -> Self {
        match self {
            RetryState::Attempting { attempt } => RetryState::Failed { attempts: attempt },
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryState::Succeeded { .. } | RetryState::Failed { .. })
    }

    /// Attempts made so far
    pub fn attempts(&self) -> u32 {
        match self {
            RetryState::Pending => 0,
            RetryState::Attempting { attempt } => attempt - 1,
            RetryState::Succeeded { attempts } | RetryState::Failed { attempts } => *attempts,
        }
    }
}

/// One file to upload
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub content_type: String,
    pub body: Bytes,
    /// Storage-key path segment owning the object (e.g. an event slug)
    pub owner_prefix: String,
    pub caller_identity: String,
}

impl UploadRequest {
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Final result of one upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub file_name: String,
    /// Key of the last grant obtained, if any
    pub object_key: Option<String>,
    pub outcome: TransferOutcome,
    pub attempts: u32,
}

/// Why a single attempt failed
#[derive(Debug)]
enum AttemptError {
    Grant(GrantError),
    Transfer(TransferError),
}

impl AttemptError {
    fn kind(&self) -> FailureKind {
        match self {
            AttemptError::Grant(GrantError::AccessDenied(_)) => FailureKind::AccessDenied,
            AttemptError::Grant(GrantError::InvalidRequest(_)) => FailureKind::Rejected,
            AttemptError::Grant(_) => FailureKind::Grant,
            AttemptError::Transfer(e) => e.kind(),
        }
    }

    /// Client errors from the authority will not change on retry
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Grant(GrantError::InvalidRequest(_))
            | AttemptError::Grant(GrantError::AccessDenied(_)) => false,
            AttemptError::Grant(GrantError::Rejected { status, .. }) => *status >= 500,
            _ => true,
        }
    }

    fn message(&self) -> String {
        match self {
            AttemptError::Grant(e) => e.to_string(),
            AttemptError::Transfer(e) => e.to_string(),
        }
    }
}

/// Runs one upload through the retry state machine
pub struct RetryOrchestrator {
    grants: Arc<dyn GrantAuthority>,
    uploader: Arc<dyn ObjectUploader>,
    selector: StrategySelector,
    policy: RetryPolicy,
    max_payload_bytes: u64,
}

impl RetryOrchestrator {
    pub fn new(
        grants: Arc<dyn GrantAuthority>,
        uploader: Arc<dyn ObjectUploader>,
        selector: StrategySelector,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            grants,
            uploader,
            selector,
            policy,
            max_payload_bytes: u64::MAX,
        }
    }

    /// Reject payloads larger than `max_payload_bytes` before any grant request
    pub fn with_max_payload(mut self, max_payload_bytes: u64) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    /// Upload `request`, retrying transient failures.
    ///
    /// Never returns an error: every failure ends up in the report's outcome.
    #[instrument(skip(self, request, progress, cancel), fields(file_name = %request.file_name, size = request.body.len()))]
    pub async fn run(
        &self,
        request: &UploadRequest,
        progress: Option<ProgressSink>,
        cancel: Option<&CancellationToken>,
    ) -> UploadReport {
        if let Err(reason) = self.validate(request) {
            warn!(reason = %reason, "Upload rejected");
            metrics::counter!("transfer.uploads.failed").increment(1);
            return UploadReport {
                file_name: request.file_name.clone(),
                object_key: None,
                outcome: TransferOutcome::failure(FailureKind::Rejected, reason),
                attempts: 0,
            };
        }

        let progress = progress.map(monotonic);
        let mut backoff = self.policy.backoff();
        let mut state = RetryState::Pending.start();
        let mut grant: Option<WriteGrant> = None;
        let mut object_key: Option<String> = None;
        let mut last_failure = (FailureKind::NetworkOrServer, String::new());

        while let RetryState::Attempting { attempt } = state {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                return self.cancelled(request, object_key, state.attempts());
            }

            match self
                .attempt(request, attempt, &mut grant, progress.clone())
                .await
            {
                Ok(bytes) => {
                    state = state.on_success();
                    info!(attempts = state.attempts(), bytes, "Upload succeeded");
                    metrics::counter!("transfer.uploads.succeeded").increment(1);
                    return UploadReport {
                        file_name: request.file_name.clone(),
                        object_key: grant.map(|g| g.object_key).or(object_key),
                        outcome: TransferOutcome::Success {
                            bytes_transferred: bytes,
                        },
                        attempts: state.attempts(),
                    };
                }
                Err(e) => {
                    if let Some(current) = &grant {
                        object_key = Some(current.object_key.clone());
                    }
                    if matches!(e, AttemptError::Transfer(TransferError::GrantExpired)) {
                        debug!("Discarding expired grant");
                        grant = None;
                    }

                    last_failure = (e.kind(), e.message());
                    state = if e.is_retryable() {
                        state.on_failure(self.policy.max_attempts)
                    } else {
                        state.abort()
                    };
                }
            }

            if let RetryState::Attempting { attempt: next } = state {
                let delay = backoff.next_backoff().unwrap_or(self.policy.max_delay);
                warn!(
                    attempt,
                    next_attempt = next,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_failure.1,
                    "Upload attempt failed, retrying"
                );
                metrics::counter!("transfer.upload.retries").increment(1);

                match cancel {
                    Some(token) => {
                        tokio::select! {
                            _ = token.cancelled() => {
                                return self.cancelled(request, object_key, state.attempts());
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => tokio::time::sleep(delay).await,
                }
            }
        }

        error!(
            attempts = state.attempts(),
            kind = %last_failure.0,
            error = %last_failure.1,
            "Upload failed"
        );
        metrics::counter!("transfer.uploads.failed").increment(1);
        UploadReport {
            file_name: request.file_name.clone(),
            object_key,
            outcome: TransferOutcome::failure(last_failure.0, last_failure.1),
            attempts: state.attempts(),
        }
    }

    fn validate(&self, request: &UploadRequest) -> Result<(), String> {
        validate_write_request(&request.file_name, &request.content_type)
            .map_err(|e| e.to_string())?;
        if request.size() > self.max_payload_bytes {
            return Err(format!(
                "File too large: {} bytes exceeds the {} byte limit",
                request.size(),
                self.max_payload_bytes
            ));
        }
        Ok(())
    }

    /// One grant check plus one PUT
    async fn attempt(
        &self,
        request: &UploadRequest,
        attempt: u32,
        grant: &mut Option<WriteGrant>,
        progress: Option<ProgressSink>,
    ) -> Result<u64, AttemptError> {
        if grant
            .as_ref()
            .is_some_and(|g| g.expires_within(self.policy.refresh_margin))
        {
            debug!(attempt, "Grant expiring, requesting a fresh one");
            *grant = None;
        }

        let current = match grant.take() {
            Some(current) => current,
            None => self
                .grants
                .request_write_grant(
                    &request.file_name,
                    &request.owner_prefix,
                    &request.content_type,
                    &request.caller_identity,
                )
                .await
                .map_err(AttemptError::Grant)?,
        };

        let strategy = self.selector.select(request.size());
        debug!(attempt, %strategy, object_key = %current.object_key, "Starting upload attempt");

        let result = self
            .uploader
            .upload(
                request.body.clone(),
                &current,
                &request.content_type,
                strategy,
                progress,
            )
            .await
            .map_err(AttemptError::Transfer);
        *grant = Some(current);
        result
    }

    fn cancelled(
        &self,
        request: &UploadRequest,
        object_key: Option<String>,
        attempts: u32,
    ) -> UploadReport {
        info!(attempts, "Upload cancelled");
        metrics::counter!("transfer.uploads.failed").increment(1);
        UploadReport {
            file_name: request.file_name.clone(),
            object_key,
            outcome: TransferOutcome::failure(FailureKind::Cancelled, "Upload cancelled"),
            attempts,
        }
    }
}

/// Keep progress non-decreasing across attempts
fn monotonic(sink: ProgressSink) -> ProgressSink {
    let highest = Arc::new(AtomicU64::new(0f64.to_bits()));
    Arc::new(move |event: ProgressEvent| {
        let previous = f64::from_bits(highest.load(Ordering::SeqCst));
        if event.fraction > previous {
            highest.store(event.fraction.to_bits(), Ordering::SeqCst);
            sink(event);
        }
    })
}
