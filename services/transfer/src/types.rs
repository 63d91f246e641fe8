use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Single-use, time-limited write grant (a signed PUT URL).
///
/// The issuing side does not enforce single use, so the holder tracks the
/// issuance instant and must not present the URL past `expires_in`.
#[derive(Debug, Clone)]
pub struct WriteGrant {
    pub url: String,
    pub object_key: String,
    pub bucket: String,
    pub expires_in: Duration,
    pub issued_at: Instant,
}

/// Time-limited read grant for an existing object.
#[derive(Debug, Clone)]
pub struct ReadGrant {
    pub url: String,
    pub expires_in: Duration,
    pub issued_at: Instant,
}

/// Shared expiry bookkeeping for both grant kinds
pub trait GrantWindow {
    fn issued_at(&self) -> Instant;
    fn expires_in(&self) -> Duration;

    fn expires_at(&self) -> Instant {
        self.issued_at() + self.expires_in()
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at()
    }

    /// True when the window closes within `margin` from now
    fn expires_within(&self, margin: Duration) -> bool {
        Instant::now() + margin >= self.expires_at()
    }
}

impl GrantWindow for WriteGrant {
    fn issued_at(&self) -> Instant {
        self.issued_at
    }

    fn expires_in(&self) -> Duration {
        self.expires_in
    }
}

impl GrantWindow for ReadGrant {
    fn issued_at(&self) -> Instant {
        self.issued_at
    }

    fn expires_in(&self) -> Duration {
        self.expires_in
    }
}

/// A user-visible gallery item. Referenced, never owned, by the export pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub key: String,
    /// Pre-resolved read grant URL for display
    pub display_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Upload progress, purely observational
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    /// Fraction in [0, 1]
    pub fraction: f64,
}

impl ProgressEvent {
    pub fn new(fraction: f64) -> Self {
        Self {
            fraction: fraction.clamp(0.0, 1.0),
        }
    }

    pub fn percent(&self) -> u32 {
        (self.fraction * 100.0).round() as u32
    }
}

/// Injected progress observer
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Failure category carried by [`TransferOutcome::Failure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Grant authority unreachable or refused the request
    Grant,
    /// PUT/GET failed or returned non-2xx
    NetworkOrServer,
    /// Transport-level timeout
    Timeout,
    /// The grant's validity window elapsed
    GrantExpired,
    /// Authorization check refused access
    AccessDenied,
    /// Input rejected before any network call
    Rejected,
    /// Stopped through a cancellation token
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Grant => "grant",
            FailureKind::NetworkOrServer => "network_or_server",
            FailureKind::Timeout => "timeout",
            FailureKind::GrantExpired => "grant_expired",
            FailureKind::AccessDenied => "access_denied",
            FailureKind::Rejected => "rejected",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Tagged result of one transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferOutcome {
    Success { bytes_transferred: u64 },
    Failure { kind: FailureKind, message: String },
}

impl TransferOutcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        TransferOutcome::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            TransferOutcome::Success { .. } => None,
            TransferOutcome::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// The three user-visible batch states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    AllSucceeded,
    Partial,
    AllFailed,
}

/// `success_count` of `total_count`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub success_count: usize,
    pub total_count: usize,
}

impl BatchSummary {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a TransferOutcome>) -> Self {
        let mut summary = BatchSummary {
            success_count: 0,
            total_count: 0,
        };
        for outcome in outcomes {
            summary.total_count += 1;
            if outcome.is_success() {
                summary.success_count += 1;
            }
        }
        summary
    }

    pub fn status(&self) -> BatchStatus {
        if self.success_count == self.total_count {
            BatchStatus::AllSucceeded
        } else if self.success_count > 0 {
            BatchStatus::Partial
        } else {
            BatchStatus::AllFailed
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}", self.success_count, self.total_count)
    }
}
