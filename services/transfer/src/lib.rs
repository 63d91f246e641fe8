//! Guestlens Transfer
//!
//! Direct-to-object-store media transfer for event galleries. Guests upload
//! photos and videos straight to the bucket under short-lived write grants;
//! owners later pull a selection back down and bundle it into one ZIP.
//!
//! ## Features
//!
//! - **Grant acquisition**: signed, time-limited write and read URLs from the
//!   grant authority, refreshed before they expire
//! - **Bounded concurrency**: every upload and download goes through one FIFO
//!   queue with a fixed number of running slots
//! - **Size-based strategy**: small payloads go up in one request, large ones
//!   are streamed with progress events
//! - **Retries**: exponential backoff (2s, 4s, ...) with cooperative cancellation
//! - **Export**: authorized proxy download, falling back to a fresh read grant,
//!   assembled into an in-memory ZIP
//!
//! ## Architecture
//!
//! ```text
//!  upload                                              export
//! ┌──────────────┐                                   ┌──────────────┐
//! │ Batch        │                                   │ Export       │
//! │ Uploader     │                                   │ Pipeline     │
//! └──────────────┘                                   └──────────────┘
//!        │              ┌──────────────────┐                │
//!        └─────────────▶│ Concurrency      │◀───────────────┘
//!                       │ Queue            │
//!                       └──────────────────┘
//!        ┌──────────────────────┘ └──────────────────────┐
//!        ▼                                               ▼
//! ┌──────────────┐    ┌──────────────┐            ┌──────────────┐
//! │ Retry        │───▶│ Grant        │            │ Fallback     │
//! │ Orchestrator │    │ Authority    │◀───────────│ Chain        │
//! └──────────────┘    └──────────────┘            └──────────────┘
//!        │                                               │
//!        ▼                                               ▼
//! ┌──────────────┐                                ┌──────────────┐
//! │ Uploader     │──────── PUT ──▶ bucket ◀─ GET ─│ Archive      │
//! └──────────────┘                                └──────────────┘
//! ```

pub mod api_client;
pub mod archive;
pub mod batch;
pub mod client;
pub mod config;
pub mod download;
pub mod export;
pub mod grant_client;
pub mod keys;
pub mod queue;
pub mod retry;
pub mod strategy;
pub mod types;
pub mod uploader;
pub mod wire;

#[cfg(test)]
mod test_support;

pub use api_client::{ApiError, HttpApiClient};
pub use archive::{Archive, ArchiveError};
pub use batch::{BatchReport, BatchUploader, ItemProgress};
pub use client::TransferClient;
pub use config::TransferConfig;
pub use download::{
    AuthorizedProxyDownload, DownloadError, DownloadStrategy, DownloadedObject, FallbackChain,
    FreshGrantDownload, ProxyDownloader,
};
pub use export::{ExportError, ExportItemReport, ExportPipeline, ExportReport};
pub use grant_client::{AccessScope, GrantAuthority, GrantError};
pub use queue::{ConcurrencyQueue, QueueError, TaskHandle};
pub use retry::{RetryOrchestrator, RetryPolicy, RetryState, UploadReport, UploadRequest};
pub use strategy::{StrategySelector, TransferStrategy};
pub use types::{
    BatchStatus, BatchSummary, FailureKind, ObjectDescriptor, ProgressEvent, ProgressSink,
    ReadGrant, TransferOutcome, WriteGrant,
};
pub use uploader::{HttpUploader, ObjectUploader, TransferError};
