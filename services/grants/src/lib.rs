//! Guestlens Grants
//!
//! Grant authority for Guestlens galleries. Clients never hold bucket
//! credentials: this service signs short-lived PUT and GET URLs for them,
//! proxies authorized downloads, and lists or deletes gallery objects.
//!
//! ## Architecture
//!
//! ```text
//!  transfer client             grant service                 S3 bucket
//! ┌──────────────┐  bearer   ┌──────────────┐   presign    ┌──────────────┐
//! │ Retry        │──────────▶│ API          │─────────────▶│ {slug}/      │
//! │ Orchestrator │           │   /grants    │              │   {caller}/  │
//! │ Fallback     │◀──────────│   /objects   │◀─────────────│   {ts}-{name}│
//! │ Chain        │  url/data └──────────────┘  get/list    └──────────────┘
//! └──────────────┘                  │                             ▲
//!        │                   ┌──────────────┐                     │
//!        │                   │ Access       │                     │
//!        │                   │ Policy       │                     │
//!        │                   └──────────────┘                     │
//!        └──────────────────── signed PUT / GET ──────────────────┘
//! ```

pub mod access;
pub mod api;
pub mod config;
pub mod object_store;

pub use access::{AccessPolicy, StaticAccessPolicy};
pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use object_store::{ObjectStore, S3ObjectStore, StoreError};
