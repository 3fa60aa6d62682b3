//! # Versync Engine
//!
//! File synchronization, versioning and conflict resolution.
//!
//! This crate provides:
//! - [`SyncService`]: the producer-facing operations (`sync`,
//!   `resolve_conflicts`, `status`, `history`, `rollback`, `replay_offline`)
//! - A bounded sync queue drained by a background dispatcher
//! - Merge views with best-effort content suggestions
//! - An offline change buffer with idempotent replay
//! - Retry with exponential backoff and a dead-letter list
//!
//! ## Architecture
//!
//! ```text
//! sync() ──► queue ──► dispatcher ──► lane(file) ──► detect ─┬─► append ──► synced
//!                                                            └─► resolve ─► conflict
//! replay_offline() ─┘
//! ```
//!
//! ## Key Invariants
//!
//! - Tasks for one file are processed strictly in enqueue order
//! - Appends are compare-and-append on the latest version id; losing a
//!   race re-runs detection instead of retrying blindly
//! - Resubmitting edits already present appends nothing
//! - A task failure never stops the dispatcher
//! - Event delivery never blocks the dispatcher

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod client;
mod collab;
mod config;
mod dispatcher;
mod error;
mod events;
mod ledger;
mod offline;
mod queue;
mod resolver;
mod service;
mod stats;

pub use collab::{
    Action, AllowAll, Authorizer, CollaboratorError, EventSink, Insight, InsightGenerator,
    NoInsights, NullSink,
};
pub use config::{EngineConfig, RetryConfig};
pub use dispatcher::DeadLetter;
pub use error::{SyncError, SyncResult};
pub use events::SyncEvent;
pub use ledger::ROLLBACK_OF;
pub use service::{SyncService, SyncServiceBuilder};
pub use stats::SyncStats;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
