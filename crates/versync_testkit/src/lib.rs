//! # Versync Testkit
//!
//! Test utilities for Versync.
//!
//! This crate provides:
//! - Property-based generators for change sets and identifiers
//! - [`FlakyStore`](flaky::FlakyStore), a store wrapper that fails or stalls
//!   chosen operations
//! - [`RivalStore`](rival::RivalStore), a store wrapper that makes another
//!   writer win the next append race of a file
//! - Fake collaborators: a recording event sink, an allow-list authorizer
//!   and fixed or slow insight generators
//! - Small fixtures for building change sets and fast engine configs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use versync_testkit::prelude::*;
//!
//! let sink = Arc::new(RecordingSink::new());
//! let service = SyncService::builder(Arc::new(MemoryStore::new()))
//!     .with_config(fast_config())
//!     .with_event_sink(sink.clone())
//!     .build();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fakes;
pub mod fixtures;
pub mod flaky;
pub mod generators;
pub mod rival;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fakes::{AllowList, Recorded, RecordingSink, SlowInsights, StaticInsights};
    pub use crate::fixtures::{edits, fast_config, inserts};
    pub use crate::flaky::{FlakyStore, StoreOp};
    pub use crate::generators::*;
    pub use crate::rival::RivalStore;
}
