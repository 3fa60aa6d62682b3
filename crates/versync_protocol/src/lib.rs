//! # Versync Protocol
//!
//! Data model and pure algorithms for Versync.
//!
//! This crate provides:
//! - `ChangeSet` / `LineEdit` for line-level edits
//! - `FileVersion`, `SyncTask`, `OfflineRecord` and `SyncStatus` records
//! - Conflict detection (`detect`, `conflicting_lines`)
//! - Merge views (`ConflictResolution`, `MergedLine`)
//! - Version comparison (`VersionDiff`)
//!
//! This is a pure crate with no I/O operations. Everything here is
//! deterministic, so the engine can call it while holding no locks and
//! tests can exercise it without a runtime.
//!
//! ## Conflict rule
//!
//! An incoming change set conflicts with the latest version iff some
//! incoming edit targets a line that the latest version also edits, with
//! different content. Identical content on the same line is an idempotent
//! resubmission, and lines the latest version never touched are plain
//! additions.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod change;
mod conflict;
mod error;
mod ids;
mod records;
mod version;

pub use change::{ChangeSet, EditOp, LineEdit};
pub use conflict::{conflicting_lines, detect, is_duplicate, ConflictResolution, MergedLine};
pub use error::{ProtocolError, ProtocolResult};
pub use ids::{FileId, TaskId, UserId, VersionId};
pub use records::{OfflineRecord, Platform, SyncState, SyncStatus, SyncTask};
pub use version::{FileVersion, LineChange, Metadata, VersionDiff};
