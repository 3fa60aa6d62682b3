//! # Versync Store
//!
//! Durable rows behind the sync engine.
//!
//! Three logical tables are exposed through traits:
//!
//! - [`VersionStore`]: per-file append-only version chain with
//!   compare-and-append on the latest version id
//! - [`StatusStore`]: one sync-status row per file
//! - [`OfflineStore`]: one buffered offline change per (file, user)
//!
//! Every backend implements all three, which makes it a [`Store`].
//!
//! ## Available Backends
//!
//! - [`MemoryStore`] - For tests and ephemeral engines
//! - [`DirStore`] - Directory-backed store that survives restarts
//!
//! Calls are synchronous. The engine runs them on the blocking pool under
//! a timeout, so a backend may block on I/O.
//!
//! ## Example
//!
//! ```rust
//! use versync_protocol::{ChangeSet, FileId, FileVersion, LineEdit, Metadata, UserId};
//! use versync_store::{MemoryStore, VersionStore};
//!
//! let store = MemoryStore::new();
//! let file = FileId::new("notes.md");
//! let v1 = FileVersion::new(
//!     file.clone(),
//!     UserId::new("alice"),
//!     ChangeSet::new(vec![LineEdit::insert(1, "hello")]),
//!     Metadata::new(),
//! );
//! store.append(v1.clone(), None).unwrap();
//! assert_eq!(store.latest(&file).unwrap(), Some(v1));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod backend;
mod dir;
mod error;
mod memory;

pub use backend::{OfflineStore, StatusStore, Store, VersionStore};
pub use dir::DirStore;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
