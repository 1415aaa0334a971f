//! State management module for Kestrel.
//!
//! This module persists the last applied configuration of a cluster, its
//! pipeline history, and the lock that keeps one pipeline per working
//! directory.

mod local;
mod lock;
mod store;
mod types;

pub use local::{LOCK_FILE, LocalStateStore, STATE_FILE};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use store::StateStore;
pub use types::{AppliedState, HistoryEntry, Operation, STATE_VERSION};
