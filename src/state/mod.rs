//! State management module for kongsync.
//!
//! This module persists the ids Kong assigned to declared upstreams and
//! targets, plus a short run history.

mod store;
mod local;
mod lock;
mod types;

pub use store::StateStore;
pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LockInfo, LOCK_TTL_SECS, holder_id};
pub use types::{
    HistoryEntry, SyncOperation, SyncState, TargetState, UpstreamState, MAX_HISTORY,
    STATE_VERSION,
};
