//! Advisory lock guarding the state file.
//!
//! The lock keeps two runs from recording identities into the same state
//! file at once. It says nothing about who else is talking to Kong.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seconds after which an abandoned lock may be taken over.
pub const LOCK_TTL_SECS: i64 = 300;

/// Contents of `state.lock`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Id required to release the lock.
    pub lock_id: String,
    /// Process or person holding it.
    pub holder: String,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
    /// When another run may take it over.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a fresh lock for `holder`, valid for [`LOCK_TTL_SECS`].
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let acquired_at = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at,
            expires_at: acquired_at + TimeDelta::seconds(LOCK_TTL_SECS),
        }
    }

    /// True once the lock may be taken over.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expired_at(Utc::now())
    }

    fn expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whole seconds until the lock may be taken over, never negative.
    #[must_use]
    pub fn seconds_left(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_expired() {
            write!(f, "{} (lock {}, expired)", self.holder, self.lock_id)
        } else {
            write!(
                f,
                "{} (lock {}, {}s left)",
                self.holder,
                self.lock_id,
                self.seconds_left()
            )
        }
    }
}

/// Holder name for this process: `host:pid:nonce`.
#[must_use]
pub fn holder_id() -> String {
    let host = hostname::get().map_or_else(
        |_| String::from("unknown-host"),
        |h| h.to_string_lossy().into_owned(),
    );
    let nonce = Uuid::new_v4().simple().to_string();

    format!("{host}:{}:{}", std::process::id(), &nonce[..8])
}
