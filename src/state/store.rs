//! Persistence seam for recorded identities.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::SyncState;
use crate::error::Result;

/// Storage for the recorded identities and the lock guarding them.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Where the state lives, for log lines.
    fn location(&self) -> String;

    /// Loads the recorded state, or `None` before the first save.
    async fn load(&self) -> Result<Option<SyncState>>;

    /// Replaces the recorded state.
    async fn save(&self, state: &SyncState) -> Result<()>;

    /// Takes the lock for `holder` (a generated name if empty).
    ///
    /// Fails while another unexpired lock is held.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the lock if `lock_id` still holds it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes any lock, returning the one that was removed.
    async fn force_unlock(&self) -> Result<Option<LockInfo>>;

    /// Current lock, expired or not.
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// True while an unexpired lock is held.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self.lock_info().await?.is_some_and(|lock| !lock.is_expired()))
    }
}
