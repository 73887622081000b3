//! State kept on local disk.
//!
//! Identities live in `<dir>/state.json`, the lock in `<dir>/state.lock`.
//! The state file is replaced through a temporary file so a crash never
//! leaves half a document behind. The lock file is created exclusively, so
//! two runs racing for it cannot both win.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{KongSyncError, Result, StateError};

use super::lock::{LockInfo, holder_id};
use super::store::StateStore;
use super::types::SyncState;

/// Default state directory, next to the configuration file.
pub const STATE_DIR: &str = ".kongsync";

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "state.lock";

/// [`StateStore`] backed by a directory on local disk.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    dir: PathBuf,
}

impl LocalStateStore {
    /// Uses `dir` for the state and lock files.
    #[must_use]
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Resolves the state directory for a configuration file.
    ///
    /// A relative `configured` path is taken from the configuration file's
    /// directory; no path means `.kongsync` in that directory.
    #[must_use]
    pub fn for_config(config_path: &Path, configured: Option<&str>) -> Self {
        let config_dir = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        match configured {
            Some(path) if Path::new(path).is_absolute() => Self::with_base_dir(path),
            Some(path) => Self::with_base_dir(config_dir.join(path)),
            None => Self::with_base_dir(config_dir.join(STATE_DIR)),
        }
    }

    /// Path of `state.json`.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_err("create", &self.dir, &e))
    }

    /// Writes a new lock file; `false` if one already exists.
    async fn create_lock_file(&self, lock: &LockInfo) -> Result<bool> {
        let path = self.lock_path();
        let bytes = to_json(lock)?;

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(lock_err("create", &path, &e)),
        };

        file.write_all(&bytes)
            .await
            .map_err(|e| lock_err("write", &path, &e))?;
        file.sync_all()
            .await
            .map_err(|e| lock_err("sync", &path, &e))?;
        Ok(true)
    }

    async fn remove_lock_file(&self) -> Result<()> {
        let path = self.lock_path();
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(lock_err("remove", &path, &e)),
        }
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    fn location(&self) -> String {
        self.state_path().display().to_string()
    }

    async fn load(&self) -> Result<Option<SyncState>> {
        let path = self.state_path();
        let state = read_json(&path).await?;
        if state.is_none() {
            debug!("No state file at {}", path.display());
        }
        Ok(state)
    }

    async fn save(&self, state: &SyncState) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.state_path();
        info!("Saving state to: {}", path.display());
        write_atomic(&path, &to_json(state)?).await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        self.ensure_dir().await?;
        let holder = if holder.is_empty() {
            holder_id()
        } else {
            holder.to_string()
        };
        let lock = LockInfo::new(&holder);

        // Second attempt only after removing an expired lock
        for _ in 0..2 {
            if self.create_lock_file(&lock).await? {
                debug!("Acquired state lock {} for {holder}", lock.lock_id);
                return Ok(lock);
            }

            match self.lock_info().await? {
                Some(existing) if !existing.is_expired() => {
                    return Err(KongSyncError::State(StateError::LockedByOther {
                        holder: existing.holder,
                        since: existing.acquired_at.to_rfc3339(),
                    }));
                }
                Some(existing) => {
                    warn!("Taking over expired state lock held by {}", existing.holder);
                    self.remove_lock_file().await?;
                }
                None => {}
            }
        }

        Err(KongSyncError::State(StateError::LockFailed {
            message: format!("{} kept reappearing", self.lock_path().display()),
        }))
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.lock_info().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.remove_lock_file().await?;
                debug!("Released state lock {lock_id}");
                Ok(())
            }
            Some(existing) => Err(KongSyncError::State(StateError::LockFailed {
                message: format!("lock {lock_id} is not held; current lock: {existing}"),
            })),
            None => Ok(()),
        }
    }

    async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let existing = self.lock_info().await?;
        if let Some(lock) = &existing {
            warn!("Force-releasing state lock held by {}", lock.holder);
            self.remove_lock_file().await?;
        }
        Ok(existing)
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        read_json(&self.lock_path()).await
    }
}

fn storage_err(action: &str, path: &Path, e: &std::io::Error) -> KongSyncError {
    KongSyncError::State(StateError::storage(format!(
        "Failed to {action} {}: {e}",
        path.display()
    )))
}

fn lock_err(action: &str, path: &Path, e: &std::io::Error) -> KongSyncError {
    KongSyncError::State(StateError::LockFailed {
        message: format!("Failed to {action} {}: {e}", path.display()),
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value)
        .map_err(|e| KongSyncError::State(StateError::serialization(e.to_string())))
}

/// Reads and decodes `path`; a missing file is `None`.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(storage_err("read", path, &e)),
    };

    serde_json::from_slice(&bytes).map(Some).map_err(|e| {
        KongSyncError::State(StateError::Corrupted {
            message: format!("{}: {e}", path.display()),
        })
    })
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp = path.with_extension("tmp");

    let mut file = fs::File::create(&temp)
        .await
        .map_err(|e| storage_err("create", &temp, &e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| storage_err("write", &temp, &e))?;
    file.sync_all()
        .await
        .map_err(|e| storage_err("sync", &temp, &e))?;

    fs::rename(&temp, path)
        .await
        .map_err(|e| storage_err("replace", path, &e))
}
