//! State types for tracking recorded identities.
//!
//! Kong assigns every upstream and target an opaque id. These types record
//! which id belongs to which declared object, plus the fields observed at
//! the last successful call. They are never trusted as a remote cache:
//! every run re-reads the recorded ids before deciding anything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::kong::{Target, Upstream};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of history entries kept.
pub const MAX_HISTORY: usize = 100;

/// The complete recorded state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncState {
    /// State format version.
    pub version: String,
    /// Admin API the identities belong to.
    pub admin_url: String,
    /// Hash of the last applied configuration.
    #[serde(default)]
    pub config_hash: String,
    /// Recorded upstreams keyed by declared name.
    #[serde(default)]
    pub upstreams: BTreeMap<String, UpstreamState>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Recorded identity of one upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpstreamState {
    /// Kong upstream id.
    pub id: String,
    /// Name observed at the last call.
    pub name: String,
    /// Slot count observed at the last call.
    pub slots: u32,
    /// Recorded targets keyed by address.
    #[serde(default)]
    pub targets: BTreeMap<String, TargetState>,
    /// When this upstream was first recorded.
    pub created_at: DateTime<Utc>,
    /// When this record last changed.
    pub updated_at: DateTime<Utc>,
}

/// Recorded identity of one target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetState {
    /// Kong target id. Changes on every update.
    pub id: String,
    /// Target address.
    pub target: String,
    /// Weight observed at the last call.
    pub weight: u32,
    /// When this id was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: SyncOperation,
    /// Configuration hash at the time of the run.
    pub config_hash: String,
    /// Resources affected.
    pub resources: Vec<String>,
    /// Whether the run succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of recorded operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    /// Plan applied.
    Apply,
    /// Existing object adopted.
    Import,
    /// Everything deleted.
    Destroy,
}

impl SyncState {
    /// Creates a new empty state for an admin URL.
    #[must_use]
    pub fn new(admin_url: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            admin_url: admin_url.to_string(),
            config_hash: String::new(),
            upstreams: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets an upstream by declared name.
    #[must_use]
    pub fn get_upstream(&self, name: &str) -> Option<&UpstreamState> {
        self.upstreams.get(name)
    }

    /// Gets a mutable reference to an upstream by declared name.
    pub fn get_upstream_mut(&mut self, name: &str) -> Option<&mut UpstreamState> {
        self.upstreams.get_mut(name)
    }

    /// Records an observed upstream under its declared name.
    ///
    /// Targets recorded for the same id are kept; a new id starts empty.
    pub fn record_upstream(&mut self, name: &str, observed: &Upstream) {
        let now = Utc::now();
        match self.upstreams.get_mut(name) {
            Some(existing) if existing.id == observed.id => {
                existing.name.clone_from(&observed.name);
                existing.slots = observed.slots;
                existing.updated_at = now;
            }
            _ => {
                self.upstreams
                    .insert(name.to_string(), UpstreamState::from_observed(observed));
            }
        }
        self.last_updated = now;
    }

    /// Removes an upstream (and its targets) by declared name.
    pub fn remove_upstream(&mut self, name: &str) -> Option<UpstreamState> {
        let result = self.upstreams.remove(name);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Records an observed target under an upstream.
    ///
    /// Returns false if the upstream is not recorded.
    pub fn record_target(&mut self, upstream: &str, observed: &Target) -> bool {
        let Some(entry) = self.upstreams.get_mut(upstream) else {
            return false;
        };
        entry
            .targets
            .insert(observed.target.clone(), TargetState::from_observed(observed));
        entry.updated_at = Utc::now();
        self.last_updated = entry.updated_at;
        true
    }

    /// Removes a target by upstream name and address.
    pub fn remove_target(&mut self, upstream: &str, address: &str) -> Option<TargetState> {
        let result = self
            .upstreams
            .get_mut(upstream)
            .and_then(|u| u.targets.remove(address));
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Adds a history entry, dropping the oldest beyond [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            let excess = self.history.len() + 1 - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.history.push(entry);
    }

    /// Returns the total number of recorded targets.
    #[must_use]
    pub fn target_count(&self) -> usize {
        self.upstreams.values().map(|u| u.targets.len()).sum()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }
}

impl UpstreamState {
    /// Creates a record from an observed upstream.
    #[must_use]
    pub fn from_observed(observed: &Upstream) -> Self {
        let now = Utc::now();
        Self {
            id: observed.id.clone(),
            name: observed.name.clone(),
            slots: observed.slots,
            targets: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl TargetState {
    /// Creates a record from an observed target.
    #[must_use]
    pub fn from_observed(observed: &Target) -> Self {
        Self {
            id: observed.id.clone(),
            target: observed.target.clone(),
            weight: observed.weight,
            recorded_at: Utc::now(),
        }
    }
}

impl HistoryEntry {
    /// Creates a new history entry.
    #[must_use]
    pub fn new(operation: SyncOperation, config_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: SyncOperation,
        config_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Import => "import",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}
