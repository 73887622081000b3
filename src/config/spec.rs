//! Configuration specification types.
//!
//! This module defines the structs that map to `kongsync.yaml`. They are
//! declarative and fully describe the desired upstreams and targets.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::kong::{DEFAULT_TIMEOUT_SECS, DEFAULT_TOKEN_HEADER};

/// Smallest slot table Kong accepts.
pub const MIN_SLOTS: u32 = 10;

/// Largest slot table Kong accepts.
pub const MAX_SLOTS: u32 = 65_536;

/// Largest target weight Kong accepts.
pub const MAX_WEIGHT: u32 = 1_000;

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct SyncConfig {
    /// Admin API connection settings.
    #[validate(nested)]
    pub admin: AdminConfig,
    /// Identity state settings.
    #[serde(default)]
    pub state: StateConfig,
    /// Declared upstreams.
    #[serde(default)]
    #[validate(nested)]
    pub upstreams: Vec<UpstreamConfig>,
}

/// Admin API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct AdminConfig {
    /// Base URL of the Admin API, e.g. `http://localhost:8001`.
    #[validate(url(message = "Admin URL must be an absolute URL with a host"))]
    pub url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,
    /// Header carrying the admin token, when `KONG_ADMIN_TOKEN` is set.
    #[serde(default = "default_token_header")]
    pub token_header: String,
}

/// Identity state settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Directory holding `state.json` (defaults to `.kongsync` next to the config).
    #[serde(default)]
    pub path: Option<String>,
}

/// A declared upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct UpstreamConfig {
    /// Unique upstream name.
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    /// Slot table size. Changing it replaces the upstream.
    #[serde(default = "default_slots")]
    #[validate(range(min = MIN_SLOTS, max = MAX_SLOTS))]
    pub slots: u32,
    /// Member targets.
    #[serde(default)]
    #[validate(nested)]
    pub targets: Vec<TargetConfig>,
}

/// A declared target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct TargetConfig {
    /// Target address (`host:port`).
    #[validate(length(min = 3))]
    pub target: String,
    /// Load-balancing weight.
    #[serde(default = "default_weight")]
    #[validate(range(max = MAX_WEIGHT))]
    pub weight: u32,
}

// Default value functions

const fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_token_header() -> String {
    DEFAULT_TOKEN_HEADER.to_string()
}

const fn default_slots() -> u32 {
    100
}

const fn default_weight() -> u32 {
    100
}

impl SyncConfig {
    /// Returns the declared upstream with the given name.
    #[must_use]
    pub fn upstream(&self, name: &str) -> Option<&UpstreamConfig> {
        self.upstreams.iter().find(|u| u.name == name)
    }

    /// Returns the number of declared targets across all upstreams.
    #[must_use]
    pub fn total_targets(&self) -> usize {
        self.upstreams.iter().map(|u| u.targets.len()).sum()
    }
}

impl UpstreamConfig {
    /// Returns the declared target with the given address.
    #[must_use]
    pub fn target(&self, address: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.target == address)
    }
}
