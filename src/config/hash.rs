//! Configuration hashing for change detection.
//!
//! This module provides deterministic hashing of declarations so the state
//! file can tell whether the configuration changed since the last apply.

use sha2::{Digest, Sha256};

use super::spec::{SyncConfig, UpstreamConfig};

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the whole declaration.
    ///
    /// The admin URL is part of the hash; connection tuning
    /// (timeout, token header) is not.
    #[must_use]
    pub fn hash_config(&self, config: &SyncConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.admin.url.as_bytes());

        // Upstreams sorted by name for determinism
        let mut upstreams: Vec<_> = config.upstreams.iter().collect();
        upstreams.sort_by(|a, b| a.name.cmp(&b.name));
        for upstream in upstreams {
            hasher.update(self.hash_upstream(upstream).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single upstream and its targets.
    #[must_use]
    pub fn hash_upstream(&self, upstream: &UpstreamConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(upstream.name.as_bytes());
        hasher.update(upstream.slots.to_be_bytes());

        let mut targets: Vec<_> = upstream.targets.iter().collect();
        targets.sort_by(|a, b| a.target.cmp(&b.target));
        for target in targets {
            hasher.update(target.target.as_bytes());
            hasher.update(target.weight.to_be_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}
