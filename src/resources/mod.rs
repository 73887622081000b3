//! Resource reconcilers for Kong upstreams and targets.
//!
//! Each reconciler maps one lifecycle transition (create, read, update,
//! delete) onto the minimal set of Admin API calls, and interprets the
//! returned status codes through the shared rules in [`status`].
//!
//! ```text
//! UNBOUND --create(201)--> BOUND
//! UNBOUND --create(409)--> ERROR(exists)        upstreams only
//! BOUND   --read(404)----> UNBOUND              reported as Ok(None)
//! BOUND   --read(200)----> BOUND                fields refreshed
//! BOUND   --update(ok)---> BOUND                targets get a new id
//! BOUND   --delete(204)--> UNBOUND
//! any     --unexpected---> ERROR
//! ```

pub mod status;
mod target;
mod upstream;

pub use target::TargetReconciler;
pub use upstream::UpstreamReconciler;

use serde::{Deserialize, Serialize};

/// Desired state of an upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredUpstream {
    /// Unique upstream name.
    pub name: String,
    /// Slot table size. Immutable once the upstream exists.
    pub slots: u32,
}

/// Desired state of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredTarget {
    /// Target address (`host:port`).
    pub target: String,
    /// Load-balancing weight.
    pub weight: u32,
    /// Identifier or name of the owning upstream.
    pub upstream: String,
}

/// Outcome of an update.
///
/// A replaced resource has a new identity; the old identifier must be
/// discarded by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome<T> {
    /// Updated in place; the identifier is unchanged.
    Updated(T),
    /// Destroyed and recreated under a new identifier.
    Replaced {
        /// Identifier that no longer exists.
        old_id: String,
        /// The newly created record.
        record: T,
    },
}

/// Step of a target's delete-then-create update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStep {
    /// Removing the existing target. On failure the old target may still be live.
    Delete,
    /// Creating the replacement. On failure the old target is gone and no new one exists.
    Create,
}

impl<T> UpdateOutcome<T> {
    /// Returns the resulting record.
    #[must_use]
    pub const fn record(&self) -> &T {
        match self {
            Self::Updated(record) | Self::Replaced { record, .. } => record,
        }
    }

    /// Consumes the outcome and returns the resulting record.
    #[must_use]
    pub fn into_record(self) -> T {
        match self {
            Self::Updated(record) | Self::Replaced { record, .. } => record,
        }
    }

    /// Returns the abandoned identifier if the resource was replaced.
    #[must_use]
    pub fn replaced_id(&self) -> Option<&str> {
        match self {
            Self::Updated(_) => None,
            Self::Replaced { old_id, .. } => Some(old_id),
        }
    }
}

impl std::fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let step = match self {
            Self::Delete => "delete",
            Self::Create => "create",
        };
        write!(f, "{step}")
    }
}
