//! Kong Admin API wire types.
//!
//! Field presence follows the Admin API convention of omitting empty
//! strings and zero integers from request bodies.

use serde::{Deserialize, Serialize};

/// An upstream as sent to and returned by `/upstreams`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Upstream {
    /// Server-assigned identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Unique upstream name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Size of the balancer slot table.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub slots: u32,
}

/// Body of a target creation request.
///
/// The owning upstream is routed through the request path, never the body.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TargetRequest {
    /// Identifier, only set when re-submitting a known target.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Target address (`host:port`).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target: String,
    /// Load-balancing weight.
    #[serde(skip_serializing_if = "is_zero")]
    pub weight: u32,
}

/// A target as returned by the Admin API.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    /// Server-assigned identifier.
    #[serde(default)]
    pub id: String,
    /// Target address (`host:port`).
    #[serde(default)]
    pub target: String,
    /// Load-balancing weight.
    #[serde(default)]
    pub weight: u32,
    /// Identifier of the owning upstream.
    #[serde(default)]
    pub upstream_id: String,
}

/// Listing returned by `/upstreams/{upstream}/targets/active`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetList {
    /// Number of entries reported by Kong.
    #[serde(default)]
    pub total: i64,
    /// Listed targets.
    #[serde(default)]
    pub data: Vec<Target>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl TargetList {
    /// Returns true when the listing holds no usable entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total <= 0 || self.data.is_empty()
    }
}
