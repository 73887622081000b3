//! Diff engine for comparing declared vs recorded state.
//!
//! The recorded state passed in here must already be refreshed against
//! Kong: ids that no longer resolve are forgotten, and observed fields
//! (`name`, `slots`, `weight`) reflect what Kong returned.

use tracing::debug;

use crate::config::{SyncConfig, UpstreamConfig};
use crate::state::{SyncState, UpstreamState};

/// Engine for computing diffs between declared and recorded states.
#[derive(Debug, Default)]
pub struct DiffEngine;

/// Kind of Kong object a diff refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// An upstream.
    Upstream,
    /// A target of an upstream.
    Target,
}

/// Difference for a single resource.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ResourceDiff {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Declared upstream name (owner, for targets).
    pub upstream: String,
    /// Target address, for targets.
    pub target: Option<String>,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Recorded Kong id, if one exists.
    pub id: Option<String>,
    /// Field-level details.
    pub details: Vec<DiffDetail>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    /// Declared but not recorded.
    Create,
    /// Recorded with a mutable field that differs.
    Update,
    /// Recorded with an immutable field that differs.
    Replace,
    /// Recorded but no longer declared.
    Delete,
    /// Converged.
    NoChange,
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DiffDetail {
    /// Field that differs.
    pub field: String,
    /// Recorded value.
    pub old_value: Option<String>,
    /// Declared value.
    pub new_value: Option<String>,
}

/// Complete diff result.
#[derive(Debug, Default, serde::Serialize)]
pub struct DiffResult {
    /// All resource diffs, upstreams before their targets.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update in place.
    pub updates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the diff between the declaration and refreshed state.
    #[must_use]
    pub fn compute_diff(&self, config: &SyncConfig, state: &SyncState) -> DiffResult {
        let mut diffs = Vec::new();

        for declared in &config.upstreams {
            match state.get_upstream(&declared.name) {
                None => {
                    debug!("Upstream {} needs to be created", declared.name);
                    diffs.push(ResourceDiff::upstream(
                        &declared.name,
                        DiffType::Create,
                        None,
                        vec![DiffDetail::added("slots", declared.slots)],
                    ));
                    Self::push_target_creates(declared, &mut diffs);
                }
                Some(recorded) if recorded.slots != declared.slots => {
                    debug!(
                        "Upstream {} slots changed ({} -> {}), replacing",
                        declared.name, recorded.slots, declared.slots
                    );
                    diffs.push(ResourceDiff::upstream(
                        &declared.name,
                        DiffType::Replace,
                        Some(&recorded.id),
                        vec![DiffDetail::changed("slots", recorded.slots, declared.slots)],
                    ));
                    Self::push_target_creates(declared, &mut diffs);
                }
                Some(recorded) => {
                    if recorded.name == declared.name {
                        diffs.push(ResourceDiff::upstream(
                            &declared.name,
                            DiffType::NoChange,
                            Some(&recorded.id),
                            vec![],
                        ));
                    } else {
                        debug!(
                            "Upstream {} was renamed remotely to {}",
                            declared.name, recorded.name
                        );
                        diffs.push(ResourceDiff::upstream(
                            &declared.name,
                            DiffType::Update,
                            Some(&recorded.id),
                            vec![DiffDetail::changed("name", &recorded.name, &declared.name)],
                        ));
                    }
                    Self::diff_targets(declared, recorded, &mut diffs);
                }
            }
        }

        for (name, recorded) in &state.upstreams {
            if config.upstream(name).is_none() {
                debug!("Upstream {name} is no longer declared");
                diffs.push(ResourceDiff::upstream(
                    name,
                    DiffType::Delete,
                    Some(&recorded.id),
                    vec![DiffDetail::removed("slots", recorded.slots)],
                ));
            }
        }

        DiffResult::from_diffs(diffs)
    }

    /// Adds a create for every declared target of a new upstream.
    fn push_target_creates(declared: &UpstreamConfig, diffs: &mut Vec<ResourceDiff>) {
        for target in &declared.targets {
            diffs.push(ResourceDiff::target(
                &declared.name,
                &target.target,
                DiffType::Create,
                None,
                vec![DiffDetail::added("weight", target.weight)],
            ));
        }
    }

    /// Diffs the targets of an upstream that is kept.
    fn diff_targets(
        declared: &UpstreamConfig,
        recorded: &UpstreamState,
        diffs: &mut Vec<ResourceDiff>,
    ) {
        for target in &declared.targets {
            match recorded.targets.get(&target.target) {
                None => diffs.push(ResourceDiff::target(
                    &declared.name,
                    &target.target,
                    DiffType::Create,
                    None,
                    vec![DiffDetail::added("weight", target.weight)],
                )),
                Some(existing) if weight_differs(existing.weight, target.weight) => {
                    diffs.push(ResourceDiff::target(
                        &declared.name,
                        &target.target,
                        DiffType::Update,
                        Some(&existing.id),
                        vec![DiffDetail::changed("weight", existing.weight, target.weight)],
                    ));
                }
                Some(existing) => diffs.push(ResourceDiff::target(
                    &declared.name,
                    &target.target,
                    DiffType::NoChange,
                    Some(&existing.id),
                    vec![],
                )),
            }
        }

        for (address, existing) in &recorded.targets {
            if declared.target(address).is_none() {
                diffs.push(ResourceDiff::target(
                    &declared.name,
                    address,
                    DiffType::Delete,
                    Some(&existing.id),
                    vec![DiffDetail::removed("weight", existing.weight)],
                ));
            }
        }
    }
}

/// A declared weight of 0 is not sent, so Kong's default stands.
const fn weight_differs(observed: u32, declared: u32) -> bool {
    declared != 0 && observed != declared
}

impl ResourceDiff {
    fn upstream(name: &str, diff_type: DiffType, id: Option<&str>, details: Vec<DiffDetail>) -> Self {
        Self {
            kind: ResourceKind::Upstream,
            upstream: name.to_string(),
            target: None,
            diff_type,
            id: id.map(String::from),
            details,
        }
    }

    fn target(
        upstream: &str,
        address: &str,
        diff_type: DiffType,
        id: Option<&str>,
        details: Vec<DiffDetail>,
    ) -> Self {
        Self {
            kind: ResourceKind::Target,
            upstream: upstream.to_string(),
            target: Some(address.to_string()),
            diff_type,
            id: id.map(String::from),
            details,
        }
    }

    /// Returns a display address such as `svc-a` or `svc-a/10.0.0.1:80`.
    #[must_use]
    pub fn address(&self) -> String {
        self.target.as_ref().map_or_else(
            || self.upstream.clone(),
            |target| format!("{}/{target}", self.upstream),
        )
    }
}

impl DiffDetail {
    fn added(field: &str, value: impl ToString) -> Self {
        Self {
            field: field.to_string(),
            old_value: None,
            new_value: Some(value.to_string()),
        }
    }

    fn removed(field: &str, value: impl ToString) -> Self {
        Self {
            field: field.to_string(),
            old_value: Some(value.to_string()),
            new_value: None,
        }
    }

    fn changed(field: &str, old: impl ToString, new: impl ToString) -> Self {
        Self {
            field: field.to_string(),
            old_value: Some(old.to_string()),
            new_value: Some(new.to_string()),
        }
    }
}

impl DiffResult {
    fn from_diffs(diffs: Vec<ResourceDiff>) -> Self {
        let count = |t: DiffType| diffs.iter().filter(|d| d.diff_type == t).count();
        Self {
            creates: count(DiffType::Create),
            updates: count(DiffType::Update),
            replaces: count(DiffType::Replace),
            deletes: count(DiffType::Delete),
            unchanged: count(DiffType::NoChange),
            diffs,
        }
    }

    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    /// Filters to only diffs that require action.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::NoChange)
            .collect()
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Upstream => "upstream",
            Self::Target => "target",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for DiffDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let old = self.old_value.as_deref().unwrap_or("-");
        let new = self.new_value.as_deref().unwrap_or("-");
        write!(f, "{}: {old} -> {new}", self.field)
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.address(), self.diff_type)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{detail}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdminConfig, StateConfig, TargetConfig};
    use crate::kong::{Target, Upstream};

    fn config(upstreams: Vec<UpstreamConfig>) -> SyncConfig {
        SyncConfig {
            admin: AdminConfig {
                url: String::from("http://localhost:8001"),
                timeout_secs: 30,
                token_header: String::from("Kong-Admin-Token"),
            },
            state: StateConfig::default(),
            upstreams,
        }
    }

    fn declared(name: &str, slots: u32, targets: &[(&str, u32)]) -> UpstreamConfig {
        UpstreamConfig {
            name: name.to_string(),
            slots,
            targets: targets
                .iter()
                .map(|(t, w)| TargetConfig {
                    target: (*t).to_string(),
                    weight: *w,
                })
                .collect(),
        }
    }

    fn recorded(state: &mut SyncState, name: &str, id: &str, slots: u32, targets: &[(&str, &str, u32)]) {
        state.record_upstream(
            name,
            &Upstream {
                id: id.to_string(),
                name: name.to_string(),
                slots,
            },
        );
        for (tid, address, weight) in targets {
            state.record_target(
                name,
                &Target {
                    id: (*tid).to_string(),
                    target: (*address).to_string(),
                    weight: *weight,
                    upstream_id: id.to_string(),
                },
            );
        }
    }

    fn kinds(result: &DiffResult) -> Vec<(String, DiffType)> {
        result
            .diffs
            .iter()
            .map(|d| (d.address(), d.diff_type))
            .collect()
    }

    #[test]
    fn test_empty_state_creates_everything() {
        let cfg = config(vec![declared("svc-a", 100, &[("10.0.0.1:8080", 100)])]);
        let state = SyncState::new("http://localhost:8001");

        let result = DiffEngine::new().compute_diff(&cfg, &state);

        assert_eq!(
            kinds(&result),
            vec![
                (String::from("svc-a"), DiffType::Create),
                (String::from("svc-a/10.0.0.1:8080"), DiffType::Create),
            ]
        );
        assert_eq!(result.creates, 2);
    }

    #[test]
    fn test_converged_state_has_no_changes() {
        let cfg = config(vec![declared("svc-a", 100, &[("10.0.0.1:8080", 100)])]);
        let mut state = SyncState::new("http://localhost:8001");
        recorded(&mut state, "svc-a", "u-1", 100, &[("t-1", "10.0.0.1:8080", 100)]);

        let result = DiffEngine::new().compute_diff(&cfg, &state);

        assert!(!result.has_changes());
        assert_eq!(result.unchanged, 2);
    }

    #[test]
    fn test_slot_change_replaces_and_recreates_targets() {
        let cfg = config(vec![declared("svc-a", 200, &[("10.0.0.1:8080", 100)])]);
        let mut state = SyncState::new("http://localhost:8001");
        recorded(&mut state, "svc-a", "u-1", 100, &[("t-1", "10.0.0.1:8080", 100)]);

        let result = DiffEngine::new().compute_diff(&cfg, &state);

        assert_eq!(
            kinds(&result),
            vec![
                (String::from("svc-a"), DiffType::Replace),
                (String::from("svc-a/10.0.0.1:8080"), DiffType::Create),
            ]
        );
        assert_eq!(result.diffs[0].id.as_deref(), Some("u-1"));
    }

    #[test]
    fn test_weight_change_updates_target() {
        let cfg = config(vec![declared("svc-a", 100, &[("10.0.0.1:8080", 50)])]);
        let mut state = SyncState::new("http://localhost:8001");
        recorded(&mut state, "svc-a", "u-1", 100, &[("t-1", "10.0.0.1:8080", 100)]);

        let result = DiffEngine::new().compute_diff(&cfg, &state);
        let update = &result.actionable_diffs()[0];

        assert_eq!(update.diff_type, DiffType::Update);
        assert_eq!(update.id.as_deref(), Some("t-1"));
        assert_eq!(update.details[0].to_string(), "weight: 100 -> 50");
    }

    #[test]
    fn test_zero_weight_accepts_kong_default() {
        let cfg = config(vec![declared("svc-a", 100, &[("10.0.0.1:8080", 0)])]);
        let mut state = SyncState::new("http://localhost:8001");
        recorded(&mut state, "svc-a", "u-1", 100, &[("t-1", "10.0.0.1:8080", 100)]);

        let result = DiffEngine::new().compute_diff(&cfg, &state);

        assert!(!result.has_changes());
    }

    #[test]
    fn test_remote_rename_is_update() {
        let cfg = config(vec![declared("svc-a", 100, &[])]);
        let mut state = SyncState::new("http://localhost:8001");
        recorded(&mut state, "svc-a", "u-1", 100, &[]);
        state.get_upstream_mut("svc-a").unwrap().name = String::from("renamed");

        let result = DiffEngine::new().compute_diff(&cfg, &state);
        assert_eq!(result.updates, 1);
    }

    #[test]
    fn test_undeclared_resources_are_deleted() {
        let cfg = config(vec![declared("svc-a", 100, &[])]);
        let mut state = SyncState::new("http://localhost:8001");
        recorded(&mut state, "svc-a", "u-1", 100, &[("t-1", "10.0.0.1:8080", 100)]);
        recorded(&mut state, "svc-old", "u-2", 100, &[("t-2", "10.0.0.9:8080", 100)]);

        let result = DiffEngine::new().compute_diff(&cfg, &state);

        assert_eq!(result.deletes, 2);
        let deleted: Vec<String> = result
            .diffs
            .iter()
            .filter(|d| d.diff_type == DiffType::Delete)
            .map(ResourceDiff::address)
            .collect();
        assert!(deleted.contains(&String::from("svc-a/10.0.0.1:8080")));
        assert!(deleted.contains(&String::from("svc-old")));
    }
}
