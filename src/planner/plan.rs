//! Sync plan types and construction.
//!
//! A plan orders the actionable diffs so that every request is valid at
//! the moment it is sent: targets leave before their upstream does, and an
//! upstream exists before targets are created under it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::SyncConfig;

use super::diff::{DiffResult, DiffType, ResourceDiff, ResourceKind};

/// A complete sync plan.
#[derive(Debug, Clone, Serialize)]
pub struct SyncPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Configuration hash this plan is based on.
    pub config_hash: String,
    /// Planned actions in execution order.
    pub actions: Vec<PlannedAction>,
}

/// A single planned action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedAction {
    /// Action type.
    pub action_type: ActionType,
    /// Declared upstream name (owner, for targets).
    pub upstream: String,
    /// Target address, for target actions.
    pub target: Option<String>,
    /// Existing Kong id the action operates on.
    pub id: Option<String>,
    /// Declared slot count, for upstream creates and updates.
    pub slots: Option<u32>,
    /// Declared weight, for target creates and updates.
    pub weight: Option<u32>,
    /// Reason for this action.
    pub reason: String,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Delete a target.
    DeleteTarget,
    /// Delete an upstream and, remotely, its targets.
    DeleteUpstream,
    /// Delete and recreate an upstream whose slots changed.
    ReplaceUpstream,
    /// Create an upstream.
    CreateUpstream,
    /// Update an upstream in place.
    UpdateUpstream,
    /// Create a target.
    CreateTarget,
    /// Replace a target with one carrying the declared weight.
    UpdateTarget,
}

impl ActionType {
    /// Execution phase; actions run phase by phase.
    #[must_use]
    pub const fn phase(self) -> u8 {
        match self {
            Self::DeleteTarget => 0,
            Self::DeleteUpstream => 1,
            Self::ReplaceUpstream | Self::CreateUpstream | Self::UpdateUpstream => 2,
            Self::CreateTarget | Self::UpdateTarget => 3,
        }
    }

    /// Returns true for actions that remove a remote object.
    #[must_use]
    pub const fn is_destructive(self) -> bool {
        matches!(
            self,
            Self::DeleteTarget | Self::DeleteUpstream | Self::ReplaceUpstream | Self::UpdateTarget
        )
    }

    const fn from_diff(kind: ResourceKind, diff_type: DiffType) -> Option<Self> {
        match (kind, diff_type) {
            (ResourceKind::Upstream, DiffType::Create) => Some(Self::CreateUpstream),
            (ResourceKind::Upstream, DiffType::Update) => Some(Self::UpdateUpstream),
            (ResourceKind::Upstream, DiffType::Replace) => Some(Self::ReplaceUpstream),
            (ResourceKind::Upstream, DiffType::Delete) => Some(Self::DeleteUpstream),
            (ResourceKind::Target, DiffType::Create) => Some(Self::CreateTarget),
            (ResourceKind::Target, DiffType::Update | DiffType::Replace) => {
                Some(Self::UpdateTarget)
            }
            (ResourceKind::Target, DiffType::Delete) => Some(Self::DeleteTarget),
            (_, DiffType::NoChange) => None,
        }
    }
}

impl SyncPlan {
    /// Creates a new plan from a diff result.
    #[must_use]
    pub fn from_diff(diff: &DiffResult, config: &SyncConfig, config_hash: &str) -> Self {
        let mut actions: Vec<PlannedAction> = diff
            .diffs
            .iter()
            .filter_map(|d| PlannedAction::from_diff(d, config))
            .collect();

        // Stable: declaration order is kept within a phase
        actions.sort_by_key(|a| a.action_type.phase());

        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            actions,
        }
    }

    /// Creates an empty plan (no changes needed).
    #[must_use]
    pub fn empty(config_hash: &str) -> Self {
        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            actions: vec![],
        }
    }

    /// Returns true if the plan is empty (no changes).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Returns the number of actions of a type.
    #[must_use]
    pub fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }

    /// Returns true if any action removes a remote object.
    #[must_use]
    pub fn has_destructive_actions(&self) -> bool {
        self.actions.iter().any(|a| a.action_type.is_destructive())
    }
}

impl PlannedAction {
    fn from_diff(diff: &ResourceDiff, config: &SyncConfig) -> Option<Self> {
        let action_type = ActionType::from_diff(diff.kind, diff.diff_type)?;
        let declared = config.upstream(&diff.upstream);

        let slots = declared.map(|u| u.slots);
        let weight = diff
            .target
            .as_deref()
            .and_then(|address| declared.and_then(|u| u.target(address)))
            .map(|t| t.weight);

        let reason = match action_type {
            ActionType::CreateUpstream | ActionType::CreateTarget => {
                String::from("declared but not present")
            }
            ActionType::DeleteUpstream | ActionType::DeleteTarget => {
                String::from("no longer declared")
            }
            ActionType::ReplaceUpstream => String::from("slots cannot change in place"),
            ActionType::UpdateUpstream => String::from("name drifted remotely"),
            ActionType::UpdateTarget => String::from("weight changed, target is replaced"),
        };

        Some(Self {
            action_type,
            upstream: diff.upstream.clone(),
            target: diff.target.clone(),
            id: diff.id.clone(),
            slots,
            weight,
            reason,
        })
    }

    /// Returns a display address such as `svc-a` or `svc-a/10.0.0.1:80`.
    #[must_use]
    pub fn address(&self) -> String {
        self.target.as_ref().map_or_else(
            || self.upstream.clone(),
            |target| format!("{}/{target}", self.upstream),
        )
    }

    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action_type {
            ActionType::CreateUpstream => format!("Create upstream '{}'", self.upstream),
            ActionType::UpdateUpstream => format!("Update upstream '{}'", self.upstream),
            ActionType::ReplaceUpstream => format!("Replace upstream '{}'", self.upstream),
            ActionType::DeleteUpstream => format!("Delete upstream '{}'", self.upstream),
            ActionType::CreateTarget => format!("Create target '{}'", self.address()),
            ActionType::UpdateTarget => format!("Replace target '{}'", self.address()),
            ActionType::DeleteTarget => format!("Delete target '{}'", self.address()),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CreateUpstream | Self::CreateTarget => "create",
            Self::UpdateUpstream | Self::UpdateTarget => "update",
            Self::ReplaceUpstream => "replace",
            Self::DeleteUpstream | Self::DeleteTarget => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for SyncPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.actions.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Sync Plan ({} actions):", self.actions.len())?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {i}. {action}")?;
        }

        Ok(())
    }
}
