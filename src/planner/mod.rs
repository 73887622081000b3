//! Planning module for sync operations.
//!
//! This module compares the declaration with refreshed identities and
//! turns the differences into an ordered plan of Admin API calls.

mod diff;
mod plan;
mod executor;

pub use diff::{DiffDetail, DiffEngine, DiffResult, DiffType, ResourceDiff, ResourceKind};
pub use plan::{ActionType, PlannedAction, SyncPlan};
pub use executor::{ActionFailure, ActionResult, ExecutionResult, PlanExecutor};
