//! Plan executor for applying sync plans.
//!
//! Actions run one at a time in plan order. The first failure stops the
//! run; every action that completed before it is already recorded in the
//! state, so the caller can save the state and surface the error.

use tracing::{error, info, warn};

use crate::error::{KongSyncError, PlanError, Result};
use crate::kong::RestClient;
use crate::resources::{DesiredTarget, DesiredUpstream, TargetReconciler, UpstreamReconciler};
use crate::state::SyncState;

use super::plan::{ActionType, PlannedAction, SyncPlan};

/// Executor for sync plans.
#[derive(Debug)]
pub struct PlanExecutor<'a, C: RestClient + ?Sized> {
    /// Upstream reconciler.
    upstreams: UpstreamReconciler<'a, C>,
    /// Target reconciler.
    targets: TargetReconciler<'a, C>,
}

/// Result of executing a single action.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ActionResult {
    /// Action index.
    pub index: usize,
    /// Action that was executed.
    pub action: PlannedAction,
    /// Kong id after the action, if one exists.
    pub resource_id: Option<String>,
    /// True when a delete found the object already gone.
    pub already_absent: bool,
}

/// The action that stopped a run.
#[derive(Debug)]
pub struct ActionFailure {
    /// Action index.
    pub index: usize,
    /// Action that failed.
    pub action: PlannedAction,
    /// Underlying error.
    pub error: KongSyncError,
}

/// Result of executing the entire plan.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Completed actions, in order.
    pub results: Vec<ActionResult>,
    /// The failed action, if the run stopped early.
    pub failure: Option<ActionFailure>,
    /// Number of actions never attempted.
    pub skipped: usize,
}

impl<'a, C: RestClient + ?Sized> PlanExecutor<'a, C> {
    /// Creates a new plan executor.
    #[must_use]
    pub const fn new(client: &'a C) -> Self {
        Self {
            upstreams: UpstreamReconciler::new(client),
            targets: TargetReconciler::new(client),
        }
    }

    /// Executes a sync plan against `state`.
    ///
    /// Action failures do not produce `Err`; they are reported in
    /// [`ExecutionResult::failure`] so the caller can persist partial
    /// progress first.
    pub async fn execute(&self, plan: &SyncPlan, state: &mut SyncState) -> ExecutionResult {
        info!("Executing sync plan with {} actions", plan.actions.len());

        let mut results = Vec::new();

        for (index, action) in plan.actions.iter().enumerate() {
            info!("Executing action {index}: {}", action.description());

            match self.execute_action(action, state).await {
                Ok(result) => results.push(ActionResult {
                    index,
                    action: action.clone(),
                    resource_id: result.0,
                    already_absent: result.1,
                }),
                Err(e) => {
                    error!("Action {index} failed ({}): {e}", action.description());
                    return ExecutionResult {
                        skipped: plan.actions.len() - index - 1,
                        results,
                        failure: Some(ActionFailure {
                            index,
                            action: action.clone(),
                            error: e,
                        }),
                    };
                }
            }
        }

        ExecutionResult {
            results,
            failure: None,
            skipped: 0,
        }
    }

    /// Executes one action, returning the resulting id and whether a
    /// delete found nothing to delete.
    async fn execute_action(
        &self,
        action: &PlannedAction,
        state: &mut SyncState,
    ) -> Result<(Option<String>, bool)> {
        match action.action_type {
            ActionType::CreateUpstream => {
                let created = self.upstreams.create(&desired_upstream(action)?).await?;
                state.record_upstream(&action.upstream, &created);
                Ok((Some(created.id), false))
            }
            ActionType::UpdateUpstream => {
                let id = required_id(action)?;
                let desired = desired_upstream(action)?;
                ensure_slots_unchanged(&desired, state)?;
                let outcome = self.upstreams.update(id, &desired).await?;
                let updated = outcome.into_record();
                state.record_upstream(&action.upstream, &updated);
                Ok((Some(updated.id), false))
            }
            ActionType::ReplaceUpstream => {
                let desired = desired_upstream(action)?;
                let absent = self.delete_upstream(required_id(action)?).await?;
                state.remove_upstream(&action.upstream);
                let created = self.upstreams.create(&desired).await?;
                state.record_upstream(&action.upstream, &created);
                Ok((Some(created.id), absent))
            }
            ActionType::DeleteUpstream => {
                let absent = self.delete_upstream(required_id(action)?).await?;
                state.remove_upstream(&action.upstream);
                Ok((None, absent))
            }
            ActionType::CreateTarget => {
                let desired = desired_target(action, state)?;
                let created = self.targets.create(&desired).await?;
                state.record_target(&action.upstream, &created);
                Ok((Some(created.id), false))
            }
            ActionType::UpdateTarget => {
                let desired = desired_target(action, state)?;
                let id = required_id(action)?;
                match self.targets.update(id, &desired).await {
                    Ok(outcome) => {
                        let replaced = outcome.into_record();
                        state.record_target(&action.upstream, &replaced);
                        Ok((Some(replaced.id), false))
                    }
                    Err(e) => {
                        if e.as_api().and_then(|api| api.failed_step())
                            == Some(crate::resources::UpdateStep::Create)
                        {
                            // The old target is gone even though no replacement exists
                            if let Some(address) = &action.target {
                                state.remove_target(&action.upstream, address);
                            }
                        }
                        Err(e)
                    }
                }
            }
            ActionType::DeleteTarget => {
                let upstream_id = recorded_upstream_id(action, state)?;
                let id = required_id(action)?;
                let absent = match self.targets.delete(id, &upstream_id).await {
                    Ok(()) => false,
                    Err(e) if e.is_not_found() => {
                        warn!("Target {} was already deleted", action.address());
                        true
                    }
                    Err(e) => return Err(e),
                };
                if let Some(address) = &action.target {
                    state.remove_target(&action.upstream, address);
                }
                Ok((None, absent))
            }
        }
    }

    /// Deletes an upstream, treating 404 as already gone.
    async fn delete_upstream(&self, id: &str) -> Result<bool> {
        match self.upstreams.delete(id).await {
            Ok(()) => Ok(false),
            Err(e) if e.is_not_found() => {
                warn!("Upstream {id} was already deleted");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }
}

fn required_id(action: &PlannedAction) -> Result<&str> {
    action.id.as_deref().ok_or_else(|| {
        KongSyncError::internal(format!("{} has no recorded id", action.description()))
    })
}

fn desired_upstream(action: &PlannedAction) -> Result<DesiredUpstream> {
    let slots = action.slots.ok_or_else(|| {
        KongSyncError::internal(format!("{} has no declared slots", action.description()))
    })?;
    Ok(DesiredUpstream {
        name: action.upstream.clone(),
        slots,
    })
}

/// Slots are create-only in Kong; a PATCH must never carry a new value.
fn ensure_slots_unchanged(desired: &DesiredUpstream, state: &SyncState) -> Result<()> {
    match state.get_upstream(&desired.name) {
        Some(recorded) if recorded.slots != desired.slots => {
            Err(KongSyncError::Plan(PlanError::ImmutableField {
                resource: String::from("upstream"),
                name: desired.name.clone(),
                field: String::from("slots"),
                from: recorded.slots.to_string(),
                to: desired.slots.to_string(),
            }))
        }
        _ => Ok(()),
    }
}

fn recorded_upstream_id(action: &PlannedAction, state: &SyncState) -> Result<String> {
    state
        .get_upstream(&action.upstream)
        .map(|u| u.id.clone())
        .ok_or_else(|| {
            KongSyncError::Plan(PlanError::UnknownUpstream {
                name: action.upstream.clone(),
            })
        })
}

/// Builds the desired target, routed through the owning upstream's id.
fn desired_target(action: &PlannedAction, state: &SyncState) -> Result<DesiredTarget> {
    let upstream = recorded_upstream_id(action, state)?;
    let target = action.target.clone().ok_or_else(|| {
        KongSyncError::internal(format!("{} has no target address", action.description()))
    })?;
    let weight = action.weight.ok_or_else(|| {
        KongSyncError::internal(format!("{} has no declared weight", action.description()))
    })?;
    Ok(DesiredTarget {
        target,
        weight,
        upstream,
    })
}

impl ExecutionResult {
    /// Returns true if every action completed.
    #[must_use]
    pub const fn all_successful(&self) -> bool {
        self.failure.is_none()
    }

    /// Addresses of the resources touched by completed actions.
    #[must_use]
    pub fn touched(&self) -> Vec<String> {
        self.results.iter().map(|r| r.action.address()).collect()
    }

    /// Consumes the result, returning the failure's error if there was one.
    ///
    /// # Errors
    ///
    /// Returns the error of the action that stopped the run.
    pub fn into_result(self) -> Result<Vec<ActionResult>> {
        match self.failure {
            Some(failure) => Err(failure.error),
            None => Ok(self.results),
        }
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let failed = usize::from(self.failure.is_some());
        write!(
            f,
            "Executed {} actions: {} successful, {} failed, {} skipped",
            self.results.len() + failed,
            self.results.len(),
            failed,
            self.skipped
        )
    }
}
