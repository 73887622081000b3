//! Reconciler for converging Kong to the declaration.
//!
//! A run has three stages:
//! 1. refresh: re-read every recorded id and forget the ones Kong no longer knows
//! 2. diff and plan against the refreshed identities
//! 3. execute the plan one action at a time, stopping at the first failure
//!
//! State is saved after every mutating run, including failed ones, so the
//! ids of objects created before a failure are never lost.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ConfigHasher, SyncConfig};
use crate::error::{KongSyncError, PlanError, ReconcileError, Result};
use crate::kong::{RestClient, Target, Upstream};
use crate::planner::{ActionResult, ActionType, DiffEngine, DiffResult, PlanExecutor, SyncPlan};
use crate::resources::{TargetReconciler, UpstreamReconciler};
use crate::state::{holder_id, HistoryEntry, LockInfo, StateStore, SyncOperation, SyncState};

/// Reconciler for maintaining desired state.
pub struct Reconciler<'a, C: RestClient + ?Sized, S: StateStore> {
    /// Declaration.
    config: &'a SyncConfig,
    /// State store.
    state_store: &'a S,
    /// Admin API client.
    client: &'a C,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Diff engine.
    diff_engine: DiffEngine,
}

/// Outcome of re-reading recorded identities.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RefreshReport {
    /// Upstreams still present.
    pub upstreams: usize,
    /// Targets still present.
    pub targets: usize,
    /// Addresses whose ids no longer resolve.
    pub forgotten: Vec<String>,
}

/// A refreshed state with the plan computed from it.
#[derive(Debug)]
pub struct PreparedPlan {
    /// Refreshed state the plan applies to.
    pub state: SyncState,
    /// Refresh outcome.
    pub refresh: RefreshReport,
    /// Diff between declaration and refreshed state.
    pub diff: DiffResult,
    /// Ordered actions.
    pub plan: SyncPlan,
    /// Stored state as loaded, before refresh; `None` if nothing was stored.
    baseline: Option<SyncState>,
}

/// Result of a reconciliation run.
#[derive(Debug, Serialize)]
pub struct ReconciliationResult {
    /// Number of resources created.
    pub created: usize,
    /// Number of resources updated (targets are replaced).
    pub updated: usize,
    /// Number of upstreams replaced.
    pub replaced: usize,
    /// Number of resources deleted.
    pub deleted: usize,
    /// Number of resources unchanged.
    pub unchanged: usize,
    /// Ids forgotten during refresh.
    pub forgotten: Vec<String>,
    /// Completed actions.
    pub actions: Vec<ActionResult>,
    /// Hash of the applied configuration.
    pub config_hash: String,
}

/// Report of drift detection.
#[derive(Debug, Serialize)]
pub struct DriftReport {
    /// Whether drift was detected.
    pub has_drift: bool,
    /// Resources that differ from the declaration.
    pub drifted_resources: Vec<String>,
    /// Recorded ids that no longer resolve.
    pub forgotten: Vec<String>,
    /// Declared upstreams plus targets.
    pub total_resources: usize,
    /// Recorded upstreams plus targets after refresh.
    pub observed_count: usize,
}

/// Result of a destroy run.
#[derive(Debug, Serialize)]
pub struct DestroyResult {
    /// Upstreams deleted.
    pub deleted: Vec<String>,
    /// Upstreams that were already gone.
    pub already_absent: Vec<String>,
}

impl<'a, C: RestClient + ?Sized, S: StateStore> Reconciler<'a, C, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(config: &'a SyncConfig, state_store: &'a S, client: &'a C) -> Self {
        Self {
            config,
            state_store,
            client,
            hasher: ConfigHasher::new(),
            diff_engine: DiffEngine::new(),
        }
    }

    /// Loads the recorded state, or an empty one.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read.
    pub async fn load_state(&self) -> Result<SyncState> {
        Ok(self.adopt_state(self.state_store.load().await?))
    }

    fn adopt_state(&self, stored: Option<SyncState>) -> SyncState {
        let Some(mut state) = stored else {
            debug!("No recorded state, starting empty");
            return SyncState::new(&self.config.admin.url);
        };

        if state.admin_url != self.config.admin.url {
            warn!(
                "State was recorded against {}, now targeting {}",
                state.admin_url, self.config.admin.url
            );
            state.admin_url.clone_from(&self.config.admin.url);
        }

        state
    }

    /// Re-reads every recorded id and forgets those Kong no longer knows.
    ///
    /// # Errors
    ///
    /// Returns the first read error other than absence.
    pub async fn refresh(&self, state: &mut SyncState) -> Result<RefreshReport> {
        let upstreams = UpstreamReconciler::new(self.client);
        let targets = TargetReconciler::new(self.client);
        let mut report = RefreshReport::default();

        let recorded: Vec<(String, String)> = state
            .upstreams
            .iter()
            .map(|(name, u)| (name.clone(), u.id.clone()))
            .collect();

        for (name, id) in recorded {
            let Some(observed) = upstreams.read(&id).await? else {
                warn!("Upstream {name} ({id}) no longer exists, forgetting it");
                state.remove_upstream(&name);
                report.forgotten.push(name);
                continue;
            };
            state.record_upstream(&name, &observed);
            report.upstreams += 1;

            let recorded_targets: Vec<(String, String)> = state
                .get_upstream(&name)
                .map(|u| {
                    u.targets
                        .iter()
                        .map(|(address, t)| (address.clone(), t.id.clone()))
                        .collect()
                })
                .unwrap_or_default();

            for (address, target_id) in recorded_targets {
                match targets.read(&target_id, &id).await? {
                    Some(target) => {
                        if target.target != address {
                            state.remove_target(&name, &address);
                        }
                        state.record_target(&name, &target);
                        report.targets += 1;
                    }
                    None => {
                        warn!("Target {name}/{address} ({target_id}) is no longer active, forgetting it");
                        state.remove_target(&name, &address);
                        report.forgotten.push(format!("{name}/{address}"));
                    }
                }
            }
        }

        debug!(
            "Refreshed {} upstreams and {} targets, forgot {}",
            report.upstreams,
            report.targets,
            report.forgotten.len()
        );
        Ok(report)
    }

    /// Refreshes the recorded state and computes a plan, without mutating Kong.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded or refreshed.
    pub async fn prepare(&self) -> Result<PreparedPlan> {
        let baseline = self.state_store.load().await?;
        let mut state = self.adopt_state(baseline.clone());
        let refresh = self.refresh(&mut state).await?;

        let diff = self.diff_engine.compute_diff(self.config, &state);
        info!(
            "Diff: {} creates, {} updates, {} replaces, {} deletes, {} unchanged",
            diff.creates, diff.updates, diff.replaces, diff.deletes, diff.unchanged
        );

        let config_hash = self.hasher.hash_config(self.config);
        let plan = if diff.has_changes() {
            SyncPlan::from_diff(&diff, self.config, &config_hash)
        } else {
            SyncPlan::empty(&config_hash)
        };

        Ok(PreparedPlan {
            state,
            refresh,
            diff,
            plan,
            baseline,
        })
    }

    /// Computes the plan for the current declaration.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded or refreshed.
    pub async fn plan(&self) -> Result<SyncPlan> {
        Ok(self.prepare().await?.plan)
    }

    /// Refreshes, plans and applies in one locked run.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failed action, after saving state.
    pub async fn reconcile(&self) -> Result<ReconciliationResult> {
        let lock = self.acquire_lock().await?;
        let result = match self.prepare().await {
            Ok(prepared) => self.apply_unlocked(prepared).await,
            Err(e) => Err(e),
        };
        self.release_lock(&lock).await;
        result
    }

    /// Applies a previously prepared plan under the state lock.
    ///
    /// The plan is only applied if the stored state is still the one it was
    /// computed from.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Aborted`] if the stored state changed since
    /// [`Reconciler::prepare`], otherwise the error of the first failed
    /// action, after saving state.
    pub async fn apply(&self, prepared: PreparedPlan) -> Result<ReconciliationResult> {
        let lock = self.acquire_lock().await?;
        let result = match self.ensure_baseline(&prepared).await {
            Ok(()) => self.apply_unlocked(prepared).await,
            Err(e) => Err(e),
        };
        self.release_lock(&lock).await;
        result
    }

    async fn ensure_baseline(&self, prepared: &PreparedPlan) -> Result<()> {
        let current = self.state_store.load().await?;
        if current == prepared.baseline {
            return Ok(());
        }

        warn!("Stored state changed after the plan was computed, refusing to apply it");
        Err(KongSyncError::Reconcile(ReconcileError::Aborted {
            reason: String::from("state changed since the plan was computed; run plan again"),
        }))
    }

    async fn apply_unlocked(&self, prepared: PreparedPlan) -> Result<ReconciliationResult> {
        let PreparedPlan {
            mut state,
            refresh,
            diff,
            plan,
            ..
        } = prepared;

        let mut result = ReconciliationResult {
            created: diff.creates,
            updated: diff.updates,
            replaced: diff.replaces,
            deleted: diff.deletes,
            unchanged: diff.unchanged,
            forgotten: refresh.forgotten,
            actions: vec![],
            config_hash: plan.config_hash.clone(),
        };

        if plan.is_empty() {
            info!("No changes required - state is converged");
            state.config_hash.clone_from(&plan.config_hash);
            self.state_store.save(&state).await?;
            return Ok(result);
        }

        let execution = PlanExecutor::new(self.client).execute(&plan, &mut state).await;
        info!("{execution}");

        let entry = match &execution.failure {
            None => HistoryEntry::new(SyncOperation::Apply, &plan.config_hash, execution.touched()),
            Some(failure) => HistoryEntry::failed(
                SyncOperation::Apply,
                &plan.config_hash,
                execution.touched(),
                &format!("{}: {}", failure.action.description(), failure.error),
            ),
        };
        state.add_history(entry);
        if execution.all_successful() {
            state.config_hash.clone_from(&plan.config_hash);
        }

        self.state_store.save(&state).await?;

        result.actions = execution.into_result()?;
        Ok(result)
    }

    /// Checks for drift without applying changes or saving state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded or refreshed.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        info!("Checking for drift against {}", self.config.admin.url);

        let prepared = self.prepare().await?;
        let drifted_resources: Vec<String> = prepared
            .diff
            .actionable_diffs()
            .iter()
            .map(ToString::to_string)
            .collect();

        Ok(DriftReport {
            has_drift: prepared.diff.has_changes(),
            drifted_resources,
            forgotten: prepared.refresh.forgotten,
            total_resources: self.config.upstreams.len() + self.config.total_targets(),
            observed_count: prepared.state.upstreams.len() + prepared.state.target_count(),
        })
    }

    /// Deletes every recorded upstream and clears the recorded identities.
    ///
    /// Targets are removed by Kong together with their upstream.
    ///
    /// # Errors
    ///
    /// Returns the first delete error other than 404, after saving state.
    pub async fn destroy(&self) -> Result<DestroyResult> {
        let lock = self.acquire_lock().await?;
        let result = self.destroy_unlocked().await;
        self.release_lock(&lock).await;
        result
    }

    async fn destroy_unlocked(&self) -> Result<DestroyResult> {
        let mut state = self.load_state().await?;
        let upstreams = UpstreamReconciler::new(self.client);
        let config_hash = self.hasher.hash_config(self.config);
        let mut result = DestroyResult {
            deleted: vec![],
            already_absent: vec![],
        };

        let recorded: Vec<(String, String)> = state
            .upstreams
            .iter()
            .map(|(name, u)| (name.clone(), u.id.clone()))
            .collect();

        for (name, id) in recorded {
            match upstreams.delete(&id).await {
                Ok(()) => result.deleted.push(name.clone()),
                Err(e) if e.is_not_found() => {
                    warn!("Upstream {name} ({id}) was already deleted");
                    result.already_absent.push(name.clone());
                }
                Err(e) => {
                    state.add_history(HistoryEntry::failed(
                        SyncOperation::Destroy,
                        &config_hash,
                        result.deleted.clone(),
                        &e.to_string(),
                    ));
                    self.state_store.save(&state).await?;
                    return Err(e);
                }
            }
            state.remove_upstream(&name);
        }

        state.config_hash.clear();
        state.add_history(HistoryEntry::new(
            SyncOperation::Destroy,
            &config_hash,
            result.deleted.clone(),
        ));
        self.state_store.save(&state).await?;

        info!(
            "Destroyed {} upstreams ({} already gone)",
            result.deleted.len(),
            result.already_absent.len()
        );
        Ok(result)
    }

    /// Adopts an existing upstream under a declared name.
    ///
    /// # Errors
    ///
    /// Returns an error if Kong has no upstream with this id.
    pub async fn import_upstream(&self, name: &str, id: &str) -> Result<Upstream> {
        let lock = self.acquire_lock().await?;
        let result = self.import_upstream_unlocked(name, id).await;
        self.release_lock(&lock).await;
        result
    }

    async fn import_upstream_unlocked(&self, name: &str, id: &str) -> Result<Upstream> {
        let observed = UpstreamReconciler::new(self.client)
            .read(id)
            .await?
            .ok_or_else(|| not_found("upstream", name, id))?;

        if self.config.upstream(name).is_none() {
            warn!("Upstream {name} is not declared; the next apply will delete it");
        }

        let mut state = self.load_state().await?;
        state.record_upstream(name, &observed);
        state.add_history(HistoryEntry::new(
            SyncOperation::Import,
            &self.hasher.hash_config(self.config),
            vec![name.to_string()],
        ));
        self.state_store.save(&state).await?;

        info!("Imported upstream {name} (ID: {})", observed.id);
        Ok(observed)
    }

    /// Adopts an existing target of a recorded upstream.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream is not recorded or the target is
    /// not active.
    pub async fn import_target(&self, upstream: &str, id: &str) -> Result<Target> {
        let lock = self.acquire_lock().await?;
        let result = self.import_target_unlocked(upstream, id).await;
        self.release_lock(&lock).await;
        result
    }

    async fn import_target_unlocked(&self, upstream: &str, id: &str) -> Result<Target> {
        let mut state = self.load_state().await?;
        let upstream_id = state
            .get_upstream(upstream)
            .map(|u| u.id.clone())
            .ok_or_else(|| {
                KongSyncError::Plan(PlanError::UnknownUpstream {
                    name: upstream.to_string(),
                })
            })?;

        let observed = TargetReconciler::new(self.client)
            .read(id, &upstream_id)
            .await?
            .ok_or_else(|| not_found("target", upstream, id))?;

        let address = format!("{upstream}/{}", observed.target);
        state.record_target(upstream, &observed);
        state.add_history(HistoryEntry::new(
            SyncOperation::Import,
            &self.hasher.hash_config(self.config),
            vec![address.clone()],
        ));
        self.state_store.save(&state).await?;

        info!("Imported target {address} (ID: {})", observed.id);
        Ok(observed)
    }

    async fn acquire_lock(&self) -> Result<LockInfo> {
        self.state_store.acquire_lock(&holder_id()).await
    }

    async fn release_lock(&self, lock: &LockInfo) {
        if let Err(e) = self.state_store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock {}: {e}", lock.lock_id);
        }
    }
}

fn not_found(resource_type: &str, name: &str, id: &str) -> KongSyncError {
    KongSyncError::Reconcile(ReconcileError::ResourceReconcileFailed {
        resource_type: resource_type.to_string(),
        name: name.to_string(),
        reason: format!("Kong has no active {resource_type} with id {id}"),
    })
}

impl ReconciliationResult {
    /// Returns the number of completed actions of a type.
    #[must_use]
    pub fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action.action_type == action_type)
            .count()
    }
}

impl DriftReport {
    /// Returns true if the state is converged (no drift).
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        !self.has_drift
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_drift {
            writeln!(f, "Drift detected:")?;
            for resource in &self.drifted_resources {
                writeln!(f, "  - {resource}")?;
            }
        } else {
            write!(f, "No drift detected - state is converged")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Reconciliation successful:")?;
        writeln!(f, "  Created: {}", self.created)?;
        writeln!(f, "  Updated: {}", self.updated)?;
        writeln!(f, "  Replaced: {}", self.replaced)?;
        writeln!(f, "  Deleted: {}", self.deleted)?;
        writeln!(f, "  Unchanged: {}", self.unchanged)?;

        if !self.forgotten.is_empty() {
            writeln!(f, "  Forgotten (gone remotely):")?;
            for address in &self.forgotten {
                writeln!(f, "    - {address}")?;
            }
        }

        Ok(())
    }
}
