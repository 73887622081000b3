//! End-to-end scenarios against the in-memory Kong fake.

mod support;

use kongsync::error::{ApiError, KongSyncError, ReconcileError};
use kongsync::kong::HttpMethod;
use kongsync::planner::ActionType;
use kongsync::reconciler::Reconciler;
use kongsync::resources::{DesiredTarget, DesiredUpstream, TargetReconciler, UpdateStep, UpstreamReconciler};
use kongsync::state::{LocalStateStore, StateStore, SyncOperation};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use support::{FakeKong, Fault, declaration};

fn store() -> (LocalStateStore, TempDir) {
    let dir = TempDir::new().unwrap();
    (LocalStateStore::with_base_dir(dir.path()), dir)
}

fn desired_upstream(name: &str, slots: u32) -> DesiredUpstream {
    DesiredUpstream {
        name: name.to_string(),
        slots,
    }
}

fn desired_target(upstream: &str, target: &str, weight: u32) -> DesiredTarget {
    DesiredTarget {
        target: target.to_string(),
        weight,
        upstream: upstream.to_string(),
    }
}

// Resource core properties

#[tokio::test]
async fn test_created_upstream_reads_back_equal() {
    let kong = FakeKong::new();
    let upstreams = UpstreamReconciler::new(&kong);

    let created = upstreams.create(&desired_upstream("svc-a", 100)).await.unwrap();
    let read = upstreams.read(&created.id).await.unwrap().unwrap();

    assert!(!created.id.is_empty());
    assert_eq!(read.name, "svc-a");
    assert_eq!(read.slots, 100);
}

#[tokio::test]
async fn test_read_of_unknown_id_is_absent() {
    let kong = FakeKong::new();
    let upstream = kong.seed_upstream("svc-a", 100);

    assert!(UpstreamReconciler::new(&kong).read("missing").await.unwrap().is_none());
    assert!(
        TargetReconciler::new(&kong)
            .read("missing", &upstream.id)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        TargetReconciler::new(&kong)
            .read("missing", "no-such-upstream")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_duplicate_upstream_name_conflicts() {
    let kong = FakeKong::new();
    let upstreams = UpstreamReconciler::new(&kong);

    upstreams.create(&desired_upstream("svc-a", 100)).await.unwrap();
    let second = upstreams.create(&desired_upstream("svc-a", 100)).await;

    assert!(matches!(
        second,
        Err(KongSyncError::Api(ApiError::Conflict { .. }))
    ));
}

#[tokio::test]
async fn test_second_delete_reports_not_found() {
    let kong = FakeKong::new();
    let upstreams = UpstreamReconciler::new(&kong);
    let created = upstreams.create(&desired_upstream("svc-a", 100)).await.unwrap();

    assert_ok!(upstreams.delete(&created.id).await);
    let second = assert_err!(upstreams.delete(&created.id).await);

    assert!(second.is_not_found());
}

#[tokio::test]
async fn test_target_update_replaces_identity() {
    let kong = FakeKong::new();
    let upstream = kong.seed_upstream("svc-a", 100);
    let targets = TargetReconciler::new(&kong);

    let original = targets
        .create(&desired_target(&upstream.id, "10.0.0.1:80", 100))
        .await
        .unwrap();
    let outcome = targets
        .update(&original.id, &desired_target(&upstream.id, "10.0.0.2:80", 50))
        .await
        .unwrap();

    assert_eq!(outcome.replaced_id(), Some(original.id.as_str()));
    let replacement = outcome.into_record();
    assert_ne!(replacement.id, original.id);

    assert!(targets.read(&original.id, &upstream.id).await.unwrap().is_none());
    let read = targets.read(&replacement.id, &upstream.id).await.unwrap().unwrap();
    assert_eq!(read.target, "10.0.0.2:80");
    assert_eq!(read.weight, 50);
}

#[tokio::test]
async fn test_failed_delete_step_never_creates() {
    let kong = FakeKong::new();
    let upstream = kong.seed_upstream("svc-a", 100);
    let original = kong.seed_target(&upstream.id, "10.0.0.1:80", 100);
    kong.fail_next(HttpMethod::Delete, "/targets/", Fault::Transport);
    kong.clear_log();

    let err = TargetReconciler::new(&kong)
        .update(&original.id, &desired_target(&upstream.id, "10.0.0.1:80", 50))
        .await
        .unwrap_err();

    assert_eq!(err.as_api().and_then(ApiError::failed_step), Some(UpdateStep::Delete));
    assert!(!kong.requests().iter().any(|(m, _)| *m == HttpMethod::Post));
    assert_eq!(kong.targets_of(&upstream.id), vec![original]);
}

#[tokio::test]
async fn test_failed_create_step_is_reported_not_repaired() {
    let kong = FakeKong::new();
    let upstream = kong.seed_upstream("svc-a", 100);
    let original = kong.seed_target(&upstream.id, "10.0.0.1:80", 100);
    kong.fail_next(HttpMethod::Post, "/targets", Fault::Status(500));

    let err = TargetReconciler::new(&kong)
        .update(&original.id, &desired_target(&upstream.id, "10.0.0.1:80", 50))
        .await
        .unwrap_err();

    assert_eq!(err.as_api().and_then(ApiError::failed_step), Some(UpdateStep::Create));
    assert!(kong.targets_of(&upstream.id).is_empty());
}

#[tokio::test]
async fn test_target_belongs_to_created_upstream() {
    let kong = FakeKong::new();
    let upstreams = UpstreamReconciler::new(&kong);

    let upstream = upstreams.create(&desired_upstream("svc-a", 100)).await.unwrap();
    assert_eq!(upstream.name, "svc-a");
    assert_eq!(upstream.slots, 100);

    let target = TargetReconciler::new(&kong)
        .create(&desired_target(&upstream.id, "10.0.0.1:8080", 100))
        .await
        .unwrap();
    assert!(!target.id.is_empty());
    assert_eq!(target.upstream_id, upstream.id);

    upstreams.delete(&upstream.id).await.unwrap();
    assert_eq!(kong.target_count(), 0);
}

// Convergence loop

#[tokio::test]
async fn test_apply_converges_and_second_run_is_read_only() {
    let kong = FakeKong::new();
    let (store, _dir) = store();
    let config = declaration(&[
        ("svc-a", 100, &[("10.0.0.1:8080", 100), ("10.0.0.2:8080", 50)]),
        ("svc-b", 200, &[("10.0.1.1:9000", 10)]),
    ]);
    let reconciler = Reconciler::new(&config, &store, &kong);

    let first = reconciler.reconcile().await.unwrap();
    assert_eq!(first.count(ActionType::CreateUpstream), 2);
    assert_eq!(first.count(ActionType::CreateTarget), 3);

    let svc_a = kong.upstream_by_name("svc-a").unwrap();
    assert_eq!(svc_a.slots, 100);
    assert_eq!(kong.targets_of(&svc_a.id).len(), 2);

    let state = store.load().await.unwrap().unwrap();
    assert_eq!(state.get_upstream("svc-a").unwrap().id, svc_a.id);
    assert_eq!(state.target_count(), 3);

    let mutations = kong.mutation_count();
    let second = reconciler.reconcile().await.unwrap();
    assert!(second.actions.is_empty());
    assert_eq!(second.unchanged, 5);
    assert_eq!(kong.mutation_count(), mutations);
}

#[tokio::test]
async fn test_weight_change_records_new_target_id() {
    let kong = FakeKong::new();
    let (store, _dir) = store();
    let before = declaration(&[("svc-a", 100, &[("10.0.0.1:8080", 100)])]);
    Reconciler::new(&before, &store, &kong).reconcile().await.unwrap();
    let old_id = store.load().await.unwrap().unwrap().get_upstream("svc-a").unwrap().targets["10.0.0.1:8080"]
        .id
        .clone();

    let after = declaration(&[("svc-a", 100, &[("10.0.0.1:8080", 50)])]);
    let result = Reconciler::new(&after, &store, &kong).reconcile().await.unwrap();

    assert_eq!(result.count(ActionType::UpdateTarget), 1);
    let state = store.load().await.unwrap().unwrap();
    let recorded = &state.get_upstream("svc-a").unwrap().targets["10.0.0.1:8080"];
    assert_ne!(recorded.id, old_id);
    assert_eq!(recorded.weight, 50);

    let upstream = kong.upstream_by_name("svc-a").unwrap();
    let live = kong.targets_of(&upstream.id);
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, recorded.id);
}

#[tokio::test]
async fn test_slot_change_replaces_upstream_and_targets() {
    let kong = FakeKong::new();
    let (store, _dir) = store();
    let before = declaration(&[("svc-a", 100, &[("10.0.0.1:8080", 100)])]);
    Reconciler::new(&before, &store, &kong).reconcile().await.unwrap();
    let old = kong.upstream_by_name("svc-a").unwrap();

    let after = declaration(&[("svc-a", 500, &[("10.0.0.1:8080", 100)])]);
    let result = Reconciler::new(&after, &store, &kong).reconcile().await.unwrap();

    assert_eq!(result.count(ActionType::ReplaceUpstream), 1);
    assert_eq!(result.count(ActionType::CreateTarget), 1);

    let new = kong.upstream_by_name("svc-a").unwrap();
    assert_ne!(new.id, old.id);
    assert_eq!(new.slots, 500);
    assert_eq!(kong.targets_of(&new.id).len(), 1);
    assert_eq!(kong.upstream_count(), 1);
}

#[tokio::test]
async fn test_remote_rename_is_patched_back() {
    let kong = FakeKong::new();
    let (store, _dir) = store();
    let config = declaration(&[("svc-a", 100, &[])]);
    Reconciler::new(&config, &store, &kong).reconcile().await.unwrap();
    let upstream = kong.upstream_by_name("svc-a").unwrap();

    kong.rename_upstream(&upstream.id, "renamed");
    let result = Reconciler::new(&config, &store, &kong).reconcile().await.unwrap();

    assert_eq!(result.count(ActionType::UpdateUpstream), 1);
    assert_eq!(kong.upstream_by_name("svc-a").unwrap().id, upstream.id);
}

#[tokio::test]
async fn test_objects_deleted_out_of_band_are_recreated() {
    let kong = FakeKong::new();
    let (store, _dir) = store();
    let config = declaration(&[
        ("svc-a", 100, &[("10.0.0.1:8080", 100)]),
        ("svc-b", 100, &[("10.0.1.1:8080", 100)]),
    ]);
    Reconciler::new(&config, &store, &kong).reconcile().await.unwrap();

    let svc_a = kong.upstream_by_name("svc-a").unwrap();
    let svc_b = kong.upstream_by_name("svc-b").unwrap();
    kong.drop_upstream(&svc_a.id);
    kong.drop_target(&kong.targets_of(&svc_b.id)[0].id);

    let result = Reconciler::new(&config, &store, &kong).reconcile().await.unwrap();

    assert_eq!(result.forgotten.len(), 2);
    assert_eq!(result.count(ActionType::CreateUpstream), 1);
    assert_eq!(result.count(ActionType::CreateTarget), 2);
    assert_ne!(kong.upstream_by_name("svc-a").unwrap().id, svc_a.id);
    assert_eq!(kong.target_count(), 2);
}

#[tokio::test]
async fn test_undeclared_resources_are_deleted() {
    let kong = FakeKong::new();
    let (store, _dir) = store();
    let before = declaration(&[
        ("svc-a", 100, &[("10.0.0.1:8080", 100), ("10.0.0.2:8080", 100)]),
        ("svc-b", 100, &[("10.0.1.1:8080", 100)]),
    ]);
    Reconciler::new(&before, &store, &kong).reconcile().await.unwrap();

    let after = declaration(&[("svc-a", 100, &[("10.0.0.1:8080", 100)])]);
    let result = Reconciler::new(&after, &store, &kong).reconcile().await.unwrap();

    assert_eq!(result.count(ActionType::DeleteTarget), 1);
    assert_eq!(result.count(ActionType::DeleteUpstream), 1);
    assert!(kong.upstream_by_name("svc-b").is_none());
    assert_eq!(kong.target_count(), 1);

    let state = store.load().await.unwrap().unwrap();
    assert_eq!(state.upstreams.keys().collect::<Vec<_>>(), vec!["svc-a"]);
}

#[tokio::test]
async fn test_first_failure_halts_and_keeps_created_ids() {
    let kong = FakeKong::new();
    let (store, _dir) = store();
    let config = declaration(&[
        ("svc-a", 100, &[("10.0.0.1:8080", 100)]),
        ("svc-b", 100, &[("10.0.1.1:8080", 100)]),
    ]);
    kong.fail_next(HttpMethod::Post, "/targets", Fault::Status(500));

    let err = Reconciler::new(&config, &store, &kong)
        .reconcile()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        KongSyncError::Api(ApiError::UnexpectedStatus { status: 500, .. })
    ));
    assert_eq!(kong.target_count(), 0);

    let state = store.load().await.unwrap().unwrap();
    assert_eq!(state.upstreams.len(), 2);
    assert_eq!(state.target_count(), 0);
    let last = state.history.last().unwrap();
    assert_eq!(last.operation, SyncOperation::Apply);
    assert!(!last.success);
    assert!(!store.is_locked().await.unwrap());

    let retry = Reconciler::new(&config, &store, &kong).reconcile().await.unwrap();
    assert_eq!(retry.count(ActionType::CreateUpstream), 0);
    assert_eq!(retry.count(ActionType::CreateTarget), 2);
    assert_eq!(kong.upstream_count(), 2);
}

#[tokio::test]
async fn test_transport_failure_during_refresh_aborts_before_mutating() {
    let kong = FakeKong::new();
    let (store, _dir) = store();
    let config = declaration(&[("svc-a", 100, &[("10.0.0.1:8080", 100)])]);
    Reconciler::new(&config, &store, &kong).reconcile().await.unwrap();

    let changed = declaration(&[("svc-a", 100, &[("10.0.0.1:8080", 10)])]);
    kong.fail_next(HttpMethod::Get, "upstreams/", Fault::Transport);
    let mutations = kong.mutation_count();

    let err = Reconciler::new(&changed, &store, &kong)
        .reconcile()
        .await
        .unwrap_err();

    assert!(err.as_api().is_some_and(ApiError::is_transport));
    assert_eq!(kong.mutation_count(), mutations);
}

#[tokio::test]
async fn test_existing_upstream_conflicts_until_imported() {
    let kong = FakeKong::new();
    let (store, _dir) = store();
    let existing = kong.seed_upstream("svc-a", 100);
    let config = declaration(&[("svc-a", 100, &[("10.0.0.1:8080", 100)])]);
    let reconciler = Reconciler::new(&config, &store, &kong);

    let err = reconciler.reconcile().await.unwrap_err();
    assert!(matches!(err, KongSyncError::Api(ApiError::Conflict { .. })));

    let imported = reconciler.import_upstream("svc-a", &existing.id).await.unwrap();
    assert_eq!(imported.id, existing.id);

    let result = reconciler.reconcile().await.unwrap();
    assert_eq!(result.count(ActionType::CreateUpstream), 0);
    assert_eq!(result.count(ActionType::CreateTarget), 1);
    assert_eq!(kong.targets_of(&existing.id).len(), 1);
}

#[tokio::test]
async fn test_imported_target_is_kept() {
    let kong = FakeKong::new();
    let (store, _dir) = store();
    let upstream = kong.seed_upstream("svc-a", 100);
    let target = kong.seed_target(&upstream.id, "10.0.0.1:8080", 100);
    let config = declaration(&[("svc-a", 100, &[("10.0.0.1:8080", 100)])]);
    let reconciler = Reconciler::new(&config, &store, &kong);

    reconciler.import_upstream("svc-a", &upstream.id).await.unwrap();
    reconciler.import_target("svc-a", &target.id).await.unwrap();

    let plan = reconciler.plan().await.unwrap();
    assert!(plan.is_empty());

    let state = store.load().await.unwrap().unwrap();
    assert_eq!(
        state.history.last().map(|h| h.operation),
        Some(SyncOperation::Import)
    );
}

#[tokio::test]
async fn test_prepared_plan_applies_when_state_unchanged() {
    let kong = FakeKong::new();
    let (store, _dir) = store();
    let config = declaration(&[("svc-a", 100, &[("10.0.0.1:8080", 100)])]);
    let reconciler = Reconciler::new(&config, &store, &kong);

    let prepared = reconciler.prepare().await.unwrap();
    let result = assert_ok!(reconciler.apply(prepared).await);

    assert_eq!(result.count(ActionType::CreateUpstream), 1);
    assert_eq!(result.count(ActionType::CreateTarget), 1);
    assert!(!store.is_locked().await.unwrap());
}

#[tokio::test]
async fn test_apply_refuses_plan_when_state_changed_after_prepare() {
    let kong = FakeKong::new();
    let (store, _dir) = store();
    let existing = kong.seed_upstream("svc-x", 100);
    let config = declaration(&[("svc-a", 100, &[]), ("svc-x", 100, &[])]);
    let reconciler = Reconciler::new(&config, &store, &kong);

    let prepared = reconciler.prepare().await.unwrap();
    assert_eq!(prepared.plan.count(ActionType::CreateUpstream), 2);

    Reconciler::new(&config, &store, &kong)
        .import_upstream("svc-x", &existing.id)
        .await
        .unwrap();
    kong.clear_log();

    let err = assert_err!(reconciler.apply(prepared).await);
    assert!(matches!(err, KongSyncError::Reconcile(ReconcileError::Aborted { .. })));
    assert_eq!(kong.mutation_count(), 0);
    assert!(!store.is_locked().await.unwrap());

    let state = store.load().await.unwrap().unwrap();
    assert_eq!(state.get_upstream("svc-x").unwrap().id, existing.id);

    let result = reconciler.reconcile().await.unwrap();
    assert_eq!(result.count(ActionType::CreateUpstream), 1);
    assert_eq!(kong.upstream_count(), 2);
}

#[tokio::test]
async fn test_import_of_unknown_id_fails() {
    let kong = FakeKong::new();
    let (store, _dir) = store();
    let config = declaration(&[("svc-a", 100, &[])]);

    let err = assert_err!(
        Reconciler::new(&config, &store, &kong)
            .import_upstream("svc-a", "missing")
            .await
    );

    assert!(matches!(err, KongSyncError::Reconcile(_)));
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_drift_reports_without_mutating() {
    let kong = FakeKong::new();
    let (store, _dir) = store();
    let config = declaration(&[("svc-a", 100, &[("10.0.0.1:8080", 100)])]);
    let reconciler = Reconciler::new(&config, &store, &kong);
    reconciler.reconcile().await.unwrap();

    let converged = reconciler.check_drift().await.unwrap();
    assert!(converged.is_converged());

    let upstream = kong.upstream_by_name("svc-a").unwrap();
    kong.drop_target(&kong.targets_of(&upstream.id)[0].id);
    let saved = store.load().await.unwrap();
    let mutations = kong.mutation_count();

    let report = reconciler.check_drift().await.unwrap();

    assert!(report.has_drift);
    assert_eq!(report.forgotten, vec![String::from("svc-a/10.0.0.1:8080")]);
    assert_eq!(report.drifted_resources.len(), 1);
    assert_eq!(kong.mutation_count(), mutations);
    assert_eq!(store.load().await.unwrap(), saved);
}

#[tokio::test]
async fn test_destroy_removes_everything_recorded() {
    let kong = FakeKong::new();
    let (store, _dir) = store();
    let unmanaged = kong.seed_upstream("unmanaged", 100);
    let config = declaration(&[
        ("svc-a", 100, &[("10.0.0.1:8080", 100)]),
        ("svc-b", 100, &[]),
    ]);
    let reconciler = Reconciler::new(&config, &store, &kong);
    reconciler.reconcile().await.unwrap();

    let svc_b = kong.upstream_by_name("svc-b").unwrap();
    kong.drop_upstream(&svc_b.id);

    let result = reconciler.destroy().await.unwrap();

    assert_eq!(result.deleted, vec![String::from("svc-a")]);
    assert_eq!(result.already_absent, vec![String::from("svc-b")]);
    assert_eq!(kong.upstream_by_name("unmanaged"), Some(unmanaged));
    assert_eq!(kong.upstream_count(), 1);
    assert_eq!(kong.target_count(), 0);

    let state = store.load().await.unwrap().unwrap();
    assert!(state.is_empty());
    assert_eq!(
        state.history.last().map(|h| h.operation),
        Some(SyncOperation::Destroy)
    );
}
