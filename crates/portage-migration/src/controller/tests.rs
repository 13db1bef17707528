use super::*;
use crate::config::RetryPolicy;
use crate::mock::{
    DriverCall, MockConnector, MockResourceCollector, MockRuleExecutor, MockVolumeDriver,
    RecordingEventRecorder,
};
use crate::traits::ClusterDomainState;
use portage_core::annotations::{MIGRATED, MIGRATION_REPLICAS, RESOURCE_HASH};
use portage_core::resources::{
    ClusterPair, ClusterPairStatus, ClusterPairStatusType, MigrationScheduleStatus, MigrationSpec,
    MigrationVolumeInfo, Resource, RuleAction, RuleItem,
};
use portage_core::{ApiResource, DynamicObject, InjectedError, MockCluster, MockOp, ObjectMeta};
use serde_json::{json, Value};

struct Harness {
    source: Arc<MockCluster>,
    dest: Arc<MockCluster>,
    driver: Arc<MockVolumeDriver>,
    collector: Arc<MockResourceCollector>,
    rules: Arc<MockRuleExecutor>,
    recorder: Arc<RecordingEventRecorder>,
    controller: MigrationController,
}

fn deployments() -> ApiResource {
    ApiResource::namespaced("apps/v1", "Deployment")
}

fn cluster_pair(storage: ClusterPairStatusType) -> ClusterPair {
    ClusterPair {
        metadata: ObjectMeta {
            name: Some("remote".to_string()),
            namespace: Some("app1".to_string()),
            ..Default::default()
        },
        status: ClusterPairStatus {
            scheduler_status: ClusterPairStatusType::Ready,
            storage_status: storage,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn rule(name: &str, background: bool) -> Rule {
    Rule {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("app1".to_string()),
            ..Default::default()
        },
        rules: vec![RuleItem {
            actions: vec![RuleAction {
                type_: "command".to_string(),
                value: "fsfreeze -f /data".to_string(),
                background,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

fn spec() -> MigrationSpec {
    MigrationSpec {
        cluster_pair: "remote".to_string(),
        namespaces: vec!["app1".to_string()],
        ..Default::default()
    }
}

impl Harness {
    async fn new() -> Self {
        Self::with_storage(ClusterPairStatusType::Ready).await
    }

    async fn with_storage(storage: ClusterPairStatusType) -> Self {
        let source = Arc::new(MockCluster::new());
        let dest = Arc::new(MockCluster::new());

        let obj = |value: Value| DynamicObject::from_value(value).unwrap();
        source
            .insert(
                &ApiResource::namespaces(),
                obj(json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "app1"}})),
            )
            .await;
        source.insert_typed(&cluster_pair(storage)).await.unwrap();
        source
            .insert(
                &ApiResource::persistent_volumes(),
                obj(json!({
                    "apiVersion": "v1",
                    "kind": "PersistentVolume",
                    "metadata": {"name": "pv-1"},
                    "spec": {
                        "persistentVolumeReclaimPolicy": "Delete",
                        "csi": {"driver": "pxd.portworx.com", "volumeHandle": "vol-1"},
                        "claimRef": {"kind": "PersistentVolumeClaim", "namespace": "app1", "name": "data"}
                    }
                })),
            )
            .await;
        source
            .insert(
                &ApiResource::persistent_volume_claims(),
                obj(json!({
                    "apiVersion": "v1",
                    "kind": "PersistentVolumeClaim",
                    "metadata": {"name": "data", "namespace": "app1"},
                    "spec": {"volumeName": "pv-1", "accessModes": ["ReadWriteOnce"]}
                })),
            )
            .await;
        source
            .insert(
                &deployments(),
                obj(json!({
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "metadata": {"name": "web", "namespace": "app1"},
                    "spec": {"replicas": 2}
                })),
            )
            .await;

        let driver = Arc::new(MockVolumeDriver::new().with_volume("app1", "data", "pv-1", 1024));
        let collector = Arc::new(MockResourceCollector::with_default_types());
        let rules = Arc::new(MockRuleExecutor::new());
        let recorder = Arc::new(RecordingEventRecorder::new());
        let config = MigrationControllerConfig {
            retry: RetryPolicy::without_delays(),
            ..Default::default()
        };
        let controller = MigrationController::new(
            source.clone(),
            Arc::new(MockConnector::new(dest.clone())),
            driver.clone(),
            collector.clone(),
            rules.clone(),
            recorder.clone(),
            config,
        );

        Self {
            source,
            dest,
            driver,
            collector,
            rules,
            recorder,
            controller,
        }
    }

    async fn submit(&self, name: &str, spec: MigrationSpec) {
        self.submit_migration(Migration::new("app1", name, spec)).await;
    }

    async fn submit_migration(&self, migration: Migration) {
        self.source.insert_typed(&migration).await.unwrap();
    }

    async fn migration(&self, name: &str) -> Migration {
        self.source
            .object_typed::<Migration>("app1", name)
            .await
            .unwrap()
    }

    async fn reconcile(&self, name: &str) -> Requeue {
        let mut migration = self.migration(name).await;
        self.controller.reconcile(&mut migration).await.unwrap()
    }

    /// Reconcile until the migration is Final or the pass budget runs out
    async fn run(&self, name: &str) -> Migration {
        for _ in 0..6 {
            let migration = self.migration(name).await;
            if migration.status.stage == MigrationStage::Final {
                return migration;
            }
            self.reconcile(name).await;
        }
        self.migration(name).await
    }
}

#[tokio::test]
async fn test_full_migration_reaches_final() {
    let h = Harness::new().await;
    h.submit("m1", spec()).await;

    let migration = h.run("m1").await;
    assert_eq!(migration.status.stage, MigrationStage::Final);
    assert_eq!(migration.status.status, MigrationStatusType::Successful);
    assert_eq!(migration.status.resources.len(), 3);
    assert!(migration
        .status
        .resources
        .iter()
        .all(|r| r.status == MigrationStatusType::Successful));
    assert!(migration.status.finish_timestamp.is_some());
    assert!(migration.status.start_timestamp.is_some());

    let summary = migration.status.summary.unwrap();
    assert_eq!(summary.total_number_of_volumes, 1);
    assert_eq!(summary.number_of_migrated_volumes, 1);
    assert_eq!(summary.total_bytes_migrated, 1024);
    assert_eq!(summary.number_of_migrated_resources, 3);

    let web = h.dest.object(&deployments(), "app1", "web").await.unwrap();
    assert_eq!(web.get_path(&["spec", "replicas"]), Some(&json!(0)));
    assert_eq!(web.annotation(MIGRATION_REPLICAS), Some("2"));

    let pv = h
        .dest
        .object(&ApiResource::persistent_volumes(), "", "pv-1")
        .await
        .unwrap();
    assert_eq!(
        pv.get_path(&["spec", "persistentVolumeReclaimPolicy"]),
        Some(&json!("Delete"))
    );
    let pvc = h
        .dest
        .object(&ApiResource::persistent_volume_claims(), "app1", "data")
        .await
        .unwrap();
    assert!(pvc.annotation(RESOURCE_HASH).is_some());
    assert_eq!(h.driver.calls(DriverCall::Start), 1);
    assert!(h.recorder.warnings().is_empty());
}

#[tokio::test]
async fn test_rerun_leaves_unchanged_destination_alone() {
    let h = Harness::new().await;
    h.submit("m1", spec()).await;
    h.run("m1").await;

    h.dest.reset_write_counts();
    h.submit("m2", spec()).await;
    let migration = h.run("m2").await;

    assert_eq!(migration.status.status, MigrationStatusType::Successful);
    assert_eq!(h.dest.total_writes(), 0);
}

#[tokio::test]
async fn test_first_pass_only_adds_finalizer() {
    let h = Harness::new().await;
    h.submit("m1", spec()).await;

    assert_eq!(h.reconcile("m1").await, Requeue::Immediately);
    let migration = h.migration("m1").await;
    assert!(has_finalizer(&migration));
    assert_eq!(migration.status.stage, MigrationStage::Initial);
    assert_eq!(h.driver.calls(DriverCall::Start), 0);
}

#[tokio::test]
async fn test_resources_only_skips_volume_driver() {
    let h = Harness::new().await;
    h.submit(
        "m1",
        MigrationSpec {
            include_volumes: Some(false),
            ..spec()
        },
    )
    .await;

    let migration = h.run("m1").await;
    assert_eq!(migration.status.stage, MigrationStage::Final);
    assert_eq!(migration.status.status, MigrationStatusType::Successful);
    assert_eq!(h.driver.calls(DriverCall::Start), 0);
    assert_eq!(h.driver.calls(DriverCall::Status), 0);

    // Without volume data the destination volume stays pinned
    let pv = h
        .dest
        .object(&ApiResource::persistent_volumes(), "", "pv-1")
        .await
        .unwrap();
    assert_eq!(
        pv.get_path(&["spec", "persistentVolumeReclaimPolicy"]),
        Some(&json!("Retain"))
    );
}

#[tokio::test]
async fn test_volumes_only_migrates_just_volumes_and_claims() {
    let h = Harness::new().await;
    h.submit(
        "m1",
        MigrationSpec {
            include_resources: Some(false),
            ..spec()
        },
    )
    .await;

    let migration = h.run("m1").await;
    assert_eq!(migration.status.stage, MigrationStage::Final);
    assert_eq!(migration.status.resources.len(), 2);
    assert!(h.dest.object(&deployments(), "app1", "web").await.is_none());
    assert!(h
        .dest
        .object(&ApiResource::persistent_volume_claims(), "app1", "data")
        .await
        .is_some());
}

fn volume_status(status: MigrationStatusType, reason: &str) -> Vec<MigrationVolumeInfo> {
    vec![MigrationVolumeInfo {
        persistent_volume_claim: "data".to_string(),
        namespace: "app1".to_string(),
        volume: "pv-1".to_string(),
        status,
        reason: reason.to_string(),
        bytes_total: 1024,
    }]
}

#[tokio::test]
async fn test_volumes_in_progress_hold_the_stage() {
    let h = Harness::new().await;
    h.driver
        .set_status(volume_status(MigrationStatusType::InProgress, ""));
    h.submit("m1", spec()).await;

    h.reconcile("m1").await;
    h.reconcile("m1").await;
    let migration = h.migration("m1").await;
    assert_eq!(migration.status.stage, MigrationStage::Volumes);
    assert_eq!(migration.status.status, MigrationStatusType::InProgress);
    assert!(h.dest.object(&deployments(), "app1", "web").await.is_none());

    h.driver
        .set_status(volume_status(MigrationStatusType::Successful, ""));
    h.reconcile("m1").await;
    let migration = h.migration("m1").await;
    assert_eq!(migration.status.stage, MigrationStage::Final);
    assert_eq!(migration.status.status, MigrationStatusType::Successful);
    assert_eq!(h.driver.calls(DriverCall::Start), 1);
    assert_eq!(h.driver.calls(DriverCall::Status), 2);
}

#[tokio::test]
async fn test_failed_volume_fails_migration() {
    let h = Harness::new().await;
    h.driver
        .set_status(volume_status(MigrationStatusType::Failed, "snapshot timed out"));
    h.submit("m1", spec()).await;

    let migration = h.run("m1").await;
    assert_eq!(migration.status.stage, MigrationStage::Final);
    assert_eq!(migration.status.status, MigrationStatusType::Failed);
    assert!(migration.status.resources.is_empty());
    assert!(h
        .recorder
        .warnings()
        .iter()
        .any(|e| e.message.contains("snapshot timed out")));
}

/// Start a migration whose volumes stay in progress, leaving it in the Volumes stage
async fn migration_waiting_on_volumes(h: &Harness) {
    h.driver
        .set_status(volume_status(MigrationStatusType::InProgress, ""));
    h.submit("m1", spec()).await;
    h.reconcile("m1").await;
    h.reconcile("m1").await;
    assert_eq!(h.migration("m1").await.status.stage, MigrationStage::Volumes);
}

#[tokio::test]
async fn test_stale_status_write_raises_no_warning() {
    let h = Harness::new().await;
    migration_waiting_on_volumes(&h).await;

    // Another writer bumps the resource version under our copy
    let mut stale = h.migration("m1").await;
    let source: &dyn ClusterApi = h.source.as_ref();
    source.update_typed(&stale).await.unwrap();

    h.driver
        .set_status(volume_status(MigrationStatusType::Successful, ""));
    assert!(h.controller.reconcile(&mut stale).await.is_ok());
    assert!(h.recorder.warnings().is_empty());
    assert_eq!(h.migration("m1").await.status.stage, MigrationStage::Volumes);

    // The next pass with a fresh copy goes through
    h.reconcile("m1").await;
    let migration = h.migration("m1").await;
    assert_eq!(migration.status.stage, MigrationStage::Final);
    assert_eq!(migration.status.status, MigrationStatusType::Successful);
    assert!(h.recorder.warnings().is_empty());
}

#[tokio::test]
async fn test_injected_conflict_raises_no_warning() {
    let h = Harness::new().await;
    migration_waiting_on_volumes(&h).await;

    h.source
        .fail_next(MockOp::Update, "Migration", 1, InjectedError::Conflict);
    h.reconcile("m1").await;
    assert!(h.recorder.warnings().is_empty());
    assert_eq!(h.migration("m1").await.status.stage, MigrationStage::Volumes);
}

#[tokio::test]
async fn test_other_status_write_errors_raise_warning() {
    let h = Harness::new().await;
    migration_waiting_on_volumes(&h).await;

    h.source.fail_next(
        MockOp::Update,
        "Migration",
        1,
        InjectedError::Internal("etcd unavailable".to_string()),
    );
    h.reconcile("m1").await;
    let warnings = h.recorder.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("Error migrating volumes"));
    assert!(warnings[0].message.contains("etcd unavailable"));
}

#[tokio::test]
async fn test_post_exec_failure_cancels_volume_migration() {
    let h = Harness::new().await;
    h.source.insert_typed(&rule("post", false)).await.unwrap();
    h.rules.fail(RuleType::PostExec);
    h.submit(
        "m1",
        MigrationSpec {
            post_exec_rule: Some("post".to_string()),
            ..spec()
        },
    )
    .await;

    let migration = h.run("m1").await;
    assert_eq!(migration.status.stage, MigrationStage::Final);
    assert_eq!(migration.status.status, MigrationStatusType::Failed);
    assert_eq!(h.driver.calls(DriverCall::Cancel), 1);
    assert!(h
        .recorder
        .warnings()
        .iter()
        .any(|e| e.message.contains("Error running PostExecRule")));

    h.reconcile("m1").await;
    assert_eq!(h.driver.calls(DriverCall::Cancel), 1);
    assert_eq!(h.driver.calls(DriverCall::Start), 1);
}

#[tokio::test]
async fn test_pre_exec_background_commands_stopped() {
    let h = Harness::new().await;
    h.source.insert_typed(&rule("pre", true)).await.unwrap();
    h.submit(
        "m1",
        MigrationSpec {
            pre_exec_rule: Some("pre".to_string()),
            ..spec()
        },
    )
    .await;

    h.reconcile("m1").await;
    h.reconcile("m1").await;

    let tokens = h.rules.tokens();
    assert_eq!(tokens.len(), 1);
    assert!(tokens[0].is_cancelled());
    let executed = h.rules.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].0, RuleType::PreExec);
    assert_eq!(executed[0].2, "app1");
}

#[tokio::test]
async fn test_storage_not_ready_returns_to_initial() {
    let h = Harness::with_storage(ClusterPairStatusType::Pending).await;
    h.source.insert_typed(&rule("pre", false)).await.unwrap();
    h.submit(
        "m1",
        MigrationSpec {
            pre_exec_rule: Some("pre".to_string()),
            ..spec()
        },
    )
    .await;

    h.reconcile("m1").await;
    h.reconcile("m1").await;

    let migration = h.migration("m1").await;
    assert_eq!(migration.status.stage, MigrationStage::Initial);
    assert_eq!(h.driver.calls(DriverCall::Start), 0);
    assert!(h
        .recorder
        .warnings()
        .iter()
        .any(|e| e.message.contains("Error migrating volumes")));
}

#[tokio::test]
async fn test_deletion_cancels_and_releases_finalizer() {
    let h = Harness::new().await;
    h.submit("m1", spec()).await;
    h.reconcile("m1").await;

    h.source
        .delete(&Migration::api_resource(), Some("app1"), "m1")
        .await
        .unwrap();
    assert_eq!(h.reconcile("m1").await, Requeue::Never);

    assert_eq!(h.driver.calls(DriverCall::Cancel), 1);
    assert!(h
        .source
        .object_typed::<Migration>("app1", "m1")
        .await
        .is_none());
}

#[tokio::test]
async fn test_activated_schedule_blocks_migration() {
    let h = Harness::new().await;
    let schedule = MigrationSchedule {
        metadata: ObjectMeta {
            name: Some("nightly".to_string()),
            namespace: Some("app1".to_string()),
            ..Default::default()
        },
        status: MigrationScheduleStatus {
            application_activated: true,
        },
        ..Default::default()
    };
    h.dest.insert_typed(&schedule).await.unwrap();

    let mut migration = Migration::new("app1", "m1", spec());
    migration.metadata.annotations = Some(
        [(MIGRATION_SCHEDULE_NAME.to_string(), "nightly".to_string())]
            .into_iter()
            .collect(),
    );
    h.submit_migration(migration).await;

    let migration = h.run("m1").await;
    assert_eq!(migration.status.status, MigrationStatusType::Failed);
    assert!(h
        .recorder
        .warnings()
        .iter()
        .any(|e| e.message.contains("active on remote cluster")));
    assert_eq!(h.driver.calls(DriverCall::Start), 0);
}

#[tokio::test]
async fn test_invalid_requests_fail_terminally() {
    let h = Harness::new().await;
    h.source
        .insert(
            &ApiResource::namespaces(),
            DynamicObject::from_value(json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": {"name": "app2"}
            }))
            .unwrap(),
        )
        .await;

    h.submit(
        "cross",
        MigrationSpec {
            namespaces: vec!["app2".to_string()],
            ..spec()
        },
    )
    .await;
    h.submit(
        "nopair",
        MigrationSpec {
            cluster_pair: String::new(),
            ..spec()
        },
    )
    .await;
    h.submit(
        "transforms",
        MigrationSpec {
            transform_specs: vec!["a".to_string(), "b".to_string()],
            ..spec()
        },
    )
    .await;

    for name in ["cross", "nopair", "transforms"] {
        let migration = h.run(name).await;
        assert_eq!(migration.status.stage, MigrationStage::Final, "{}", name);
        assert_eq!(migration.status.status, MigrationStatusType::Failed, "{}", name);
    }
    let messages: Vec<String> = h.recorder.warnings().into_iter().map(|e| e.message).collect();
    assert!(messages
        .iter()
        .any(|m| m.contains("should only contain the current namespace")));
    assert!(messages.iter().any(|m| m.contains("cannot be empty")));
    assert!(messages
        .iter()
        .any(|m| m.contains("multiple transformation specs")));
    assert_eq!(h.driver.calls(DriverCall::Start), 0);
}

#[tokio::test]
async fn test_missing_namespace_fails_when_not_skipped() {
    let h = Harness::new().await;
    h.source
        .insert_typed(&ClusterPair {
            metadata: ObjectMeta {
                name: Some("remote".to_string()),
                namespace: Some("kube-system".to_string()),
                ..Default::default()
            },
            ..cluster_pair(ClusterPairStatusType::Ready)
        })
        .await
        .unwrap();
    let strict = Migration::new(
        "kube-system",
        "strict",
        MigrationSpec {
            namespaces: vec!["app1".to_string(), "gone".to_string()],
            skip_deleted_namespaces: Some(false),
            ..spec()
        },
    );
    h.submit_migration(strict).await;

    let mut migration = h
        .source
        .object_typed::<Migration>("kube-system", "strict")
        .await
        .unwrap();
    for _ in 0..2 {
        h.controller.reconcile(&mut migration).await.unwrap();
    }
    assert_eq!(migration.status.status, MigrationStatusType::Failed);
    assert!(h
        .recorder
        .warnings()
        .iter()
        .any(|e| e.message.contains("error getting namespace gone")));
}

#[tokio::test]
async fn test_deleted_namespace_skipped_by_default() {
    let h = Harness::new().await;
    let migration = Migration::new(
        "kube-system",
        "lenient",
        MigrationSpec {
            namespaces: vec!["app1".to_string(), "gone".to_string()],
            ..spec()
        },
    );
    h.source
        .insert_typed(&ClusterPair {
            metadata: ObjectMeta {
                name: Some("remote".to_string()),
                namespace: Some("kube-system".to_string()),
                ..Default::default()
            },
            ..cluster_pair(ClusterPairStatusType::Ready)
        })
        .await
        .unwrap();
    h.submit_migration(migration).await;

    let mut migration = h
        .source
        .object_typed::<Migration>("kube-system", "lenient")
        .await
        .unwrap();
    for _ in 0..2 {
        h.controller.reconcile(&mut migration).await.unwrap();
    }
    assert_eq!(migration.status.stage, MigrationStage::Final);
    assert_eq!(migration.status.status, MigrationStatusType::Successful);
    assert!(h.recorder.has_reason(MigrationStatusType::Initial.as_str()));
}

#[tokio::test]
async fn test_inactive_local_domain_fails_resource_only_migration() {
    let h = Harness::new().await;
    h.driver.set_local_domain_state(ClusterDomainState::Inactive);
    h.submit(
        "m1",
        MigrationSpec {
            include_volumes: Some(false),
            ..spec()
        },
    )
    .await;

    let migration = h.run("m1").await;
    assert_eq!(migration.status.status, MigrationStatusType::Failed);
    assert!(h.dest.object(&deployments(), "app1", "web").await.is_none());
}

#[tokio::test]
async fn test_purge_removes_objects_deleted_on_source() {
    let h = Harness::new().await;
    let mut stale = DynamicObject::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": "old", "namespace": "app1"},
        "spec": {"replicas": 0}
    }))
    .unwrap();
    stale.set_annotations([(MIGRATED.to_string(), "true".to_string())].into());
    h.dest.insert(&deployments(), stale).await;

    h.submit(
        "m1",
        MigrationSpec {
            purge_deleted_resources: Some(true),
            ..spec()
        },
    )
    .await;

    let migration = h.run("m1").await;
    assert_eq!(migration.status.status, MigrationStatusType::Successful);
    assert!(h.dest.object(&deployments(), "app1", "old").await.is_none());
    assert!(h.dest.object(&deployments(), "app1", "web").await.is_some());
    assert_eq!(h.collector.deleted().len(), 1);
    assert!(migration
        .status
        .resources
        .iter()
        .any(|r| r.name == "old" && r.status == MigrationStatusType::Purged));
}

#[tokio::test]
async fn test_init_recovers_rules_for_every_migration() {
    let h = Harness::new().await;
    h.submit("m1", spec()).await;
    h.submit("m2", spec()).await;

    h.controller.init().await.unwrap();
    let mut recovered = h.rules.recovered();
    recovered.sort();
    assert_eq!(recovered, vec!["app1/m1", "app1/m2"]);
}
