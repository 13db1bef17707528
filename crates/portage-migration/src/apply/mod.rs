//! Apply engine
//!
//! Makes the destination match the prepared source objects. CRDs and
//! namespaces go first, then volumes and claims in a fixed sequence, then
//! every remaining object through a bounded worker pool. Re-applying an
//! unchanged object is a no-op: each applied object carries the content hash
//! of its source, and a matching hash on the destination short-circuits the
//! write.

pub mod crds;
pub mod namespaces;
pub mod objects;
pub mod pool;
pub mod stash;
pub mod volumes;

use crate::config::RetryPolicy;
use crate::error::Result;
use crate::ledger::ResourceLedger;
use crate::platform::filter_platform_map;
use crate::remote::RemoteClient;
use crate::traits::ResourceCollector;
use parking_lot::Mutex;
use portage_core::annotations::{ContentHash, MigrationMarker};
use portage_core::resources::ApplicationRegistration;
use portage_core::{ClusterApi, DynamicObject, GroupVersionKind};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::info;

pub const MIGRATED_SUCCESSFULLY: &str = "Resource migrated successfully";

/// What happened to one object on the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyAction {
    /// The object did not exist and was created
    Created,
    /// The object existed with different content and was deleted and created again
    Recreated,
    /// The existing object was updated in place
    Merged,
    /// The destination already held the same content
    Unchanged,
    Failed,
}

/// Per-run counters of apply actions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: usize,
    pub recreated: usize,
    pub merged: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl ApplyReport {
    pub fn record(&mut self, action: ApplyAction) {
        match action {
            ApplyAction::Created => self.created += 1,
            ApplyAction::Recreated => self.recreated += 1,
            ApplyAction::Merged => self.merged += 1,
            ApplyAction::Unchanged => self.unchanged += 1,
            ApplyAction::Failed => self.failed += 1,
        }
    }

    /// Number of destination writes the run performed for applied objects
    pub fn writes(&self) -> usize {
        self.created + self.recreated + self.merged
    }
}

impl fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={} recreated={} merged={} unchanged={} failed={}",
            self.created, self.recreated, self.merged, self.unchanged, self.failed
        )
    }
}

/// State shared by everything that writes to the destination during one run
pub struct ApplyContext {
    pub remote: Arc<RemoteClient>,
    pub ledger: Arc<ResourceLedger>,
    pub marker: MigrationMarker,
    pub project_mappings: BTreeMap<String, String>,
    /// Kinds applied wrapped in a ConfigMap
    pub stashed: HashSet<GroupVersionKind>,
    pub has_transform: bool,
    pub retry: RetryPolicy,
    report: Mutex<ApplyReport>,
}

impl ApplyContext {
    pub fn new(
        remote: Arc<RemoteClient>,
        ledger: Arc<ResourceLedger>,
        marker: MigrationMarker,
        retry: RetryPolicy,
    ) -> Self {
        let project_mappings = remote.project_mappings();
        Self {
            remote,
            ledger,
            marker,
            project_mappings,
            stashed: HashSet::new(),
            has_transform: false,
            retry,
            report: Mutex::new(ApplyReport::default()),
        }
    }

    pub fn with_stashed_kinds(mut self, kinds: impl IntoIterator<Item = GroupVersionKind>) -> Self {
        self.stashed = kinds.into_iter().collect();
        self
    }

    pub fn with_transform(mut self, has_transform: bool) -> Self {
        self.has_transform = has_transform;
        self
    }

    /// Attach migration identity and the content hash, filter platform keys
    /// and drop server-assigned fields
    pub fn annotate(&self, object: &mut DynamicObject, hash: ContentHash) {
        let mut annotations = object.annotations();
        self.marker.write(&mut annotations);
        let mut annotations = filter_platform_map(&annotations, &self.project_mappings);
        hash.write(&mut annotations);
        object.set_annotations(annotations);

        if object.get_path(&["metadata", "labels"]).is_some() {
            let labels = filter_platform_map(&object.labels(), &self.project_mappings);
            object.set_labels(labels);
        }
        object.clear_server_fields();
    }

    pub fn is_stashed(&self, gvk: &GroupVersionKind) -> bool {
        self.stashed.contains(gvk)
    }

    pub fn record(&self, action: ApplyAction) {
        self.report.lock().record(action);
    }

    pub fn report(&self) -> ApplyReport {
        *self.report.lock()
    }
}

/// Applies prepared objects to the destination cluster
pub struct ApplyEngine<'a> {
    source: &'a dyn ClusterApi,
    collector: &'a dyn ResourceCollector,
    ctx: Arc<ApplyContext>,
    max_workers: usize,
    include_volumes: bool,
}

impl<'a> ApplyEngine<'a> {
    pub fn new(
        source: &'a dyn ClusterApi,
        collector: &'a dyn ResourceCollector,
        ctx: Arc<ApplyContext>,
        max_workers: usize,
        include_volumes: bool,
    ) -> Self {
        Self {
            source,
            collector,
            ctx,
            max_workers,
            include_volumes,
        }
    }

    /// Apply every object
    ///
    /// Per-object failures land in the ledger. An error is returned only for
    /// failures that leave the destination unsafe to continue with, such as a
    /// PersistentVolume whose reclaim policy could not be pinned.
    pub async fn apply(
        &self,
        namespaces: &[String],
        objects: Vec<DynamicObject>,
        registrations: &[ApplicationRegistration],
    ) -> Result<ApplyReport> {
        let admin = self.ctx.remote.admin();

        let groups: BTreeSet<String> = objects.iter().map(|o| o.gvk().group).collect();
        let related = crds::related_resources(self.source, registrations, &groups).await;
        crds::register_crds(self.source, admin, &related, &self.ctx.retry).await?;

        namespaces::ensure_namespaces(self.source, admin, namespaces, &self.ctx.project_mappings)
            .await?;

        let (mut pvs, mut pvcs, mut others) = (Vec::new(), Vec::new(), Vec::new());
        for object in objects {
            match object.kind() {
                "PersistentVolume" => pvs.push(object),
                "PersistentVolumeClaim" => pvcs.push(object),
                _ => others.push(object),
            }
        }

        volumes::apply_volumes(
            &self.ctx,
            self.collector,
            &pvs,
            &pvcs,
            self.include_volumes,
        )
        .await?;

        info!(
            "Updating {} objects with {} parallel workers",
            others.len(),
            self.max_workers
        );
        let ctx = self.ctx.clone();
        pool::run_pool(others, self.max_workers, true, move |object| {
            objects::apply_object(ctx.clone(), object)
        })
        .await?;

        let report = self.ctx.report();
        info!("Applied resources: {}", report);
        Ok(report)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockResourceCollector;
    use portage_core::annotations::{MIGRATED, RESOURCE_HASH};
    use portage_core::resources::MigrationStatusType;
    use portage_core::{ApiResource, MockCluster};
    use serde_json::json;

    fn objects() -> Vec<DynamicObject> {
        vec![
            DynamicObject::from_value(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "settings", "namespace": "app1", "labels": {"field.cattle.io/creator": "norman"}},
                "data": {"mode": "fast"}
            }))
            .unwrap(),
            DynamicObject::from_value(json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": "web", "namespace": "app1"},
                "spec": {"replicas": 0}
            }))
            .unwrap(),
        ]
    }

    #[test]
    fn test_report_counts_writes() {
        let mut report = ApplyReport::default();
        for action in [ApplyAction::Created, ApplyAction::Unchanged, ApplyAction::Recreated, ApplyAction::Failed] {
            report.record(action);
        }
        assert_eq!(report.writes(), 2);
        assert_eq!(report.to_string(), "created=1 recreated=1 merged=0 unchanged=1 failed=1");
    }

    #[tokio::test]
    async fn test_apply_creates_namespace_and_objects() {
        let source = MockCluster::new();
        source
            .insert(&ApiResource::namespaces(), DynamicObject::new(&GroupVersionKind::new("", "v1", "Namespace"), None, "app1"))
            .await;
        let dest = Arc::new(MockCluster::new());
        let objects = objects();
        let (ctx, _) = test_support::context(dest.clone(), &objects);
        let collector = MockResourceCollector::with_default_types();

        let engine = ApplyEngine::new(&source, &collector, ctx.clone(), 4, true);
        let report = engine.apply(&["app1".to_string()], objects.clone(), &[]).await.unwrap();
        assert_eq!(report.created, 2);
        assert!(dest.object(&ApiResource::namespaces(), "", "app1").await.is_some());

        let cm = dest.object(&ApiResource::config_maps(), "app1", "settings").await.unwrap();
        assert_eq!(cm.annotation(MIGRATED), Some("true"));
        assert!(cm.annotation(RESOURCE_HASH).is_some());
        assert!(cm.labels().is_empty());
        assert!(ctx.ledger.entries().iter().all(|e| e.status == MigrationStatusType::Successful));

        // A second pass finds identical hashes and writes nothing
        dest.reset_write_counts();
        let report = engine.apply(&["app1".to_string()], objects, &[]).await.unwrap();
        assert_eq!(report.unchanged, 2);
        assert_eq!(dest.total_writes(), 0);
    }
}
