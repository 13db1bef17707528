use crate::error::{MigrationError, Result};
use crate::traits::{
    ClusterConnector, ClusterDomainInfo, ClusterDomainState, ClusterDomains, CollectRequest,
    CollectedResources, EventRecorder, ResourceCollector, RuleExecutor, VolumeDriver,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use parking_lot::Mutex;
use portage_core::resources::{
    ClusterPair, Migration, MigrationStatusType, MigrationVolumeInfo, Rule, RuleType,
};
use portage_core::{
    label_selector, ApiResource, ClusterApi, DynamicObject, MigrationEvent, ResourceKey,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Calls observed by [`MockVolumeDriver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverCall {
    Start,
    Status,
    Cancel,
    ClusterDomains,
    UpdatePersistentVolume,
}

/// Volume driver that reports a fixed set of volumes
///
/// `start_migration` returns the configured volumes as InProgress. Status
/// polls return the configured status list, or the started volumes marked
/// Successful when none was set. CSI volume handles are rewritten to the PV
/// name, which is what a driver that re-provisions volumes would do.
pub struct MockVolumeDriver {
    volumes: Mutex<Vec<MigrationVolumeInfo>>,
    status: Mutex<Option<Vec<MigrationVolumeInfo>>>,
    domains: Mutex<ClusterDomains>,
    calls: Mutex<Vec<DriverCall>>,
    fail_start: Mutex<Option<String>>,
}

impl Default for MockVolumeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVolumeDriver {
    pub fn new() -> Self {
        Self {
            volumes: Mutex::new(Vec::new()),
            status: Mutex::new(None),
            domains: Mutex::new(ClusterDomains {
                local_domain: "local".to_string(),
                domains: vec![ClusterDomainInfo {
                    name: "local".to_string(),
                    state: ClusterDomainState::Active,
                }],
            }),
            calls: Mutex::new(Vec::new()),
            fail_start: Mutex::new(None),
        }
    }

    /// Volumes reported when a migration is started
    pub fn with_volume(self, namespace: &str, pvc: &str, volume: &str, bytes: u64) -> Self {
        self.volumes.lock().push(MigrationVolumeInfo {
            persistent_volume_claim: pvc.to_string(),
            namespace: namespace.to_string(),
            volume: volume.to_string(),
            status: MigrationStatusType::InProgress,
            reason: String::new(),
            bytes_total: bytes,
        });
        self
    }

    /// Status returned by subsequent polls
    pub fn set_status(&self, volumes: Vec<MigrationVolumeInfo>) {
        *self.status.lock() = Some(volumes);
    }

    pub fn set_local_domain_state(&self, state: ClusterDomainState) {
        let mut domains = self.domains.lock();
        let local = domains.local_domain.clone();
        for domain in domains.domains.iter_mut().filter(|d| d.name == local) {
            domain.state = state;
        }
    }

    pub fn fail_start(&self, message: &str) {
        *self.fail_start.lock() = Some(message.to_string());
    }

    pub fn calls(&self, call: DriverCall) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl VolumeDriver for MockVolumeDriver {
    async fn start_migration(
        &self,
        migration: &Migration,
        namespaces: &[String],
    ) -> Result<Vec<MigrationVolumeInfo>> {
        self.record(DriverCall::Start);
        if let Some(message) = self.fail_start.lock().clone() {
            return Err(MigrationError::volume_driver_error(message));
        }
        debug!(
            "Mock: starting volume migration {} for {:?}",
            migration.display_name(),
            namespaces
        );
        Ok(self
            .volumes
            .lock()
            .iter()
            .filter(|v| namespaces.contains(&v.namespace))
            .cloned()
            .collect())
    }

    async fn get_migration_status(&self, _migration: &Migration) -> Result<Vec<MigrationVolumeInfo>> {
        self.record(DriverCall::Status);
        if let Some(status) = self.status.lock().clone() {
            return Ok(status);
        }
        Ok(self
            .volumes
            .lock()
            .iter()
            .cloned()
            .map(|mut v| {
                v.status = MigrationStatusType::Successful;
                v
            })
            .collect())
    }

    async fn cancel_migration(&self, migration: &Migration) -> Result<()> {
        self.record(DriverCall::Cancel);
        debug!("Mock: cancelled volume migration {}", migration.display_name());
        Ok(())
    }

    async fn get_cluster_domains(&self) -> Result<ClusterDomains> {
        self.record(DriverCall::ClusterDomains);
        Ok(self.domains.lock().clone())
    }

    async fn update_migrated_persistent_volume_spec(&self, mut pv: DynamicObject) -> Result<DynamicObject> {
        self.record(DriverCall::UpdatePersistentVolume);
        if pv.get_path(&["spec", "csi"]).is_some() {
            let name = pv.name().to_string();
            pv.set_path(&["spec", "csi", "volumeHandle"], Value::String(name))?;
        }
        Ok(pv)
    }
}

/// Collector that lists a fixed set of resource types from the given cluster
///
/// Namespaced types are listed per requested namespace with the equality
/// selector. PersistentVolumes are selected through their claimRef namespace.
/// Objects carrying any exclude-selector label are dropped.
pub struct MockResourceCollector {
    resources: Vec<ApiResource>,
    deleted: Mutex<Vec<ResourceKey>>,
}

impl MockResourceCollector {
    pub fn new(resources: Vec<ApiResource>) -> Self {
        Self {
            resources,
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// Volumes, claims and the common application kinds
    pub fn with_default_types() -> Self {
        Self::new(vec![
            ApiResource::persistent_volumes(),
            ApiResource::persistent_volume_claims(),
            ApiResource::service_accounts(),
            ApiResource::config_maps(),
            ApiResource::services(),
            ApiResource::namespaced("apps/v1", "Deployment"),
            ApiResource::namespaced("apps/v1", "StatefulSet"),
            ApiResource::namespaced("batch/v1", "CronJob"),
        ])
    }

    /// Objects removed through `delete_resources`
    pub fn deleted(&self) -> Vec<ResourceKey> {
        self.deleted.lock().clone()
    }

    fn excluded(object: &DynamicObject, exclude: &BTreeMap<String, String>) -> bool {
        let labels = object.labels();
        exclude.iter().any(|(k, v)| labels.get(k) == Some(v))
    }
}

#[async_trait]
impl ResourceCollector for MockResourceCollector {
    async fn get_resources(
        &self,
        cluster: &dyn ClusterApi,
        request: &CollectRequest,
    ) -> Result<CollectedResources> {
        self.get_resources_excluding_types(cluster, request, &[]).await
    }

    async fn get_resources_excluding_types(
        &self,
        cluster: &dyn ClusterApi,
        request: &CollectRequest,
        exclude_types: &[String],
    ) -> Result<CollectedResources> {
        let mut collected = CollectedResources::default();
        for resource in &self.resources {
            if exclude_types.iter().any(|t| t == &resource.gvk.kind) {
                continue;
            }
            let part = self.get_resources_for_type(cluster, resource, request).await?;
            collected.objects.extend(part.objects);
            collected.pvcs_with_owner_refs.extend(part.pvcs_with_owner_refs);
        }
        Ok(collected)
    }

    async fn get_resources_for_type(
        &self,
        cluster: &dyn ClusterApi,
        resource: &ApiResource,
        request: &CollectRequest,
    ) -> Result<CollectedResources> {
        let mut objects = Vec::new();
        if resource.namespaced {
            let selector = label_selector(&request.selectors);
            for namespace in &request.namespaces {
                objects.extend(
                    cluster
                        .list(resource, Some(namespace), selector.as_deref())
                        .await?,
                );
            }
        } else if resource.gvk.kind == "PersistentVolume" {
            objects = cluster
                .list(resource, None, None)
                .await?
                .into_iter()
                .filter(|pv| {
                    pv.get_path(&["spec", "claimRef", "namespace"])
                        .and_then(Value::as_str)
                        .map(|ns| request.namespaces.iter().any(|n| n == ns))
                        .unwrap_or(false)
                })
                .collect();
        }
        objects.retain(|o| !Self::excluded(o, &request.exclude_selectors));

        let mut pvcs_with_owner_refs = Vec::new();
        if resource.gvk.kind == "PersistentVolumeClaim" {
            for object in objects.iter().filter(|o| !o.owner_references().is_empty()) {
                pvcs_with_owner_refs.push(object.to_typed::<PersistentVolumeClaim>()?);
            }
        }

        debug!("Mock: collected {} {}", objects.len(), resource.plural);
        Ok(CollectedResources {
            objects,
            pvcs_with_owner_refs,
        })
    }

    fn objects_to_be_deleted(
        &self,
        source: &[DynamicObject],
        destination: &[DynamicObject],
    ) -> Vec<DynamicObject> {
        let present: HashSet<(String, String, String)> = source
            .iter()
            .map(|o| (o.kind().to_string(), o.namespace().to_string(), o.name().to_string()))
            .collect();
        destination
            .iter()
            .filter(|o| {
                !present.contains(&(o.kind().to_string(), o.namespace().to_string(), o.name().to_string()))
            })
            .cloned()
            .collect()
    }

    async fn delete_resources(&self, cluster: &dyn ClusterApi, objects: &[DynamicObject]) -> Result<()> {
        for object in objects {
            let resource = ApiResource::new(object.gvk(), !object.namespace().is_empty());
            let namespace = Some(object.namespace()).filter(|ns| !ns.is_empty());
            match cluster.delete(&resource, namespace, object.name()).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
            self.deleted.lock().push(object.resource_key());
        }
        Ok(())
    }
}

/// Rule executor recording which rules ran where
///
/// Rules with a background action hand back a cancellation token, which the
/// test can inspect afterwards.
#[derive(Default)]
pub struct MockRuleExecutor {
    executed: Mutex<Vec<(RuleType, String, String)>>,
    failing: Mutex<HashSet<String>>,
    tokens: Mutex<Vec<CancellationToken>>,
    recovered: Mutex<Vec<String>>,
}

impl MockRuleExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every execution of the given rule type fail
    pub fn fail(&self, rule_type: RuleType) {
        self.failing.lock().insert(rule_type.to_string());
    }

    /// (rule type, rule name, namespace) of every execution
    pub fn executed(&self) -> Vec<(RuleType, String, String)> {
        self.executed.lock().clone()
    }

    pub fn tokens(&self) -> Vec<CancellationToken> {
        self.tokens.lock().clone()
    }

    /// Migrations passed to rule recovery
    pub fn recovered(&self) -> Vec<String> {
        self.recovered.lock().clone()
    }
}

#[async_trait]
impl RuleExecutor for MockRuleExecutor {
    async fn execute_rule(
        &self,
        rule: &Rule,
        rule_type: RuleType,
        _migration: &Migration,
        namespace: &str,
    ) -> Result<Option<CancellationToken>> {
        let name = rule.metadata.name.clone().unwrap_or_default();
        self.executed
            .lock()
            .push((rule_type, name.clone(), namespace.to_string()));

        if self.failing.lock().contains(&rule_type.to_string()) {
            return Err(MigrationError::rule_failed(
                rule_type.to_string(),
                name,
                "command exited with status 1",
            ));
        }

        let background = rule
            .rules
            .iter()
            .flat_map(|item| item.actions.iter())
            .any(|action| action.background);
        if !background {
            return Ok(None);
        }
        let token = CancellationToken::new();
        self.tokens.lock().push(token.clone());
        debug!("Mock: rule {} left background commands in {}", name, namespace);
        Ok(Some(token))
    }

    async fn perform_rule_recovery(&self, migration: &Migration) -> Result<()> {
        self.recovered.lock().push(migration.display_name());
        Ok(())
    }
}

/// Event recorder keeping every event in memory
#[derive(Default)]
pub struct RecordingEventRecorder {
    events: Mutex<Vec<MigrationEvent>>,
}

impl RecordingEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MigrationEvent> {
        self.events.lock().clone()
    }

    pub fn warnings(&self) -> Vec<MigrationEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.is_warning())
            .cloned()
            .collect()
    }

    pub fn has_reason(&self, reason: &str) -> bool {
        self.events.lock().iter().any(|e| e.reason == reason)
    }
}

impl EventRecorder for RecordingEventRecorder {
    fn record(&self, event: MigrationEvent) {
        debug!("Mock: event {} {}: {}", event.event_type, event.reason, event.message);
        self.events.lock().push(event);
    }
}

/// Connector handing out a preset cluster for every ClusterPair
pub struct MockConnector {
    cluster: Arc<dyn ClusterApi>,
    connections: Mutex<usize>,
}

impl MockConnector {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            cluster,
            connections: Mutex::new(0),
        }
    }

    pub fn connections(&self) -> usize {
        *self.connections.lock()
    }
}

#[async_trait]
impl ClusterConnector for MockConnector {
    async fn connect(&self, pair: &ClusterPair) -> Result<Arc<dyn ClusterApi>> {
        *self.connections.lock() += 1;
        debug!(
            "Mock: connecting cluster pair {}",
            pair.metadata.name.as_deref().unwrap_or_default()
        );
        Ok(self.cluster.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portage_core::{GroupVersionKind, MockCluster};
    use serde_json::json;

    #[tokio::test]
    async fn test_collector_filters_namespaces_and_excludes() {
        let cluster = MockCluster::new();
        let res = ApiResource::config_maps();
        let gvk = GroupVersionKind::new("", "v1", "ConfigMap");
        cluster.insert(&res, DynamicObject::new(&gvk, Some("app1"), "a")).await;
        cluster.insert(&res, DynamicObject::new(&gvk, Some("app2"), "b")).await;
        let mut skipped = DynamicObject::new(&gvk, Some("app1"), "c");
        let mut labels = BTreeMap::new();
        labels.insert("skip".to_string(), "yes".to_string());
        skipped.set_labels(labels.clone());
        cluster.insert(&res, skipped).await;

        let collector = MockResourceCollector::new(vec![res]);
        let request = CollectRequest {
            namespaces: vec!["app1".to_string()],
            exclude_selectors: labels,
            ..Default::default()
        };
        let collected = collector.get_resources(&cluster, &request).await.unwrap();
        assert_eq!(collected.objects.len(), 1);
        assert_eq!(collected.objects[0].name(), "a");
    }

    #[tokio::test]
    async fn test_collector_selects_pvs_by_claim_namespace() {
        let cluster = MockCluster::new();
        let res = ApiResource::persistent_volumes();
        for (name, ns) in [("pv-1", "app1"), ("pv-2", "other")] {
            let pv = DynamicObject::from_value(json!({
                "apiVersion": "v1",
                "kind": "PersistentVolume",
                "metadata": {"name": name},
                "spec": {"claimRef": {"namespace": ns, "name": "data"}}
            }))
            .unwrap();
            cluster.insert(&res, pv).await;
        }

        let collector = MockResourceCollector::with_default_types();
        let request = CollectRequest {
            namespaces: vec!["app1".to_string()],
            ..Default::default()
        };
        let collected = collector
            .get_resources_for_type(&cluster, &res, &request)
            .await
            .unwrap();
        assert_eq!(collected.objects.len(), 1);
        assert_eq!(collected.objects[0].name(), "pv-1");
    }

    #[test]
    fn test_objects_to_be_deleted() {
        let gvk = GroupVersionKind::new("", "v1", "Service");
        let source = vec![DynamicObject::new(&gvk, Some("app1"), "keep")];
        let destination = vec![
            DynamicObject::new(&gvk, Some("app1"), "keep"),
            DynamicObject::new(&gvk, Some("app1"), "stale"),
        ];
        let collector = MockResourceCollector::with_default_types();
        let stale = collector.objects_to_be_deleted(&source, &destination);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].name(), "stale");
    }
}
