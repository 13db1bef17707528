use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use portage_core::resources::{ClusterPair, Migration, MigrationVolumeInfo, Rule, RuleType};
use portage_core::{ApiResource, ClusterApi, DynamicObject, EventType, MigrationEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterDomainState {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDomainInfo {
    pub name: String,
    pub state: ClusterDomainState,
}

/// Failure domains known to the storage layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDomains {
    pub local_domain: String,
    pub domains: Vec<ClusterDomainInfo>,
}

impl ClusterDomains {
    pub fn local_domain_inactive(&self) -> bool {
        self.domains
            .iter()
            .any(|d| d.name == self.local_domain && d.state == ClusterDomainState::Inactive)
    }
}

/// Storage driver replicating volume data between the clusters
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    /// Start replicating the volumes of the given namespaces
    async fn start_migration(
        &self,
        migration: &Migration,
        namespaces: &[String],
    ) -> Result<Vec<MigrationVolumeInfo>>;

    /// Current per-volume progress of a started migration
    async fn get_migration_status(&self, migration: &Migration) -> Result<Vec<MigrationVolumeInfo>>;

    async fn cancel_migration(&self, migration: &Migration) -> Result<()>;

    async fn get_cluster_domains(&self) -> Result<ClusterDomains>;

    /// Rewrite driver-specific fields of a PV before it is created on the destination
    async fn update_migrated_persistent_volume_spec(&self, pv: DynamicObject) -> Result<DynamicObject>;
}

/// Per-kind switches handed to the resource collector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorOptions {
    pub skip_services: bool,
    pub rancher_project_mappings: BTreeMap<String, String>,
    pub include_all_network_policies: bool,
    pub ignore_owner_references_check: bool,
}

/// What to collect
#[derive(Debug, Clone, Default)]
pub struct CollectRequest {
    pub namespaces: Vec<String>,
    pub selectors: BTreeMap<String, String>,
    pub exclude_selectors: BTreeMap<String, String>,
    pub include_optional_types: Vec<String>,
    pub options: CollectorOptions,
}

#[derive(Debug, Clone, Default)]
pub struct CollectedResources {
    pub objects: Vec<DynamicObject>,
    /// Claims that carried owner references on the source
    pub pvcs_with_owner_refs: Vec<PersistentVolumeClaim>,
}

/// Enumerates and deletes objects on a cluster
#[async_trait]
pub trait ResourceCollector: Send + Sync {
    async fn get_resources(
        &self,
        cluster: &dyn ClusterApi,
        request: &CollectRequest,
    ) -> Result<CollectedResources>;

    async fn get_resources_excluding_types(
        &self,
        cluster: &dyn ClusterApi,
        request: &CollectRequest,
        exclude_types: &[String],
    ) -> Result<CollectedResources>;

    async fn get_resources_for_type(
        &self,
        cluster: &dyn ClusterApi,
        resource: &ApiResource,
        request: &CollectRequest,
    ) -> Result<CollectedResources>;

    /// Objects present in `destination` that no longer exist in `source`
    fn objects_to_be_deleted(
        &self,
        source: &[DynamicObject],
        destination: &[DynamicObject],
    ) -> Vec<DynamicObject>;

    async fn delete_resources(&self, cluster: &dyn ClusterApi, objects: &[DynamicObject]) -> Result<()>;
}

/// Runs pre and post exec rules in application pods
#[async_trait]
pub trait RuleExecutor: Send + Sync {
    /// Execute a rule in one namespace
    ///
    /// Returns a token when the rule left background commands running; cancelling
    /// the token terminates them.
    async fn execute_rule(
        &self,
        rule: &Rule,
        rule_type: RuleType,
        migration: &Migration,
        namespace: &str,
    ) -> Result<Option<CancellationToken>>;

    /// Terminate background commands left over from a previous process
    async fn perform_rule_recovery(&self, migration: &Migration) -> Result<()>;
}

/// Sink for user-visible migration events
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: MigrationEvent);
}

/// Recorder that writes events to the log
#[derive(Debug, Default)]
pub struct TracingEventRecorder;

impl EventRecorder for TracingEventRecorder {
    fn record(&self, event: MigrationEvent) {
        match event.event_type {
            EventType::Warning => warn!(
                "Migration {}/{}: {}: {}",
                event.namespace, event.name, event.reason, event.message
            ),
            EventType::Normal => info!(
                "Migration {}/{}: {}: {}",
                event.namespace, event.name, event.reason, event.message
            ),
        }
    }
}

/// Turns a ClusterPair into a client for the cluster it points at
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, pair: &ClusterPair) -> Result<Arc<dyn ClusterApi>>;
}
