use crate::object::DynamicObject;
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A request to copy volumes and resources to the cluster named by a ClusterPair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: MigrationSpec,
    #[serde(default)]
    pub status: MigrationStatus,
}

impl Migration {
    pub fn new(namespace: &str, name: &str, spec: MigrationSpec) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec,
            status: MigrationStatus::default(),
        }
    }

    /// `namespace/name` for log lines
    pub fn display_name(&self) -> String {
        format!(
            "{}/{}",
            self.metadata.namespace.as_deref().unwrap_or_default(),
            self.metadata.name.as_deref().unwrap_or_default()
        )
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// Mark the migration terminally failed
    pub fn fail(&mut self) {
        self.status.stage = MigrationStage::Final;
        self.status.status = MigrationStatusType::Failed;
        self.status.finish_timestamp = Some(Utc::now());
    }
}

/// User-declared parameters of a Migration
///
/// Feature flags are optional on the wire so that an unset flag can be told
/// apart from an explicit `false`; [`MigrationSpec::apply_defaults`] fills them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSpec {
    #[serde(default)]
    pub cluster_pair: String,
    /// Optional cluster pair holding admin credentials for cluster-scoped objects
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub admin_cluster_pair: String,
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Label selector picking additional namespaces
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespace_selectors: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_resources: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_volumes: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_applications: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purge_deleted_resources: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_service_update: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_network_policy_with_cidr: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_deleted_namespaces: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_owner_references_check: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selectors: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exclude_selectors: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_exec_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_exec_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_optional_resource_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_resource_types: Vec<String>,
    /// Names of ResourceTransformation objects; at most one is supported
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transform_specs: Vec<String>,
}

impl MigrationSpec {
    /// Fill unset feature flags with their defaults
    pub fn apply_defaults(&mut self) {
        self.include_volumes.get_or_insert(true);
        self.include_resources.get_or_insert(true);
        self.skip_deleted_namespaces.get_or_insert(true);
        self.start_applications.get_or_insert(false);
        self.purge_deleted_resources.get_or_insert(false);
        self.skip_service_update.get_or_insert(false);
        self.include_network_policy_with_cidr.get_or_insert(false);
        self.ignore_owner_references_check.get_or_insert(false);
    }

    pub fn include_volumes(&self) -> bool {
        self.include_volumes.unwrap_or(true)
    }

    pub fn include_resources(&self) -> bool {
        self.include_resources.unwrap_or(true)
    }

    pub fn skip_deleted_namespaces(&self) -> bool {
        self.skip_deleted_namespaces.unwrap_or(true)
    }

    pub fn start_applications(&self) -> bool {
        self.start_applications.unwrap_or(false)
    }

    pub fn purge_deleted_resources(&self) -> bool {
        self.purge_deleted_resources.unwrap_or(false)
    }

    pub fn skip_service_update(&self) -> bool {
        self.skip_service_update.unwrap_or(false)
    }

    pub fn include_network_policy_with_cidr(&self) -> bool {
        self.include_network_policy_with_cidr.unwrap_or(false)
    }

    pub fn ignore_owner_references_check(&self) -> bool {
        self.ignore_owner_references_check.unwrap_or(false)
    }

    pub fn pre_exec_rule(&self) -> Option<&str> {
        self.pre_exec_rule.as_deref().filter(|r| !r.is_empty())
    }

    pub fn post_exec_rule(&self) -> Option<&str> {
        self.post_exec_rule.as_deref().filter(|r| !r.is_empty())
    }
}

/// Coarse phase of a Migration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationStage {
    #[default]
    Initial,
    PreExecRule,
    Volumes,
    Applications,
    Final,
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationStage::Initial => "Initial",
            MigrationStage::PreExecRule => "PreExecRule",
            MigrationStage::Volumes => "Volumes",
            MigrationStage::Applications => "Applications",
            MigrationStage::Final => "Final",
        };
        write!(f, "{}", s)
    }
}

/// Status of a Migration, a volume or a single resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationStatusType {
    #[default]
    Initial,
    Pending,
    InProgress,
    Successful,
    Failed,
    PartialSuccess,
    Purged,
}

impl MigrationStatusType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatusType::Initial => "Initial",
            MigrationStatusType::Pending => "Pending",
            MigrationStatusType::InProgress => "InProgress",
            MigrationStatusType::Successful => "Successful",
            MigrationStatusType::Failed => "Failed",
            MigrationStatusType::PartialSuccess => "PartialSuccess",
            MigrationStatusType::Purged => "Purged",
        }
    }
}

impl fmt::Display for MigrationStatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    #[serde(default)]
    pub stage: MigrationStage,
    #[serde(default)]
    pub status: MigrationStatusType,
    /// Unset until the volume driver has been asked to start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<MigrationVolumeInfo>>,
    #[serde(default)]
    pub resources: Vec<MigrationResourceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<MigrationSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_migration_finish_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_migration_finish_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_timestamp: Option<DateTime<Utc>>,
}

/// Progress of one migrated volume as reported by the volume driver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationVolumeInfo {
    pub persistent_volume_claim: String,
    pub namespace: String,
    pub volume: String,
    pub status: MigrationStatusType,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub bytes_total: u64,
}

/// Outcome of migrating one collected resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResourceInfo {
    pub name: String,
    pub namespace: String,
    pub group: String,
    pub version: String,
    pub kind: String,
    pub status: MigrationStatusType,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformed_by: Option<String>,
}

impl MigrationResourceInfo {
    /// Build an entry for a collected object with the given status
    pub fn for_object(obj: &DynamicObject, status: MigrationStatusType) -> Self {
        let gvk = obj.gvk();
        Self {
            name: obj.name().to_string(),
            namespace: obj.namespace().to_string(),
            group: gvk.group_or_core().to_string(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
            status,
            reason: String::new(),
            transformed_by: None,
        }
    }

    /// Exact (name, namespace, group-or-core, version, kind) match
    pub fn matches(&self, obj: &DynamicObject) -> bool {
        let gvk = obj.gvk();
        self.name == obj.name()
            && self.namespace == obj.namespace()
            && self.group == gvk.group_or_core()
            && self.version == gvk.version
            && self.kind == gvk.kind
    }
}

/// Derived counters exposed on the status surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSummary {
    pub total_number_of_volumes: u64,
    pub number_of_migrated_volumes: u64,
    pub total_number_of_resources: u64,
    pub number_of_migrated_resources: u64,
    pub total_bytes_migrated: u64,
    pub elapsed_time_for_volume_migration: String,
    pub elapsed_time_for_resource_migration: String,
}
