use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Association between this cluster and a destination cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPair {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClusterPairSpec,
    #[serde(default)]
    pub status: ClusterPairStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPairSpec {
    /// How to reach the destination API server
    #[serde(default)]
    pub config: ClusterConnection,
    /// Storage-driver specific pairing options
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub platform_options: PlatformOptions,
}

/// Destination API server endpoint and credentials
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConnection {
    /// Base URL, e.g. `https://10.0.0.1:6443`
    #[serde(default)]
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// PEM encoded CA bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rancher: Option<RancherOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RancherOptions {
    /// Source project ID to destination project ID
    #[serde(default)]
    pub project_mappings: BTreeMap<String, String>,
}

impl ClusterPair {
    /// Rancher project mappings, empty when none are configured
    pub fn project_mappings(&self) -> BTreeMap<String, String> {
        self.spec
            .platform_options
            .rancher
            .as_ref()
            .map(|r| r.project_mappings.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterPairStatusType {
    #[default]
    Initial,
    Pending,
    Ready,
    Error,
    Degraded,
    NotProvided,
    Deleting,
}

impl fmt::Display for ClusterPairStatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPairStatus {
    #[serde(default)]
    pub scheduler_status: ClusterPairStatusType,
    #[serde(default)]
    pub storage_status: ClusterPairStatusType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_storage_id: String,
}
