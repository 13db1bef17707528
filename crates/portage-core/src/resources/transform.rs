use crate::types::GroupVersionKind;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field rewrites applied to matching objects before they are applied remotely
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTransformation {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ResourceTransformationSpec,
    #[serde(default)]
    pub status: ResourceTransformationStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTransformationSpec {
    #[serde(default)]
    pub objects: Vec<TransformSpec>,
}

/// Rewrites for one kind, written as `group/version/kind` (`core` or nothing for the core group)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformSpec {
    pub resource: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selectors: BTreeMap<String, String>,
    #[serde(default)]
    pub paths: Vec<ResourcePath>,
}

impl TransformSpec {
    /// Parse the `resource` reference
    pub fn gvk(&self) -> Option<GroupVersionKind> {
        let parts: Vec<&str> = self.resource.split('/').collect();
        match parts.as_slice() {
            [group, version, kind] => {
                let group: &str = if *group == crate::types::CORE_GROUP { "" } else { group };
                Some(GroupVersionKind::new(group, *version, *kind))
            }
            [version, kind] => Some(GroupVersionKind::new("", *version, *kind)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePath {
    /// Dotted field path, e.g. `spec.replicas`
    pub path: String,
    #[serde(default)]
    pub value: String,
    #[serde(rename = "type", default)]
    pub type_: TransformValueType,
    #[serde(default)]
    pub operation: TransformOperation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformValueType {
    #[default]
    String,
    Int,
    Bool,
    Slice,
    Keypair,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformOperation {
    Add,
    #[default]
    Modify,
    Delete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformStatusType {
    #[default]
    Initial,
    InProgress,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTransformationStatus {
    #[serde(default)]
    pub status: TransformStatusType,
}
