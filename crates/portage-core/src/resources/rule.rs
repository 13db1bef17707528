use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Commands run inside application pods around a migration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub rules: Vec<RuleItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleItem {
    #[serde(default)]
    pub pod_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default)]
    pub actions: Vec<RuleAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
    /// Keep the command running until the migration terminates it
    #[serde(default)]
    pub background: bool,
    #[serde(default)]
    pub run_in_single_pod: bool,
}

/// When a rule runs relative to volume migration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    PreExec,
    PostExec,
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleType::PreExec => write!(f, "preExecRule"),
            RuleType::PostExec => write!(f, "postExecRule"),
        }
    }
}
