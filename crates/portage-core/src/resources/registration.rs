use crate::types::GroupVersionKind;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Registers custom kinds that need special handling during migration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRegistration {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub resources: Vec<ApplicationResource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationResource {
    #[serde(flatten)]
    pub gvk: GroupVersionKind,
    #[serde(default)]
    pub keep_status: bool,
    /// Field that stops the application when set to its suspend value
    #[serde(default)]
    pub suspend_options: SuspendOptions,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested_suspend_options: Vec<SuspendOptions>,
    #[serde(default)]
    pub stash_strategy: StashStrategy,
}

impl ApplicationResource {
    /// All suspend paths, nested ones first
    pub fn all_suspend_options(&self) -> Vec<SuspendOptions> {
        let mut options = self.nested_suspend_options.clone();
        options.push(self.suspend_options.clone());
        options
    }
}

/// A suspend path, its value type (`bool`, `int` or `string`) and suspend value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspendOptions {
    #[serde(default)]
    pub path: String,
    #[serde(default, rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StashStrategy {
    /// Apply the object wrapped in a ConfigMap instead of as itself
    #[serde(default, rename = "stashCR")]
    pub stash_cr: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registration_wire_format() {
        let reg: ApplicationRegistration = serde_json::from_value(json!({
            "metadata": {"name": "couchbase"},
            "resources": [{
                "group": "couchbase.com",
                "version": "v2",
                "kind": "CouchbaseBucket",
                "suspendOptions": {"path": "spec.paused", "type": "bool", "value": "true"},
                "stashStrategy": {"stashCR": false}
            }]
        }))
        .unwrap();

        let res = &reg.resources[0];
        assert_eq!(res.gvk.group, "couchbase.com");
        assert_eq!(res.suspend_options.type_, "bool");
        assert_eq!(res.all_suspend_options().len(), 1);
    }
}
