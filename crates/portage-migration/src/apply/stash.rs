//! ConfigMap stash for kinds that must not be applied live
//!
//! The manifest is stored as JSON under `cr-runtime-object`, next to an
//! `ownedPVCs` side-table mapping claim names to the owner reference they
//! should get once the object is activated. The side-table is only written
//! here; activation reads it.

use crate::error::{MigrationError, Result};
use k8s_openapi::api::core::v1::ConfigMap;
use portage_core::annotations::{
    ContentHash, CREATED_BY, SKIP_RESOURCE, STASH_CR_KEY, STASH_CR_LABEL, STASH_CR_NAME_KEY,
    STASH_OWNED_PVCS_KEY, STASH_RESOURCE_KIND_LABEL,
};
use portage_core::resources::Resource;
use portage_core::{ClusterApi, DynamicObject, ObjectMeta, OwnerReference};
use std::collections::BTreeMap;
use tracing::debug;

const MAX_NAME_LEN: usize = 253;

/// `<name>-<kind>-<group>`, lowercase and within the object name limit
pub fn stash_config_map_name(kind: &str, group: &str, name: &str) -> String {
    let mut cm_name = format!("{}-{}-{}", name, kind, group).to_lowercase();
    if cm_name.len() > MAX_NAME_LEN {
        let mut end = MAX_NAME_LEN;
        while !cm_name.is_char_boundary(end) {
            end -= 1;
        }
        cm_name.truncate(end);
    }
    cm_name.trim_end_matches(['-', '.']).to_string()
}

/// Wrap an object in its stash ConfigMap
///
/// The ConfigMap carries the hash of the wrapped object, so an unchanged
/// object maps to an unchanged ConfigMap.
pub fn stash_config_map(object: &DynamicObject, hash: ContentHash) -> Result<DynamicObject> {
    let manifest = serde_json::to_string(object.as_value()).map_err(|e| {
        MigrationError::internal_error(format!(
            "unable to encode {} {}/{}: {}",
            object.kind(),
            object.namespace(),
            object.name(),
            e
        ))
    })?;
    let gvk = object.gvk();

    let mut annotations = BTreeMap::new();
    annotations.insert(SKIP_RESOURCE.to_string(), "true".to_string());
    annotations.insert(CREATED_BY.to_string(), "true".to_string());
    hash.write(&mut annotations);

    let config_map = ConfigMap {
        metadata: ObjectMeta {
            name: Some(stash_config_map_name(&gvk.kind, &gvk.group, object.name())),
            namespace: Some(object.namespace().to_string()),
            labels: Some(BTreeMap::from([
                (STASH_CR_LABEL.to_string(), "true".to_string()),
                (STASH_RESOURCE_KIND_LABEL.to_string(), gvk.kind.clone()),
            ])),
            annotations: Some(annotations),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            (STASH_CR_KEY.to_string(), manifest),
            (STASH_OWNED_PVCS_KEY.to_string(), "{}".to_string()),
            (STASH_CR_NAME_KEY.to_string(), object.name().to_string()),
        ])),
        ..Default::default()
    };
    Ok(config_map.to_dynamic()?)
}

/// Record the owner reference a claim should get in a stash ConfigMap
///
/// Returns whether the ConfigMap was written.
pub async fn record_owned_pvc(
    cluster: &dyn ClusterApi,
    namespace: &str,
    config_map: &str,
    pvc_name: &str,
    owner: &OwnerReference,
) -> Result<bool> {
    let mut cm = cluster.get_typed::<ConfigMap>(Some(namespace), config_map).await?;
    let data = cm.data.get_or_insert_with(BTreeMap::new);

    let mut owned: BTreeMap<String, OwnerReference> = match data.get(STASH_OWNED_PVCS_KEY) {
        Some(existing) if !existing.is_empty() => serde_json::from_str(existing).map_err(|e| {
            MigrationError::internal_error(format!(
                "invalid {} in configmap {}/{}: {}",
                STASH_OWNED_PVCS_KEY, namespace, config_map, e
            ))
        })?,
        _ => BTreeMap::new(),
    };
    if owned.get(pvc_name) == Some(owner) {
        return Ok(false);
    }
    owned.insert(pvc_name.to_string(), owner.clone());

    let encoded = serde_json::to_string(&owned)
        .map_err(|e| MigrationError::internal_error(format!("unable to encode owned PVCs: {}", e)))?;
    data.insert(STASH_OWNED_PVCS_KEY.to_string(), encoded);

    cluster.update_typed(&cm).await?;
    debug!(
        "Recorded owner {} of PVC {}/{} in configmap {}",
        owner.name, namespace, pvc_name, config_map
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use portage_core::MockCluster;
    use serde_json::json;

    fn bucket() -> DynamicObject {
        DynamicObject::from_value(json!({
            "apiVersion": "couchbase.com/v2",
            "kind": "CouchbaseBucket",
            "metadata": {"name": "Orders", "namespace": "app1"},
            "spec": {"memoryQuota": "128Mi"}
        }))
        .unwrap()
    }

    #[test]
    fn test_config_map_name() {
        assert_eq!(
            stash_config_map_name("CouchbaseBucket", "couchbase.com", "Orders"),
            "orders-couchbasebucket-couchbase.com"
        );
        assert_eq!(stash_config_map_name("Widget", "", "w1"), "w1-widget");

        let long = "x".repeat(300);
        assert_eq!(stash_config_map_name("Widget", "example.com", &long).len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_stash_config_map_contents() {
        let cm = stash_config_map(&bucket(), ContentHash(42)).unwrap();
        assert_eq!(cm.kind(), "ConfigMap");
        assert_eq!(cm.namespace(), "app1");
        assert_eq!(cm.labels().get(STASH_CR_LABEL).map(String::as_str), Some("true"));
        assert_eq!(cm.annotation(SKIP_RESOURCE), Some("true"));
        assert_eq!(ContentHash::read(&cm.annotations()), Some(ContentHash(42)));

        let manifest = cm.get_path(&["data", STASH_CR_KEY]).and_then(|v| v.as_str()).unwrap();
        let embedded: serde_json::Value = serde_json::from_str(manifest).unwrap();
        assert_eq!(embedded["spec"]["memoryQuota"], "128Mi");
        assert_eq!(cm.get_path(&["data", STASH_OWNED_PVCS_KEY]), Some(&json!("{}")));
    }

    #[tokio::test]
    async fn test_owned_pvc_written_once() {
        let cluster = MockCluster::new();
        let cm = stash_config_map(&bucket(), ContentHash(1)).unwrap();
        cluster.insert(&ConfigMap::api_resource(), cm.clone()).await;

        let owner = OwnerReference {
            api_version: "couchbase.com/v2".to_string(),
            kind: "CouchbaseBucket".to_string(),
            name: "Orders".to_string(),
            uid: "src-uid".to_string(),
            ..Default::default()
        };
        assert!(record_owned_pvc(&cluster, "app1", cm.name(), "data-0", &owner).await.unwrap());
        assert!(!record_owned_pvc(&cluster, "app1", cm.name(), "data-0", &owner).await.unwrap());
        assert_eq!(cluster.writes_for("ConfigMap").updates, 1);

        let stored: ConfigMap = cluster.object_typed("app1", cm.name()).await.unwrap();
        let owned: BTreeMap<String, OwnerReference> =
            serde_json::from_str(&stored.data.unwrap()[STASH_OWNED_PVCS_KEY]).unwrap();
        assert_eq!(owned["data-0"].name, "Orders");
    }
}
