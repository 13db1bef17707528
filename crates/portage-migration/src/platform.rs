//! Rancher project handling for labels, annotations and pod placement
//!
//! Rancher scopes namespaces and workloads to projects through
//! `field.cattle.io/projectId` style keys. Project IDs differ between
//! clusters, so they are rewritten through the ClusterPair's project
//! mappings and every other `cattle.io` key is dropped.

use serde_json::Value;
use std::collections::BTreeMap;

const CATTLE_MARKER: &str = "cattle.io";
const PROJECT_ID_MARKER: &str = "cattle.io/projectId";

/// Filter a label or annotation map for the destination cluster
pub fn filter_platform_map(
    map: &BTreeMap<String, String>,
    mappings: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    map.iter()
        .filter_map(|(key, value)| {
            if !key.contains(CATTLE_MARKER) {
                return Some((key.clone(), value.clone()));
            }
            if key.contains(PROJECT_ID_MARKER) {
                return remap_project(value, mappings).map(|mapped| (key.clone(), mapped));
            }
            None
        })
        .collect()
}

/// Rewrite project IDs in a pod spec's node selector and affinity terms
///
/// Unmapped values are left alone; pod placement is not filtered.
pub fn remap_pod_spec(pod_spec: &mut Value, mappings: &BTreeMap<String, String>) {
    if mappings.is_empty() {
        return;
    }
    if let Some(selector) = pod_spec.get_mut("nodeSelector") {
        remap_values(selector, mappings);
    }
    let Some(affinity) = pod_spec.get_mut("affinity").and_then(Value::as_object_mut) else {
        return;
    };
    for kind in ["podAffinity", "podAntiAffinity"] {
        let Some(section) = affinity.get_mut(kind) else {
            continue;
        };
        for list in [
            "requiredDuringSchedulingIgnoredDuringExecution",
            "preferredDuringSchedulingIgnoredDuringExecution",
        ] {
            let Some(terms) = section.get_mut(list).and_then(Value::as_array_mut) else {
                continue;
            };
            for term in terms {
                // Preferred terms wrap the affinity term in podAffinityTerm
                let term = if term.get("podAffinityTerm").is_some() {
                    &mut term["podAffinityTerm"]
                } else {
                    term
                };
                if let Some(labels) = term
                    .get_mut("namespaceSelector")
                    .and_then(|s| s.get_mut("matchLabels"))
                {
                    remap_values(labels, mappings);
                }
            }
        }
    }
}

fn remap_project(value: &str, mappings: &BTreeMap<String, String>) -> Option<String> {
    mappings.get(value).filter(|m| !m.is_empty()).cloned()
}

fn remap_values(labels: &mut Value, mappings: &BTreeMap<String, String>) {
    let Some(map) = labels.as_object_mut() else {
        return;
    };
    for (key, value) in map.iter_mut() {
        if !key.contains(PROJECT_ID_MARKER) {
            continue;
        }
        if let Some(mapped) = value.as_str().and_then(|v| remap_project(v, mappings)) {
            *value = Value::String(mapped);
        }
    }
}
