use crate::config::RetryPolicy;
use crate::error::Result;
use portage_core::resources::{ApplicationRegistration, ApplicationResource};
use portage_core::{ApiResource, ClusterApi, DynamicObject, GroupVersionKind};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

/// Categories too broad to relate CRDs to each other
const IGNORED_CATEGORIES: [&str; 3] = ["all", "olm", "coreoperators"];

/// `<plural>.<group>`
pub fn crd_name(gvk: &GroupVersionKind) -> String {
    format!("{}.{}", gvk.resource_name(), gvk.group)
}

/// Read a CRD from the source, preferring the v1beta1 definition
async fn source_crd(source: &dyn ClusterApi, name: &str) -> Option<DynamicObject> {
    for version in ["v1beta1", "v1"] {
        let resource = ApiResource::custom_resource_definitions(version);
        if let Ok(crd) = source.get(&resource, None, name).await {
            return Some(crd);
        }
    }
    None
}

fn categories(crd: &DynamicObject) -> Vec<String> {
    crd.get_path(&["spec", "names", "categories"])
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Registered resources whose CRDs must exist on the destination
///
/// Resources of a collected group are always included. Resources of other
/// groups are pulled in when their CRD shares a category with one of those,
/// which catches operator types that are only referenced indirectly.
pub async fn related_resources(
    source: &dyn ClusterApi,
    registrations: &[ApplicationRegistration],
    groups: &BTreeSet<String>,
) -> Vec<ApplicationResource> {
    let resources: Vec<&ApplicationResource> =
        registrations.iter().flat_map(|r| r.resources.iter()).collect();

    let mut wanted_categories = BTreeSet::new();
    for resource in resources.iter().filter(|r| groups.contains(&r.gvk.group)) {
        if let Some(crd) = source_crd(source, &crd_name(&resource.gvk)).await {
            wanted_categories.extend(
                categories(&crd)
                    .into_iter()
                    .filter(|c| !IGNORED_CATEGORIES.contains(&c.to_lowercase().as_str())),
            );
        }
    }
    debug!("CRD categories to include: {:?}", wanted_categories);

    let mut related: Vec<ApplicationResource> = Vec::new();
    for resource in resources {
        if related.iter().any(|r| r.gvk == resource.gvk) {
            continue;
        }
        let include = if groups.contains(&resource.gvk.group) {
            true
        } else if wanted_categories.is_empty() {
            false
        } else {
            match source_crd(source, &crd_name(&resource.gvk)).await {
                Some(crd) => categories(&crd).iter().any(|c| wanted_categories.contains(c)),
                None => false,
            }
        };
        if include {
            related.push(resource.clone());
        }
    }
    related
}

/// Register the CRDs of the given resources on the destination
pub async fn register_crds(
    source: &dyn ClusterApi,
    dest: &dyn ClusterApi,
    resources: &[ApplicationResource],
    retry: &RetryPolicy,
) -> Result<()> {
    for resource in resources {
        let name = crd_name(&resource.gvk);

        let v1beta1 = ApiResource::custom_resource_definitions("v1beta1");
        if let Ok(crd) = source.get(&v1beta1, None, &name).await {
            match dest.create(&v1beta1, &for_destination(crd)).await {
                Ok(_) => {
                    info!("Registered CRD {}", name);
                    if let Err(e) = wait_established(dest, &v1beta1, &name, retry).await {
                        error!("Unable to validate CRD {}: {}", name, e);
                    }
                    continue;
                }
                Err(e) if e.is_already_exists() => continue,
                Err(e) => warn!("Error registering CRD {}: {}", name, e),
            }
        }

        let v1 = ApiResource::custom_resource_definitions("v1");
        let mut crd = match source.get(&v1, None, &name).await {
            Ok(crd) => for_destination(crd),
            Err(e) if e.is_not_found() => {
                warn!("CRD {} not found for kind {}", name, resource.gvk.kind);
                continue;
            }
            Err(e) => {
                error!("Unable to get CRD {}: {}", name, e);
                return Err(e.into());
            }
        };
        convert_preserve_unknown_fields(&mut crd)?;

        match dest.create(&v1, &crd).await {
            Ok(_) => {
                info!("Registered CRD {}", name);
                if let Err(e) = wait_established(dest, &v1, &name, retry).await {
                    error!("Unable to validate CRD {}: {}", name, e);
                }
            }
            Err(e) if e.is_already_exists() => {}
            Err(e) => error!("Error registering CRD {}: {}", name, e),
        }
    }
    Ok(())
}

fn for_destination(mut crd: DynamicObject) -> DynamicObject {
    crd.clear_server_fields();
    crd.remove_path(&["status"]);
    crd
}

/// Move the deprecated top-level `preserveUnknownFields` into each version's schema
///
/// CRDs created through v1beta1 on newer clusters are served as v1 with the
/// flag still set, and a v1 definition carrying it is rejected on create.
pub fn convert_preserve_unknown_fields(crd: &mut DynamicObject) -> Result<()> {
    let preserve = crd
        .get_path(&["spec", "preserveUnknownFields"])
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !preserve {
        return Ok(());
    }
    crd.set_path(&["spec", "preserveUnknownFields"], Value::Bool(false))?;

    if let Some(versions) = crd
        .get_path_mut(&["spec", "versions"])
        .and_then(Value::as_array_mut)
    {
        for version in versions.iter_mut() {
            let Some(version) = version.as_object_mut() else {
                continue;
            };
            let schema = version
                .entry("schema")
                .or_insert_with(|| json!({}));
            if !schema.is_object() {
                *schema = json!({});
            }
            let open_api = &mut schema["openAPIV3Schema"];
            if !open_api.is_object() {
                *open_api = json!({});
            }
            open_api["x-kubernetes-preserve-unknown-fields"] = Value::Bool(true);
        }
    }
    Ok(())
}

/// Poll until the CRD reports the Established condition
async fn wait_established(
    dest: &dyn ClusterApi,
    resource: &ApiResource,
    name: &str,
    retry: &RetryPolicy,
) -> Result<()> {
    for _ in 0..retry.crd_polls {
        let crd = dest.get(resource, None, name).await?;
        let established = crd
            .get_path(&["status", "conditions"])
            .and_then(Value::as_array)
            .map(|conditions| {
                conditions.iter().any(|c| {
                    c.get("type").and_then(Value::as_str) == Some("Established")
                        && c.get("status").and_then(Value::as_str) == Some("True")
                })
            })
            .unwrap_or(false);
        if established {
            return Ok(());
        }
        tokio::time::sleep(retry.crd_poll_interval).await;
    }
    Err(crate::error::MigrationError::internal_error(format!(
        "CRD {} is not established",
        name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use portage_core::MockCluster;

    fn crd(version: &str, kind: &str, group: &str, categories: &[&str]) -> DynamicObject {
        let gvk = GroupVersionKind::new(group, "v1", kind);
        DynamicObject::from_value(json!({
            "apiVersion": format!("apiextensions.k8s.io/{}", version),
            "kind": "CustomResourceDefinition",
            "metadata": {"name": crd_name(&gvk)},
            "spec": {
                "group": group,
                "names": {"kind": kind, "categories": categories},
                "preserveUnknownFields": true,
                "versions": [{"name": "v1", "served": true, "storage": true}]
            }
        }))
        .unwrap()
    }

    fn registration(resources: &[(&str, &str)]) -> ApplicationRegistration {
        ApplicationRegistration {
            resources: resources
                .iter()
                .map(|(group, kind)| ApplicationResource {
                    gvk: GroupVersionKind::new(*group, "v1", *kind),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_crd_name() {
        let gvk = GroupVersionKind::new("couchbase.com", "v2", "CouchbaseBucket");
        assert_eq!(crd_name(&gvk), "couchbasebuckets.couchbase.com");
    }

    #[test]
    fn test_preserve_unknown_fields_moves_into_schema() {
        let mut obj = crd("v1", "Widget", "example.com", &[]);
        convert_preserve_unknown_fields(&mut obj).unwrap();

        assert_eq!(obj.get_path(&["spec", "preserveUnknownFields"]), Some(&json!(false)));
        assert_eq!(
            obj.get_path(&["spec", "versions"]).unwrap()[0]["schema"]["openAPIV3Schema"]
                ["x-kubernetes-preserve-unknown-fields"],
            json!(true)
        );
    }

    #[tokio::test]
    async fn test_related_resources_by_category() {
        let source = MockCluster::new();
        let v1 = ApiResource::custom_resource_definitions("v1");
        source.insert(&v1, crd("v1", "Widget", "example.com", &["tools", "all"])).await;
        source.insert(&v1, crd("v1", "Gadget", "gadgets.io", &["tools"])).await;
        source.insert(&v1, crd("v1", "Other", "other.io", &["all"])).await;

        let registrations = [registration(&[
            ("example.com", "Widget"),
            ("gadgets.io", "Gadget"),
            ("other.io", "Other"),
        ])];
        let groups: BTreeSet<String> = ["example.com".to_string()].into_iter().collect();
        let related = related_resources(&source, &registrations, &groups).await;
        let kinds: Vec<&str> = related.iter().map(|r| r.gvk.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Widget", "Gadget"]);
    }

    #[tokio::test]
    async fn test_register_converts_v1_definitions() {
        let source = MockCluster::new().with_disabled_api_version("apiextensions.k8s.io/v1beta1");
        let dest = MockCluster::new();
        let v1 = ApiResource::custom_resource_definitions("v1");
        source.insert(&v1, crd("v1", "Widget", "example.com", &[])).await;

        let resources = registration(&[("example.com", "Widget"), ("missing.io", "Ghost")]).resources;
        register_crds(&source, &dest, &resources, &RetryPolicy::without_delays())
            .await
            .unwrap();

        let created = dest.object(&v1, "", "widgets.example.com").await.unwrap();
        assert_eq!(created.get_path(&["spec", "preserveUnknownFields"]), Some(&json!(false)));
        assert_eq!(dest.writes_for("CustomResourceDefinition").creates, 1);

        // Already registered
        register_crds(&source, &dest, &resources, &RetryPolicy::without_delays())
            .await
            .unwrap();
        assert_eq!(dest.writes_for("CustomResourceDefinition").creates, 1);
    }
}
