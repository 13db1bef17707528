use crate::error::Result;
use crate::platform::filter_platform_map;
use k8s_openapi::api::core::v1::Namespace;
use portage_core::{ClusterApi, ObjectMeta};
use std::collections::BTreeMap;
use tracing::info;

/// Create the migrated namespaces on the destination when they are missing
///
/// Namespaces that are gone from the source are skipped. Existing
/// destination namespaces are left untouched.
pub async fn ensure_namespaces(
    source: &dyn ClusterApi,
    dest: &dyn ClusterApi,
    namespaces: &[String],
    project_mappings: &BTreeMap<String, String>,
) -> Result<()> {
    for name in namespaces {
        let namespace = match source.get_typed::<Namespace>(None, name).await {
            Ok(ns) => ns,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        };

        match dest.get_typed::<Namespace>(None, name).await {
            Ok(_) => continue,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let filter = |map: Option<BTreeMap<String, String>>| {
            map.map(|m| filter_platform_map(&m, project_mappings))
        };
        let created = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: filter(namespace.metadata.labels),
                annotations: filter(namespace.metadata.annotations),
                ..Default::default()
            },
            ..Default::default()
        };
        match dest.create_typed(&created).await {
            Ok(_) => info!("Created namespace {} on destination", name),
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use portage_core::MockCluster;

    fn namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_namespaces_created_with_mapped_labels() {
        let source = MockCluster::new();
        source
            .insert_typed(&namespace("app1", &[("team", "a"), ("field.cattle.io/projectId", "p-src")]))
            .await
            .unwrap();
        let dest = MockCluster::new();
        dest.insert_typed(&namespace("app2", &[])).await.unwrap();

        let mappings: BTreeMap<String, String> =
            [("p-src".to_string(), "p-dst".to_string())].into_iter().collect();
        let names = ["app1".to_string(), "app2".to_string(), "gone".to_string()];
        ensure_namespaces(&source, &dest, &names, &mappings).await.unwrap();

        let created: Namespace = dest.object_typed("", "app1").await.unwrap();
        let labels = created.metadata.labels.unwrap();
        assert_eq!(labels.get("team").map(String::as_str), Some("a"));
        assert_eq!(labels.get("field.cattle.io/projectId").map(String::as_str), Some("p-dst"));
        assert_eq!(dest.writes_for("Namespace").creates, 1);
    }
}
