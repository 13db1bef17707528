// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

//! Portage Core - shared types for cluster-to-cluster application migration
//!
//! This crate provides:
//! - The dynamic `ClusterApi` client trait and an in-memory `MockCluster`
//! - Unstructured objects and typed resource views
//! - Migration, ClusterPair, Rule and transformation resource definitions
//! - Annotation keys and the stashes carried in them
//! - Error types with miette diagnostics

pub mod annotations;
pub mod api;
pub mod error;
pub mod events;
pub mod mock;
pub mod object;
pub mod resources;
pub mod types;

pub use api::{label_selector, selector_matches, ClusterApi};
pub use error::{PortageError, Result};
pub use events::{EventType, MigrationEvent};
pub use mock::{InjectedError, MockCluster, MockOp, WriteCounts};
pub use object::{split_path, DynamicObject};
pub use resources::Resource;
pub use types::{ApiResource, GroupVersionKind, ResourceKey, CORE_GROUP};

pub use k8s_openapi;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

/// Serialize a resource to JSON
pub fn to_json<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_json::to_string(resource).map_err(|e| {
        PortageError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        PortageError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a resource to YAML
pub fn to_yaml<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_yaml::to_string(resource).map_err(|e| {
        PortageError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        PortageError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Migration, MigrationStatusType};

    #[test]
    fn test_migration_yaml() {
        let yaml = r#"
metadata:
  name: nightly
  namespace: app1
spec:
  clusterPair: remote
  namespaces: [app1, app2]
  startApplications: false
"#;
        let migration: Migration = from_yaml(yaml).unwrap();
        assert_eq!(migration.spec.cluster_pair, "remote");
        assert_eq!(migration.spec.namespaces, vec!["app1", "app2"]);
        assert_eq!(migration.status.status, MigrationStatusType::Initial);

        let json = to_json(&migration).unwrap();
        let back: Migration = from_json(&json).unwrap();
        assert_eq!(back, migration);
    }
}
