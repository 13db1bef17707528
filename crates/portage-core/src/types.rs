use serde::{Deserialize, Serialize};
use std::fmt;

/// Group substituted for the empty core API group in status entries
pub const CORE_GROUP: &str = "core";

/// GroupVersionKind uniquely identifies a Kubernetes resource type
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group (e.g., "", "apps", "batch")
    pub group: String,
    /// API version (e.g., "v1", "v1beta1")
    pub version: String,
    /// Resource kind (e.g., "PersistentVolume", "Deployment")
    pub kind: String,
}

impl GroupVersionKind {
    /// Create a new GVK
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Create a GVK from apiVersion and kind
    /// apiVersion format: "v1" or "group/version"
    pub fn from_api_version_kind(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };

        Self {
            group,
            version,
            kind: kind.to_string(),
        }
    }

    /// Get the apiVersion string (group/version or just version)
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Group name with the empty core group spelled out
    pub fn group_or_core(&self) -> &str {
        if self.group.is_empty() {
            CORE_GROUP
        } else {
            &self.group
        }
    }

    /// Get the full API path segment
    pub fn api_path(&self) -> String {
        if self.group.is_empty() {
            format!("api/{}", self.version)
        } else {
            format!("apis/{}/{}", self.group, self.version)
        }
    }

    /// Get the resource name (lowercase, plural)
    pub fn resource_name(&self) -> String {
        pluralize(&self.kind.to_lowercase())
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

fn pluralize(lower: &str) -> String {
    match lower {
        "endpoints" => return lower.to_string(),
        "" => return String::new(),
        _ => {}
    }
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if let Some(stem) = lower.strip_suffix('y') {
        match stem.chars().last() {
            Some('a' | 'e' | 'i' | 'o' | 'u') => format!("{}s", lower),
            _ => format!("{}ies", stem),
        }
    } else {
        format!("{}s", lower)
    }
}

/// A resource type as addressed on the API server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiResource {
    pub gvk: GroupVersionKind,
    /// Lowercase plural used in request paths
    pub plural: String,
    pub namespaced: bool,
}

impl ApiResource {
    pub fn new(gvk: GroupVersionKind, namespaced: bool) -> Self {
        let plural = gvk.resource_name();
        Self {
            gvk,
            plural,
            namespaced,
        }
    }

    pub fn namespaced(api_version: &str, kind: &str) -> Self {
        Self::new(GroupVersionKind::from_api_version_kind(api_version, kind), true)
    }

    pub fn cluster_scoped(api_version: &str, kind: &str) -> Self {
        Self::new(GroupVersionKind::from_api_version_kind(api_version, kind), false)
    }

    /// Request path for the collection, optionally inside a namespace
    pub fn collection_path(&self, namespace: Option<&str>) -> String {
        let base = self.gvk.api_path();
        match namespace.filter(|ns| self.namespaced && !ns.is_empty()) {
            Some(ns) => format!("/{}/namespaces/{}/{}", base, ns, self.plural),
            None => format!("/{}/{}", base, self.plural),
        }
    }

    /// Request path for a single object
    pub fn object_path(&self, namespace: Option<&str>, name: &str) -> String {
        format!("{}/{}", self.collection_path(namespace), name)
    }

    pub fn persistent_volumes() -> Self {
        Self::cluster_scoped("v1", "PersistentVolume")
    }

    pub fn persistent_volume_claims() -> Self {
        Self::namespaced("v1", "PersistentVolumeClaim")
    }

    pub fn namespaces() -> Self {
        Self::cluster_scoped("v1", "Namespace")
    }

    pub fn config_maps() -> Self {
        Self::namespaced("v1", "ConfigMap")
    }

    pub fn services() -> Self {
        Self::namespaced("v1", "Service")
    }

    pub fn service_accounts() -> Self {
        Self::namespaced("v1", "ServiceAccount")
    }

    pub fn custom_resource_definitions(version: &str) -> Self {
        Self::cluster_scoped(&format!("apiextensions.k8s.io/{}", version), "CustomResourceDefinition")
    }
}

/// ResourceKey uniquely identifies a specific resource instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    /// GroupVersionKind of the resource
    pub gvk: GroupVersionKind,
    /// Namespace (empty for cluster-scoped resources)
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl ResourceKey {
    /// Create a new ResourceKey
    pub fn new(gvk: GroupVersionKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            gvk,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Check if this is a namespaced resource
    pub fn is_namespaced(&self) -> bool {
        !self.namespace.is_empty()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_namespaced() {
            write!(f, "{}/{}/{}", self.gvk, self.namespace, self.name)
        } else {
            write!(f, "{}/{}", self.gvk, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gvk_from_api_version() {
        let gvk = GroupVersionKind::from_api_version_kind("v1", "PersistentVolume");
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.api_version(), "v1");
        assert_eq!(gvk.group_or_core(), "core");

        let gvk = GroupVersionKind::from_api_version_kind("apps/v1", "Deployment");
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.api_version(), "apps/v1");
        assert_eq!(gvk.group_or_core(), "apps");
    }

    #[test]
    fn test_gvk_resource_name() {
        let cases = [
            ("Deployment", "deployments"),
            ("StorageClass", "storageclasses"),
            ("NetworkPolicy", "networkpolicies"),
            ("Ingress", "ingresses"),
            ("Gateway", "gateways"),
            ("Endpoints", "endpoints"),
        ];
        for (kind, plural) in cases {
            let gvk = GroupVersionKind::new("", "v1", kind);
            assert_eq!(gvk.resource_name(), plural);
        }
    }

    #[test]
    fn test_api_resource_paths() {
        let pvc = ApiResource::persistent_volume_claims();
        assert_eq!(
            pvc.object_path(Some("app1"), "data"),
            "/api/v1/namespaces/app1/persistentvolumeclaims/data"
        );

        let pv = ApiResource::persistent_volumes();
        assert_eq!(pv.object_path(Some("ignored"), "pv-1"), "/api/v1/persistentvolumes/pv-1");

        let deploy = ApiResource::namespaced("apps/v1", "Deployment");
        assert_eq!(
            deploy.collection_path(None),
            "/apis/apps/v1/deployments"
        );
    }

    #[test]
    fn test_resource_key_display() {
        let gvk = GroupVersionKind::from_api_version_kind("v1", "PersistentVolumeClaim");
        let key = ResourceKey::new(gvk.clone(), "app1", "data");
        assert_eq!(key.to_string(), "v1/PersistentVolumeClaim/app1/data");

        let key = ResourceKey::new(gvk, "", "data");
        assert!(!key.is_namespaced());
    }
}
