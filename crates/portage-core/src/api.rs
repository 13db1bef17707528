use crate::error::Result;
use crate::object::DynamicObject;
use crate::resources::Resource;
use crate::types::ApiResource;
use async_trait::async_trait;

/// Dynamic client for one cluster
///
/// Every cluster interaction of the migration engine goes through this trait:
/// the source cluster, the destination reached through a cluster pair, and the
/// admin connection used for cluster-scoped objects. `MockCluster` implements
/// it in memory for tests.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// GET a single object
    async fn get(&self, resource: &ApiResource, namespace: Option<&str>, name: &str)
        -> Result<DynamicObject>;

    /// LIST objects, optionally restricted to a namespace and an equality label selector
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;

    /// POST a new object; the namespace is taken from the object
    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject>;

    /// PUT an existing object; an empty resourceVersion skips the concurrency check
    async fn update(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject>;

    /// DELETE an object
    async fn delete(&self, resource: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()>;
}

impl<'a> dyn ClusterApi + 'a {
    pub async fn get_typed<T: Resource>(&self, namespace: Option<&str>, name: &str) -> Result<T> {
        self.get(&T::api_resource(), namespace, name).await?.to_typed()
    }

    pub async fn list_typed<T: Resource>(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<T>> {
        self.list(&T::api_resource(), namespace, label_selector)
            .await?
            .iter()
            .map(DynamicObject::to_typed)
            .collect()
    }

    pub async fn create_typed<T: Resource>(&self, resource: &T) -> Result<T> {
        self.create(&T::api_resource(), &resource.to_dynamic()?)
            .await?
            .to_typed()
    }

    pub async fn update_typed<T: Resource>(&self, resource: &T) -> Result<T> {
        self.update(&T::api_resource(), &resource.to_dynamic()?)
            .await?
            .to_typed()
    }
}

/// Render a label map as an equality selector (`a=b,c=d`)
pub fn label_selector(labels: &std::collections::BTreeMap<String, String>) -> Option<String> {
    if labels.is_empty() {
        return None;
    }
    Some(
        labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Check an equality label selector against a label map
pub fn selector_matches(selector: &str, labels: &std::collections::BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(|l| l == v.trim()).unwrap_or(false),
            None => labels.contains_key(term),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_label_selector_round_trip() {
        let mut labels = BTreeMap::new();
        assert_eq!(label_selector(&labels), None);

        labels.insert("app".to_string(), "web".to_string());
        labels.insert("tier".to_string(), "front".to_string());
        let selector = label_selector(&labels).unwrap();
        assert_eq!(selector, "app=web,tier=front");
        assert!(selector_matches(&selector, &labels));

        labels.insert("tier".to_string(), "back".to_string());
        assert!(!selector_matches(&selector, &labels));
        assert!(selector_matches("app", &labels));
    }
}
