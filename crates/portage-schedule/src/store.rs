use crate::error::Result;
use crate::types::SchedulePolicy;
use async_trait::async_trait;
use portage_core::{ClusterApi, Resource};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Where SchedulePolicies are read from and written to
#[async_trait]
pub trait SchedulePolicyStore: Send + Sync {
    /// Fetch a policy by name; `None` when it does not exist
    async fn get_policy(&self, name: &str) -> Result<Option<SchedulePolicy>>;

    async fn create_policy(&self, policy: &SchedulePolicy) -> Result<SchedulePolicy>;

    async fn update_policy(&self, policy: &SchedulePolicy) -> Result<SchedulePolicy>;
}

/// Policies kept in memory, used by the CLI and in tests
#[derive(Clone, Default)]
pub struct InMemoryPolicyStore {
    policies: Arc<RwLock<HashMap<String, SchedulePolicy>>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store preloaded with policies
    pub fn with_policies(policies: impl IntoIterator<Item = SchedulePolicy>) -> Self {
        let map = policies
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();
        Self {
            policies: Arc::new(RwLock::new(map)),
        }
    }

    pub async fn delete_policy(&self, name: &str) {
        self.policies.write().await.remove(name);
    }
}

#[async_trait]
impl SchedulePolicyStore for InMemoryPolicyStore {
    async fn get_policy(&self, name: &str) -> Result<Option<SchedulePolicy>> {
        Ok(self.policies.read().await.get(name).cloned())
    }

    async fn create_policy(&self, policy: &SchedulePolicy) -> Result<SchedulePolicy> {
        debug!("Storing schedule policy {}", policy.name());
        self.policies
            .write()
            .await
            .insert(policy.name().to_string(), policy.clone());
        Ok(policy.clone())
    }

    async fn update_policy(&self, policy: &SchedulePolicy) -> Result<SchedulePolicy> {
        self.create_policy(policy).await
    }
}

/// Policies stored as cluster-scoped objects on a cluster
pub struct ClusterPolicyStore {
    api: Arc<dyn ClusterApi>,
}

impl ClusterPolicyStore {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl SchedulePolicyStore for ClusterPolicyStore {
    async fn get_policy(&self, name: &str) -> Result<Option<SchedulePolicy>> {
        match self.api.get_typed::<SchedulePolicy>(None, name).await {
            Ok(policy) => Ok(Some(policy)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_policy(&self, policy: &SchedulePolicy) -> Result<SchedulePolicy> {
        Ok(self.api.create_typed(policy).await?)
    }

    async fn update_policy(&self, policy: &SchedulePolicy) -> Result<SchedulePolicy> {
        let mut policy = policy.clone();
        policy.metadata_mut().resource_version = None;
        Ok(self.api.update_typed(&policy).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IntervalPolicy, SchedulePolicyItem};
    use portage_core::MockCluster;

    fn interval_policy(name: &str, minutes: i64) -> SchedulePolicy {
        SchedulePolicy::new(
            name,
            SchedulePolicyItem {
                interval: Some(IntervalPolicy {
                    interval_minutes: minutes,
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_cluster_store_round_trip() {
        let store = ClusterPolicyStore::new(Arc::new(MockCluster::new()));
        assert!(store.get_policy("hourly").await.unwrap().is_none());

        store.create_policy(&interval_policy("hourly", 60)).await.unwrap();
        let stored = store.get_policy("hourly").await.unwrap().unwrap();
        assert_eq!(stored.policy.interval.as_ref().map(|i| i.interval_minutes), Some(60));

        store.update_policy(&interval_policy("hourly", 90)).await.unwrap();
        let stored = store.get_policy("hourly").await.unwrap().unwrap();
        assert_eq!(stored.policy.interval.map(|i| i.interval_minutes), Some(90));
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryPolicyStore::with_policies([interval_policy("a", 5)]);
        assert!(store.get_policy("a").await.unwrap().is_some());
        store.delete_policy("a").await;
        assert!(store.get_policy("a").await.unwrap().is_none());
    }
}
