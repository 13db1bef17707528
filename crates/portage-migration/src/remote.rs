use crate::error::{MigrationError, Result};
use crate::traits::ClusterConnector;
use portage_core::resources::{ClusterPair, Migration};
use portage_core::{ApiResource, ClusterApi};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Connections to the destination cluster for one reconciliation
///
/// `api` serves namespaced application objects. `admin` serves volumes,
/// namespaces and every other cluster-scoped object; it is the same
/// connection as `api` unless the Migration names an admin cluster pair.
/// Built fresh on every call so rotated credentials are picked up.
pub struct RemoteClient {
    pair: ClusterPair,
    api: Arc<dyn ClusterApi>,
    admin: Arc<dyn ClusterApi>,
}

impl RemoteClient {
    pub fn new(pair: ClusterPair, api: Arc<dyn ClusterApi>, admin: Arc<dyn ClusterApi>) -> Self {
        Self { pair, api, admin }
    }

    pub fn api(&self) -> &dyn ClusterApi {
        self.api.as_ref()
    }

    pub fn admin(&self) -> &dyn ClusterApi {
        self.admin.as_ref()
    }

    /// Client to use for objects of the given type
    pub fn client_for(&self, resource: &ApiResource) -> &dyn ClusterApi {
        if resource.namespaced {
            self.api()
        } else {
            self.admin()
        }
    }

    pub fn cluster_pair(&self) -> &ClusterPair {
        &self.pair
    }

    pub fn project_mappings(&self) -> BTreeMap<String, String> {
        self.pair.project_mappings()
    }
}

/// Resolves the ClusterPairs of a Migration into destination clients
pub struct RemoteClientFactory {
    source: Arc<dyn ClusterApi>,
    connector: Arc<dyn ClusterConnector>,
    admin_namespace: String,
}

impl RemoteClientFactory {
    pub fn new(
        source: Arc<dyn ClusterApi>,
        connector: Arc<dyn ClusterConnector>,
        admin_namespace: impl Into<String>,
    ) -> Self {
        Self {
            source,
            connector,
            admin_namespace: admin_namespace.into(),
        }
    }

    /// The ClusterPair named by the Migration, read from the Migration's namespace
    pub async fn cluster_pair(&self, migration: &Migration) -> Result<ClusterPair> {
        let namespace = migration.metadata.namespace.as_deref().unwrap_or_default();
        let name = migration.spec.cluster_pair.as_str();
        if name.is_empty() {
            return Err(MigrationError::invalid_migration(
                "clusterPair is empty",
                "Set spec.clusterPair to the name of a ClusterPair in the Migration's namespace",
            ));
        }
        Ok(self.source.get_typed::<ClusterPair>(Some(namespace), name).await?)
    }

    /// The admin ClusterPair, read from the admin namespace, if one is configured
    pub async fn admin_cluster_pair(&self, migration: &Migration) -> Result<Option<ClusterPair>> {
        let name = migration.spec.admin_cluster_pair.as_str();
        if name.is_empty() {
            return Ok(None);
        }
        let pair = self
            .source
            .get_typed::<ClusterPair>(Some(&self.admin_namespace), name)
            .await?;
        Ok(Some(pair))
    }

    /// Connect to the destination cluster of a Migration
    pub async fn build(&self, migration: &Migration) -> Result<RemoteClient> {
        let pair = self.cluster_pair(migration).await?;
        let api = self.connector.connect(&pair).await?;

        let admin = match self.admin_cluster_pair(migration).await? {
            Some(admin_pair) => {
                debug!(
                    "Using admin cluster pair {} for migration {}",
                    migration.spec.admin_cluster_pair,
                    migration.display_name()
                );
                self.connector.connect(&admin_pair).await?
            }
            None => api.clone(),
        };

        Ok(RemoteClient::new(pair, api, admin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnector;
    use portage_core::resources::MigrationSpec;
    use portage_core::MockCluster;

    fn pair(namespace: &str, name: &str) -> ClusterPair {
        let mut pair = ClusterPair::default();
        pair.metadata.name = Some(name.to_string());
        pair.metadata.namespace = Some(namespace.to_string());
        pair
    }

    #[tokio::test]
    async fn test_build_without_admin_pair_shares_connection() {
        let source = Arc::new(MockCluster::new());
        source.insert_typed(&pair("app1", "remote")).await.unwrap();
        let dest = Arc::new(MockCluster::new());
        let factory = RemoteClientFactory::new(
            source,
            Arc::new(MockConnector::new(dest)),
            "kube-system",
        );

        let spec = MigrationSpec {
            cluster_pair: "remote".to_string(),
            ..Default::default()
        };
        let remote = factory.build(&Migration::new("app1", "m1", spec)).await.unwrap();
        assert_eq!(remote.cluster_pair().metadata.name.as_deref(), Some("remote"));
        assert!(Arc::ptr_eq(&remote.api, &remote.admin));
    }

    #[tokio::test]
    async fn test_admin_pair_read_from_admin_namespace() {
        let source = Arc::new(MockCluster::new());
        source.insert_typed(&pair("app1", "remote")).await.unwrap();
        let dest = Arc::new(MockCluster::new());
        let factory = RemoteClientFactory::new(
            source.clone(),
            Arc::new(MockConnector::new(dest)),
            "kube-system",
        );

        let spec = MigrationSpec {
            cluster_pair: "remote".to_string(),
            admin_cluster_pair: "admin".to_string(),
            ..Default::default()
        };
        let migration = Migration::new("app1", "m1", spec);
        let err = match factory.build(&migration).await {
            Err(e) => e,
            Ok(_) => panic!("admin pair is missing"),
        };
        assert!(err.is_not_found());

        source.insert_typed(&pair("kube-system", "admin")).await.unwrap();
        assert!(factory.build(&migration).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_cluster_pair_rejected() {
        let factory = RemoteClientFactory::new(
            Arc::new(MockCluster::new()),
            Arc::new(MockConnector::new(Arc::new(MockCluster::new()))),
            "kube-system",
        );
        let migration = Migration::new("app1", "m1", MigrationSpec::default());
        assert!(matches!(
            factory.cluster_pair(&migration).await,
            Err(MigrationError::InvalidMigration { .. })
        ));
    }
}
