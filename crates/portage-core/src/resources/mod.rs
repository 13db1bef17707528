pub mod cluster_pair;
pub mod migration;
pub mod registration;
pub mod rule;
pub mod schedule;
pub mod transform;

pub use cluster_pair::{
    ClusterConnection, ClusterPair, ClusterPairSpec, ClusterPairStatus, ClusterPairStatusType,
    PlatformOptions, RancherOptions,
};
pub use migration::{
    Migration, MigrationResourceInfo, MigrationSpec, MigrationStage, MigrationStatus,
    MigrationStatusType, MigrationSummary, MigrationVolumeInfo,
};
pub use registration::{ApplicationRegistration, ApplicationResource, StashStrategy, SuspendOptions};
pub use rule::{Rule, RuleAction, RuleItem, RuleType};
pub use schedule::{MigrationSchedule, MigrationScheduleSpec, MigrationScheduleStatus};
pub use transform::{
    ResourcePath, ResourceTransformation, ResourceTransformationSpec,
    ResourceTransformationStatus, TransformOperation, TransformSpec, TransformStatusType,
    TransformValueType,
};

use crate::error::Result;
use crate::object::DynamicObject;
use crate::types::{ApiResource, GroupVersionKind, ResourceKey};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolume, PersistentVolumeClaim, Service, ServiceAccount,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Typed resources readable and writable through the dynamic API
pub trait Resource: Serialize + DeserializeOwned + Send + Sync {
    /// apiVersion of this resource
    const API_VERSION: &'static str;
    /// Kind of this resource
    const KIND: &'static str;
    /// Whether objects of this type live in a namespace
    const NAMESPACED: bool;

    /// Get the metadata of this resource
    fn metadata(&self) -> &ObjectMeta;

    /// Get mutable metadata
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// The API endpoint serving this type
    fn api_resource() -> ApiResource {
        ApiResource::new(
            GroupVersionKind::from_api_version_kind(Self::API_VERSION, Self::KIND),
            Self::NAMESPACED,
        )
    }

    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    fn resource_key(&self) -> ResourceKey {
        ResourceKey::new(
            GroupVersionKind::from_api_version_kind(Self::API_VERSION, Self::KIND),
            self.namespace(),
            self.name(),
        )
    }

    /// Convert to unstructured form with type information filled in
    fn to_dynamic(&self) -> Result<DynamicObject> {
        let mut obj = DynamicObject::from_typed(self)?;
        obj.set_path(&["apiVersion"], Self::API_VERSION.into())?;
        obj.set_path(&["kind"], Self::KIND.into())?;
        Ok(obj)
    }
}

macro_rules! impl_resource {
    ($ty:ty, $api_version:expr, $kind:expr, $namespaced:expr) => {
        impl Resource for $ty {
            const API_VERSION: &'static str = $api_version;
            const KIND: &'static str = $kind;
            const NAMESPACED: bool = $namespaced;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

impl_resource!(PersistentVolume, "v1", "PersistentVolume", false);
impl_resource!(PersistentVolumeClaim, "v1", "PersistentVolumeClaim", true);
impl_resource!(Namespace, "v1", "Namespace", false);
impl_resource!(ConfigMap, "v1", "ConfigMap", true);
impl_resource!(Service, "v1", "Service", true);
impl_resource!(ServiceAccount, "v1", "ServiceAccount", true);
impl_resource!(StorageClass, "storage.k8s.io/v1", "StorageClass", false);
impl_resource!(Deployment, "apps/v1", "Deployment", true);
impl_resource!(StatefulSet, "apps/v1", "StatefulSet", true);
impl_resource!(ReplicaSet, "apps/v1", "ReplicaSet", true);
impl_resource!(CronJob, "batch/v1", "CronJob", true);

impl_resource!(Migration, GROUP_VERSION, "Migration", true);
impl_resource!(MigrationSchedule, GROUP_VERSION, "MigrationSchedule", true);
impl_resource!(ClusterPair, GROUP_VERSION, "ClusterPair", true);
impl_resource!(Rule, GROUP_VERSION, "Rule", true);
impl_resource!(ResourceTransformation, GROUP_VERSION, "ResourceTransformation", true);
impl_resource!(ApplicationRegistration, GROUP_VERSION, "ApplicationRegistration", false);

/// API group of the custom resources defined in this crate
pub const GROUP_VERSION: &str = "portage.io/v1alpha1";
