//! Resource preparation
//!
//! Collected manifests are mutated before apply so that nothing starts
//! running on the destination by accident: volumes are pinned to the Retain
//! reclaim policy, workloads are scaled to zero and registered custom
//! resources are suspended. Every mutation leaves a stash annotation behind
//! so a later activation can undo it.
//!
//! The kind of each object selects a [`PrepareStrategy`] from a dispatch
//! table keyed by group and kind. Registered suspend paths are applied after
//! the strategy, whatever it was.

pub mod suspend;
pub mod transform;
pub mod workload;

use crate::error::{MigrationError, Result};
use crate::traits::VolumeDriver;
use portage_core::annotations::ReclaimStash;
use portage_core::resources::{ApplicationRegistration, ApplicationResource};
use portage_core::{DynamicObject, GroupVersionKind};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use suspend::prepare_custom_suspend;
pub use transform::{apply_transform, TransformSet};
pub use workload::{prepare_cron_job, prepare_workload};

/// How a collected object is prepared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareStrategy {
    /// Stash the reclaim policy, force Retain and let the driver rewrite the volume source
    PersistentVolume,
    /// Scale replicas to zero
    Workload,
    /// Set spec.suspend
    CronJob,
    /// Apply the migration's resource transformation, if any
    Default,
}

/// Kinds with a dedicated strategy, as (group, kind)
const STRATEGIES: &[(&str, &str, PrepareStrategy)] = &[
    ("", "PersistentVolume", PrepareStrategy::PersistentVolume),
    ("apps", "Deployment", PrepareStrategy::Workload),
    ("apps", "StatefulSet", PrepareStrategy::Workload),
    ("apps", "ReplicaSet", PrepareStrategy::Workload),
    ("apps.openshift.io", "DeploymentConfig", PrepareStrategy::Workload),
    ("ibp.com", "IBPPeer", PrepareStrategy::Workload),
    ("ibp.com", "IBPCA", PrepareStrategy::Workload),
    ("ibp.com", "IBPConsole", PrepareStrategy::Workload),
    ("ibp.com", "IBPOrderer", PrepareStrategy::Workload),
    ("batch", "CronJob", PrepareStrategy::CronJob),
];

/// Look up the strategy for a type; the version does not matter
pub fn strategy_for(gvk: &GroupVersionKind) -> PrepareStrategy {
    STRATEGIES
        .iter()
        .find(|(group, kind, _)| *group == gvk.group && *kind == gvk.kind)
        .map(|(_, _, strategy)| *strategy)
        .unwrap_or(PrepareStrategy::Default)
}

/// Prepares collected objects for one migration run
pub struct ResourcePreparer {
    driver: Arc<dyn VolumeDriver>,
    start_applications: bool,
    project_mappings: BTreeMap<String, String>,
    transforms: TransformSet,
    registrations: Vec<ApplicationResource>,
}

impl ResourcePreparer {
    pub fn new(driver: Arc<dyn VolumeDriver>, start_applications: bool) -> Self {
        Self {
            driver,
            start_applications,
            project_mappings: BTreeMap::new(),
            transforms: TransformSet::empty(),
            registrations: Vec::new(),
        }
    }

    pub fn with_project_mappings(mut self, mappings: BTreeMap<String, String>) -> Self {
        self.project_mappings = mappings;
        self
    }

    pub fn with_transforms(mut self, transforms: TransformSet) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn with_registrations(mut self, registrations: &[ApplicationRegistration]) -> Self {
        self.registrations = registrations
            .iter()
            .flat_map(|r| r.resources.iter().cloned())
            .collect();
        self
    }

    /// Prepare every object in place, stopping at the first failure
    pub async fn prepare_all(&self, objects: &mut [DynamicObject]) -> Result<()> {
        for object in objects.iter_mut() {
            self.prepare(object).await.map_err(|e| {
                MigrationError::internal_error(format!(
                    "error preparing {} resource {}: {}",
                    object.kind(),
                    object.name(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    pub async fn prepare(&self, object: &mut DynamicObject) -> Result<()> {
        let gvk = object.gvk();
        match strategy_for(&gvk) {
            PrepareStrategy::PersistentVolume => {
                self.prepare_persistent_volume(object).await?;
            }
            PrepareStrategy::Workload => {
                prepare_workload(object, self.start_applications, &self.project_mappings)?;
            }
            PrepareStrategy::CronJob => {
                prepare_cron_job(object, self.start_applications)?;
            }
            PrepareStrategy::Default => {
                self.transforms.apply(object)?;
            }
        }

        for registered in self.registrations.iter().filter(|r| r.gvk == gvk) {
            prepare_custom_suspend(object, &registered.all_suspend_options(), self.start_applications)?;
        }
        Ok(())
    }

    async fn prepare_persistent_volume(&self, object: &mut DynamicObject) -> Result<()> {
        let policy = object
            .get_path(&["spec", "persistentVolumeReclaimPolicy"])
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut annotations = object.annotations();
        ReclaimStash(policy).write(&mut annotations);
        object.set_annotations(annotations);
        object.set_path(
            &["spec", "persistentVolumeReclaimPolicy"],
            Value::String("Retain".to_string()),
        )?;

        *object = self
            .driver
            .update_migrated_persistent_volume_spec(object.clone())
            .await?;
        Ok(())
    }

    /// Registered resources whose manifest is applied wrapped in a ConfigMap
    ///
    /// Nothing is stashed when applications are started on the destination.
    pub fn stashed_kinds(&self) -> Vec<GroupVersionKind> {
        if self.start_applications {
            return Vec::new();
        }
        self.registrations
            .iter()
            .filter(|r| r.stash_strategy.stash_cr)
            .map(|r| r.gvk.clone())
            .collect()
    }
}
