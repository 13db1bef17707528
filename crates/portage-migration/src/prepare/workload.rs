use crate::error::{MigrationError, Result};
use crate::platform::remap_pod_spec;
use portage_core::annotations::{ReplicaStash, MIGRATED};
use portage_core::DynamicObject;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Scale a replicated workload down to zero, remembering its replica count
///
/// The stash is only carried forward when the live count is already zero, so
/// migrating an object that a previous run scaled down keeps the original
/// count instead of recording 0.
pub fn prepare_workload(
    object: &mut DynamicObject,
    start_applications: bool,
    project_mappings: &BTreeMap<String, String>,
) -> Result<()> {
    if !project_mappings.is_empty() {
        let parsed = match object.get_path_mut(&["spec", "template", "spec"]) {
            Some(pod_spec) if pod_spec.is_object() => {
                remap_pod_spec(pod_spec, project_mappings);
                true
            }
            Some(_) => false,
            None => true,
        };
        if !parsed {
            warn!(
                "Unable to parse pod spec of {} {}/{} while handling rancher project mappings",
                object.kind(),
                object.namespace(),
                object.name()
            );
        }
    }

    let mut replicas = match object.get_path(&["spec", "replicas"]) {
        None | Some(Value::Null) => 1,
        Some(value) => value.as_i64().ok_or_else(|| {
            MigrationError::invalid_migration(
                format!(
                    "spec.replicas of {} {}/{} is not an integer",
                    object.kind(),
                    object.namespace(),
                    object.name()
                ),
                "Fix the workload manifest on the source cluster",
            )
        })?,
    };

    let mut annotations = object.annotations();
    if replicas == 0 {
        if let Some(ReplicaStash(stashed)) = ReplicaStash::read(&annotations).filter(|s| s.0 > 0) {
            replicas = stashed;
            object.set_path(&["spec", "replicas"], Value::from(replicas))?;
        }
    }

    if start_applications {
        return Ok(());
    }

    object.set_path(&["spec", "replicas"], Value::from(0))?;

    let mut labels = object.labels();
    labels.insert(MIGRATED.to_string(), "true".to_string());
    object.set_labels(labels);

    ReplicaStash(replicas).write(&mut annotations);
    object.set_annotations(annotations);
    Ok(())
}

/// Suspend a CronJob so it does not fire on the destination
pub fn prepare_cron_job(object: &mut DynamicObject, start_applications: bool) -> Result<()> {
    if start_applications {
        return Ok(());
    }
    object.set_path(&["spec", "suspend"], Value::Bool(true))?;
    Ok(())
}
