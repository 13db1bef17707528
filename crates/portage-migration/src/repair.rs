//! Post-apply repair of volume references
//!
//! Claims migrated with owner references still point at the UIDs of their
//! owners on the source, and volumes may name a storage class that does not
//! exist on the destination. Both are fixed once everything is applied.

use crate::apply::stash::{record_owned_pvc, stash_config_map_name};
use crate::config::RetryPolicy;
use crate::error::{MigrationError, Result};
use crate::remote::RemoteClient;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use portage_core::annotations::CURRENT_STORAGE_CLASS;
use portage_core::resources::Resource;
use portage_core::{ApiResource, ClusterApi, DynamicObject, GroupVersionKind, OwnerReference};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// Point claim owner references at the owners' destination UIDs
///
/// Owners are looked up by name and kind among the applied objects. An owner
/// applied wrapped in a ConfigMap does not exist live, so the reference is
/// recorded in the ConfigMap instead. References to owners that were not
/// migrated are dropped.
pub async fn repair_owner_references(
    remote: &RemoteClient,
    pvcs: &[PersistentVolumeClaim],
    applied: &[DynamicObject],
    stashed: &HashSet<GroupVersionKind>,
) -> Result<()> {
    let client = remote.client_for(&PersistentVolumeClaim::api_resource());
    for pvc in pvcs {
        let (namespace, name) = (pvc.namespace(), pvc.name());
        let mut owners = Vec::new();
        for reference in pvc.metadata.owner_references.iter().flatten() {
            let Some(owner) = applied.iter().find(|o| {
                o.name() == reference.name && o.kind() == reference.kind && o.namespace() == namespace
            }) else {
                debug!(
                    "Owner {} {} of PVC {}/{} was not migrated",
                    reference.kind, reference.name, namespace, name
                );
                continue;
            };

            let gvk = owner.gvk();
            if stashed.contains(&gvk) {
                let config_map = stash_config_map_name(&gvk.kind, &gvk.group, owner.name());
                record_owned_pvc(client, namespace, &config_map, name, reference).await?;
                continue;
            }

            let resource = ApiResource::new(gvk, true);
            let live = remote
                .client_for(&resource)
                .get(&resource, Some(namespace), owner.name())
                .await?;
            let Some(uid) = live.uid() else {
                return Err(MigrationError::internal_error(format!(
                    "{} {}/{} has no uid on the destination",
                    reference.kind, namespace, reference.name
                )));
            };
            owners.push(OwnerReference {
                uid: uid.to_string(),
                ..reference.clone()
            });
        }

        let mut dest = client
            .get_typed::<PersistentVolumeClaim>(Some(namespace), name)
            .await?;
        let current = dest.metadata.owner_references.clone().unwrap_or_default();
        if current == owners {
            continue;
        }
        dest.metadata.owner_references = Some(owners);
        client.update_typed(&dest).await?;
        info!("Updated owner references of PVC {}/{}", namespace, name);
    }
    Ok(())
}

/// Make sure every migrated volume's original storage class exists on the
/// destination and is set on the volume
pub async fn repair_storage_classes(
    source: &dyn ClusterApi,
    remote: &RemoteClient,
    pvs: &[DynamicObject],
    retry: &RetryPolicy,
) -> Result<()> {
    let admin = remote.admin();
    let mut existing: BTreeSet<String> = admin
        .list_typed::<StorageClass>(None, None)
        .await?
        .iter()
        .map(|sc| sc.name().to_string())
        .collect();

    for pv in pvs {
        let Some(class) = pv.annotation(CURRENT_STORAGE_CLASS).filter(|c| !c.is_empty()) else {
            continue;
        };
        if !existing.contains(class) {
            create_storage_class(source, admin, class, retry).await?;
            existing.insert(class.to_string());
        }

        let mut dest = admin.get_typed::<PersistentVolume>(None, pv.name()).await?;
        let spec = dest.spec.get_or_insert_with(Default::default);
        if spec.storage_class_name.as_deref() == Some(class) {
            continue;
        }
        spec.storage_class_name = Some(class.to_string());
        admin.update_typed(&dest).await?;
        debug!("Set storage class {} on volume {}", class, pv.name());
    }
    Ok(())
}

async fn create_storage_class(
    source: &dyn ClusterApi,
    dest: &dyn ClusterApi,
    name: &str,
    retry: &RetryPolicy,
) -> Result<()> {
    let mut class = source.get_typed::<StorageClass>(None, name).await?;
    let meta = &mut class.metadata;
    meta.uid = None;
    meta.resource_version = None;
    meta.creation_timestamp = None;
    meta.managed_fields = None;

    let mut attempt = 0;
    loop {
        match dest.create_typed(&class).await {
            Ok(_) => {
                info!("Created storage class {} on destination", name);
                return Ok(());
            }
            Err(e) if e.is_already_exists() => return Ok(()),
            Err(e) if attempt + 1 < retry.apply_retries => {
                attempt += 1;
                warn!("Unable to create storage class {} (attempt {}): {}", name, attempt, e);
                tokio::time::sleep(retry.apply_retry_interval).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
