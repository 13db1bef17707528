//! PersistentVolume and claim sequence
//!
//! Volumes are applied before anything that could mount them, in an order
//! that never leaves a destination volume with a reclaim policy able to
//! delete its data: create the PV pinned to Retain, create the claim, point
//! the PV's claimRef at the new claim, wait for the claim to bind, and only
//! then restore the original reclaim policy.

use super::objects::wait_deleted;
use super::{ApplyAction, ApplyContext, MIGRATED_SUCCESSFULLY};
use crate::error::{MigrationError, Result};
use crate::hash::content_hash;
use crate::traits::ResourceCollector;
use chrono::Utc;
use portage_core::annotations::{ContentHash, ReclaimStash};
use portage_core::resources::MigrationStatusType;
use portage_core::{ApiResource, ClusterApi, DynamicObject};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

const RETAIN: &str = "Retain";

/// Claim a destination volume must be bound to
#[derive(Debug, Clone)]
struct ClaimTarget {
    namespace: String,
    name: String,
    uid: Option<String>,
}

fn str_at<'a>(object: &'a DynamicObject, path: &[&str]) -> Option<&'a str> {
    object.get_path(path).and_then(Value::as_str)
}

fn claim_of(pv: &DynamicObject) -> Option<(String, String)> {
    Some((
        str_at(pv, &["spec", "claimRef", "namespace"])?.to_string(),
        str_at(pv, &["spec", "claimRef", "name"])?.to_string(),
    ))
}

/// Apply volumes and claims
///
/// Claim failures are recorded per object. A volume that cannot be created
/// or patched is returned as an error, since every later step assumes the
/// destination volume exists and is pinned to Retain.
pub async fn apply_volumes(
    ctx: &ApplyContext,
    collector: &dyn ResourceCollector,
    pvs: &[DynamicObject],
    pvcs: &[DynamicObject],
    include_volumes: bool,
) -> Result<()> {
    if pvs.is_empty() && pvcs.is_empty() {
        return Ok(());
    }
    delete_drifted(ctx, collector, pvs, pvcs).await?;

    let unchanged = unchanged_claims(ctx, pvcs).await;
    for pv in pvs {
        apply_volume(ctx, pv, &unchanged).await?;
    }

    let mut claims: HashMap<String, ClaimTarget> = HashMap::new();
    for pvc in pvcs {
        apply_claim(ctx, pvc, &unchanged, &mut claims).await;
    }

    for pv in pvs {
        if let Err(e) = restore_volume(ctx, pv, claims.get(pv.name()), include_volumes).await {
            warn!("Unable to finish volume {}: {}", pv.name(), e);
            ctx.ledger.record(
                pv,
                MigrationStatusType::Failed,
                format!("Error applying resource: {}", e),
            );
        }
    }
    Ok(())
}

/// Remove CSI volumes whose handle no longer matches what the source expects
///
/// The handle is rewritten to the PV name during preparation. A destination
/// volume with any other handle was provisioned by an earlier run against a
/// different source volume, so the volume and its claim are deleted and
/// created again.
async fn delete_drifted(
    ctx: &ApplyContext,
    collector: &dyn ResourceCollector,
    pvs: &[DynamicObject],
    pvcs: &[DynamicObject],
) -> Result<()> {
    let admin = ctx.remote.admin();
    let mut stale = Vec::new();
    for pv in pvs.iter().filter(|pv| pv.get_path(&["spec", "csi"]).is_some()) {
        let existing = match admin
            .get(&ApiResource::persistent_volumes(), None, pv.name())
            .await
        {
            Ok(existing) => existing,
            Err(e) => {
                if !e.is_not_found() {
                    warn!("Unable to read destination volume {}: {}", pv.name(), e);
                }
                continue;
            }
        };
        let handle = str_at(&existing, &["spec", "csi", "volumeHandle"]);
        if handle.map(|h| h == pv.name()).unwrap_or(true) {
            continue;
        }
        info!(
            "Volume {} has handle {:?} on the destination, recreating it",
            pv.name(),
            handle
        );
        if let Some(pvc) = pvcs
            .iter()
            .find(|pvc| str_at(pvc, &["spec", "volumeName"]) == Some(pv.name()))
        {
            stale.push(pvc.clone());
        }
        stale.push(pv.clone());
    }

    if !stale.is_empty() {
        collector.delete_resources(admin, &stale).await?;
    }
    Ok(())
}

/// Claims whose destination copy already carries the source hash, with their
/// destination UID
async fn unchanged_claims(
    ctx: &ApplyContext,
    pvcs: &[DynamicObject],
) -> HashMap<(String, String), String> {
    let resource = ApiResource::persistent_volume_claims();
    let client = ctx.remote.client_for(&resource);
    let mut unchanged = HashMap::new();
    for pvc in pvcs {
        let Ok(existing) = client.get(&resource, Some(pvc.namespace()), pvc.name()).await else {
            continue;
        };
        if ContentHash::read(&existing.annotations()) != Some(content_hash(pvc)) {
            continue;
        }
        if let Some(uid) = existing.uid() {
            unchanged.insert(
                (pvc.namespace().to_string(), pvc.name().to_string()),
                uid.to_string(),
            );
        }
    }
    unchanged
}

fn for_destination(ctx: &ApplyContext, object: &DynamicObject) -> DynamicObject {
    let mut desired = object.clone();
    ctx.annotate(&mut desired, content_hash(object));
    desired.remove_path(&["status"]);
    desired
}

async fn apply_volume(
    ctx: &ApplyContext,
    pv: &DynamicObject,
    unchanged: &HashMap<(String, String), String>,
) -> Result<()> {
    let resource = ApiResource::persistent_volumes();
    let admin = ctx.remote.admin();
    let mut desired = for_destination(ctx, pv);
    desired.set_path(
        &["spec", "persistentVolumeReclaimPolicy"],
        Value::String(RETAIN.to_string()),
    )?;

    let outcome = match admin.create(&resource, &desired).await {
        Ok(_) => Ok(ApplyAction::Created),
        Err(e) if e.is_already_exists() => patch_volume(admin, &resource, pv, &desired, unchanged).await,
        Err(e) => Err(e.into()),
    };
    match outcome {
        Ok(action) => {
            debug!("{:?} volume {}", action, pv.name());
            ctx.record(action);
            Ok(())
        }
        Err(e) => {
            ctx.ledger.record(
                pv,
                MigrationStatusType::Failed,
                format!("Error applying resource: {}", e),
            );
            ctx.record(ApplyAction::Failed);
            Err(MigrationError::apply_failed(
                pv.resource_key().to_string(),
                e.to_string(),
            ))
        }
    }
}

/// Update annotations and the reclaim policy of an existing volume
///
/// Skipped when the volume already carries the source hash and its claim is
/// unchanged too.
async fn patch_volume(
    admin: &dyn ClusterApi,
    resource: &ApiResource,
    pv: &DynamicObject,
    desired: &DynamicObject,
    unchanged: &HashMap<(String, String), String>,
) -> Result<ApplyAction> {
    let mut existing = admin.get(resource, None, pv.name()).await?;
    let same_hash = ContentHash::read(&existing.annotations()) == ContentHash::read(&desired.annotations());
    let claim_unchanged = claim_of(pv)
        .map(|claim| unchanged.contains_key(&claim))
        .unwrap_or(true);
    if same_hash && claim_unchanged {
        return Ok(ApplyAction::Unchanged);
    }

    existing.set_annotations(desired.annotations());
    existing.set_path(
        &["spec", "persistentVolumeReclaimPolicy"],
        Value::String(RETAIN.to_string()),
    )?;
    existing.set_resource_version(None);
    admin.update(resource, &existing).await?;
    Ok(ApplyAction::Merged)
}

/// Create the claim unless its destination copy is unchanged
///
/// Records the claim each volume must point at in `claims`.
async fn apply_claim(
    ctx: &ApplyContext,
    pvc: &DynamicObject,
    unchanged: &HashMap<(String, String), String>,
    claims: &mut HashMap<String, ClaimTarget>,
) {
    let volume = str_at(pvc, &["spec", "volumeName"]).map(str::to_string);
    let key = (pvc.namespace().to_string(), pvc.name().to_string());

    if let Some(uid) = unchanged.get(&key) {
        if let Some(volume) = volume {
            claims.insert(
                volume,
                ClaimTarget {
                    namespace: key.0,
                    name: key.1,
                    uid: Some(uid.clone()),
                },
            );
        }
        ctx.ledger
            .record(pvc, MigrationStatusType::Successful, MIGRATED_SUCCESSFULLY);
        ctx.record(ApplyAction::Unchanged);
        return;
    }

    match recreate_claim(ctx, pvc).await {
        Ok((action, uid)) => {
            if let Some(volume) = volume {
                claims.insert(
                    volume,
                    ClaimTarget {
                        namespace: key.0,
                        name: key.1,
                        uid,
                    },
                );
            }
            ctx.ledger
                .record(pvc, MigrationStatusType::Successful, MIGRATED_SUCCESSFULLY);
            ctx.record(action);
        }
        Err(e) => {
            warn!("Error applying claim {}/{}: {}", key.0, key.1, e);
            ctx.ledger.record(
                pvc,
                MigrationStatusType::Failed,
                format!("Error applying resource: {}", e),
            );
            ctx.record(ApplyAction::Failed);
        }
    }
}

async fn recreate_claim(
    ctx: &ApplyContext,
    pvc: &DynamicObject,
) -> Result<(ApplyAction, Option<String>)> {
    let resource = ApiResource::persistent_volume_claims();
    let client = ctx.remote.client_for(&resource);
    let (namespace, name) = (pvc.namespace(), pvc.name());

    let delete_start = Utc::now();
    let action = match client.delete(&resource, Some(namespace), name).await {
        Ok(()) => ApplyAction::Recreated,
        Err(e) if e.is_not_found() => ApplyAction::Created,
        Err(e) => return Err(e.into()),
    };
    if action == ApplyAction::Recreated {
        wait_deleted(ctx, client, &resource, namespace, name, delete_start).await?;
    }

    let created = client.create(&resource, &for_destination(ctx, pvc)).await?;
    Ok((action, created.uid().map(str::to_string)))
}

/// Point the volume at its new claim and restore its reclaim policy
async fn restore_volume(
    ctx: &ApplyContext,
    pv: &DynamicObject,
    claim: Option<&ClaimTarget>,
    include_volumes: bool,
) -> Result<()> {
    let resource = ApiResource::persistent_volumes();
    let admin = ctx.remote.admin();
    let mut existing = admin.get(&resource, None, pv.name()).await?;

    if let Some(claim) = claim {
        let bound_uid = str_at(&existing, &["spec", "claimRef", "uid"]);
        if claim.uid.is_some() && bound_uid != claim.uid.as_deref() {
            let mut claim_ref = existing
                .get_path(&["spec", "claimRef"])
                .cloned()
                .unwrap_or_else(|| json!({"kind": "PersistentVolumeClaim", "apiVersion": "v1"}));
            claim_ref["namespace"] = Value::String(claim.namespace.clone());
            claim_ref["name"] = Value::String(claim.name.clone());
            claim_ref["uid"] = json!(claim.uid);
            if let Some(fields) = claim_ref.as_object_mut() {
                fields.remove("resourceVersion");
            }
            existing.set_path(&["spec", "claimRef"], claim_ref)?;
            existing = admin.update(&resource, &existing).await?;
            debug!(
                "Bound volume {} to claim {}/{}",
                pv.name(),
                claim.namespace,
                claim.name
            );
            wait_bound(ctx, claim).await?;
        }
    }

    let current = str_at(&existing, &["spec", "persistentVolumeReclaimPolicy"])
        .unwrap_or_default()
        .to_string();
    let desired = if include_volumes {
        ReclaimStash::read(&pv.annotations())
            .map(|stash| stash.0)
            .unwrap_or_else(|| current.clone())
    } else {
        RETAIN.to_string()
    };
    if desired != current {
        existing.set_path(
            &["spec", "persistentVolumeReclaimPolicy"],
            Value::String(desired.clone()),
        )?;
        admin.update(&resource, &existing).await?;
        debug!("Restored reclaim policy {} on volume {}", desired, pv.name());
    }

    ctx.ledger
        .record(pv, MigrationStatusType::Successful, MIGRATED_SUCCESSFULLY);
    Ok(())
}

async fn wait_bound(ctx: &ApplyContext, claim: &ClaimTarget) -> Result<()> {
    let resource = ApiResource::persistent_volume_claims();
    let client = ctx.remote.client_for(&resource);
    for _ in 0..ctx.retry.bound_polls {
        let pvc = client
            .get(&resource, Some(&claim.namespace), &claim.name)
            .await?;
        if str_at(&pvc, &["status", "phase"]) == Some("Bound") {
            return Ok(());
        }
        tokio::time::sleep(ctx.retry.bound_poll_interval).await;
    }
    Err(MigrationError::internal_error(format!(
        "claim {}/{} did not bind",
        claim.namespace, claim.name
    )))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context;
    use super::*;
    use crate::mock::MockResourceCollector;
    use portage_core::annotations::{RECLAIM_POLICY, RESOURCE_HASH};
    use portage_core::{InjectedError, MockCluster, MockOp};
    use std::sync::Arc;

    fn volume(handle: &str) -> DynamicObject {
        let mut pv = DynamicObject::from_value(json!({
            "apiVersion": "v1",
            "kind": "PersistentVolume",
            "metadata": {"name": "pv-1"},
            "spec": {
                "persistentVolumeReclaimPolicy": "Retain",
                "csi": {"driver": "pxd.portworx.com", "volumeHandle": handle},
                "claimRef": {"kind": "PersistentVolumeClaim", "namespace": "app1", "name": "data", "uid": "src-uid"}
            }
        }))
        .unwrap();
        pv.set_annotations([(RECLAIM_POLICY.to_string(), "Delete".to_string())].into());
        pv
    }

    fn claim() -> DynamicObject {
        DynamicObject::from_value(json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {"name": "data", "namespace": "app1", "uid": "src-uid"},
            "spec": {"volumeName": "pv-1", "resources": {"requests": {"storage": "1Gi"}}},
            "status": {"phase": "Bound"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_volume_sequence_and_rerun() {
        let dest = Arc::new(MockCluster::new());
        let (pv, pvc) = (volume("pv-1"), claim());
        let (ctx, _) = context(dest.clone(), &[pv.clone(), pvc.clone()]);
        let collector = MockResourceCollector::with_default_types();

        apply_volumes(&ctx, &collector, &[pv.clone()], &[pvc.clone()], true)
            .await
            .unwrap();

        let dest_pvc = dest
            .object(&ApiResource::persistent_volume_claims(), "app1", "data")
            .await
            .unwrap();
        let dest_pv = dest.object(&ApiResource::persistent_volumes(), "", "pv-1").await.unwrap();
        assert_eq!(str_at(&dest_pv, &["spec", "claimRef", "uid"]), dest_pvc.uid());
        assert_eq!(
            str_at(&dest_pv, &["spec", "persistentVolumeReclaimPolicy"]),
            Some("Delete")
        );
        assert!(dest_pvc.annotation(RESOURCE_HASH).is_some());
        assert!(ctx.ledger.all_successful());

        dest.reset_write_counts();
        apply_volumes(&ctx, &collector, &[pv], &[pvc], true).await.unwrap();
        assert_eq!(dest.total_writes(), 0);
        assert!(collector.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_volumes_kept_retained_without_volume_migration() {
        let dest = Arc::new(MockCluster::new());
        let (pv, pvc) = (volume("pv-1"), claim());
        let (ctx, _) = context(dest.clone(), &[pv.clone(), pvc.clone()]);
        let collector = MockResourceCollector::with_default_types();

        apply_volumes(&ctx, &collector, &[pv], &[pvc], false).await.unwrap();
        let dest_pv = dest.object(&ApiResource::persistent_volumes(), "", "pv-1").await.unwrap();
        assert_eq!(
            str_at(&dest_pv, &["spec", "persistentVolumeReclaimPolicy"]),
            Some(RETAIN)
        );
    }

    #[tokio::test]
    async fn test_unbound_claim_leaves_volume_retained() {
        let dest = Arc::new(MockCluster::new().without_claim_binding());
        let (pv, pvc) = (volume("pv-1"), claim());
        let (ctx, _) = context(dest.clone(), &[pv.clone(), pvc.clone()]);
        let collector = MockResourceCollector::with_default_types();

        apply_volumes(&ctx, &collector, &[pv], &[pvc], true).await.unwrap();

        let dest_pv = dest.object(&ApiResource::persistent_volumes(), "", "pv-1").await.unwrap();
        assert_eq!(
            str_at(&dest_pv, &["spec", "persistentVolumeReclaimPolicy"]),
            Some(RETAIN)
        );
        let entries = ctx.ledger.entries();
        assert_eq!(entries[0].status, MigrationStatusType::Failed);
        assert_eq!(entries[1].status, MigrationStatusType::Successful);
    }

    #[tokio::test]
    async fn test_drifted_csi_volume_replaced() {
        let dest = Arc::new(MockCluster::new());
        dest.insert(&ApiResource::persistent_volumes(), volume("vol-old")).await;
        dest.insert(&ApiResource::persistent_volume_claims(), claim()).await;

        let (pv, pvc) = (volume("pv-1"), claim());
        let (ctx, _) = context(dest.clone(), &[pv.clone(), pvc.clone()]);
        let collector = MockResourceCollector::with_default_types();

        apply_volumes(&ctx, &collector, &[pv], &[pvc], true).await.unwrap();
        assert_eq!(collector.deleted().len(), 2);

        let dest_pv = dest.object(&ApiResource::persistent_volumes(), "", "pv-1").await.unwrap();
        assert_eq!(str_at(&dest_pv, &["spec", "csi", "volumeHandle"]), Some("pv-1"));
        assert!(ctx.ledger.all_successful());
    }

    #[tokio::test]
    async fn test_volume_create_failure_stops_sequence() {
        let dest = Arc::new(MockCluster::new());
        dest.fail_next(
            MockOp::Create,
            "PersistentVolume",
            1,
            InjectedError::Internal("quota exceeded".to_string()),
        );
        let (pv, pvc) = (volume("pv-1"), claim());
        let (ctx, _) = context(dest.clone(), &[pv.clone(), pvc.clone()]);
        let collector = MockResourceCollector::with_default_types();

        let err = apply_volumes(&ctx, &collector, &[pv], &[pvc], true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("pv-1"));
        assert_eq!(ctx.ledger.entries()[0].status, MigrationStatusType::Failed);
        assert_eq!(dest.writes_for("PersistentVolumeClaim").creates, 0);
    }
}
