use super::stash::stash_config_map;
use super::{ApplyAction, ApplyContext, MIGRATED_SUCCESSFULLY};
use crate::error::{MigrationError, Result};
use crate::hash::content_hash;
use chrono::{DateTime, Utc};
use portage_core::annotations::{ContentHash, MIGRATION_TIME, SKIP_MODIFY_RESOURCES};
use portage_core::resources::MigrationStatusType;
use portage_core::{ApiResource, ClusterApi, DynamicObject, PortageError};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Secrets the destination generates for every ServiceAccount itself
const GENERATED_SECRET_PREFIXES: [&str; 6] = [
    "builder-dockercfg-",
    "builder-token-",
    "default-dockercfg-",
    "default-token-",
    "deployer-dockercfg-",
    "deployer-token-",
];

/// Apply one prepared object and record its outcome in the ledger
///
/// Only an object without a name or kind is returned as an error, since
/// that points at a broken collector rather than a problem with the object.
pub async fn apply_object(ctx: Arc<ApplyContext>, object: DynamicObject) -> Result<()> {
    object.validate_meta()?;

    let hash = content_hash(&object);
    let mut desired = object.clone();
    ctx.annotate(&mut desired, hash);

    let stashed = ctx.is_stashed(&object.gvk());
    let (resource, target) = if stashed {
        match stash_config_map(&desired, hash) {
            Ok(cm) => (ApiResource::config_maps(), cm),
            Err(e) => {
                ctx.ledger.record(
                    &object,
                    MigrationStatusType::Failed,
                    format!("Error applying resource: {}", e),
                );
                ctx.record(ApplyAction::Failed);
                return Ok(());
            }
        }
    } else {
        (
            ApiResource::new(object.gvk(), !object.namespace().is_empty()),
            desired,
        )
    };

    let outcome = apply_with_retry(&ctx, &resource, &target, hash, stashed).await;
    match outcome {
        Ok(action) => {
            debug!(
                "{:?} {} {}/{}",
                action,
                object.kind(),
                object.namespace(),
                object.name()
            );
            ctx.ledger
                .record(&object, MigrationStatusType::Successful, MIGRATED_SUCCESSFULLY);
            ctx.record(action);
        }
        Err(e) => {
            warn!(
                "Error applying {} {}/{}: {}",
                object.kind(),
                object.namespace(),
                object.name(),
                e
            );
            ctx.ledger.record(
                &object,
                MigrationStatusType::Failed,
                format!("Error applying resource: {}", e),
            );
            ctx.record(ApplyAction::Failed);
        }
    }
    Ok(())
}

async fn apply_with_retry(
    ctx: &ApplyContext,
    resource: &ApiResource,
    target: &DynamicObject,
    hash: ContentHash,
    stashed: bool,
) -> Result<ApplyAction> {
    let client = ctx.remote.client_for(resource);
    let mut attempt = 0;
    loop {
        match create_or_resolve(ctx, client, resource, target, hash, stashed).await {
            Err(MigrationError::CoreError(e))
                if e.is_unauthorized() && attempt < ctx.retry.unauthorized_retries =>
            {
                attempt += 1;
                debug!(
                    "Unauthorized applying {}, retry {}/{}",
                    target.name(),
                    attempt,
                    ctx.retry.unauthorized_retries
                );
                tokio::time::sleep(ctx.retry.apply_retry_interval).await;
            }
            other => return other,
        }
    }
}

async fn create_or_resolve(
    ctx: &ApplyContext,
    client: &dyn ClusterApi,
    resource: &ApiResource,
    target: &DynamicObject,
    hash: ContentHash,
    stashed: bool,
) -> Result<ApplyAction> {
    let conflict = match client.create(resource, target).await {
        Ok(_) => return Ok(ApplyAction::Created),
        Err(e) if e.is_already_exists() || e.is_port_allocated() => e,
        Err(e) => return Err(e.into()),
    };
    debug!("Resolving conflict for {}: {}", target.name(), conflict);

    if target.kind() == "ServiceAccount" {
        return merge_service_account(client, resource, target).await;
    }
    if target.kind() == "Service"
        && !stashed
        && service_unchanged(ctx, client, resource, target, hash).await
    {
        return Ok(ApplyAction::Unchanged);
    }

    let existing = client
        .get(resource, Some(target.namespace()), target.name())
        .await?;
    if ContentHash::read(&existing.annotations()) == Some(hash) {
        Ok(ApplyAction::Unchanged)
    } else {
        recreate(ctx, client, resource, target).await
    }
}

/// Fast path for Services that are neither transformed nor marked for
/// modification
///
/// Anything else still goes through the hash comparison, so a Service keeps
/// its cluster IP and node ports whenever its content is unchanged.
async fn service_unchanged(
    ctx: &ApplyContext,
    client: &dyn ClusterApi,
    resource: &ApiResource,
    target: &DynamicObject,
    hash: ContentHash,
) -> bool {
    if ctx.has_transform || target.annotation(SKIP_MODIFY_RESOURCES).is_some() {
        return false;
    }
    match client
        .get(resource, Some(target.namespace()), target.name())
        .await
    {
        Ok(existing) => ContentHash::read(&existing.annotations()) == Some(hash),
        Err(_) => false,
    }
}

/// Delete the existing object, wait for it to go away and create it again
async fn recreate(
    ctx: &ApplyContext,
    client: &dyn ClusterApi,
    resource: &ApiResource,
    target: &DynamicObject,
) -> Result<ApplyAction> {
    let (namespace, name) = (target.namespace(), target.name());
    let delete_start = Utc::now();
    match client.delete(resource, Some(namespace), name).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }
    wait_deleted(ctx, client, resource, namespace, name, delete_start).await?;

    client.create(resource, target).await?;
    info!("Recreated {} {}/{}", target.kind(), namespace, name);
    Ok(ApplyAction::Recreated)
}

/// Poll until a deleted object is gone
///
/// Finalizers left on the object are cleared on every poll so the delete
/// cannot hang on a controller that does not run on the destination. An
/// object created after `delete_start` belongs to someone else and ends the
/// wait.
pub(super) async fn wait_deleted(
    ctx: &ApplyContext,
    client: &dyn ClusterApi,
    resource: &ApiResource,
    namespace: &str,
    name: &str,
    delete_start: DateTime<Utc>,
) -> Result<()> {
    for _ in 0..ctx.retry.delete_polls {
        let mut existing = match client.get(resource, Some(namespace), name).await {
            Ok(existing) => existing,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if created_after(&existing, delete_start) {
            warn!(
                "{} {}/{} was recreated while waiting for its deletion",
                resource.gvk.kind, namespace, name
            );
            return Ok(());
        }
        if !existing.finalizers().is_empty() {
            existing.set_finalizers(Vec::new());
            if let Err(e) = client.update(resource, &existing).await {
                warn!("Unable to clear finalizers of {}/{}: {}", namespace, name, e);
            }
        }
        tokio::time::sleep(ctx.retry.delete_poll_interval).await;
    }
    Ok(())
}

fn created_after(object: &DynamicObject, instant: DateTime<Utc>) -> bool {
    object
        .creation_timestamp()
        .map(|created| created > instant)
        .unwrap_or(false)
}

/// Fold the migrated ServiceAccount into the one already on the destination
///
/// Token secrets generated by the destination are kept and never copied over.
async fn merge_service_account(
    client: &dyn ClusterApi,
    resource: &ApiResource,
    target: &DynamicObject,
) -> Result<ApplyAction> {
    let existing = client
        .get(resource, Some(target.namespace()), target.name())
        .await?;
    let mut merged = existing.clone();

    for field in ["secrets", "imagePullSecrets"] {
        let Some(Value::Array(incoming)) = target.get_path(&[field]) else {
            continue;
        };
        let mut refs = match existing.get_path(&[field]) {
            Some(Value::Array(current)) => current.clone(),
            _ => Vec::new(),
        };
        for secret in incoming {
            let Some(name) = secret.get("name").and_then(Value::as_str) else {
                continue;
            };
            if GENERATED_SECRET_PREFIXES.iter().any(|p| name.starts_with(p)) {
                continue;
            }
            if !refs
                .iter()
                .any(|r| r.get("name").and_then(Value::as_str) == Some(name))
            {
                refs.push(secret.clone());
            }
        }
        merged.set_path(&[field], Value::Array(refs))?;
    }

    if let Some(automount) = target.get_path(&["automountServiceAccountToken"]) {
        merged.set_path(&["automountServiceAccountToken"], automount.clone())?;
    }
    let mut annotations = merged.annotations();
    annotations.extend(target.annotations());
    merged.set_annotations(annotations);

    if without_migration_time(&merged) == without_migration_time(&existing) {
        return Ok(ApplyAction::Unchanged);
    }
    client.update(resource, &merged).await.map_err(|e: PortageError| {
        MigrationError::apply_failed(target.resource_key().to_string(), e.to_string())
    })?;
    Ok(ApplyAction::Merged)
}

fn without_migration_time(object: &DynamicObject) -> DynamicObject {
    let mut stripped = object.clone();
    let mut annotations = stripped.annotations();
    if annotations.remove(MIGRATION_TIME).is_some() {
        stripped.set_annotations(annotations);
    }
    stripped
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context;
    use super::*;
    use portage_core::annotations::{MIGRATED, RESOURCE_HASH, STASH_CR_LABEL};
    use portage_core::{InjectedError, MockCluster, MockOp};
    use serde_json::json;

    fn config_map(data: &str) -> DynamicObject {
        DynamicObject::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings", "namespace": "app1"},
            "data": {"mode": data}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_changed_object_recreated_past_finalizers() {
        let dest = Arc::new(MockCluster::new());
        let mut stale = config_map("slow");
        stale.set_finalizers(vec!["example.com/protect".to_string()]);
        dest.insert(&ApiResource::config_maps(), stale).await;

        let object = config_map("fast");
        let (ctx, _) = context(dest.clone(), &[object.clone()]);
        apply_object(ctx.clone(), object.clone()).await.unwrap();

        let stored = dest.object(&ApiResource::config_maps(), "app1", "settings").await.unwrap();
        assert_eq!(stored.get_path(&["data", "mode"]), Some(&json!("fast")));
        assert!(stored.finalizers().is_empty());
        assert_eq!(
            stored.annotation(RESOURCE_HASH),
            Some(content_hash(&object).to_string().as_str())
        );
        assert_eq!(ctx.report().recreated, 1);
        assert!(ctx.ledger.all_successful());
    }

    #[tokio::test]
    async fn test_unauthorized_retried() {
        let dest = Arc::new(MockCluster::new());
        dest.fail_next(MockOp::Create, "ConfigMap", 2, InjectedError::Unauthorized);
        let object = config_map("fast");
        let (ctx, _) = context(dest.clone(), &[object.clone()]);

        apply_object(ctx.clone(), object).await.unwrap();
        assert_eq!(ctx.report().created, 1);
        assert_eq!(dest.writes_for("ConfigMap").creates, 1);
    }

    #[tokio::test]
    async fn test_failure_recorded_not_returned() {
        let dest = Arc::new(MockCluster::new());
        dest.fail_next(
            MockOp::Create,
            "ConfigMap",
            1,
            InjectedError::Internal("admission webhook denied".to_string()),
        );
        let object = config_map("fast");
        let (ctx, recorder) = context(dest.clone(), &[object.clone()]);

        apply_object(ctx.clone(), object).await.unwrap();
        let entry = &ctx.ledger.entries()[0];
        assert_eq!(entry.status, MigrationStatusType::Failed);
        assert!(entry.reason.contains("admission webhook denied"));
        assert_eq!(recorder.warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_service_account_merged() {
        let dest = Arc::new(MockCluster::new());
        dest.insert(
            &ApiResource::service_accounts(),
            DynamicObject::from_value(json!({
                "apiVersion": "v1",
                "kind": "ServiceAccount",
                "metadata": {"name": "builder", "namespace": "app1"},
                "secrets": [{"name": "builder-token-dst"}]
            }))
            .unwrap(),
        )
        .await;

        let object = DynamicObject::from_value(json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": {"name": "builder", "namespace": "app1", "annotations": {"team": "a"}},
            "secrets": [{"name": "builder-token-src"}, {"name": "registry-creds"}],
            "imagePullSecrets": [{"name": "registry-creds"}]
        }))
        .unwrap();
        let (ctx, _) = context(dest.clone(), &[object.clone()]);
        apply_object(ctx.clone(), object.clone()).await.unwrap();

        let stored = dest
            .object(&ApiResource::service_accounts(), "app1", "builder")
            .await
            .unwrap();
        assert_eq!(
            stored.get_path(&["secrets"]),
            Some(&json!([{"name": "builder-token-dst"}, {"name": "registry-creds"}]))
        );
        assert_eq!(stored.get_path(&["imagePullSecrets"]), Some(&json!([{"name": "registry-creds"}])));
        assert_eq!(stored.annotation("team"), Some("a"));
        assert_eq!(stored.annotation(MIGRATED), Some("true"));
        assert_eq!(ctx.report().merged, 1);

        // Merging the same account again changes nothing
        dest.reset_write_counts();
        apply_object(ctx.clone(), object).await.unwrap();
        assert_eq!(dest.total_writes(), 0);
    }

    fn service(port: u16) -> DynamicObject {
        DynamicObject::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "web", "namespace": "app1"},
            "spec": {"ports": [{"port": port}]}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_service_with_skip_annotation_kept_when_unchanged() {
        let dest = Arc::new(MockCluster::new());
        let mut object = service(80);
        object.set_annotations([(SKIP_MODIFY_RESOURCES.to_string(), "true".to_string())].into());
        let (ctx, _) = context(dest.clone(), &[object.clone()]);

        apply_object(ctx.clone(), object.clone()).await.unwrap();
        apply_object(ctx.clone(), object).await.unwrap();
        assert_eq!(ctx.report().created, 1);
        assert_eq!(ctx.report().unchanged, 1);
        assert_eq!(ctx.report().recreated, 0);
    }

    #[tokio::test]
    async fn test_transformed_service_rerun_keeps_destination() {
        let dest = Arc::new(MockCluster::new());
        let object = service(80);
        let (ctx, _) = context(dest.clone(), &[object.clone()]);
        let ctx = Arc::new(Arc::try_unwrap(ctx).ok().unwrap().with_transform(true));

        apply_object(ctx.clone(), object.clone()).await.unwrap();
        dest.reset_write_counts();
        apply_object(ctx.clone(), object).await.unwrap();
        assert_eq!(dest.total_writes(), 0);
        assert_eq!(ctx.report().recreated, 0);
        assert_eq!(ctx.report().unchanged, 1);

        // A real content change still replaces the Service
        apply_object(ctx.clone(), service(8080)).await.unwrap();
        assert_eq!(ctx.report().recreated, 1);
        let stored = dest.object(&ApiResource::services(), "app1", "web").await.unwrap();
        assert_eq!(stored.get_path(&["spec", "ports"]), Some(&json!([{"port": 8080}])));
    }

    #[tokio::test]
    async fn test_stashed_kind_applied_as_config_map() {
        let dest = Arc::new(MockCluster::new());
        let object = DynamicObject::from_value(json!({
            "apiVersion": "couchbase.com/v2",
            "kind": "CouchbaseBucket",
            "metadata": {"name": "orders", "namespace": "app1"},
            "spec": {"paused": true}
        }))
        .unwrap();
        let (ctx, _) = context(dest.clone(), &[object.clone()]);
        let ctx = Arc::new(
            Arc::try_unwrap(ctx)
                .ok()
                .unwrap()
                .with_stashed_kinds([object.gvk()]),
        );

        apply_object(ctx.clone(), object.clone()).await.unwrap();
        let cm = dest
            .object(&ApiResource::config_maps(), "app1", "orders-couchbasebucket-couchbase.com")
            .await
            .unwrap();
        assert_eq!(cm.labels().get(STASH_CR_LABEL).map(String::as_str), Some("true"));
        assert!(ctx.ledger.all_successful());

        // The wrapper carries the object's hash, so a second pass is a no-op
        dest.reset_write_counts();
        apply_object(ctx.clone(), object).await.unwrap();
        assert_eq!(dest.total_writes(), 0);
        assert_eq!(ctx.report().unchanged, 1);
    }
}
