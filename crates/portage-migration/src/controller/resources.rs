use super::MigrationController;
use crate::apply::{ApplyContext, ApplyEngine};
use crate::error::{MigrationError, Result};
use crate::ledger::ResourceLedger;
use crate::prepare::{ResourcePreparer, TransformSet};
use crate::remote::RemoteClient;
use crate::repair::{repair_owner_references, repair_storage_classes};
use crate::traits::{CollectRequest, CollectedResources, CollectorOptions};
use chrono::Utc;
use portage_core::annotations::{MigrationMarker, STASH_CR_LABEL};
use portage_core::resources::{
    ApplicationRegistration, ClusterPair, ClusterPairStatusType, Migration, MigrationResourceInfo,
    MigrationStage, MigrationStatusType,
};
use portage_core::{ApiResource, DynamicObject, EventType};
use std::sync::Arc;
use tracing::{error, info};

impl MigrationController {
    /// Collect, prepare and apply resources, then repair volume references
    ///
    /// In volumes-only mode just the PersistentVolumes and their claims are
    /// migrated.
    pub(super) async fn migrate_resources(
        &self,
        migration: &mut Migration,
        namespaces: &[String],
        volumes_only: bool,
    ) -> Result<()> {
        let pair = self.remotes.cluster_pair(migration).await?;
        ensure_scheduler_ready(&pair, "Cluster pair")?;
        if let Some(admin) = self.remotes.admin_cluster_pair(migration).await? {
            ensure_scheduler_ready(&admin, "Admin cluster pair")?;
        }
        let remote = Arc::new(self.remotes.build(migration).await?);

        let request = collect_request(migration, &pair, namespaces);
        let collected = self
            .collect(migration, &request, volumes_only)
            .await
            .map_err(|e| MigrationError::collection_failed(e.to_string()))?;
        let mut objects = collected.objects;
        if volumes_only {
            objects.retain(is_volume_object);
        }

        migration.status.resources = objects
            .iter()
            .map(|o| MigrationResourceInfo::for_object(o, MigrationStatusType::InProgress))
            .collect();
        self.persist(migration).await?;
        info!(
            "Collected {} resources for migration {}",
            objects.len(),
            migration.display_name()
        );

        let registrations = self
            .source
            .list_typed::<ApplicationRegistration>(None, None)
            .await?;
        let transforms = match migration.spec.transform_specs.as_slice() {
            [name] => TransformSet::load(self.source.as_ref(), name, namespaces).await?,
            _ => TransformSet::empty(),
        };
        let preparer = ResourcePreparer::new(self.driver.clone(), migration.spec.start_applications())
            .with_project_mappings(pair.project_mappings())
            .with_transforms(transforms)
            .with_registrations(&registrations);
        preparer.prepare_all(&mut objects).await?;

        let ledger = Arc::new(ResourceLedger::new(migration, self.recorder.clone()));
        let marker = MigrationMarker::new(
            migration.metadata.name.clone().unwrap_or_default(),
            migration.metadata.namespace.clone().unwrap_or_default(),
            Utc::now(),
        );
        let ctx = ApplyContext::new(remote.clone(), ledger.clone(), marker, self.config.retry.clone())
            .with_stashed_kinds(preparer.stashed_kinds())
            .with_transform(!migration.spec.transform_specs.is_empty());
        let ctx = Arc::new(ctx);

        let engine = ApplyEngine::new(
            self.source.as_ref(),
            self.collector.as_ref(),
            ctx.clone(),
            self.config.max_workers,
            migration.spec.include_volumes(),
        );
        let applied = engine.apply(namespaces, objects.clone(), &registrations).await;
        migration.status.resources = ledger.entries();
        if let Err(e) = applied {
            // A volume that could not be pinned leaves ownership on the
            // destination undefined
            if matches!(e, MigrationError::ApplyFailed { .. }) {
                migration.fail();
                self.persist(migration).await?;
            }
            return Err(e);
        }

        repair_owner_references(&remote, &collected.pvcs_with_owner_refs, &objects, &ctx.stashed).await?;
        let volumes: Vec<DynamicObject> = objects
            .iter()
            .filter(|o| o.kind() == "PersistentVolume")
            .cloned()
            .collect();
        repair_storage_classes(self.source.as_ref(), &remote, &volumes, &self.config.retry).await?;

        migration.status.stage = MigrationStage::Final;
        migration.status.status = if ledger.all_successful() {
            MigrationStatusType::Successful
        } else {
            MigrationStatusType::PartialSuccess
        };

        if migration.spec.purge_deleted_resources() {
            if let Err(e) = self.purge(migration, &remote, &request).await {
                let message = format!("Error cleaning up resources: {}", e);
                error!("Migration {}: {}", migration.display_name(), message);
                self.event(
                    migration,
                    EventType::Warning,
                    MigrationStatusType::PartialSuccess,
                    message,
                );
                migration.status.status = MigrationStatusType::PartialSuccess;
            }
        }

        let now = Utc::now();
        migration.status.resource_migration_finish_timestamp = Some(now);
        migration.status.finish_timestamp = Some(now);
        self.persist(migration).await?;
        info!(
            "Migration {} finished with status {}",
            migration.display_name(),
            migration.status.status
        );
        Ok(())
    }

    async fn collect(
        &self,
        migration: &Migration,
        request: &CollectRequest,
        volumes_only: bool,
    ) -> Result<CollectedResources> {
        let source = self.source.as_ref();
        if volumes_only {
            let mut collected = self
                .collector
                .get_resources_for_type(source, &ApiResource::persistent_volumes(), request)
                .await?;
            let claims = self
                .collector
                .get_resources_for_type(source, &ApiResource::persistent_volume_claims(), request)
                .await?;
            collected.objects.extend(claims.objects);
            collected.pvcs_with_owner_refs.extend(claims.pvcs_with_owner_refs);
            return Ok(collected);
        }

        let exclude = &migration.spec.exclude_resource_types;
        if exclude.is_empty() {
            self.collector.get_resources(source, request).await
        } else {
            self.collector
                .get_resources_excluding_types(source, request, exclude)
                .await
        }
    }

    /// Delete migrated objects on the destination that no longer exist on the source
    async fn purge(
        &self,
        migration: &mut Migration,
        remote: &RemoteClient,
        request: &CollectRequest,
    ) -> Result<()> {
        info!("Purging deleted resources for migration {}", migration.display_name());

        let mut destination_request = request.clone();
        destination_request
            .exclude_selectors
            .insert(STASH_CR_LABEL.to_string(), "true".to_string());
        let destination = self
            .collector
            .get_resources(remote.api(), &destination_request)
            .await?;
        let source = self.collector.get_resources(self.source.as_ref(), request).await?;

        let migrated: Vec<DynamicObject> = destination
            .objects
            .into_iter()
            .filter(|o| !o.namespace().is_empty() && MigrationMarker::is_migrated(&o.annotations()))
            .collect();
        let stale = self.collector.objects_to_be_deleted(&source.objects, &migrated);
        self.collector.delete_resources(remote.api(), &stale).await?;

        for object in &stale {
            migration
                .status
                .resources
                .push(MigrationResourceInfo::for_object(object, MigrationStatusType::Purged));
        }
        info!("Purged {} resources from the destination", stale.len());
        Ok(())
    }
}

fn ensure_scheduler_ready(pair: &ClusterPair, label: &str) -> Result<()> {
    let status = pair.status.scheduler_status;
    if status != ClusterPairStatusType::Ready {
        return Err(MigrationError::cluster_pair_not_ready(
            pair.metadata.name.clone().unwrap_or_default(),
            format!("{} scheduler", label),
            status.to_string(),
        ));
    }
    Ok(())
}

fn collect_request(migration: &Migration, pair: &ClusterPair, namespaces: &[String]) -> CollectRequest {
    let spec = &migration.spec;
    CollectRequest {
        namespaces: namespaces.to_vec(),
        selectors: spec.selectors.clone(),
        exclude_selectors: spec.exclude_selectors.clone(),
        include_optional_types: spec.include_optional_resource_types.clone(),
        options: CollectorOptions {
            skip_services: spec.skip_service_update(),
            rancher_project_mappings: pair.project_mappings(),
            include_all_network_policies: spec.include_network_policy_with_cidr(),
            ignore_owner_references_check: spec.ignore_owner_references_check(),
        },
    }
}

fn is_volume_object(object: &DynamicObject) -> bool {
    matches!(object.kind(), "PersistentVolume" | "PersistentVolumeClaim")
}
