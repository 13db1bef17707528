use super::MigrationController;
use crate::error::{MigrationError, Result};
use chrono::Utc;
use portage_core::resources::{
    ClusterPairStatusType, Migration, MigrationStage, MigrationStatusType, RuleType,
};
use portage_core::EventType;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info};

impl MigrationController {
    /// Start or poll the volume migration and move on once every volume is done
    ///
    /// Background pre-exec commands are terminated as soon as the driver has
    /// started, and in any case before this returns.
    pub(super) async fn migrate_volumes(
        &self,
        migration: &mut Migration,
        namespaces: &[String],
        background: Vec<CancellationToken>,
    ) -> Result<()> {
        let mut background: Vec<DropGuard> =
            background.into_iter().map(CancellationToken::drop_guard).collect();
        migration.status.stage = MigrationStage::Volumes;

        if migration.status.volumes.is_none() {
            if let Err(e) = self.storage_ready(migration).await {
                if migration.spec.pre_exec_rule().is_some() {
                    migration.status.stage = MigrationStage::Initial;
                    self.persist(migration).await?;
                }
                return Err(e);
            }

            let volumes = self.driver.start_migration(migration, namespaces).await?;
            info!(
                "Started migration of {} volumes for {}",
                volumes.len(),
                migration.display_name()
            );
            migration.status.volumes = Some(volumes);
            migration.status.status = MigrationStatusType::InProgress;
            self.persist(migration).await?;
            background.clear();

            if let Some(rule) = migration.spec.post_exec_rule().map(str::to_string) {
                if let Err(e) = self.run_rule(migration, RuleType::PostExec, &rule, namespaces).await {
                    let message = format!("Error running PostExecRule: {}", e);
                    error!("Migration {}: {}", migration.display_name(), message);
                    self.warning(migration, MigrationStatusType::Failed, message);
                    if let Err(e) = self.driver.cancel_migration(migration).await {
                        error!("Error cancelling migration {}: {}", migration.display_name(), e);
                    }
                    migration.fail();
                    self.persist(migration).await?;
                    return Err(e);
                }
            }
        }

        if !self.poll_volumes(migration).await? {
            return Ok(());
        }

        migration.status.volume_migration_finish_timestamp = Some(Utc::now());
        if migration.status.status != MigrationStatusType::Failed {
            if migration.spec.include_resources() {
                migration.status.stage = MigrationStage::Applications;
                migration.status.status = MigrationStatusType::InProgress;
                self.persist(migration).await?;
                self.migrate_resources(migration, namespaces, false).await?;
            } else {
                self.migrate_resources(migration, namespaces, true).await?;
            }
        }
        self.persist(migration).await
    }

    async fn storage_ready(&self, migration: &Migration) -> Result<()> {
        let pair = self.remotes.cluster_pair(migration).await?;
        let status = pair.status.storage_status;
        if status != ClusterPairStatusType::Ready {
            return Err(MigrationError::cluster_pair_not_ready(
                migration.spec.cluster_pair.as_str(),
                "storage",
                status.to_string(),
            ));
        }
        Ok(())
    }

    /// Refresh per-volume progress; returns true once no volume is in progress
    ///
    /// A failed volume fails the migration, but every volume is still
    /// evaluated so each one gets its event.
    async fn poll_volumes(&self, migration: &mut Migration) -> Result<bool> {
        if migration.status.volumes.as_deref().unwrap_or_default().is_empty() {
            return Ok(true);
        }

        let volumes = self.driver.get_migration_status(migration).await?;
        migration.status.volumes = Some(volumes.clone());
        self.persist(migration).await?;

        let mut in_progress = false;
        for volume in &volumes {
            match volume.status {
                MigrationStatusType::InProgress => {
                    info!(
                        "Volume migration still in progress for {}: {}",
                        migration.display_name(),
                        volume.volume
                    );
                    in_progress = true;
                }
                MigrationStatusType::Failed => {
                    self.warning(
                        migration,
                        MigrationStatusType::Failed,
                        format!("Error migrating volume {}: {}", volume.volume, volume.reason),
                    );
                    migration.fail();
                }
                MigrationStatusType::Successful => {
                    self.event(
                        migration,
                        EventType::Normal,
                        MigrationStatusType::Successful,
                        format!("Volume {} migrated successfully", volume.volume),
                    );
                }
                _ => {}
            }
        }

        if in_progress {
            if migration.status.status == MigrationStatusType::Failed {
                self.persist(migration).await?;
            }
            return Ok(false);
        }
        Ok(true)
    }
}
