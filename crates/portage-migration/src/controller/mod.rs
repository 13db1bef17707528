//! Migration state machine
//!
//! Each reconciliation advances a Migration by one logical step and persists
//! its status before returning, so that repeated invocations converge on a
//! terminal state without repeating side effects:
//!
//! ```text
//! Initial -> PreExecRule -> Volumes -> Applications -> Final
//! ```
//!
//! Volume replication is delegated to the [`VolumeDriver`]; the Applications
//! stage collects, prepares and applies resources on the destination.

mod resources;
mod volumes;

#[cfg(test)]
mod tests;

use crate::config::MigrationControllerConfig;
use crate::error::{MigrationError, Result};
use crate::remote::RemoteClientFactory;
use crate::summary::compute_summary;
use crate::traits::{ClusterConnector, EventRecorder, ResourceCollector, RuleExecutor, VolumeDriver};
use chrono::Utc;
use k8s_openapi::api::core::v1::Namespace;
use portage_core::annotations::MIGRATION_SCHEDULE_NAME;
use portage_core::resources::{
    Migration, MigrationSchedule, MigrationStage, MigrationStatusType, ResourceTransformation,
    Rule, RuleType, TransformStatusType,
};
use portage_core::{ClusterApi, EventType, MigrationEvent};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Finalizer holding a Migration until in-flight volume work is cancelled
pub const FINALIZER_CLEANUP: &str = "portage.io/finalizer-cleanup";

/// When a Migration should be looked at again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    Immediately,
    After(Duration),
    Never,
}

/// Drives Migration objects found on the source cluster
pub struct MigrationController {
    source: Arc<dyn ClusterApi>,
    driver: Arc<dyn VolumeDriver>,
    collector: Arc<dyn ResourceCollector>,
    rules: Arc<dyn RuleExecutor>,
    recorder: Arc<dyn EventRecorder>,
    remotes: RemoteClientFactory,
    config: MigrationControllerConfig,
}

impl MigrationController {
    pub fn new(
        source: Arc<dyn ClusterApi>,
        connector: Arc<dyn ClusterConnector>,
        driver: Arc<dyn VolumeDriver>,
        collector: Arc<dyn ResourceCollector>,
        rules: Arc<dyn RuleExecutor>,
        recorder: Arc<dyn EventRecorder>,
        config: MigrationControllerConfig,
    ) -> Self {
        let remotes = RemoteClientFactory::new(source.clone(), connector, config.admin_namespace.clone());
        Self {
            source,
            driver,
            collector,
            rules,
            recorder,
            remotes,
            config,
        }
    }

    /// Terminate rule commands left running by a previous process
    pub async fn init(&self) -> Result<()> {
        let migrations = self.source.list_typed::<Migration>(None, None).await?;
        for migration in &migrations {
            self.rules.perform_rule_recovery(migration).await?;
        }
        debug!("Performed rule recovery for {} migrations", migrations.len());
        Ok(())
    }

    /// Run the controller until the token is cancelled
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!(
            "Starting migration controller (resync: {:?}, workers: {})",
            self.config.resync_interval, self.config.max_workers
        );
        self.init().await?;

        let mut interval = tokio::time::interval(self.config.resync_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Migration controller shutting down");
                    return Ok(());
                }
                _ = interval.tick() => {
                    if let Err(e) = self.reconcile_all().await {
                        error!("Migration reconcile cycle failed: {}", e);
                    }
                }
            }
        }
    }

    async fn reconcile_all(&self) -> Result<()> {
        let migrations = self.source.list_typed::<Migration>(None, None).await?;
        debug!("Reconciling {} migrations", migrations.len());

        for mut migration in migrations {
            loop {
                match self.reconcile(&mut migration).await {
                    Ok(Requeue::Immediately) => continue,
                    Ok(_) => break,
                    Err(e) => {
                        error!("Failed to reconcile migration {}: {}", migration.display_name(), e);
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Advance one Migration by a single step
    pub async fn reconcile(&self, migration: &mut Migration) -> Result<Requeue> {
        if migration.metadata.deletion_timestamp.is_some() {
            self.finalize(migration).await?;
            return Ok(Requeue::Never);
        }

        if !has_finalizer(migration) {
            migration
                .metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(FINALIZER_CLEANUP.to_string());
            self.persist(migration).await?;
            return Ok(Requeue::Immediately);
        }

        self.handle(migration).await?;
        Ok(Requeue::After(self.config.resync_interval))
    }

    async fn finalize(&self, migration: &mut Migration) -> Result<()> {
        if !has_finalizer(migration) {
            return Ok(());
        }
        if migration.status.stage != MigrationStage::Final {
            if let Err(e) = self.driver.cancel_migration(migration).await {
                error!("Error cancelling migration {}: {}", migration.display_name(), e);
            }
        }
        if let Some(finalizers) = migration.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != FINALIZER_CLEANUP);
        }
        self.persist(migration).await?;
        info!("Removed finalizer from migration {}", migration.display_name());
        Ok(())
    }

    async fn handle(&self, migration: &mut Migration) -> Result<()> {
        migration.spec.apply_defaults();
        if migration.status.stage == MigrationStage::Final {
            return Ok(());
        }
        migration.status.start_timestamp.get_or_insert_with(Utc::now);

        match self.applications_activated(migration).await {
            Ok(false) => {}
            Ok(true) => {
                return self
                    .fail_migration(migration, "migrated applications are active on remote cluster")
                    .await;
            }
            Err(e) => {
                self.warning(migration, MigrationStatusType::Failed, e.to_string());
                return Ok(());
            }
        }

        if migration.spec.cluster_pair.is_empty() {
            return self
                .fail_migration(migration, "clusterPair to migrate to cannot be empty")
                .await;
        }
        let namespaces = self.target_namespaces(migration).await?;
        if namespaces.is_empty() {
            return self
                .fail_migration(
                    migration,
                    "no valid namespace found based on the provided 'Namespaces' and 'NamespaceSelectors'",
                )
                .await;
        }
        if !self.namespaces_allowed(migration, &namespaces) {
            return self
                .fail_migration(migration, "migration namespaces should only contain the current namespace")
                .await;
        }
        let (namespaces, missing) = self.split_existing(namespaces).await?;

        if !migration.spec.include_volumes() && self.local_domain_inactive().await {
            return self
                .fail_migration(migration, "Failing migration since local clusterdomain is inactive")
                .await;
        }

        let entry_stage = migration.status.stage;
        let mut background = Vec::new();

        if entry_stage == MigrationStage::Initial
            && !self.check_initial(migration, &namespaces, &missing).await?
        {
            return Ok(());
        }

        if matches!(entry_stage, MigrationStage::Initial | MigrationStage::PreExecRule) {
            match self.run_pre_exec_rule(migration, &namespaces).await {
                Ok(tokens) => background = tokens,
                Err(e) => {
                    let message = format!("Error running PreExecRule: {}", e);
                    error!("Migration {}: {}", migration.display_name(), message);
                    self.warning(migration, MigrationStatusType::Failed, message);
                    migration.status.stage = MigrationStage::Initial;
                    migration.status.status = MigrationStatusType::Initial;
                    return self.persist(migration).await;
                }
            }
        }

        match entry_stage {
            MigrationStage::Initial | MigrationStage::PreExecRule | MigrationStage::Volumes => {
                if migration.spec.include_volumes() {
                    if let Err(e) = self.migrate_volumes(migration, &namespaces, background).await {
                        self.report(migration, "Error migrating volumes", &e);
                    }
                } else {
                    migration.status.stage = MigrationStage::Applications;
                    migration.status.status = MigrationStatusType::Initial;
                    migration.status.volume_migration_finish_timestamp = Some(Utc::now());
                    self.persist(migration).await?;
                }
            }
            MigrationStage::Applications => {
                let volumes_only = !migration.spec.include_resources();
                if let Err(e) = self.migrate_resources(migration, &namespaces, volumes_only).await {
                    self.report(migration, "Error migrating resources", &e);
                }
            }
            MigrationStage::Final => {}
        }
        Ok(())
    }

    /// Whether a recurring schedule on the destination already activated the
    /// migrated applications
    async fn applications_activated(&self, migration: &Migration) -> Result<bool> {
        let Some(schedule) = migration.annotation(MIGRATION_SCHEDULE_NAME) else {
            return Ok(false);
        };
        let remote = self.remotes.build(migration).await?;
        let namespace = migration.metadata.namespace.as_deref();
        match remote.api().get_typed::<MigrationSchedule>(namespace, schedule).await {
            Ok(schedule) => Ok(schedule.status.application_activated),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Explicit namespaces plus those matching any namespace selector
    async fn target_namespaces(&self, migration: &Migration) -> Result<Vec<String>> {
        let mut namespaces: BTreeSet<String> = migration.spec.namespaces.iter().cloned().collect();
        for (key, value) in &migration.spec.namespace_selectors {
            let selector = format!("{}={}", key, value);
            let matched = self
                .source
                .list_typed::<Namespace>(None, Some(&selector))
                .await?;
            namespaces.extend(matched.iter().filter_map(|ns| ns.metadata.name.clone()));
        }
        Ok(namespaces.into_iter().collect())
    }

    /// Only the admin namespace may migrate namespaces other than its own
    fn namespaces_allowed(&self, migration: &Migration, namespaces: &[String]) -> bool {
        let own = migration.metadata.namespace.as_deref().unwrap_or_default();
        own == self.config.admin_namespace || namespaces.iter().all(|ns| ns == own)
    }

    /// Split namespaces into those present on the source and those deleted
    ///
    /// Deleted namespaces are dropped from the working set when
    /// `skipDeletedNamespaces` is set; otherwise the Initial stage fails on them.
    async fn split_existing(&self, namespaces: Vec<String>) -> Result<(Vec<String>, Vec<String>)> {
        let (mut present, mut missing) = (Vec::new(), Vec::new());
        for namespace in namespaces {
            match self.source.get_typed::<Namespace>(None, &namespace).await {
                Ok(_) => present.push(namespace),
                Err(e) if e.is_not_found() => missing.push(namespace),
                Err(e) => return Err(e.into()),
            }
        }
        Ok((present, missing))
    }

    async fn local_domain_inactive(&self) -> bool {
        let retry = &self.config.retry;
        let attempts = retry.cluster_domain_retries.max(1);
        for attempt in 1..=attempts {
            match self.driver.get_cluster_domains().await {
                Ok(domains) => return domains.local_domain_inactive(),
                Err(e) => {
                    debug!("Unable to get cluster domains (attempt {}): {}", attempt, e);
                    if attempt < attempts {
                        tokio::time::sleep(retry.cluster_domain_interval).await;
                    }
                }
            }
        }
        warn!("Cluster domains unavailable, assuming the local domain is active");
        false
    }

    /// Checks run once before anything is started
    ///
    /// Returns false when the migration was failed.
    async fn check_initial(
        &self,
        migration: &mut Migration,
        namespaces: &[String],
        missing: &[String],
    ) -> Result<bool> {
        for namespace in missing {
            if !migration.spec.skip_deleted_namespaces() {
                let message = format!("error getting namespace {}: namespace not found", namespace);
                self.fail_migration(migration, message).await?;
                return Ok(false);
            }
            let message = format!("namespace {} was deleted, skipping migration", namespace);
            warn!("Migration {}: {}", migration.display_name(), message);
            self.warning(migration, MigrationStatusType::Initial, message);
        }

        match migration.spec.transform_specs.as_slice() {
            [] => {}
            [name] => {
                let name = name.clone();
                for namespace in namespaces {
                    if let Err(e) = self.wait_transform_ready(&name, namespace).await {
                        self.fail_migration(migration, e.to_string()).await?;
                        return Ok(false);
                    }
                }
            }
            specs => {
                let message = format!(
                    "providing multiple transformation specs is not supported: {:?}",
                    specs
                );
                self.fail_migration(migration, message).await?;
                return Ok(false);
            }
        }

        let own = migration.metadata.namespace.clone().unwrap_or_default();
        let rules = [
            ("PreExecRule", migration.spec.pre_exec_rule().map(str::to_string)),
            ("PostExecRule", migration.spec.post_exec_rule().map(str::to_string)),
        ];
        for (label, rule) in rules {
            let Some(rule) = rule else {
                continue;
            };
            if let Err(e) = self.source.get_typed::<Rule>(Some(&own), &rule).await {
                let message = format!("Error getting {} {}: {}", label, rule, e);
                self.fail_migration(migration, message).await?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn wait_transform_ready(&self, name: &str, namespace: &str) -> Result<()> {
        let retry = &self.config.retry;
        let mut status = TransformStatusType::Initial;
        for attempt in 0..retry.transform_polls.max(1) {
            let transform = self
                .source
                .get_typed::<ResourceTransformation>(Some(namespace), name)
                .await
                .map_err(|e| {
                    MigrationError::invalid_migration(
                        format!("unable to retrieve transformation {}: {}", name, e),
                        "Create the ResourceTransformation in every migrated namespace",
                    )
                })?;
            status = transform.status.status;
            match status {
                TransformStatusType::Ready => return Ok(()),
                TransformStatusType::Failed => break,
                _ => {
                    debug!(
                        "Transformation {}/{} is {:?} (poll {})",
                        namespace, name, status, attempt
                    );
                    tokio::time::sleep(retry.transform_poll_interval).await;
                }
            }
        }
        Err(MigrationError::invalid_migration(
            format!("transformation {} is not in ready state: {:?}", name, status),
            "Check the ResourceTransformation status for validation errors",
        ))
    }

    /// Run the pre-exec rule, if any, and hand back tokens for background commands
    async fn run_pre_exec_rule(
        &self,
        migration: &mut Migration,
        namespaces: &[String],
    ) -> Result<Vec<CancellationToken>> {
        let Some(rule) = migration.spec.pre_exec_rule().map(str::to_string) else {
            migration.status.stage = MigrationStage::Volumes;
            migration.status.status = MigrationStatusType::Pending;
            self.persist(migration).await?;
            return Ok(Vec::new());
        };

        migration.status.stage = MigrationStage::PreExecRule;
        migration.status.status = MigrationStatusType::InProgress;
        self.persist(migration).await?;
        self.run_rule(migration, RuleType::PreExec, &rule, namespaces).await
    }

    /// Execute a rule in every namespace
    ///
    /// Background commands started before a failing namespace are terminated.
    async fn run_rule(
        &self,
        migration: &Migration,
        rule_type: RuleType,
        name: &str,
        namespaces: &[String],
    ) -> Result<Vec<CancellationToken>> {
        let own = migration.metadata.namespace.as_deref();
        let rule = self.source.get_typed::<Rule>(own, name).await?;

        let mut tokens = Vec::new();
        for namespace in namespaces {
            match self.rules.execute_rule(&rule, rule_type, migration, namespace).await {
                Ok(Some(token)) => tokens.push(token),
                Ok(None) => {}
                Err(e) => {
                    tokens.iter().for_each(CancellationToken::cancel);
                    return Err(MigrationError::rule_failed(
                        rule_type.to_string(),
                        name,
                        format!("namespace {}: {}", namespace, e),
                    ));
                }
            }
        }
        info!(
            "Ran {} {} for migration {} in {} namespaces",
            rule_type,
            name,
            migration.display_name(),
            namespaces.len()
        );
        Ok(tokens)
    }

    /// Mark the migration terminally failed, emit a warning and persist
    async fn fail_migration(&self, migration: &mut Migration, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        error!("Migration {}: {}", migration.display_name(), message);
        migration.fail();
        self.warning(migration, MigrationStatusType::Failed, message);
        self.persist(migration).await
    }

    /// Log a stage error and turn it into a warning event
    ///
    /// Stale resource version errors resolve on the next pass and stay out
    /// of the event stream.
    fn report(&self, migration: &Migration, context: &str, err: &MigrationError) {
        let message = format!("{}: {}", context, err);
        error!("Migration {}: {}", migration.display_name(), message);
        if !err.is_reapply_latest_version() {
            self.warning(migration, MigrationStatusType::Failed, message);
        }
    }

    fn event(&self, migration: &Migration, event_type: EventType, reason: MigrationStatusType, message: String) {
        self.recorder.record(MigrationEvent::new(
            migration.metadata.namespace.clone().unwrap_or_default(),
            migration.metadata.name.clone().unwrap_or_default(),
            event_type,
            reason.as_str(),
            message,
        ));
    }

    fn warning(&self, migration: &Migration, reason: MigrationStatusType, message: impl Into<String>) {
        self.event(migration, EventType::Warning, reason, message.into());
    }

    /// Write the Migration back with a freshly computed summary
    async fn persist(&self, migration: &mut Migration) -> Result<()> {
        migration.status.summary = Some(compute_summary(migration));
        let updated = self.source.update_typed(&*migration).await?;
        migration.metadata.resource_version = updated.metadata.resource_version;
        Ok(())
    }
}

fn has_finalizer(migration: &Migration) -> bool {
    migration
        .metadata
        .finalizers
        .iter()
        .flatten()
        .any(|f| f == FINALIZER_CLEANUP)
}
