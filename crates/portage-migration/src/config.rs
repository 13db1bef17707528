use std::time::Duration;

/// Retry budgets and poll intervals used by the migration engines
///
/// Every loop that waits on the destination cluster is bounded by one of
/// these budgets. Exceeding a budget surfaces as a normal error.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts to create a missing StorageClass on the destination
    pub apply_retries: usize,
    /// Pause between StorageClass creation attempts
    pub apply_retry_interval: Duration,
    /// Extra create attempts after an Unauthorized response
    pub unauthorized_retries: usize,
    /// Polls waiting for a deleted object to disappear
    pub delete_polls: usize,
    pub delete_poll_interval: Duration,
    /// Polls waiting for a recreated claim to bind
    pub bound_polls: usize,
    pub bound_poll_interval: Duration,
    /// Attempts to read the cluster domains from the volume driver
    pub cluster_domain_retries: usize,
    pub cluster_domain_interval: Duration,
    /// Polls waiting for a ResourceTransformation to become Ready
    pub transform_polls: usize,
    pub transform_poll_interval: Duration,
    /// Polls waiting for a registered CRD to become Established
    pub crd_polls: usize,
    pub crd_poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            apply_retries: 10,
            apply_retry_interval: Duration::from_secs(5),
            unauthorized_retries: 10,
            delete_polls: 12,
            delete_poll_interval: Duration::from_secs(10),
            bound_polls: 24,
            bound_poll_interval: Duration::from_secs(5),
            cluster_domain_retries: 5,
            cluster_domain_interval: Duration::from_secs(5),
            transform_polls: 12,
            transform_poll_interval: Duration::from_secs(5),
            crd_polls: 12,
            crd_poll_interval: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Same budgets with every pause removed, for tests and dry runs
    pub fn without_delays() -> Self {
        Self {
            apply_retry_interval: Duration::ZERO,
            delete_poll_interval: Duration::ZERO,
            bound_poll_interval: Duration::ZERO,
            cluster_domain_interval: Duration::ZERO,
            transform_poll_interval: Duration::ZERO,
            crd_poll_interval: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Configuration for the migration controller
#[derive(Debug, Clone)]
pub struct MigrationControllerConfig {
    /// Namespace whose Migrations may span other namespaces
    pub admin_namespace: String,
    /// Width of the worker pool applying generic objects
    pub max_workers: usize,
    /// Pause between passes of the run loop
    pub resync_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for MigrationControllerConfig {
    fn default() -> Self {
        Self {
            admin_namespace: "kube-system".to_string(),
            max_workers: 10,
            resync_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}
