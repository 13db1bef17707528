use miette::Diagnostic;
use portage_core::error::REAPPLY_LATEST_VERSION_MSG;
use thiserror::Error;

/// Error type for the migration state machine and its engines
#[derive(Error, Debug, Diagnostic)]
pub enum MigrationError {
    /// The cluster pair is not usable yet
    #[error("Cluster pair '{cluster_pair}' is not ready: {component} status is {status}")]
    #[diagnostic(
        code(portage::migration::cluster_pair_not_ready),
        help("Check the ClusterPair status. The migration is retried on the next reconciliation")
    )]
    ClusterPairNotReady {
        #[allow(unused)]
        cluster_pair: String,
        #[allow(unused)]
        component: String,
        #[allow(unused)]
        status: String,
    },

    /// The Migration spec cannot be executed as written
    #[error("Invalid migration: {reason}")]
    #[diagnostic(code(portage::migration::invalid_migration), help("{suggestion}"))]
    InvalidMigration {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// The volume driver reported an error
    #[error("Volume driver error: {message}")]
    #[diagnostic(
        code(portage::migration::volume_driver_error),
        help("Check the storage driver logs on both clusters")
    )]
    VolumeDriverError {
        #[allow(unused)]
        message: String,
    },

    /// A pre or post exec rule failed
    #[error("Error running {rule_type} '{rule}': {message}")]
    #[diagnostic(
        code(portage::migration::rule_failed),
        help("Inspect the pods selected by the rule and the command output")
    )]
    RuleFailed {
        #[allow(unused)]
        rule_type: String,
        #[allow(unused)]
        rule: String,
        #[allow(unused)]
        message: String,
    },

    /// The resource collector could not enumerate objects
    #[error("Resource collection failed: {message}")]
    #[diagnostic(
        code(portage::migration::collection_failed),
        help("Verify the selectors and that every listed resource type is served by the source cluster")
    )]
    CollectionFailed {
        #[allow(unused)]
        message: String,
    },

    /// A prepared object could not be applied on the destination
    #[error("Error applying {resource}: {message}")]
    #[diagnostic(
        code(portage::migration::apply_failed),
        help("Check the destination cluster for conflicting objects or admission failures")
    )]
    ApplyFailed {
        #[allow(unused)]
        resource: String,
        #[allow(unused)]
        message: String,
    },

    /// Could not connect to the destination cluster
    #[error("Cannot connect to cluster pair '{cluster_pair}': {message}")]
    #[diagnostic(
        code(portage::migration::remote_connection_failed),
        help("Verify the server URL, token and CA certificate in the ClusterPair")
    )]
    RemoteConnectionFailed {
        #[allow(unused)]
        cluster_pair: String,
        #[allow(unused)]
        message: String,
    },

    /// Core API error
    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] portage_core::PortageError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(portage::migration::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for migration operations
pub type Result<T> = std::result::Result<T, MigrationError>;

impl MigrationError {
    pub fn cluster_pair_not_ready(
        cluster_pair: impl Into<String>,
        component: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self::ClusterPairNotReady {
            cluster_pair: cluster_pair.into(),
            component: component.into(),
            status: status.into(),
        }
    }

    pub fn invalid_migration(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidMigration {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn volume_driver_error(message: impl Into<String>) -> Self {
        Self::VolumeDriverError {
            message: message.into(),
        }
    }

    pub fn rule_failed(
        rule_type: impl Into<String>,
        rule: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::RuleFailed {
            rule_type: rule_type.into(),
            rule: rule.into(),
            message: message.into(),
        }
    }

    pub fn collection_failed(message: impl Into<String>) -> Self {
        Self::CollectionFailed {
            message: message.into(),
        }
    }

    pub fn apply_failed(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ApplyFailed {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn remote_connection_failed(
        cluster_pair: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::RemoteConnectionFailed {
            cluster_pair: cluster_pair.into(),
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Optimistic-concurrency failures resolve themselves on the next pass
    /// and are kept out of the event stream
    pub fn is_reapply_latest_version(&self) -> bool {
        match self {
            Self::CoreError(e) if e.is_conflict() => true,
            other => other.to_string().contains(REAPPLY_LATEST_VERSION_MSG),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::CoreError(e) if e.is_not_found())
    }
}
