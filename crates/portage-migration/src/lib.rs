// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod api_client;
pub mod apply;
pub mod config;
pub mod controller;
pub mod error;
pub mod hash;
pub mod ledger;
pub mod mock;
pub mod platform;
pub mod prepare;
pub mod remote;
pub mod repair;
pub mod summary;
pub mod traits;

// Re-export primary types
pub use error::{MigrationError, Result};
pub use mock::{
    MockConnector, MockResourceCollector, MockRuleExecutor, MockVolumeDriver,
    RecordingEventRecorder,
};
pub use traits::{
    ClusterConnector, ClusterDomainState, ClusterDomains, CollectRequest, CollectedResources,
    EventRecorder, ResourceCollector, RuleExecutor, TracingEventRecorder, VolumeDriver,
};

// Re-export controller types
pub use api_client::{HttpClusterApi, HttpConnector};
pub use config::{MigrationControllerConfig, RetryPolicy};
pub use controller::{MigrationController, Requeue, FINALIZER_CLEANUP};
pub use remote::{RemoteClient, RemoteClientFactory};
pub use summary::compute_summary;
