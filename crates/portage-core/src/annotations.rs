//! Metadata keys and the typed side-channels stored in them
//!
//! Several idempotence mechanisms ride on annotations of migrated objects: the
//! stashed reclaim policy of a PV, the stashed replica count of a workload, the
//! `current,suspend` pair of a custom suspend path and the content fingerprint
//! used to skip unchanged objects. Each of them is wrapped in a small type here
//! so callers never parse the raw strings themselves.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Prefix shared by every annotation this system writes
pub const PREFIX: &str = "portage.io/";

pub const MIGRATED: &str = "portage.io/migrated";
pub const MIGRATION_NAME: &str = "portage.io/migrationName";
pub const MIGRATION_NAMESPACE: &str = "portage.io/migrationNamespace";
pub const MIGRATION_TIME: &str = "portage.io/migrationTime";
pub const MIGRATION_REPLICAS: &str = "portage.io/migrationReplicas";
pub const RECLAIM_POLICY: &str = "portage.io/reclaimPolicy";
pub const RESOURCE_HASH: &str = "portage.io/resourceHash";
pub const TRANSFORMED_RESOURCE_NAME: &str = "portage.io/transformedResourceName";
pub const CURRENT_STORAGE_CLASS: &str = "portage.io/currentStorageClassName";
pub const SKIP_MODIFY_RESOURCES: &str = "portage.io/skipModifyResources";
pub const SKIP_RESOURCE: &str = "portage.io/skipResource";
pub const CREATED_BY: &str = "portage.io/created-by-portage";
pub const MIGRATION_SCHEDULE_NAME: &str = "portage.io/migrationScheduleName";

/// Label marking stash ConfigMaps
pub const STASH_CR_LABEL: &str = "stash-cr";
pub const STASH_RESOURCE_KIND_LABEL: &str = "resource-kind";

/// Data keys inside a stash ConfigMap
pub const STASH_OWNED_PVCS_KEY: &str = "ownedPVCs";
pub const STASH_CR_KEY: &str = "cr-runtime-object";
pub const STASH_CR_NAME_KEY: &str = "name";

/// Layout of the migration time annotation
pub const MIGRATION_TIME_FORMAT: &str = "%Y-%m-%d-%H%M%S";

/// Reclaim policy a PV carried on the source before it was forced to Retain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimStash(pub String);

impl ReclaimStash {
    pub fn read(annotations: &BTreeMap<String, String>) -> Option<Self> {
        annotations
            .get(RECLAIM_POLICY)
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.clone()))
    }

    pub fn write(&self, annotations: &mut BTreeMap<String, String>) {
        annotations.insert(RECLAIM_POLICY.to_string(), self.0.clone());
    }
}

/// Replica count a workload ran with before it was scaled to zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaStash(pub i64);

impl ReplicaStash {
    /// Read the stash; unparsable values count as absent
    pub fn read(annotations: &BTreeMap<String, String>) -> Option<Self> {
        annotations
            .get(MIGRATION_REPLICAS)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(Self)
    }

    pub fn write(&self, annotations: &mut BTreeMap<String, String>) {
        annotations.insert(MIGRATION_REPLICAS.to_string(), self.0.to_string());
    }
}

/// `current,suspend` pair recorded for a custom suspend path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspendStash {
    /// Value the field held before suspension
    pub current: String,
    /// Value written to suspend the resource
    pub suspend: String,
}

impl SuspendStash {
    /// Annotation key for a suspend path such as `spec.suspend`
    pub fn key(path: &str) -> String {
        format!("{}{}", PREFIX, path)
    }

    pub fn read(annotations: &BTreeMap<String, String>, path: &str) -> Option<Self> {
        let raw = annotations.get(&Self::key(path))?;
        let (current, suspend) = match raw.split_once(',') {
            Some((c, s)) => (c, s),
            None => (raw.as_str(), ""),
        };
        Some(Self {
            current: current.to_string(),
            suspend: suspend.to_string(),
        })
    }

    pub fn write(&self, annotations: &mut BTreeMap<String, String>, path: &str) {
        annotations.insert(Self::key(path), format!("{},{}", self.current, self.suspend));
    }
}

/// Content fingerprint of the manifest an object was last applied from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(pub u64);

impl ContentHash {
    pub fn read(annotations: &BTreeMap<String, String>) -> Option<Self> {
        annotations
            .get(RESOURCE_HASH)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Self)
    }

    pub fn write(&self, annotations: &mut BTreeMap<String, String>) {
        annotations.insert(RESOURCE_HASH.to_string(), self.0.to_string());
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the migration that produced an object on the destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationMarker {
    pub name: String,
    pub namespace: String,
    pub time: DateTime<Utc>,
}

impl MigrationMarker {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            time,
        }
    }

    pub fn write(&self, annotations: &mut BTreeMap<String, String>) {
        annotations.insert(MIGRATED.to_string(), "true".to_string());
        annotations.insert(MIGRATION_NAME.to_string(), self.name.clone());
        annotations.insert(MIGRATION_NAMESPACE.to_string(), self.namespace.clone());
        annotations.insert(
            MIGRATION_TIME.to_string(),
            self.time.format(MIGRATION_TIME_FORMAT).to_string(),
        );
    }

    /// Whether an object carries the migrated marker
    pub fn is_migrated(annotations: &BTreeMap<String, String>) -> bool {
        annotations.get(MIGRATED).map(|v| v == "true").unwrap_or(false)
    }
}
