use crate::api::{selector_matches, ClusterApi};
use crate::error::{PortageError, Result, PORT_ALLOCATED_MSG};
use crate::object::DynamicObject;
use crate::resources::Resource;
use crate::types::ApiResource;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// API verbs understood by failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    Get,
    List,
    Create,
    Update,
    Delete,
}

/// Error returned by an injected failure
#[derive(Debug, Clone)]
pub enum InjectedError {
    Unauthorized,
    Conflict,
    PortAllocated,
    Internal(String),
}

impl InjectedError {
    fn to_error(&self, key: &str) -> PortageError {
        match self {
            InjectedError::Unauthorized => PortageError::unauthorized(format!("access to {} denied", key)),
            InjectedError::Conflict => PortageError::conflict(key),
            InjectedError::PortAllocated => PortageError::port_allocated(PORT_ALLOCATED_MSG),
            InjectedError::Internal(message) => PortageError::internal_error(message.clone()),
        }
    }
}

struct InjectedFailure {
    op: MockOp,
    kind: String,
    remaining: usize,
    error: InjectedError,
}

/// Write counters for one kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl WriteCounts {
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

type StoreKey = (String, String, String, String);

/// In-memory cluster for testing
///
/// Keeps objects keyed by group, plural, namespace and name. Assigns UIDs,
/// resource versions and creation timestamps like an API server, honours
/// finalizers on delete, rejects stale resourceVersions on update and binds
/// PersistentVolumeClaims on creation. Failures can be injected per verb and
/// kind, and every write is counted per kind.
pub struct MockCluster {
    objects: Arc<RwLock<BTreeMap<StoreKey, DynamicObject>>>,
    next_version: AtomicU64,
    writes: Mutex<HashMap<String, WriteCounts>>,
    failures: Mutex<Vec<InjectedFailure>>,
    disabled_versions: HashSet<String>,
    bind_claims: bool,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            next_version: AtomicU64::new(1),
            writes: Mutex::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
            disabled_versions: HashSet::new(),
            bind_claims: true,
        }
    }

    /// Serve NotFound for every request against this apiVersion
    pub fn with_disabled_api_version(mut self, api_version: &str) -> Self {
        self.disabled_versions.insert(api_version.to_string());
        self
    }

    /// Leave created claims unbound
    pub fn without_claim_binding(mut self) -> Self {
        self.bind_claims = false;
        self
    }

    /// Fail the next `times` calls of `op` on `kind`
    pub fn fail_next(&self, op: MockOp, kind: &str, times: usize, error: InjectedError) {
        self.failures.lock().push(InjectedFailure {
            op,
            kind: kind.to_string(),
            remaining: times,
            error,
        });
    }

    /// Store an object directly, without counting it as a write
    pub async fn insert(&self, resource: &ApiResource, object: DynamicObject) -> DynamicObject {
        let mut object = object;
        let key = self.key(resource, object.namespace(), object.name());
        self.stamp_new(&mut object);
        self.objects.write().await.insert(key, object.clone());
        object
    }

    pub async fn insert_typed<T: Resource>(&self, resource: &T) -> Result<DynamicObject> {
        Ok(self.insert(&T::api_resource(), resource.to_dynamic()?).await)
    }

    /// Read an object without failure injection
    pub async fn object(&self, resource: &ApiResource, namespace: &str, name: &str) -> Option<DynamicObject> {
        let key = self.key(resource, namespace, name);
        self.objects.read().await.get(&key).cloned()
    }

    pub async fn object_typed<T: Resource>(&self, namespace: &str, name: &str) -> Option<T> {
        self.object(&T::api_resource(), namespace, name)
            .await
            .and_then(|o| o.to_typed().ok())
    }

    /// Number of stored objects of one kind
    pub async fn count(&self, resource: &ApiResource) -> usize {
        self.objects
            .read()
            .await
            .keys()
            .filter(|(g, p, _, _)| *g == resource.gvk.group && *p == resource.plural)
            .count()
    }

    pub fn writes_for(&self, kind: &str) -> WriteCounts {
        self.writes.lock().get(kind).copied().unwrap_or_default()
    }

    pub fn total_writes(&self) -> usize {
        self.writes.lock().values().map(WriteCounts::total).sum()
    }

    pub fn reset_write_counts(&self) {
        self.writes.lock().clear();
    }

    fn key(&self, resource: &ApiResource, namespace: &str, name: &str) -> StoreKey {
        let namespace = if resource.namespaced { namespace } else { "" };
        (
            resource.gvk.group.clone(),
            resource.plural.clone(),
            namespace.to_string(),
            name.to_string(),
        )
    }

    fn display_key(resource: &ApiResource, namespace: &str, name: &str) -> String {
        if resource.namespaced && !namespace.is_empty() {
            format!("{}/{}/{}", resource.gvk, namespace, name)
        } else {
            format!("{}/{}", resource.gvk, name)
        }
    }

    fn check(&self, op: MockOp, resource: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        if self.disabled_versions.contains(&resource.gvk.api_version()) {
            return Err(PortageError::resource_not_found(Self::display_key(resource, namespace, name)));
        }
        let mut failures = self.failures.lock();
        if let Some(idx) = failures
            .iter()
            .position(|f| f.op == op && f.kind == resource.gvk.kind && f.remaining > 0)
        {
            let failure = &mut failures[idx];
            failure.remaining -= 1;
            let err = failure.error.to_error(&Self::display_key(resource, namespace, name));
            if failure.remaining == 0 {
                failures.remove(idx);
            }
            debug!("Mock: injected {:?} failure for {}", op, resource.gvk.kind);
            return Err(err);
        }
        Ok(())
    }

    fn count_write(&self, kind: &str, op: MockOp) {
        let mut writes = self.writes.lock();
        let counts = writes.entry(kind.to_string()).or_default();
        match op {
            MockOp::Create => counts.creates += 1,
            MockOp::Update => counts.updates += 1,
            MockOp::Delete => counts.deletes += 1,
            MockOp::Get | MockOp::List => {}
        }
    }

    fn version(&self) -> String {
        self.next_version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn stamp_new(&self, object: &mut DynamicObject) {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let _ = object.set_path(&["metadata", "uid"], Value::String(uuid::Uuid::new_v4().to_string()));
        let _ = object.set_path(&["metadata", "creationTimestamp"], Value::String(now));
        object.set_resource_version(Some(self.version()));
        object.remove_path(&["metadata", "deletionTimestamp"]);
        if self.bind_claims && object.kind() == "PersistentVolumeClaim" {
            let _ = object.set_path(&["status", "phase"], Value::String("Bound".to_string()));
        }
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn get(&self, resource: &ApiResource, namespace: Option<&str>, name: &str) -> Result<DynamicObject> {
        let ns = namespace.unwrap_or_default();
        self.check(MockOp::Get, resource, ns, name)?;
        self.object(resource, ns, name)
            .await
            .ok_or_else(|| PortageError::resource_not_found(Self::display_key(resource, ns, name)))
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        self.check(MockOp::List, resource, namespace.unwrap_or_default(), "")?;
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|((g, p, ns, _), _)| {
                *g == resource.gvk.group
                    && *p == resource.plural
                    && namespace
                        .filter(|n| resource.namespaced && !n.is_empty())
                        .map(|n| ns.as_str() == n)
                        .unwrap_or(true)
            })
            .filter(|(_, obj)| {
                label_selector
                    .map(|s| selector_matches(s, &obj.labels()))
                    .unwrap_or(true)
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        let (ns, name) = (object.namespace(), object.name());
        self.check(MockOp::Create, resource, ns, name)?;
        if name.is_empty() {
            return Err(PortageError::invalid_resource(
                format!("{} has no name", resource.gvk.kind),
                "Set metadata.name",
            ));
        }
        let key = self.key(resource, ns, name);
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(PortageError::resource_already_exists(Self::display_key(resource, ns, name)));
        }
        let mut stored = object.clone();
        self.stamp_new(&mut stored);
        objects.insert(key, stored.clone());
        self.count_write(&resource.gvk.kind, MockOp::Create);
        debug!("Mock: created {}", Self::display_key(resource, ns, name));
        Ok(stored)
    }

    async fn update(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        let (ns, name) = (object.namespace(), object.name());
        self.check(MockOp::Update, resource, ns, name)?;
        let key = self.key(resource, ns, name);
        let mut objects = self.objects.write().await;
        let existing = objects
            .get(&key)
            .ok_or_else(|| PortageError::resource_not_found(Self::display_key(resource, ns, name)))?;

        if let Some(version) = object.resource_version() {
            if existing.resource_version() != Some(version) {
                return Err(PortageError::conflict(Self::display_key(resource, ns, name)));
            }
        }

        let mut stored = object.clone();
        for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
            match existing.get_path(&["metadata", field]) {
                Some(v) => {
                    let _ = stored.set_path(&["metadata", field], v.clone());
                }
                None => {
                    stored.remove_path(&["metadata", field]);
                }
            }
        }
        stored.set_resource_version(Some(self.version()));
        self.count_write(&resource.gvk.kind, MockOp::Update);

        if stored.is_deleting() && stored.finalizers().is_empty() {
            objects.remove(&key);
            debug!("Mock: finalized {}", Self::display_key(resource, ns, name));
        } else {
            objects.insert(key, stored.clone());
        }
        Ok(stored)
    }

    async fn delete(&self, resource: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()> {
        let ns = namespace.unwrap_or_default();
        self.check(MockOp::Delete, resource, ns, name)?;
        let key = self.key(resource, ns, name);
        let mut objects = self.objects.write().await;
        let existing = objects
            .get_mut(&key)
            .ok_or_else(|| PortageError::resource_not_found(Self::display_key(resource, ns, name)))?;

        if existing.finalizers().is_empty() {
            objects.remove(&key);
        } else if !existing.is_deleting() {
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
            existing.set_path(&["metadata", "deletionTimestamp"], Value::String(now))?;
        }
        self.count_write(&resource.gvk.kind, MockOp::Delete);
        debug!("Mock: deleted {}", Self::display_key(resource, ns, name));
        Ok(())
    }
}
