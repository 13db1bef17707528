use crate::error::{PortageError, Result};
use crate::types::{GroupVersionKind, ResourceKey};
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// An unstructured object as returned by the dynamic API
///
/// Collected manifests flow through preparation and apply in this form so that
/// custom kinds are handled the same way as built-in ones. Typed views are
/// obtained with [`DynamicObject::to_typed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DynamicObject(Value);

impl DynamicObject {
    /// Wrap a JSON value, which must be an object
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(PortageError::invalid_resource(
                "object manifest is not a JSON object",
                "Provide a manifest with apiVersion, kind and metadata",
            ));
        }
        Ok(Self(value))
    }

    /// Build an empty manifest for the given type
    pub fn new(gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Self {
        let mut metadata = Map::new();
        metadata.insert("name".to_string(), Value::String(name.to_string()));
        if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
            metadata.insert("namespace".to_string(), Value::String(ns.to_string()));
        }
        let mut root = Map::new();
        root.insert("apiVersion".to_string(), Value::String(gvk.api_version()));
        root.insert("kind".to_string(), Value::String(gvk.kind.clone()));
        root.insert("metadata".to_string(), Value::Object(metadata));
        Self(Value::Object(root))
    }

    /// Convert a typed resource into its unstructured form
    pub fn from_typed<T: Serialize>(resource: &T) -> Result<Self> {
        let value = serde_json::to_value(resource).map_err(|e| {
            PortageError::serialization_error(
                format!("Failed to convert resource to unstructured: {}", e),
                Some(Box::new(e)),
            )
        })?;
        Self::from_value(value)
    }

    /// Convert into a typed resource
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.0.clone()).map_err(|e| {
            PortageError::serialization_error(
                format!("Failed to convert {} {} from unstructured: {}", self.kind(), self.name(), e),
                Some(Box::new(e)),
            )
        })
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn api_version(&self) -> &str {
        self.0.get("apiVersion").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn kind(&self) -> &str {
        self.0.get("kind").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::from_api_version_kind(self.api_version(), self.kind())
    }

    /// metadata.name, or an empty string
    pub fn name(&self) -> &str {
        self.meta_str("name").unwrap_or_default()
    }

    /// metadata.namespace, or an empty string for cluster-scoped objects
    pub fn namespace(&self) -> &str {
        self.meta_str("namespace").unwrap_or_default()
    }

    pub fn uid(&self) -> Option<&str> {
        self.meta_str("uid")
    }

    pub fn resource_key(&self) -> ResourceKey {
        ResourceKey::new(self.gvk(), self.namespace(), self.name())
    }

    /// Check that the type and identity accessors are usable
    pub fn validate_meta(&self) -> Result<()> {
        if self.api_version().is_empty() || self.kind().is_empty() {
            return Err(PortageError::invalid_resource(
                "object has no apiVersion or kind",
                "Collected objects must carry their type information",
            ));
        }
        if self.name().is_empty() {
            return Err(PortageError::invalid_resource(
                format!("{} object has no metadata.name", self.kind()),
                "Collected objects must carry a name",
            ));
        }
        Ok(())
    }

    pub fn creation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.meta_str("creationTimestamp")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn is_deleting(&self) -> bool {
        self.meta_str("deletionTimestamp").is_some()
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.string_map(&["metadata", "annotations"])
    }

    pub fn set_annotations(&mut self, annotations: BTreeMap<String, String>) {
        self.set_string_map("annotations", annotations);
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.get_path(&["metadata", "annotations", key]).and_then(Value::as_str)
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.string_map(&["metadata", "labels"])
    }

    pub fn set_labels(&mut self, labels: BTreeMap<String, String>) {
        self.set_string_map("labels", labels);
    }

    pub fn finalizers(&self) -> Vec<String> {
        self.get_path(&["metadata", "finalizers"])
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_finalizers(&mut self, finalizers: Vec<String>) {
        let value = Value::Array(finalizers.into_iter().map(Value::String).collect());
        self.metadata_mut().insert("finalizers".to_string(), value);
    }

    pub fn owner_references(&self) -> Vec<OwnerReference> {
        self.get_path(&["metadata", "ownerReferences"])
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.meta_str("resourceVersion")
    }

    pub fn set_resource_version(&mut self, version: Option<String>) {
        match version {
            Some(v) => {
                self.metadata_mut().insert("resourceVersion".to_string(), Value::String(v));
            }
            None => {
                self.metadata_mut().remove("resourceVersion");
            }
        }
    }

    /// Drop the fields the server assigns so the object can be created elsewhere
    pub fn clear_server_fields(&mut self) {
        let meta = self.metadata_mut();
        for key in ["uid", "resourceVersion", "creationTimestamp", "generation", "managedFields"] {
            meta.remove(key);
        }
    }

    /// Look up a nested field
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(&self.0, |current, key| current.get(*key))
    }

    /// Mutable access to a nested field
    pub fn get_path_mut(&mut self, path: &[&str]) -> Option<&mut Value> {
        path.iter().try_fold(&mut self.0, |current, key| current.get_mut(*key))
    }

    /// Set a nested field, creating intermediate objects as needed
    pub fn set_path(&mut self, path: &[&str], value: Value) -> Result<()> {
        let Some((last, parents)) = path.split_last() else {
            return Err(PortageError::internal_error("empty field path"));
        };
        let mut current = &mut self.0;
        for key in parents {
            let map = current.as_object_mut().ok_or_else(|| {
                PortageError::invalid_resource(
                    format!("field {} is not an object", path.join(".")),
                    "Suspend and transform paths must traverse objects",
                )
            })?;
            current = map
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        let map = current.as_object_mut().ok_or_else(|| {
            PortageError::invalid_resource(
                format!("parent of {} is not an object", path.join(".")),
                "Suspend and transform paths must traverse objects",
            )
        })?;
        map.insert(last.to_string(), value);
        Ok(())
    }

    /// Remove a nested field, returning the previous value
    pub fn remove_path(&mut self, path: &[&str]) -> Option<Value> {
        let (last, parents) = path.split_last()?;
        self.get_path_mut(parents)?.as_object_mut()?.remove(*last)
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.0
            .get("metadata")
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        let root = ensure_object(&mut self.0);
        let meta = root
            .entry("metadata".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        ensure_object(meta)
    }

    fn string_map(&self, path: &[&str]) -> BTreeMap<String, String> {
        self.get_path(path)
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn set_string_map(&mut self, key: &str, map: BTreeMap<String, String>) {
        let value = Value::Object(map.into_iter().map(|(k, v)| (k, Value::String(v))).collect());
        self.metadata_mut().insert(key.to_string(), value);
    }
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

/// Split a dotted field path such as `spec.suspend`
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}
