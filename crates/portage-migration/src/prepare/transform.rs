use crate::error::{MigrationError, Result};
use portage_core::annotations::TRANSFORMED_RESOURCE_NAME;
use portage_core::resources::{
    ResourcePath, ResourceTransformation, TransformOperation, TransformSpec, TransformValueType,
};
use portage_core::{split_path, ClusterApi, DynamicObject};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Transform rules of one ResourceTransformation, per namespace
#[derive(Debug, Clone, Default)]
pub struct TransformSet {
    by_namespace: BTreeMap<String, Vec<TransformSpec>>,
}

impl TransformSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Read the named ResourceTransformation from every namespace
    pub async fn load(source: &dyn ClusterApi, name: &str, namespaces: &[String]) -> Result<Self> {
        let mut by_namespace = BTreeMap::new();
        for namespace in namespaces {
            let transform = source
                .get_typed::<ResourceTransformation>(Some(namespace), name)
                .await?;
            by_namespace.insert(namespace.clone(), transform.spec.objects);
        }
        Ok(Self { by_namespace })
    }

    pub fn is_empty(&self) -> bool {
        self.by_namespace.values().all(Vec::is_empty)
    }

    /// Specs that apply to the given object's namespace and kind
    pub fn specs_for<'a>(&'a self, object: &DynamicObject) -> Vec<&'a TransformSpec> {
        let Some(specs) = self.by_namespace.get(object.namespace()) else {
            return Vec::new();
        };
        specs
            .iter()
            .filter(|spec| spec.gvk().map(|g| g.kind == object.kind()).unwrap_or(false))
            .collect()
    }

    /// Apply every matching spec; returns whether the object was changed
    pub fn apply(&self, object: &mut DynamicObject) -> Result<bool> {
        let mut transformed = false;
        for spec in self.specs_for(object) {
            transformed |= apply_transform(object, spec)?;
        }
        Ok(transformed)
    }
}

/// Apply one transform spec if its selectors match the object
pub fn apply_transform(object: &mut DynamicObject, spec: &TransformSpec) -> Result<bool> {
    let labels = object.labels();
    if !spec.selectors.iter().all(|(k, v)| labels.get(k) == Some(v)) {
        return Ok(false);
    }

    for path in &spec.paths {
        apply_path(object, path)?;
    }

    let name = object.name().to_string();
    let mut annotations = object.annotations();
    annotations.insert(TRANSFORMED_RESOURCE_NAME.to_string(), name);
    object.set_annotations(annotations);
    debug!(
        "Transformed {} {}/{} with {} path(s)",
        object.kind(),
        object.namespace(),
        object.name(),
        spec.paths.len()
    );
    Ok(true)
}

fn apply_path(object: &mut DynamicObject, path: &ResourcePath) -> Result<()> {
    let fields = split_path(&path.path);
    if fields.is_empty() {
        return Err(invalid(path, "empty path"));
    }

    match path.operation {
        TransformOperation::Delete => {
            match path.type_ {
                TransformValueType::Keypair => {
                    if let Some(map) = object.get_path_mut(&fields).and_then(Value::as_object_mut) {
                        for key in parse_keypair(path)?.keys() {
                            map.remove(key);
                        }
                    }
                }
                TransformValueType::Slice => {
                    let remove = parse_slice(&path.value);
                    if let Some(items) = object.get_path_mut(&fields).and_then(Value::as_array_mut) {
                        items.retain(|item| !remove.contains(item));
                    }
                }
                _ => {
                    object.remove_path(&fields);
                }
            }
            Ok(())
        }
        TransformOperation::Add => {
            let value = parse_value(path)?;
            let merged = match (object.get_path(&fields), value) {
                (Some(Value::Array(existing)), Value::Array(extra)) => {
                    let mut items = existing.clone();
                    items.extend(extra);
                    Value::Array(items)
                }
                (Some(Value::Object(existing)), Value::Object(extra)) => {
                    let mut map = existing.clone();
                    map.extend(extra);
                    Value::Object(map)
                }
                (_, value) => value,
            };
            object.set_path(&fields, merged)?;
            Ok(())
        }
        TransformOperation::Modify => {
            object.set_path(&fields, parse_value(path)?)?;
            Ok(())
        }
    }
}

fn parse_value(path: &ResourcePath) -> Result<Value> {
    match path.type_ {
        TransformValueType::String => Ok(Value::String(path.value.clone())),
        TransformValueType::Int => path
            .value
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| invalid(path, &e.to_string())),
        TransformValueType::Bool => path
            .value
            .trim()
            .parse::<bool>()
            .map(Value::Bool)
            .map_err(|e| invalid(path, &e.to_string())),
        TransformValueType::Slice => Ok(Value::Array(parse_slice(&path.value))),
        TransformValueType::Keypair => Ok(Value::Object(parse_keypair(path)?)),
    }
}

fn parse_slice(value: &str) -> Vec<Value> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Value::String(s.to_string()))
        .collect()
}

fn parse_keypair(path: &ResourcePath) -> Result<Map<String, Value>> {
    path.value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => Ok((k.trim().to_string(), Value::String(v.trim().to_string()))),
            None if path.operation == TransformOperation::Delete => {
                Ok((pair.to_string(), Value::Null))
            }
            None => Err(invalid(path, &format!("'{}' is not a key=value pair", pair))),
        })
        .collect()
}

fn invalid(path: &ResourcePath, reason: &str) -> MigrationError {
    MigrationError::invalid_migration(
        format!("cannot apply transform path {}: {}", path.path, reason),
        "Fix the ResourceTransformation spec",
    )
}
