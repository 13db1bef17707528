use crate::error::{MigrationError, Result};
use portage_core::annotations::SuspendStash;
use portage_core::resources::SuspendOptions;
use portage_core::{split_path, DynamicObject};
use serde_json::Value;

/// Suspend a registered custom resource through its suspend paths
///
/// Each path records `current,suspend` in an annotation keyed by the path.
/// Like workload replicas, the recorded current value is only carried
/// forward when the live value already equals the suspended one.
pub fn prepare_custom_suspend(
    object: &mut DynamicObject,
    options: &[SuspendOptions],
    start_applications: bool,
) -> Result<()> {
    if options.is_empty() {
        return Ok(());
    }
    let mut annotations = object.annotations();

    for suspend in options {
        let fields = split_path(&suspend.path);
        if fields.len() < 2 {
            continue;
        }
        let stash = SuspendStash::read(&annotations, &suspend.path);

        let (current, disabled) = match suspend.type_.as_str() {
            "bool" => {
                let disabled = suspend.value.parse::<bool>().unwrap_or(true);
                (String::new(), Value::Bool(disabled))
            }
            "int" => {
                let mut current = object
                    .get_path(&fields)
                    .and_then(Value::as_i64)
                    .ok_or_else(|| missing_path(object, &suspend.path))?;
                if current == 0 {
                    let stashed = stash
                        .as_ref()
                        .map(|s| {
                            s.current.parse::<i64>().map_err(|e| {
                                MigrationError::invalid_migration(
                                    format!("invalid suspend annotation for {}: {}", suspend.path, e),
                                    "Remove the stale suspend annotation from the source object",
                                )
                            })
                        })
                        .transpose()?;
                    if let Some(stashed) = stashed.filter(|v| *v > 0) {
                        current = stashed;
                        object.set_path(&fields, Value::from(current))?;
                    }
                }
                (current.to_string(), Value::from(0))
            }
            "string" => {
                let mut current = object
                    .get_path(&fields)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if current == suspend.value {
                    if let Some(stashed) = stash.as_ref().filter(|s| !s.current.is_empty()) {
                        current = stashed.current.clone();
                        object.set_path(&fields, Value::String(current.clone()))?;
                    }
                }
                (current, Value::String(suspend.value.clone()))
            }
            other => {
                return Err(MigrationError::invalid_migration(
                    format!("invalid type {} to suspend cr", other),
                    "Suspend option types are bool, int or string",
                ))
            }
        };

        if start_applications {
            return Ok(());
        }

        object.set_path(&fields, disabled)?;
        SuspendStash {
            current,
            suspend: suspend.value.clone(),
        }
        .write(&mut annotations, &suspend.path);
    }

    if start_applications {
        return Ok(());
    }
    object.set_annotations(annotations);
    Ok(())
}

fn missing_path(object: &DynamicObject, path: &str) -> MigrationError {
    MigrationError::invalid_migration(
        format!(
            "unable to find suspend path {} in {} {}/{}",
            path,
            object.kind(),
            object.namespace(),
            object.name()
        ),
        "Check the suspend options of the ApplicationRegistration",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn option(path: &str, type_: &str, value: &str) -> SuspendOptions {
        SuspendOptions {
            path: path.to_string(),
            type_: type_.to_string(),
            value: value.to_string(),
        }
    }

    fn cluster(spec: Value, annotations: Value) -> DynamicObject {
        DynamicObject::from_value(json!({
            "apiVersion": "couchbase.com/v2",
            "kind": "CouchbaseCluster",
            "metadata": {"name": "cb", "namespace": "app1", "annotations": annotations},
            "spec": spec
        }))
        .unwrap()
    }

    #[test]
    fn test_bool_suspend() {
        let mut obj = cluster(json!({"paused": false}), json!({}));
        prepare_custom_suspend(&mut obj, &[option("spec.paused", "bool", "true")], false).unwrap();

        assert_eq!(obj.get_path(&["spec", "paused"]), Some(&json!(true)));
        assert_eq!(obj.annotation("portage.io/spec.paused"), Some(",true"));
    }

    #[test]
    fn test_int_suspend_carries_forward() {
        let mut obj = cluster(json!({"size": 3}), json!({}));
        prepare_custom_suspend(&mut obj, &[option("spec.size", "int", "0")], false).unwrap();
        assert_eq!(obj.get_path(&["spec", "size"]), Some(&json!(0)));
        assert_eq!(obj.annotation("portage.io/spec.size"), Some("3,0"));

        // Re-preparing the already suspended object keeps the original size
        prepare_custom_suspend(&mut obj, &[option("spec.size", "int", "0")], false).unwrap();
        assert_eq!(obj.annotation("portage.io/spec.size"), Some("3,0"));
    }

    #[test]
    fn test_int_suspend_requires_path() {
        let mut obj = cluster(json!({}), json!({}));
        assert!(prepare_custom_suspend(&mut obj, &[option("spec.size", "int", "0")], false).is_err());
    }

    #[test]
    fn test_string_suspend_with_start_applications() {
        let mut obj = cluster(
            json!({"state": "stopped"}),
            json!({"portage.io/spec.state": "running,stopped"}),
        );
        prepare_custom_suspend(&mut obj, &[option("spec.state", "string", "stopped")], true).unwrap();
        assert_eq!(obj.get_path(&["spec", "state"]), Some(&json!("running")));
    }

    #[test]
    fn test_unknown_type_and_short_paths() {
        let mut obj = cluster(json!({"x": 1}), json!({}));
        assert!(prepare_custom_suspend(&mut obj, &[option("spec.x", "float", "0")], false).is_err());

        prepare_custom_suspend(&mut obj, &[option("paused", "bool", "true")], false).unwrap();
        assert!(obj.get_path(&["paused"]).is_none());
    }
}
