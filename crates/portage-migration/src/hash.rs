use portage_core::annotations::{
    ContentHash, MIGRATED, MIGRATION_NAME, MIGRATION_NAMESPACE, MIGRATION_TIME, RESOURCE_HASH,
};
use portage_core::DynamicObject;
use serde_json::Value;
use xxhash_rust::xxh3::xxh3_64;

/// Annotations that change between runs without the content changing
const VOLATILE_ANNOTATIONS: [&str; 5] = [
    MIGRATED,
    MIGRATION_NAME,
    MIGRATION_NAMESPACE,
    MIGRATION_TIME,
    RESOURCE_HASH,
];

/// Fingerprint of an object's content
///
/// Server-assigned metadata and the migration markers are left out, so the
/// same source manifest always yields the same hash no matter which run
/// collected it.
pub fn content_hash(object: &DynamicObject) -> ContentHash {
    let mut normalized = object.clone();
    normalized.clear_server_fields();
    normalized.remove_path(&["status"]);

    let mut annotations = normalized.annotations();
    if !annotations.is_empty() {
        for key in VOLATILE_ANNOTATIONS {
            annotations.remove(key);
        }
        if annotations.is_empty() {
            normalized.remove_path(&["metadata", "annotations"]);
        } else {
            normalized.set_annotations(annotations);
        }
    }

    let mut canonical = String::new();
    write_canonical(normalized.as_value(), &mut canonical);
    ContentHash(xxh3_64(canonical.as_bytes()))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
