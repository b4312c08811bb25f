//! `json://` backed `PersistentStorage` (spec.md §6: "json stores two
//! top-level keys, `Global` and `Segments`, each mapping to namespaces").
//! `pickle://` is not implemented by this driver: it's a Python-specific
//! wire format with no idiomatic Rust equivalent worth adding a dependency
//! for, and every protocol's round-trip contract is otherwise identical.

use pmml_eval::host::{Namespace, PersistentStorage, StorageSnapshot};
use serde_json::{Map, Value};
use std::path::PathBuf;

pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(address: &str) -> Self {
        JsonFileStorage { path: PathBuf::from(address) }
    }
}

fn namespace_to_json(ns: &Namespace) -> Value {
    Value::Object(ns.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect())
}

fn json_to_namespace(value: &Value) -> Namespace {
    value
        .as_object()
        .map(|obj| obj.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
        .unwrap_or_default()
}

fn snapshot_to_json(snapshot: &StorageSnapshot) -> Value {
    let mut segments = Map::new();
    for (id, ns) in &snapshot.segments {
        segments.insert(id.clone(), namespace_to_json(ns));
    }
    let mut root = Map::new();
    root.insert("Global".to_string(), namespace_to_json(&snapshot.global));
    root.insert("Segments".to_string(), Value::Object(segments));
    Value::Object(root)
}

fn json_to_snapshot(value: &Value) -> StorageSnapshot {
    let global = value.get("Global").map(json_to_namespace).unwrap_or_default();
    let segments = value
        .get("Segments")
        .and_then(Value::as_object)
        .map(|obj| obj.iter().map(|(id, ns)| (id.clone(), json_to_namespace(ns))).collect())
        .unwrap_or_default();
    StorageSnapshot { global, segments }
}

impl PersistentStorage for JsonFileStorage {
    fn load(&mut self) -> StorageSnapshot {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|text| serde_json::from_str::<Value>(&text).ok())
            .map(|v| json_to_snapshot(&v))
            .unwrap_or_default()
    }

    fn save(&mut self, snapshot: &StorageSnapshot) {
        let text = match serde_json::to_string_pretty(&snapshot_to_json(snapshot)) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(path = %self.path.display(), %err, "failed to serialize persistent storage snapshot");
                return;
            }
        };
        if let Err(err) = std::fs::write(&self.path, text) {
            tracing::error!(path = %self.path.display(), %err, "failed to write persistent storage snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn round_trips_global_and_segment_namespaces() {
        let mut segments = HashMap::new();
        let mut seg_ns = HashMap::new();
        seg_ns.insert("splitCount".to_string(), "42".to_string());
        segments.insert("west".to_string(), seg_ns);

        let mut global = HashMap::new();
        global.insert("version".to_string(), "1".to_string());

        let snapshot = StorageSnapshot { global, segments };
        let json = snapshot_to_json(&snapshot);
        let restored = json_to_snapshot(&json);

        assert_eq!(restored.global.get("version"), Some(&"1".to_string()));
        assert_eq!(restored.segments["west"].get("splitCount"), Some(&"42".to_string()));
    }
}
