//! Offline entity cache model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::EntityKey;

/// Last known server state of an entity, plus local edits not yet confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntity {
    pub entity_type: String,
    pub entity_id: String,
    /// Entity JSON as the device currently believes it to be
    pub data: Value,
    /// Version the next write should be submitted against
    pub version: i64,
    /// Last local mutation (Unix ms)
    pub local_updated_at: i64,
    /// Last time server state was written into the cache (Unix ms)
    pub synced_at: Option<i64>,
}

impl CachedEntity {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.entity_id.clone())
    }

    /// Whether local edits are waiting for server confirmation.
    pub fn has_local_changes(&self) -> bool {
        self.synced_at
            .map_or(true, |synced_at| self.local_updated_at > synced_at)
    }
}

/// Shallow-merge the top-level fields of `patch` into `base`.
///
/// Non-object values replace `base` entirely.
pub fn merge_json(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in patch_map {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (_, patch) => patch.clone(),
    }
}

/// Return `body` with its `version` field set to `version`.
pub fn with_version(body: &Value, version: i64) -> Value {
    let mut map = body.as_object().cloned().unwrap_or_default();
    map.insert("version".to_string(), Value::from(version));
    Value::Object(map)
}
