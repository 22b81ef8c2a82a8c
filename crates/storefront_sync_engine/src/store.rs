//! Authoritative store abstraction used by optimistic mutations.

use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use storefront_sync_protocol::{EntityRef, EntityType};

/// The system of record for storefront rows.
pub trait AuthoritativeStore: Send + Sync {
    /// Reads a row.
    fn read(&self, entity: EntityType, key: &str) -> SyncResult<Value>;

    /// Writes a row. Object values are merged into the existing row field by
    /// field; other values replace it.
    fn write(&self, entity: EntityType, key: &str, value: &Value) -> SyncResult<()>;
}

/// An in-memory authoritative store for testing.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<EntityRef, Value>>,
    fail_reads: RwLock<Option<String>>,
    fail_writes: RwLock<Option<String>>,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a row.
    pub fn insert(&self, entity: EntityType, key: impl Into<String>, row: Value) {
        self.rows.write().insert(EntityRef::new(entity, key), row);
    }

    /// Returns a copy of a row.
    pub fn get(&self, entity: EntityType, key: &str) -> Option<Value> {
        self.rows.read().get(&EntityRef::new(entity, key)).cloned()
    }

    /// Makes reads fail with `message` (`None` restores them).
    pub fn set_fail_reads(&self, message: Option<&str>) {
        *self.fail_reads.write() = message.map(str::to_string);
    }

    /// Makes writes fail with `message` (`None` restores them).
    pub fn set_fail_writes(&self, message: Option<&str>) {
        *self.fail_writes.write() = message.map(str::to_string);
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl AuthoritativeStore for MemoryStore {
    fn read(&self, entity: EntityType, key: &str) -> SyncResult<Value> {
        if let Some(message) = self.fail_reads.read().clone() {
            return Err(SyncError::Store(message));
        }
        self.get(entity, key)
            .ok_or_else(|| SyncError::Store(format!("{} not found", EntityRef::new(entity, key))))
    }

    fn write(&self, entity: EntityType, key: &str, value: &Value) -> SyncResult<()> {
        if let Some(message) = self.fail_writes.read().clone() {
            return Err(SyncError::Store(message));
        }
        let mut rows = self.rows.write();
        let row = rows
            .entry(EntityRef::new(entity, key))
            .or_insert_with(|| Value::Object(Default::default()));
        match (row.as_object_mut(), value.as_object()) {
            (Some(existing), Some(fields)) => {
                for (k, v) in fields {
                    existing.insert(k.clone(), v.clone());
                }
            }
            _ => *row = value.clone(),
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_merges_fields() {
        let store = MemoryStore::new();
        store.insert(EntityType::Product, "p1", json!({"id": "p1", "name": "Lamp", "stock": 2}));

        store
            .write(EntityType::Product, "p1", &json!({"stock": 1}))
            .unwrap();
        assert_eq!(
            store.read(EntityType::Product, "p1").unwrap(),
            json!({"id": "p1", "name": "Lamp", "stock": 1})
        );
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn missing_rows_and_injected_failures() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.read(EntityType::Order, "nope"),
            Err(SyncError::Store(_))
        ));

        store.insert(EntityType::Order, "o1", json!({"status": "pending"}));
        store.set_fail_writes(Some("read-only replica"));
        let err = store
            .write(EntityType::Order, "o1", &json!({"status": "paid"}))
            .unwrap_err();
        assert_eq!(err, SyncError::Store("read-only replica".into()));
        assert_eq!(store.get(EntityType::Order, "o1").unwrap()["status"], "pending");

        store.set_fail_reads(Some("timeout"));
        assert!(store.read(EntityType::Order, "o1").is_err());
        store.set_fail_reads(None);
        assert!(store.read(EntityType::Order, "o1").is_ok());
    }
}
