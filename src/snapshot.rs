//! In-memory cache of the last-applied body of every watched document.

use crate::error::Result;
use crate::store::DocumentStore;
use crate::types::{DocId, DocumentBody};
use std::collections::HashMap;

/// Last-applied snapshot per watched document.
///
/// Rebuilt in full at every boot by reading the store; never persisted.
/// Between events it mirrors the body most recently recorded in the sequence
/// log for each id, except during the window in which a single event is
/// being applied.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    bodies: HashMap<DocId, DocumentBody>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &DocId) -> Option<&DocumentBody> {
        self.bodies.get(id)
    }

    pub fn set(&mut self, id: DocId, body: DocumentBody) {
        self.bodies.insert(id, body);
    }

    pub fn remove(&mut self, id: &DocId) {
        self.bodies.remove(id);
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Fetch and cache the current body of every watchlist id. Documents
    /// that do not exist yet stay absent. Fetch failures propagate.
    pub fn bootstrap_all(&mut self, store: &dyn DocumentStore, ids: &[DocId]) -> Result<()> {
        for id in ids {
            match store.get(id, None)? {
                Some(body) => {
                    self.bodies.insert(id.clone(), body);
                }
                None => {
                    self.bodies.remove(id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, MemoryStore};
    use serde_json::{json, Value};

    fn body(value: Value) -> DocumentBody {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {}", other),
        }
    }

    #[test]
    fn test_set_get_remove() {
        let mut snapshot = SnapshotStore::new();
        let id = DocId::new("profile");

        assert!(snapshot.get(&id).is_none());

        snapshot.set(id.clone(), body(json!({"a": 1})));
        assert_eq!(snapshot.get(&id).unwrap()["a"], json!(1));

        snapshot.remove(&id);
        assert!(snapshot.get(&id).is_none());
    }

    #[test]
    fn test_bootstrap_all_fetches_existing_and_skips_missing() {
        let store = MemoryStore::new();
        store
            .put(&DocId::new("present"), body(json!({"x": 1})))
            .unwrap();

        let mut snapshot = SnapshotStore::new();
        snapshot
            .bootstrap_all(&store, &[DocId::new("present"), DocId::new("missing")])
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(&DocId::new("present")).unwrap()["x"], json!(1));
        assert!(snapshot.get(&DocId::new("missing")).is_none());
    }

    #[test]
    fn test_bootstrap_replaces_stale_entries() {
        let store = MemoryStore::new();
        let id = DocId::new("settings");
        store.put(&id, body(json!({"mode": "on"}))).unwrap();

        let mut snapshot = SnapshotStore::new();
        snapshot.set(id.clone(), body(json!({"mode": "stale"})));
        snapshot.bootstrap_all(&store, &[id.clone()]).unwrap();

        assert_eq!(snapshot.get(&id).unwrap()["mode"], json!("on"));
    }
}
