// In-process document store for tests and single-process runs
use crate::store::{document_id, matches, DocumentStore, InsertOutcome, DEFAULT_INLINE_LIMIT};
use fuzzrec_core::{Result, Selector};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Default)]
struct Collection {
    docs: BTreeMap<String, Value>,
    indexes: BTreeSet<String>,
}

pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
    inline_limit: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_inline_limit(DEFAULT_INLINE_LIMIT)
    }

    pub fn with_inline_limit(inline_limit: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            inline_limit,
        }
    }

    pub fn indexes(&self, collection: &str) -> BTreeSet<String> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn insert(&self, collection: &str, doc: Value) -> Result<InsertOutcome> {
        let id = document_id(&doc)?.to_string();
        let mut collections = self.collections.write();
        let docs = &mut collections.entry(collection.to_string()).or_default().docs;
        if docs.contains_key(&id) {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        docs.insert(id, doc);
        Ok(InsertOutcome::Inserted)
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.docs.get(id))
            .cloned())
    }

    fn scan(
        &self,
        collection: &str,
        selector: &Selector,
        visit: &mut dyn FnMut(Value) -> Result<bool>,
    ) -> Result<()> {
        // Snapshot so visitors may write to the store.
        let snapshot: Vec<Value> = match self.collections.read().get(collection) {
            Some(c) => c.docs.values().filter(|d| matches(selector, d)).cloned().collect(),
            None => return Ok(()),
        };
        for doc in snapshot {
            if !visit(doc)? {
                break;
            }
        }
        Ok(())
    }

    fn pop_one(&self, collection: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .write()
            .get_mut(collection)
            .and_then(|c| c.docs.pop_first())
            .map(|(_, doc)| doc))
    }

    fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        Ok(self
            .collections
            .write()
            .get_mut(collection)
            .map(|c| c.docs.remove(id).is_some())
            .unwrap_or(false))
    }

    fn create_index(&self, collection: &str, fields: &[String]) -> Result<()> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .indexes
            .extend(fields.iter().cloned());
        Ok(())
    }

    fn drop_collection(&self, collection: &str) -> Result<()> {
        self.collections.write().remove(collection);
        Ok(())
    }

    fn inline_limit(&self) -> usize {
        self.inline_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_group_distinct_omits_missing_members() {
        let store = MemoryStore::new();
        store.insert("u", json!({"_id": "1", "STATE": "CA", "ZIP": "1"})).unwrap();
        store.insert("u", json!({"_id": "2", "STATE": "CA", "ZIP": "1"})).unwrap();
        store.insert("u", json!({"_id": "3", "STATE": "NY"})).unwrap();

        let groups = store
            .group_distinct("u", &["STATE".to_string(), "ZIP".to_string()])
            .unwrap();
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().any(|g| g.len() == 1 && g["STATE"] == "NY"));
    }

    #[test]
    fn test_pop_drains_in_id_order() {
        let store = MemoryStore::new();
        store.insert_many("q", vec![json!({"_id": "b"}), json!({"_id": "a"})]).unwrap();
        assert_eq!(store.pop_one("q").unwrap().unwrap()["_id"], "a");
        assert_eq!(store.pop_one("q").unwrap().unwrap()["_id"], "b");
        assert!(store.pop_one("q").unwrap().is_none());
    }
}
