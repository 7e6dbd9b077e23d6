//! Named object storage on top of a [`DocumentStore`].
//!
//! Objects are addressed by a caller-chosen name; the document id is the hash
//! of that name. Objects whose JSON form fits the store's inline limit are
//! stored inline, larger ones are bincode-encoded into the [`BlobStore`] and the
//! document keeps only the blob reference.

use crate::blob::BlobStore;
use crate::store::{DocumentStore, InsertOutcome};
use fuzzrec_core::{name_hash, Error, Result, ID_KEY};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

const INLINE_KEY: &str = "inline";
const BLOB_KEY: &str = "blob";

pub struct ObjectBroker {
    store: Arc<dyn DocumentStore>,
    collection: String,
    blobs: BlobStore,
}

impl ObjectBroker {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>, blobs: BlobStore) -> Self {
        Self {
            store,
            collection: collection.into(),
            blobs,
        }
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.store.get(&self.collection, &name_hash(name))?.is_some())
    }

    /// Store `object` under `name` unless one is already there.
    pub fn upload<T: Serialize>(&self, name: &str, object: &T) -> Result<InsertOutcome> {
        let id = name_hash(name);
        if self.store.get(&self.collection, &id)?.is_some() {
            return Ok(InsertOutcome::AlreadyPresent);
        }

        let value = serde_json::to_value(object)?;
        let size = serde_json::to_vec(&value)?.len();
        if size <= self.store.inline_limit() {
            let doc = json!({ ID_KEY: id, "name": name, INLINE_KEY: value });
            return self.store.insert(&self.collection, doc);
        }

        let bytes = bincode::serialize(object).map_err(|e| Error::Serialization(e.to_string()))?;
        let blob_id = self.blobs.put(&bytes)?;
        let doc = json!({ ID_KEY: id, "name": name, BLOB_KEY: blob_id, "size": bytes.len() });
        let outcome = self.store.insert(&self.collection, doc)?;
        if outcome == InsertOutcome::AlreadyPresent {
            // lost a race with another uploader
            self.blobs.delete(&blob_id)?;
        }
        Ok(outcome)
    }

    pub fn download<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let Some(mut doc) = self.store.get(&self.collection, &name_hash(name))? else {
            return Err(Error::NotFound(format!("object {}", name)));
        };
        if let Some(inline) = doc.get_mut(INLINE_KEY) {
            return Ok(serde_json::from_value(inline.take())?);
        }
        let blob_id = doc
            .get(BLOB_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Storage(format!("object {} has no payload", name)))?;
        let bytes = self.blobs.get(blob_id)?;
        bincode::deserialize(&bytes).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Drop every object and blob.
    pub fn purge(&self) -> Result<()> {
        self.store.drop_collection(&self.collection)?;
        self.blobs.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        name: String,
        values: Vec<u64>,
    }

    fn payload() -> Payload {
        Payload {
            name: "shard".to_string(),
            values: (0..64).collect(),
        }
    }

    #[test]
    fn test_inline_upload_and_download() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let broker = ObjectBroker::new(store.clone(), "broker", BlobStore::new(dir.path()));

        assert!(!broker.exists("a").unwrap());
        assert_eq!(broker.upload("a", &payload()).unwrap(), InsertOutcome::Inserted);
        assert_eq!(broker.upload("a", &payload()).unwrap(), InsertOutcome::AlreadyPresent);
        assert_eq!(broker.download::<Payload>("a").unwrap(), payload());
        let doc = store.get("broker", &name_hash("a")).unwrap().unwrap();
        assert!(doc.get(INLINE_KEY).is_some());
    }

    #[test]
    fn test_large_objects_spill_to_blobs() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::with_inline_limit(32));
        let broker = ObjectBroker::new(store.clone(), "broker", BlobStore::new(dir.path()));

        broker.upload("big", &payload()).unwrap();
        let doc = store.get("broker", &name_hash("big")).unwrap().unwrap();
        assert!(doc.get(BLOB_KEY).is_some());
        assert_eq!(broker.download::<Payload>("big").unwrap(), payload());

        broker.purge().unwrap();
        assert!(matches!(broker.download::<Payload>("big"), Err(Error::NotFound(_))));
    }
}
