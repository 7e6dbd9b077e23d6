// LMDB-backed document store
use crate::store::{document_id, indexed_values, matches, DocumentStore, InsertOutcome, DEFAULT_INLINE_LIMIT};
use anyhow::Context;
use fuzzrec_core::{content_hash, Error, Result, Selector};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const DB_DOCUMENTS: &str = "documents";
const DB_INDEXES: &str = "indexes";
const DB_META: &str = "meta";
const SEP: char = '\u{1f}';

/// Location and limits of the on-disk store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// LMDB map size in bytes.
    pub map_size: usize,
    /// Serialized objects above this size go to the blob store.
    pub inline_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            map_size: 16 * 1024 * 1024 * 1024, // 16GB
            inline_limit: DEFAULT_INLINE_LIMIT,
        }
    }
}

impl StoreConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn lmdb_dir(&self) -> PathBuf {
        self.data_dir.join("lmdb")
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

/// Documents keyed `collection<US>id`, index entries keyed
/// `collection<US>field<US>hash(value)<US>id`, index specs in the meta database.
pub struct LmdbStore {
    env: Env,
    documents_db: Database<Str, Bytes>,
    indexes_db: Database<Str, Bytes>,
    meta_db: Database<Str, Bytes>,
    inline_limit: usize,
}

fn storage_err(e: anyhow::Error) -> Error {
    Error::Storage(format!("{:#}", e))
}

fn doc_key(collection: &str, id: &str) -> String {
    format!("{}{}{}", collection, SEP, id)
}

fn collection_prefix(collection: &str) -> String {
    format!("{}{}", collection, SEP)
}

/// Values are keyed by digest; LMDB keys are capped at 511 bytes.
fn index_prefix(collection: &str, field: &str, value: &str) -> String {
    format!(
        "{}{SEP}{}{SEP}{}{SEP}",
        collection,
        field,
        content_hash(std::iter::once(value))
    )
}

fn index_spec_key(collection: &str) -> String {
    format!("index{}{}", SEP, collection)
}

impl LmdbStore {
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::open_at(config.lmdb_dir(), config.map_size, config.inline_limit).map_err(storage_err)
    }

    fn open_at<P: AsRef<Path>>(path: P, map_size: usize, inline_limit: usize) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&path)
            .with_context(|| format!("creating {}", path.as_ref().display()))?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(4)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let documents_db = env.create_database(&mut wtxn, Some(DB_DOCUMENTS))?;
        let indexes_db = env.create_database(&mut wtxn, Some(DB_INDEXES))?;
        let meta_db = env.create_database(&mut wtxn, Some(DB_META))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            documents_db,
            indexes_db,
            meta_db,
            inline_limit,
        })
    }

    fn index_spec(&self, txn: &RoTxn, collection: &str) -> anyhow::Result<BTreeSet<String>> {
        match self.meta_db.get(txn, &index_spec_key(collection))? {
            Some(bytes) => Ok(serde_json::from_slice(bytes)?),
            None => Ok(BTreeSet::new()),
        }
    }

    fn prefix_keys(&self, db: Database<Str, Bytes>, txn: &RoTxn, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in db.prefix_iter(txn, prefix)? {
            let (key, _) = entry?;
            keys.push(key.to_string());
        }
        Ok(keys)
    }

    fn put_index_entries(&self, wtxn: &mut RwTxn, collection: &str, fields: &BTreeSet<String>, doc: &Value) -> anyhow::Result<()> {
        let id = document_id(doc).map_err(|e| anyhow::anyhow!(e))?;
        for (field, value) in indexed_values(doc, fields) {
            let key = format!("{}{}", index_prefix(collection, field, value), id);
            self.indexes_db.put(wtxn, &key, &[])?;
        }
        Ok(())
    }

    fn remove_document(&self, wtxn: &mut RwTxn, collection: &str, id: &str) -> anyhow::Result<Option<Value>> {
        let key = doc_key(collection, id);
        let doc: Value = match self.documents_db.get(wtxn, &key)? {
            Some(bytes) => serde_json::from_slice(bytes)?,
            None => return Ok(None),
        };
        let fields = self.index_spec(wtxn, collection)?;
        for (field, value) in indexed_values(&doc, &fields) {
            let index_key = format!("{}{}", index_prefix(collection, field, value), id);
            self.indexes_db.delete(wtxn, &index_key)?;
        }
        self.documents_db.delete(wtxn, &key)?;
        Ok(Some(doc))
    }

    fn try_insert(&self, collection: &str, doc: &Value) -> anyhow::Result<InsertOutcome> {
        let id = document_id(doc).map_err(|e| anyhow::anyhow!(e))?;
        let key = doc_key(collection, id);
        let mut wtxn = self.env.write_txn()?;
        if self.documents_db.get(&wtxn, &key)?.is_some() {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        let bytes = serde_json::to_vec(doc)?;
        self.documents_db.put(&mut wtxn, &key, &bytes)?;
        let fields = self.index_spec(&wtxn, collection)?;
        self.put_index_entries(&mut wtxn, collection, &fields, doc)?;
        wtxn.commit()?;
        Ok(InsertOutcome::Inserted)
    }

    fn try_scan(
        &self,
        collection: &str,
        selector: &Selector,
        visit: &mut dyn FnMut(Value) -> Result<bool>,
    ) -> anyhow::Result<Result<()>> {
        let rtxn = self.env.read_txn()?;
        let fields = self.index_spec(&rtxn, collection)?;

        // An indexed selector member narrows the scan to its posting list.
        if let Some((field, value)) = selector.iter().find(|(f, _)| fields.contains(*f)) {
            let prefix = index_prefix(collection, field, value);
            let ids: Vec<String> = self
                .prefix_keys(self.indexes_db, &rtxn, &prefix)?
                .into_iter()
                .map(|key| key[prefix.len()..].to_string())
                .collect();
            for id in ids {
                let Some(bytes) = self.documents_db.get(&rtxn, &doc_key(collection, &id))? else {
                    continue;
                };
                let doc: Value = serde_json::from_slice(bytes)?;
                if matches(selector, &doc) {
                    match visit(doc) {
                        Ok(true) => {}
                        Ok(false) => return Ok(Ok(())),
                        Err(e) => return Ok(Err(e)),
                    }
                }
            }
            return Ok(Ok(()));
        }

        for entry in self.documents_db.prefix_iter(&rtxn, &collection_prefix(collection))? {
            let (_, bytes) = entry?;
            let doc: Value = serde_json::from_slice(bytes)?;
            if matches(selector, &doc) {
                match visit(doc) {
                    Ok(true) => {}
                    Ok(false) => return Ok(Ok(())),
                    Err(e) => return Ok(Err(e)),
                }
            }
        }
        Ok(Ok(()))
    }

    fn try_pop(&self, collection: &str) -> anyhow::Result<Option<Value>> {
        let prefix = collection_prefix(collection);
        let mut wtxn = self.env.write_txn()?;
        let first = match self.documents_db.prefix_iter(&wtxn, &prefix)?.next() {
            Some(entry) => entry?.0[prefix.len()..].to_string(),
            None => return Ok(None),
        };
        let doc = self.remove_document(&mut wtxn, collection, &first)?;
        wtxn.commit()?;
        Ok(doc)
    }

    fn try_create_index(&self, collection: &str, new_fields: &[String]) -> anyhow::Result<()> {
        let mut wtxn = self.env.write_txn()?;
        let mut fields = self.index_spec(&wtxn, collection)?;
        let added: BTreeSet<String> = new_fields
            .iter()
            .filter(|f| !fields.contains(*f))
            .cloned()
            .collect();
        if added.is_empty() {
            return Ok(());
        }

        // backfill existing documents
        let mut docs = Vec::new();
        for entry in self.documents_db.prefix_iter(&wtxn, &collection_prefix(collection))? {
            let (_, bytes) = entry?;
            docs.push(serde_json::from_slice::<Value>(bytes)?);
        }
        for doc in &docs {
            self.put_index_entries(&mut wtxn, collection, &added, doc)?;
        }

        fields.extend(added);
        let spec = serde_json::to_vec(&fields)?;
        self.meta_db.put(&mut wtxn, &index_spec_key(collection), &spec)?;
        wtxn.commit()?;
        Ok(())
    }

    fn try_drop(&self, collection: &str) -> anyhow::Result<()> {
        let prefix = collection_prefix(collection);
        let mut wtxn = self.env.write_txn()?;
        for key in self.prefix_keys(self.documents_db, &wtxn, &prefix)? {
            self.documents_db.delete(&mut wtxn, &key)?;
        }
        for key in self.prefix_keys(self.indexes_db, &wtxn, &prefix)? {
            self.indexes_db.delete(&mut wtxn, &key)?;
        }
        self.meta_db.delete(&mut wtxn, &index_spec_key(collection))?;
        wtxn.commit()?;
        Ok(())
    }
}

impl DocumentStore for LmdbStore {
    fn insert(&self, collection: &str, doc: Value) -> Result<InsertOutcome> {
        self.try_insert(collection, &doc).map_err(storage_err)
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let fetch = || -> anyhow::Result<Option<Value>> {
            let rtxn = self.env.read_txn()?;
            match self.documents_db.get(&rtxn, &doc_key(collection, id))? {
                Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
                None => Ok(None),
            }
        };
        fetch().map_err(storage_err)
    }

    fn scan(
        &self,
        collection: &str,
        selector: &Selector,
        visit: &mut dyn FnMut(Value) -> Result<bool>,
    ) -> Result<()> {
        self.try_scan(collection, selector, visit).map_err(storage_err)?
    }

    fn pop_one(&self, collection: &str) -> Result<Option<Value>> {
        self.try_pop(collection).map_err(storage_err)
    }

    fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let remove = || -> anyhow::Result<bool> {
            let mut wtxn = self.env.write_txn()?;
            let existed = self.remove_document(&mut wtxn, collection, id)?.is_some();
            wtxn.commit()?;
            Ok(existed)
        };
        remove().map_err(storage_err)
    }

    fn create_index(&self, collection: &str, fields: &[String]) -> Result<()> {
        self.try_create_index(collection, fields).map_err(storage_err)
    }

    fn drop_collection(&self, collection: &str) -> Result<()> {
        self.try_drop(collection).map_err(storage_err)
    }

    fn inline_limit(&self) -> usize {
        self.inline_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> LmdbStore {
        let mut config = StoreConfig::with_data_dir(dir.path());
        config.map_size = 64 * 1024 * 1024;
        LmdbStore::open(&config).unwrap()
    }

    #[test]
    fn test_insert_if_absent() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let doc = json!({"_id": "a", "NAME": "ACME"});
        assert_eq!(store.insert("u", doc.clone()).unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert("u", json!({"_id": "a", "NAME": "OTHER"})).unwrap(), InsertOutcome::AlreadyPresent);
        assert_eq!(store.get("u", "a").unwrap(), Some(doc));
        assert_eq!(store.count("u").unwrap(), 1);
        assert_eq!(store.count("other").unwrap(), 0);
    }

    #[test]
    fn test_indexed_and_unindexed_find_agree() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.insert("u", json!({"_id": "1", "STATE": "CA", "NAME": "A"})).unwrap();
        store.insert("u", json!({"_id": "2", "STATE": "NY", "NAME": "B"})).unwrap();

        let mut selector = Selector::new();
        selector.insert("STATE".to_string(), "CA".to_string());
        let before = store.find("u", &selector, None).unwrap();

        store.create_index("u", &["STATE".to_string()]).unwrap();
        store.insert("u", json!({"_id": "3", "STATE": "CA", "NAME": "C"})).unwrap();
        let after = store.find("u", &selector, Some(&["NAME".to_string()])).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(after, vec![json!({"_id": "1", "NAME": "A"}), json!({"_id": "3", "NAME": "C"})]);
    }

    #[test]
    fn test_pop_one_removes_and_drop_collection_clears() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.create_index("q", &["STATE".to_string()]).unwrap();
        store.insert("q", json!({"_id": "1", "STATE": "CA"})).unwrap();
        store.insert("q", json!({"_id": "2", "STATE": "CA"})).unwrap();

        let popped = store.pop_one("q").unwrap().unwrap();
        assert_eq!(popped["_id"], "1");
        assert_eq!(store.count("q").unwrap(), 1);

        store.drop_collection("q").unwrap();
        assert!(store.pop_one("q").unwrap().is_none());
        assert!(store.distinct("q", "STATE").unwrap().is_empty());
    }

    #[test]
    fn test_long_indexed_values() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.create_index("u", &["NAME".to_string()]).unwrap();
        let long = "ACME ".repeat(120);
        store.insert("u", json!({"_id": "1", "NAME": long})).unwrap();
        store.insert("u", json!({"_id": "2", "NAME": "ZEPHYR"})).unwrap();

        let mut selector = Selector::new();
        selector.insert("NAME".to_string(), long.clone());
        let found = store.find("u", &selector, None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["_id"], "1");

        assert!(store.delete("u", "1").unwrap());
        assert!(store.find("u", &selector, None).unwrap().is_empty());
    }
}
