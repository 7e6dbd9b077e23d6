// Content digests of already ingested input files
use crate::store::{DocumentStore, InsertOutcome};
use chrono::Utc;
use fuzzrec_core::{Result, ID_KEY};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

pub struct IngestionLedger {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

/// Hex SHA-256 of a file's bytes.
pub fn file_digest<P: AsRef<Path>>(path: P) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

impl IngestionLedger {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    pub fn contains(&self, digest: &str) -> Result<bool> {
        Ok(self.store.get(&self.collection, digest)?.is_some())
    }

    pub fn record(&self, digest: &str, source: &Path, rows: usize) -> Result<InsertOutcome> {
        let doc = json!({
            ID_KEY: digest,
            "source": source.display().to_string(),
            "rows": rows,
            "ingested_at": Utc::now().to_rfc3339(),
        });
        self.store.insert(&self.collection, doc)
    }

    pub fn clear(&self) -> Result<()> {
        self.store.drop_collection(&self.collection)
    }
}
