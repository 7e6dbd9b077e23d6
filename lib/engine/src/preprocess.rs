//! Universe and target preprocessing.
//!
//! Universe ingestion canonicalizes and deduplicates the file, builds the
//! [`StatsModel`] with exact per-record metadata, stores the records, and hands
//! the aggregate count rows to the background job system. Callers get the
//! in-memory model back immediately; the count tables catch up asynchronously.

use crate::collections::Collections;
use crate::config::MatcherConfig;
use ahash::AHashSet;
use fuzzrec_core::{
    content_hash, get_background_system, split_line, BackgroundJob, BackgroundJobType, CountTable,
    Error, Record, Result, StatsModel, ID_KEY,
};
use fuzzrec_storage::{file_digest, DocumentStore, IngestionLedger};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const FIELD_KEY: &str = "field";
const COUNT_KEY: &str = "count";

/// Which aggregate table a count row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountKind {
    Word,
    Gram,
}

impl CountKind {
    fn key_member(self) -> &'static str {
        match self {
            CountKind::Word => "token",
            CountKind::Gram => "gram",
        }
    }

    fn collection(self, collections: &Collections) -> &str {
        match self {
            CountKind::Word => &collections.word_counts,
            CountKind::Gram => &collections.gram_counts,
        }
    }
}

/// A parsed delimited file: canonical header plus unique records.
#[derive(Debug, Clone)]
pub struct DelimitedFile {
    pub header: Vec<String>,
    pub records: Vec<Record>,
    /// Data lines read, before deduplication.
    pub rows: usize,
}

/// Read `path`, canonicalizing header and cells, dropping duplicate records.
pub fn read_delimited<P: AsRef<Path>>(path: P, delimiter: char) -> Result<DelimitedFile> {
    let bytes = std::fs::read(path.as_ref())?;
    let text = String::from_utf8_lossy(&bytes);
    let mut lines = text.lines();
    let header = match lines.next() {
        Some(line) if !line.trim().is_empty() => split_line(line, delimiter, 0),
        _ => {
            return Err(Error::InvalidInput(format!(
                "{} has no header row",
                path.as_ref().display()
            )))
        }
    };

    let data: Vec<&str> = lines.filter(|l| !l.trim().is_empty()).collect();
    let rows = data.len();
    let parsed: Vec<Record> = data
        .par_iter()
        .map(|line| Record::from_row(&header, split_line(line, delimiter, header.len())))
        .collect();

    let mut seen = AHashSet::with_capacity(parsed.len());
    let records: Vec<Record> = parsed
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .collect();

    Ok(DelimitedFile {
        header,
        records,
        rows,
    })
}

/// Apply `universe field -> target column` renames to a header.
pub fn rename_header(header: &[String], renames: &BTreeMap<String, String>) -> Vec<String> {
    let mut names = header.to_vec();
    for (to, from) in renames {
        if let Some(pos) = names.iter().position(|n| n == from) {
            if names.iter().any(|n| n == to) {
                names.remove(pos);
            } else {
                names[pos] = to.clone();
            }
        }
    }
    names
}

/// Count rows for the aggregate tables. The id depends on `(field, key)` only.
pub fn count_documents(table: &CountTable, kind: CountKind) -> Vec<Value> {
    table
        .rows()
        .map(|(field, key, count)| {
            let mut doc = serde_json::Map::new();
            doc.insert(ID_KEY.to_string(), Value::String(content_hash([field, key])));
            doc.insert(FIELD_KEY.to_string(), Value::String(field.to_string()));
            doc.insert(kind.key_member().to_string(), Value::String(key.to_string()));
            doc.insert(COUNT_KEY.to_string(), json!(count));
            Value::Object(doc)
        })
        .collect()
}

/// Read a persisted count table back.
pub fn load_counts(store: &dyn DocumentStore, collections: &Collections, kind: CountKind) -> Result<CountTable> {
    let mut table = CountTable::new();
    let key_member = kind.key_member();
    store.scan(kind.collection(collections), &Default::default(), &mut |doc| {
        let field = doc.get(FIELD_KEY).and_then(Value::as_str);
        let key = doc.get(key_member).and_then(Value::as_str);
        let count = doc.get(COUNT_KEY).and_then(Value::as_u64);
        match (field, key, count) {
            (Some(field), Some(key), Some(count)) => table.insert(field, key, count),
            _ => debug!("skipping malformed count row {}", doc),
        }
        Ok(true)
    })?;
    Ok(table)
}

pub fn load_stats(store: &dyn DocumentStore, collections: &Collections) -> Result<StatsModel> {
    let start = Instant::now();
    let tokens = load_counts(store, collections, CountKind::Word)?;
    let shingles = load_counts(store, collections, CountKind::Gram)?;
    debug!(
        "loaded {} token and {} shingle counts in {:?}",
        tokens.len(),
        shingles.len(),
        start.elapsed()
    );
    Ok(StatsModel::from_tables(tokens, shingles))
}

/// Appends count rows; failures are logged, not propagated.
struct CountPersistJob {
    store: Arc<dyn DocumentStore>,
    collection: String,
    rows: Vec<Value>,
}

impl BackgroundJob for CountPersistJob {
    fn execute(self: Box<Self>) {
        let total = self.rows.len();
        match self.store.insert_many(&self.collection, self.rows) {
            Ok(inserted) => debug!("{}: {} of {} count rows new", self.collection, inserted, total),
            Err(e) => warn!("failed to persist counts into {}: {}", self.collection, e),
        }
    }

    fn job_type(&self) -> BackgroundJobType {
        BackgroundJobType::CountPersist
    }
}

struct IndexBuildJob {
    store: Arc<dyn DocumentStore>,
    collection: String,
    fields: Vec<String>,
}

impl BackgroundJob for IndexBuildJob {
    fn execute(self: Box<Self>) {
        if let Err(e) = self.store.create_index(&self.collection, &self.fields) {
            warn!("failed to index {} on {:?}: {}", self.collection, self.fields, e);
        }
    }

    fn job_type(&self) -> BackgroundJobType {
        BackgroundJobType::IndexBuild
    }
}

/// Queue count persistence and count-table indexing.
fn persist_counts(store: &Arc<dyn DocumentStore>, collections: &Collections, model: &StatsModel) {
    let system = get_background_system();
    for (kind, table) in [(CountKind::Word, &model.tokens), (CountKind::Gram, &model.shingles)] {
        let collection = kind.collection(collections).to_string();
        system.submit(Box::new(CountPersistJob {
            store: store.clone(),
            collection: collection.clone(),
            rows: count_documents(table, kind),
        }));
        system.submit(Box::new(IndexBuildJob {
            store: store.clone(),
            collection,
            fields: vec![FIELD_KEY.to_string()],
        }));
    }
}

#[derive(Debug)]
pub struct UniverseIngest {
    pub rows: usize,
    pub inserted: usize,
    /// The file's digest was already in the ledger.
    pub skipped: bool,
    /// Model built from this file; `None` when skipped.
    pub stats: Option<Arc<StatsModel>>,
}

pub fn ingest_universe(
    store: &Arc<dyn DocumentStore>,
    config: &MatcherConfig,
    path: &Path,
) -> Result<UniverseIngest> {
    let start = Instant::now();
    let collections = config.collections();
    let ledger = IngestionLedger::new(store.clone(), collections.ledger.clone());
    let digest = file_digest(path)?;
    if ledger.contains(&digest)? {
        info!("universe file {} unchanged, skipping ingestion", path.display());
        return Ok(UniverseIngest {
            rows: 0,
            inserted: 0,
            skipped: true,
            stats: None,
        });
    }

    let DelimitedFile {
        header,
        mut records,
        rows,
    } = read_delimited(path, config.delimiter)?;
    for field in config.fields.iter().chain(config.exact.iter()) {
        if !header.contains(field) {
            warn!("configured field {} is not a column of {}", field, path.display());
        }
    }

    let model = StatsModel::build(&mut records);
    let docs = records
        .iter()
        .map(Record::to_document)
        .collect::<Result<Vec<_>>>()?;
    let inserted = store.insert_many(&collections.universe, docs)?;

    let indexed: Vec<String> = config.exact.iter().chain(config.fields.iter()).cloned().collect();
    store.create_index(&collections.universe, &indexed)?;
    persist_counts(store, &collections, &model);
    ledger.record(&digest, path, rows)?;

    info!(
        "ingested {} rows ({} unique, {} new) from {} in {:?}",
        rows,
        records.len(),
        inserted,
        path.display(),
        start.elapsed()
    );
    Ok(UniverseIngest {
        rows,
        inserted,
        skipped: false,
        stats: Some(Arc::new(model)),
    })
}

#[derive(Debug)]
pub struct TargetIngest {
    /// Target columns after renaming.
    pub header: Vec<String>,
    pub rows: usize,
    pub queued: usize,
}

/// Push target records onto the queue with query-side metadata attached.
pub fn ingest_targets(
    store: &dyn DocumentStore,
    config: &MatcherConfig,
    stats: &StatsModel,
    path: &Path,
) -> Result<TargetIngest> {
    let collections = config.collections();
    let DelimitedFile {
        header,
        records,
        rows,
    } = read_delimited(path, config.delimiter)?;
    let renames = &config.field_rename_map;

    let docs = records
        .into_par_iter()
        .map(|mut record| {
            record.rename_fields(renames.iter().map(|(to, from)| (to.as_str(), from.as_str())));
            record.meta = Some(stats.target_metadata(&record, &config.fields));
            record.to_document()
        })
        .collect::<Result<Vec<_>>>()?;
    let queued = store.insert_many(&collections.target, docs)?;
    info!("queued {} of {} target rows from {}", queued, rows, path.display());

    Ok(TargetIngest {
        header: rename_header(&header, renames),
        rows,
        queued,
    })
}

/// Lazily loaded, shared statistics.
///
/// The model is read from the count tables on the first [`StatsHandle::get`]
/// and reused afterwards. A handle can also be seeded with a model built in
/// this process.
pub struct StatsHandle {
    store: Arc<dyn DocumentStore>,
    collections: Collections,
    model: Mutex<Option<Arc<StatsModel>>>,
}

impl StatsHandle {
    pub fn new(store: Arc<dyn DocumentStore>, collections: Collections) -> Self {
        Self {
            store,
            collections,
            model: Mutex::new(None),
        }
    }

    pub fn seed(&self, model: Arc<StatsModel>) {
        *self.model.lock() = Some(model);
    }

    pub fn get(&self) -> Result<Arc<StatsModel>> {
        let mut slot = self.model.lock();
        if let Some(model) = slot.as_ref() {
            return Ok(model.clone());
        }
        let model = Arc::new(load_stats(self.store.as_ref(), &self.collections)?);
        *slot = Some(model.clone());
        Ok(model)
    }

    pub fn is_loaded(&self) -> bool {
        self.model.lock().is_some()
    }

    /// Forget the cached model; the next `get` reloads it.
    pub fn reset(&self) {
        *self.model.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuzzrec_storage::MemoryStore;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn write_file(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    fn drain() {
        assert!(get_background_system().wait_idle(Duration::from_secs(30)));
    }

    #[test]
    fn test_read_delimited_pads_and_dedups() {
        let file = write_file("name\tstate\tzip\nAcme Inc.\tca\nacme inc\tCA\t\nBolt Co\tNY\t10001\n");
        let parsed = read_delimited(file.path(), '\t').unwrap();
        assert_eq!(parsed.header, vec!["NAME", "STATE", "ZIP"]);
        assert_eq!(parsed.rows, 3);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].get("ZIP"), Some(""));
        assert_eq!(parsed.records[0].get("NAME"), Some("ACME INC"));
    }

    #[test]
    fn test_rename_header() {
        let header = vec!["ORGNAME".to_string(), "ST".to_string()];
        let mut renames = BTreeMap::new();
        renames.insert("NAME".to_string(), "ORGNAME".to_string());
        assert_eq!(rename_header(&header, &renames), vec!["NAME", "ST"]);
    }

    #[test]
    fn test_ingest_is_idempotent() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let config = MatcherConfig::new("idem", &["name"]).with_exact(&["state"]);
        let file = write_file("name\tstate\nAcme Inc\tCA\nAcme Incorporated\tCA\nBolt\tNY\n");

        let first = ingest_universe(&store, &config, file.path()).unwrap();
        assert!(!first.skipped);
        assert_eq!(first.inserted, 3);
        let second = ingest_universe(&store, &config, file.path()).unwrap();
        assert!(second.skipped);
        assert_eq!(store.count("idem").unwrap(), 3);

        drain();
        let model = load_stats(store.as_ref(), &config.collections()).unwrap();
        assert_eq!(model.tokens.count("NAME", "ACME"), Some(2));
        // two-letter tokens shingle as "aab" and "abb"
        assert_eq!(model.shingles.count("STATE", "CCA"), Some(2));
        assert_eq!(model.shingles.count("STATE", "CAA"), Some(2));
        assert_eq!(model.shingles.count("STATE", "NYY"), Some(1));
    }

    #[test]
    fn test_target_ingest_renames_and_attaches_metadata() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let config = MatcherConfig::new("tgt", &["name"]).with_rename("name", "org");
        let universe = write_file("name\nAcme Inc\nBolt Co\n");
        let ingest = ingest_universe(&store, &config, universe.path()).unwrap();
        let stats = ingest.stats.unwrap();

        let targets = write_file("org\nacme inc.\nacme inc\n");
        let report = ingest_targets(store.as_ref(), &config, &stats, targets.path()).unwrap();
        assert_eq!(report.header, vec!["NAME"]);
        assert_eq!(report.rows, 2);
        assert_eq!(report.queued, 1);

        let doc = store.pop_one("tgt_target").unwrap().unwrap();
        let record = Record::from_document(doc).unwrap();
        assert_eq!(record.get("NAME"), Some("ACME INC"));
        let meta = record.meta.unwrap();
        assert!(meta.for_value("NAME", "ACME INC").is_some());
    }

    #[test]
    fn test_stats_handle_loads_once() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let config = MatcherConfig::new("handle", &["name"]);
        let file = write_file("name\nAcme\n");
        ingest_universe(&store, &config, file.path()).unwrap();
        drain();

        let handle = StatsHandle::new(store.clone(), config.collections());
        assert!(!handle.is_loaded());
        let a = handle.get().unwrap();
        let b = handle.get().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.tokens.count("NAME", "ACME"), Some(1));
        handle.reset();
        assert!(!handle.is_loaded());
    }
}
