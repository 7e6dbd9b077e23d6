//! Record matching.
//!
//! [`MatchEngine::match_record`] runs, in order:
//!
//! 1. the exact fast path: a universe record equal on every fuzzy field is
//!    returned with score 1
//! 2. query-side metadata, built from the aggregate counts when missing
//! 3. shard resolution from the record's values for the planned exact fields
//!    (built on first use)
//! 4. candidate retrieval and scoring, best first

use crate::collections::Collections;
use crate::config::MatcherConfig;
use crate::planner::ShardPlanner;
use crate::preprocess::StatsHandle;
use crate::shard::{ShardIdentity, ShardIndex};
use fuzzrec_core::{Error, FilterAssignment, Record, Result, Selector, StatsModel};
use fuzzrec_similarity::{FieldWeights, Ranking, Scorer};
use fuzzrec_storage::{BlobStore, DocumentStore, ObjectBroker};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Best candidate for a query record.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// The query as matched: canonical, renamed, without metadata.
    pub query: Record,
    /// Universe record, without metadata.
    pub matched: Record,
    pub score: f64,
}

pub struct MatchEngine {
    config: Arc<MatcherConfig>,
    collections: Collections,
    store: Arc<dyn DocumentStore>,
    broker: ObjectBroker,
    stats: StatsHandle,
    weights: FieldWeights,
    shards: RwLock<HashMap<String, Arc<ShardIndex>>>,
    shard_fields: Mutex<Option<Arc<[String]>>>,
}

impl MatchEngine {
    /// `blob_root` is the directory under which the broker spills large objects.
    pub fn new(config: Arc<MatcherConfig>, store: Arc<dyn DocumentStore>, blob_root: &Path) -> Result<Self> {
        config.validate()?;
        let collections = config.collections();
        let broker = ObjectBroker::new(
            store.clone(),
            collections.broker.clone(),
            BlobStore::new(blob_root.join(&collections.broker)),
        );
        let stats = StatsHandle::new(store.clone(), collections.clone());
        let weights = config.field_weights()?;
        Ok(Self {
            config,
            collections,
            store,
            broker,
            stats,
            weights,
            shards: RwLock::new(HashMap::new()),
            shard_fields: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn broker(&self) -> &ObjectBroker {
        &self.broker
    }

    pub fn stats(&self) -> &StatsHandle {
        &self.stats
    }

    /// Use a model built in this process instead of reading the count tables.
    pub fn seed_stats(&self, model: Arc<StatsModel>) {
        self.stats.seed(model);
    }

    /// Canonicalize raw `(column, value)` pairs and apply the rename map.
    pub fn prepare_query<K, V, I>(&self, pairs: I) -> Record
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut record = Record::from_raw(pairs);
        record.rename_fields(
            self.config
                .field_rename_map
                .iter()
                .map(|(to, from)| (to.as_str(), from.as_str())),
        );
        record
    }

    /// Universe record equal to `record` on every fuzzy field.
    pub fn exact_match(&self, record: &Record) -> Result<Option<Record>> {
        let mut selector = Selector::new();
        for field in &self.config.fields {
            match record.get(field) {
                Some(value) if !value.is_empty() => selector.insert(field.clone(), value.to_string()),
                _ => return Ok(None),
            };
        }
        match self.store.find_one(&self.collections.universe, &selector)? {
            Some(doc) => Ok(Some(Record::from_document(doc)?.without_meta())),
            None => Ok(None),
        }
    }

    /// Exact fields that select a query's shard: those kept by the planner.
    pub fn shard_fields(&self) -> Result<Arc<[String]>> {
        let mut fields = self.shard_fields.lock();
        if let Some(fields) = fields.as_ref() {
            return Ok(fields.clone());
        }
        let planned: Arc<[String]> = if self.config.exact.is_empty() {
            Arc::from(Vec::new())
        } else {
            ShardPlanner::new(self.store.as_ref(), &self.config).plan()?.fields.into()
        };
        *fields = Some(planned.clone());
        Ok(planned)
    }

    /// Use fields from a plan computed elsewhere.
    pub fn seed_shard_fields(&self, fields: Vec<String>) {
        *self.shard_fields.lock() = Some(fields.into());
    }

    /// Forget cached shards, shard fields and statistics.
    pub fn reset(&self) {
        self.shards.write().clear();
        *self.shard_fields.lock() = None;
        self.stats.reset();
    }

    /// Cached shard for `filter`, loaded or built on first use.
    pub fn shard(&self, filter: FilterAssignment) -> Result<Arc<ShardIndex>> {
        let name = ShardIdentity::new(&self.config.fields, filter.clone()).name();
        if let Some(shard) = self.shards.read().get(&name) {
            return Ok(shard.clone());
        }
        let (shard, _) = ShardIndex::load_or_build(self.store.as_ref(), &self.broker, &self.config, filter)?;
        let shard = Arc::new(shard);
        self.shards.write().insert(name, shard.clone());
        Ok(shard)
    }

    /// All candidates above the threshold, best first.
    pub fn matches(&self, record: &mut Record) -> Result<Ranking> {
        let stats = self.stats.get()?;
        if record.meta.is_none() {
            record.meta = Some(stats.target_metadata(record, &self.config.fields));
        }

        let shard_fields = self.shard_fields()?;
        let filter = FilterAssignment::from_record(record, shard_fields.as_ref());
        let shard = self.shard(filter)?;
        let candidates = shard.query(self.store.as_ref(), &self.collections.universe, record)?;
        debug!("{} candidates for {}", candidates.len(), record.id);

        let scorer = Scorer::new(self.weights.clone(), stats);
        Ok(scorer.rank(record, candidates, self.config.score_threshold))
    }

    /// Best match, or [`Error::NoCandidate`].
    pub fn match_record(&self, mut record: Record) -> Result<MatchResult> {
        if let Some(matched) = self.exact_match(&record)? {
            return Ok(MatchResult {
                query: record.without_meta(),
                matched,
                score: 1.0,
            });
        }

        let best = self.matches(&mut record)?.next();
        match best {
            Some(best) => Ok(MatchResult {
                query: record.without_meta(),
                matched: best.record.without_meta(),
                score: best.score,
            }),
            None => Err(Error::NoCandidate(record.id.to_string())),
        }
    }

    /// Per-record outcomes; unmatched records are `None`, store failures abort.
    pub fn match_batch(&self, records: Vec<Record>) -> Result<Vec<Option<MatchResult>>> {
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            match self.match_record(record) {
                Ok(result) => results.push(Some(result)),
                Err(e) if e.is_unmatched() => {
                    debug!("unmatched: {}", e);
                    results.push(None);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::ingest_universe;
    use fuzzrec_storage::MemoryStore;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    struct Fixture {
        engine: MatchEngine,
        _blobs: TempDir,
        _file: NamedTempFile,
    }

    fn fixture(universe: &str, config: MatcherConfig) -> Fixture {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(universe.as_bytes()).unwrap();
        let ingest = ingest_universe(&store, &config, file.path()).unwrap();

        let blobs = TempDir::new().unwrap();
        let engine = MatchEngine::new(Arc::new(config), store, blobs.path()).unwrap();
        engine.seed_stats(ingest.stats.unwrap());
        Fixture {
            engine,
            _blobs: blobs,
            _file: file,
        }
    }

    const UNIVERSE: &str = "NAME\tSTATE\n\
        Acme Inc\tCA\n\
        Acme Incorporated\tCA\n\
        Zephyr Logistics\tCA\n\
        Acme Widgets\tNY\n";

    fn config() -> MatcherConfig {
        MatcherConfig::new("eng", &["name"]).with_exact(&["state"])
    }

    #[test]
    fn test_exact_fast_path_scores_one() {
        let fx = fixture(UNIVERSE, config());
        let query = fx.engine.prepare_query([("NAME", "Acme Inc."), ("STATE", "CA")]);
        let result = fx.engine.match_record(query).unwrap();
        assert_eq!(result.score, 1.0);
        assert_eq!(result.matched.get("NAME"), Some("ACME INC"));
        assert!(result.matched.meta.is_none());
        // no shard was needed
        assert!(fx.engine.shards.read().is_empty());
    }

    #[test]
    fn test_fuzzy_match_stays_in_shard() {
        let fx = fixture(UNIVERSE, config());
        let query = fx.engine.prepare_query([("NAME", "Acme Incorporated Co"), ("STATE", "CA")]);
        let result = fx.engine.match_record(query).unwrap();
        assert!(result.score > 0.0 && result.score < 1.0);
        assert_eq!(result.matched.get("STATE"), Some("CA"));
        assert_eq!(result.matched.get("NAME"), Some("ACME INCORPORATED"));
        assert_eq!(fx.engine.shards.read().len(), 1);
        assert_eq!(&*fx.engine.shard_fields().unwrap(), ["STATE".to_string()]);
    }

    #[test]
    fn test_shard_selection_follows_plan() {
        let mut config = config().with_exact(&["state", "city"]);
        config.max_domain_size = 2;
        config.min_domain_size = 1;
        let universe = "NAME\tSTATE\tCITY\n\
            Acme Inc\tCA\tFresno\n\
            Acme Incorporated\tCA\tOakland\n\
            Zephyr Logistics\tCA\tSan Jose\n\
            Acme Widgets\tNY\tAlbany\n";
        let fx = fixture(universe, config);
        assert_eq!(&*fx.engine.shard_fields().unwrap(), ["STATE".to_string()]);

        let query = fx.engine.prepare_query([
            ("NAME", "Acme Incorporated Co"),
            ("STATE", "CA"),
            ("CITY", "Fresno"),
        ]);
        let result = fx.engine.match_record(query).unwrap();
        assert_eq!(result.matched.get("CITY"), Some("OAKLAND"));
        let shards = fx.engine.shards.read();
        assert!(shards.contains_key("shard_NAME_by_STATE=CA"));
    }

    #[test]
    fn test_empty_value_never_matches_exactly() {
        let universe = "NAME\tSTATE\n\
            Acme Inc\tCA\n\
            \tNY\n";
        let fx = fixture(universe, config());
        let query = fx.engine.prepare_query([("NAME", "???"), ("STATE", "CA")]);
        assert_eq!(query.get("NAME"), Some(""));
        assert!(fx.engine.exact_match(&query).unwrap().is_none());
        match fx.engine.match_record(query) {
            Ok(result) => assert_ne!(result.matched.get("STATE"), Some("NY")),
            Err(e) => assert!(e.is_unmatched()),
        }
    }

    #[test]
    fn test_no_candidate_is_unmatched() {
        let fx = fixture(UNIVERSE, config());
        let query = fx.engine.prepare_query([("NAME", "Qqqq Xxxx"), ("STATE", "CA")]);
        let err = fx.engine.match_record(query.clone()).unwrap_err();
        assert!(matches!(err, Error::NoCandidate(_)));

        let results = fx.engine.match_batch(vec![query]).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_none());
    }

    #[test]
    fn test_rename_map_applies_to_queries() {
        let fx = fixture(UNIVERSE, config().with_rename("name", "org"));
        let query = fx.engine.prepare_query([("org", "acme inc"), ("state", "ca")]);
        assert_eq!(query.get("NAME"), Some("ACME INC"));
        let result = fx.engine.match_record(query).unwrap();
        assert_eq!(result.score, 1.0);
    }
}
