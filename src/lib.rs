//! # fuzzrec
//!
//! Fuzzy record matching against a reference universe.
//!
//! A universe file (tab-separated, header row) is ingested once into a document
//! store. Token and shingle counts over it drive a bag-of-words similarity
//! that discounts common tokens and gives partial credit for misspellings.
//! Candidates come from MinHash LSH indexes built per shard, where a shard is
//! the slice of the universe sharing the values of the configured exact fields.
//!
//! ## Quick Start
//!
//! ### As a CLI
//!
//! ```bash
//! fuzzrec --data-dir ./data build --config hospitals.json
//! fuzzrec --data-dir ./data match-file --config hospitals.json targets.tsv matches.tsv
//! ```
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use fuzzrec::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> fuzzrec_core::Result<()> {
//! let config = MatcherConfig::new("hospitals", &["name", "address"]).with_exact(&["state"]);
//! let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
//! let launcher = Arc::new(InProcessLauncher::new(store.clone(), "./blobs"));
//! let matcher = Matcher::open(config, store, "./blobs", launcher)?;
//!
//! matcher.ingest("universe.tsv".as_ref())?;
//! matcher.prepare().await?;
//! let result = matcher.match_record([("NAME", "Acme Hosp"), ("ADDRESS", "1 Main St"), ("STATE", "CA")])?;
//! println!("{} {}", result.matched.id, result.score);
//! # Ok(())
//! # }
//! ```

pub use fuzzrec_core as core;
pub use fuzzrec_engine as engine;
pub use fuzzrec_similarity as similarity;
pub use fuzzrec_storage as storage;

pub mod prelude {
    pub use fuzzrec_core::{Error, FilterAssignment, Record, Result, StatsModel};
    pub use fuzzrec_engine::{
        InProcessLauncher, MatchEngine, MatchResult, Matcher, MatcherConfig, ProcessLauncher, WorkerPool,
    };
    pub use fuzzrec_similarity::{FieldWeights, Scorer};
    pub use fuzzrec_storage::{DocumentStore, LmdbStore, MemoryStore, StoreConfig};
}
