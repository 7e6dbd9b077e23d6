//! # fuzzrec Engine
//!
//! Preprocessing, sharded candidate retrieval and record matching.
//!
//! - **Preprocessing**: universe ingestion (idempotent per file digest), aggregate
//!   count tables, and target queueing with query-side metadata
//! - **Shards**: the universe is partitioned by exact-field values; each shard
//!   holds one MinHash LSH index per fuzzy field and is built once
//! - **Matching**: exact fast path, then candidates from the record's shard
//!   scored and ranked best first
//! - **Workers**: shard builds and batch matching run as independent tasks
//!   launched by a [`WorkerPool`]

pub mod collections;
pub mod config;
pub mod engine;
pub mod matcher;
pub mod output;
pub mod planner;
pub mod preprocess;
pub mod shard;
pub mod worker;

pub use collections::Collections;
pub use config::{LshConfig, MatcherConfig};
pub use engine::{MatchEngine, MatchResult};
pub use matcher::{Matcher, PrepareReport};
pub use output::{merge_outputs, result_line, OutputHeader, MATCH_SEPARATOR, SCORE_SEPARATOR};
pub use planner::{ShardPlan, ShardPlanner};
pub use preprocess::{
    ingest_targets, ingest_universe, load_stats, read_delimited, CountKind, DelimitedFile, StatsHandle,
    TargetIngest, UniverseIngest,
};
pub use shard::{ShardIdentity, ShardIndex};
pub use worker::{
    run_task, BatchReport, BuildReport, InProcessLauncher, ProcessLauncher, TaskDescriptor, WorkerHandle,
    WorkerLauncher, WorkerPool,
};
