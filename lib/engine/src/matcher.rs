//! One configured matcher over a store.
//!
//! `prepare` ingests the universe file (when configured and not already
//! ingested), plans the shards and builds the missing ones through the worker
//! pool. After that, single records go through [`Matcher::match_record`] and
//! whole files through [`Matcher::match_file`].

use crate::config::MatcherConfig;
use crate::engine::{MatchEngine, MatchResult};
use crate::planner::{ShardPlan, ShardPlanner};
use crate::preprocess::ingest_universe;
use crate::worker::{BatchReport, BuildReport, WorkerLauncher, WorkerPool};
use fuzzrec_core::{get_background_system, Record, Result};
use fuzzrec_storage::DocumentStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug)]
pub struct PrepareReport {
    pub ingested: Option<usize>,
    pub plan: ShardPlan,
    pub build: BuildReport,
}

pub struct Matcher {
    config: Arc<MatcherConfig>,
    store: Arc<dyn DocumentStore>,
    blob_root: PathBuf,
    engine: MatchEngine,
    pool: WorkerPool,
}

impl Matcher {
    pub fn open(
        config: MatcherConfig,
        store: Arc<dyn DocumentStore>,
        blob_root: impl Into<PathBuf>,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let blob_root = blob_root.into();
        let engine = MatchEngine::new(config.clone(), store.clone(), &blob_root)?;
        let pool = WorkerPool::new(launcher, config.worker_count).with_timeout(config.worker_timeout());
        Ok(Self {
            config,
            store,
            blob_root,
            engine,
            pool,
        })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    pub fn blob_root(&self) -> &Path {
        &self.blob_root
    }

    /// Ingest `path` as the universe. Unchanged files are skipped.
    pub fn ingest(&self, path: &Path) -> Result<Option<usize>> {
        let ingest = ingest_universe(&self.store, &self.config, path)?;
        if let Some(stats) = ingest.stats {
            self.engine.seed_stats(stats);
        }
        Ok((!ingest.skipped).then_some(ingest.inserted))
    }

    pub fn plan(&self) -> Result<ShardPlan> {
        let plan = ShardPlanner::new(self.store.as_ref(), &self.config).plan()?;
        self.engine.seed_shard_fields(plan.fields.clone());
        Ok(plan)
    }

    /// Ingest, plan and build every shard that is not built yet.
    pub async fn prepare(&self) -> Result<PrepareReport> {
        let ingested = match &self.config.universe_file {
            Some(path) => self.ingest(path)?,
            None => None,
        };
        let plan = self.plan()?;
        let build = self
            .pool
            .build_shards(&self.config, self.engine.broker(), plan.filters.clone())
            .await?;
        Ok(PrepareReport {
            ingested,
            plan,
            build,
        })
    }

    /// Match one record given as raw `(column, value)` pairs.
    pub fn match_record<K, V, I>(&self, pairs: I) -> Result<MatchResult>
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.engine.match_record(self.engine.prepare_query(pairs))
    }

    pub fn match_batch(&self, records: Vec<Record>) -> Result<Vec<Option<MatchResult>>> {
        self.engine.match_batch(records)
    }

    pub async fn match_file(&self, target: &Path, output: &Path) -> Result<BatchReport> {
        self.pool.match_file(&self.config, &self.store, target, output).await
    }

    /// Drop every collection and spilled object this matcher owns.
    pub fn purge(&self) -> Result<()> {
        get_background_system().wait_idle(Duration::from_secs(60));
        self.engine.broker().purge()?;
        for collection in self.config.collections().all() {
            self.store.drop_collection(collection)?;
        }
        self.engine.reset();
        info!("purged matcher {}", self.config.name);
        Ok(())
    }
}
