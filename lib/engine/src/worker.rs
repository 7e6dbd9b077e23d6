//! Worker tasks and the pool that runs them.
//!
//! A worker is told what to do by a serializable [`TaskDescriptor`]: build one
//! shard, or drain the target queue into a private spool file. Workers share
//! nothing but the store. The [`WorkerPool`] launches tasks through a
//! [`WorkerLauncher`] (child processes in production, blocking tasks in
//! tests), joins them all, and fails the operation if any task exits nonzero.

use crate::config::MatcherConfig;
use crate::engine::MatchEngine;
use crate::output::{merge_outputs, result_line, OutputHeader};
use crate::preprocess::{ingest_targets, load_stats};
use crate::shard::{ShardIdentity, ShardIndex};
use fuzzrec_core::{get_background_system, Error, FilterAssignment, Record, Result};
use fuzzrec_storage::{BlobStore, DocumentStore, ObjectBroker, ResultSpool};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Upper bound on waiting for queued count persistence before a batch.
const BACKGROUND_DRAIN_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskDescriptor {
    BuildShard {
        config: MatcherConfig,
        filter: FilterAssignment,
    },
    DrainQueue {
        config: MatcherConfig,
        output: PathBuf,
    },
}

impl TaskDescriptor {
    pub fn label(&self) -> String {
        match self {
            TaskDescriptor::BuildShard { config, filter } => {
                ShardIdentity::new(&config.fields, filter.clone()).name()
            }
            TaskDescriptor::DrainQueue { config, output } => {
                format!("drain {} -> {}", config.name, output.display())
            }
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Execute a task in the current thread. Returns the number of shards built
/// or queue records matched.
pub fn run_task(task: &TaskDescriptor, store: Arc<dyn DocumentStore>, blob_root: &Path) -> Result<usize> {
    match task {
        TaskDescriptor::BuildShard { config, filter } => {
            let collections = config.collections();
            let broker = ObjectBroker::new(
                store.clone(),
                collections.broker.clone(),
                BlobStore::new(blob_root.join(&collections.broker)),
            );
            let (_, built) = ShardIndex::load_or_build(store.as_ref(), &broker, config, filter.clone())?;
            Ok(built as usize)
        }
        TaskDescriptor::DrainQueue { config, output } => {
            let engine = MatchEngine::new(Arc::new(config.clone()), store.clone(), blob_root)?;
            drain_queue(&engine, output)
        }
    }
}

/// Pop target records until the queue is empty, appending matches to `output`.
pub fn drain_queue(engine: &MatchEngine, output: &Path) -> Result<usize> {
    let spool = ResultSpool::create(output)?;
    let queue = engine.config().collections().target;
    let mut matched = 0;
    let mut seen = 0;
    while let Some(doc) = engine.store().pop_one(&queue)? {
        seen += 1;
        let record = Record::from_document(doc)?;
        match engine.match_record(record) {
            Ok(result) => {
                spool.append(&result_line(&result.query, &result.matched, result.score))?;
                matched += 1;
            }
            Err(e) if e.is_unmatched() => debug!("unmatched: {}", e),
            Err(e) => return Err(e),
        }
    }
    spool.sync()?;
    debug!("drained {} records, {} matched, into {}", seen, matched, output.display());
    Ok(matched)
}

/// A launched task.
pub enum WorkerHandle {
    Process(tokio::process::Child),
    Task(tokio::task::JoinHandle<i32>),
}

impl WorkerHandle {
    /// Exit status of the task. A task exceeding `timeout` is reported as a
    /// failure. A worker process is killed; an in-process task only has its
    /// handle aborted, and its blocking thread runs on until it returns.
    pub async fn wait(self, label: &str, timeout: Option<Duration>) -> Result<i32> {
        let timed_out = || Error::WorkerFailure {
            task: format!("{} (timed out)", label),
            code: -1,
        };
        match self {
            WorkerHandle::Process(mut child) => {
                let status = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                        Ok(status) => status?,
                        Err(_) => {
                            child.kill().await?;
                            return Err(timed_out());
                        }
                    },
                    None => child.wait().await?,
                };
                Ok(status.code().unwrap_or(-1))
            }
            WorkerHandle::Task(mut handle) => {
                let joined = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            handle.abort();
                            return Err(timed_out());
                        }
                    },
                    None => handle.await,
                };
                Ok(joined.unwrap_or(-1))
            }
        }
    }
}

/// Starts worker tasks. Must be called from within a tokio runtime.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, task: &TaskDescriptor) -> Result<WorkerHandle>;
}

/// Runs each task as `<exe> --data-dir <dir> worker --task <json>`.
pub struct ProcessLauncher {
    exe: PathBuf,
    data_dir: PathBuf,
    log_level: String,
}

impl ProcessLauncher {
    pub fn new(exe: impl Into<PathBuf>, data_dir: impl Into<PathBuf>, log_level: impl Into<String>) -> Self {
        Self {
            exe: exe.into(),
            data_dir: data_dir.into(),
            log_level: log_level.into(),
        }
    }

    /// Re-invoke the running binary.
    pub fn current(data_dir: impl Into<PathBuf>, log_level: impl Into<String>) -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, data_dir, log_level))
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, task: &TaskDescriptor) -> Result<WorkerHandle> {
        let child = tokio::process::Command::new(&self.exe)
            .arg("--data-dir")
            .arg(&self.data_dir)
            .arg("--log-level")
            .arg(&self.log_level)
            .arg("worker")
            .arg("--task")
            .arg(task.to_json()?)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        Ok(WorkerHandle::Process(child))
    }
}

/// Runs tasks on the blocking thread pool against a shared store.
pub struct InProcessLauncher {
    store: Arc<dyn DocumentStore>,
    blob_root: PathBuf,
}

impl InProcessLauncher {
    pub fn new(store: Arc<dyn DocumentStore>, blob_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            blob_root: blob_root.into(),
        }
    }
}

impl WorkerLauncher for InProcessLauncher {
    fn launch(&self, task: &TaskDescriptor) -> Result<WorkerHandle> {
        let store = self.store.clone();
        let blob_root = self.blob_root.clone();
        let task = task.clone();
        let handle = tokio::task::spawn_blocking(move || match run_task(&task, store, &blob_root) {
            Ok(_) => 0,
            Err(e) => {
                warn!("task {} failed: {}", task.label(), e);
                1
            }
        });
        Ok(WorkerHandle::Task(handle))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub launched: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub output: PathBuf,
    pub queued: usize,
    pub matched: usize,
}

pub struct WorkerPool {
    launcher: Arc<dyn WorkerLauncher>,
    worker_count: usize,
    timeout: Option<Duration>,
}

impl WorkerPool {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, worker_count: usize) -> Self {
        Self {
            launcher,
            worker_count: worker_count.max(1),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `tasks` with at most `worker_count` in flight and join them all.
    /// The first nonzero exit is reported after every task has finished.
    pub async fn run_all(&self, tasks: Vec<TaskDescriptor>) -> Result<()> {
        let mut running = JoinSet::new();
        let mut failure: Option<Error> = None;
        let mut observe = |outcome: Result<(String, i32)>| match outcome {
            Ok((_, 0)) => {}
            Ok((task, code)) => {
                warn!("worker {} exited with status {}", task, code);
                failure.get_or_insert(Error::WorkerFailure { task, code });
            }
            Err(e) => {
                warn!("worker failed: {}", e);
                failure.get_or_insert(e);
            }
        };

        for task in tasks {
            if running.len() >= self.worker_count {
                if let Some(joined) = running.join_next().await {
                    observe(flatten(joined));
                }
            }
            let label = task.label();
            let handle = match self.launcher.launch(&task) {
                Ok(handle) => handle,
                Err(e) => {
                    // stop launching, still join what is running
                    observe(Err(e));
                    break;
                }
            };
            let timeout = self.timeout;
            running.spawn(async move {
                let code = handle.wait(&label, timeout).await?;
                Ok::<_, Error>((label, code))
            });
        }
        while let Some(joined) = running.join_next().await {
            observe(flatten(joined));
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Build every shard in `filters` that the broker does not hold yet.
    pub async fn build_shards(
        &self,
        config: &MatcherConfig,
        broker: &ObjectBroker,
        filters: Vec<FilterAssignment>,
    ) -> Result<BuildReport> {
        let start = Instant::now();
        let mut report = BuildReport::default();
        let mut tasks = Vec::new();
        for filter in filters {
            if broker.exists(&ShardIdentity::new(&config.fields, filter.clone()).name())? {
                report.skipped += 1;
                continue;
            }
            tasks.push(TaskDescriptor::BuildShard {
                config: config.clone(),
                filter,
            });
        }
        report.launched = tasks.len();
        self.run_all(tasks).await?;
        info!(
            "shard build: {} built, {} already present, {:?} elapsed",
            report.launched,
            report.skipped,
            start.elapsed()
        );
        Ok(report)
    }

    /// Queue `target_file`, drain it with `worker_count` workers, and merge
    /// their spools into `output`.
    pub async fn match_file(
        &self,
        config: &MatcherConfig,
        store: &Arc<dyn DocumentStore>,
        target_file: &Path,
        output: &Path,
    ) -> Result<BatchReport> {
        let start = Instant::now();
        let system = get_background_system();
        if !system.wait_idle(BACKGROUND_DRAIN_TIMEOUT) {
            warn!("background persistence still running, counts may be incomplete");
        }

        let collections = config.collections();
        let stats = load_stats(store.as_ref(), &collections)?;
        let targets = ingest_targets(store.as_ref(), config, &stats, target_file)?;
        let universe = match store.find_one(&collections.universe, &Default::default())? {
            Some(doc) => Record::from_document(doc)?.field_names().map(str::to_string).collect(),
            None => Vec::new(),
        };
        let header = OutputHeader {
            target: targets.header.clone(),
            universe,
        };

        let spool_dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .join(format!(".{}_spool", config.name));
        std::fs::create_dir_all(&spool_dir)?;
        let spools: Vec<PathBuf> = (0..self.worker_count)
            .map(|i| spool_dir.join(format!("{}_worker_{}.tsv", config.name, i)))
            .collect();
        let tasks = spools
            .iter()
            .map(|path| TaskDescriptor::DrainQueue {
                config: config.clone(),
                output: path.clone(),
            })
            .collect();
        self.run_all(tasks).await?;

        let matched = merge_outputs(&header, &spools, output)?;
        if let Err(e) = std::fs::remove_dir_all(&spool_dir) {
            debug!("could not remove {}: {}", spool_dir.display(), e);
        }
        info!(
            "matched {} of {} queued records into {} in {:?}",
            matched,
            targets.queued,
            output.display(),
            start.elapsed()
        );
        Ok(BatchReport {
            output: output.to_path_buf(),
            queued: targets.queued,
            matched,
        })
    }
}

fn flatten(joined: std::result::Result<Result<(String, i32)>, tokio::task::JoinError>) -> Result<(String, i32)> {
    match joined {
        Ok(outcome) => outcome,
        Err(e) => Err(Error::WorkerFailure {
            task: format!("join error: {}", e),
            code: -1,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_json_is_tagged() {
        let config = MatcherConfig::new("hosp", &["name"]).with_exact(&["state"]);
        let task = TaskDescriptor::BuildShard {
            config,
            filter: FilterAssignment::new().with("STATE", "CA"),
        };
        let json = task.to_json().unwrap();
        assert!(json.contains(r#""kind":"build_shard""#));
        assert_eq!(TaskDescriptor::from_json(&json).unwrap(), task);
        assert_eq!(task.label(), "shard_NAME_by_STATE=CA");
    }

    struct FixedExit(i32);

    impl WorkerLauncher for FixedExit {
        fn launch(&self, _task: &TaskDescriptor) -> Result<WorkerHandle> {
            let code = self.0;
            Ok(WorkerHandle::Task(tokio::task::spawn_blocking(move || code)))
        }
    }

    fn drain_tasks(n: usize) -> Vec<TaskDescriptor> {
        (0..n)
            .map(|i| TaskDescriptor::DrainQueue {
                config: MatcherConfig::new("pool", &["name"]),
                output: PathBuf::from(format!("w{}.tsv", i)),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_run_all_succeeds() {
        let pool = WorkerPool::new(Arc::new(FixedExit(0)), 2);
        pool.run_all(drain_tasks(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_pool() {
        let pool = WorkerPool::new(Arc::new(FixedExit(3)), 2);
        let err = pool.run_all(drain_tasks(3)).await.unwrap_err();
        match err {
            Error::WorkerFailure { task, code } => {
                assert_eq!(code, 3);
                assert!(task.starts_with("drain pool"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    struct FailsAfter {
        launched: std::sync::atomic::AtomicUsize,
        limit: usize,
        finished: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl WorkerLauncher for FailsAfter {
        fn launch(&self, _task: &TaskDescriptor) -> Result<WorkerHandle> {
            use std::sync::atomic::Ordering;
            if self.launched.fetch_add(1, Ordering::SeqCst) >= self.limit {
                return Err(Error::Io(std::io::Error::other("cannot spawn worker")));
            }
            let finished = self.finished.clone();
            Ok(WorkerHandle::Task(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                0
            })))
        }
    }

    #[tokio::test]
    async fn test_launch_error_still_joins_running_tasks() {
        let finished = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let launcher = FailsAfter {
            launched: Default::default(),
            limit: 2,
            finished: finished.clone(),
        };
        let pool = WorkerPool::new(Arc::new(launcher), 4);
        let err = pool.run_all(drain_tasks(4)).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(finished.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    struct Stalled;

    impl WorkerLauncher for Stalled {
        fn launch(&self, _task: &TaskDescriptor) -> Result<WorkerHandle> {
            Ok(WorkerHandle::Task(tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                0
            })))
        }
    }

    #[tokio::test]
    async fn test_timeout_reports_failure() {
        let pool = WorkerPool::new(Arc::new(Stalled), 1).with_timeout(Some(Duration::from_millis(50)));
        let err = pool.run_all(drain_tasks(1)).await.unwrap_err();
        assert!(matches!(err, Error::WorkerFailure { code: -1, .. }));
    }
}
