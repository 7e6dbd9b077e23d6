// Background I/O system inspired by Redis's BIO (Background I/O)
// Fire-and-forget work (aggregate persistence, secondary index creation) runs
// on one worker thread per job type so callers never wait on it.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Background job types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundJobType {
    CountPersist = 0, // append aggregate count rows
    IndexBuild = 1,   // create secondary indexes
}

const JOB_TYPES: [BackgroundJobType; 2] =
    [BackgroundJobType::CountPersist, BackgroundJobType::IndexBuild];

/// Background job trait
pub trait BackgroundJob: Send + 'static {
    fn execute(self: Box<Self>);
    fn job_type(&self) -> BackgroundJobType;
}

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Box<dyn BackgroundJob>>,
    in_flight: usize,
}

/// Background worker thread
struct BackgroundWorker {
    queue: Mutex<Queue>,
    condvar: Condvar,
    idle: Condvar,
    running: AtomicBool,
}

impl BackgroundWorker {
    fn new() -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            condvar: Condvar::new(),
            idle: Condvar::new(),
            running: AtomicBool::new(true),
        }
    }

    fn submit(&self, job: Box<dyn BackgroundJob>) {
        let mut queue = self.queue.lock();
        queue.jobs.push_back(job);
        self.condvar.notify_one();
    }

    fn pending_jobs(&self) -> usize {
        let queue = self.queue.lock();
        queue.jobs.len() + queue.in_flight
    }

    fn run(&self) {
        loop {
            let job = {
                let mut queue = self.queue.lock();
                while queue.jobs.is_empty() && self.running.load(Ordering::Acquire) {
                    self.condvar.wait(&mut queue);
                }
                match queue.jobs.pop_front() {
                    Some(job) => {
                        queue.in_flight += 1;
                        job
                    }
                    None => break,
                }
            };
            // Release lock before executing
            job.execute();
            let mut queue = self.queue.lock();
            queue.in_flight -= 1;
            if queue.jobs.is_empty() && queue.in_flight == 0 {
                self.idle.notify_all();
            }
        }
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let mut queue = self.queue.lock();
        while !(queue.jobs.is_empty() && queue.in_flight == 0) {
            if self.idle.wait_for(&mut queue, timeout).timed_out() {
                return false;
            }
        }
        true
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.condvar.notify_all();
    }
}

/// Background job system (Redis-style BIO)
pub struct BackgroundJobSystem {
    workers: Vec<Arc<BackgroundWorker>>,
    job_counters: Arc<[AtomicU64; 2]>, // One counter per job type
}

impl BackgroundJobSystem {
    /// Create a new background job system
    pub fn new() -> Self {
        let mut workers = Vec::new();

        for job_type in JOB_TYPES {
            let worker = Arc::new(BackgroundWorker::new());
            let worker_for_thread = worker.clone();
            let spawned = thread::Builder::new()
                .name(format!("bg-worker-{:?}-0", job_type))
                .spawn(move || worker_for_thread.run());
            if spawned.is_err() {
                // Without a thread the job queue would never drain; run inline instead.
                worker.shutdown();
            }
            workers.push(worker);
        }

        Self {
            workers,
            job_counters: Arc::new([AtomicU64::new(0), AtomicU64::new(0)]),
        }
    }

    /// Submit a background job
    pub fn submit(&self, job: Box<dyn BackgroundJob>) {
        let job_type = job.job_type();
        let worker = &self.workers[job_type as usize];

        self.job_counters[job_type as usize].fetch_add(1, Ordering::Relaxed);
        if worker.running.load(Ordering::Acquire) {
            worker.submit(job);
        } else {
            job.execute();
        }
    }

    /// Get pending jobs count for a job type, including the one executing
    pub fn pending_jobs(&self, job_type: BackgroundJobType) -> usize {
        self.workers[job_type as usize].pending_jobs()
    }

    /// Get total jobs submitted for a job type
    pub fn jobs_submitted(&self, job_type: BackgroundJobType) -> u64 {
        self.job_counters[job_type as usize].load(Ordering::Relaxed)
    }

    /// Block until every queue is drained or `timeout` elapses per job type.
    /// Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.workers.iter().all(|w| w.wait_idle(timeout))
    }

    /// Shutdown all workers; queued jobs still run before the threads exit
    pub fn shutdown(&self) {
        for worker in &self.workers {
            worker.shutdown();
        }
    }
}

impl Default for BackgroundJobSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Global background job system (initialized on first use)
static BACKGROUND_SYSTEM: std::sync::OnceLock<Arc<BackgroundJobSystem>> = std::sync::OnceLock::new();

/// Get the global background job system
pub fn get_background_system() -> Arc<BackgroundJobSystem> {
    BACKGROUND_SYSTEM
        .get_or_init(|| Arc::new(BackgroundJobSystem::new()))
        .clone()
}
