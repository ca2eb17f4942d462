//! Where task pipelines run.
//!
//! # Design
//! The engine only needs "run this closure somewhere". `WorkerPool` is the
//! production choice: a fixed number of named threads, sized once and never
//! resized. `InlineExecutor` runs the closure on the calling thread, which
//! makes engine behaviour deterministic in tests.

use std::fmt;

use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::EngineError;

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Returned when an executor refuses a job.
#[derive(Debug, Error)]
#[error("executor rejected job: {reason}")]
pub struct RejectedJob {
    pub reason: String,
}

pub trait Executor: Send + Sync {
    fn spawn(&self, job: Job) -> Result<(), RejectedJob>;
}

/// Fixed-size pool of worker threads.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let prefix = config.thread_name_prefix.clone();
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(move |index| format!("{prefix}-{index}"))
            .build()?;
        info!(
            threads = config.worker_threads,
            prefix = %config.thread_name_prefix,
            "worker pool started"
        );
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads())
            .finish()
    }
}

impl Executor for WorkerPool {
    fn spawn(&self, job: Job) -> Result<(), RejectedJob> {
        self.pool.spawn(job);
        Ok(())
    }
}

/// Runs every job immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn spawn(&self, job: Job) -> Result<(), RejectedJob> {
        job();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn pool_has_configured_size_and_names() {
        let config = EngineConfig {
            worker_threads: 3,
            thread_name_prefix: "test-worker".to_string(),
        };
        let pool = WorkerPool::new(&config).unwrap();
        assert_eq!(pool.threads(), 3);

        let (tx, rx) = mpsc::channel();
        pool.spawn(Box::new(move || {
            tx.send(std::thread::current().name().map(str::to_string)).unwrap();
        }))
        .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with("test-worker-"), "unexpected thread name {name}");
    }

    #[test]
    fn inline_runs_on_caller_thread() {
        let caller = std::thread::current().id();
        let (tx, rx) = mpsc::channel();
        InlineExecutor
            .spawn(Box::new(move || tx.send(std::thread::current().id()).unwrap()))
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), caller);
    }
}
