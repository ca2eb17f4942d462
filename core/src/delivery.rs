//! Single-consumer delivery of results to the owner thread.
//!
//! # Design
//! Workers never call callbacks themselves. They post a closure to the
//! `DeliveryQueue`, and whichever thread owns the matching `DeliveryLoop`
//! runs it. That thread is the delivery thread: every callback of an engine
//! runs there, in the order the jobs were posted.
//!
//! The loop can be driven three ways, depending on what the owner thread
//! already does: block on it (`run`), poll it from an existing event loop
//! (`run_pending`), or await it inside a tokio runtime (`run_async`).

use std::io;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::executor::Job;

/// Sending half; cloned into every worker job.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    tx: UnboundedSender<Job>,
}

impl DeliveryQueue {
    /// Hand `job` to the delivery thread. Gives the job back if the loop is
    /// gone.
    pub(crate) fn post(&self, job: Job) -> Result<(), Job> {
        self.tx.send(job).map_err(|rejected| rejected.0)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half, owned by the delivery thread.
#[derive(Debug)]
pub struct DeliveryLoop {
    rx: UnboundedReceiver<Job>,
}

pub fn channel() -> (DeliveryQueue, DeliveryLoop) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DeliveryQueue { tx }, DeliveryLoop { rx })
}

impl DeliveryLoop {
    /// Run deliveries until every `DeliveryQueue` is dropped.
    ///
    /// Blocks the current thread; must not be called from inside an async
    /// runtime (use [`run_async`](Self::run_async) there).
    pub fn run(mut self) {
        while let Some(job) = self.rx.blocking_recv() {
            job();
        }
        debug!("delivery loop finished");
    }

    /// Run whatever is queued right now and return how many jobs ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    pub async fn run_async(mut self) {
        while let Some(job) = self.rx.recv().await {
            job();
        }
        debug!("delivery loop finished");
    }

    /// Move the loop onto a dedicated thread called `name`.
    pub fn spawn(self, name: impl Into<String>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(name.into())
            .spawn(move || self.run())
    }
}
