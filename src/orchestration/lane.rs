//! Dedicated control execution contexts.
//!
//! An `ExecutionLane` owns one OS thread that runs submitted jobs strictly
//! one at a time, in submission order. The orchestrator runs Serial tasks on
//! one lane and Main tasks on another; the Main lane can be shared with the
//! rest of the application so all Main work is serialized on one thread.

use crossbeam_channel::{Receiver, Sender};
use std::thread::{self, ThreadId};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::util::catch_panic;
use crate::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single-threaded, FIFO job executor.
///
/// The thread exits once the lane is dropped and its queue is drained.
pub struct ExecutionLane {
    name: String,
    tx: Sender<Job>,
    thread_id: ThreadId,
}

impl ExecutionLane {
    /// Start a lane on a new thread named `name`.
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let lane_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || lane_loop(&lane_name, rx))?;
        debug!("ExecutionLane::spawn name={}", name);

        Ok(Self {
            name,
            tx,
            thread_id: handle.thread().id(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the calling thread is this lane's thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Run `f` on the lane and wait for its value.
    ///
    /// Runs `f` inline when polled from the lane's own thread, so a caller
    /// blocking the lane on this future cannot deadlock it.
    ///
    /// # Errors
    /// - `Error::LaneClosed` if the lane thread is gone
    /// - `Error::TaskJoin` if `f` panicked
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_current() {
            return catch_panic(f).map_err(Error::TaskJoin);
        }

        let (tx, rx) = oneshot::channel();
        self.submit(Box::new(move || {
            let _ = tx.send(catch_panic(f));
        }))?;

        rx.await
            .map_err(|_| Error::LaneClosed(self.name.clone()))?
            .map_err(|message| Error::TaskJoin(format!("job panicked on lane {}: {}", self.name, message)))
    }

    /// Blocking form of [`ExecutionLane::run`] for synchronous callers.
    ///
    /// Runs `f` inline when called from the lane's own thread.
    pub fn run_blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_current() {
            return catch_panic(f).map_err(Error::TaskJoin);
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        self.submit(Box::new(move || {
            let _ = tx.send(catch_panic(f));
        }))?;

        rx.recv()
            .map_err(|_| Error::LaneClosed(self.name.clone()))?
            .map_err(|message| Error::TaskJoin(format!("job panicked on lane {}: {}", self.name, message)))
    }

    fn submit(&self, job: Job) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|_| Error::LaneClosed(self.name.clone()))
    }
}

fn lane_loop(name: &str, rx: Receiver<Job>) {
    for job in rx.iter() {
        if let Err(message) = catch_panic(job) {
            warn!("Job panicked on lane {}: {}", name, message);
        }
    }
    debug!("ExecutionLane {} stopped", name);
}

impl std::fmt::Debug for ExecutionLane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionLane")
            .field("name", &self.name)
            .finish()
    }
}
