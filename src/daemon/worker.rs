//! Worker threads that run sync cycles off the scheduler and socket threads.
//!
//! Every worker pulls from one shared channel, so several ticks may be in
//! flight at once. The task's guard makes sure only one of them actually
//! touches the global repository.

use std::sync::Arc;
use std::sync::mpsc as oneshot;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};
use thiserror::Error;

use crate::task::{CycleReport, GlobalRepoSyncTask};

const QUEUE_DEPTH: usize = 100;

/// Requests the workers can handle.
pub enum WorkerRequest {
    /// Scheduled tick (fire and forget). The task decides whether it is due.
    Tick,

    /// Immediate cycle requested from the CLI; the report is sent back.
    SyncNow { reply: oneshot::Sender<CycleReport> },

    /// Stop the worker that receives it.
    Shutdown,
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("worker pool is shut down")]
    Closed,
    #[error("worker dropped the request")]
    NoReply,
}

struct Worker {
    id: usize,
    receiver: Receiver<WorkerRequest>,
    task: Arc<GlobalRepoSyncTask>,
}

impl Worker {
    fn run(self) {
        log::debug!("Worker {} started", self.id);

        loop {
            match self.receiver.recv() {
                Ok(WorkerRequest::Tick) => {
                    if let Some(report) = self.task.execute() {
                        log::debug!("Worker {} finished cycle: {:?}", self.id, report.outcome);
                    }
                }
                Ok(WorkerRequest::SyncNow { reply }) => {
                    log::info!("Worker {} running requested sync", self.id);
                    let _ = reply.send(self.task.sync_now());
                }
                Ok(WorkerRequest::Shutdown) => {
                    log::debug!("Worker {} shutting down", self.id);
                    break;
                }
                Err(_) => {
                    log::debug!("Worker {} channel closed, exiting", self.id);
                    break;
                }
            }
        }
    }
}

/// Fixed-size pool of workers sharing one request queue.
pub struct WorkerPool {
    sender: Sender<WorkerRequest>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers (at least one) for `task`.
    pub fn spawn(task: Arc<GlobalRepoSyncTask>, count: usize) -> std::io::Result<Self> {
        let (sender, receiver) = bounded(QUEUE_DEPTH);
        let mut pool = Self {
            sender,
            threads: Vec::new(),
        };

        for id in 0..count.max(1) {
            let worker = Worker {
                id,
                receiver: receiver.clone(),
                task: Arc::clone(&task),
            };
            let thread = thread::Builder::new()
                .name(format!("clustersync-worker-{}", id))
                .spawn(move || worker.run())?;
            pool.threads.push(thread);
        }

        log::info!("Started {} sync workers", pool.threads.len());
        Ok(pool)
    }

    /// Clone of the queue sender for the scheduler and socket server.
    pub fn sender(&self) -> Sender<WorkerRequest> {
        self.sender.clone()
    }

    /// Run a cycle on a worker and wait for its report.
    pub fn sync_now(&self) -> Result<CycleReport, WorkerError> {
        request_sync(&self.sender)
    }

    /// Stop every worker and wait for them. Safe to call more than once.
    pub fn shutdown(&mut self) {
        for _ in 0..self.threads.len() {
            let _ = self.sender.send(WorkerRequest::Shutdown);
        }
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Queue an immediate cycle through `sender` and block for its report.
pub fn request_sync(sender: &Sender<WorkerRequest>) -> Result<CycleReport, WorkerError> {
    let (tx, rx) = oneshot::channel();
    sender
        .send(WorkerRequest::SyncNow { reply: tx })
        .map_err(|_| WorkerError::Closed)?;
    rx.recv().map_err(|_| WorkerError::NoReply)
}
