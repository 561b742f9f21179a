//! Scheduler thread that ticks the sync task at a fixed interval.
//!
//! Each tick also refreshes the local node's heartbeat so peers keep it in
//! their member lists. Whether a tick runs a full cycle is the task's call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};

use crate::cluster::{ClusterTopology, RegistryTopology};
use crate::daemon::worker::WorkerRequest;

/// Granularity of the shutdown check while waiting for the next tick.
const SLEEP_SLICE: Duration = Duration::from_millis(200);

pub struct Scheduler {
    interval: Duration,
    topology: Arc<RegistryTopology>,
    worker_tx: Sender<WorkerRequest>,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        interval: Duration,
        topology: Arc<RegistryTopology>,
        worker_tx: Sender<WorkerRequest>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            interval,
            topology,
            worker_tx,
            shutdown,
        }
    }

    /// Run the scheduler loop until shutdown or until the workers are gone.
    pub fn run(self) {
        log::info!("Scheduler started, ticking every {:?}", self.interval);

        loop {
            if !self.wait_for_tick() {
                log::info!("Scheduler shutting down");
                return;
            }

            self.heartbeat();

            match self.worker_tx.try_send(WorkerRequest::Tick) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log::debug!("Worker queue full, dropping tick");
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::warn!("Worker channel closed, stopping scheduler");
                    return;
                }
            }
        }
    }

    /// Sleep for one interval in small slices. Returns false on shutdown.
    fn wait_for_tick(&self) -> bool {
        let mut remaining = self.interval;
        while !remaining.is_zero() {
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }
            let slice = remaining.min(SLEEP_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
        !self.shutdown.load(Ordering::SeqCst)
    }

    fn heartbeat(&self) {
        if self.topology.cluster_configuration().is_none() {
            return;
        }
        if let Err(e) = self.topology.heartbeat() {
            log::warn!("Failed to refresh cluster heartbeat: {}", e);
        }
    }
}

/// Handle for managing the scheduler thread.
pub struct SchedulerHandle {
    thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl SchedulerHandle {
    pub fn spawn(
        interval: Duration,
        topology: Arc<RegistryTopology>,
        worker_tx: Sender<WorkerRequest>,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        let scheduler = Scheduler::new(interval, topology, worker_tx, shutdown.clone());

        let thread = thread::Builder::new()
            .name("clustersync-scheduler".to_string())
            .spawn(move || scheduler.run())?;

        Ok(Self {
            thread: Some(thread),
            shutdown,
        })
    }

    /// Signal shutdown and wait for thread to exit.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
