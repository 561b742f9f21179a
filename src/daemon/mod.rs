//! Daemon that runs the global repository sync task on a schedule.

mod scheduler;
mod socket;
mod worker;

use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::cluster::{ClusterRegistry, ClusterTopology, RegistryTopology, TopologyError};
use crate::config::{ConfigError, Settings};
use crate::task::GlobalRepoSyncTask;

pub use scheduler::SchedulerHandle;
pub use socket::{Context, SocketServerHandle, socket_path};
pub use worker::{WorkerError, WorkerPool, WorkerRequest, request_sync};

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to open member registry: {0}")]
    Registry(#[from] rusqlite::Error),
    #[error("failed to register local node: {0}")]
    Topology(#[from] TopologyError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("daemon already running (socket {0})")]
    AlreadyRunning(PathBuf),
}

/// Whether a daemon answers on the control socket.
pub fn is_daemon_running() -> bool {
    UnixStream::connect(socket_path()).is_ok()
}

/// Run the daemon in the foreground until Ctrl-C or a `stop` request.
pub fn start(settings: Settings) -> Result<(), DaemonError> {
    settings.validate()?;
    if is_daemon_running() {
        return Err(DaemonError::AlreadyRunning(socket_path()));
    }

    let registry = ClusterRegistry::open(&settings.state_db)?;
    registry.init()?;
    let topology = Arc::new(RegistryTopology::new(
        Arc::new(registry),
        settings.cluster.clone(),
    ));

    match topology.cluster_configuration() {
        Some(cluster) => {
            topology.register_local()?;
            log::info!(
                "Registered {} in cluster member registry {}",
                cluster.local_address,
                settings.state_db.display()
            );
        }
        None => log::warn!("No cluster configuration; sync cycles will be skipped"),
    }

    let task = Arc::new(GlobalRepoSyncTask::from_settings(
        &settings,
        topology.clone(),
    ));
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut workers = WorkerPool::spawn(Arc::clone(&task), settings.workers)?;
    let mut server = SocketServerHandle::spawn(Context {
        task: Arc::clone(&task),
        workers: workers.sender(),
        start_time: Instant::now(),
        shutdown: shutdown.clone(),
    })?;
    let mut scheduler = SchedulerHandle::spawn(
        Duration::from_secs(settings.tick_interval_secs),
        topology,
        workers.sender(),
        Arc::new(AtomicBool::new(false)),
    )?;

    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;

    log::info!(
        "Daemon started (pid {}), global repository {}",
        std::process::id(),
        settings.repo_paths().global_repo_dir().display()
    );

    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    log::info!("Shutting down");
    scheduler.shutdown();
    server.shutdown();
    workers.shutdown();
    log::info!("Daemon stopped");
    Ok(())
}
