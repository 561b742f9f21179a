//! Unix socket server for handling JSON-RPC requests from the CLI.

use std::io::BufReader;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::Sender;

use crate::daemon::worker::{WorkerRequest, request_sync};
use crate::git::GitError;
use crate::protocol::{
    RemotesResult, Request, Response, RpcError, RpcErrorResponse, RpcResponse, StatusResult,
    read_request, write_message,
};
use crate::remotes::RemoteError;
use crate::task::GlobalRepoSyncTask;

/// Get the socket path for the daemon.
///
/// Uses `$XDG_RUNTIME_DIR/clustersync.sock` on Linux.
/// Falls back to `/tmp/clustersync-$UID.sock`.
pub fn socket_path() -> PathBuf {
    if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("clustersync.sock");
    }

    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/clustersync-{}.sock", uid))
}

/// Context shared by request handlers.
pub struct Context {
    pub task: Arc<GlobalRepoSyncTask>,
    pub workers: Sender<WorkerRequest>,
    pub start_time: Instant,
    /// Set by `stop`; the daemon's main loop watches it.
    pub shutdown: Arc<AtomicBool>,
}

/// Handle a single JSON-RPC request.
fn handle_request(ctx: &Context, request: Request) -> Result<Response, RpcError> {
    match request {
        Request::Status => Ok(Response::Status(StatusResult {
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
            uptime_secs: ctx.start_time.elapsed().as_secs(),
            task: ctx.task.status(),
        })),

        Request::Sync => {
            let report =
                request_sync(&ctx.workers).map_err(|e| RpcError::internal(e.to_string()))?;
            Ok(Response::Sync(report))
        }

        Request::Remotes => {
            let remotes = ctx.task.remotes().map_err(|e| match e {
                RemoteError::Open(GitError::NotFound(_)) => {
                    RpcError::not_found("global repository not found")
                }
                other => RpcError::internal(other.to_string()),
            })?;

            let cached = ctx
                .task
                .remote_cache()
                .names()
                .into_iter()
                .map(|name| name.to_string())
                .collect();

            Ok(Response::Remotes(RemotesResult { remotes, cached }))
        }

        Request::Stop => {
            log::info!("Stop requested over control socket");
            ctx.shutdown.store(true, Ordering::SeqCst);
            Ok(Response::Ok(()))
        }
    }
}

/// Handle a connected client, reading requests and writing responses.
fn handle_client(ctx: &Context, stream: UnixStream) {
    let mut reader = BufReader::new(&stream);
    let mut writer = &stream;

    loop {
        let rpc_req = match read_request(&mut reader) {
            Ok(Some(req)) => req,
            Ok(None) => break, // Client disconnected
            Err(e) => {
                log::warn!("Failed to read request: {}", e);
                break;
            }
        };

        let id = rpc_req.id.clone();

        match handle_request(ctx, rpc_req.request) {
            Ok(result) => {
                let response = RpcResponse::new(result, id);
                if let Err(e) = write_message(&mut writer, &response) {
                    log::warn!("Failed to write response: {}", e);
                    break;
                }
            }
            Err(error) => {
                let response = RpcErrorResponse::new(error, id);
                if let Err(e) = write_message(&mut writer, &response) {
                    log::warn!("Failed to write error response: {}", e);
                    break;
                }
            }
        }
    }
}

/// Handle for managing the socket server thread.
pub struct SocketServerHandle {
    path: PathBuf,
    thread: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl SocketServerHandle {
    /// Bind the default socket path and spawn the server thread.
    pub fn spawn(ctx: Context) -> std::io::Result<Self> {
        Self::spawn_at(socket_path(), ctx)
    }

    pub fn spawn_at(path: PathBuf, ctx: Context) -> std::io::Result<Self> {
        // Remove stale socket file
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        log::info!("Socket server listening on {}", path.display());

        let ctx = Arc::new(ctx);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let cleanup_path = path.clone();
        let thread = thread::Builder::new()
            .name("clustersync-socket".to_string())
            .spawn(move || {
                for stream in listener.incoming() {
                    if stop_flag.load(Ordering::SeqCst) {
                        break;
                    }

                    match stream {
                        Ok(stream) => {
                            let ctx = Arc::clone(&ctx);
                            thread::spawn(move || handle_client(&ctx, stream));
                        }
                        Err(e) => {
                            if stop_flag.load(Ordering::SeqCst) {
                                break;
                            }
                            log::warn!("Failed to accept connection: {}", e);
                        }
                    }
                }

                let _ = std::fs::remove_file(&cleanup_path);
                log::info!("Socket server stopped");
            })?;

        Ok(Self {
            path,
            thread: Some(thread),
            stop,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Signal shutdown and wait for thread to exit.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);

        // Connect to the socket to unblock accept()
        let _ = UnixStream::connect(&self.path);

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SocketServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
