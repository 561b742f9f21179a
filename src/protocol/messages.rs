use serde::{Deserialize, Serialize};

use crate::remotes::RemoteEntry;
use crate::task::{CycleReport, TaskStatus};

/// All RPC methods supported by the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    /// Get daemon and task status
    Status,

    /// Run a sync cycle now and wait for its report
    Sync,

    /// List remotes of the global repository
    Remotes,

    /// Stop the daemon
    Stop,
}

/// Status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    pub version: String,
    pub pid: u32,
    pub uptime_secs: u64,
    pub task: TaskStatus,
}

/// Remotes response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotesResult {
    pub remotes: Vec<RemoteEntry>,
    /// Remote names verified since the daemon started
    #[serde(default)]
    pub cached: Vec<String>,
}

/// All possible success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Status(StatusResult),
    Sync(CycleReport),
    Remotes(RemotesResult),
    Ok(()), // For stop - unit type serializes as null
}

/// RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(-32603, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(-1, msg)
    }
}
