//! Keeps one git remote per cluster peer configured in the global repository.
//!
//! Reconciling a remote reads and possibly rewrites the repository config, so
//! each peer is reconciled once per process lifetime. [`RemoteCache`] records
//! which peers are done; it is owned by the sync task and only ever grows.

use std::path::PathBuf;

use dashmap::DashSet;
use git2::{ErrorCode, Repository};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::git::{self, GitError};
use crate::types::{ClusterMember, RemoteName};

#[derive(Error, Debug)]
pub enum RemoteError {
    /// The global repository could not be opened. Aborts the whole reconcile.
    #[error("failed to open global repository: {0}")]
    Open(#[source] GitError),
    /// The peer's URL is malformed. The peer is retried on the next reconcile.
    #[error("invalid remote url for {remote}: {url}")]
    InvalidRemoteUrl { remote: RemoteName, url: String },
    /// libgit2 refused to add or update the remote.
    #[error("failed to configure remote {remote}: {source}")]
    Service {
        remote: RemoteName,
        #[source]
        source: git2::Error,
    },
}

/// Remote names already reconciled in this process.
#[derive(Debug, Default)]
pub struct RemoteCache {
    verified: DashSet<RemoteName>,
}

impl RemoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &RemoteName) -> bool {
        self.verified.contains(name)
    }

    pub fn insert(&self, name: RemoteName) {
        self.verified.insert(name);
    }

    pub fn len(&self) -> usize {
        self.verified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verified.is_empty()
    }

    /// Snapshot of the cached names, sorted.
    pub fn names(&self) -> Vec<RemoteName> {
        let mut names: Vec<RemoteName> = self.verified.iter().map(|n| n.key().clone()).collect();
        names.sort();
        names
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFailure {
    pub remote: String,
    pub url: String,
    pub error: String,
}

/// What one reconcile pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub legacy_removed: Vec<String>,
    /// Peers skipped because they were already in the cache.
    pub skipped: usize,
    pub failures: Vec<RemoteFailure>,
}

impl ReconcileReport {
    /// Number of add or update calls made against the repository config.
    pub fn writes(&self) -> usize {
        self.added.len() + self.updated.len()
    }
}

/// A configured remote, for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub url: Option<String>,
}

pub struct RemoteRegistry {
    repo_dir: PathBuf,
}

impl RemoteRegistry {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    /// Make sure every peer not yet in `cache` has a correctly configured remote.
    ///
    /// Only a failure to open the repository is returned as an error. Per-peer
    /// failures are logged, recorded in the report and left out of the cache.
    pub fn reconcile(
        &self,
        peers: &[ClusterMember],
        cache: &RemoteCache,
    ) -> Result<ReconcileReport, RemoteError> {
        let mut report = ReconcileReport::default();

        let pending: Vec<&ClusterMember> = peers
            .iter()
            .filter(|peer| !cache.contains(&peer.remote_name))
            .collect();
        report.skipped = peers.len() - pending.len();
        if pending.is_empty() {
            return Ok(report);
        }

        let repo = git::open_repository(&self.repo_dir).map_err(RemoteError::Open)?;

        for peer in pending {
            match reconcile_one(&repo, peer, &mut report) {
                Ok(()) => cache.insert(peer.remote_name.clone()),
                Err(e) => {
                    log::error!("Failed to reconcile remote {}: {}", peer.remote_name, e);
                    report.failures.push(RemoteFailure {
                        remote: peer.remote_name.to_string(),
                        url: peer.global_repo_url(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Remotes currently configured in the global repository.
    pub fn list(&self) -> Result<Vec<RemoteEntry>, RemoteError> {
        let repo = git::open_repository(&self.repo_dir).map_err(RemoteError::Open)?;
        let names = repo
            .remotes()
            .map_err(|e| RemoteError::Open(GitError::Git(e)))?;

        let mut entries = Vec::new();
        for name in names.iter().flatten() {
            let url = repo
                .find_remote(name)
                .ok()
                .and_then(|remote| remote.url().map(str::to_string));
            entries.push(RemoteEntry {
                name: name.to_string(),
                url,
            });
        }
        Ok(entries)
    }
}

fn reconcile_one(
    repo: &Repository,
    peer: &ClusterMember,
    report: &mut ReconcileReport,
) -> Result<(), RemoteError> {
    let name = &peer.remote_name;
    let url = peer.global_repo_url();
    let service = |source: git2::Error| RemoteError::Service {
        remote: name.clone(),
        source,
    };

    if git::validate_remote_url(&url).is_err() {
        return Err(RemoteError::InvalidRemoteUrl {
            remote: name.clone(),
            url,
        });
    }

    if let Some(legacy) = name.legacy_name() {
        if repo.find_remote(legacy).is_ok() {
            match repo.remote_delete(legacy) {
                Ok(()) => {
                    log::info!("Removed legacy remote {} (now {})", legacy, name);
                    report.legacy_removed.push(legacy.to_string());
                }
                Err(e) => log::debug!("Failed to remove legacy remote {}: {}", legacy, e),
            }
        }
    }

    match repo.find_remote(name.as_str()) {
        Ok(remote) => {
            if remote.url() != Some(url.as_str()) {
                log::info!(
                    "Updating remote {} url from {} to {}",
                    name,
                    remote.url().unwrap_or("<none>"),
                    url
                );
                repo.remote_set_url(name.as_str(), &url).map_err(service)?;
                report.updated.push(name.to_string());
            }
        }
        Err(e) if e.code() == ErrorCode::NotFound => {
            log::info!("Adding remote {} -> {}", name, url);
            repo.remote(name.as_str(), &url).map_err(service)?;
            report.added.push(name.to_string());
        }
        Err(e) => return Err(service(e)),
    }

    Ok(())
}
