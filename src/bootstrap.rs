//! First-time creation of the global repository by cloning from a peer.

use std::io;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::content::{ContentRepository, GLOBAL_SCOPE};
use crate::credentials::with_credentials;
use crate::git::{self, GitError, Transport, TransportError};
use crate::paths::RepoPaths;
use crate::types::ClusterMember;

/// One clone attempt against one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneAttempt {
    pub remote: String,
    pub url: String,
    /// None when the clone succeeded.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapReport {
    pub attempts: Vec<CloneAttempt>,
    pub cloned_from: Option<String>,
}

impl BootstrapReport {
    pub fn cloned(&self) -> bool {
        self.cloned_from.is_some()
    }
}

pub struct RepositoryBootstrap {
    paths: RepoPaths,
    content: Arc<dyn ContentRepository>,
    transport: Arc<dyn Transport>,
}

impl RepositoryBootstrap {
    pub fn new(
        paths: RepoPaths,
        content: Arc<dyn ContentRepository>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            paths,
            content,
            transport,
        }
    }

    /// Whether the global repository is present and has history.
    pub fn exists(&self) -> Result<bool, GitError> {
        Ok(self
            .content
            .first_commit_id(GLOBAL_SCOPE)?
            .is_some_and(|id| !id.is_empty()))
    }

    /// Clone the global repository from the first peer that serves it.
    ///
    /// Peers are tried in the order given. Every failure is logged and the
    /// next peer is tried; the report says whether any attempt succeeded.
    pub fn clone_from_peers(&self, peers: &[ClusterMember]) -> BootstrapReport {
        let dest = self.paths.global_repo_dir();
        let mut report = BootstrapReport::default();

        if let Err(e) = ensure_replaceable(&dest) {
            log::error!("Not cloning global repository: {}", e);
            return report;
        }

        for peer in peers {
            let url = peer.global_repo_url();
            log::info!(
                "Cloning global repository from {} ({})",
                peer.remote_name,
                url
            );

            match self.clone_from(peer, &url, &dest) {
                Ok(()) => {
                    log::info!("Cloned global repository from {}", peer.remote_name);
                    report.attempts.push(CloneAttempt {
                        remote: peer.remote_name.to_string(),
                        url,
                        error: None,
                    });
                    report.cloned_from = Some(peer.remote_name.to_string());
                    break;
                }
                Err(e) => {
                    log_clone_failure(peer, &url, &e);
                    report.attempts.push(CloneAttempt {
                        remote: peer.remote_name.to_string(),
                        url,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if !report.cloned() && !peers.is_empty() {
            log::error!(
                "Could not clone global repository from any of {} peers",
                peers.len()
            );
        }
        report
    }

    fn clone_from(&self, peer: &ClusterMember, url: &str, dest: &Path) -> Result<(), TransportError> {
        let parent = dest.parent().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no parent directory", dest.display()),
            )
        })?;
        std::fs::create_dir_all(parent)?;

        // Clone next to the destination so a failed attempt leaves it untouched.
        let staging = tempfile::Builder::new()
            .prefix(".clustersync-clone-")
            .tempdir_in(parent)?;
        let staged = staging.path().join("repo");

        with_credentials(peer, |auth| {
            self.transport
                .clone_repository(url, &peer.remote_name, &staged, auth)
        })?;

        install(&staged, dest)?;
        Ok(())
    }
}

/// Move a finished clone into place, replacing only a directory without history.
fn install(staged: &Path, dest: &Path) -> io::Result<()> {
    ensure_replaceable(dest)?;
    if dest.exists() {
        log::debug!("Removing stale global repository at {}", dest.display());
        std::fs::remove_dir_all(dest)?;
    }
    std::fs::rename(staged, dest)
}

/// Fails when `dest` holds a repository with history, or one that cannot be read.
fn ensure_replaceable(dest: &Path) -> io::Result<()> {
    if !dest.exists() {
        return Ok(());
    }
    let occupied = |why: String| {
        io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("refusing to replace {}: {}", dest.display(), why),
        )
    };
    match git::open_repository(dest) {
        Err(GitError::NotFound(_)) => Ok(()),
        Err(e) => Err(occupied(format!("repository cannot be opened: {}", e))),
        Ok(repo) => match git::has_history(&repo) {
            Ok(false) => Ok(()),
            Ok(true) => Err(occupied("repository already has history".to_string())),
            Err(e) => Err(occupied(format!("history cannot be read: {}", e))),
        },
    }
}

fn log_clone_failure(peer: &ClusterMember, url: &str, err: &TransportError) {
    let remote = &peer.remote_name;
    match err {
        TransportError::Unauthorized(_) => log::error!(
            "Failed to clone global repository from {} ({}): bad credentials or read only repository: {}",
            remote,
            url,
            err
        ),
        TransportError::NotFound(_) => log::error!(
            "Failed to clone global repository from {} ({}): remote repository not found: {}",
            remote,
            url,
            err
        ),
        TransportError::InvalidRemote(_) => log::error!(
            "Failed to clone global repository from {}: invalid remote url {}: {}",
            remote,
            url,
            err
        ),
        _ => log::error!(
            "Failed to clone global repository from {} ({}): {}",
            remote,
            url,
            err
        ),
    }
}
