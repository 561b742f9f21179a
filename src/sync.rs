//! Pulls the main branch of every peer into the global repository.
//!
//! Peers are processed one after another against a single repository handle;
//! merges rewrite the shared working tree, so they never run in parallel.

use std::path::PathBuf;
use std::sync::Arc;

use git2::{Oid, Repository, Signature};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credentials::with_credentials;
use crate::git::{self, FetchResult, GitError, MergeOutcome, Transport, TransportError};
use crate::types::{ClusterMember, RemoteName};

#[derive(Error, Debug)]
pub enum SyncError {
    /// The global repository could not be opened. Aborts the whole pass.
    #[error("failed to open global repository: {0}")]
    Open(#[source] GitError),
    /// The configured committer is not a valid git signature.
    #[error("invalid committer identity: {0}")]
    Signature(#[source] git2::Error),
    #[error("fetch from {remote} failed: {source}")]
    Fetch {
        remote: RemoteName,
        #[source]
        source: TransportError,
    },
    #[error("merge from {remote} failed: {source}")]
    Merge {
        remote: RemoteName,
        #[source]
        source: GitError,
    },
}

/// What happened to one peer during a sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PeerOutcome {
    /// The local branch was empty and now starts at the peer's commit.
    Initialized { commit: String },
    UpToDate,
    FastForward { commit: String },
    /// Histories diverged and the peer's content replaced the local content.
    Merged { commit: String, peer_commit: String },
    /// The peer does not advertise the main branch.
    NothingAdvertised,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSync {
    pub remote: String,
    #[serde(flatten)]
    pub outcome: PeerOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub peers: Vec<PeerSync>,
}

impl SyncReport {
    pub fn failed(&self) -> usize {
        self.peers
            .iter()
            .filter(|p| matches!(p.outcome, PeerOutcome::Failed { .. }))
            .count()
    }

    /// Peers whose content changed the local branch.
    pub fn changed(&self) -> usize {
        self.peers
            .iter()
            .filter(|p| {
                matches!(
                    p.outcome,
                    PeerOutcome::Initialized { .. }
                        | PeerOutcome::FastForward { .. }
                        | PeerOutcome::Merged { .. }
                )
            })
            .count()
    }
}

/// Merge settings applied to every peer.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub main_branch: String,
    pub commit_message: String,
    pub committer_name: String,
    pub committer_email: String,
}

pub struct ContentSynchronizer {
    repo_dir: PathBuf,
    options: SyncOptions,
    transport: Arc<dyn Transport>,
}

impl ContentSynchronizer {
    pub fn new(repo_dir: impl Into<PathBuf>, options: SyncOptions, transport: Arc<dyn Transport>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            options,
            transport,
        }
    }

    /// Fetch and merge every peer in order. A failing peer is logged and
    /// recorded; the remaining peers are still processed.
    pub fn sync_all(&self, peers: &[ClusterMember]) -> Result<SyncReport, SyncError> {
        let repo = git::open_repository(&self.repo_dir).map_err(SyncError::Open)?;
        let signature = Signature::now(&self.options.committer_name, &self.options.committer_email)
            .map_err(SyncError::Signature)?;

        let mut report = SyncReport::default();
        for peer in peers {
            let outcome = match self.sync_one(&repo, peer, &signature) {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!(
                        "Failed to sync global repository from {} ({}): {}",
                        peer.remote_name,
                        peer.global_repo_url(),
                        e
                    );
                    PeerOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            report.peers.push(PeerSync {
                remote: peer.remote_name.to_string(),
                outcome,
            });
        }

        Ok(report)
    }

    /// Fetch `peer`'s remote and merge its main branch, peer wins.
    fn sync_one(
        &self,
        repo: &Repository,
        peer: &ClusterMember,
        signature: &Signature<'_>,
    ) -> Result<PeerOutcome, SyncError> {
        let remote = &peer.remote_name;

        let fetched = with_credentials(peer, |auth| {
            self.transport.fetch(&self.repo_dir, remote, auth)
        })
        .map_err(|source| SyncError::Fetch {
            remote: remote.clone(),
            source,
        })?;

        let Some(theirs) = self.advertised_main(&fetched) else {
            log::debug!(
                "{} does not advertise {}, nothing to sync",
                remote,
                self.options.main_branch
            );
            return Ok(PeerOutcome::NothingAdvertised);
        };

        let before = git::head_commit_id(repo).map_err(|source| SyncError::Merge {
            remote: remote.clone(),
            source,
        })?;

        let merged = git::merge_theirs(repo, theirs, &self.options.commit_message, signature)
            .map_err(|source| SyncError::Merge {
                remote: remote.clone(),
                source,
            })?;

        Ok(match merged {
            MergeOutcome::Initialized(commit) => {
                log::info!("Initialized global repository at {} from {}", commit, remote);
                PeerOutcome::Initialized {
                    commit: commit.to_string(),
                }
            }
            MergeOutcome::UpToDate => {
                log::debug!("Global repository already contains {} from {}", theirs, remote);
                PeerOutcome::UpToDate
            }
            MergeOutcome::FastForward(commit) => {
                log::info!("Fast-forwarded global repository to {} from {}", commit, remote);
                PeerOutcome::FastForward {
                    commit: commit.to_string(),
                }
            }
            MergeOutcome::Merged(commit) => {
                log::warn!(
                    "Global repository diverged from {}: local content at {} replaced by {} (merge {})",
                    remote,
                    before.map(|oid| oid.to_string()).unwrap_or_default(),
                    theirs,
                    commit
                );
                PeerOutcome::Merged {
                    commit: commit.to_string(),
                    peer_commit: theirs.to_string(),
                }
            }
        })
    }

    fn advertised_main(&self, fetched: &FetchResult) -> Option<Oid> {
        let branch = &self.options.main_branch;
        fetched
            .advertised_ref(branch)
            .or_else(|| fetched.advertised_ref(&format!("refs/heads/{}", branch)))
    }
}
