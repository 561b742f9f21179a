//! The global repository sync task: one instance per daemon, driven by
//! scheduler ticks.
//!
//! A cycle runs bootstrap (when the repository is missing), remote
//! reconciliation and content sync against the current peer list. Nothing
//! inside a cycle is allowed to fail the caller: every error ends up in the
//! log and in the returned [`CycleReport`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::bootstrap::{BootstrapReport, RepositoryBootstrap};
use crate::cluster::ClusterTopology;
use crate::config::Settings;
use crate::content::{ContentRepository, GitContentRepository};
use crate::gate::CycleGate;
use crate::git::{GitCli, Transport};
use crate::guard::SyncGuard;
use crate::remotes::{ReconcileReport, RemoteCache, RemoteEntry, RemoteError, RemoteRegistry};
use crate::sync::{ContentSynchronizer, SyncOptions, SyncReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Every step of the cycle ran; individual peers may still have failed.
    Completed,
    /// This node has no cluster configuration.
    NotClustered,
    /// Another cycle holds the guard.
    Busy,
    /// Peer list could not be read.
    TopologyUnavailable,
    /// The repository is missing and no peer could be cloned.
    BootstrapFailed,
    /// The cycle body panicked.
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub peers: usize,
    pub bootstrap: Option<BootstrapReport>,
    pub reconcile: Option<ReconcileReport>,
    pub sync: Option<SyncReport>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl CycleReport {
    pub fn new(outcome: CycleOutcome) -> Self {
        Self {
            outcome,
            peers: 0,
            bootstrap: None,
            reconcile: None,
            sync: None,
            errors: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// Counters exposed through the control socket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskStats {
    pub ticks: u64,
    pub cycles: u64,
    pub skipped_busy: u64,
    pub last_outcome: Option<CycleOutcome>,
    pub last_cycle_at: Option<u64>,
    pub last_duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub clustered: bool,
    pub local_address: Option<String>,
    pub execute_every_n_cycles: u32,
    pub running: bool,
    pub cached_remotes: usize,
    pub stats: TaskStats,
}

pub struct GlobalRepoSyncTask {
    gate: CycleGate,
    guard: SyncGuard,
    cache: RemoteCache,
    topology: Arc<dyn ClusterTopology>,
    bootstrap: RepositoryBootstrap,
    registry: RemoteRegistry,
    synchronizer: ContentSynchronizer,
    stats: Mutex<TaskStats>,
}

impl GlobalRepoSyncTask {
    pub fn new(
        settings: &Settings,
        topology: Arc<dyn ClusterTopology>,
        content: Arc<dyn ContentRepository>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let paths = settings.repo_paths();
        let repo_dir = paths.global_repo_dir();
        let options = SyncOptions {
            main_branch: settings.main_branch.clone(),
            commit_message: settings.sync_commit_message.clone(),
            committer_name: settings.committer_name.clone(),
            committer_email: settings.committer_email.clone(),
        };

        Self {
            gate: CycleGate::new(settings.execute_every_n_cycles),
            guard: SyncGuard::with_lock_file(paths.global_lock_path()),
            cache: RemoteCache::new(),
            topology,
            bootstrap: RepositoryBootstrap::new(paths, content, Arc::clone(&transport)),
            registry: RemoteRegistry::new(&repo_dir),
            synchronizer: ContentSynchronizer::new(repo_dir, options, transport),
            stats: Mutex::new(TaskStats::default()),
        }
    }

    /// Task wired to the git CLI and the on-disk repository layout.
    pub fn from_settings(settings: &Settings, topology: Arc<dyn ClusterTopology>) -> Self {
        Self::new(
            settings,
            topology,
            Arc::new(GitContentRepository::new(settings.repo_paths())),
            Arc::new(GitCli::new()),
        )
    }

    /// Scheduler entry point. Runs a cycle on every Nth call and returns its
    /// report; returns None when this tick is not due.
    pub fn execute(&self) -> Option<CycleReport> {
        self.with_stats(|stats| stats.ticks += 1);
        if !self.gate.tick() {
            return None;
        }
        Some(self.run_cycle())
    }

    /// Run a cycle immediately, ignoring the gate but not the guard.
    pub fn sync_now(&self) -> CycleReport {
        self.run_cycle()
    }

    pub fn remote_cache(&self) -> &RemoteCache {
        &self.cache
    }

    /// Remotes configured in the global repository.
    pub fn remotes(&self) -> Result<Vec<RemoteEntry>, RemoteError> {
        self.registry.list()
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            clustered: self.topology.cluster_configuration().is_some(),
            local_address: self.topology.local_address().ok(),
            execute_every_n_cycles: self.gate.threshold(),
            running: self.guard.is_held(),
            cached_remotes: self.cache.len(),
            stats: self.with_stats(|stats| stats.clone()),
        }
    }

    fn run_cycle(&self) -> CycleReport {
        if self.topology.cluster_configuration().is_none() {
            log::debug!("No cluster configuration, skipping global repository sync");
            return self.finish(CycleReport::new(CycleOutcome::NotClustered));
        }

        let Some(_permit) = self.guard.try_acquire() else {
            log::debug!("Another worker is syncing the global repository, abandoning this cycle");
            self.with_stats(|stats| stats.skipped_busy += 1);
            return CycleReport::new(CycleOutcome::Busy);
        };

        let started = Instant::now();
        log::debug!("Starting global repository sync");

        let mut report = CycleReport::new(CycleOutcome::Completed);
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run_locked(&mut report)));
        if let Err(payload) = result {
            let message = panic_message(payload.as_ref());
            log::error!("Global repository sync panicked: {}", message);
            report.outcome = CycleOutcome::Aborted;
            report.errors.push(message);
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        log::debug!(
            "Finished global repository sync in {}ms ({:?})",
            report.duration_ms,
            report.outcome
        );
        self.finish(report)
    }

    fn run_locked(&self, report: &mut CycleReport) {
        let peers = match self
            .topology
            .local_address()
            .and_then(|local| self.topology.cluster_nodes(&local))
        {
            Ok(peers) => peers,
            Err(e) => {
                log::error!("Failed to read cluster members: {}", e);
                report.outcome = CycleOutcome::TopologyUnavailable;
                report.errors.push(e.to_string());
                return;
            }
        };
        report.peers = peers.len();

        match self.bootstrap.exists() {
            Ok(true) => {}
            Ok(false) => {
                log::info!("Global repository missing, cloning from {} peers", peers.len());
                let bootstrap = self.bootstrap.clone_from_peers(&peers);
                let cloned = bootstrap.cloned();
                report.bootstrap = Some(bootstrap);
                if !cloned {
                    report.outcome = CycleOutcome::BootstrapFailed;
                    return;
                }
            }
            Err(e) => {
                log::error!("Failed to read global repository, not cloning: {}", e);
                report.errors.push(e.to_string());
            }
        }

        match self.registry.reconcile(&peers, &self.cache) {
            Ok(reconcile) => report.reconcile = Some(reconcile),
            Err(e) => {
                log::error!("Failed to add remotes for global repository: {}", e);
                report.errors.push(e.to_string());
            }
        }

        match self.synchronizer.sync_all(&peers) {
            Ok(sync) => report.sync = Some(sync),
            Err(e) => {
                log::error!("Failed to update content of global repository: {}", e);
                report.errors.push(e.to_string());
            }
        }
    }

    fn finish(&self, report: CycleReport) -> CycleReport {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.with_stats(|stats| {
            stats.cycles += 1;
            stats.last_outcome = Some(report.outcome);
            stats.last_cycle_at = Some(now);
            stats.last_duration_ms = Some(report.duration_ms);
        });
        report
    }

    fn with_stats<T>(&self, f: impl FnOnce(&mut TaskStats) -> T) -> T {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git;
    use crate::testutil::{commit_file, init_repo, task_fixture, Call, Failure, TaskFixture};
    use crate::types::GitCredentials;
    use git2::Repository;
    use tempfile::{tempdir, TempDir};

    struct Peer {
        root: TempDir,
        repo: Repository,
        address: String,
    }

    impl Peer {
        fn new(address: &str) -> Self {
            let root = tempdir().unwrap();
            let repo = init_repo(&root.path().join("global"));
            commit_file(&repo, "site-config.xml", address, "initial");
            Peer {
                root,
                repo,
                address: address.to_string(),
            }
        }

        fn git_url(&self) -> String {
            format!("{}/sites/{{siteId}}", self.root.path().display())
        }
    }

    fn harness(clustered: bool, every: u32) -> TaskFixture {
        task_fixture(every, clustered)
    }

    fn join(h: &TaskFixture, peer: &Peer) {
        h.registry
            .register(&peer.address, &peer.git_url(), &GitCredentials::None)
            .unwrap();
    }

    fn local_repo(h: &TaskFixture) -> Repository {
        git::open_repository(&h.settings.repo_paths().global_repo_dir()).unwrap()
    }

    #[test]
    fn unclustered_node_does_nothing() {
        let h = harness(false, 1);
        let report = h.task.execute().unwrap();
        assert_eq!(report.outcome, CycleOutcome::NotClustered);
        assert!(h.transport.calls().is_empty());
    }

    #[test]
    fn gate_skips_ticks_that_are_not_due() {
        let h = harness(true, 3);
        assert!(h.task.execute().is_none());
        assert!(h.task.execute().is_none());
        assert!(h.task.execute().is_some());
        assert_eq!(h.task.status().stats.ticks, 3);
        assert_eq!(h.task.status().stats.cycles, 1);
    }

    #[test]
    fn held_guard_means_no_side_effects() {
        let h = harness(true, 1);
        let peer = Peer::new("10.0.0.2");
        join(&h, &peer);

        let permit = h.task.guard.try_acquire().unwrap();
        let report = h.task.execute().unwrap();
        drop(permit);

        assert_eq!(report.outcome, CycleOutcome::Busy);
        assert!(h.transport.calls().is_empty());
        assert!(h.task.remote_cache().is_empty());
        assert_eq!(h.task.status().stats.skipped_busy, 1);
    }

    #[test]
    fn first_cycle_bootstraps_then_syncs() {
        let h = harness(true, 1);
        let peer = Peer::new("10.0.0.2");
        join(&h, &peer);

        let report = h.task.execute().unwrap();

        assert_eq!(report.outcome, CycleOutcome::Completed, "{:?}", report.errors);
        assert!(report.bootstrap.as_ref().unwrap().cloned());
        assert_eq!(
            h.transport.calls(),
            vec![
                Call::Clone {
                    url: format!("{}/global", peer.root.path().display()),
                    remote: "cluster_node_10.0.0.2".to_string(),
                },
                Call::Fetch {
                    remote: "cluster_node_10.0.0.2".to_string()
                },
            ]
        );
        // The clone already configured the remote with the right URL.
        assert_eq!(report.reconcile.as_ref().unwrap().writes(), 0);
        assert!(h.task.remote_cache().contains(&"cluster_node_10.0.0.2".parse().unwrap()));
        assert_eq!(
            git::head_commit_id(&local_repo(&h)).unwrap(),
            git::head_commit_id(&peer.repo).unwrap()
        );
    }

    #[test]
    fn bootstrap_failure_skips_the_rest_of_the_cycle() {
        let h = harness(true, 1);
        let peer = Peer::new("10.0.0.2");
        join(&h, &peer);
        h.transport.fail(
            &format!("{}/global", peer.root.path().display()),
            Failure::NotFound,
        );

        let report = h.task.execute().unwrap();

        assert_eq!(report.outcome, CycleOutcome::BootstrapFailed);
        assert!(report.reconcile.is_none());
        assert!(report.sync.is_none());
        assert!(!h.task.guard.is_held());
    }

    #[test]
    fn later_cycles_pick_up_new_peers_and_content() {
        let h = harness(true, 1);
        let first = Peer::new("10.0.0.2");
        join(&h, &first);
        h.task.execute().unwrap();

        let second = Peer::new("10.0.0.3");
        join(&h, &second);
        let report = h.task.sync_now();

        let reconcile = report.reconcile.unwrap();
        assert_eq!(reconcile.added, vec!["cluster_node_10.0.0.3".to_string()]);
        assert_eq!(reconcile.skipped, 1);
        let sync = report.sync.unwrap();
        assert_eq!(sync.peers.len(), 2);
        assert_eq!(sync.failed(), 0);

        // Unrelated histories: the second peer's content wins.
        let local = local_repo(&h);
        let head = git::head_commit_id(&local).unwrap().unwrap();
        let merge = local.find_commit(head).unwrap();
        assert_eq!(merge.message(), Some(h.settings.sync_commit_message.as_str()));
        let second_head = second.repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(merge.tree_id(), second_head.tree_id());
    }

    #[test]
    fn status_reflects_configuration() {
        let h = harness(true, 4);
        let status = h.task.status();
        assert!(status.clustered);
        assert_eq!(status.local_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(status.execute_every_n_cycles, 4);
        assert!(!status.running);
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
