//! Fixtures shared by unit tests: on-disk repositories, cluster members and a
//! transport that clones and fetches locally through libgit2.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use git2::build::RepoBuilder;
use git2::{Commit, FetchOptions, FetchPrune, Oid, Repository, RepositoryInitOptions, Signature};

use tempfile::{tempdir, TempDir};

use crate::cluster::{ClusterRegistry, RegistryTopology};
use crate::config::{ClusterSettings, Settings};
use crate::content::GitContentRepository;
use crate::credentials::GitAuth;
use crate::git::{FetchResult, Transport, TransportError};
use crate::task::GlobalRepoSyncTask;
use crate::types::{ClusterMember, GitCredentials, RemoteName};

pub fn signature() -> Signature<'static> {
    Signature::now("Test", "test@example.com").unwrap()
}

/// Initialise a non-bare repository whose unborn branch is `master`.
pub fn init_repo(path: &Path) -> Repository {
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("master");
    Repository::init_opts(path, &opts).unwrap()
}

/// Write `name` in the working tree and commit it on top of HEAD.
pub fn commit_file(repo: &Repository, name: &str, content: &str, message: &str) -> Oid {
    let workdir = repo.workdir().unwrap();
    std::fs::write(workdir.join(name), content).unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(name)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

    let parents: Vec<Commit<'_>> = match repo.head() {
        Ok(head) => vec![head.peel_to_commit().unwrap()],
        Err(_) => Vec::new(),
    };
    let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();
    let sig = signature();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
        .unwrap()
}

/// A peer whose templated URL resolves to `<root>/global` on disk.
pub fn peer(address: &str, root: &Path) -> ClusterMember {
    ClusterMember::new(
        address,
        format!("{}/sites/{{siteId}}", root.display()),
        GitCredentials::None,
    )
    .unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Clone { url: String, remote: String },
    Fetch { remote: String },
}

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Unauthorized,
    NotFound,
}

/// Transport double: records every call and performs it with libgit2
/// against local paths, unless the URL or remote was told to fail.
#[derive(Default)]
pub struct LocalTransport {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<String, Failure>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail clones of `key` (a URL) or fetches of `key` (a remote name).
    pub fn fail(&self, key: &str, failure: Failure) {
        self.failures.lock().unwrap().insert(key.to_string(), failure);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self, key: &str) -> Result<(), TransportError> {
        match self.failures.lock().unwrap().get(key) {
            Some(Failure::Unauthorized) => Err(TransportError::Unauthorized(format!(
                "{}: not authorized",
                key
            ))),
            Some(Failure::NotFound) => Err(TransportError::NotFound(format!("{}: not found", key))),
            None => Ok(()),
        }
    }
}

impl Transport for LocalTransport {
    fn clone_repository(
        &self,
        url: &str,
        remote: &RemoteName,
        dest: &Path,
        auth: &GitAuth,
    ) -> Result<(), TransportError> {
        assert!(auth.artifact_path().exists(), "credentials missing during clone");
        self.calls.lock().unwrap().push(Call::Clone {
            url: url.to_string(),
            remote: remote.to_string(),
        });
        self.check(url)?;

        RepoBuilder::new()
            .remote_create(|repo, _name, url| repo.remote(remote.as_str(), url))
            .clone(url, dest)?;
        Ok(())
    }

    fn fetch(
        &self,
        repo_dir: &Path,
        remote: &RemoteName,
        auth: &GitAuth,
    ) -> Result<FetchResult, TransportError> {
        assert!(auth.artifact_path().exists(), "credentials missing during fetch");
        self.calls.lock().unwrap().push(Call::Fetch {
            remote: remote.to_string(),
        });
        self.check(remote.as_str())?;

        let repo = Repository::open(repo_dir)?;
        let mut handle = repo.find_remote(remote.as_str())?;
        let mut opts = FetchOptions::new();
        opts.prune(FetchPrune::On);
        handle.fetch(
            &[format!("+refs/heads/*:refs/remotes/{}/*", remote).as_str()],
            Some(&mut opts),
            None,
        )?;
        Ok(FetchResult::from_remote_tracking(&repo, remote)?)
    }
}

/// A task over a scratch directory and an in-memory member registry.
pub struct TaskFixture {
    pub base: TempDir,
    pub settings: Settings,
    pub registry: Arc<ClusterRegistry>,
    pub topology: Arc<RegistryTopology>,
    pub transport: Arc<LocalTransport>,
    pub task: Arc<GlobalRepoSyncTask>,
}

pub fn task_fixture(every: u32, clustered: bool) -> TaskFixture {
    let base = tempdir().unwrap();
    let settings = Settings {
        repo_base_path: base.path().join("repos"),
        execute_every_n_cycles: every,
        state_db: base.path().join("state.db"),
        cluster: clustered.then(|| ClusterSettings {
            local_address: "10.0.0.1".to_string(),
            git_url: "https://10.0.0.1/repo/sites/{siteId}".to_string(),
            auth: GitCredentials::None,
            member_timeout_secs: 300,
        }),
        ..Settings::default()
    };

    let registry = ClusterRegistry::open_in_memory().unwrap();
    registry.init().unwrap();
    let registry = Arc::new(registry);
    let topology = Arc::new(RegistryTopology::new(
        registry.clone(),
        settings.cluster.clone(),
    ));
    if clustered {
        topology.register_local().unwrap();
    }

    let transport = Arc::new(LocalTransport::new());
    let task = Arc::new(GlobalRepoSyncTask::new(
        &settings,
        topology.clone(),
        Arc::new(GitContentRepository::new(settings.repo_paths())),
        transport.clone(),
    ));

    TaskFixture {
        base,
        settings,
        registry,
        topology,
        transport,
        task,
    }
}
