//! Git operations using a hybrid CLI + libgit2 approach.
//!
//! **CLI (with hardening) for network operations**, behind the [`Transport`] trait:
//! - `clone_repository` - full clone of every branch from a peer
//! - `fetch` - fetch one peer remote into `refs/remotes/<remote>/*`
//!
//! The CLI picks up ssh keys and credential helpers exactly as git would,
//! which libgit2 built without network features cannot.
//!
//! **libgit2 for local operations:**
//! - `open_repository` / `repository_exists`
//! - `first_commit_id` / `head_commit_id` / `has_history`
//! - `merge_theirs` - the peer-wins merge

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, Stdio};

use git2::build::CheckoutBuilder;
use git2::{ErrorCode, Oid, Repository, Signature, Sort};
use thiserror::Error;
use url::Url;

use crate::credentials::{CredentialError, GitAuth};
use crate::types::RemoteName;

/// Errors returned by local git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// libgit2 reported an error.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    /// Repository path does not contain a git repo.
    #[error("repository not found at {0}")]
    NotFound(String),
    /// Output parsing or unexpected git data.
    #[error("failed to parse git data: {0}")]
    ParseError(String),
    /// Underlying IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid inputs were provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Why a clone or fetch against a peer failed.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The peer rejected our credentials or the repository is read-only.
    #[error("not authorized: {0}")]
    Unauthorized(String),
    /// The peer has no repository at that URL, or is unreachable.
    #[error("remote repository not found: {0}")]
    NotFound(String),
    /// The URL or remote name is unusable.
    #[error("invalid remote: {0}")]
    InvalidRemote(String),
    /// Any other failure reported by git.
    #[error("transport failed: {0}")]
    Failed(String),
    /// Spawning git or touching the filesystem failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Credentials could not be provisioned.
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    /// Reading the repository after the transfer failed.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
}

impl TransportError {
    /// Classify git's stderr into a typed failure.
    pub fn from_stderr(stderr: &str) -> Self {
        let message = stderr.trim().to_string();
        let lower = message.to_ascii_lowercase();

        const UNAUTHORIZED: &[&str] = &[
            "not authorized",
            "authentication failed",
            "permission denied",
            "could not read username",
            "could not read password",
            "returned error: 401",
            "returned error: 403",
        ];
        const NOT_FOUND: &[&str] = &[
            "repository not found",
            "does not appear to be a git repository",
            "does not exist",
            "returned error: 404",
            "could not resolve host",
            "connection refused",
            "no route to host",
        ];
        const INVALID: &[&str] = &[
            "unable to find remote helper",
            "is not supported",
            "invalid url",
            "no such remote",
        ];

        if UNAUTHORIZED.iter().any(|p| lower.contains(p)) {
            Self::Unauthorized(message)
        } else if NOT_FOUND.iter().any(|p| lower.contains(p)) {
            Self::NotFound(message)
        } else if INVALID.iter().any(|p| lower.contains(p)) {
            Self::InvalidRemote(message)
        } else {
            Self::Failed(message)
        }
    }
}

/// Branch heads a peer advertised during a fetch, keyed by full ref name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResult {
    advertised: BTreeMap<String, Oid>,
}

impl FetchResult {
    pub fn new(advertised: BTreeMap<String, Oid>) -> Self {
        Self { advertised }
    }

    /// Build from the remote-tracking refs a `+refs/heads/*:refs/remotes/<remote>/*`
    /// fetch just wrote.
    pub fn from_remote_tracking(repo: &Repository, remote: &RemoteName) -> Result<Self, git2::Error> {
        let prefix = format!("refs/remotes/{}/", remote);
        let mut advertised = BTreeMap::new();

        for reference in repo.references_glob(&format!("{}*", prefix))? {
            let reference = reference?;
            let (Some(name), Some(target)) = (reference.name(), reference.target()) else {
                // Symbolic refs such as <remote>/HEAD carry no direct target.
                continue;
            };
            if let Some(branch) = name.strip_prefix(&prefix) {
                advertised.insert(format!("refs/heads/{}", branch), target);
            }
        }

        Ok(Self { advertised })
    }

    /// Look up an advertised ref by exact name.
    pub fn advertised_ref(&self, name: &str) -> Option<Oid> {
        self.advertised.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.advertised.is_empty()
    }
}

/// Network side of the VCS port.
pub trait Transport: Send + Sync {
    /// Clone every branch of `url` into `dest`, naming the origin remote `remote`.
    fn clone_repository(
        &self,
        url: &str,
        remote: &RemoteName,
        dest: &Path,
        auth: &GitAuth,
    ) -> Result<(), TransportError>;

    /// Fetch all branches of `remote` into the repository at `repo_dir`.
    fn fetch(
        &self,
        repo_dir: &Path,
        remote: &RemoteName,
        auth: &GitAuth,
    ) -> Result<FetchResult, TransportError>;
}

/// Validate a peer repository URL before it is stored as a remote.
///
/// Accepts `scheme://host/...` for http, https, ssh, git and file, scp-style
/// `user@host:path`, and absolute local paths. Rejects empty values, leading
/// `-`, whitespace/control characters and unresolved `{...}` templates.
pub fn validate_remote_url(url: &str) -> Result<(), GitError> {
    let invalid = |why: &str| Err(GitError::InvalidInput(format!("{}: {}", why, url)));

    if url.is_empty() {
        return invalid("url cannot be empty");
    }
    if url.starts_with('-') {
        return invalid("url cannot start with '-'");
    }
    if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return invalid("url cannot contain whitespace or control characters");
    }
    if url.contains('{') || url.contains('}') {
        return invalid("url contains an unresolved template");
    }

    if url.contains("://") {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return invalid(&format!("malformed url ({})", e)),
        };
        return match parsed.scheme() {
            "file" => Ok(()),
            "http" | "https" | "ssh" | "git" if parsed.host_str().is_some_and(|h| !h.is_empty()) => {
                Ok(())
            }
            "http" | "https" | "ssh" | "git" => invalid("url has no host"),
            _ => invalid("unsupported url scheme"),
        };
    }

    if url.starts_with('/') {
        return Ok(());
    }

    // scp-like: [user@]host:path
    match url.split_once(':') {
        Some((host, path)) if !host.is_empty() && !host.contains('/') && !path.is_empty() => Ok(()),
        _ => invalid("malformed url"),
    }
}

/// Git CLI wrapper with security hardening.
pub struct GitCli {
    git_path: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Create a new GitCli instance using the system git.
    pub fn new() -> Self {
        Self {
            git_path: "git".into(),
        }
    }

    /// Create a hardened Command with security settings.
    ///
    /// Applies:
    /// - `GIT_TERMINAL_PROMPT=0` - disable interactive prompts
    /// - `core.hooksPath=` - disable hooks execution
    /// - credential configuration from `auth`
    fn command(&self, auth: &GitAuth) -> Command {
        let mut cmd = Command::new(&self.git_path);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.env("GIT_LFS_SKIP_SMUDGE", "1");
        cmd.args(["-c", "core.hooksPath="]);
        auth.apply(&mut cmd);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Report the installed git version, if git can be run at all.
    pub fn version(&self) -> Option<String> {
        let output = Command::new(&self.git_path).arg("--version").output().ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Transport for GitCli {
    fn clone_repository(
        &self,
        url: &str,
        remote: &RemoteName,
        dest: &Path,
        auth: &GitAuth,
    ) -> Result<(), TransportError> {
        validate_remote_url(url).map_err(|e| TransportError::InvalidRemote(e.to_string()))?;

        let dest_existed = dest.exists();
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let output = self
            .command(auth)
            .args(["clone", "--no-single-branch", "--origin"])
            .arg(remote.as_str())
            .arg(url)
            .arg(dest)
            .output()?;

        if !output.status.success() {
            if !dest_existed {
                let _ = std::fs::remove_dir_all(dest);
            }
            return Err(TransportError::from_stderr(&String::from_utf8_lossy(
                &output.stderr,
            )));
        }

        Ok(())
    }

    fn fetch(
        &self,
        repo_dir: &Path,
        remote: &RemoteName,
        auth: &GitAuth,
    ) -> Result<FetchResult, TransportError> {
        let refspec = format!("+refs/heads/*:refs/remotes/{}/*", remote);

        let output = self
            .command(auth)
            .arg("-C")
            .arg(repo_dir)
            .args(["fetch", "--prune", "--no-tags"])
            .arg(remote.as_str())
            .arg(&refspec)
            .output()?;

        if !output.status.success() {
            return Err(TransportError::from_stderr(&String::from_utf8_lossy(
                &output.stderr,
            )));
        }

        // Re-open so the refs written by the CLI are visible.
        let repo = Repository::open(repo_dir)?;
        Ok(FetchResult::from_remote_tracking(&repo, remote)?)
    }
}

/// Open an existing repository at the given path.
pub fn open_repository(path: &Path) -> Result<Repository, GitError> {
    let repo = Repository::open(path).map_err(|e| {
        if e.code() == ErrorCode::NotFound {
            GitError::NotFound(path.display().to_string())
        } else {
            GitError::Git(e)
        }
    })?;
    Ok(repo)
}

/// Check if a path contains a valid git repository.
pub fn repository_exists(path: &Path) -> bool {
    Repository::open(path).is_ok()
}

/// Id of the oldest commit reachable from HEAD, or None for an empty repo.
pub fn first_commit_id(repo: &Repository) -> Result<Option<String>, GitError> {
    let Some(head) = head_commit_id(repo)? else {
        return Ok(None);
    };

    let mut walk = repo.revwalk()?;
    // Changing the sort mode resets the walker, so it goes first.
    walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
    walk.push(head)?;

    Ok(walk.next().transpose()?.map(|oid| oid.to_string()))
}

/// Whether any ref in the repository points at a commit, whatever HEAD says.
pub fn has_history(repo: &Repository) -> Result<bool, GitError> {
    for reference in repo.references()? {
        if reference?.target().is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Commit HEAD points at, or None while the branch is unborn.
pub fn head_commit_id(repo: &Repository) -> Result<Option<Oid>, GitError> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?.id())),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Result of a peer-wins merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The local branch had no commits and now points at the peer commit.
    Initialized(Oid),
    /// The peer commit is already contained in HEAD.
    UpToDate,
    /// HEAD moved forward to the peer commit.
    FastForward(Oid),
    /// Histories diverged; a merge commit carrying the peer's tree was created.
    Merged(Oid),
}

/// Merge `theirs` into the current branch, resolving every divergence in
/// favour of `theirs`. The merge is always committed.
pub fn merge_theirs(
    repo: &Repository,
    theirs: Oid,
    message: &str,
    signature: &Signature<'_>,
) -> Result<MergeOutcome, GitError> {
    let their_commit = repo.find_commit(theirs)?;

    let head = match repo.head() {
        Ok(head) => head,
        Err(e) if e.code() == ErrorCode::UnbornBranch => {
            let branch = repo
                .find_reference("HEAD")?
                .symbolic_target()
                .map(str::to_string)
                .ok_or_else(|| GitError::ParseError("HEAD is not a symbolic ref".to_string()))?;
            repo.reference(&branch, theirs, true, "clustersync: initialize from peer")?;
            repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
            return Ok(MergeOutcome::Initialized(theirs));
        }
        Err(e) => return Err(e.into()),
    };

    let ours = head.peel_to_commit()?;
    if ours.id() == theirs || repo.graph_descendant_of(ours.id(), theirs)? {
        return Ok(MergeOutcome::UpToDate);
    }

    if repo.graph_descendant_of(theirs, ours.id())? {
        repo.checkout_tree(their_commit.as_object(), Some(CheckoutBuilder::new().force()))?;
        if head.is_branch() {
            let mut head = head;
            head.set_target(theirs, "clustersync: fast-forward from peer")?;
        } else {
            repo.set_head_detached(theirs)?;
        }
        return Ok(MergeOutcome::FastForward(theirs));
    }

    let tree = their_commit.tree()?;
    repo.checkout_tree(tree.as_object(), Some(CheckoutBuilder::new().force()))?;
    let merged = repo.commit(
        Some("HEAD"),
        signature,
        signature,
        message,
        &tree,
        &[&ours, &their_commit],
    )?;

    Ok(MergeOutcome::Merged(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::with_credentials;
    use crate::testutil::{commit_file, init_repo, peer, signature};
    use tempfile::tempdir;

    fn require_git() -> bool {
        if GitCli::new().version().is_some() {
            return true;
        }
        eprintln!("Skipping: git binary not available");
        false
    }

    #[test]
    fn repository_exists_returns_false_for_nonexistent() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        assert!(!repository_exists(&temp_dir.path().join("nonexistent")));
    }

    #[test]
    fn repository_exists_returns_false_for_regular_directory() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        assert!(!repository_exists(temp_dir.path()));
    }

    #[test]
    fn open_repository_not_found() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let nonexistent = temp_dir.path().join("nonexistent");

        match open_repository(&nonexistent) {
            Err(GitError::NotFound(path)) => assert!(path.contains("nonexistent")),
            other => panic!("Expected NotFound error, got: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn first_commit_id_is_none_for_empty_repo() {
        let temp_dir = tempdir().unwrap();
        let repo = init_repo(temp_dir.path());
        assert_eq!(first_commit_id(&repo).unwrap(), None);
        assert_eq!(head_commit_id(&repo).unwrap(), None);
    }

    #[test]
    fn first_commit_id_returns_root_commit() {
        let temp_dir = tempdir().unwrap();
        let repo = init_repo(temp_dir.path());
        let root = commit_file(&repo, "a.xml", "1", "first");
        let tip = commit_file(&repo, "a.xml", "2", "second");

        assert_eq!(first_commit_id(&repo).unwrap(), Some(root.to_string()));
        assert_eq!(head_commit_id(&repo).unwrap(), Some(tip));
    }

    #[test]
    fn first_commit_id_ignores_history_off_head() {
        let temp_dir = tempdir().unwrap();
        let repo = init_repo(temp_dir.path());
        commit_file(&repo, "a.xml", "1", "first");
        repo.set_head("refs/heads/other").unwrap();

        assert_eq!(first_commit_id(&repo).unwrap(), None);
        assert!(has_history(&repo).unwrap());
    }

    #[test]
    fn has_history_is_false_for_empty_repo() {
        let temp_dir = tempdir().unwrap();
        let repo = init_repo(temp_dir.path());
        assert!(!has_history(&repo).unwrap());
    }

    #[test]
    fn git_cli_clones_and_fetches_local_peer() {
        if !require_git() {
            return;
        }
        let peer_root = tempdir().unwrap();
        let peer_repo = init_repo(&peer_root.path().join("global"));
        let first = commit_file(&peer_repo, "config.xml", "v1", "v1");
        let member = peer("10.0.0.2", peer_root.path());
        let local = tempdir().unwrap();
        let dest = local.path().join("global");
        let cli = GitCli::new();

        with_credentials(&member, |auth| {
            cli.clone_repository(&member.global_repo_url(), &member.remote_name, &dest, auth)
        })
        .expect("clone failed");

        let repo = open_repository(&dest).unwrap();
        assert_eq!(head_commit_id(&repo).unwrap(), Some(first));
        assert!(repo.find_remote(member.remote_name.as_str()).is_ok());
        assert!(repo.find_remote("origin").is_err());

        let second = commit_file(&peer_repo, "config.xml", "v2", "v2");
        let fetched = with_credentials(&member, |auth| cli.fetch(&dest, &member.remote_name, auth))
            .expect("fetch failed");
        assert_eq!(fetched.advertised_ref("refs/heads/master"), Some(second));

        let repo = open_repository(&dest).unwrap();
        let outcome = merge_theirs(&repo, second, "sync", &signature()).unwrap();
        assert_eq!(outcome, MergeOutcome::FastForward(second));
        assert_eq!(
            std::fs::read_to_string(dest.join("config.xml")).unwrap(),
            "v2"
        );
    }

    #[test]
    fn git_cli_clone_of_missing_peer_is_not_found() {
        if !require_git() {
            return;
        }
        let peer_root = tempdir().unwrap();
        let member = peer("10.0.0.3", peer_root.path());
        let local = tempdir().unwrap();
        let dest = local.path().join("global");

        let err = with_credentials(&member, |auth| {
            GitCli::new().clone_repository(
                &member.global_repo_url(),
                &member.remote_name,
                &dest,
                auth,
            )
        })
        .unwrap_err();

        assert!(matches!(err, TransportError::NotFound(_)), "got {:?}", err);
        assert!(!dest.exists());
    }

    #[test]
    fn git_cli_fetch_of_unknown_remote_fails() {
        if !require_git() {
            return;
        }
        let local = tempdir().unwrap();
        let repo_dir = local.path().join("global");
        let repo = init_repo(&repo_dir);
        commit_file(&repo, "config.xml", "v1", "v1");
        let peer_root = tempdir().unwrap();
        let member = peer("10.0.0.4", peer_root.path());

        let result =
            with_credentials(&member, |auth| GitCli::new().fetch(&repo_dir, &member.remote_name, auth));

        assert!(matches!(result, Err(TransportError::NotFound(_))), "got {:?}", result);
    }

    #[test]
    fn classifies_authentication_failures() {
        let err = TransportError::from_stderr(
            "fatal: Authentication failed for 'https://node/repo/global/'",
        );
        assert!(matches!(err, TransportError::Unauthorized(_)));

        let err = TransportError::from_stderr("git@node: Permission denied (publickey).");
        assert!(matches!(err, TransportError::Unauthorized(_)));
    }

    #[test]
    fn classifies_missing_repositories() {
        let err = TransportError::from_stderr("fatal: repository '/srv/none' does not exist");
        assert!(matches!(err, TransportError::NotFound(_)));

        let err = TransportError::from_stderr(
            "fatal: '/srv/none' does not appear to be a git repository",
        );
        assert!(matches!(err, TransportError::NotFound(_)));

        let err = TransportError::from_stderr(
            "fatal: unable to access 'https://x/': The requested URL returned error: 404",
        );
        assert!(matches!(err, TransportError::NotFound(_)));
    }

    #[test]
    fn classifies_unsupported_protocols() {
        let err = TransportError::from_stderr("fatal: unable to find remote helper for 'htps'");
        assert!(matches!(err, TransportError::InvalidRemote(_)));
    }

    #[test]
    fn unknown_failures_keep_message() {
        match TransportError::from_stderr("  fatal: early EOF\n") {
            TransportError::Failed(msg) => assert_eq!(msg, "fatal: early EOF"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn validate_remote_url_accepts_supported_forms() {
        for url in [
            "https://node:8443/repo/global",
            "http://10.0.0.1/repo/global",
            "ssh://git@node/srv/repos/global",
            "git@node:srv/repos/global",
            "file:///srv/repos/global",
            "/srv/repos/global",
        ] {
            assert!(validate_remote_url(url).is_ok(), "{} should be valid", url);
        }
    }

    #[test]
    fn validate_remote_url_rejects_malformed() {
        for url in [
            "",
            "-uhttps://node",
            "https://",
            "https://node/repo with space",
            "https://node/repo/sites/{siteId}",
            "gopher://node/repo",
            "relative/path",
            "https://[bad/repo",
        ] {
            assert!(
                matches!(validate_remote_url(url), Err(GitError::InvalidInput(_))),
                "{} should be rejected",
                url
            );
        }
    }

    #[test]
    fn fetch_result_prefers_exact_names() {
        let oid = Oid::from_str("0123456789abcdef0123456789abcdef01234567").unwrap();
        let mut refs = BTreeMap::new();
        refs.insert("refs/heads/master".to_string(), oid);
        let result = FetchResult::new(refs);

        assert_eq!(result.advertised_ref("master"), None);
        assert_eq!(result.advertised_ref("refs/heads/master"), Some(oid));
        assert!(!result.is_empty());
    }

    #[test]
    fn fetch_result_reads_remote_tracking_refs() {
        let temp_dir = tempdir().unwrap();
        let repo = init_repo(temp_dir.path());
        let oid = commit_file(&repo, "a.xml", "1", "first");
        repo.reference("refs/remotes/cluster_node_a/master", oid, true, "test")
            .unwrap();
        repo.reference("refs/remotes/cluster_node_b/master", oid, true, "test")
            .unwrap();

        let remote: RemoteName = "cluster_node_a".parse().unwrap();
        let result = FetchResult::from_remote_tracking(&repo, &remote).unwrap();
        assert_eq!(result.advertised_ref("refs/heads/master"), Some(oid));
        assert_eq!(result.advertised.len(), 1);
    }

    #[test]
    fn merge_up_to_date_leaves_head() {
        let temp_dir = tempdir().unwrap();
        let repo = init_repo(temp_dir.path());
        let older = commit_file(&repo, "a.xml", "1", "first");
        let head = commit_file(&repo, "a.xml", "2", "second");

        let outcome = merge_theirs(&repo, older, "sync", &signature()).unwrap();
        assert_eq!(outcome, MergeOutcome::UpToDate);
        assert_eq!(head_commit_id(&repo).unwrap(), Some(head));
    }

    #[test]
    fn merge_fast_forwards_when_behind() {
        let temp_dir = tempdir().unwrap();
        let repo = init_repo(temp_dir.path());
        let base = commit_file(&repo, "a.xml", "1", "first");
        let ahead = commit_file(&repo, "a.xml", "2", "second");

        // Rewind the branch so the newer commit is ahead of HEAD.
        repo.reference("refs/heads/master", base, true, "rewind").unwrap();
        repo.checkout_head(Some(CheckoutBuilder::new().force())).unwrap();

        let outcome = merge_theirs(&repo, ahead, "sync", &signature()).unwrap();
        assert_eq!(outcome, MergeOutcome::FastForward(ahead));
        assert_eq!(head_commit_id(&repo).unwrap(), Some(ahead));
        let content = std::fs::read_to_string(temp_dir.path().join("a.xml")).unwrap();
        assert_eq!(content, "2");
    }

    #[test]
    fn merge_diverged_takes_their_tree() {
        let temp_dir = tempdir().unwrap();
        let repo = init_repo(temp_dir.path());
        let base = commit_file(&repo, "a.xml", "base", "base");
        let theirs = commit_file(&repo, "a.xml", "theirs", "peer change");

        repo.reference("refs/heads/master", base, true, "rewind").unwrap();
        repo.checkout_head(Some(CheckoutBuilder::new().force())).unwrap();
        let ours = commit_file(&repo, "local.xml", "mine", "local change");

        let outcome = merge_theirs(&repo, theirs, "Cluster sync", &signature()).unwrap();
        let MergeOutcome::Merged(merged) = outcome else {
            panic!("expected merge commit, got {:?}", outcome);
        };

        let commit = repo.find_commit(merged).unwrap();
        assert_eq!(commit.message(), Some("Cluster sync"));
        assert_eq!(commit.parent_ids().collect::<Vec<_>>(), vec![ours, theirs]);
        assert_eq!(
            commit.tree_id(),
            repo.find_commit(theirs).unwrap().tree_id()
        );
        assert_eq!(
            std::fs::read_to_string(temp_dir.path().join("a.xml")).unwrap(),
            "theirs"
        );
        assert!(!temp_dir.path().join("local.xml").exists());
    }

    #[test]
    fn merge_into_unborn_branch_initializes_it() {
        let peer_dir = tempdir().unwrap();
        let peer = init_repo(peer_dir.path());
        let theirs = commit_file(&peer, "a.xml", "1", "first");

        let local_dir = tempdir().unwrap();
        let local = init_repo(local_dir.path());
        let mut remote = local
            .remote("cluster_node_peer", peer_dir.path().to_str().unwrap())
            .unwrap();
        remote
            .fetch(&["+refs/heads/*:refs/remotes/cluster_node_peer/*"], None, None)
            .unwrap();

        let outcome = merge_theirs(&local, theirs, "sync", &signature()).unwrap();
        assert_eq!(outcome, MergeOutcome::Initialized(theirs));
        assert_eq!(head_commit_id(&local).unwrap(), Some(theirs));
        assert!(local_dir.path().join("a.xml").exists());
    }
}
