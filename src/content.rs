//! Read access to the local content repositories.

use crate::git::{self, GitError};
use crate::paths::RepoPaths;

/// Scope naming the global repository.
pub const GLOBAL_SCOPE: &str = "";

/// Query side of the local content store.
pub trait ContentRepository: Send + Sync {
    /// Id of the oldest commit in `scope`, or None when the repository is
    /// missing or has no commits. Read failures are errors, not absence.
    fn first_commit_id(&self, scope: &str) -> Result<Option<String>, GitError>;
}

/// Content repository backed by the on-disk layout under the repo base path.
#[derive(Debug, Clone)]
pub struct GitContentRepository {
    paths: RepoPaths,
}

impl GitContentRepository {
    pub fn new(paths: RepoPaths) -> Self {
        Self { paths }
    }
}

impl ContentRepository for GitContentRepository {
    fn first_commit_id(&self, scope: &str) -> Result<Option<String>, GitError> {
        let repo = match git::open_repository(&self.paths.scope_dir(scope)) {
            Ok(repo) => repo,
            Err(GitError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        git::first_commit_id(&repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{commit_file, init_repo};
    use tempfile::tempdir;

    #[test]
    fn missing_repository_has_no_first_commit() {
        let dir = tempdir().unwrap();
        let content = GitContentRepository::new(RepoPaths::new(dir.path(), "global"));
        assert_eq!(content.first_commit_id(GLOBAL_SCOPE).unwrap(), None);
    }

    #[test]
    fn empty_repository_has_no_first_commit() {
        let dir = tempdir().unwrap();
        let paths = RepoPaths::new(dir.path(), "global");
        init_repo(&paths.global_repo_dir());

        let content = GitContentRepository::new(paths);
        assert_eq!(content.first_commit_id(GLOBAL_SCOPE).unwrap(), None);
    }

    #[test]
    fn scopes_resolve_to_their_own_repository() {
        let dir = tempdir().unwrap();
        let paths = RepoPaths::new(dir.path(), "global");
        let global = init_repo(&paths.global_repo_dir());
        let root = commit_file(&global, "config.xml", "<a/>", "initial");
        commit_file(&global, "config.xml", "<b/>", "second");
        let site = init_repo(&paths.site_repo_dir("editorial"));
        let site_root = commit_file(&site, "page.xml", "<p/>", "site initial");

        let content = GitContentRepository::new(paths);
        assert_eq!(
            content.first_commit_id(GLOBAL_SCOPE).unwrap(),
            Some(root.to_string())
        );
        assert_eq!(
            content.first_commit_id("editorial").unwrap(),
            Some(site_root.to_string())
        );
    }
}
