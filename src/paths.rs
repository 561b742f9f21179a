//! Repository directory layout
//!
//! ```text
//! <repo_base_path>/
//! ├── global/                 # Shared global repository (working tree)
//! │   └── .git/
//! ├── sites/
//! │   └── <site>/             # Per-site repositories (not synced here)
//! └── locks/
//!     └── global.lock         # flock held while a sync cycle runs
//! ```

use std::path::PathBuf;

/// Manages filesystem paths under the repository base directory.
#[derive(Debug, Clone)]
pub struct RepoPaths {
    root: PathBuf,
    global: String,
}

impl RepoPaths {
    /// `global` is the global repository's directory name relative to `root`.
    pub fn new(root: impl Into<PathBuf>, global: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            global: global.into(),
        }
    }

    /// Working tree of the global repository: `{root}/{global}`
    pub fn global_repo_dir(&self) -> PathBuf {
        self.root.join(&self.global)
    }

    /// Working tree for a site: `{root}/sites/{site}`
    pub fn site_repo_dir(&self, site: &str) -> PathBuf {
        self.root.join("sites").join(site)
    }

    /// Repository directory for a content scope. The empty scope is the
    /// global repository.
    pub fn scope_dir(&self, scope: &str) -> PathBuf {
        if scope.is_empty() {
            self.global_repo_dir()
        } else {
            self.site_repo_dir(scope)
        }
    }

    /// Returns the locks directory: `{root}/locks`
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Lock held for the duration of a global sync cycle: `{root}/locks/{global}.lock`
    pub fn global_lock_path(&self) -> PathBuf {
        self.locks_dir().join(format!("{}.lock", self.global.replace('/', "__")))
    }
}
