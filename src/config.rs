//! Daemon configuration loaded from a JSON file.
//!
//! Every field has a default, so `{}` is a valid configuration for a node
//! that is not (yet) part of a cluster.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::RepoPaths;
use crate::types::GitCredentials;

/// Commit message used for merges that must not trigger content reprocessing.
pub const DEFAULT_SYNC_COMMIT_MESSAGE: &str = "Cluster sync: merge from peer (no processing)";

/// Errors returned while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid JSON for `Settings`.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Identity of the local node inside the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Address peers know this node by.
    pub local_address: String,
    /// URL peers clone and fetch from; may contain `/sites/{siteId}`.
    pub git_url: String,
    /// Credentials peers use when talking to this node.
    #[serde(default)]
    pub auth: GitCredentials,
    /// Members without a heartbeat for this long are left out of a cycle.
    #[serde(default = "default_member_timeout_secs")]
    pub member_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub repo_base_path: PathBuf,
    pub global_repo_path: String,
    pub sync_commit_message: String,
    pub main_branch: String,
    pub execute_every_n_cycles: u32,
    pub tick_interval_secs: u64,
    pub workers: usize,
    pub committer_name: String,
    pub committer_email: String,
    pub state_db: PathBuf,
    pub cluster: Option<ClusterSettings>,
}

fn default_member_timeout_secs() -> u64 {
    5 * 60
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("clustersync")
}

impl Default for Settings {
    fn default() -> Self {
        let data = data_dir();
        Self {
            repo_base_path: data.join("repos"),
            global_repo_path: "global".to_string(),
            sync_commit_message: DEFAULT_SYNC_COMMIT_MESSAGE.to_string(),
            main_branch: "master".to_string(),
            execute_every_n_cycles: 3,
            tick_interval_secs: 10,
            workers: 2,
            committer_name: "clustersync".to_string(),
            committer_email: "clustersync@localhost".to_string(),
            state_db: data.join("state.db"),
            cluster: None,
        }
    }
}

impl Settings {
    /// Default location: `<config dir>/clustersync/config.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("clustersync")
            .join("config.json")
    }

    /// Load settings from `path`, validating the result.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path` if given, else from the default path when it exists,
    /// else fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    log::debug!("No config at {}, using defaults", path.display());
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global_repo_path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "global_repo_path cannot be empty".to_string(),
            ));
        }
        if Path::new(&self.global_repo_path).is_absolute() || self.global_repo_path.contains("..")
        {
            return Err(ConfigError::Invalid(
                "global_repo_path must be relative to repo_base_path".to_string(),
            ));
        }
        if self.sync_commit_message.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "sync_commit_message cannot be empty".to_string(),
            ));
        }
        if self.main_branch.trim().is_empty() {
            return Err(ConfigError::Invalid("main_branch cannot be empty".to_string()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_secs must be at least 1".to_string(),
            ));
        }
        if let Some(cluster) = &self.cluster {
            if cluster.local_address.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "cluster.local_address cannot be empty".to_string(),
                ));
            }
            if cluster.git_url.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "cluster.git_url cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Filesystem layout derived from the repository settings.
    pub fn repo_paths(&self) -> RepoPaths {
        RepoPaths::new(&self.repo_base_path, &self.global_repo_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_object_uses_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.global_repo_path, "global");
        assert_eq!(settings.main_branch, "master");
        assert_eq!(settings.execute_every_n_cycles, 3);
        assert!(settings.cluster.is_none());
        settings.validate().unwrap();
    }

    #[test]
    fn load_reads_cluster_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "repo_base_path": "/srv/repos",
                "execute_every_n_cycles": 5,
                "cluster": {
                    "local_address": "10.0.0.1",
                    "git_url": "ssh://git@10.0.0.1/srv/repos/sites/{siteId}",
                    "auth": {"type": "private_key", "private_key": "KEY"}
                }
            }"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.repo_base_path, PathBuf::from("/srv/repos"));
        assert_eq!(settings.execute_every_n_cycles, 5);
        let cluster = settings.cluster.unwrap();
        assert_eq!(cluster.local_address, "10.0.0.1");
        assert_eq!(cluster.member_timeout_secs, 300);
        assert_eq!(cluster.auth.kind(), "private_key");
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Settings::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn load_missing_file_is_read_error() {
        let dir = tempdir().unwrap();
        let err = Settings::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let settings = Settings {
            workers: 0,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_empty_commit_message() {
        let settings = Settings {
            sync_commit_message: "  ".to_string(),
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_escaping_global_path() {
        let settings = Settings {
            global_repo_path: "../elsewhere".to_string(),
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }
}
