//! Shared types for clustersync

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix every cluster remote name carries. Remotes created before the
/// prefix was introduced use the bare sanitized address.
pub const CLUSTER_NODE_REMOTE_NAME_PREFIX: &str = "cluster_node_";

/// Templated site segment in a peer's advertised repository URL.
pub const SITE_URL_SEGMENT: &str = "/sites/{siteId}";

/// Segment the site template is rewritten to for the global repository.
pub const GLOBAL_URL_SEGMENT: &str = "/global";

/// Error type for parsing failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("value cannot be empty")]
    Empty,
    #[error("invalid character in value: {0:?}")]
    InvalidCharacter(char),
    #[error("value cannot start with '{0}'")]
    InvalidStart(char),
    #[error("value cannot end with '{0}'")]
    InvalidEnd(char),
    #[error("value cannot contain '..'")]
    DoubleDot,
    #[error("value cannot end with '.lock'")]
    LockSuffix,
}

/// Name of a git remote inside the global repository.
///
/// Validation rules:
/// - Non-empty
/// - ASCII alphanumerics, `.`, `_` and `-` only
/// - Cannot start with `-` or `.`, cannot end with `.` or `.lock`
/// - Cannot contain `..`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteName(String);

impl RemoteName {
    /// Derive the remote name for a cluster node from its address.
    ///
    /// `10.0.0.5:8080` becomes `cluster_node_10.0.0.5_8080`.
    pub fn for_address(address: &str) -> Result<Self, ParseError> {
        let sanitized: String = address
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if sanitized.is_empty() {
            return Err(ParseError::Empty);
        }
        format!("{CLUSTER_NODE_REMOTE_NAME_PREFIX}{sanitized}").parse()
    }

    /// Returns the remote name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The pre-prefix name the same node was registered under, if this name
    /// carries the cluster prefix.
    pub fn legacy_name(&self) -> Option<&str> {
        self.0
            .strip_prefix(CLUSTER_NODE_REMOTE_NAME_PREFIX)
            .filter(|rest| !rest.is_empty())
    }
}

impl FromStr for RemoteName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        for start in ['-', '.'] {
            if s.starts_with(start) {
                return Err(ParseError::InvalidStart(start));
            }
        }

        if s.ends_with('.') {
            return Err(ParseError::InvalidEnd('.'));
        }

        if s.ends_with(".lock") {
            return Err(ParseError::LockSuffix);
        }

        if s.contains("..") {
            return Err(ParseError::DoubleDot);
        }

        for c in s.chars() {
            if !c.is_ascii_alphanumeric() && c != '.' && c != '_' && c != '-' {
                return Err(ParseError::InvalidCharacter(c));
            }
        }

        Ok(RemoteName(s.to_string()))
    }
}

impl TryFrom<String> for RemoteName {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RemoteName> for String {
    fn from(name: RemoteName) -> Self {
        name.0
    }
}

impl fmt::Display for RemoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a peer's repository authenticates outbound clone and fetch commands.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GitCredentials {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Token {
        token: String,
    },
    PrivateKey {
        private_key: String,
    },
}

impl GitCredentials {
    /// Short label used in logs and the member table.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Token { .. } => "token",
            Self::PrivateKey { .. } => "private_key",
        }
    }
}

// Secrets never reach the logs.
impl fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Token { .. } => f.debug_struct("Token").field("token", &"<redacted>").finish(),
            Self::PrivateKey { .. } => f
                .debug_struct("PrivateKey")
                .field("private_key", &"<redacted>")
                .finish(),
        }
    }
}

/// A peer node as seen by one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMember {
    pub local_address: String,
    pub git_url: String,
    pub remote_name: RemoteName,
    pub auth: GitCredentials,
}

impl ClusterMember {
    /// Build a member, deriving its remote name from the address.
    pub fn new(
        local_address: impl Into<String>,
        git_url: impl Into<String>,
        auth: GitCredentials,
    ) -> Result<Self, ParseError> {
        let local_address = local_address.into();
        let remote_name = RemoteName::for_address(&local_address)?;
        Ok(Self {
            local_address,
            git_url: git_url.into(),
            remote_name,
            auth,
        })
    }

    /// The member's URL pointed at the global repository instead of a site.
    pub fn global_repo_url(&self) -> String {
        global_repo_url(&self.git_url)
    }
}

/// Rewrite a templated site URL to address the global repository.
pub fn global_repo_url(git_url: &str) -> String {
    git_url.replace(SITE_URL_SEGMENT, GLOBAL_URL_SEGMENT)
}
