//! Cluster topology: who this node is and which peers it syncs with.

mod registry;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use registry::{ClusterRegistry, MemberRecord, now_unix};

use crate::config::ClusterSettings;
use crate::types::ClusterMember;

#[derive(Error, Debug)]
pub enum TopologyError {
    /// No cluster block is configured for this node.
    #[error("node is not part of a cluster")]
    NotClustered,
    #[error("member registry error: {0}")]
    Registry(#[from] rusqlite::Error),
}

/// Cluster membership settings of the local node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfiguration {
    pub local_address: String,
    pub git_url: String,
    pub member_timeout: Duration,
}

/// Source of cluster membership for a sync cycle.
pub trait ClusterTopology: Send + Sync {
    /// None when this node is not clustered.
    fn cluster_configuration(&self) -> Option<ClusterConfiguration>;

    fn local_address(&self) -> Result<String, TopologyError>;

    /// Peers to sync with, in the order they should be tried.
    fn cluster_nodes(&self, excluding: &str) -> Result<Vec<ClusterMember>, TopologyError>;
}

/// Topology read from the member registry, filtered by heartbeat age.
pub struct RegistryTopology {
    registry: Arc<ClusterRegistry>,
    settings: Option<ClusterSettings>,
}

impl RegistryTopology {
    pub fn new(registry: Arc<ClusterRegistry>, settings: Option<ClusterSettings>) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    /// Register the local node in the registry so peers can find it.
    pub fn register_local(&self) -> Result<(), TopologyError> {
        let settings = self.settings.as_ref().ok_or(TopologyError::NotClustered)?;
        self.registry
            .register(&settings.local_address, &settings.git_url, &settings.auth)?;
        Ok(())
    }

    /// Refresh the local node's heartbeat, re-registering it if it was removed.
    pub fn heartbeat(&self) -> Result<(), TopologyError> {
        let address = self.local_address()?;
        if !self.registry.heartbeat(&address)? {
            log::info!("Local node {} missing from registry, registering", address);
            self.register_local()?;
        }
        Ok(())
    }
}

impl ClusterTopology for RegistryTopology {
    fn cluster_configuration(&self) -> Option<ClusterConfiguration> {
        self.settings.as_ref().map(|s| ClusterConfiguration {
            local_address: s.local_address.clone(),
            git_url: s.git_url.clone(),
            member_timeout: Duration::from_secs(s.member_timeout_secs),
        })
    }

    fn local_address(&self) -> Result<String, TopologyError> {
        self.settings
            .as_ref()
            .map(|s| s.local_address.clone())
            .ok_or(TopologyError::NotClustered)
    }

    fn cluster_nodes(&self, excluding: &str) -> Result<Vec<ClusterMember>, TopologyError> {
        let timeout = self
            .settings
            .as_ref()
            .map(|s| s.member_timeout_secs)
            .ok_or(TopologyError::NotClustered)?;

        let records = self.registry.active_members(excluding, timeout)?;
        let mut members = Vec::with_capacity(records.len());
        for record in records {
            match ClusterMember::new(&record.local_address, record.git_url, record.auth) {
                Ok(member) => members.push(member),
                Err(e) => log::warn!(
                    "Ignoring cluster member with unusable address {:?}: {}",
                    record.local_address,
                    e
                ),
            }
        }
        Ok(members)
    }
}
