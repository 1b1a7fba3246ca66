use crate::cluster::ClusterConfig;
use crate::provisioning::ProvisionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable representation of one managed cluster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub name: String,
    pub config: ClusterConfig,
    /// Opaque to the orchestrator, owned by the provisioning engine
    pub state: ProvisionState,
    /// Set once a create run has succeeded
    pub created: bool,
    pub create_time: DateTime<Utc>,
    pub delete_time: Option<DateTime<Utc>>,
    pub platform_version: String,
}

impl ClusterRecord {
    pub fn new(config: ClusterConfig, platform_version: &str) -> Self {
        Self {
            name: config.cluster_name.clone(),
            config,
            state: ProvisionState::empty(),
            created: false,
            create_time: Utc::now(),
            delete_time: None,
            platform_version: platform_version.to_string(),
        }
    }

    pub fn is_deleting(&self) -> bool {
        self.delete_time.is_some()
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
