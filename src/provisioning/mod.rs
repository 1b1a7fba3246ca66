//! Provisioning Engine boundary
//!
//! The orchestrator never provisions hosts itself. It hands a `ClusterConfig`
//! and the previous opaque `ProvisionState` to a `ProvisioningEngine` and gets
//! back a new state plus a live `KubeConnection` to the cluster's API server.

pub mod simulated;

pub use simulated::SimulatedEngine;

use crate::cluster::{Cluster, ClusterConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Internal provisioning state, produced and consumed only by the engine
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvisionState(serde_json::Value);

impl ProvisionState {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// The state of a cluster that has never been applied
    pub fn empty() -> Self {
        Self(serde_json::Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Failure reported by the provisioning engine or a cluster connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for EngineError {}

/// Live handle to a provisioned cluster's API server
#[async_trait]
pub trait KubeConnection: Send + Sync + 'static {
    /// Probe the API server, returning its version string
    async fn server_version(&self) -> Result<String, EngineError>;
}

/// Result of an apply run
///
/// The state is returned even when the run failed so the next attempt can
/// resume from whatever the engine managed to do.
pub struct ApplyOutcome {
    pub state: ProvisionState,
    pub connection: Result<Arc<dyn KubeConnection>, EngineError>,
}

/// External collaborator performing the actual bring-up and teardown
///
/// `apply` must be idempotent for identical (config, previous state) input and
/// tolerate a stale `previous` after a crash. Both long-running calls observe
/// `cancel` cooperatively; the orchestrator never aborts them.
#[async_trait]
pub trait ProvisioningEngine: Send + Sync + 'static {
    async fn apply(
        &self,
        cancel: CancellationToken,
        config: ClusterConfig,
        previous: ProvisionState,
        log: Logger,
    ) -> ApplyOutcome;

    async fn destroy(
        &self,
        cancel: CancellationToken,
        config: ClusterConfig,
        log: Logger,
    ) -> Result<(), EngineError>;

    /// Rebuild a live connection from the credentials kept in `state`
    fn connect(&self, state: &ProvisionState) -> Result<Arc<dyn KubeConnection>, EngineError>;

    /// Kubeconfig of `user` stored in `state`, if any
    fn kube_config(
        &self,
        state: &ProvisionState,
        user: &str,
    ) -> Result<Option<String>, EngineError>;
}

/// Consulted before removing a node, so storage colocated on it is not broken
#[async_trait]
pub trait NodeListener: Send + Sync + 'static {
    async fn is_storage_node(&self, cluster: &Cluster, node: &str) -> Result<bool, EngineError>;
}

/// Listener for deployments without a storage subsystem
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStorageNodes;

#[async_trait]
impl NodeListener for NoStorageNodes {
    async fn is_storage_node(&self, _cluster: &Cluster, _node: &str) -> Result<bool, EngineError> {
        Ok(false)
    }
}
