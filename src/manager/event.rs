//! Notifications published by the cluster manager

use crate::cluster::ClusterView;

/// Lifecycle notifications for Event Bus subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    /// A cluster finished its first successful create, or was recovered as created
    Created { view: ClusterView },

    /// A created cluster is being deleted
    Deleted { name: String },

    /// Health probe failed on a running cluster
    Unreachable { name: String },

    /// Health probe recovered on an unreachable cluster
    Reachable { name: String },
}

impl ClusterEvent {
    pub fn cluster_name(&self) -> &str {
        match self {
            ClusterEvent::Created { view } => &view.name,
            ClusterEvent::Deleted { name }
            | ClusterEvent::Unreachable { name }
            | ClusterEvent::Reachable { name } => name,
        }
    }
}
