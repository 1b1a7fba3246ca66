//! Cluster layer
//!
//! Everything that describes a single managed cluster: its declarative spec,
//! its lifecycle state machine, the runtime object the registry holds and the
//! health monitor that keeps its reachability current.

pub mod fsm;
pub mod monitor;
pub mod spec;
pub mod state;

pub use fsm::{ClusterFsm, ClusterStatus, FsmError, LifecycleEvent, Target, CLUSTER_TRANSITIONS};
pub use monitor::spawn_health_monitor;
pub use spec::{ClusterConfig, ClusterSpec, ClusterView, NetworkSpec, NodeRole, NodeSpec};
pub use state::{CancelError, Cluster};
