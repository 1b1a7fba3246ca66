pub mod cluster;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod logs;
pub mod manager;
pub mod provisioning;
pub mod store;

pub use cluster::{
    CancelError, Cluster, ClusterConfig, ClusterSpec, ClusterStatus, ClusterView, LifecycleEvent,
    NetworkSpec, NodeRole, NodeSpec,
};
pub use config::OrchestratorConfig;
pub use error::{ApiError, ErrorKind};
pub use event_bus::EventBus;
pub use logs::{LogManager, LogSink};
pub use manager::{ClusterEvent, ClusterManager};
pub use provisioning::{
    ApplyOutcome, EngineError, KubeConnection, NoStorageNodes, NodeListener, ProvisionState,
    ProvisioningEngine, SimulatedEngine,
};
pub use store::{ClusterRecord, ClusterStore, MemStore, RocksDBStore, StoreError};
