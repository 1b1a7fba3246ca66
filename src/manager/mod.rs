//! Cluster manager layer
//!
//! The registry of managed clusters and the workflows it launches. The
//! `ClusterManager` is built once per process and shared as `Arc`; every
//! lifecycle operation runs as its own tokio task.

pub mod event;
pub mod recovery;
pub mod registry;
pub mod validate;
pub mod workflow;

pub use event::ClusterEvent;
pub use registry::ClusterManager;
pub use validate::{generate_config, merge_config, validate_for_create, validate_for_update, Cidr};
