//! Configuration for the cluster orchestrator

use crate::logs::DEFAULT_LOG_BUFFER_BYTES;
use std::time::Duration;

/// Default period between two health probes of a ready cluster
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Settings of a `ClusterManager`.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Period of every cluster's health monitor
    pub health_check_interval: Duration,

    /// Version tag stamped on newly created cluster records
    pub platform_version: String,

    /// Upper bound in bytes of a single workflow log buffer
    pub log_buffer_bytes: usize,

    /// How many notifications a slow event bus subscriber may fall behind
    pub event_bus_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            platform_version: env!("CARGO_PKG_VERSION").to_string(),
            log_buffer_bytes: DEFAULT_LOG_BUFFER_BYTES,
            event_bus_capacity: 100,
        }
    }
}

impl OrchestratorConfig {
    /// Set the health probe period.
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the platform version tag.
    pub fn with_platform_version(mut self, version: impl Into<String>) -> Self {
        self.platform_version = version.into();
        self
    }

    pub fn with_log_buffer_bytes(mut self, bytes: usize) -> Self {
        self.log_buffer_bytes = bytes;
        self
    }

    pub fn with_event_bus_capacity(mut self, capacity: usize) -> Self {
        self.event_bus_capacity = capacity;
        self
    }
}
