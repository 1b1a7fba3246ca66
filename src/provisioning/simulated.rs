//! In-process provisioning engine
//!
//! Used by the binary's dry-run mode and by tests. Every knob can be changed
//! while workflows are running: delays, scripted failures, panics and the
//! reachability reported by the connections it hands out.

use super::{ApplyOutcome, EngineError, KubeConnection, ProvisionState, ProvisioningEngine};
use crate::cluster::ClusterConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use slog::{info, warn, Logger};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Connection whose health follows a shared flag
pub struct SimulatedConnection {
    cluster: String,
    reachable: Arc<AtomicBool>,
}

#[async_trait]
impl KubeConnection for SimulatedConnection {
    async fn server_version(&self) -> Result<String, EngineError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok("v1.18.0-simulated".to_string())
        } else {
            Err(EngineError::new(format!(
                "cluster {} api server unreachable",
                self.cluster
            )))
        }
    }
}

#[derive(Debug)]
pub struct SimulatedEngine {
    apply_delay: Mutex<Duration>,
    destroy_delay: Mutex<Duration>,
    apply_failure: Mutex<Option<String>>,
    destroy_failure: Mutex<Option<String>>,
    panic_on_apply: AtomicBool,
    panic_on_destroy: AtomicBool,
    reachable: Arc<AtomicBool>,
    apply_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self {
            apply_delay: Mutex::new(Duration::ZERO),
            destroy_delay: Mutex::new(Duration::ZERO),
            apply_failure: Mutex::new(None),
            destroy_failure: Mutex::new(None),
            panic_on_apply: AtomicBool::new(false),
            panic_on_destroy: AtomicBool::new(false),
            reachable: Arc::new(AtomicBool::new(true)),
            apply_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_apply_delay(self, delay: Duration) -> Self {
        *self.apply_delay.lock() = delay;
        self
    }

    pub fn with_destroy_delay(self, delay: Duration) -> Self {
        *self.destroy_delay.lock() = delay;
        self
    }

    pub fn set_apply_delay(&self, delay: Duration) {
        *self.apply_delay.lock() = delay;
    }

    /// Make every following apply fail with `msg` (None clears it)
    pub fn fail_apply(&self, msg: Option<&str>) {
        *self.apply_failure.lock() = msg.map(str::to_string);
    }

    pub fn fail_destroy(&self, msg: Option<&str>) {
        *self.destroy_failure.lock() = msg.map(str::to_string);
    }

    pub fn panic_on_apply(&self, enabled: bool) {
        self.panic_on_apply.store(enabled, Ordering::SeqCst);
    }

    pub fn panic_on_destroy(&self, enabled: bool) {
        self.panic_on_destroy.store(enabled, Ordering::SeqCst);
    }

    /// Reachability reported by every connection handed out so far
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    fn connection(&self, cluster: &str) -> Arc<dyn KubeConnection> {
        Arc::new(SimulatedConnection {
            cluster: cluster.to_string(),
            reachable: self.reachable.clone(),
        })
    }
}

fn generation(state: &ProvisionState) -> u64 {
    state
        .as_value()
        .get("generation")
        .and_then(|g| g.as_u64())
        .unwrap_or(0)
}

#[async_trait]
impl ProvisioningEngine for SimulatedEngine {
    async fn apply(
        &self,
        cancel: CancellationToken,
        config: ClusterConfig,
        previous: ProvisionState,
        log: Logger,
    ) -> ApplyOutcome {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        info!(log, "Applying cluster";
            "cluster" => &config.cluster_name, "nodes" => config.nodes.len());

        let delay = *self.apply_delay.lock();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                warn!(log, "Apply interrupted by cancellation"; "cluster" => &config.cluster_name);
                return ApplyOutcome {
                    state: previous,
                    connection: Err(EngineError::new("apply canceled")),
                };
            }
        }

        if self.panic_on_apply.load(Ordering::SeqCst) {
            panic!("simulated engine panic while applying {}", config.cluster_name);
        }

        let next = generation(&previous) + 1;
        let admin = format!("apiVersion: v1\nclusters:\n- name: {}\n", config.cluster_name);
        let state = ProvisionState::new(json!({
            "generation": next,
            "cluster": config.cluster_name,
            "nodes": config.nodes.iter().map(|n| n.address.clone()).collect::<Vec<_>>(),
            "kubeconfig": { "kube-admin": admin },
        }));

        if let Some(msg) = self.apply_failure.lock().clone() {
            warn!(log, "Apply failed"; "cluster" => &config.cluster_name, "error" => &msg);
            return ApplyOutcome {
                state,
                connection: Err(EngineError(msg)),
            };
        }

        info!(log, "Cluster applied"; "cluster" => &config.cluster_name, "generation" => next);
        ApplyOutcome {
            state,
            connection: Ok(self.connection(&config.cluster_name)),
        }
    }

    async fn destroy(
        &self,
        cancel: CancellationToken,
        config: ClusterConfig,
        log: Logger,
    ) -> Result<(), EngineError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        info!(log, "Destroying cluster"; "cluster" => &config.cluster_name);

        let delay = *self.destroy_delay.lock();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(EngineError::new("destroy canceled")),
        }

        if self.panic_on_destroy.load(Ordering::SeqCst) {
            panic!("simulated engine panic while destroying {}", config.cluster_name);
        }
        if let Some(msg) = self.destroy_failure.lock().clone() {
            return Err(EngineError(msg));
        }
        Ok(())
    }

    fn connect(&self, state: &ProvisionState) -> Result<Arc<dyn KubeConnection>, EngineError> {
        let cluster = state
            .as_value()
            .get("cluster")
            .and_then(|c| c.as_str())
            .ok_or_else(|| EngineError::new("provision state holds no cluster credentials"))?;
        Ok(self.connection(cluster))
    }

    fn kube_config(
        &self,
        state: &ProvisionState,
        user: &str,
    ) -> Result<Option<String>, EngineError> {
        Ok(state
            .as_value()
            .get("kubeconfig")
            .and_then(|bundle| bundle.get(user))
            .and_then(|config| config.as_str())
            .map(str::to_string))
    }
}
