//! Runtime cluster object
//!
//! One `Cluster` per registry entry. It owns the state machine, the live
//! connection, the cancellation token of the in-flight workflow and the stop
//! token of its health monitor. All of it sits behind one short-lived lock so
//! that a status change and the data that goes with it are observed together.

use crate::cluster::fsm::{ClusterFsm, ClusterStatus, FsmError, LifecycleEvent, Target};
use crate::cluster::spec::{ClusterConfig, ClusterView, NodeRole};
use crate::provisioning::KubeConnection;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Inner {
    fsm: ClusterFsm,
    config: ClusterConfig,
    connection: Option<Arc<dyn KubeConnection>>,
    delete_time: Option<DateTime<Utc>>,
    cancel: CancellationToken,
    cancel_requested: bool,
    error: Option<String>,
    monitor_stop: Option<CancellationToken>,
}

/// Why a cancellation request was refused
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CancelError {
    NotCancelable { status: ClusterStatus },
    AlreadyCanceling,
}

impl fmt::Display for CancelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelError::NotCancelable { status } => write!(f, "can't cancel on {} status", status),
            CancelError::AlreadyCanceling => write!(f, "cancellation already in progress"),
        }
    }
}

impl std::error::Error for CancelError {}

pub struct Cluster {
    name: String,
    create_time: DateTime<Utc>,
    platform_version: String,
    inner: Mutex<Inner>,
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

impl Cluster {
    pub fn new(
        name: &str,
        status: ClusterStatus,
        config: ClusterConfig,
        create_time: DateTime<Utc>,
        platform_version: &str,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            create_time,
            platform_version: platform_version.to_string(),
            inner: Mutex::new(Inner {
                fsm: ClusterFsm::new(status),
                config,
                connection: None,
                delete_time: None,
                cancel: CancellationToken::new(),
                cancel_requested: false,
                error: None,
                monitor_stop: None,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    pub fn delete_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().delete_time
    }

    pub fn platform_version(&self) -> &str {
        &self.platform_version
    }

    pub fn status(&self) -> ClusterStatus {
        self.inner.lock().fsm.current()
    }

    pub fn is_ready(&self) -> bool {
        self.status().is_ready()
    }

    pub fn can(&self, event: LifecycleEvent) -> bool {
        self.inner.lock().fsm.can(event)
    }

    /// Drive the state machine
    ///
    /// Leaving the ready states for Deleting drops the live connection.
    pub fn fire(&self, event: LifecycleEvent) -> Result<Target, FsmError> {
        let mut inner = self.inner.lock();
        let target = inner.fsm.fire(event)?;
        if target == Target::Status(ClusterStatus::Deleting) {
            inner.connection = None;
        }
        Ok(target)
    }

    /// Install a freshly provisioned connection and fire `event` atomically
    pub fn fire_with_connection(
        &self,
        event: LifecycleEvent,
        connection: Arc<dyn KubeConnection>,
    ) -> Result<Target, FsmError> {
        let mut inner = self.inner.lock();
        let target = inner.fsm.fire(event)?;
        inner.connection = Some(connection);
        Ok(target)
    }

    /// Live connection, only handed out while the cluster is ready
    pub fn connection(&self) -> Option<Arc<dyn KubeConnection>> {
        let inner = self.inner.lock();
        if inner.fsm.current().is_ready() {
            inner.connection.clone()
        } else {
            None
        }
    }

    /// Whether a connection is held, ready or not (used by the health monitor)
    pub(crate) fn held_connection(&self) -> Option<Arc<dyn KubeConnection>> {
        self.inner.lock().connection.clone()
    }

    /// Arm a fresh cancellation token for a new workflow run
    pub(crate) fn begin_run(&self) -> CancellationToken {
        let mut inner = self.inner.lock();
        inner.cancel = CancellationToken::new();
        inner.cancel_requested = false;
        inner.cancel.clone()
    }

    /// Signal the in-flight Create/Update workflow to stop
    ///
    /// Status is left untouched; the workflow reports the cancellation itself.
    pub fn request_cancel(&self) -> Result<(), CancelError> {
        let mut inner = self.inner.lock();
        let status = inner.fsm.current();
        if !status.is_busy() {
            return Err(CancelError::NotCancelable { status });
        }
        if inner.cancel_requested {
            return Err(CancelError::AlreadyCanceling);
        }
        inner.cancel_requested = true;
        inner.cancel.cancel();
        Ok(())
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.inner.lock().cancel_requested
    }

    pub fn error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    pub(crate) fn set_error(&self, error: Option<String>) {
        self.inner.lock().error = error;
    }

    pub fn config(&self) -> ClusterConfig {
        self.inner.lock().config.clone()
    }

    pub(crate) fn set_config(&self, config: ClusterConfig) {
        self.inner.lock().config = config;
    }

    pub(crate) fn set_delete_time(&self, time: DateTime<Utc>) {
        self.inner.lock().delete_time = Some(time);
    }

    /// Register the stop token of a newly started health monitor
    ///
    /// A monitor already running for this cluster is stopped first.
    pub(crate) fn set_monitor(&self, stop: CancellationToken) {
        if let Some(previous) = self.inner.lock().monitor_stop.replace(stop) {
            previous.cancel();
        }
    }

    /// Stop the health monitor; returns false if none was running
    pub(crate) fn stop_monitor(&self) -> bool {
        match self.inner.lock().monitor_stop.take() {
            Some(stop) => {
                stop.cancel();
                true
            }
            None => false,
        }
    }

    pub fn has_monitor(&self) -> bool {
        self.inner.lock().monitor_stop.is_some()
    }

    pub fn node_addresses_by_role(&self, role: NodeRole) -> Vec<String> {
        self.inner
            .lock()
            .config
            .nodes
            .iter()
            .filter(|node| node.has_role(role))
            .map(|node| node.address.clone())
            .collect()
    }

    /// Point-in-time snapshot for callers
    pub fn view(&self) -> ClusterView {
        let inner = self.inner.lock();
        let config = &inner.config;
        let nodes = config.visible_nodes();
        ClusterView {
            name: self.name.clone(),
            status: inner.fsm.current(),
            nodes_count: nodes.len(),
            nodes,
            ssh_user: config.ssh_user.clone(),
            ssh_port: config.ssh_port,
            cluster_cidr: config.cluster_cidr.clone(),
            service_cidr: config.service_cidr.clone(),
            cluster_domain: config.cluster_domain.clone(),
            cluster_dns_service_ip: config.cluster_dns_service_ip.clone(),
            cluster_upstream_dns: config.cluster_upstream_dns.clone(),
            network: config.network.clone(),
            single_cloud_address: config.single_cloud_address.clone(),
            platform_version: self.platform_version.clone(),
            created_at: self.create_time,
            deleted_at: inner.delete_time,
            error: inner.error.clone(),
            cancel_requested: inner.cancel_requested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::spec::NodeSpec;

    fn cluster(status: ClusterStatus) -> Arc<Cluster> {
        let config = ClusterConfig {
            cluster_name: "local".to_string(),
            nodes: vec![
                NodeSpec::new("m", "10.0.0.1", &[NodeRole::ControlPlane, NodeRole::Etcd]),
                NodeSpec::new("w", "10.0.0.2", &[NodeRole::Worker]),
            ],
            ..Default::default()
        };
        Cluster::new("local", status, config, Utc::now(), "v1.0")
    }

    #[test]
    fn test_cancel_only_while_busy() {
        let running = cluster(ClusterStatus::Running);
        assert_eq!(
            running.request_cancel(),
            Err(CancelError::NotCancelable { status: ClusterStatus::Running })
        );
        assert_eq!(running.status(), ClusterStatus::Running);

        let creating = cluster(ClusterStatus::Creating);
        let token = creating.begin_run();
        assert!(creating.request_cancel().is_ok());
        assert!(token.is_cancelled());
        assert_eq!(creating.request_cancel(), Err(CancelError::AlreadyCanceling));
        assert_eq!(creating.status(), ClusterStatus::Creating);
    }

    #[test]
    fn test_begin_run_resets_cancel_flag() {
        let c = cluster(ClusterStatus::Creating);
        c.begin_run();
        c.request_cancel().unwrap();
        let token = c.begin_run();
        assert!(!c.is_cancel_requested());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_monitor_stopped_once() {
        let c = cluster(ClusterStatus::Running);
        let stop = CancellationToken::new();
        c.set_monitor(stop.clone());
        assert!(c.stop_monitor());
        assert!(stop.is_cancelled());
        assert!(!c.stop_monitor());
    }

    #[test]
    fn test_nodes_by_role() {
        let c = cluster(ClusterStatus::Running);
        assert_eq!(c.node_addresses_by_role(NodeRole::Worker), vec!["10.0.0.2".to_string()]);
        assert_eq!(c.node_addresses_by_role(NodeRole::Etcd), vec!["10.0.0.1".to_string()]);
    }

    #[test]
    fn test_view_hides_etcd() {
        let view = cluster(ClusterStatus::CreateFailed).view();
        assert_eq!(view.status, ClusterStatus::CreateFailed);
        assert_eq!(view.nodes_count, 2);
        assert_eq!(view.nodes[0].roles, vec![NodeRole::ControlPlane]);
    }
}
