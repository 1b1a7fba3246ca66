#![allow(dead_code)]

use clustervisor::{
    Cluster, ClusterManager, ClusterSpec, ClusterStatus, ClusterStore, NetworkSpec, NoStorageNodes,
    NodeListener, NodeRole, NodeSpec, OrchestratorConfig, SimulatedEngine,
};
use slog::{o, Discard, Logger};
use std::sync::Arc;
use std::time::Duration;

pub fn spec(name: &str) -> ClusterSpec {
    ClusterSpec {
        name: name.to_string(),
        nodes: vec![
            NodeSpec::new("master", "10.0.0.1", &[NodeRole::ControlPlane]),
            NodeSpec::new("worker1", "10.0.0.2", &[NodeRole::Worker]),
        ],
        ssh_user: "root".to_string(),
        ssh_port: 22,
        ssh_key: "-----BEGIN KEY-----".to_string(),
        cluster_cidr: "10.42.0.0/16".to_string(),
        service_cidr: "10.43.0.0/16".to_string(),
        cluster_domain: "cluster.local".to_string(),
        cluster_dns_service_ip: "10.43.0.10".to_string(),
        cluster_upstream_dns: vec!["223.5.5.5".to_string()],
        network: NetworkSpec {
            plugin: "flannel".to_string(),
            iface: "eth0".to_string(),
        },
        single_cloud_address: String::new(),
    }
}

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_health_check_interval(Duration::from_millis(20))
        .with_platform_version("v2.0-test")
}

pub async fn start_manager(
    store: Arc<dyn ClusterStore>,
    engine: Arc<SimulatedEngine>,
) -> Arc<ClusterManager> {
    start_manager_with_listener(store, engine, Arc::new(NoStorageNodes)).await
}

pub async fn start_manager_with_listener(
    store: Arc<dyn ClusterStore>,
    engine: Arc<SimulatedEngine>,
    listener: Arc<dyn NodeListener>,
) -> Arc<ClusterManager> {
    ClusterManager::new(store, engine, listener, test_config(), Logger::root(Discard, o!()))
        .await
        .expect("Manager should start")
}

pub async fn wait_for_status(
    manager: &ClusterManager,
    name: &str,
    status: ClusterStatus,
) -> Arc<Cluster> {
    for _ in 0..500 {
        if let Some(cluster) = manager.get(name).await {
            if cluster.status() == status {
                return cluster;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let current = manager.get(name).await.map(|c| c.status());
    panic!("cluster {} never reached {}, last seen {:?}", name, status, current);
}

pub async fn wait_until_removed(manager: &ClusterManager, name: &str) {
    for _ in 0..500 {
        if manager.get(name).await.is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("cluster {} was never removed", name);
}

pub async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
