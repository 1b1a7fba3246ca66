//! Health Monitor
//!
//! One background task per ready cluster. Every tick it probes the API server
//! through the cluster's connection and moves the cluster between Running and
//! Unreachable. The task exits when its stop token is cancelled.

use crate::cluster::fsm::LifecycleEvent;
use crate::cluster::state::Cluster;
use crate::event_bus::EventBus;
use crate::manager::ClusterEvent;
use slog::{debug, info, warn, Logger};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Start the health monitor of `cluster`
///
/// The stop token is registered on the cluster and also returned.
pub fn spawn_health_monitor(
    cluster: Arc<Cluster>,
    interval: Duration,
    events: EventBus<ClusterEvent>,
    logger: Logger,
) -> CancellationToken {
    let stop = CancellationToken::new();
    cluster.set_monitor(stop.clone());

    let token = stop.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        info!(logger, "Health monitor started";
            "cluster" => cluster.name(), "interval_ms" => interval.as_millis() as u64);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(connection) = cluster.held_connection() else {
                continue;
            };
            let probe = tokio::select! {
                _ = token.cancelled() => break,
                result = connection.server_version() => result,
            };

            match probe {
                Ok(version) => {
                    if cluster.fire(LifecycleEvent::GetInfoSucceed).is_ok() {
                        info!(logger, "Cluster reachable again";
                            "cluster" => cluster.name(), "version" => version);
                        events.publish(ClusterEvent::Reachable {
                            name: cluster.name().to_string(),
                        });
                    }
                }
                Err(e) => {
                    if cluster.fire(LifecycleEvent::GetInfoFailed).is_ok() {
                        warn!(logger, "Cluster unreachable";
                            "cluster" => cluster.name(), "error" => %e);
                        events.publish(ClusterEvent::Unreachable {
                            name: cluster.name().to_string(),
                        });
                    }
                }
            }
        }
        debug!(logger, "Health monitor stopped"; "cluster" => cluster.name());
    });

    stop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterConfig, ClusterStatus};
    use crate::provisioning::{ProvisionState, ProvisioningEngine, SimulatedEngine};
    use chrono::Utc;
    use serde_json::json;

    fn running_cluster(engine: &SimulatedEngine) -> Arc<Cluster> {
        let cluster = Cluster::new(
            "local",
            ClusterStatus::Creating,
            ClusterConfig::default(),
            Utc::now(),
            "v1.0",
        );
        let connection = engine
            .connect(&ProvisionState::new(json!({ "cluster": "local" })))
            .unwrap();
        cluster
            .fire_with_connection(LifecycleEvent::CreateSucceed, connection)
            .unwrap();
        cluster
    }

    async fn wait_for(cluster: &Cluster, status: ClusterStatus) {
        for _ in 0..200 {
            if cluster.status() == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("cluster never reached {}", status);
    }

    #[tokio::test]
    async fn test_monitor_toggles_reachability() {
        let engine = SimulatedEngine::new();
        let cluster = running_cluster(&engine);
        let events = EventBus::new(10);
        let mut rx = events.subscribe();
        let logger = Logger::root(slog::Discard, slog::o!());

        let stop = spawn_health_monitor(cluster.clone(), Duration::from_millis(10), events, logger);

        engine.set_reachable(false);
        wait_for(&cluster, ClusterStatus::Unreachable).await;
        assert!(cluster.is_ready());
        assert_eq!(
            rx.recv().await.unwrap(),
            ClusterEvent::Unreachable { name: "local".to_string() }
        );

        engine.set_reachable(true);
        wait_for(&cluster, ClusterStatus::Running).await;
        assert_eq!(
            rx.recv().await.unwrap(),
            ClusterEvent::Reachable { name: "local".to_string() }
        );

        stop.cancel();
    }

    #[tokio::test]
    async fn test_stopped_monitor_leaves_status_alone() {
        let engine = SimulatedEngine::new();
        let cluster = running_cluster(&engine);
        let logger = Logger::root(slog::Discard, slog::o!());

        spawn_health_monitor(cluster.clone(), Duration::from_millis(10), EventBus::new(10), logger);
        assert!(cluster.stop_monitor());

        engine.set_reachable(false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cluster.status(), ClusterStatus::Running);
    }

    #[tokio::test]
    async fn test_probe_failure_ignored_while_updating() {
        let engine = SimulatedEngine::new();
        let cluster = running_cluster(&engine);
        cluster.fire(LifecycleEvent::Update).unwrap();
        let logger = Logger::root(slog::Discard, slog::o!());

        let stop = spawn_health_monitor(
            cluster.clone(),
            Duration::from_millis(10),
            EventBus::new(10),
            logger,
        );
        engine.set_reachable(false);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(cluster.status(), ClusterStatus::Updating);
        stop.cancel();
    }
}
