//! Startup recovery
//!
//! Rebuilds the registry from the store alone. Each record maps to exactly
//! one starting point:
//!
//! | Record | Recovered as |
//! |---|---|
//! | `delete_time` set | Deleting, Destroy relaunched |
//! | `created`, connection rebuilt | Running, monitor started, `Created` published |
//! | `created`, connection failed | CreateFailed with the connect error |
//! | not `created` | CreateFailed |
//!
//! Names already in the registry are skipped, so running recovery again never
//! launches a second workflow for the same cluster.

use crate::cluster::{Cluster, ClusterStatus, LifecycleEvent};
use crate::manager::event::ClusterEvent;
use crate::manager::registry::ClusterManager;
use crate::store::{ClusterRecord, StoreError};
use slog::{info, warn};
use std::sync::Arc;

impl ClusterManager {
    /// Load every persisted record into the registry
    ///
    /// Returns how many clusters were added.
    pub async fn recover(self: &Arc<Self>) -> Result<usize, StoreError> {
        let records = self.store.list()?;
        let mut clusters = self.clusters.lock().await;

        let mut recovered = 0;
        for (name, record) in records {
            if clusters.contains_key(&name) {
                continue;
            }

            let cluster = self.restore(&name, &record);
            clusters.insert(name.clone(), cluster.clone());
            recovered += 1;

            match cluster.status() {
                ClusterStatus::Deleting => {
                    let cancel = cluster.begin_run();
                    let log = self.workflow_logger(&name);
                    self.spawn_destroy(cluster.clone(), cancel, record.config.clone(), log);
                }
                ClusterStatus::Running => {
                    self.start_monitor(&cluster);
                    self.events.publish(ClusterEvent::Created { view: cluster.view() });
                }
                _ => {}
            }
            let status = cluster.status();
            info!(self.logger, "Cluster recovered"; "cluster" => &name, "status" => %status);
        }

        info!(self.logger, "Recovery finished";
            "recovered" => recovered, "total" => clusters.len());
        Ok(recovered)
    }

    /// Runtime object for one record, reached through lifecycle events
    fn restore(&self, name: &str, record: &ClusterRecord) -> Arc<Cluster> {
        let starting = if record.created && !record.is_deleting() {
            ClusterStatus::Creating
        } else {
            ClusterStatus::CreateFailed
        };
        let cluster = Cluster::new(
            name,
            starting,
            record.config.clone(),
            record.create_time,
            &record.platform_version,
        );

        if let Some(deleted_at) = record.delete_time {
            cluster.set_delete_time(deleted_at);
            if let Err(e) = cluster.fire(LifecycleEvent::Delete) {
                warn!(self.logger, "Failed to restore deleting cluster";
                    "cluster" => name, "error" => %e);
            }
            return cluster;
        }

        if record.created {
            let restored = match self.engine.connect(&record.state) {
                Ok(connection) => {
                    cluster.fire_with_connection(LifecycleEvent::CreateSucceed, connection)
                }
                Err(e) => {
                    warn!(self.logger, "Failed to reconnect cluster";
                        "cluster" => name, "error" => %e);
                    cluster.set_error(Some(format!("reconnect cluster failed {}", e)));
                    cluster.fire(LifecycleEvent::CreateFailed)
                }
            };
            if let Err(e) = restored {
                warn!(self.logger, "Failed to restore cluster"; "cluster" => name, "error" => %e);
            }
        }
        cluster
    }
}
