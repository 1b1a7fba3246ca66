//! Cluster Registry
//!
//! Membership of managed clusters plus the synchronous half of every
//! lifecycle operation. The registry lock covers membership changes and the
//! check-persist-fire sequence of an operation; engine work happens in the
//! workflow tasks outside of it.
//!
//! Concurrent requests on one cluster are serialized by the state machine
//! alone: whichever request takes the lock first moves the cluster into a
//! state where the other request is no longer allowed.

use crate::cluster::{
    spawn_health_monitor, Cluster, ClusterSpec, ClusterStatus, ClusterView, FsmError,
    LifecycleEvent,
};
use crate::config::OrchestratorConfig;
use crate::error::{ApiError, ErrorKind};
use crate::event_bus::EventBus;
use crate::logs::LogManager;
use crate::manager::event::ClusterEvent;
use crate::manager::validate::{
    generate_config, merge_config, validate_for_create, validate_for_update,
};
use crate::provisioning::{NodeListener, ProvisioningEngine};
use crate::store::{ClusterRecord, ClusterStore, StoreError};
use chrono::Utc;
use slog::{info, o, warn, Logger};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Registry of managed clusters
pub struct ClusterManager {
    pub(crate) clusters: Mutex<BTreeMap<String, Arc<Cluster>>>,
    pub(crate) store: Arc<dyn ClusterStore>,
    pub(crate) engine: Arc<dyn ProvisioningEngine>,
    node_listener: Arc<dyn NodeListener>,
    pub(crate) events: EventBus<ClusterEvent>,
    pub(crate) logs: LogManager,
    pub(crate) config: OrchestratorConfig,
    pub(crate) logger: Logger,
}

impl ClusterManager {
    /// Build the registry and recover every cluster found in `store`
    ///
    /// Events published during recovery go to a fresh bus nobody listens to
    /// yet; use [`ClusterManager::with_event_bus`] to observe them.
    ///
    /// # Returns
    /// * `Ok(Arc<ClusterManager>)` - Registry rebuilt from the store
    /// * `Err(StoreError)` - The store could not be read; the manager can't start
    pub async fn new(
        store: Arc<dyn ClusterStore>,
        engine: Arc<dyn ProvisioningEngine>,
        node_listener: Arc<dyn NodeListener>,
        config: OrchestratorConfig,
        logger: Logger,
    ) -> Result<Arc<Self>, StoreError> {
        let events = EventBus::new(config.event_bus_capacity);
        Self::with_event_bus(store, engine, node_listener, events, config, logger).await
    }

    /// Build the registry on an existing event bus, then recover
    ///
    /// Receivers subscribed to `events` beforehand see the `Created` events
    /// of clusters recovered as Running.
    pub async fn with_event_bus(
        store: Arc<dyn ClusterStore>,
        engine: Arc<dyn ProvisioningEngine>,
        node_listener: Arc<dyn NodeListener>,
        events: EventBus<ClusterEvent>,
        config: OrchestratorConfig,
        logger: Logger,
    ) -> Result<Arc<Self>, StoreError> {
        let manager = Arc::new(Self {
            clusters: Mutex::new(BTreeMap::new()),
            store,
            engine,
            node_listener,
            events,
            logs: LogManager::new(config.log_buffer_bytes),
            config,
            logger,
        });
        manager.recover().await?;
        Ok(manager)
    }

    /// Register a new cluster and start creating it
    ///
    /// Returns as soon as the record is persisted; the Create workflow runs on.
    pub async fn create(self: &Arc<Self>, mut spec: ClusterSpec) -> Result<ClusterView, ApiError> {
        spec.trim_field_space();

        let mut clusters = self.clusters.lock().await;
        if clusters.contains_key(&spec.name) {
            return Err(ApiError::duplicate(&spec.name));
        }
        validate_for_create(&spec)?;

        let config = generate_config(&spec);
        let record = ClusterRecord::new(config.clone(), &self.config.platform_version);
        self.store.create_or_update(&spec.name, &record)?;

        let cluster = Cluster::new(
            &spec.name,
            ClusterStatus::Creating,
            config,
            record.create_time,
            &record.platform_version,
        );
        clusters.insert(spec.name.clone(), cluster.clone());
        let cancel = cluster.begin_run();
        let log = self.workflow_logger(&spec.name);
        drop(clusters);

        info!(self.logger, "Cluster accepted";
            "cluster" => &spec.name, "nodes" => spec.nodes.len());
        self.spawn_apply(cluster.clone(), cancel, record, log);
        Ok(cluster.view())
    }

    /// Apply a new spec to an existing cluster
    ///
    /// A cluster that never finished creating resumes its create instead.
    pub async fn update(self: &Arc<Self>, mut spec: ClusterSpec) -> Result<ClusterView, ApiError> {
        spec.trim_field_space();

        let cluster = self.get(&spec.name).await.ok_or_else(|| ApiError::not_found(&spec.name))?;
        let removed = validate_for_update(&cluster.config(), &spec)?;
        for node in &removed {
            match self.node_listener.is_storage_node(&cluster, node).await {
                Ok(false) => {}
                Ok(true) => {
                    return Err(ApiError::invalid_option(format!(
                        "cluster config validate failed node {} is used by storage \
                         and can't be removed",
                        node
                    )))
                }
                Err(e) => {
                    return Err(ApiError::invalid_option(format!(
                        "cluster config validate failed check storage node {} failed {}",
                        node, e
                    )))
                }
            }
        }

        let clusters = self.clusters.lock().await;
        match clusters.get(&spec.name) {
            Some(current) if Arc::ptr_eq(current, &cluster) => {}
            _ => return Err(ApiError::not_found(&spec.name)),
        }

        let mut record = self.store.get(&spec.name)?;
        let event = if record.created {
            LifecycleEvent::Update
        } else {
            LifecycleEvent::ContinueCreate
        };
        if !cluster.can(event) {
            return Err(ApiError::permission_denied(format!(
                "cluster {} can't update on {} status",
                spec.name,
                cluster.status()
            )));
        }

        let config = merge_config(&record.config, &spec);
        record.config = config.clone();
        self.store.create_or_update(&spec.name, &record)?;

        cluster.set_config(config);
        cluster.set_error(None);
        cluster.fire(event).map_err(|e| fire_failed(&spec.name, event, e))?;
        let cancel = cluster.begin_run();
        let log = self.workflow_logger(&spec.name);
        drop(clusters);

        info!(self.logger, "Cluster update accepted"; "cluster" => &spec.name, "event" => %event);
        self.spawn_apply(cluster.clone(), cancel, record, log);
        Ok(cluster.view())
    }

    /// Mark a cluster deleted and start tearing it down
    ///
    /// The cluster stays listed, in `Deleting`, until teardown completes.
    pub async fn delete(self: &Arc<Self>, name: &str) -> Result<(), ApiError> {
        let clusters = self.clusters.lock().await;
        let cluster = clusters.get(name).cloned().ok_or_else(|| ApiError::not_found(name))?;
        if !cluster.can(LifecycleEvent::Delete) {
            return Err(ApiError::permission_denied(format!(
                "cluster {} can't delete when on {} status",
                name,
                cluster.status()
            )));
        }

        let mut record = self.store.get(name)?;
        let now = Utc::now();
        record.delete_time = Some(now);
        self.store.create_or_update(name, &record)?;

        // Only clusters that reached Running were announced with `Created`.
        let announced = cluster.is_ready();
        cluster.set_delete_time(now);
        cluster
            .fire(LifecycleEvent::Delete)
            .map_err(|e| fire_failed(name, LifecycleEvent::Delete, e))?;
        cluster.stop_monitor();
        if announced {
            self.events.publish(ClusterEvent::Deleted {
                name: name.to_string(),
            });
        }
        let cancel = cluster.begin_run();
        let log = self.workflow_logger(name);
        drop(clusters);

        info!(self.logger, "Cluster deletion accepted";
            "cluster" => name, "announced" => announced);
        self.spawn_destroy(cluster, cancel, record.config, log);
        Ok(())
    }

    /// Ask the running Create or Update workflow of a cluster to stop
    pub async fn cancel(&self, name: &str) -> Result<(), ApiError> {
        let clusters = self.clusters.lock().await;
        let cluster = clusters.get(name).ok_or_else(|| ApiError::not_found(name))?;
        cluster
            .request_cancel()
            .map_err(|e| ApiError::permission_denied(format!("cluster {} {}", name, e)))?;
        let status = cluster.status();
        warn!(self.logger, "Cluster cancellation requested";
            "cluster" => name, "status" => %status);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Cluster>> {
        self.clusters.lock().await.get(name).cloned()
    }

    /// The cluster, only if it is Running or Unreachable
    pub async fn get_ready(&self, name: &str) -> Option<Arc<Cluster>> {
        self.get(name).await.filter(|cluster| cluster.is_ready())
    }

    /// All clusters ordered by name
    pub async fn list(&self) -> Vec<Arc<Cluster>> {
        self.clusters.lock().await.values().cloned().collect()
    }

    pub async fn list_ready(&self) -> Vec<Arc<Cluster>> {
        self.clusters
            .lock()
            .await
            .values()
            .filter(|cluster| cluster.is_ready())
            .cloned()
            .collect()
    }

    /// Kubeconfig of `user` for a cluster, read from its persisted state
    pub async fn kube_config(&self, name: &str, user: &str) -> Result<String, ApiError> {
        if self.get(name).await.is_none() {
            return Err(ApiError::not_found(name));
        }
        let record = self.store.get(name)?;
        match self.engine.kube_config(&record.state, user) {
            Ok(Some(config)) => Ok(config),
            Ok(None) => Err(ApiError::new(
                ErrorKind::NotFound,
                format!("no kubeconfig for user {} in cluster {}", user, name),
            )),
            Err(e) => Err(ApiError::server_error(format!(
                "get cluster {} kubeconfig failed {}",
                name, e
            ))),
        }
    }

    /// Lines logged by the current (or last) workflow of a cluster, plus a
    /// receiver for every line logged from now on
    ///
    /// The log of a workflow exists as soon as the request launching it
    /// returns. A recovered cluster has none until its next workflow.
    pub async fn open_log(
        &self,
        name: &str,
    ) -> Result<(Vec<String>, broadcast::Receiver<String>), ApiError> {
        if self.get(name).await.is_none() {
            return Err(ApiError::not_found(name));
        }
        self.logs.get(name).map(|sink| sink.follow()).ok_or_else(|| {
            ApiError::new(
                ErrorKind::NotFound,
                format!("cluster {} has no workflow log since startup", name),
            )
        })
    }

    /// Receive cluster notifications published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    /// Stop every health monitor; workflows in flight are left to finish
    pub async fn shutdown(&self) {
        for cluster in self.clusters.lock().await.values() {
            cluster.stop_monitor();
        }
        info!(self.logger, "Cluster manager stopped");
    }

    /// Fresh log sink for the workflow about to be launched on `cluster`
    pub(crate) fn workflow_logger(&self, cluster: &str) -> Logger {
        self.logs.open_run(cluster).logger().new(o!("cluster" => cluster.to_string()))
    }

    pub(crate) fn start_monitor(&self, cluster: &Arc<Cluster>) {
        spawn_health_monitor(
            cluster.clone(),
            self.config.health_check_interval,
            self.events.clone(),
            self.logger.clone(),
        );
    }
}

fn fire_failed(name: &str, event: LifecycleEvent, e: FsmError) -> ApiError {
    ApiError::server_error(format!("send cluster {} fsm {} event failed {}", name, event, e))
}
