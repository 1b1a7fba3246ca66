//! Lifecycle workflows
//!
//! Each Create, Update or Destroy runs as its own tokio task. The engine call
//! itself is spawned once more so a panic inside the engine surfaces as a
//! `JoinError` and becomes a failure event instead of tearing down the task.
//!
//! Cancellation is checked right before and right after the engine call. The
//! engine is never aborted; it sees the token and returns on its own.

use crate::cluster::{Cluster, ClusterConfig, LifecycleEvent};
use crate::manager::event::ClusterEvent;
use crate::manager::registry::ClusterManager;
use crate::provisioning::{ApplyOutcome, KubeConnection};
use crate::store::ClusterRecord;
use slog::{error, info, warn, Logger};
use std::any::Any;
use std::sync::Arc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

const CANCELED_MESSAGE: &str = "canceled";

/// How an apply run ended
enum ApplyResult {
    Succeeded(Arc<dyn KubeConnection>),
    Failed(String),
    Canceled,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn join_failure(e: JoinError) -> String {
    if e.is_panic() {
        format!("provisioning engine panicked: {}", panic_message(e.into_panic()))
    } else {
        "provisioning task aborted".to_string()
    }
}

impl ClusterManager {
    /// Launch the apply half of Create or Update
    ///
    /// `record.created` at launch picks the path: false means the cluster is
    /// in Creating, true means it is in Updating.
    pub(crate) fn spawn_apply(
        self: &Arc<Self>,
        cluster: Arc<Cluster>,
        cancel: CancellationToken,
        record: ClusterRecord,
        log: Logger,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_apply(cluster, cancel, record, log).await;
        });
    }

    pub(crate) fn spawn_destroy(
        self: &Arc<Self>,
        cluster: Arc<Cluster>,
        cancel: CancellationToken,
        config: ClusterConfig,
        log: Logger,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_destroy(cluster, cancel, config, log).await;
        });
    }

    async fn run_apply(
        self: Arc<Self>,
        cluster: Arc<Cluster>,
        cancel: CancellationToken,
        mut record: ClusterRecord,
        log: Logger,
    ) {
        let name = cluster.name().to_string();
        let was_created = record.created;

        let result = if cancel.is_cancelled() {
            ApplyResult::Canceled
        } else {
            info!(self.logger, "Workflow started"; "cluster" => &name, "resume" => !was_created);
            let engine = self.engine.clone();
            let config = record.config.clone();
            let previous = record.state.clone();
            let run_cancel = cancel.clone();
            let run_log = log.clone();
            let joined = tokio::spawn(async move {
                engine.apply(run_cancel, config, previous, run_log).await
            })
            .await;

            match joined {
                Err(e) => ApplyResult::Failed(join_failure(e)),
                Ok(ApplyOutcome { state, connection }) => {
                    record.state = state;
                    match connection {
                        Ok(connection) => ApplyResult::Succeeded(connection),
                        Err(e) => ApplyResult::Failed(e.to_string()),
                    }
                }
            }
        };

        // A requested cancellation wins over whatever the engine returned.
        let result = if cluster.is_cancel_requested() {
            ApplyResult::Canceled
        } else {
            result
        };

        match result {
            ApplyResult::Succeeded(connection) => {
                record.created = true;
                match self.store.create_or_update(&name, &record) {
                    Ok(()) => self.complete_apply(&cluster, was_created, connection, &log),
                    Err(e) => {
                        let msg = format!("persist cluster state failed {}", e);
                        self.fail_apply(&cluster, was_created, msg, &log);
                    }
                }
            }
            ApplyResult::Failed(msg) => {
                self.save_state(&record, &log);
                self.fail_apply(&cluster, was_created, msg, &log);
            }
            ApplyResult::Canceled => {
                self.save_state(&record, &log);
                self.cancel_apply(&cluster, was_created, &log);
            }
        }
    }

    /// Persist the engine state of a run that did not succeed
    fn save_state(&self, record: &ClusterRecord, log: &Logger) {
        if let Err(e) = self.store.create_or_update(&record.name, record) {
            error!(log, "Failed to persist provision state"; "error" => %e);
            error!(self.logger, "Failed to persist provision state";
                "cluster" => &record.name, "error" => %e);
        }
    }

    fn complete_apply(
        &self,
        cluster: &Arc<Cluster>,
        was_created: bool,
        connection: Arc<dyn KubeConnection>,
        log: &Logger,
    ) {
        let event = if was_created {
            LifecycleEvent::UpdateCompleted
        } else {
            LifecycleEvent::CreateSucceed
        };
        cluster.set_error(None);
        if let Err(e) = cluster.fire_with_connection(event, connection) {
            error!(self.logger, "Dropped workflow completion";
                "cluster" => cluster.name(), "error" => %e);
            return;
        }

        if !was_created {
            self.start_monitor(cluster);
            self.events.publish(ClusterEvent::Created { view: cluster.view() });
        }
        info!(log, "Workflow succeeded"; "event" => %event);
        info!(self.logger, "Cluster ready"; "cluster" => cluster.name(), "event" => %event);
    }

    fn fail_apply(&self, cluster: &Arc<Cluster>, was_created: bool, msg: String, log: &Logger) {
        let event = if was_created {
            LifecycleEvent::UpdateCompleted
        } else {
            LifecycleEvent::CreateFailed
        };
        error!(log, "Workflow failed"; "error" => &msg);
        warn!(self.logger, "Cluster workflow failed"; "cluster" => cluster.name(), "error" => &msg);

        cluster.set_error(Some(msg));
        if let Err(e) = cluster.fire(event) {
            error!(self.logger, "Dropped workflow failure";
                "cluster" => cluster.name(), "error" => %e);
        }
    }

    fn cancel_apply(&self, cluster: &Arc<Cluster>, was_created: bool, log: &Logger) {
        let event = if was_created {
            LifecycleEvent::UpdateCanceled
        } else {
            LifecycleEvent::CreateCanceled
        };
        warn!(log, "Workflow canceled");
        info!(self.logger, "Cluster workflow canceled";
            "cluster" => cluster.name(), "event" => %event);

        cluster.set_error(Some(CANCELED_MESSAGE.to_string()));
        if let Err(e) = cluster.fire(event) {
            error!(self.logger, "Dropped workflow cancellation";
                "cluster" => cluster.name(), "error" => %e);
        }
    }

    /// Tear the cluster down, then drop it whatever the engine reported
    async fn run_destroy(
        self: Arc<Self>,
        cluster: Arc<Cluster>,
        cancel: CancellationToken,
        config: ClusterConfig,
        log: Logger,
    ) {
        let name = cluster.name().to_string();
        info!(self.logger, "Destroy started"; "cluster" => &name);

        let engine = self.engine.clone();
        let run_log = log.clone();
        let joined =
            tokio::spawn(async move { engine.destroy(cancel, config, run_log).await }).await;
        match joined {
            Ok(Ok(())) => info!(log, "Cluster destroyed"),
            Ok(Err(e)) => {
                error!(log, "Teardown failed"; "error" => %e);
                warn!(self.logger, "Cluster teardown failed, removing anyway";
                    "cluster" => &name, "error" => %e);
            }
            Err(e) => {
                let msg = join_failure(e);
                error!(log, "Teardown failed"; "error" => &msg);
                warn!(self.logger, "Cluster teardown failed, removing anyway";
                    "cluster" => &name, "error" => &msg);
            }
        }

        self.complete_delete(&cluster).await;
    }

    async fn complete_delete(&self, cluster: &Arc<Cluster>) {
        let name = cluster.name();
        let mut clusters = self.clusters.lock().await;

        if let Err(e) = self.store.delete(name) {
            error!(self.logger, "Failed to delete cluster record";
                "cluster" => name, "error" => %e);
        }
        cluster.stop_monitor();
        if let Err(e) = cluster.fire(LifecycleEvent::DeleteCompleted) {
            error!(self.logger, "Dropped delete completion"; "cluster" => name, "error" => %e);
        }
        if matches!(clusters.get(name), Some(current) if Arc::ptr_eq(current, cluster)) {
            clusters.remove(name);
        }
        self.logs.remove(name);
        info!(self.logger, "Cluster removed"; "cluster" => name);
    }
}
