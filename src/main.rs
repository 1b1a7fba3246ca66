use clap::Parser;
use clustervisor::{
    ClusterEvent, ClusterManager, ClusterSpec, ClusterStore, EventBus, MemStore, NoStorageNodes,
    OrchestratorConfig, RocksDBStore, SimulatedEngine,
};
use slog::{error, info, o, warn, Drain, Logger};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Parser, Debug)]
#[command(name = "clustervisor")]
#[command(about = "Kubernetes cluster lifecycle orchestrator", long_about = None)]
struct Args {
    /// Directory of the cluster database
    #[arg(long, default_value = "clustervisor-db")]
    db: PathBuf,

    /// Seconds between two health probes of a ready cluster
    #[arg(long, default_value_t = 15)]
    health_interval_secs: u64,

    /// Version tag stamped on new cluster records
    #[arg(long)]
    platform_version: Option<String>,

    /// Keep cluster records in memory only
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// JSON cluster spec to submit once started
    #[arg(long)]
    create: Option<PathBuf>,
}

fn create_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("service" => "clustervisor"))
}

/// Log every cluster event until the bus goes away, returning how many were seen
async fn log_events(mut rx: broadcast::Receiver<ClusterEvent>, logger: Logger) -> usize {
    let mut seen = 0;
    loop {
        match rx.recv().await {
            Ok(event) => {
                seen += 1;
                info!(logger, "Cluster event";
                    "cluster" => event.cluster_name(), "event" => format!("{:?}", event));
            }
            Err(RecvError::Lagged(missed)) => {
                warn!(logger, "Cluster event log fell behind"; "missed" => missed);
            }
            Err(RecvError::Closed) => return seen,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let logger = create_logger();

    let mut config = OrchestratorConfig::default()
        .with_health_check_interval(Duration::from_secs(args.health_interval_secs));
    if let Some(version) = args.platform_version {
        config = config.with_platform_version(version);
    }

    let store: Arc<dyn ClusterStore> = if args.dry_run {
        info!(logger, "Dry run, cluster records are not persisted");
        Arc::new(MemStore::new())
    } else {
        info!(logger, "Opening cluster database"; "path" => args.db.display().to_string());
        Arc::new(RocksDBStore::open(&args.db)?)
    };

    // Subscribed before recovery so recovered clusters are announced too
    let events: EventBus<ClusterEvent> = EventBus::new(config.event_bus_capacity);
    tokio::spawn(log_events(events.subscribe(), logger.clone()));

    let manager = ClusterManager::with_event_bus(
        store,
        Arc::new(SimulatedEngine::new()),
        Arc::new(NoStorageNodes),
        events,
        config,
        logger.clone(),
    )
    .await?;

    for cluster in manager.list().await {
        let view = cluster.view();
        info!(logger, "Managed cluster";
            "cluster" => &view.name, "status" => %view.status, "nodes" => view.nodes_count);
    }

    if let Some(path) = args.create {
        let spec: ClusterSpec = serde_json::from_slice(&std::fs::read(&path)?)?;
        match manager.create(spec).await {
            Ok(view) => info!(logger, "Cluster submitted"; "cluster" => &view.name),
            Err(e) => error!(logger, "Cluster rejected"; "error" => %e),
        }
    }

    info!(logger, "Press Ctrl+C to shutdown gracefully");
    signal::ctrl_c().await?;

    manager.shutdown().await;
    Ok(())
}
