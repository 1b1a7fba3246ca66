mod common;

use clustervisor::{
    ClusterStatus, ClusterStore, ErrorKind, MemStore, NodeRole, NodeSpec, SimulatedEngine,
};
use common::{spec, start_manager, wait_for_status, wait_until_removed};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_update_and_delete_are_exclusive() {
    let engine = Arc::new(
        SimulatedEngine::new()
            .with_apply_delay(Duration::from_millis(20))
            .with_destroy_delay(Duration::from_millis(20)),
    );
    let manager = start_manager(Arc::new(MemStore::new()), engine.clone()).await;

    let names: Vec<String> = (0..8).map(|i| format!("race-{}", i)).collect();
    for name in &names {
        manager.create(spec(name)).await.unwrap();
    }
    for name in &names {
        wait_for_status(&manager, name, ClusterStatus::Running).await;
    }

    for name in &names {
        let mut grown = spec(name);
        grown.nodes.push(NodeSpec::new("worker2", "10.0.0.3", &[NodeRole::Worker]));

        let updater = manager.clone();
        let deleter = manager.clone();
        let delete_name = name.clone();
        let update = tokio::spawn(async move { updater.update(grown).await });
        let delete = tokio::spawn(async move { deleter.delete(&delete_name).await });

        let update = update.await.unwrap();
        let delete = delete.await.unwrap();

        match (&update, &delete) {
            (Ok(_), Err(e)) => assert_eq!(e.kind, ErrorKind::PermissionDenied),
            (Err(e), Ok(())) => assert!(
                e.kind == ErrorKind::PermissionDenied || e.kind == ErrorKind::NotFound,
                "unexpected update error {}",
                e
            ),
            _ => panic!(
                "exactly one of update/delete must win on {}: {:?} / {:?}",
                name,
                update.as_ref().map(|v| v.status),
                delete
            ),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_same_name() {
    let store = Arc::new(MemStore::new());
    let engine = Arc::new(SimulatedEngine::new());
    let manager = start_manager(store.clone(), engine.clone()).await;

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.create(spec("alpha")).await })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(e) => assert_eq!(e.kind, ErrorKind::DuplicateResource),
        }
    }
    assert_eq!(accepted, 1);

    wait_for_status(&manager, "alpha", ClusterStatus::Running).await;
    assert_eq!(engine.apply_calls(), 1);
    assert_eq!(store.list().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_clusters_progress_independently() {
    let engine = Arc::new(SimulatedEngine::new().with_apply_delay(Duration::from_millis(100)));
    let manager = start_manager(Arc::new(MemStore::new()), engine.clone()).await;

    manager.create(spec("slow")).await.unwrap();
    manager.create(spec("fast")).await.unwrap();

    // Canceling one cluster leaves the other one alone
    manager.cancel("slow").await.unwrap();
    wait_for_status(&manager, "slow", ClusterStatus::CreateFailed).await;
    wait_for_status(&manager, "fast", ClusterStatus::Running).await;

    manager.delete("slow").await.unwrap();
    wait_until_removed(&manager, "slow").await;
    assert_eq!(manager.get("fast").await.unwrap().status(), ClusterStatus::Running);
}
