//! Pool behavior, reply ordering, timeouts and health monitoring

mod common;

use cachewire::{
    CacheClient, CacheError, CacheEvent, HealthStatus, HealthThresholds, InvalidateOptions,
};
use common::FakeServer;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_pool_bounds_concurrency() {
    let server = FakeServer::start().await;
    let client = Arc::new(CacheClient::<u32>::connect(server.config()).await.unwrap());
    server.set_delay("GET", Duration::from_millis(300));

    let tasks: Vec<_> = (0..3)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { client.get(&format!("k{i}")).await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = client.pool_status();
    assert_eq!(status.size, 2);
    assert_eq!(status.in_use, 2);
    assert_eq!(status.idle, 0);
    assert_eq!(status.waiting, 1);

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), None);
    }
    assert_eq!(server.connections(), 2);
    assert_eq!(client.pool_status().idle, 2);
}

#[tokio::test]
async fn test_concurrent_replies_match_requests() {
    let server = FakeServer::start().await;
    let config = server.config().with_pool_size(1);
    let client = CacheClient::<u32>::connect(config).await.unwrap();

    for i in 0..50u32 {
        client.set(&format!("k{i}"), &i).await.unwrap();
    }
    let reads = join_all((0..50u32).map(|i| {
        let client = &client;
        async move { (i, client.get(&format!("k{i}")).await.unwrap()) }
    }))
    .await;

    for (i, value) in reads {
        assert_eq!(value, Some(i));
    }
}

#[tokio::test]
async fn test_pipelined_replies_keep_order_under_delay() {
    let server = FakeServer::start().await;
    let client = CacheClient::<u32>::connect(server.config().with_pool_size(1))
        .await
        .unwrap();
    client.set("a", &1).await.unwrap();
    server.set_delay("GET", Duration::from_millis(20));

    let key = client.key_space().key("a");
    let mut pipeline = client.pipeline();
    pipeline
        .get(key.clone())
        .exists(vec![key.clone()])
        .get(client.key_space().key("missing"))
        .ttl(key);
    let replies = pipeline.execute().await.unwrap();

    assert_eq!(replies[0].as_ref().unwrap().as_string().unwrap(), "1");
    assert_eq!(replies[1].as_ref().unwrap().as_int().unwrap(), 1);
    assert!(replies[2].as_ref().unwrap().is_null());
    assert_eq!(replies[3].as_ref().unwrap().as_int().unwrap(), -1);
}

#[tokio::test]
async fn test_acquire_times_out() {
    let server = FakeServer::start().await;
    let mut config = server.config().with_pool_size(1);
    config.pool.acquire_timeout = Duration::from_millis(50);
    let client = CacheClient::<u32>::connect(config).await.unwrap();

    // A transaction keeps its connection checked out
    let tx = client.transaction().await.unwrap();
    let err = client.get("a").await.unwrap_err();
    assert!(matches!(err.root(), CacheError::Timeout));
    assert_eq!(client.metrics().errors, 1);

    drop(tx);
    assert_eq!(client.get("a").await.unwrap(), None);
}

#[tokio::test]
async fn test_operation_timeout_replaces_connection() {
    let server = FakeServer::start().await;
    let config = server
        .config()
        .with_pool_size(1)
        .with_operation_timeout(Duration::from_millis(100));
    let client = CacheClient::<u32>::connect(config).await.unwrap();
    server.set_delay("GET", Duration::from_millis(500));

    let err = client.get("slow").await.unwrap_err();
    assert!(matches!(err.root(), CacheError::Timeout));

    server.clear_delays();
    // The replacement connection is handed to this call once it is ready
    assert_eq!(client.get("slow").await.unwrap(), None);
    assert_eq!(server.connections(), 2);
    assert_eq!(client.pool_status().idle, 1);
}

#[tokio::test]
async fn test_disconnect_rejects_new_work() {
    let server = FakeServer::start().await;
    let client = CacheClient::<u32>::connect(server.config()).await.unwrap();
    client.set("a", &1).await.unwrap();

    client.disconnect().await;
    let err = client.get("a").await.unwrap_err();
    assert!(matches!(err.root(), CacheError::Pool(_)));

    let err = client
        .invalidate(InvalidateOptions::keys(["a"]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("keys=a"));
}

#[tokio::test]
async fn test_disconnect_closes_checked_out_connections() {
    let server = FakeServer::start().await;
    let client = CacheClient::<u32>::connect(server.config()).await.unwrap();
    let key = client.key_space().key("after");

    let mut tx = client.transaction().await.unwrap();
    client.disconnect().await;

    tx.set(key.clone(), "1");
    let err = tx.exec().await.unwrap_err();
    assert!(matches!(err, CacheError::Connection(_)));
    assert!(server.raw_get(&key).is_none());
}

#[tokio::test]
async fn test_disconnect_rejects_parked_callers() {
    let server = FakeServer::start().await;
    let client = Arc::new(
        CacheClient::<u32>::connect(server.config().with_pool_size(1))
            .await
            .unwrap(),
    );

    let tx = client.transaction().await.unwrap();
    let parked = {
        let client = client.clone();
        tokio::spawn(async move { client.get("a").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.pool_status().waiting, 1);

    client.disconnect().await;
    let err = parked.await.unwrap().unwrap_err();
    assert!(matches!(err.root(), CacheError::Pool(_)));
    drop(tx);
}

#[tokio::test]
async fn test_idle_connection_closed_by_server_is_replaced() {
    let server = FakeServer::start().await;
    let client = CacheClient::<u32>::connect(server.config().with_pool_size(1))
        .await
        .unwrap();
    assert_eq!(client.get("a").await.unwrap(), None);

    server.drop_connections();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(client.get("b").await.unwrap(), None);
    assert_eq!(server.connections(), 2);
    let status = client.pool_status();
    assert_eq!(status.idle, 1);
    assert_eq!(status.in_use, 0);
}

#[tokio::test]
async fn test_health_report() {
    let server = FakeServer::start().await;
    let client = CacheClient::<u32>::connect(server.config()).await.unwrap();
    server.set_memory(500, 1000);

    let report = client.get_health().await;
    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.latency.is_some());
    assert_eq!(report.memory_usage, Some(0.5));
    assert_eq!(report.pool.size, 2);
    assert!(report.issues.is_empty());

    server.set_memory(950, 1000);
    server.set_delay("PING", Duration::from_millis(150));
    let report = client.get_health().await;
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.issues.len(), 2);
}

#[tokio::test]
async fn test_health_counts_errors_since_last_check() {
    let server = FakeServer::start().await;
    let client = CacheClient::<u32>::connect(server.config()).await.unwrap();
    server.raw_set("cache:default:corrupt", b"{");

    assert!(client.get("corrupt").await.is_err());
    let report = client.get_health().await;
    assert_eq!(report.recent_errors, 1);
    assert_eq!(report.status, HealthStatus::Degraded);

    let report = client.get_health().await;
    assert_eq!(report.recent_errors, 0);
}

#[tokio::test]
async fn test_monitor_publishes_degradation() {
    let server = FakeServer::start().await;
    let thresholds = HealthThresholds {
        latency: Duration::from_millis(20),
        critical_latency: Duration::from_millis(50),
        ..HealthThresholds::default()
    };
    let client = CacheClient::<u32>::connect(server.config().with_health_thresholds(thresholds))
        .await
        .unwrap();
    let mut events = client.subscribe();
    server.set_delay("PING", Duration::from_millis(80));

    let mut monitor = client.start_health_monitor(Duration::from_millis(20));
    assert!(monitor.is_running());

    let event = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let CacheEvent::HealthDegraded(report) = events.recv().await.unwrap() {
                return report;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(event.status, HealthStatus::Unhealthy);

    monitor.stop();
    assert!(!monitor.is_running());
}
