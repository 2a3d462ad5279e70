//! Fan-out and receive-path tests over real sockets

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::Mutex;

use plexus_log::{LogEntry, QueryType, RecoveryClient, RecoveryConfig, WriteLog};
use plexus_membership::{MembershipMonitor, MonitorConfig, NodeId, RegistryClient};
use plexus_multicast::{
    DedupSet, Multicaster, MulticastConfig, MulticastError, MulticastMessage, ReceiveOutcome,
};
use plexus_registry::{RegistryConfig, RegistryService};
use plexus_util::allocate_port;

fn test_config() -> MulticastConfig {
    MulticastConfig {
        max_retries: 2,
        retry_delay: Duration::from_millis(50),
        http_timeout: Duration::from_secs(1),
        multicast_timeout: Duration::from_secs(3),
    }
}

async fn start_registry() -> (RegistryService, SocketAddr) {
    let config = RegistryConfig {
        listen_addr: format!("127.0.0.1:{}", allocate_port()).parse().unwrap(),
        lease_duration: Duration::from_secs(30),
    };
    let service = RegistryService::new(config);
    let addr = service.start().await.unwrap();
    (service, addr)
}

/// A fake node recording every multicast it receives
async fn start_child() -> (SocketAddr, Arc<Mutex<Vec<MulticastMessage>>>) {
    let received: Arc<Mutex<Vec<MulticastMessage>>> = Arc::new(Mutex::new(Vec::new()));

    let router = Router::new()
        .route(
            "/recvMulticast",
            post(
                |State(received): State<Arc<Mutex<Vec<MulticastMessage>>>>,
                 Json(msg): Json<MulticastMessage>| async move {
                    received.lock().await.push(msg);
                    axum::http::StatusCode::OK
                },
            ),
        )
        .with_state(received.clone());

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", allocate_port()))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service()).await;
    });

    (addr, received)
}

/// A fake leader serving a fixed log suffix
async fn start_log_server(entries: Vec<LogEntry>) -> SocketAddr {
    let entries = Arc::new(entries);

    let router = Router::new()
        .route(
            "/logs",
            get(
                |State(entries): State<Arc<Vec<LogEntry>>>,
                 Query(params): Query<HashMap<String, String>>| async move {
                    let after: i64 = params
                        .get("last_id")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    let suffix: Vec<LogEntry> = entries
                        .iter()
                        .filter(|e| e.id > after)
                        .cloned()
                        .collect();
                    Json(suffix)
                },
            ),
        )
        .with_state(entries);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", allocate_port()))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service()).await;
    });

    addr
}

async fn multicaster_for(node_id: u32, registry_addr: SocketAddr) -> Arc<Multicaster> {
    let client = RegistryClient::new(registry_addr.to_string());
    let monitor = Arc::new(MembershipMonitor::new(
        NodeId::new(node_id),
        client,
        MonitorConfig::default(),
    ));
    let log = WriteLog::memory().await.unwrap();
    let recovery = RecoveryClient::new(RecoveryConfig {
        max_retries: 2,
        retry_delay: Duration::from_millis(50),
        http_timeout: Duration::from_secs(1),
    });
    let dedup = Arc::new(DedupSet::new(Duration::from_secs(600)));

    Arc::new(Multicaster::new(
        NodeId::new(node_id),
        test_config(),
        monitor,
        log,
        recovery,
        dedup,
    ))
}

fn insert_message(pid: i64, email: &str) -> MulticastMessage {
    MulticastMessage::new(
        "INSERT INTO users (email, password_hash) VALUES (?1, ?2)",
        vec![serde_json::json!(email), serde_json::json!("hash")],
        pid,
        QueryType::Insert,
        "users",
        NodeId::new(1),
    )
}

fn log_entry(id: i64, email: &str) -> LogEntry {
    LogEntry {
        id,
        query_type: QueryType::Insert,
        table_name: "users".to_string(),
        query: format!("INSERT INTO users (email, password_hash) VALUES ('{email}', 'hash')"),
        created_at: "2026-01-01T00:00:00.000000000Z".to_string(),
    }
}

#[tokio::test]
async fn leader_fans_out_to_direct_children_only() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let (registry, registry_addr) = start_registry().await;
    let client = RegistryClient::new(registry_addr.to_string());

    let (child_a, received_a) = start_child().await;
    let (child_b, received_b) = start_child().await;

    // Tree over {1, 2, 3} rooted at 1: node 2 is the AVL root, node 3 its
    // right child; node 1's only direct child is node 2.
    client.register(NodeId::new(1), "127.0.0.1:9").await.unwrap();
    client.keepalive(NodeId::new(1), "127.0.0.1:9", true).await.unwrap();
    client.register(NodeId::new(2), &child_a.to_string()).await.unwrap();
    client.register(NodeId::new(3), &child_b.to_string()).await.unwrap();

    let multicaster = multicaster_for(1, registry_addr).await;
    multicaster.fan_out(&insert_message(1, "a@x")).await.unwrap();

    assert_eq!(received_a.lock().await.len(), 1);
    assert!(received_b.lock().await.is_empty());

    registry.shutdown().await;
}

#[tokio::test]
async fn partial_child_failure_is_tolerated() {
    let (registry, registry_addr) = start_registry().await;
    let client = RegistryClient::new(registry_addr.to_string());

    let (live_child, received) = start_child().await;

    // Tree over {1, 2, 3, 4} rooted at 1: the AVL root is node 3 with
    // children 2 and 4. Node 3 is the sender here; child 2 is unreachable.
    client.register(NodeId::new(1), "127.0.0.1:9").await.unwrap();
    client.keepalive(NodeId::new(1), "127.0.0.1:9", true).await.unwrap();
    client.register(NodeId::new(2), "127.0.0.1:1").await.unwrap();
    client.register(NodeId::new(3), "127.0.0.1:9").await.unwrap();
    client.register(NodeId::new(4), &live_child.to_string()).await.unwrap();

    let multicaster = multicaster_for(3, registry_addr).await;
    multicaster.fan_out(&insert_message(1, "a@x")).await.unwrap();

    assert_eq!(received.lock().await.len(), 1);

    registry.shutdown().await;
}

#[tokio::test]
async fn all_children_failing_fails_the_send() {
    let (registry, registry_addr) = start_registry().await;
    let client = RegistryClient::new(registry_addr.to_string());

    client.register(NodeId::new(1), "127.0.0.1:9").await.unwrap();
    client.keepalive(NodeId::new(1), "127.0.0.1:9", true).await.unwrap();
    client.register(NodeId::new(2), "127.0.0.1:1").await.unwrap();

    let multicaster = multicaster_for(1, registry_addr).await;
    let result = multicaster.fan_out(&insert_message(1, "a@x")).await;

    assert!(matches!(
        result,
        Err(MulticastError::AllChildrenFailed { total: 1 })
    ));

    registry.shutdown().await;
}

#[tokio::test]
async fn duplicate_message_is_acknowledged_once() {
    let (registry, registry_addr) = start_registry().await;
    let client = RegistryClient::new(registry_addr.to_string());

    client.register(NodeId::new(1), "127.0.0.1:9").await.unwrap();
    client.keepalive(NodeId::new(1), "127.0.0.1:9", true).await.unwrap();
    client.register(NodeId::new(2), "127.0.0.1:9").await.unwrap();

    let multicaster = multicaster_for(2, registry_addr).await;
    let message = insert_message(1, "a@x");

    assert_eq!(
        multicaster.handle_incoming(&message).await.unwrap(),
        ReceiveOutcome::Applied
    );
    assert_eq!(
        multicaster.handle_incoming(&message).await.unwrap(),
        ReceiveOutcome::Duplicate
    );

    // Exactly one applied write and one log entry
    assert_eq!(multicaster.log().last_id().await.unwrap(), 1);
    assert_eq!(multicaster.log().user_count().await.unwrap(), 1);

    registry.shutdown().await;
}

#[tokio::test]
async fn own_message_is_not_reapplied() {
    let (registry, registry_addr) = start_registry().await;
    let client = RegistryClient::new(registry_addr.to_string());

    client.register(NodeId::new(1), "127.0.0.1:9").await.unwrap();
    client.keepalive(NodeId::new(1), "127.0.0.1:9", true).await.unwrap();

    let multicaster = multicaster_for(1, registry_addr).await;
    let message = insert_message(1, "a@x");

    assert_eq!(
        multicaster.handle_incoming(&message).await.unwrap(),
        ReceiveOutcome::FromSelf
    );
    assert_eq!(multicaster.log().last_id().await.unwrap(), 0);

    registry.shutdown().await;
}

#[tokio::test]
async fn sequence_gap_triggers_recovery_then_applies() {
    let (registry, registry_addr) = start_registry().await;
    let client = RegistryClient::new(registry_addr.to_string());

    // The "leader" serves entries 1 and 2 over /logs
    let leader_addr = start_log_server(vec![
        log_entry(1, "u1@x"),
        log_entry(2, "u2@x"),
    ])
    .await;

    client.register(NodeId::new(1), &leader_addr.to_string()).await.unwrap();
    client
        .keepalive(NodeId::new(1), &leader_addr.to_string(), true)
        .await
        .unwrap();
    client.register(NodeId::new(2), "127.0.0.1:9").await.unwrap();

    let multicaster = multicaster_for(2, registry_addr).await;

    // Incoming pid 3 against an empty log: recovery pulls 1 and 2 first
    let outcome = multicaster
        .handle_incoming(&insert_message(3, "u3@x"))
        .await
        .unwrap();

    assert_eq!(outcome, ReceiveOutcome::Applied);
    assert_eq!(multicaster.log().last_id().await.unwrap(), 3);
    assert_eq!(multicaster.log().user_count().await.unwrap(), 3);

    registry.shutdown().await;
}

#[tokio::test]
async fn still_behind_after_recovery_rejects_message() {
    let (registry, registry_addr) = start_registry().await;
    let client = RegistryClient::new(registry_addr.to_string());

    // Leader has nothing to offer; the gap cannot close
    let leader_addr = start_log_server(Vec::new()).await;

    client.register(NodeId::new(1), &leader_addr.to_string()).await.unwrap();
    client
        .keepalive(NodeId::new(1), &leader_addr.to_string(), true)
        .await
        .unwrap();
    client.register(NodeId::new(2), "127.0.0.1:9").await.unwrap();

    let multicaster = multicaster_for(2, registry_addr).await;
    let result = multicaster.handle_incoming(&insert_message(5, "u5@x")).await;

    assert!(matches!(
        result,
        Err(MulticastError::OutOfSync {
            expected: 4,
            actual: 0
        })
    ));

    registry.shutdown().await;
}

#[tokio::test]
async fn broadcast_write_assigns_pid_and_applies_locally() {
    let (registry, registry_addr) = start_registry().await;
    let client = RegistryClient::new(registry_addr.to_string());

    let (child, received) = start_child().await;

    client.register(NodeId::new(1), "127.0.0.1:9").await.unwrap();
    client.keepalive(NodeId::new(1), "127.0.0.1:9", true).await.unwrap();
    client.register(NodeId::new(2), &child.to_string()).await.unwrap();

    let multicaster = multicaster_for(1, registry_addr).await;
    let (pid, rows) = multicaster
        .broadcast_write(
            "INSERT INTO users (email, password_hash) VALUES (?1, ?2)",
            vec![serde_json::json!("a@x"), serde_json::json!("hash")],
            QueryType::Insert,
            "users",
        )
        .await
        .unwrap();

    assert_eq!(pid, 1);
    assert_eq!(rows, 1);
    assert_eq!(multicaster.log().last_id().await.unwrap(), 1);
    assert_eq!(multicaster.log().user_count().await.unwrap(), 1);

    // The background fan-out reaches the child
    for _ in 0..50 {
        if !received.lock().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let received = received.lock().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].pid, 1);

    registry.shutdown().await;
}
