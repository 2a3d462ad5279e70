//! Integration test for the registry HTTP API over a real socket

use std::net::SocketAddr;
use std::time::Duration;

use plexus_membership::{NodeId, RegistryClient};
use plexus_registry::{RegistryConfig, RegistryService};
use plexus_util::allocate_port;

async fn start_registry(lease: Duration) -> (RegistryService, SocketAddr) {
    let config = RegistryConfig {
        listen_addr: format!("127.0.0.1:{}", allocate_port()).parse().unwrap(),
        lease_duration: lease,
    };
    let service = RegistryService::new(config);
    let addr = service.start().await.unwrap();
    (service, addr)
}

#[tokio::test]
async fn register_keepalive_members_roundtrip() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let (service, addr) = start_registry(Duration::from_secs(6)).await;
    let client = RegistryClient::new(addr.to_string());

    let lease_id = client.register(NodeId::new(1), "127.0.0.1:9001").await.unwrap();
    assert!(!lease_id.is_empty());

    client
        .keepalive(NodeId::new(1), "127.0.0.1:9001", true)
        .await
        .unwrap();
    client.register(NodeId::new(2), "127.0.0.1:9002").await.unwrap();

    let members = client.members().await.unwrap();
    assert_eq!(members.len(), 2);
    assert!(members[&NodeId::new(1)].is_leader);
    assert!(!members[&NodeId::new(2)].is_leader);

    let leader = client.leader().await.unwrap().unwrap();
    assert_eq!(leader.id, NodeId::new(1));

    service.shutdown().await;
}

#[tokio::test]
async fn leader_is_404_when_absent() {
    let (service, addr) = start_registry(Duration::from_secs(6)).await;
    let client = RegistryClient::new(addr.to_string());

    client.register(NodeId::new(1), "127.0.0.1:9001").await.unwrap();
    assert!(client.leader().await.unwrap().is_none());

    service.shutdown().await;
}

#[tokio::test]
async fn expired_member_is_swept() {
    let (service, addr) = start_registry(Duration::from_millis(300)).await;
    let client = RegistryClient::new(addr.to_string());

    client.register(NodeId::new(3), "127.0.0.1:9003").await.unwrap();
    assert_eq!(client.members().await.unwrap().len(), 1);

    // Past the lease and at least one sweep interval
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(client.members().await.unwrap().is_empty());

    service.shutdown().await;
}

#[tokio::test]
async fn leader_claim_moves_between_members() {
    let (service, addr) = start_registry(Duration::from_secs(6)).await;
    let client = RegistryClient::new(addr.to_string());

    client.register(NodeId::new(1), "127.0.0.1:9001").await.unwrap();
    client.register(NodeId::new(2), "127.0.0.1:9002").await.unwrap();

    client
        .keepalive(NodeId::new(1), "127.0.0.1:9001", true)
        .await
        .unwrap();
    client
        .keepalive(NodeId::new(2), "127.0.0.1:9002", true)
        .await
        .unwrap();

    let members = client.members().await.unwrap();
    let leaders: Vec<_> = members.values().filter(|m| m.is_leader).collect();
    assert_eq!(leaders.len(), 1);
    assert_eq!(leaders[0].id, NodeId::new(2));

    service.shutdown().await;
}
