//! Vote and heartbeat exchange over real sockets

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use plexus_election::{ElectionState, HeartbeatClock, PeerClient, PeerListener};
use plexus_membership::NodeId;
use plexus_util::allocate_socket_addr;

fn listener_for(node_id: u32, active: &[u32]) -> (Arc<RwLock<ElectionState>>, PeerListener) {
    let mut state = ElectionState::new(NodeId::new(node_id));
    state.update_active(active.iter().map(|&i| NodeId::new(i)), None);
    let state = Arc::new(RwLock::new(state));
    let listener = PeerListener::new(state.clone(), Arc::new(HeartbeatClock::new()));
    (state, listener)
}

#[tokio::test]
async fn vote_request_is_granted_over_tcp() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let (state, listener) = listener_for(2, &[1, 2]);
    let addr = listener.start(allocate_socket_addr()).await.unwrap();

    let client = PeerClient::new(Duration::from_secs(1));
    let granted = client
        .request_vote(&addr.to_string(), NodeId::new(1), 1)
        .await
        .unwrap();

    assert!(granted);
    {
        let state = state.read().await;
        assert_eq!(state.term, 1);
        assert_eq!(state.last_known_leader, Some(NodeId::new(1)));
    }

    listener.shutdown().await;
}

#[tokio::test]
async fn second_vote_same_term_is_denied() {
    let (_state, listener) = listener_for(5, &[1, 2, 5]);
    let addr = listener.start(allocate_socket_addr()).await.unwrap();

    let client = PeerClient::new(Duration::from_secs(1));
    assert!(client
        .request_vote(&addr.to_string(), NodeId::new(1), 1)
        .await
        .unwrap());
    assert!(!client
        .request_vote(&addr.to_string(), NodeId::new(2), 1)
        .await
        .unwrap());

    listener.shutdown().await;
}

#[tokio::test]
async fn heartbeat_updates_follower_state() {
    let (state, listener) = listener_for(3, &[1, 3]);
    let addr = listener.start(allocate_socket_addr()).await.unwrap();

    let client = PeerClient::new(Duration::from_secs(1));
    client
        .send_heartbeat(&addr.to_string(), 4, NodeId::new(1))
        .await
        .unwrap();

    // Heartbeats are fire-and-forget; give the handler a beat to run
    tokio::time::sleep(Duration::from_millis(100)).await;

    {
        let state = state.read().await;
        assert_eq!(state.term, 4);
        assert_eq!(state.last_known_leader, Some(NodeId::new(1)));
        assert!(!state.is_leader);
    }

    listener.shutdown().await;
}

#[tokio::test]
async fn ping_detects_live_listener() {
    let (_state, listener) = listener_for(1, &[1]);
    let addr = listener.start(allocate_socket_addr()).await.unwrap();

    let client = PeerClient::new(Duration::from_millis(500));
    assert!(client.ping(&addr.to_string()).await);
    assert!(!client.ping("127.0.0.1:1").await);

    listener.shutdown().await;
}
