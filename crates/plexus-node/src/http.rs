//! The per-node HTTP API

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use plexus_log::QueryType;
use plexus_membership::NodeId;
use plexus_multicast::{MulticastError, MulticastMessage, ReceiveOutcome};

use crate::Node;

/// Build the node API router
pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/leader", get(leader_handler))
        .route("/status", get(status_handler))
        .route("/log-status", get(log_status_handler))
        .route("/logs", get(logs_handler))
        .route("/query", post(query_handler))
        .route("/recvMulticast", post(recv_multicast_handler))
        .route("/reset", post(reset_handler))
        .with_state(node)
}

async fn leader_handler(State(node): State<Arc<Node>>) -> String {
    let view = node.election().view().await;
    let leader = view.current_leader.map_or(0, NodeId::get);
    format!("Current leader: Node {} (Term: {})\n", leader, view.term)
}

async fn status_handler(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(node.election().view().await)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogStatus {
    node_id: NodeId,
    last_log_id: i64,
    last_log_timestamp: Option<String>,
}

async fn log_status_handler(State(node): State<Arc<Node>>) -> Response {
    match node.log().latest().await {
        Ok(latest) => {
            let (last_log_id, last_log_timestamp) = match latest {
                Some((id, timestamp)) => (id, Some(timestamp)),
                None => (0, None),
            };
            Json(LogStatus {
                node_id: node.config().node_id,
                last_log_id,
                last_log_timestamp,
            })
            .into_response()
        }
        Err(e) => {
            error!("failed to read log status: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to get log status").into_response()
        }
    }
}

async fn logs_handler(
    State(node): State<Arc<Node>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !node.election().is_leader().await {
        return (StatusCode::FORBIDDEN, "Only leader can serve logs").into_response();
    }

    let Some(after) = params.get("last_id").and_then(|v| v.parse::<i64>().ok()) else {
        return (StatusCode::BAD_REQUEST, "Invalid last_id parameter").into_response();
    };

    match node.log().entries_after(after).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => {
            error!("failed to read log entries: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error retrieving logs: {e}"),
            )
                .into_response()
        }
    }
}

/// An already-built write statement from the gateway/SQL layer
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRequest {
    /// Parameterized statement text.
    pub query: String,
    /// Statement arguments.
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    /// Statement kind.
    pub query_type: QueryType,
    /// Table the statement touches.
    pub table: String,
}

async fn query_handler(
    State(node): State<Arc<Node>>,
    Json(request): Json<WriteRequest>,
) -> Response {
    if !request.query_type.is_write() {
        return (
            StatusCode::BAD_REQUEST,
            "read queries are not served by the replication core",
        )
            .into_response();
    }

    if !node.election().is_leader().await {
        let view = node.election().view().await;
        let hint = view.current_leader.map_or(0, NodeId::get);
        return (
            StatusCode::MISDIRECTED_REQUEST,
            format!("not the leader; current leader: Node {hint}"),
        )
            .into_response();
    }

    match node
        .multicaster()
        .broadcast_write(
            &request.query,
            request.args,
            request.query_type,
            &request.table,
        )
        .await
    {
        Ok((pid, rows_affected)) => Json(json!({
            "message": "Query executed successfully",
            "pid": pid,
            "rows_affected": rows_affected,
        }))
        .into_response(),
        Err(e) => {
            error!("write failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error executing query: {e}"),
            )
                .into_response()
        }
    }
}

async fn recv_multicast_handler(
    State(node): State<Arc<Node>>,
    Json(message): Json<MulticastMessage>,
) -> Response {
    match node.multicaster().handle_incoming(&message).await {
        Ok(ReceiveOutcome::Applied) => {
            // Ack the parent first; our own subtree is our problem
            node.multicaster().spawn_forward(message);
            StatusCode::OK.into_response()
        }
        Ok(ReceiveOutcome::Duplicate | ReceiveOutcome::FromSelf) => {
            StatusCode::OK.into_response()
        }
        Err(e @ MulticastError::OutOfSync { .. }) => {
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!("multicast apply failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn reset_handler(State(node): State<Arc<Node>>) -> Response {
    match node.log().reset().await {
        Ok(()) => Json(json!({
            "status": "success",
            "message": "System reset successfully",
        }))
        .into_response(),
        Err(e) => {
            error!("reset failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error resetting state: {e}"),
            )
                .into_response()
        }
    }
}
