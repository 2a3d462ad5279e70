//! Multicast wire message

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use plexus_log::QueryType;
use plexus_membership::NodeId;

/// One write travelling down the multicast tree.
///
/// `pid` is the log sequence number assigned at the leader; `message_id` is
/// globally unique and drives deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MulticastMessage {
    /// Parameterized statement text.
    pub query: String,
    /// Statement arguments.
    pub args: Vec<serde_json::Value>,
    /// Log sequence number assigned at the leader.
    pub pid: i64,
    /// Statement kind.
    pub query_type: QueryType,
    /// Table the statement touches.
    pub table: String,
    /// Id of the node that originated the multicast.
    pub source_node: String,
    /// Globally unique message id.
    pub message_id: String,
}

impl MulticastMessage {
    /// Build a message for a freshly committed write at `source`
    pub fn new(
        query: impl Into<String>,
        args: Vec<serde_json::Value>,
        pid: i64,
        query_type: QueryType,
        table: impl Into<String>,
        source: NodeId,
    ) -> Self {
        let table = table.into();
        let message_id = format!("{source}-{pid}-{table}-{}", Uuid::new_v4());

        Self {
            query: query.into(),
            args,
            pid,
            query_type,
            table,
            source_node: source.to_string(),
            message_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_form_uses_camel_case_fields() {
        let msg = MulticastMessage::new(
            "INSERT INTO users (email, password_hash) VALUES (?1, ?2)",
            vec![json!("a@x"), json!("h")],
            1,
            QueryType::Insert,
            "users",
            NodeId::new(1),
        );

        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("queryType").is_some());
        assert!(json.get("sourceNode").is_some());
        assert!(json.get("messageId").is_some());
        assert_eq!(json["pid"], 1);
        assert_eq!(json["queryType"], "INSERT");
    }

    #[test]
    fn message_ids_are_unique_per_message() {
        let a = MulticastMessage::new("q", vec![], 1, QueryType::Insert, "users", NodeId::new(1));
        let b = MulticastMessage::new("q", vec![], 1, QueryType::Insert, "users", NodeId::new(1));

        assert_ne!(a.message_id, b.message_id);
        assert!(a.message_id.starts_with("1-1-users-"));
    }
}
