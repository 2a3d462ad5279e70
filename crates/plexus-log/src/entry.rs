//! Log entry and query classification types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LogError;

/// The kind of SQL statement a write carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    /// Read query; never logged or multicast.
    Select,
    /// Row insertion.
    Insert,
    /// Row update.
    Update,
    /// Row deletion.
    Delete,
}

impl QueryType {
    /// Whether statements of this type belong in the write log
    pub fn is_write(self) -> bool {
        !matches!(self, QueryType::Select)
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryType::Select => "SELECT",
            QueryType::Insert => "INSERT",
            QueryType::Update => "UPDATE",
            QueryType::Delete => "DELETE",
        };
        write!(f, "{s}")
    }
}

impl FromStr for QueryType {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SELECT" => Ok(QueryType::Select),
            "INSERT" => Ok(QueryType::Insert),
            "UPDATE" => Ok(QueryType::Update),
            "DELETE" => Ok(QueryType::Delete),
            other => Err(LogError::UnknownQueryType(other.to_string())),
        }
    }
}

/// One committed write in the log.
///
/// `query` is the executable statement text with parameters already inlined,
/// so replaying an entry needs no argument plumbing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Dense ascending sequence number assigned at the leader.
    pub id: i64,
    /// Statement kind.
    #[serde(rename = "type")]
    pub query_type: QueryType,
    /// Table the statement touches.
    pub table_name: String,
    /// Inlined statement text.
    pub query: String,
    /// RFC3339 timestamp of the local append.
    pub created_at: String,
}

/// Inline `?N` placeholders into a statement for logging and replay.
///
/// Highest placeholder first, so `?1` never matches inside `?10`.
pub fn inline_params(query: &str, args: &[serde_json::Value]) -> String {
    let mut out = query.to_string();

    for (i, arg) in args.iter().enumerate().rev() {
        let placeholder = format!("?{}", i + 1);
        let rendered = render_sql_value(arg);
        out = out.replace(&placeholder, &rendered);
    }

    out
}

fn render_sql_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_type_round_trips_through_wire_form() {
        let qt: QueryType = serde_json::from_str("\"INSERT\"").unwrap();
        assert_eq!(qt, QueryType::Insert);
        assert_eq!(serde_json::to_string(&qt).unwrap(), "\"INSERT\"");
        assert_eq!("delete".parse::<QueryType>().unwrap(), QueryType::Delete);
    }

    #[test]
    fn select_is_not_a_write() {
        assert!(!QueryType::Select.is_write());
        assert!(QueryType::Update.is_write());
    }

    #[test]
    fn inline_params_substitutes_in_order() {
        let query = "INSERT INTO users (email, password_hash) VALUES (?1, ?2)";
        let inlined = inline_params(query, &[json!("a@x"), json!("hash")]);
        assert_eq!(
            inlined,
            "INSERT INTO users (email, password_hash) VALUES ('a@x', 'hash')"
        );
    }

    #[test]
    fn inline_params_escapes_quotes() {
        let inlined = inline_params("UPDATE users SET note = ?1", &[json!("it's")]);
        assert_eq!(inlined, "UPDATE users SET note = 'it''s'");
    }

    #[test]
    fn inline_params_handles_ten_plus_placeholders() {
        let query = "INSERT INTO t VALUES (?1, ?10)";
        let args: Vec<serde_json::Value> = (1..=10).map(|i| json!(i)).collect();
        assert_eq!(inline_params(query, &args), "INSERT INTO t VALUES (1, 10)");
    }

    #[test]
    fn inline_params_renders_null_and_bool() {
        let inlined = inline_params("VALUES (?1, ?2, ?3)", &[json!(null), json!(true), json!(false)]);
        assert_eq!(inlined, "VALUES (NULL, 1, 0)");
    }
}
