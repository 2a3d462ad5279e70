//! libsql-backed write log and identity tables

use std::path::Path;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use libsql::{Builder, Connection, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::entry::{LogEntry, QueryType};
use crate::error::LogError;

const CREATE_USERS: &str = "CREATE TABLE IF NOT EXISTS users (
    email TEXT PRIMARY KEY,
    password_hash TEXT NOT NULL,
    r1 BOOLEAN,
    r2 BOOLEAN,
    r3 BOOLEAN,
    r4 BOOLEAN
)";

const CREATE_WRITE_LOG: &str = "CREATE TABLE IF NOT EXISTS write_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query_type TEXT NOT NULL,
    table_name TEXT NOT NULL,
    query TEXT NOT NULL,
    created_at TEXT NOT NULL
)";

/// The local state store: identity tables plus the ordered write log.
///
/// The connection mutex is the write-path serializer; two concurrent writes
/// at the leader are ordered by whoever takes it first.
#[derive(Clone)]
pub struct WriteLog {
    conn: Arc<Mutex<Connection>>,
}

impl WriteLog {
    /// Open (or create) the store at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let conn = Builder::new_local(path).build().await?.connect()?;
        let log = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        log.init_schema().await?;
        Ok(log)
    }

    /// Open an in-memory store (tests)
    pub async fn memory() -> Result<Self, LogError> {
        Self::open(":memory:").await
    }

    async fn init_schema(&self) -> Result<(), LogError> {
        let conn = self.conn.lock().await;
        conn.execute(CREATE_USERS, ()).await?;
        conn.execute(CREATE_WRITE_LOG, ()).await?;
        Ok(())
    }

    /// Append an entry, returning its assigned id
    pub async fn append(
        &self,
        query_type: QueryType,
        table_name: &str,
        query: &str,
    ) -> Result<i64, LogError> {
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT INTO write_log (query_type, table_name, query, created_at) VALUES (?1, ?2, ?3, ?4)",
            vec![
                Value::Text(query_type.to_string()),
                Value::Text(table_name.to_string()),
                Value::Text(query.to_string()),
                Value::Text(created_at),
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    /// Append an entry under a known id (follower side of a multicast).
    ///
    /// `INSERT OR IGNORE` keeps the append idempotent against a concurrent
    /// recovery batch that already installed the same id.
    pub async fn append_with_id(
        &self,
        id: i64,
        query_type: QueryType,
        table_name: &str,
        query: &str,
    ) -> Result<(), LogError> {
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT OR IGNORE INTO write_log (id, query_type, table_name, query, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            vec![
                Value::Integer(id),
                Value::Text(query_type.to_string()),
                Value::Text(table_name.to_string()),
                Value::Text(query.to_string()),
                Value::Text(created_at),
            ],
        )
        .await?;

        Ok(())
    }

    /// Execute a write statement against the identity tables
    pub async fn apply(
        &self,
        query: &str,
        args: &[serde_json::Value],
    ) -> Result<u64, LogError> {
        let params: Vec<Value> = args.iter().map(json_to_sql).collect();
        let conn = self.conn.lock().await;
        Ok(conn.execute(query, params).await?)
    }

    /// Id of the most recent entry, 0 when the log is empty
    pub async fn last_id(&self) -> Result<i64, LogError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT COALESCE(MAX(id), 0) FROM write_log", ())
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?),
            None => Ok(0),
        }
    }

    /// Id and timestamp of the most recent entry, if any
    pub async fn latest(&self) -> Result<Option<(i64, String)>, LogError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, created_at FROM write_log ORDER BY id DESC LIMIT 1",
                (),
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some((row.get::<i64>(0)?, row.get::<String>(1)?))),
            None => Ok(None),
        }
    }

    /// All entries with id greater than `after`, ascending
    pub async fn entries_after(&self, after: i64) -> Result<Vec<LogEntry>, LogError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, query_type, table_name, query, created_at FROM write_log WHERE id > ?1 ORDER BY id ASC",
                vec![Value::Integer(after)],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(LogEntry {
                id: row.get::<i64>(0)?,
                query_type: row.get::<String>(1)?.parse()?,
                table_name: row.get::<String>(2)?,
                query: row.get::<String>(3)?,
                created_at: row.get::<String>(4)?,
            });
        }

        Ok(entries)
    }

    /// Apply a batch of entries pulled from the leader in one transaction.
    ///
    /// Each entry is inserted into the local log under its original id and
    /// its statement executed; any failure rolls the whole batch back so the
    /// log never ends up with a hole.
    pub async fn apply_batch(&self, entries: &[LogEntry]) -> Result<usize, LogError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock().await;
        let tx = conn.transaction().await?;

        for entry in entries {
            debug!("applying log entry {}: [{}] {}", entry.id, entry.query_type, entry.query);

            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO write_log (id, query_type, table_name, query, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                    vec![
                        Value::Integer(entry.id),
                        Value::Text(entry.query_type.to_string()),
                        Value::Text(entry.table_name.clone()),
                        Value::Text(entry.query.clone()),
                        Value::Text(entry.created_at.clone()),
                    ],
                )
                .await?;
            if inserted == 0 {
                warn!("log entry {} already present locally, skipping", entry.id);
                continue;
            }

            if let Err(e) = tx.execute(&entry.query, ()).await {
                warn!("rolling back batch at entry {}: {}", entry.id, e);
                tx.rollback().await?;
                return Err(e.into());
            }
        }

        tx.commit().await?;
        Ok(entries.len())
    }

    /// Wipe the identity table and the log, restarting the sequence at 1.
    ///
    /// Out-of-band administrative action; not part of normal operation.
    pub async fn reset(&self) -> Result<(), LogError> {
        let conn = self.conn.lock().await;
        let tx = conn.transaction().await?;

        tx.execute("DELETE FROM users", ()).await?;
        tx.execute("DELETE FROM write_log", ()).await?;
        tx.execute("DELETE FROM sqlite_sequence WHERE name = 'write_log'", ())
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Number of rows in the identity table
    pub async fn user_count(&self) -> Result<i64, LogError> {
        let conn = self.conn.lock().await;
        let mut rows = conn.query("SELECT COUNT(*) FROM users", ()).await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?),
            None => Ok(0),
        }
    }
}

fn json_to_sql(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                Value::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}
