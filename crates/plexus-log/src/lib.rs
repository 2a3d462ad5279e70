//! Persistent write log and catch-up protocol
//!
//! Every replica keeps an ordered log of applied writes in its local libsql
//! database, next to the identity tables themselves. Log ids are dense and
//! ascending; a replica's log is always a prefix of the leader's. When a gap
//! is detected (or on cold start) the recovery client pulls the missing
//! suffix from the leader and applies it in a single transaction.

pub mod entry;
pub mod error;
pub mod recovery;
pub mod store;

pub use entry::{inline_params, LogEntry, QueryType};
pub use error::LogError;
pub use recovery::{RecoveryClient, RecoveryConfig};
pub use store::WriteLog;
