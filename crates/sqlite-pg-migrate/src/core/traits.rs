//! Core traits for the two migration endpoints.
//!
//! - [`SourceReader`]: reads catalog and rows from the SQLite source
//! - [`TargetWriter`]: inspects and writes the PostgreSQL destination
//!
//! The orchestrator, bulk loader and constraint coordinator only talk to these
//! traits, so they can run against a recording target in tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crate::error::Result;

use super::schema::{ColumnTypeMap, ForeignKey, TableSchema};
use super::value::Batch;

/// Options for reading rows from a table.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Table name.
    pub table: String,
    /// Columns to read, in schema order.
    pub columns: Vec<String>,
    /// Number of rows per batch.
    pub batch_size: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            table: String::new(),
            columns: Vec::new(),
            batch_size: crate::config::DEFAULT_BATCH_SIZE,
        }
    }
}

/// Read data from the source database.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Run the source's integrity check.
    async fn check_integrity(&self) -> Result<()>;

    /// List migratable tables in catalog order.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Load the column schema of one table.
    async fn get_schema(&self, table: &str) -> Result<TableSchema>;

    /// Get the row count for a table.
    async fn get_row_count(&self, table: &str) -> Result<i64>;

    /// Start streaming rows from a table.
    ///
    /// Returns a channel receiver that yields batches of rows. The reader
    /// spawns a worker that owns the cursor and populates the channel; it stops
    /// and releases the cursor when the table is exhausted, on error, or as
    /// soon as the receiver is dropped.
    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<Batch>>;

    /// Get the database type identifier.
    fn db_type(&self) -> &str;
}

/// Session-level settings the engine toggles on the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSetting {
    /// Suppress trigger-based enforcement (foreign keys) for this session.
    ReplicationReplica,
    /// Restore normal trigger firing.
    ReplicationOrigin,
    /// Make every following transaction read-only (dry runs).
    ReadOnly,
}

impl SessionSetting {
    /// The `SET` statement implementing this setting.
    pub fn to_sql(self) -> &'static str {
        match self {
            SessionSetting::ReplicationReplica => "SET session_replication_role = replica",
            SessionSetting::ReplicationOrigin => "SET session_replication_role = origin",
            SessionSetting::ReadOnly => "SET default_transaction_read_only = on",
        }
    }
}

/// Statements for replacing one destination table's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadStatements {
    /// Table name, for error reporting.
    pub table: String,
    /// Destructive clear, e.g. `TRUNCATE TABLE chat CASCADE`.
    pub truncate: String,
    /// Bulk load, e.g. `COPY chat (id, title) FROM STDIN WITH (FORMAT csv)`.
    pub copy: String,
}

/// Inspect and write the destination database.
///
/// All calls go through one destination session, so session settings made
/// with [`TargetWriter::set_session`] apply to every later call.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Round-trip a trivial query to prove the session is usable.
    async fn ping(&self) -> Result<()>;

    /// Column name → type name for one table. Empty when the table is absent.
    async fn column_types(&self, schema: &str, table: &str) -> Result<ColumnTypeMap>;

    /// Apply a session-level setting.
    async fn set_session(&self, setting: SessionSetting) -> Result<()>;

    /// Clear the table and bulk-load `data` (CSV buffers) in one transaction.
    ///
    /// Returns the number of rows the server reports as copied.
    async fn replace_table(
        &self,
        statements: &LoadStatements,
        data: BoxStream<'_, Result<Bytes>>,
    ) -> Result<u64>;

    /// Every foreign key constraint in user schemas.
    async fn foreign_keys(&self) -> Result<Vec<ForeignKey>>;

    /// Run a statement that returns no rows.
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Run a `SELECT EXISTS (...)` style query and return its single boolean.
    async fn exists(&self, sql: &str) -> Result<bool>;

    /// Get the row count for a table.
    async fn get_row_count(&self, schema: &str, table: &str) -> Result<i64>;

    /// Get the database type identifier.
    fn db_type(&self) -> &str;
}
