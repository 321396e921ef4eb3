//! SQLite source database operations.

mod snapshot;

pub use snapshot::copy_database;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::config::DbConfig;
use rusqlite::{Connection, OpenFlags};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::core::identifier::quote_sqlite;
use crate::core::schema::{Column, TableSchema};
use crate::core::traits::{ReadOptions, SourceReader};
use crate::core::value::{Batch, SqlValue};
use crate::error::{MigrateError, Result};

/// Migration bookkeeping tables of the source application; never migrated.
pub const BOOKKEEPING_TABLES: [&str; 2] = ["alembic_version", "migratehistory"];

/// Batches buffered between the reader worker and the loader.
const READ_AHEAD_BATCHES: usize = 1;

/// Whether a catalog table takes part in the migration.
pub fn is_migratable(name: &str) -> bool {
    !BOOKKEEPING_TABLES.contains(&name) && !name.starts_with("sqlite_")
}

/// Build the extraction query over an explicit column list.
pub fn build_select_query(table: &str, columns: &[String]) -> Result<String> {
    if columns.is_empty() {
        return Err(MigrateError::SchemaNotFound(table.to_string()));
    }
    let cols = columns
        .iter()
        .map(|c| quote_sqlite(c))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("SELECT {} FROM {}", cols.join(", "), quote_sqlite(table)?))
}

/// SQLite reader over a single shared connection.
pub struct SqliteReader {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    // Held so the snapshot copy outlives the connection reading it.
    _snapshot_dir: Option<TempDir>,
}

impl SqliteReader {
    /// Open the source described by the configuration, snapshotting it first
    /// when requested.
    pub fn open(config: &SourceConfig) -> Result<Self> {
        if !config.snapshot {
            return Self::open_path(&config.path);
        }

        let dir = TempDir::new()?;
        let copy = copy_database(&config.path, dir.path())?;
        let mut reader = Self::open_path(&copy)?;
        reader._snapshot_dir = Some(dir);
        Ok(reader)
    }

    /// Open an existing SQLite file read-only.
    pub fn open_path(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(MigrateError::SourceUnavailable(format!(
                "SQLite DB not found: {}",
                path.display()
            )));
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        let unavailable = |e: rusqlite::Error| {
            MigrateError::SourceUnavailable(format!("{}: {}", path.display(), e))
        };
        let conn = Connection::open_with_flags(path, flags).map_err(unavailable)?;

        // A double-quoted name that matches no column must fail the query
        // instead of reading back as a string literal.
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DML, false)
            .map_err(unavailable)?;

        info!("Opened SQLite source: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
            _snapshot_dir: None,
        })
    }

    /// Path of the file actually being read (the snapshot copy, if any).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| {
                MigrateError::SourceUnavailable("SQLite connection lock poisoned".to_string())
            })?;
            f(&guard)
        })
        .await
        .map_err(|e| MigrateError::SourceUnavailable(format!("SQLite worker failed: {}", e)))?
    }
}

#[async_trait]
impl SourceReader for SqliteReader {
    async fn check_integrity(&self) -> Result<()> {
        let path = self.path.display().to_string();
        self.with_conn(move |conn| {
            let unavailable = |e: rusqlite::Error| {
                MigrateError::SourceUnavailable(format!("{}: {}", path, e))
            };
            let mut stmt = conn.prepare("PRAGMA integrity_check").map_err(unavailable)?;
            let messages = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(unavailable)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(unavailable)?;

            if messages.len() == 1 && messages[0] == "ok" {
                debug!("Integrity check passed for {}", path);
                Ok(())
            } else {
                Err(MigrateError::SourceUnavailable(format!(
                    "{}: integrity check failed: {}",
                    path,
                    messages.join("; ")
                )))
            }
        })
        .await
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let unavailable =
                |e: rusqlite::Error| MigrateError::SourceUnavailable(format!("listing tables: {}", e));
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
                .map_err(unavailable)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(unavailable)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(unavailable)?;

            Ok(names.into_iter().filter(|n| is_migratable(n)).collect())
        })
        .await
    }

    async fn get_schema(&self, table: &str) -> Result<TableSchema> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT cid, name, type FROM pragma_table_info(?1) ORDER BY cid")?;
            let columns = stmt
                .query_map([&table], |row| {
                    Ok(Column {
                        position: row.get::<_, i64>(0)? as usize,
                        name: row.get(1)?,
                        data_type: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            if columns.is_empty() {
                return Err(MigrateError::SchemaNotFound(table));
            }

            Ok(TableSchema {
                name: table,
                columns,
            })
        })
        .await
    }

    async fn get_row_count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_sqlite(table)?);
        self.with_conn(move |conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))
            .await
    }

    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<Batch>> {
        let (tx, rx) = mpsc::channel(READ_AHEAD_BATCHES);
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let result = match conn.lock() {
                Ok(guard) => stream_rows(&guard, &opts, &tx),
                Err(_) => Err(MigrateError::SourceUnavailable(
                    "SQLite connection lock poisoned".to_string(),
                )),
            };
            if let Err(e) = result {
                // Receiver may already be gone; nothing left to report to.
                let _ = tx.blocking_send(Err(e));
            }
        });

        rx
    }

    fn db_type(&self) -> &str {
        "sqlite"
    }
}

/// Run the extraction query and push fixed-size batches into the channel.
///
/// The statement and its cursor live on this stack frame only, so they are
/// released whichever way the function returns.
fn stream_rows(
    conn: &Connection,
    opts: &ReadOptions,
    tx: &mpsc::Sender<Result<Batch>>,
) -> Result<()> {
    let sql = build_select_query(&opts.table, &opts.columns)?;
    let batch_size = opts.batch_size.max(1);
    let width = opts.columns.len();

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut batch = Vec::with_capacity(batch_size);
    let mut total = 0usize;

    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            values.push(SqlValue::from(row.get_ref(idx)?));
        }
        batch.push(values);

        if batch.len() >= batch_size {
            total += batch.len();
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            if tx.blocking_send(Ok(Batch::new(full))).is_err() {
                debug!("{}: reader dropped after {} rows, closing cursor", opts.table, total);
                return Ok(());
            }
        }
    }

    if !batch.is_empty() {
        total += batch.len();
        if tx.blocking_send(Ok(Batch::new(batch))).is_err() {
            debug!("{}: reader dropped before final batch", opts.table);
            return Ok(());
        }
    }

    debug!("{}: read {} rows", opts.table, total);
    Ok(())
}
