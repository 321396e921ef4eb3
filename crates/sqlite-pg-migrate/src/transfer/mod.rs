//! Per-table bulk load: stream source batches, normalize, encode as CSV and
//! replace the destination table's contents with one COPY.

mod csv;
mod normalize;

pub use csv::TransferBuffer;
pub use normalize::{is_valid_json, normalize, NormalizedRow, RowNormalizer, EMPTY_JSON_OBJECT};

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::core::identifier::{pg_column_list, qualify_pg};
use crate::core::schema::{ColumnTypeMap, TableSchema};
use crate::core::traits::{LoadStatements, ReadOptions, SourceReader, TargetWriter};
use crate::core::value::Batch;
use crate::error::Result;

/// `TRUNCATE TABLE <t> CASCADE`
pub fn truncate_sql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("TRUNCATE TABLE {} CASCADE", qualify_pg(schema, table)?))
}

/// `COPY <t> (<cols>) FROM STDIN WITH (FORMAT csv)`
pub fn copy_sql(schema: &str, table: &str, columns: &[String]) -> Result<String> {
    Ok(format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv)",
        qualify_pg(schema, table)?,
        pg_column_list(columns)?
    ))
}

/// Outcome of loading one table.
#[derive(Debug, Clone, Default)]
pub struct TableLoadStats {
    pub table: String,
    /// Rows pulled from the source.
    pub rows_read: u64,
    /// Rows the destination reported as copied.
    pub rows_loaded: u64,
    /// JSON cells replaced with `{}`.
    pub replaced_json: usize,
    pub batches: usize,
    pub duration: Duration,
}

/// Loads tables one at a time from a source into a destination schema.
pub struct TransferEngine {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    target_schema: String,
    batch_size: usize,
}

impl TransferEngine {
    pub fn new(
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
        target_schema: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            source,
            target,
            target_schema: target_schema.into(),
            batch_size,
        }
    }

    /// Replace the destination table's rows with the source table's rows.
    pub async fn load(
        &self,
        schema: &TableSchema,
        dest_types: &ColumnTypeMap,
    ) -> Result<TableLoadStats> {
        let start = Instant::now();
        let table = schema.name.clone();
        let columns = schema.column_names();

        let statements = LoadStatements {
            table: table.clone(),
            truncate: truncate_sql(&self.target_schema, &table).map_err(|e| e.for_table(&table))?,
            copy: copy_sql(&self.target_schema, &table, &columns).map_err(|e| e.for_table(&table))?,
        };
        debug!("{}: {}", table, statements.copy);

        let normalizer = RowNormalizer::new(schema, dest_types);
        let rows_read = AtomicU64::new(0);
        let replaced = AtomicUsize::new(0);
        let batches = AtomicUsize::new(0);

        let rx = self.source.read_table(ReadOptions {
            table: table.clone(),
            columns,
            batch_size: self.batch_size,
        });

        let data = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .map(|batch| -> Result<Bytes> {
            let batch = batch?;
            let encoded = encode_batch(&normalizer, batch);
            rows_read.fetch_add(encoded.records() as u64, Ordering::Relaxed);
            batches.fetch_add(1, Ordering::Relaxed);
            replaced.fetch_add(encoded.replaced_json, Ordering::Relaxed);
            Ok(encoded.buffer.freeze())
        })
        .boxed();

        let rows_loaded = self
            .target
            .replace_table(&statements, data)
            .await
            .map_err(|e| e.for_table(&table))?;

        let stats = TableLoadStats {
            table,
            rows_read: rows_read.load(Ordering::Relaxed),
            rows_loaded,
            replaced_json: replaced.load(Ordering::Relaxed),
            batches: batches.load(Ordering::Relaxed),
            duration: start.elapsed(),
        };

        if stats.replaced_json > 0 {
            warn!(
                "{}: replaced {} invalid JSON value(s) with {}",
                stats.table, stats.replaced_json, EMPTY_JSON_OBJECT
            );
        }
        if stats.rows_loaded != stats.rows_read {
            warn!(
                "{}: read {} rows but destination copied {}",
                stats.table, stats.rows_read, stats.rows_loaded
            );
        }
        info!(
            "{}: loaded {} rows in {:.2}s",
            stats.table,
            stats.rows_loaded,
            stats.duration.as_secs_f64()
        );

        Ok(stats)
    }
}

struct EncodedBatch {
    buffer: TransferBuffer,
    replaced_json: usize,
}

impl EncodedBatch {
    fn records(&self) -> usize {
        self.buffer.records()
    }
}

fn encode_batch(normalizer: &RowNormalizer, batch: Batch) -> EncodedBatch {
    let mut buffer = TransferBuffer::with_capacity(batch.len());
    let mut replaced_json = 0;
    for row in batch.rows {
        let normalized = normalizer.normalize(row);
        replaced_json += normalized.replaced_json;
        buffer.push_record(&normalized.values);
    }
    EncodedBatch {
        buffer,
        replaced_json,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrateError;
    use crate::source::SqliteReader;
    use crate::target::mock::{Call, RecordingTarget};
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn sqlite_fixture(setup: &str) -> (TempDir, Arc<dyn SourceReader>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("webui.db");
        Connection::open(&path).unwrap().execute_batch(setup).unwrap();
        let reader: Arc<dyn SourceReader> = Arc::new(SqliteReader::open_path(&path).unwrap());
        (dir, reader)
    }

    async fn load_table(
        source: Arc<dyn SourceReader>,
        target: Arc<RecordingTarget>,
        table: &str,
        batch_size: usize,
    ) -> Result<TableLoadStats> {
        let schema = source.get_schema(table).await?;
        let types = target.column_types("public", table).await?;
        let engine = TransferEngine::new(source, target, "public", batch_size);
        engine.load(&schema, &types).await
    }

    #[test]
    fn test_statement_text() {
        let cols = vec!["id".to_string(), "payload".to_string()];
        assert_eq!(truncate_sql("public", "test").unwrap(), "TRUNCATE TABLE test CASCADE");
        assert_eq!(
            copy_sql("public", "test", &cols).unwrap(),
            "COPY test (id, payload) FROM STDIN WITH (FORMAT csv)"
        );
    }

    #[test]
    fn test_statement_text_quotes_reserved_names() {
        let cols = vec!["id".to_string(), "order".to_string(), "userId".to_string()];
        assert_eq!(
            truncate_sql("public", "user").unwrap(),
            "TRUNCATE TABLE \"user\" CASCADE"
        );
        assert_eq!(
            copy_sql("public", "user", &cols).unwrap(),
            "COPY \"user\" (id, \"order\", \"userId\") FROM STDIN WITH (FORMAT csv)"
        );
        assert_eq!(
            truncate_sql("webui", "chat").unwrap(),
            "TRUNCATE TABLE webui.chat CASCADE"
        );
    }

    #[tokio::test]
    async fn test_json_row_end_to_end() {
        let (_dir, source) = sqlite_fixture(
            r#"CREATE TABLE test (id INTEGER, payload TEXT);
               INSERT INTO test VALUES (1, '{"a": 1}');"#,
        );
        let target = Arc::new(
            RecordingTarget::new().with_table("test", &[("id", "integer"), ("payload", "jsonb")]),
        );

        let stats = load_table(source, target.clone(), "test", 5_000).await.unwrap();
        assert_eq!(stats.rows_read, 1);
        assert_eq!(stats.rows_loaded, 1);
        assert_eq!(stats.replaced_json, 0);

        let loads: Vec<Call> = target
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Truncate(_) | Call::Copy { .. }))
            .collect();
        assert_eq!(
            loads,
            vec![
                Call::Truncate("TRUNCATE TABLE test CASCADE".to_string()),
                Call::Copy {
                    statement: "COPY test (id, payload) FROM STDIN WITH (FORMAT csv)".to_string(),
                    payload: "1,\"{\"\"a\"\": 1}\"\n".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_round_trip_without_json_columns() {
        let (_dir, source) = sqlite_fixture(
            "CREATE TABLE note (id INTEGER, title TEXT, score REAL);
             INSERT INTO note VALUES (1, 'first', 1.5), (2, '', NULL), (3, NULL, -2.0),
                                     (4, 'a,b', 0.25), (5, 'x', 3.0), (6, 'y', 4.0),
                                     (7, 'z', 5.5);",
        );
        let target = Arc::new(RecordingTarget::new().with_table(
            "note",
            &[("id", "integer"), ("title", "text"), ("score", "double precision")],
        ));

        let stats = load_table(source, target.clone(), "note", 3).await.unwrap();
        assert_eq!(stats.rows_read, 7);
        assert_eq!(stats.batches, 3);

        let payload = target.copied_payload("note").unwrap();
        let lines: Vec<&str> = payload.lines().collect();
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0], "1,first,1.5");
        assert_eq!(lines[1], "2,\"\",");
        assert_eq!(lines[2], "3,,-2");
        assert_eq!(lines[3], "4,\"a,b\",0.25");
    }

    #[tokio::test]
    async fn test_invalid_json_is_replaced_and_counted() {
        let (_dir, source) = sqlite_fixture(
            r#"CREATE TABLE chat (id TEXT, chat TEXT);
               INSERT INTO chat VALUES ('a', '{"ok": true}'), ('b', 'garbage'), ('c', NULL);"#,
        );
        let target = Arc::new(
            RecordingTarget::new().with_table("chat", &[("id", "text"), ("chat", "json")]),
        );

        let stats = load_table(source, target.clone(), "chat", 10).await.unwrap();
        assert_eq!(stats.replaced_json, 1);
        assert_eq!(
            target.copied_payload("chat").unwrap(),
            "a,\"{\"\"ok\"\": true}\"\nb,{}\nc,\n"
        );
    }

    #[tokio::test]
    async fn test_reserved_table_name_is_quoted() {
        let (_dir, source) = sqlite_fixture(
            "CREATE TABLE \"user\" (id TEXT, email TEXT);
             INSERT INTO \"user\" VALUES ('u1', 'a@example.com');",
        );
        let target = Arc::new(
            RecordingTarget::new().with_table("user", &[("id", "text"), ("email", "text")]),
        );

        load_table(source, target.clone(), "user", 10).await.unwrap();
        assert!(target
            .calls()
            .contains(&Call::Truncate("TRUNCATE TABLE \"user\" CASCADE".to_string())));
        assert_eq!(target.copied_payload("\"user\"").unwrap(), "u1,a@example.com\n");
    }

    #[tokio::test]
    async fn test_empty_table_still_truncates() {
        let (_dir, source) = sqlite_fixture("CREATE TABLE tag (id TEXT)");
        let target = Arc::new(RecordingTarget::new().with_table("tag", &[("id", "text")]));

        let stats = load_table(source, target.clone(), "tag", 10).await.unwrap();
        assert_eq!(stats.rows_loaded, 0);
        assert_eq!(target.load_calls(), 1);
        assert_eq!(target.copied_payload("tag").unwrap(), "");
    }

    #[tokio::test]
    async fn test_missing_destination_table() {
        let (_dir, source) = sqlite_fixture("CREATE TABLE orphan (id INTEGER)");
        let target = Arc::new(RecordingTarget::new());

        let err = load_table(source, target, "orphan", 10).await.unwrap_err();
        assert!(matches!(err, MigrateError::DestinationTableMissing { table } if table == "orphan"));
    }

    #[tokio::test]
    async fn test_copy_failure_names_table() {
        let (_dir, source) = sqlite_fixture(
            "CREATE TABLE file (id TEXT);
             INSERT INTO file VALUES ('f1');",
        );
        let target = Arc::new(
            RecordingTarget::new()
                .with_table("file", &[("id", "text")])
                .rejecting_copy("file"),
        );

        let err = load_table(source, target, "file", 10).await.unwrap_err();
        match err {
            MigrateError::TableLoadFailed { table, message } => {
                assert_eq!(table, "file");
                assert!(message.contains("jsonb"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_source_read_error_is_a_load_failure() {
        let (_dir, source) = sqlite_fixture(
            "CREATE TABLE note (id INTEGER);
             INSERT INTO note VALUES (1);",
        );
        let target = Arc::new(RecordingTarget::new().with_table("note", &[("id", "integer")]));
        let schema = TableSchema {
            name: "note".to_string(),
            columns: vec![crate::core::schema::Column {
                name: "vanished".to_string(),
                data_type: "TEXT".to_string(),
                position: 0,
            }],
        };
        let engine = TransferEngine::new(source, target, "public", 10);

        let err = engine.load(&schema, &ColumnTypeMap::new()).await.unwrap_err();
        assert!(matches!(err, MigrateError::TableLoadFailed { table, .. } if table == "note"));
    }
}
