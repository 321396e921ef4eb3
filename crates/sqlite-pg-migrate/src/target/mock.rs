//! Recording destination for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::core::schema::{ColumnTypeMap, ForeignKey};
use crate::core::traits::{LoadStatements, SessionSetting, TargetWriter};
use crate::error::{MigrateError, Result};

/// One observed destination call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Ping,
    ColumnTypes(String),
    SetSession(SessionSetting),
    Truncate(String),
    Copy { statement: String, payload: String },
    ForeignKeys,
    Execute(String),
    Exists(String),
    RowCount(String),
}

/// In-memory destination that records every call in order.
#[derive(Default)]
pub struct RecordingTarget {
    calls: Mutex<Vec<Call>>,
    tables: HashMap<String, ColumnTypeMap>,
    foreign_keys: Vec<ForeignKey>,
    orphan_probes: HashSet<String>,
    rejected_copies: HashSet<String>,
    failing_introspection: HashSet<String>,
    failing_validations: HashSet<String>,
    loaded: Mutex<HashMap<String, i64>>,
    unreachable: bool,
}

impl RecordingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a destination table and its column types.
    pub fn with_table(mut self, name: &str, columns: &[(&str, &str)]) -> Self {
        self.tables
            .insert(name.to_string(), columns.iter().copied().collect());
        self
    }

    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Make the given orphan probe report dangling rows.
    pub fn with_orphans(mut self, probe_sql: String) -> Self {
        self.orphan_probes.insert(probe_sql);
        self
    }

    /// Fail the bulk copy for a table after its truncate.
    pub fn rejecting_copy(mut self, table: &str) -> Self {
        self.rejected_copies.insert(table.to_string());
        self
    }

    /// Drop the connection while reading a table's column types.
    pub fn failing_column_types(mut self, table: &str) -> Self {
        self.failing_introspection.insert(table.to_string());
        self
    }

    /// Reject `VALIDATE CONSTRAINT` for the named constraint.
    pub fn failing_validation(mut self, constraint: &str) -> Self {
        self.failing_validations.insert(constraint.to_string());
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of `replace_table` invocations that reached the truncate.
    pub fn load_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Truncate(_)))
            .count()
    }

    /// Payload copied into a table, if any.
    pub fn copied_payload(&self, table: &str) -> Option<String> {
        let needle = format!("COPY {} ", table);
        self.calls().into_iter().find_map(|c| match c {
            Call::Copy { statement, payload } if statement.starts_with(&needle) => Some(payload),
            _ => None,
        })
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Count CSV records, ignoring newlines inside quoted fields.
fn count_records(payload: &str) -> u64 {
    let mut quoted = false;
    let mut records = 0;
    for ch in payload.chars() {
        match ch {
            '"' => quoted = !quoted,
            '\n' if !quoted => records += 1,
            _ => {}
        }
    }
    records
}

/// Last identifier of a `TRUNCATE TABLE x CASCADE` statement, unquoted.
fn truncated_table(sql: &str) -> String {
    let target = sql
        .trim_start_matches("TRUNCATE TABLE ")
        .trim_end_matches(" CASCADE");
    let last = target.rsplit('.').next().unwrap_or(target);
    last.trim_matches('"').replace("\"\"", "\"")
}

#[async_trait]
impl TargetWriter for RecordingTarget {
    async fn ping(&self) -> Result<()> {
        self.record(Call::Ping);
        if self.unreachable {
            return Err(MigrateError::DestinationUnavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }

    async fn column_types(&self, _schema: &str, table: &str) -> Result<ColumnTypeMap> {
        self.record(Call::ColumnTypes(table.to_string()));
        if self.failing_introspection.contains(table) {
            return Err(MigrateError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "connection closed",
            )));
        }
        Ok(self.tables.get(table).cloned().unwrap_or_default())
    }

    async fn set_session(&self, setting: SessionSetting) -> Result<()> {
        self.record(Call::SetSession(setting));
        Ok(())
    }

    async fn replace_table(
        &self,
        statements: &LoadStatements,
        mut data: BoxStream<'_, Result<Bytes>>,
    ) -> Result<u64> {
        self.record(Call::Truncate(statements.truncate.clone()));
        let table = truncated_table(&statements.truncate);
        if !self.tables.contains_key(&table) {
            return Err(MigrateError::DestinationTableMissing {
                table: statements.table.clone(),
            });
        }

        let mut payload = Vec::new();
        while let Some(chunk) = data.next().await {
            payload.extend_from_slice(&chunk?);
        }
        if self.rejected_copies.contains(&table) {
            return Err(MigrateError::load_failed(
                &statements.table,
                "invalid input syntax for type jsonb",
            ));
        }

        let payload = String::from_utf8_lossy(&payload).into_owned();
        let rows = count_records(&payload);
        self.record(Call::Copy {
            statement: statements.copy.clone(),
            payload,
        });
        self.loaded
            .lock()
            .unwrap()
            .insert(statements.table.clone(), rows as i64);
        Ok(rows)
    }

    async fn foreign_keys(&self) -> Result<Vec<ForeignKey>> {
        self.record(Call::ForeignKeys);
        Ok(self.foreign_keys.clone())
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.record(Call::Execute(sql.to_string()));
        let rejected = self
            .failing_validations
            .iter()
            .any(|name| sql.contains("VALIDATE CONSTRAINT") && sql.ends_with(name.as_str()));
        if rejected {
            return Err(MigrateError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("insert or update violates foreign key constraint: {}", sql),
            )));
        }
        Ok(())
    }

    async fn exists(&self, sql: &str) -> Result<bool> {
        self.record(Call::Exists(sql.to_string()));
        Ok(self.orphan_probes.contains(sql))
    }

    async fn get_row_count(&self, _schema: &str, table: &str) -> Result<i64> {
        self.record(Call::RowCount(table.to_string()));
        Ok(self.loaded.lock().unwrap().get(table).copied().unwrap_or(0))
    }

    fn db_type(&self) -> &str {
        "recording"
    }
}
