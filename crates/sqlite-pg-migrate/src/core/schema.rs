//! Schema and metadata types for source tables, destination column types and
//! destination foreign keys.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Source column metadata, as declared in SQLite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Declared type (may be empty, SQLite allows untyped columns).
    pub data_type: String,

    /// Zero-based declaration position.
    pub position: usize,
}

/// Source table metadata.
///
/// The column order is fixed once read; every read and write of the table
/// uses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,

    /// Column definitions in declaration order.
    pub columns: Vec<Column>,
}

impl TableSchema {
    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Destination column name → catalog type name (`information_schema.columns.data_type`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnTypeMap(HashMap<String, String>);

impl ColumnTypeMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the type of a column.
    pub fn insert(&mut self, column: impl Into<String>, data_type: impl Into<String>) {
        self.0.insert(column.into(), data_type.into());
    }

    /// Type of a column, if the destination has it.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    /// Whether the destination column holds JSON (`jsonb` or `json`).
    pub fn is_json(&self, column: &str) -> bool {
        matches!(self.get(column), Some(t) if t.eq_ignore_ascii_case("jsonb") || t.eq_ignore_ascii_case("json"))
    }

    /// Number of known columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the destination has no such table.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ColumnTypeMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Foreign key constraint found in the destination catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,

    /// Schema of the referencing table.
    pub schema: String,

    /// Referencing table.
    pub table: String,

    /// Referencing columns, in key order.
    pub columns: Vec<String>,

    /// Schema of the referenced table.
    pub ref_schema: String,

    /// Referenced table.
    pub ref_table: String,

    /// Referenced columns, aligned with `columns`.
    pub ref_columns: Vec<String>,

    /// `false` for constraints created `NOT VALID`.
    pub validated: bool,

    /// Declared `MATCH FULL`: a partly NULL key is itself a violation.
    #[serde(default)]
    pub match_full: bool,
}
