//! Row normalization against destination column types.
//!
//! Only JSON destination columns are touched. Everything else passes through
//! and is coerced by the destination's COPY parser.

use serde::de::IgnoredAny;

use crate::core::schema::{ColumnTypeMap, TableSchema};
use crate::core::value::{Row, SqlValue};

/// Stand-in written to a JSON column when the source text is not JSON.
pub const EMPTY_JSON_OBJECT: &str = "{}";

/// A row ready for encoding, plus how many cells had to be replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub values: Vec<SqlValue>,
    pub replaced_json: usize,
}

impl NormalizedRow {
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

/// Normalizer for one table, with the JSON columns resolved once up front.
#[derive(Debug, Clone)]
pub struct RowNormalizer {
    json_mask: Vec<bool>,
}

impl RowNormalizer {
    pub fn new(schema: &TableSchema, dest_types: &ColumnTypeMap) -> Self {
        Self {
            json_mask: schema
                .columns
                .iter()
                .map(|c| dest_types.is_json(&c.name))
                .collect(),
        }
    }

    /// Whether any column of the table needs JSON handling.
    pub fn has_json_columns(&self) -> bool {
        self.json_mask.iter().any(|&j| j)
    }

    pub fn normalize(&self, row: Row) -> NormalizedRow {
        let mut replaced_json = 0;
        let values = row
            .into_iter()
            .enumerate()
            .map(|(idx, value)| {
                if !self.json_mask.get(idx).copied().unwrap_or(false) {
                    return value;
                }
                let (value, replaced) = normalize_json(value);
                if replaced {
                    replaced_json += 1;
                }
                value
            })
            .collect();

        NormalizedRow {
            values,
            replaced_json,
        }
    }
}

/// Normalize one row by position.
pub fn normalize(row: Row, schema: &TableSchema, dest_types: &ColumnTypeMap) -> NormalizedRow {
    RowNormalizer::new(schema, dest_types).normalize(row)
}

/// Returns the value for a JSON column and whether it was replaced.
fn normalize_json(value: SqlValue) -> (SqlValue, bool) {
    match value {
        SqlValue::Null => (SqlValue::Null, false),
        SqlValue::Json(v) => (SqlValue::Text(v.to_string()), false),
        SqlValue::Text(text) => text_or_empty_object(text),
        SqlValue::Integer(i) => (SqlValue::Integer(i), false),
        SqlValue::Real(f) if f.is_finite() => (SqlValue::Real(f), false),
        // NaN and infinities have no JSON spelling.
        SqlValue::Real(_) => (SqlValue::Text(EMPTY_JSON_OBJECT.to_string()), true),
        SqlValue::Blob(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text_or_empty_object(text),
            Err(_) => (SqlValue::Text(EMPTY_JSON_OBJECT.to_string()), true),
        },
    }
}

fn text_or_empty_object(text: String) -> (SqlValue, bool) {
    if is_valid_json(&text) {
        (SqlValue::Text(text), false)
    } else {
        (SqlValue::Text(EMPTY_JSON_OBJECT.to_string()), true)
    }
}

/// Syntax check without building the value tree.
pub fn is_valid_json(text: &str) -> bool {
    serde_json::from_str::<IgnoredAny>(text).is_ok()
}
