//! SQL value types flowing from the SQLite reader to the COPY encoder.

/// A single cell value.
///
/// Closed set of the shapes a SQLite row can hold, plus `Json` for values that
/// arrive already decoded into a structure. Every consumer matches it
/// exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// SQLite INTEGER storage class.
    Integer(i64),

    /// SQLite REAL storage class.
    Real(f64),

    /// SQLite TEXT storage class.
    Text(String),

    /// An already-decoded JSON object or array.
    Json(serde_json::Value),

    /// SQLite BLOB storage class.
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Name of the variant, for log lines.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Integer(_) => "integer",
            SqlValue::Real(_) => "real",
            SqlValue::Text(_) => "text",
            SqlValue::Json(_) => "json",
            SqlValue::Blob(_) => "blob",
        }
    }
}

impl From<rusqlite::types::ValueRef<'_>> for SqlValue {
    /// Text is decoded lossily: invalid UTF-8 becomes U+FFFD instead of an error.
    fn from(value: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        SqlValue::Json(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// One source row, positionally aligned to the table's column schema.
pub type Row = Vec<SqlValue>;

/// A batch of rows for streaming transfer.
#[derive(Debug, Default)]
pub struct Batch {
    /// Rows in this batch (owned for channel transfer).
    pub rows: Vec<Row>,
}

impl Batch {
    /// Create a new batch with the given rows.
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// Get the number of rows in this batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
