//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, bad env vars, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source file missing, unreadable, or failing the integrity check.
    #[error("Source database unavailable: {0}")]
    SourceUnavailable(String),

    /// Destination server unreachable or refusing the connection.
    #[error("Destination database unavailable: {0}")]
    DestinationUnavailable(String),

    /// Table disappeared between listing and introspection.
    #[error("Schema not found for source table {0}")]
    SchemaNotFound(String),

    /// The destination has no table matching a source table.
    #[error("Destination table {table} does not exist")]
    DestinationTableMissing { table: String },

    /// Clear or bulk copy failed for a table; the table's transaction was rolled back.
    #[error("Load failed for table {table}: {message}")]
    TableLoadFailed { table: String, message: String },

    /// Post-load foreign key validation found a dangling reference.
    #[error("Foreign key constraint {constraint} on table {table} is violated")]
    ConstraintViolation { constraint: String, table: String },

    /// Source database query error
    #[error("Source database error: {0}")]
    Source(#[from] rusqlite::Error),

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a TableLoadFailed error
    pub fn load_failed(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::TableLoadFailed {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a ConstraintViolation error
    pub fn constraint_violation(constraint: impl Into<String>, table: impl Into<String>) -> Self {
        MigrateError::ConstraintViolation {
            constraint: constraint.into(),
            table: table.into(),
        }
    }

    /// Attach the table being migrated to an error that does not name one.
    ///
    /// Errors that already carry a table pass through unchanged; everything
    /// else becomes [`MigrateError::TableLoadFailed`].
    pub fn for_table(self, table: &str) -> Self {
        match self {
            MigrateError::SchemaNotFound(_)
            | MigrateError::DestinationTableMissing { .. }
            | MigrateError::TableLoadFailed { .. }
            | MigrateError::ConstraintViolation { .. } => self,
            other => MigrateError::load_failed(table, other.to_string()),
        }
    }

    /// Whether the error was raised before any data was written.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            MigrateError::Config(_)
                | MigrateError::SourceUnavailable(_)
                | MigrateError::DestinationUnavailable(_)
        )
    }

    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::SourceUnavailable(_) | MigrateError::DestinationUnavailable(_) => 3,
            MigrateError::ConstraintViolation { .. } => 4,
            MigrateError::SchemaNotFound(_)
            | MigrateError::DestinationTableMissing { .. }
            | MigrateError::TableLoadFailed { .. } => 5,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
