//! Centralized identifier validation and quoting for SQL injection prevention.
//!
//! SQL identifiers (table names, column names, schema names) cannot be passed as
//! parameters in prepared statements - only data values can be parameterized.
//! Every statement this crate builds with an identifier in it goes through one
//! of the functions below:
//!
//! - [`quote_sqlite`] always double-quotes (source side).
//! - [`pg_ident`] quotes only when PostgreSQL needs it: reserved words and
//!   anything that is not a plain lowercase identifier (destination side).
//!
//! Both validate first and escape embedded double quotes by doubling them.

use crate::error::{MigrateError, Result};

/// Maximum identifier length (conservative limit across databases).
/// - PostgreSQL: 63 bytes (longer names are truncated by the server)
/// - SQLite: no limit
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// PostgreSQL keywords that cannot be used as bare table or column names.
const PG_RESERVED: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric",
    "authorization", "binary", "both", "case", "cast", "check", "collate", "collation",
    "column", "concurrently", "constraint", "create", "cross", "current_catalog",
    "current_date", "current_role", "current_schema", "current_time", "current_timestamp",
    "current_user", "default", "deferrable", "desc", "distinct", "do", "else", "end",
    "except", "false", "fetch", "for", "foreign", "freeze", "from", "full", "grant",
    "group", "having", "ilike", "in", "initially", "inner", "intersect", "into", "is",
    "isnull", "join", "lateral", "leading", "left", "like", "limit", "localtime",
    "localtimestamp", "natural", "not", "notnull", "null", "offset", "on", "only", "or",
    "order", "outer", "overlaps", "placing", "primary", "references", "returning",
    "right", "select", "session_user", "similar", "some", "symmetric", "system_user",
    "table", "tablesample", "then", "to", "trailing", "true", "union", "unique", "user",
    "using", "variadic", "verbose", "when", "where", "window", "with",
];

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes (injection vector)
/// - Identifiers exceeding maximum length
///
/// # Errors
///
/// Returns `MigrateError::Config` for invalid identifiers with a descriptive message.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Check whether a name is a PostgreSQL reserved keyword (case-insensitive).
pub fn is_pg_reserved(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    PG_RESERVED.contains(&lower.as_str())
}

/// True when PostgreSQL would read `name` back unchanged without quotes.
fn is_plain_pg_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    first_ok
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$')
        && !is_pg_reserved(name)
}

/// Render a PostgreSQL identifier, quoting only when required.
///
/// # Examples
///
/// ```
/// use sqlite_pg_migrate::core::identifier::pg_ident;
///
/// assert_eq!(pg_ident("chat").unwrap(), "chat");
/// assert_eq!(pg_ident("user").unwrap(), "\"user\"");
/// assert_eq!(pg_ident("userId").unwrap(), "\"userId\"");
/// ```
pub fn pg_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    if is_plain_pg_identifier(name) {
        Ok(name.to_string())
    } else {
        Ok(format!("\"{}\"", name.replace('"', "\"\"")))
    }
}

/// Qualify a PostgreSQL table name with schema.
///
/// Tables in `public` are left unqualified so statements resolve through the
/// session's `search_path`, like the rest of the destination application.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    if schema == "public" {
        pg_ident(table)
    } else {
        Ok(format!("{}.{}", pg_ident(schema)?, pg_ident(table)?))
    }
}

/// Render a comma-separated PostgreSQL column list.
pub fn pg_column_list(columns: &[String]) -> Result<String> {
    let quoted = columns
        .iter()
        .map(|c| pg_ident(c))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// Quote a SQLite identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
pub fn quote_sqlite(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}
