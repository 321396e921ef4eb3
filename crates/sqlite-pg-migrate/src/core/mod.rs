//! Core abstractions shared by the migration engine.
//!
//! - [`schema`]: source table/column metadata, destination type map, foreign keys
//! - [`value`]: the closed cell value union and row batches
//! - [`traits`]: the source and destination endpoint traits
//! - [`identifier`]: the single place identifiers are quoted into SQL text

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

// Re-export commonly used types for convenience
pub use schema::{Column, ColumnTypeMap, ForeignKey, TableSchema};
pub use traits::{LoadStatements, ReadOptions, SessionSetting, SourceReader, TargetWriter};
pub use value::{Batch, Row, SqlValue};
