//! # sqlite-pg-migrate
//!
//! One-shot migration of a SQLite application database into an existing
//! PostgreSQL schema.
//!
//! The destination schema is created by the application itself; this crate
//! only moves rows. For every table it:
//!
//! - **Streams** rows out of SQLite in fixed-size batches
//! - **Normalizes** values for JSON destination columns
//! - **Replaces** the destination rows with `TRUNCATE` + `COPY` in one transaction
//!
//! Referential enforcement is suspended for the session while loading and every
//! foreign key is checked once all tables are in.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqlite_pg_migrate::{Config, Orchestrator, RunMode};
//!
//! #[tokio::main]
//! async fn main() -> sqlite_pg_migrate::Result<()> {
//!     let config = Config::from_env()?;
//!     let mut orchestrator = Orchestrator::connect(config).await?;
//!     let result = orchestrator.run(RunMode::Live).await?;
//!     println!("Migrated {} rows", result.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constraints;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod source;
pub mod target;
pub mod transfer;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig};
pub use constraints::{ConstraintCoordinator, ValidationReport};
pub use crate::core::{SourceReader, SqlValue, TargetWriter};
pub use error::{MigrateError, Result};
pub use orchestrator::{CountCheck, MigrationResult, Orchestrator, RunMode, RunState, TableResult};
pub use source::SqliteReader;
pub use target::{PgWriter, SslMode};
pub use transfer::{TableLoadStats, TransferEngine};
