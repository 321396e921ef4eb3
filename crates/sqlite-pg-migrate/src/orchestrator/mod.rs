//! Migration orchestrator - main workflow coordinator.
//!
//! A live run walks `Idle → Validating → ConstraintsRelaxed → Migrating(t)…
//! → ConstraintsRestored → Validated → Done`; any error lands in `Failed`.
//! A dry run stops after `Validating` and only reports.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::constraints::ConstraintCoordinator;
use crate::core::traits::{SessionSetting, SourceReader, TargetWriter};
use crate::error::{MigrateError, Result};
use crate::source::SqliteReader;
use crate::target::PgWriter;
use crate::transfer::TransferEngine;

/// Whether a run writes to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Live,
    DryRun,
}

/// Where a run currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Validating,
    ConstraintsRelaxed,
    Migrating(String),
    ConstraintsRestored,
    Validated,
    Done,
    Failed,
}

/// Per-table outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableResult {
    /// Table name.
    pub name: String,

    /// Rows in the source table.
    pub source_rows: u64,

    /// Rows copied into the destination (0 for dry runs).
    pub rows_loaded: u64,

    /// JSON cells written as `{}` because the source text was not JSON.
    pub replaced_json_cells: usize,

    /// Whether the destination has a matching table.
    pub target_exists: bool,

    /// Load time in seconds.
    pub duration_seconds: f64,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Live or dry run.
    pub mode: RunMode,

    /// Final status.
    pub status: String,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Tables processed.
    pub tables_total: usize,

    /// Total rows copied.
    pub rows_transferred: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: i64,

    /// JSON cells replaced across all tables.
    pub replaced_json_cells: usize,

    /// Foreign keys checked by the final pass.
    pub constraints_checked: usize,

    /// Per-table details, in load order.
    pub tables: Vec<TableResult>,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Source and destination row counts for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountCheck {
    pub table: String,
    pub source_rows: i64,
    /// `None` when the destination count could not be taken.
    pub target_rows: Option<i64>,
    pub matches: bool,
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    state: RunState,
}

impl Orchestrator {
    /// Open the SQLite source and connect to PostgreSQL.
    pub async fn connect(config: Config) -> Result<Self> {
        config.validate()?;
        let source = SqliteReader::open(&config.source)?;
        let target = PgWriter::connect(&config.target).await?;
        Ok(Self::with_endpoints(
            config,
            Arc::new(source),
            Arc::new(target),
        ))
    }

    /// Build an orchestrator over existing endpoints.
    pub fn with_endpoints(
        config: Config,
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    fn transition(&mut self, next: RunState) {
        debug!("Run state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Check both endpoints without changing anything.
    pub async fn health_check(&self) -> Result<()> {
        self.source.check_integrity().await?;
        info!("Source {} passed integrity check", self.source.db_type());
        self.target.ping().await?;
        info!("Destination {} is reachable", self.target.db_type());
        Ok(())
    }

    /// Run the migration.
    pub async fn run(&mut self, mode: RunMode) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting migration run {} ({:?})", run_id, mode);

        let outcome = match mode {
            RunMode::Live => self.run_live().await,
            RunMode::DryRun => self.run_dry().await,
        };

        let (tables, constraints_checked) = match outcome {
            Ok(done) => done,
            Err(e) => {
                self.fail().await;
                error!("Migration run {} failed: {}", run_id, e);
                return Err(e);
            }
        };
        self.transition(RunState::Done);

        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let rows_transferred: u64 = tables.iter().map(|t| t.rows_loaded).sum();
        let rows_per_second = if duration_seconds > 0.0 {
            (rows_transferred as f64 / duration_seconds) as i64
        } else {
            rows_transferred as i64
        };

        let result = MigrationResult {
            run_id,
            mode,
            status: match mode {
                RunMode::Live => "completed".to_string(),
                RunMode::DryRun => "dry_run".to_string(),
            },
            started_at,
            completed_at,
            duration_seconds,
            tables_total: tables.len(),
            rows_transferred,
            rows_per_second,
            replaced_json_cells: tables.iter().map(|t| t.replaced_json_cells).sum(),
            constraints_checked,
            tables,
        };

        info!(
            "Migration run {} finished: {} tables, {} rows in {:.2}s",
            result.run_id, result.tables_total, result.rows_transferred, result.duration_seconds
        );
        Ok(result)
    }

    async fn preflight(&mut self) -> Result<Vec<String>> {
        self.transition(RunState::Validating);
        self.health_check().await?;
        let tables = self.source.list_tables().await?;
        info!("Found {} tables to migrate", tables.len());
        Ok(tables)
    }

    async fn run_live(&mut self) -> Result<(Vec<TableResult>, usize)> {
        let tables = self.preflight().await?;

        let coordinator = ConstraintCoordinator::new(self.target.clone());
        coordinator.relax().await?;
        self.transition(RunState::ConstraintsRelaxed);

        let engine = TransferEngine::new(
            self.source.clone(),
            self.target.clone(),
            self.config.target.schema.clone(),
            self.config.migration.batch_size,
        );

        let mut results = Vec::with_capacity(tables.len());
        for table in tables {
            self.transition(RunState::Migrating(table.clone()));

            let schema = self
                .source
                .get_schema(&table)
                .await
                .map_err(|e| e.for_table(&table))?;
            let dest_types = self
                .target
                .column_types(&self.config.target.schema, &table)
                .await
                .map_err(|e| e.for_table(&table))?;
            if dest_types.is_empty() {
                return Err(MigrateError::DestinationTableMissing { table });
            }

            let stats = engine.load(&schema, &dest_types).await?;
            results.push(TableResult {
                name: table,
                source_rows: stats.rows_read,
                rows_loaded: stats.rows_loaded,
                replaced_json_cells: stats.replaced_json,
                target_exists: true,
                duration_seconds: stats.duration.as_secs_f64(),
            });
        }

        coordinator.restore().await?;
        self.transition(RunState::ConstraintsRestored);

        let report = coordinator.validate().await?;
        self.transition(RunState::Validated);

        Ok((results, report.checked))
    }

    async fn run_dry(&mut self) -> Result<(Vec<TableResult>, usize)> {
        let tables = self.preflight().await?;
        self.target.set_session(SessionSetting::ReadOnly).await?;
        info!("Dry run: destination session is read-only, nothing will be written");

        let mut results = Vec::with_capacity(tables.len());
        for table in tables {
            let source_rows = self.source.get_row_count(&table).await?;
            let target_exists = !self
                .target
                .column_types(&self.config.target.schema, &table)
                .await?
                .is_empty();

            if target_exists {
                info!("[dry run] {}: {} rows", table, source_rows);
            } else {
                warn!(
                    "[dry run] {}: {} rows, no matching destination table",
                    table, source_rows
                );
            }

            results.push(TableResult {
                name: table,
                source_rows: source_rows.max(0) as u64,
                rows_loaded: 0,
                replaced_json_cells: 0,
                target_exists,
                duration_seconds: 0.0,
            });
        }

        Ok((results, 0))
    }

    /// Put the destination session back to normal enforcement if the run
    /// stopped while it was relaxed.
    async fn fail(&mut self) {
        if matches!(
            self.state,
            RunState::ConstraintsRelaxed | RunState::Migrating(_)
        ) {
            let coordinator = ConstraintCoordinator::new(self.target.clone());
            if let Err(e) = coordinator.restore().await {
                warn!("Could not restore session replication role: {}", e);
            }
        }
        self.transition(RunState::Failed);
    }

    /// Compare row counts between source and destination.
    pub async fn verify_counts(&self) -> Result<Vec<CountCheck>> {
        let schema = &self.config.target.schema;
        let mut checks = Vec::new();

        for table in self.source.list_tables().await? {
            let source_rows = self.source.get_row_count(&table).await?;
            let target_rows = match self.target.get_row_count(schema, &table).await {
                Ok(count) => Some(count),
                Err(e) => {
                    warn!("{}: could not count destination rows: {}", table, e);
                    None
                }
            };
            let matches = target_rows == Some(source_rows);

            if matches {
                info!("{}: {} rows (match)", table, source_rows);
            } else {
                warn!(
                    "{}: source={} target={} (MISMATCH)",
                    table,
                    source_rows,
                    target_rows.map_or_else(|| "?".to_string(), |c| c.to_string())
                );
            }

            checks.push(CountCheck {
                table,
                source_rows,
                target_rows,
                matches,
            });
        }

        Ok(checks)
    }
}
