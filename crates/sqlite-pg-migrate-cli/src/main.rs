//! sqlite-pg-migrate CLI - one-shot SQLite to PostgreSQL migration.

use clap::{Parser, Subcommand};
use sqlite_pg_migrate::{Config, MigrateError, Orchestrator, RunMode};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Conventional exit status after an interrupt.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "sqlite-pg-migrate")]
#[command(about = "One-shot SQLite to PostgreSQL data migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file (default: read SQLITE_DB_PATH,
    /// MIGRATE_DATABASE_URL and BATCH_SIZE from the environment)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy every table from SQLite into PostgreSQL
    Run {
        /// Dry run: check both databases and report row counts without writing
        #[arg(long)]
        dry_run: bool,

        /// Override rows fetched per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Read from a private copy of the SQLite file (and its -wal/-shm)
        #[arg(long)]
        snapshot: bool,
    },

    /// Validate row counts between source and target
    Validate,

    /// Test database connections and source integrity
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    tokio::select! {
        outcome = run() => match outcome {
            Ok(code) => code,
            Err(e) => {
                eprintln!("{}", e.format_detailed());
                ExitCode::from(e.exit_code())
            }
        },
        name = shutdown_signal() => {
            // Dropping the run closes the destination session, which rolls
            // back the open table transaction.
            eprintln!("\nReceived {}. Aborting; the table in progress was rolled back.", name);
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::from_env()?,
    };

    match cli.command {
        Commands::Run {
            dry_run,
            batch_size,
            snapshot,
        } => {
            if let Some(size) = batch_size {
                config.migration.batch_size = size;
            }
            if snapshot {
                config.source.snapshot = true;
            }

            let mode = if dry_run { RunMode::DryRun } else { RunMode::Live };
            let mut orchestrator = Orchestrator::connect(config).await?;
            let result = orchestrator.run(mode).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                let status_msg = if dry_run { "Dry run completed!" } else { "Migration completed!" };
                println!("\n{}", status_msg);
                println!("  Run ID: {}", result.run_id);
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!("  Tables: {}", result.tables_total);
                for table in &result.tables {
                    if dry_run {
                        println!(
                            "    {}: {} rows{}",
                            table.name,
                            table.source_rows,
                            if table.target_exists { "" } else { " (no destination table)" }
                        );
                    } else {
                        println!("    {}: {} rows", table.name, table.rows_loaded);
                    }
                }
                if !dry_run {
                    println!("  Rows: {}", result.rows_transferred);
                    println!("  Throughput: {} rows/sec", result.rows_per_second);
                    println!("  Foreign keys checked: {}", result.constraints_checked);
                }
                if result.replaced_json_cells > 0 {
                    println!(
                        "  Invalid JSON values replaced with {{}}: {}",
                        result.replaced_json_cells
                    );
                }
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::connect(config).await?;
            let checks = orchestrator.verify_counts().await?;
            let all_match = checks.iter().all(|c| c.matches);

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&checks)?);
            } else {
                for check in &checks {
                    println!(
                        "  {} {}: source={} target={}",
                        if check.matches { "OK      " } else { "MISMATCH" },
                        check.table,
                        check.source_rows,
                        check
                            .target_rows
                            .map_or_else(|| "?".to_string(), |c| c.to_string())
                    );
                }
                println!(
                    "\nValidation {}",
                    if all_match { "completed successfully" } else { "found mismatches" }
                );
            }

            if !all_match {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::connect(config).await?;
            orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::json!({ "source": "ok", "target": "ok", "healthy": true }));
            } else {
                println!("Health Check Results:");
                println!("  Source (SQLite): OK");
                println!("  Target (PostgreSQL): OK");
                println!("\n  Overall: HEALTHY");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json stays parseable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Resolve when SIGINT or SIGTERM arrives.
#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => {
            ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    ctrl_c().await;
    "Ctrl-C"
}

async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
