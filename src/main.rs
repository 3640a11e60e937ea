//! # Indexer CLI (`indexer`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `indexer init` | Create the SQLite database and schema |
//! | `indexer run` | Run every configured job in full mode |
//! | `indexer run --incremental` | Only index what changed since the last run |
//! | `indexer status` | Show the run lock, last run and job progress |
//! | `indexer unlock` | Remove a run lock left behind by a crashed run |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use content_indexer::config::{self, Config};
use content_indexer::models::IndexingMode;
use content_indexer::report::format_timestamp;
use content_indexer::runner::{IndexerRunner, RunOutcome};
use content_indexer::status::{JobState, RunStatus};
use content_indexer::{db, migrate};

/// Indexes pages, records and files into a flat, faceted search index.
#[derive(Parser)]
#[command(name = "indexer", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/indexer.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Run all indexing jobs.
    Run {
        /// Index only what changed since the last completed run. Falls back
        /// to a full run when there is none.
        #[arg(long)]
        incremental: bool,

        /// Mark the run as started by automation; enables the report mail.
        #[arg(long)]
        scheduled: bool,
    },

    /// Show lock and last run.
    Status,

    /// Remove the run lock.
    Unlock,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Run {
            incremental,
            scheduled,
        } => {
            run(cfg, incremental, scheduled).await?;
        }
        Commands::Status => {
            status(&cfg).await?;
        }
        Commands::Unlock => {
            let pool = db::connect(&cfg).await?;
            migrate::create_schema(&pool).await?;
            if RunStatus::new(pool.clone()).release().await? {
                println!("Lock removed.");
            } else {
                println!("No lock was set.");
            }
            pool.close().await;
        }
    }

    Ok(())
}

async fn run(cfg: Config, incremental: bool, scheduled: bool) -> Result<()> {
    let pool = db::connect(&cfg).await?;
    migrate::create_schema(&pool).await?;

    let mode = if incremental {
        IndexingMode::Incremental
    } else {
        IndexingMode::Full
    };
    let outcome = IndexerRunner::new(cfg, pool.clone())
        .start_indexing(mode, scheduled)
        .await;
    pool.close().await;

    match outcome? {
        RunOutcome::AlreadyRunning(message) => {
            println!("{}", message);
        }
        RunOutcome::Finished(report) => {
            print!("{}", report.render_plaintext());
        }
    }
    Ok(())
}

async fn status(cfg: &Config) -> Result<()> {
    let pool = db::connect(cfg).await?;
    migrate::create_schema(&pool).await?;
    let status = RunStatus::new(pool.clone());

    match status.lock_time().await? {
        Some(since) => println!("Running since {}", format_timestamp(since)),
        None => println!("Not running"),
    }
    match status.last_run().await? {
        Some(run) => println!(
            "Last run:    {} - {} ({}s)",
            format_timestamp(run.start_time),
            format_timestamp(run.end_time),
            run.duration
        ),
        None => println!("Last run:    never"),
    }

    for job in &cfg.jobs {
        let state = status.job_status(job.uid).await?.map(|s| s.state);
        println!("  {:<30} {:<8} {}", job.title, job.job_type.as_str(), describe(state));
    }
    if let Some(cleanup) = status.cleanup_status().await? {
        println!("  {:<30} {:<8} {}", "Cleanup", "", describe(Some(cleanup.state)));
    }

    pool.close().await;
    Ok(())
}

fn describe(state: Option<JobState>) -> String {
    match state {
        Some(JobState::Scheduled) => "scheduled".to_string(),
        Some(JobState::Running { current, total }) => format!("running ({}/{})", current, total),
        Some(JobState::Finished) => "finished".to_string(),
        None => "idle".to_string(),
    }
}
