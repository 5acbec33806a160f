//! Comment relay worker.
//!
//! This binary relocates frame-pinned review comments from one cut of a
//! video to another: it runs one job by id, or every pending job in the
//! job store, and records each job's outcome on its record.

use anyhow::{Context, Result};
use clap::Parser;
use comment_transfer::{HttpAssetClient, Session};
use frame_matcher::{FfmpegDecoder, FrameExtractor, FrameMatcher};
use shared::{ApiCredentials, Config, Database, JobStore, SqliteJobStore};
use std::path::PathBuf;
use tracing::{error, info, warn};

mod orchestrator;

use orchestrator::JobOrchestrator;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run only this job (default: every pending job)
    #[arg(short, long)]
    job_id: Option<i64>,

    /// Match and record, but create no comments
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Initialize logging
    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        shared::logging::parse_level(&config.logging.default_level)
    };

    shared::logging::init(shared::LogConfig {
        log_dir: config.log_dir().to_string_lossy().to_string(),
        component: "relay-worker".to_string(),
        default_level: log_level,
        console: config.logging.console,
        file: config.logging.file,
        json_format: config.logging.json_format,
    })?;

    info!("Comment relay worker starting");
    info!(config_file = %args.config.display(), "Loaded configuration");
    info!(
        ffmpeg = %config.decoder.ffmpeg_path,
        decimation = config.extraction.decimation_factor,
        concurrency = config.extraction.concurrency,
        batch_size = config.transfer.batch_size,
        batch_delay_secs = config.batch_delay().as_secs(),
        dry_run = args.dry_run,
        "Runtime configuration"
    );

    // Initialize database
    let db_path = config.database_path();
    info!(db_path = %db_path.display(), "Opening database");
    let database = Database::open(&db_path).context("Failed to open database")?;
    let store = SqliteJobStore::new(database);

    let credentials = ApiCredentials::from_env().context("Missing API credentials")?;
    let mut session = Session::from_credentials(&credentials);
    let client = HttpAssetClient::new(&config.api).context("Failed to create API client")?;

    let extractor = FrameExtractor::new(
        FfmpegDecoder::new(&config.decoder),
        config.extraction.clone(),
    );
    let matcher = FrameMatcher::new(config.matching.clone());
    let mut orchestrator =
        JobOrchestrator::new(store, client, extractor, matcher, config.transfer.clone())
            .with_dry_run(args.dry_run);

    let job_ids: Vec<i64> = match args.job_id {
        Some(id) => vec![id],
        None => orchestrator
            .store_mut()
            .pending()
            .context("Failed to list pending jobs")?
            .into_iter()
            .map(|job| job.id)
            .collect(),
    };

    if job_ids.is_empty() {
        info!("No jobs to process, exiting");
        return Ok(());
    }
    info!(jobs = job_ids.len(), "Processing jobs");

    let mut succeeded = 0usize;
    // The orchestrator renews the session in place; each job starts with the latest one
    for job_id in job_ids {
        match orchestrator.run(job_id, &mut session).await {
            Ok(result) => {
                succeeded += 1;
                info!(
                    job_id,
                    transferred = result.transferred,
                    skipped = result.skipped,
                    failed = result.failed,
                    "Job finished"
                );
            }
            Err(e) if e.is_auth() => {
                error!(job_id, error = %e, "Credentials rejected; re-authenticate and re-trigger");
                break;
            }
            Err(e) => warn!(job_id, error = %e, "Job did not complete"),
        }
    }

    info!(succeeded, "Comment relay worker finished");
    Ok(())
}
