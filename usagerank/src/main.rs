//! usagerank - time-windowed usage rankings
//!
//! Reads imported records from the local database, buckets them by day,
//! week or month, and prints per-cohort top-N rankings.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/usagerank/records.db (~/.local/share/usagerank/records.db)
//! - Logs: $XDG_STATE_HOME/usagerank/usagerank.log (~/.local/state/usagerank/usagerank.log)
//! - Config: $XDG_CONFIG_HOME/usagerank/config.toml (~/.config/usagerank/config.toml)

mod render;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use usagerank_core::analytics::period::today_in;
use usagerank_core::{
    Config, Database, Error, ErrorResponse, ReportEngine, ReportParams, SqliteRecordStore,
};

use crate::render::{render, Format};

#[derive(Parser, Debug)]
#[command(name = "usagerank")]
#[command(about = "Rank usage by day, week or month across user cohorts")]
#[command(version)]
struct Args {
    /// Bucket size: daily, weekly or monthly
    #[arg(long, default_value = "daily")]
    period: String,

    /// First day, YYYY-MM-DD (default: trailing window ending at --end)
    #[arg(long)]
    start: Option<String>,

    /// Last day, inclusive, YYYY-MM-DD (default: today)
    #[arg(long)]
    end: Option<String>,

    /// Record source to rank; repeat for several (scene_usage, commission, trade, credit_ledger)
    #[arg(long = "metric", value_name = "METRIC")]
    metrics: Vec<String>,

    /// Cohort to report; repeat for several, in output order
    #[arg(long = "cohort", value_name = "COHORT")]
    cohorts: Vec<String>,

    /// Ranking key: count, sum or avg
    #[arg(long)]
    rank_by: Option<String>,

    /// Rank entities or actors: entity or actor
    #[arg(long)]
    group_by: Option<String>,

    /// Entries per cohort and period
    #[arg(long, allow_negative_numbers = true)]
    limit: Option<i64>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: Format,

    /// Database path (default: XDG data dir)
    #[arg(long)]
    db: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let format = args.format;

    match run(args) {
        Ok(output) => {
            print!("{}", output);
            ExitCode::SUCCESS
        }
        Err(err) => report_error(&err, format),
    }
}

fn run(args: Args) -> Result<String> {
    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard = usagerank_core::logging::init(&config.logging).ok();

    tracing::info!("usagerank starting");

    let db_path = args.db.clone().unwrap_or_else(Config::database_path);
    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let engine = ReportEngine::new(
        Arc::new(SqliteRecordStore::new(Arc::new(db))),
        config.analytics.clone(),
    );

    let params = ReportParams {
        period_type: Some(args.period),
        start_date: args.start,
        end_date: args.end,
        metrics: args.metrics,
        cohorts: args.cohorts,
        rank_by: args.rank_by,
        group_by: args.group_by,
        limit: args.limit,
    };
    let today = today_in(config.analytics.zone()?);
    let request = params.resolve(engine.config(), today)?;

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling...");
        handler_token.cancel();
    })
    .context("failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let reports = runtime.block_on(engine.generate(&request, &cancel))?;

    render(&reports, args.format)
}

/// Print `err` in the requested format and pick the exit code.
fn report_error(err: &anyhow::Error, format: Format) -> ExitCode {
    let core = err.downcast_ref::<Error>();

    if format == Format::Json {
        let response = core.map(ErrorResponse::from).unwrap_or_else(|| ErrorResponse {
            code: 500,
            message: "internal server error".to_string(),
        });
        match serde_json::to_string_pretty(&response) {
            Ok(json) => println!("{}", json),
            Err(_) => eprintln!("Error: {:#}", err),
        }
    } else {
        eprintln!("Error: {:#}", err);
        if !core.is_some_and(Error::is_client_error) {
            eprintln!(
                "See {} for details",
                usagerank_core::logging::log_file_path().display()
            );
        }
    }

    match core {
        Some(Error::Cancelled) => ExitCode::from(130),
        Some(e) if e.is_client_error() => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}
