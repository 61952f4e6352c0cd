//! usagerank-import - load JSON-lines record exports into the database
//!
//! One file per record source. The source comes from `--source` or, when
//! omitted, from the file name (`trade.jsonl`, `scene_usage.jsonl`, ...).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use usagerank_core::import::{import_file, source_from_path};
use usagerank_core::{Config, Database, RecordSource};

#[derive(Parser)]
#[command(name = "usagerank-import")]
#[command(about = "Import JSON-lines record exports")]
#[command(version)]
struct Args {
    /// Files to import
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Record source of every file (default: taken from each file name)
    #[arg(long)]
    source: Option<RecordSource>,

    /// Database path (default: XDG data dir)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard = usagerank_core::logging::init(&config.logging).ok();

    tracing::info!("usagerank-import starting");

    // Resolve every source before touching the database
    let mut jobs = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let source = match args.source.or_else(|| source_from_path(path)) {
            Some(source) => source,
            None => anyhow::bail!(
                "cannot tell the record source of {}; name the file after a source or pass --source",
                path.display()
            ),
        };
        jobs.push((path, source));
    }

    let db_path = args.db.clone().unwrap_or_else(Config::database_path);
    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    println!("Database: {}", db_path.display());

    let mut inserted = 0;
    let mut skipped = 0;
    for (path, source) in jobs {
        let size = std::fs::metadata(path)
            .with_context(|| format!("cannot read {}", path.display()))?
            .len();

        let pb = if args.quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(size)
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .context("invalid progress template")?
                .progress_chars("#>-"),
        );
        pb.set_message(
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("...")
                .to_string(),
        );

        let run = import_file(&db, source, path, |bytes| pb.inc(bytes))
            .with_context(|| format!("import of {} failed", path.display()))?;
        pb.finish_and_clear();

        println!(
            "  {} ({}): {} records imported, {} lines skipped",
            path.display(),
            source,
            run.records_inserted,
            run.lines_skipped
        );
        inserted += run.records_inserted;
        skipped += run.lines_skipped;
    }

    println!();
    println!("Import complete:");
    println!("  Records inserted: {}", inserted);
    println!("  Lines skipped:    {}", skipped);

    tracing::info!(inserted, skipped, "usagerank-import complete");
    Ok(())
}
