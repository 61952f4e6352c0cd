//! # usagerank-core
//!
//! Core library for usagerank - time-windowed usage analytics and ranking.
//!
//! This library provides:
//! - Period bucketing in a fixed civil timezone
//! - Per-cohort aggregation, distribution statistics and deterministic ranking
//! - Report assembly with trend comparisons
//! - A record-fetcher port plus a SQLite-backed record store and JSON-lines importer
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! A report request flows through four stages:
//! - **Fetch:** one concurrent [`RecordFetcher`] call per metric, joined all-or-nothing
//! - **Bucket:** the date range becomes daily, weekly or monthly [`PeriodBucket`]s
//! - **Aggregate + rank:** per bucket and cohort, entities are summed and ranked
//! - **Assemble:** an immutable [`Report`] with every bucket and cohort present
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use usagerank_core::{Config, Database, ReportEngine, ReportParams, SqliteRecordStore};
//! use usagerank_core::analytics::period::today_in;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> usagerank_core::Result<()> {
//! let config = Config::load()?;
//! let db = Database::open(&Config::database_path())?;
//! db.migrate()?;
//!
//! let engine = ReportEngine::new(
//!     Arc::new(SqliteRecordStore::new(Arc::new(db))),
//!     config.analytics.clone(),
//! );
//! let today = today_in(config.analytics.zone()?);
//! let request = ReportParams::default().resolve(engine.config(), today)?;
//! let _reports = engine.generate(&request, &CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use analytics::{
    Granularity, GroupBy, PeriodBucket, RankMetric, RankingItem, Report, ReportEngine,
    ReportParams, ReportRequest, TimeRange,
};
pub use config::Config;
pub use db::{Database, SqliteRecordStore};
pub use error::{Error, ErrorResponse, Result};
pub use fetch::{FetchFilter, InMemoryFetcher, RecordFetcher};
pub use types::*;

// Public modules
pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod import;
pub mod logging;
pub mod types;
