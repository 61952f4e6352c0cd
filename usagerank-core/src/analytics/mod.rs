//! Time-windowed usage analytics
//!
//! The pipeline, leaf first:
//! - [`period`]: split a date range into daily/weekly/monthly buckets
//! - [`aggregate`]: per-bucket, per-cohort counts, sums, averages and distributions
//! - [`rank`]: order entities or actors within a group with a deterministic tie-break
//! - [`trend`]: growth against the previous bucket and per-cohort trend summaries
//! - [`report`]: compose everything into an ordered [`Report`]
//!
//! [`engine`] drives the pipeline for one request, including the concurrent
//! record fetches.

pub mod aggregate;
pub mod catalog;
pub mod engine;
pub mod period;
pub mod rank;
pub mod report;
pub mod trend;

pub use aggregate::{
    aggregate, aggregate_by, distribution, AggregateResult, Aggregation, DistributionStats,
    GroupBy, PercentileBucket, ValuePolicy,
};
pub use engine::{ReportEngine, ReportParams, ReportRequest};
pub use period::{bucketize, parse_date_range, Granularity, PeriodBucket, TimeRange, Timeline};
pub use rank::{rank, RankMetric, RankingItem};
pub use report::{assemble, CohortMap, CohortSummary, Report, ReportBucket, ReportMeta};
pub use trend::{CohortTrend, TrendPoint};
