//! Report engine
//!
//! Runs one report request end to end.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        REPORT ENGINE                            │
//! │                                                                 │
//! │  ReportParams ──resolve──▶ ReportRequest                        │
//! │                                 │                               │
//! │         ┌───────────────────────┼───────────────────────┐       │
//! │         ▼                       ▼                       ▼       │
//! │  ┌─────────────┐         ┌─────────────┐         ┌─────────────┐│
//! │  │ fetch       │         │ fetch       │         │ fetch       ││
//! │  │ scene_usage │         │ trade       │   ...   │ credits     ││
//! │  └──────┬──────┘         └──────┬──────┘         └──────┬──────┘│
//! │         └────────── join (all or nothing) ──────────────┘       │
//! │                                 │                               │
//! │        per metric: bucketize ▶ aggregate ▶ rank ▶ assemble      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Fetches run concurrently on a bounded pool. Cancellation and the fetch
//! deadline abort every outstanding fetch and fail the request; a partial
//! report is never produced.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use usagerank_core::analytics::{ReportEngine, ReportParams};
//!
//! let engine = ReportEngine::new(fetcher, config.analytics.clone());
//! let request = ReportParams {
//!     period_type: Some("weekly".into()),
//!     ..Default::default()
//! }
//! .resolve(engine.config(), today)?;
//! let reports = engine.generate(&request, &CancellationToken::new()).await?;
//! ```

use super::aggregate::{
    aggregate_by, distribution, tag_cohorts, GroupBy, GroupSample, ValuePolicy,
};
use super::catalog::display_name;
use super::period::{parse_date_range, Granularity, TimeRange, Timeline};
use super::rank::{rank, RankMetric};
use super::report::{assemble, dedup_cohorts, CohortSummary, Report, ReportMeta};
use super::trend::{apply_growth, group_value, CohortTrend, TrendPoint};
use crate::config::AnalyticsConfig;
use crate::error::{Error, Result};
use crate::fetch::{FetchFilter, RecordFetcher};
use crate::types::{RawRecord, RecordSource};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

// ============================================
// Request parameters
// ============================================

/// Raw caller input, as it arrives from a CLI flag set or query string.
#[derive(Debug, Clone, Default)]
pub struct ReportParams {
    /// `daily`, `weekly` or `monthly`; defaults to daily
    pub period_type: Option<String>,
    /// `YYYY-MM-DD`
    pub start_date: Option<String>,
    /// `YYYY-MM-DD`, inclusive
    pub end_date: Option<String>,
    /// Record sources to report on; defaults to scene usage
    pub metrics: Vec<String>,
    /// Cohorts to report, in output order; defaults to the configured set
    pub cohorts: Vec<String>,
    /// `count`, `sum` or `avg`; defaults to count
    pub rank_by: Option<String>,
    /// `entity` or `actor`; defaults to entity
    pub group_by: Option<String>,
    /// Top-N per group
    pub limit: Option<i64>,
}

/// Validated request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    pub period_type: Granularity,
    pub range: TimeRange,
    pub metrics: Vec<RecordSource>,
    pub cohorts: Vec<String>,
    pub rank_by: RankMetric,
    pub group_by: GroupBy,
    pub limit: usize,
}

impl ReportParams {
    /// Parse, default and validate. `today` is the civil date in the
    /// configured zone.
    pub fn resolve(&self, config: &AnalyticsConfig, today: NaiveDate) -> Result<ReportRequest> {
        let period_type = match self.period_type.as_deref() {
            Some(s) => s.parse()?,
            None => Granularity::Daily,
        };

        let range = parse_date_range(
            self.start_date.as_deref(),
            self.end_date.as_deref(),
            config.zone()?,
            config.default_window_days,
            config.max_span_days,
            today,
        )?;

        let mut metrics = Vec::new();
        for name in &self.metrics {
            let source: RecordSource = name.parse().map_err(Error::InvalidArgument)?;
            if !metrics.contains(&source) {
                metrics.push(source);
            }
        }
        if metrics.is_empty() {
            metrics.push(RecordSource::SceneUsage);
        }

        let cohorts = if self.cohorts.is_empty() {
            dedup_cohorts(config.default_cohorts.as_slice())
        } else {
            dedup_cohorts(self.cohorts.as_slice())
        };
        if cohorts.is_empty() || cohorts.iter().any(|c| c.trim().is_empty()) {
            return Err(Error::invalid("cohort names must not be empty"));
        }

        let rank_by = match self.rank_by.as_deref() {
            Some(s) => s.parse()?,
            None => RankMetric::Count,
        };

        let group_by = match self.group_by.as_deref() {
            Some(s) => s.parse()?,
            None => GroupBy::Entity,
        };

        let limit = match self.limit {
            Some(n) if n <= 0 => return Err(Error::invalid("limit must be positive")),
            Some(n) => usize::try_from(n).map_err(|_| Error::invalid("limit is too large"))?,
            None => config.default_limit,
        };

        Ok(ReportRequest {
            period_type,
            range,
            metrics,
            cohorts,
            rank_by,
            group_by,
            limit,
        })
    }
}

// ============================================
// Engine
// ============================================

/// Runs report requests against a [`RecordFetcher`].
pub struct ReportEngine {
    fetcher: Arc<dyn RecordFetcher>,
    config: AnalyticsConfig,
}

impl ReportEngine {
    pub fn new(fetcher: Arc<dyn RecordFetcher>, config: AnalyticsConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// One report per requested metric, in request order.
    ///
    /// Fails as a whole when any fetch fails, the token is cancelled or the
    /// fetch deadline passes.
    pub async fn generate(
        &self,
        request: &ReportRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<Report>> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "report",
            request_id = %request_id,
            period_type = %request.period_type,
            start = %request.range.start_date(),
            end = %request.range.end_date(),
        );

        async {
            tracing::info!(
                metrics = ?request.metrics,
                cohorts = ?request.cohorts,
                rank_by = %request.rank_by,
                group_by = %request.group_by,
                limit = request.limit,
                "Generating report"
            );

            let fetched = match self.fetch_all(request, cancel).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    if e.is_client_error() {
                        tracing::warn!(error = %e, "Report aborted");
                    } else {
                        tracing::error!(error = %e, "Report failed");
                    }
                    return Err(e);
                }
            };

            let mut reports = Vec::with_capacity(fetched.len());
            for (source, records) in fetched {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let report = self.build_report(request, source, &records).map_err(|e| {
                    tracing::error!(metric = %source, error = %e, "Report assembly failed");
                    e
                })?;
                reports.push(report);
            }

            tracing::info!(reports = reports.len(), "Report complete");
            Ok::<_, Error>(reports)
        }
        .instrument(span)
        .await
    }

    /// Fan out one fetch per metric and join them, all or nothing.
    async fn fetch_all(
        &self,
        request: &ReportRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<(RecordSource, Vec<RawRecord>)>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.fetch_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (slot, source) in request.metrics.iter().copied().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let semaphore = Arc::clone(&semaphore);
            let filter = FetchFilter::new(source, request.range);

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Internal(format!("fetch pool closed: {}", e)))?;

                tracing::debug!(filter = %filter, "Fetching records");
                let records = fetcher.fetch(&filter).await.map_err(|e| {
                    tracing::error!(filter = %filter, error = %e, "Record fetch failed");
                    Error::UpstreamFetch {
                        metric: source.to_string(),
                        message: e.to_string(),
                    }
                })?;
                tracing::debug!(filter = %filter, records = records.len(), "Fetched records");
                Ok::<_, Error>((slot, records))
            });
        }

        let timeout_ms = self.config.fetch_timeout_ms;
        let deadline = tokio::time::sleep(Duration::from_millis(timeout_ms));
        tokio::pin!(deadline);

        let mut fetched: Vec<Option<Vec<RawRecord>>> = vec![None; request.metrics.len()];

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(Error::Cancelled);
                }
                _ = &mut deadline => {
                    tasks.abort_all();
                    return Err(Error::DeadlineExceeded(timeout_ms));
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok(Ok((slot, records)))) => fetched[slot] = Some(records),
                    Some(Ok(Err(e))) => {
                        tasks.abort_all();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        tasks.abort_all();
                        return Err(Error::Internal(format!("fetch task failed: {}", e)));
                    }
                    None => break,
                },
            }
        }

        request
            .metrics
            .iter()
            .copied()
            .zip(fetched)
            .map(|(source, records)| {
                records
                    .map(|r| (source, r))
                    .ok_or_else(|| Error::Internal(format!("no result for {}", source)))
            })
            .collect()
    }

    /// Bucketize, aggregate, rank and assemble one metric's records.
    pub fn build_report(
        &self,
        request: &ReportRequest,
        source: RecordSource,
        records: &[RawRecord],
    ) -> Result<Report> {
        let timeline = Timeline::new(&request.range, request.period_type)?;
        let mut agg = aggregate_by(
            records,
            &timeline,
            tag_cohorts,
            ValuePolicy::for_source(source),
            request.group_by,
        );

        if agg.unattributed_records > 0 {
            tracing::info!(
                metric = %source,
                unattributed = agg.unattributed_records,
                "Records without an actor were left out of the actor ranking"
            );
        }

        if source == RecordSource::SceneUsage && request.group_by == GroupBy::Entity {
            for result in &mut agg.results {
                result.entity_name = Some(display_name(
                    &result.entity_id,
                    result.entity_name.as_deref(),
                ));
            }
        }

        if agg.skipped_records > 0 {
            tracing::warn!(
                metric = %source,
                skipped = agg.skipped_records,
                "Records without usable values were skipped"
            );
        }

        let mut rankings = BTreeMap::new();
        let mut summaries = BTreeMap::new();
        let mut points: Vec<Vec<TrendPoint>> = vec![Vec::new(); request.cohorts.len()];

        for (idx, bucket) in timeline.buckets().iter().enumerate() {
            for (slot, cohort) in request.cohorts.iter().enumerate() {
                let group = agg.group_results(idx, cohort);
                let mut items = rank(group, request.rank_by, request.limit)?;
                let previous = idx.checked_sub(1).map(|p| agg.group_results(p, cohort));
                apply_growth(&mut items, previous, request.rank_by);
                rankings.insert((idx, cohort.clone()), items);

                let sample = agg.group(idx, cohort);
                summaries.insert(
                    (idx, cohort.clone()),
                    summarize(sample, &self.config.distribution_breakpoints)?,
                );
                points[slot].push(TrendPoint {
                    period: bucket.label.clone(),
                    value: group_value(sample, request.rank_by),
                    record_count: sample.map_or(0, |s| s.record_count),
                    user_count: sample.map_or(0, |s| s.user_count),
                });
            }
        }

        let trends = request
            .cohorts
            .iter()
            .zip(points)
            .map(|(cohort, points)| CohortTrend::from_points(cohort.clone(), points))
            .collect();

        let meta = ReportMeta {
            metric: source,
            rank_by: request.rank_by,
            group_by: request.group_by,
            period_type: request.period_type,
            start_date: request.range.start_date(),
            end_date: request.range.end_date(),
            cohorts: request.cohorts.clone(),
            trends,
            skipped_records: agg.skipped_records,
        };
        assemble(meta, timeline.buckets(), rankings, summaries)
    }
}

/// Group statistics plus distribution for one `(bucket, cohort)`.
fn summarize(sample: Option<&GroupSample>, breakpoints: &[f64]) -> Result<CohortSummary> {
    let empty = GroupSample::default();
    let sample = sample.unwrap_or(&empty);
    Ok(CohortSummary {
        record_count: sample.record_count,
        total: sample.total,
        average: if sample.record_count > 0 {
            sample.total / sample.record_count as f64
        } else {
            0.0
        },
        entity_count: sample.entity_count,
        user_count: sample.user_count,
        distribution: distribution(&sample.values, breakpoints)?,
    })
}
