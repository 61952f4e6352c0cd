//! Report assembly
//!
//! Composes already-ranked buckets into the final [`Report`]. Nothing is
//! recomputed here: the assembler only orders, fills gaps and validates
//! shape so every bucket carries an entry for every requested cohort.

use super::aggregate::{DistributionStats, GroupBy};
use super::period::{Granularity, PeriodBucket};
use super::rank::{RankMetric, RankingItem};
use super::trend::CohortTrend;
use crate::error::{Error, Result};
use crate::types::RecordSource;
use chrono::NaiveDate;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;

/// Ordered `cohort -> value` map. Serializes as a JSON object whose keys
/// keep the caller's cohort order.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortMap<T>(Vec<(String, T)>);

impl<T> CohortMap<T> {
    pub fn get(&self, cohort: &str) -> Option<&T> {
        self.0.iter().find(|(c, _)| c == cohort).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Serialize> Serialize for CohortMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (cohort, value) in &self.0 {
            map.serialize_entry(cohort, value)?;
        }
        map.end()
    }
}

/// Group-level statistics for one `(bucket, cohort)`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct CohortSummary {
    pub record_count: i64,
    pub total: f64,
    pub average: f64,
    pub entity_count: i64,
    pub user_count: i64,
    pub distribution: DistributionStats,
}

/// One period of the report.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ReportBucket {
    pub period: PeriodBucket,
    pub cohort_rankings: CohortMap<Vec<RankingItem>>,
    pub cohort_summaries: CohortMap<CohortSummary>,
}

/// Everything about a report that is not per-bucket.
#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub metric: RecordSource,
    pub rank_by: RankMetric,
    pub group_by: GroupBy,
    pub period_type: Granularity,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub cohorts: Vec<String>,
    pub trends: Vec<CohortTrend>,
    pub skipped_records: usize,
}

/// Final, immutable result of one request for one metric.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Report {
    pub metric: RecordSource,
    pub rank_by: RankMetric,
    /// Whether `entity_id` in the rankings names entities or actors
    pub group_by: GroupBy,
    pub period_type: Granularity,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub cohorts: Vec<String>,
    pub buckets: Vec<ReportBucket>,
    pub trends: Vec<CohortTrend>,
    pub skipped_records: usize,
}

impl Report {
    /// Rankings for `cohort` in the bucket labelled `label`.
    pub fn rankings(&self, label: &str, cohort: &str) -> Option<&[RankingItem]> {
        self.buckets
            .iter()
            .find(|b| b.period.label == label)
            .and_then(|b| b.cohort_rankings.get(cohort))
            .map(Vec::as_slice)
    }

    pub fn trend(&self, cohort: &str) -> Option<&CohortTrend> {
        self.trends.iter().find(|t| t.cohort == cohort)
    }
}

/// Cohorts in first-seen order without duplicates.
pub fn dedup_cohorts<S: AsRef<str>>(cohorts: &[S]) -> Vec<String> {
    let mut seen = Vec::<String>::new();
    for cohort in cohorts {
        let cohort = cohort.as_ref();
        if !seen.iter().any(|c| c == cohort) {
            seen.push(cohort.to_string());
        }
    }
    seen
}

/// Compose ranked buckets into a [`Report`].
///
/// `rankings` and `summaries` are keyed by `(bucket index, cohort)`. Missing
/// keys become empty entries; keys naming an unknown bucket or cohort are an
/// error.
pub fn assemble(
    meta: ReportMeta,
    buckets: &[PeriodBucket],
    mut rankings: BTreeMap<(usize, String), Vec<RankingItem>>,
    mut summaries: BTreeMap<(usize, String), CohortSummary>,
) -> Result<Report> {
    let cohorts = dedup_cohorts(meta.cohorts.as_slice());
    if cohorts.is_empty() {
        return Err(Error::invalid("at least one cohort is required"));
    }

    let stray = rankings
        .keys()
        .chain(summaries.keys())
        .find(|(idx, cohort)| *idx >= buckets.len() || !cohorts.contains(cohort));
    if let Some((idx, cohort)) = stray {
        return Err(Error::Internal(format!(
            "ranking for bucket {} cohort {:?} does not belong to this report",
            idx, cohort
        )));
    }

    let report_buckets = buckets
        .iter()
        .enumerate()
        .map(|(idx, period)| {
            let cohort_rankings = cohorts
                .iter()
                .map(|c| {
                    let items = rankings.remove(&(idx, c.clone())).unwrap_or_default();
                    (c.clone(), items)
                })
                .collect();
            let cohort_summaries = cohorts
                .iter()
                .map(|c| {
                    let summary = summaries.remove(&(idx, c.clone())).unwrap_or_default();
                    (c.clone(), summary)
                })
                .collect();
            ReportBucket {
                period: period.clone(),
                cohort_rankings: CohortMap(cohort_rankings),
                cohort_summaries: CohortMap(cohort_summaries),
            }
        })
        .collect();

    let mut trends = meta.trends;
    let trends = cohorts
        .iter()
        .map(|c| match trends.iter().position(|t| &t.cohort == c) {
            Some(pos) => trends.swap_remove(pos),
            None => CohortTrend::from_points(c.clone(), Vec::new()),
        })
        .collect();

    Ok(Report {
        metric: meta.metric,
        rank_by: meta.rank_by,
        group_by: meta.group_by,
        period_type: meta.period_type,
        start_date: meta.start_date,
        end_date: meta.end_date,
        cohorts,
        buckets: report_buckets,
        trends,
        skipped_records: meta.skipped_records,
    })
}
