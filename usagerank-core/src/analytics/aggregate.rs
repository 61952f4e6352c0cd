//! Per-bucket, per-cohort aggregation
//!
//! A single pass over the fetched records builds one accumulator per
//! `(bucket, cohort, entity)` and one value sample per `(bucket, cohort)`.
//! Every record lands in the implicit [`ALL_COHORT`] and in each cohort
//! returned by the selector, so cohorts overlap.
//!
//! The ranked key is the record's entity by default. With [`GroupBy::Actor`]
//! the actor takes its place and each result carries a per-entity breakdown.

use super::period::{PeriodBucket, Timeline};
use crate::error::{Error, Result};
use crate::types::{RawRecord, RecordSource, ALL_COHORT};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// How a record's `metric_value` feeds sums and samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuePolicy {
    /// Use the value as stored
    Raw,
    /// Use the absolute value (signed ledgers)
    Magnitude,
}

impl ValuePolicy {
    pub fn for_source(source: RecordSource) -> Self {
        if source.is_signed() {
            ValuePolicy::Magnitude
        } else {
            ValuePolicy::Raw
        }
    }

    /// The usable value of a record, or `None` when it is missing or not finite.
    pub fn value_of(&self, record: &RawRecord) -> Option<f64> {
        let value = record.metric_value.filter(|v| v.is_finite())?;
        Some(match self {
            ValuePolicy::Raw => value,
            ValuePolicy::Magnitude => value.abs(),
        })
    }
}

/// What a ranking is keyed by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// One result per entity (scene, product, ledger type)
    #[default]
    Entity,
    /// One result per actor, with per-entity counts
    Actor,
}

impl GroupBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupBy::Entity => "entity",
            GroupBy::Actor => "actor",
        }
    }
}

impl std::fmt::Display for GroupBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GroupBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "entity" | "scene" => Ok(GroupBy::Entity),
            "actor" | "user" => Ok(GroupBy::Actor),
            _ => Err(Error::invalid(format!(
                "invalid group key {:?}, must be entity or actor",
                s
            ))),
        }
    }
}

/// Aggregate for one ranked key inside one bucket and cohort.
///
/// `entity_id` holds the actor id when grouping by actor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub bucket: PeriodBucket,
    /// Position of `bucket` in its timeline
    #[serde(skip)]
    pub bucket_index: usize,
    pub cohort: String,
    pub entity_id: String,
    pub entity_name: Option<String>,
    pub count: i64,
    pub sum: f64,
    pub avg: f64,
    /// Distinct actors that produced records for this entity
    pub user_count: i64,
    /// Records per entity id; only filled when grouping by actor
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub breakdown: BTreeMap<String, i64>,
}

/// Everything a `(bucket, cohort)` group saw, regardless of entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupSample {
    pub record_count: i64,
    pub total: f64,
    pub entity_count: i64,
    pub user_count: i64,
    /// Values in arrival order; sorted only when a distribution is computed
    pub values: Vec<f64>,
}

/// Output of [`aggregate`].
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    /// Sorted by bucket index, then cohort, then entity id
    pub results: Vec<AggregateResult>,
    pub groups: BTreeMap<(usize, String), GroupSample>,
    /// Records dropped because their value was missing or not finite
    pub skipped_records: usize,
    /// Records that fell outside every bucket
    pub unplaced_records: usize,
    /// Records with no actor while grouping by actor; they still count in
    /// the group sample
    pub unattributed_records: usize,
}

impl Aggregation {
    /// Results for one `(bucket, cohort)` group, in entity id order.
    pub fn group_results(&self, bucket_index: usize, cohort: &str) -> &[AggregateResult] {
        let start = self
            .results
            .partition_point(|r| (r.bucket_index, r.cohort.as_str()) < (bucket_index, cohort));
        let len = self.results[start..]
            .partition_point(|r| r.bucket_index == bucket_index && r.cohort == cohort);
        &self.results[start..start + len]
    }

    pub fn group(&self, bucket_index: usize, cohort: &str) -> Option<&GroupSample> {
        self.groups.get(&(bucket_index, cohort.to_string()))
    }
}

#[derive(Default)]
struct Accumulator {
    count: i64,
    sum: f64,
    actors: BTreeSet<String>,
    entity_name: Option<String>,
    breakdown: BTreeMap<String, i64>,
}

#[derive(Default)]
struct GroupAccumulator {
    record_count: i64,
    total: f64,
    entities: BTreeSet<String>,
    actors: BTreeSet<String>,
    values: Vec<f64>,
}

/// Cohort selector that uses the record's own tags.
pub fn tag_cohorts(record: &RawRecord) -> BTreeSet<String> {
    record.cohort_tags.clone()
}

/// Aggregate `records` into the buckets of `timeline`, one result per entity.
///
/// Records without a usable value are skipped and counted, never fatal.
pub fn aggregate<F>(
    records: &[RawRecord],
    timeline: &Timeline,
    cohort_selector: F,
    policy: ValuePolicy,
) -> Aggregation
where
    F: Fn(&RawRecord) -> BTreeSet<String>,
{
    aggregate_by(records, timeline, cohort_selector, policy, GroupBy::Entity)
}

/// Like [`aggregate`], keyed by `group_by`.
pub fn aggregate_by<F>(
    records: &[RawRecord],
    timeline: &Timeline,
    cohort_selector: F,
    policy: ValuePolicy,
    group_by: GroupBy,
) -> Aggregation
where
    F: Fn(&RawRecord) -> BTreeSet<String>,
{
    let mut entities: BTreeMap<(usize, String, String), Accumulator> = BTreeMap::new();
    let mut groups: BTreeMap<(usize, String), GroupAccumulator> = BTreeMap::new();
    let mut skipped_records = 0;
    let mut unplaced_records = 0;
    let mut unattributed_records = 0;

    for record in records {
        let Some(bucket_index) = timeline.locate(record.occurred_at) else {
            unplaced_records += 1;
            continue;
        };
        let Some(value) = policy.value_of(record) else {
            tracing::warn!(
                entity_id = %record.entity_id,
                occurred_at = %record.occurred_at,
                "Skipping record without a usable metric value"
            );
            skipped_records += 1;
            continue;
        };

        let key = match group_by {
            GroupBy::Entity => Some(&record.entity_id),
            GroupBy::Actor => record.actor_id.as_ref(),
        };
        if key.is_none() {
            tracing::debug!(
                entity_id = %record.entity_id,
                occurred_at = %record.occurred_at,
                "Record has no actor, left out of the actor ranking"
            );
            unattributed_records += 1;
        }

        let mut cohorts = cohort_selector(record);
        cohorts.insert(ALL_COHORT.to_string());

        for cohort in cohorts {
            if let Some(key) = key {
                let acc = entities
                    .entry((bucket_index, cohort.clone(), key.clone()))
                    .or_default();
                acc.count += 1;
                acc.sum += value;
                if let Some(actor) = &record.actor_id {
                    acc.actors.insert(actor.clone());
                }
                match group_by {
                    GroupBy::Entity => {
                        if acc.entity_name.is_none() {
                            acc.entity_name = record.entity_name.clone();
                        }
                    }
                    GroupBy::Actor => {
                        *acc.breakdown.entry(record.entity_id.clone()).or_default() += 1;
                    }
                }
            }

            let group = groups.entry((bucket_index, cohort)).or_default();
            group.record_count += 1;
            group.total += value;
            group.entities.insert(record.entity_id.clone());
            if let Some(actor) = &record.actor_id {
                group.actors.insert(actor.clone());
            }
            group.values.push(value);
        }
    }

    if unplaced_records > 0 {
        tracing::debug!(unplaced_records, "Records outside every bucket were ignored");
    }

    let buckets = timeline.buckets();
    let results = entities
        .into_iter()
        .map(|((bucket_index, cohort, entity_id), acc)| AggregateResult {
            bucket: buckets[bucket_index].clone(),
            bucket_index,
            cohort,
            entity_id,
            entity_name: acc.entity_name,
            count: acc.count,
            sum: acc.sum,
            avg: if acc.count > 0 {
                acc.sum / acc.count as f64
            } else {
                0.0
            },
            user_count: acc.actors.len() as i64,
            breakdown: acc.breakdown,
        })
        .collect();

    let groups = groups
        .into_iter()
        .map(|(key, g)| {
            (
                key,
                GroupSample {
                    record_count: g.record_count,
                    total: g.total,
                    entity_count: g.entities.len() as i64,
                    user_count: g.actors.len() as i64,
                    values: g.values,
                },
            )
        })
        .collect();

    Aggregation {
        results,
        groups,
        skipped_records,
        unplaced_records,
        unattributed_records,
    }
}

// ============================================
// Distribution statistics
// ============================================

/// One histogram range: `lower <= v < upper`, or `lower <= v` when open-ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileBucket {
    pub range_label: String,
    pub lower: f64,
    pub upper: Option<f64>,
    pub count: i64,
    /// Share of the whole sample, 0-100
    pub percentage: f64,
}

/// Median, mean and histogram of one value sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DistributionStats {
    pub sample_size: usize,
    pub median: f64,
    pub mean: f64,
    pub percentile_buckets: Vec<PercentileBucket>,
}

/// Compute distribution statistics over the full in-memory sample.
///
/// `breakpoints` are the lower bounds of the histogram ranges and must be
/// strictly ascending. Values below the first breakpoint count towards the
/// median and mean but not the histogram.
pub fn distribution(values: &[f64], breakpoints: &[f64]) -> Result<DistributionStats> {
    if breakpoints.is_empty() {
        return Err(Error::invalid("distribution breakpoints must not be empty"));
    }
    if breakpoints.windows(2).any(|w| w[0] >= w[1]) || breakpoints.iter().any(|b| !b.is_finite()) {
        return Err(Error::invalid(
            "distribution breakpoints must be finite and strictly ascending",
        ));
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let sample_size = sorted.len();
    let mean = if sample_size > 0 {
        sorted.iter().sum::<f64>() / sample_size as f64
    } else {
        0.0
    };

    let percentile_buckets = breakpoints
        .iter()
        .enumerate()
        .map(|(i, &lower)| {
            let upper = breakpoints.get(i + 1).copied();
            let count = sorted
                .iter()
                .filter(|&&v| v >= lower && upper.map_or(true, |u| v < u))
                .count() as i64;
            PercentileBucket {
                range_label: range_label(lower, upper),
                lower,
                upper,
                count,
                percentage: if sample_size > 0 {
                    count as f64 * 100.0 / sample_size as f64
                } else {
                    0.0
                },
            }
        })
        .collect();

    Ok(DistributionStats {
        sample_size,
        median: median(&sorted),
        mean,
        percentile_buckets,
    })
}

/// Median of an already sorted sample; 0 for an empty one.
pub fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// `0-50` for `[0, 51)` on whole numbers, `0.5-1.5` otherwise, `1001+` when open.
fn range_label(lower: f64, upper: Option<f64>) -> String {
    match upper {
        None => format!("{}+", format_bound(lower)),
        Some(upper) if lower.fract() == 0.0 && upper.fract() == 0.0 => {
            format!("{}-{}", format_bound(lower), format_bound(upper - 1.0))
        }
        Some(upper) => format!("{}-{}", format_bound(lower), format_bound(upper)),
    }
}

fn format_bound(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{:.0}", v)
    } else {
        format!("{}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::period::{Granularity, TimeRange};
    use crate::types::PAID_COHORT;
    use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};

    fn timeline() -> Timeline {
        let zone = FixedOffset::east_opt(8 * 3600).unwrap();
        let range = TimeRange::from_dates(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            zone,
        )
        .unwrap();
        Timeline::new(&range, Granularity::Daily).unwrap()
    }

    fn jan(day: u32) -> chrono::DateTime<Utc> {
        // 04:00 UTC keeps the civil date (UTC+8) equal to `day`
        Utc.with_ymd_and_hms(2024, 1, day, 4, 0, 0).unwrap()
    }

    #[test]
    fn test_aggregate_example_scenario() {
        let records = vec![
            RawRecord::new("A", jan(3), 5.0),
            RawRecord::new("A", jan(3), 3.0),
            RawRecord::new("B", jan(3), 4.0),
        ];
        let agg = aggregate(&records, &timeline(), tag_cohorts, ValuePolicy::Raw);

        let all = agg.group_results(2, ALL_COHORT);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].entity_id, "A");
        assert_eq!(all[0].count, 2);
        assert_eq!(all[0].sum, 8.0);
        assert_eq!(all[0].avg, 4.0);
        assert_eq!(all[0].bucket.label, "2024-01-03");
        assert_eq!(all[1].entity_id, "B");
        assert_eq!(all[1].count, 1);
        assert_eq!(all[1].sum, 4.0);

        let group = agg.group(2, ALL_COHORT).unwrap();
        assert_eq!(group.record_count, 3);
        assert_eq!(group.total, 12.0);
        assert_eq!(group.entity_count, 2);
    }

    #[test]
    fn test_cohorts_overlap() {
        let records = vec![
            RawRecord::new("poster", jan(2), 1.0)
                .with_tag(PAID_COHORT)
                .with_tag("vip_year"),
            RawRecord::new("poster", jan(2), 1.0).with_tag("free"),
            RawRecord::new("article", jan(2), 1.0),
        ];
        let agg = aggregate(&records, &timeline(), tag_cohorts, ValuePolicy::Raw);

        assert_eq!(agg.group(1, ALL_COHORT).unwrap().record_count, 3);
        assert_eq!(agg.group(1, PAID_COHORT).unwrap().record_count, 1);
        assert_eq!(agg.group(1, "vip_year").unwrap().record_count, 1);
        assert_eq!(agg.group(1, "free").unwrap().record_count, 1);
        // untagged record only counts in "all"
        assert_eq!(agg.group_results(1, "free").len(), 1);
    }

    #[test]
    fn test_custom_cohort_selector() {
        let records = vec![RawRecord::new("poster", jan(2), 1.0).with_tag("paid")];
        let agg = aggregate(
            &records,
            &timeline(),
            |r| {
                r.cohort_tags
                    .iter()
                    .map(|t| format!("tier:{}", t))
                    .collect()
            },
            ValuePolicy::Raw,
        );
        assert!(agg.group(1, "tier:paid").is_some());
        assert!(agg.group(1, "paid").is_none());
    }

    #[test]
    fn test_distinct_users() {
        let records = vec![
            RawRecord::new("poster", jan(4), 1.0).with_actor("u1"),
            RawRecord::new("poster", jan(4), 1.0).with_actor("u1"),
            RawRecord::new("poster", jan(4), 1.0).with_actor("u2"),
            RawRecord::new("poster", jan(4), 1.0),
        ];
        let agg = aggregate(&records, &timeline(), tag_cohorts, ValuePolicy::Raw);
        let poster = agg.group_results(3, ALL_COHORT)[0].clone();
        assert_eq!(poster.count, 4);
        assert_eq!(poster.user_count, 2);
    }

    #[test]
    fn test_magnitude_policy_for_signed_ledger() {
        let records = vec![
            RawRecord::new("consume", jan(5), -30.0),
            RawRecord::new("consume", jan(5), -20.0),
        ];
        let policy = ValuePolicy::for_source(RecordSource::CreditLedger);
        let agg = aggregate(&records, &timeline(), tag_cohorts, policy);
        let item = agg.group_results(4, ALL_COHORT)[0].clone();
        assert_eq!(item.sum, 50.0);
        assert_eq!(agg.group(4, ALL_COHORT).unwrap().values, vec![30.0, 20.0]);
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let mut missing = RawRecord::new("A", jan(3), 0.0);
        missing.metric_value = None;
        let records = vec![
            RawRecord::new("A", jan(3), 2.0),
            missing,
            RawRecord::new("A", jan(3), f64::NAN),
        ];
        let agg = aggregate(&records, &timeline(), tag_cohorts, ValuePolicy::Raw);
        assert_eq!(agg.skipped_records, 2);
        let a = agg.group_results(2, ALL_COHORT)[0].clone();
        assert_eq!(a.count, 1);
        assert_eq!(a.sum, 2.0);
    }

    #[test]
    fn test_records_outside_range_are_unplaced() {
        let records = vec![RawRecord::new(
            "A",
            Utc.with_ymd_and_hms(2024, 2, 1, 4, 0, 0).unwrap(),
            1.0,
        )];
        let agg = aggregate(&records, &timeline(), tag_cohorts, ValuePolicy::Raw);
        assert!(agg.results.is_empty());
        assert_eq!(agg.unplaced_records, 1);
    }

    #[test]
    fn test_group_by_actor() {
        let records = vec![
            RawRecord::new("poster", jan(2), 1.0).with_actor("u1"),
            RawRecord::new("article", jan(2), 1.0).with_actor("u1"),
            RawRecord::new("poster", jan(2), 1.0)
                .with_actor("u1")
                .with_tag(PAID_COHORT),
            RawRecord::new("poster", jan(2), 1.0).with_actor("u2"),
            RawRecord::new("poster", jan(2), 1.0),
        ];
        let agg = aggregate_by(
            &records,
            &timeline(),
            tag_cohorts,
            ValuePolicy::Raw,
            GroupBy::Actor,
        );

        let all = agg.group_results(1, ALL_COHORT);
        let ids: Vec<_> = all.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);
        assert_eq!(all[0].count, 3);
        assert_eq!(all[0].user_count, 1);
        assert_eq!(all[0].entity_name, None);
        assert_eq!(all[0].breakdown.get("poster"), Some(&2));
        assert_eq!(all[0].breakdown.get("article"), Some(&1));

        let paid = agg.group_results(1, PAID_COHORT);
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].breakdown.get("poster"), Some(&1));

        // the actor-less record is not ranked but still part of the sample
        assert_eq!(agg.unattributed_records, 1);
        assert_eq!(agg.group(1, ALL_COHORT).unwrap().record_count, 5);
    }

    #[test]
    fn test_entity_grouping_leaves_breakdown_empty() {
        let records = vec![RawRecord::new("poster", jan(2), 1.0).with_actor("u1")];
        let agg = aggregate(&records, &timeline(), tag_cohorts, ValuePolicy::Raw);
        assert!(agg.results[0].breakdown.is_empty());
        assert_eq!(agg.unattributed_records, 0);
    }

    #[test]
    fn test_group_by_parse() {
        assert_eq!("actor".parse::<GroupBy>().unwrap(), GroupBy::Actor);
        assert_eq!("user".parse::<GroupBy>().unwrap(), GroupBy::Actor);
        assert_eq!("scene".parse::<GroupBy>().unwrap(), GroupBy::Entity);
        assert!(matches!(
            "tenant".parse::<GroupBy>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), 0.0);
        assert_eq!(median(&[7.0]), 7.0);
        assert_eq!(median(&[1.0, 4.0]), 2.5);
        assert_eq!(median(&[1.0, 2.0, 9.0]), 2.0);
    }

    #[test]
    fn test_distribution_sorts_before_median() {
        let stats = distribution(&[9.0, 1.0, 5.0, 3.0], &[0.0]).unwrap();
        assert_eq!(stats.sample_size, 4);
        assert_eq!(stats.median, 4.0);
        assert_eq!(stats.mean, 4.5);
    }

    #[test]
    fn test_distribution_histogram_bounds() {
        let breakpoints = [0.0, 51.0, 101.0, 201.0, 501.0, 1001.0];
        let values = [0.0, 50.0, 51.0, 100.0, 101.0, 500.0, 1001.0, 5000.0];
        let stats = distribution(&values, &breakpoints).unwrap();

        let labels: Vec<_> = stats
            .percentile_buckets
            .iter()
            .map(|b| b.range_label.as_str())
            .collect();
        assert_eq!(
            labels,
            vec!["0-50", "51-100", "101-200", "201-500", "501-1000", "1001+"]
        );
        let counts: Vec<_> = stats.percentile_buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 2, 1, 1, 0, 2]);
        assert_eq!(stats.percentile_buckets[0].percentage, 25.0);
        assert_eq!(stats.percentile_buckets[5].upper, None);
    }

    #[test]
    fn test_distribution_below_first_breakpoint() {
        let stats = distribution(&[5.0, 50.0, 150.0], &[10.0, 100.0]).unwrap();
        let counts: Vec<_> = stats.percentile_buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 1]);
        assert_eq!(stats.median, 50.0);
    }

    #[test]
    fn test_distribution_empty_sample() {
        let stats = distribution(&[], &[0.0, 10.0]).unwrap();
        assert_eq!(stats.sample_size, 0);
        assert_eq!(stats.median, 0.0);
        assert_eq!(stats.mean, 0.0);
        assert!(stats.percentile_buckets.iter().all(|b| b.percentage == 0.0));
    }

    #[test]
    fn test_distribution_rejects_bad_breakpoints() {
        assert!(matches!(
            distribution(&[1.0], &[]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            distribution(&[1.0], &[10.0, 5.0]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_fractional_range_labels() {
        assert_eq!(range_label(0.5, Some(1.5)), "0.5-1.5");
        assert_eq!(range_label(2.5, None), "2.5+");
    }
}
