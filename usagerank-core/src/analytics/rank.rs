//! Ranking of aggregated entities within one `(bucket, cohort)` group.

use super::aggregate::AggregateResult;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Aggregate field used to order entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankMetric {
    Count,
    Sum,
    Avg,
}

impl RankMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankMetric::Count => "count",
            RankMetric::Sum => "sum",
            RankMetric::Avg => "avg",
        }
    }

    pub fn value(&self, result: &AggregateResult) -> f64 {
        match self {
            RankMetric::Count => result.count as f64,
            RankMetric::Sum => result.sum,
            RankMetric::Avg => result.avg,
        }
    }
}

impl std::fmt::Display for RankMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RankMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "count" => Ok(RankMetric::Count),
            "sum" => Ok(RankMetric::Sum),
            "avg" | "average" => Ok(RankMetric::Avg),
            _ => Err(Error::invalid(format!(
                "invalid rank metric {:?}, must be count, sum or avg",
                s
            ))),
        }
    }
}

/// One ranked entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingItem {
    /// 1-based position after sorting
    pub rank: u32,
    pub entity_id: String,
    pub entity_name: String,
    pub usage_count: i64,
    pub user_count: i64,
    /// Value of the ranked metric
    pub value: f64,
    /// Share of the ranked metric across the whole group, 0-100
    pub percentage: f64,
    /// Change against the previous bucket, in percent
    pub growth_rate: Option<f64>,
    /// Records per entity id when ranking actors
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub breakdown: BTreeMap<String, i64>,
}

/// Rank one group of aggregates by `metric`, keeping the top `limit`.
///
/// Order is metric descending, then `entity_id` ascending. Percentages are
/// shares of the untruncated group total, and 0 when that total is 0.
pub fn rank(
    results: &[AggregateResult],
    metric: RankMetric,
    limit: usize,
) -> Result<Vec<RankingItem>> {
    if limit == 0 {
        return Err(Error::invalid("limit must be positive"));
    }
    if let Some(first) = results.first() {
        let mixed = results
            .iter()
            .any(|r| r.bucket_index != first.bucket_index || r.cohort != first.cohort);
        if mixed {
            return Err(Error::invalid(
                "rank expects results from a single bucket and cohort",
            ));
        }
    }

    let mut sorted: Vec<&AggregateResult> = results.iter().collect();
    sorted.sort_by(|a, b| {
        compare(metric.value(b), metric.value(a)).then_with(|| a.entity_id.cmp(&b.entity_id))
    });

    let total: f64 = sorted.iter().map(|r| metric.value(r)).sum();

    let items = sorted
        .into_iter()
        .enumerate()
        .take(limit)
        .map(|(i, r)| {
            let value = metric.value(r);
            RankingItem {
                rank: (i + 1) as u32,
                entity_id: r.entity_id.clone(),
                entity_name: r
                    .entity_name
                    .clone()
                    .unwrap_or_else(|| r.entity_id.clone()),
                usage_count: r.count,
                user_count: r.user_count,
                value,
                percentage: share(value, total),
                growth_rate: None,
                breakdown: r.breakdown.clone(),
            }
        })
        .collect();

    Ok(items)
}

fn compare(a: f64, b: f64) -> Ordering {
    a.total_cmp(&b)
}

fn share(value: f64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        value * 100.0 / total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::period::PeriodBucket;
    use chrono::{FixedOffset, TimeZone};

    fn bucket() -> PeriodBucket {
        let zone = FixedOffset::east_opt(8 * 3600).unwrap();
        PeriodBucket {
            label: "2024-01-03".to_string(),
            range_start: zone.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap(),
            range_end: zone.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap(),
        }
    }

    fn result(entity: &str, count: i64, sum: f64) -> AggregateResult {
        AggregateResult {
            bucket: bucket(),
            bucket_index: 0,
            cohort: "all".to_string(),
            entity_id: entity.to_string(),
            entity_name: None,
            count,
            sum,
            avg: if count > 0 { sum / count as f64 } else { 0.0 },
            user_count: 1,
            breakdown: BTreeMap::new(),
        }
    }

    #[test]
    fn test_rank_example_scenario() {
        let results = vec![result("A", 2, 8.0), result("B", 1, 4.0)];
        let items = rank(&results, RankMetric::Sum, 10).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].rank, 1);
        assert_eq!(items[0].entity_id, "A");
        assert_eq!(items[0].value, 8.0);
        assert!((items[0].percentage - 66.666_666).abs() < 1e-3);
        assert_eq!(items[1].rank, 2);
        assert_eq!(items[1].entity_id, "B");
        assert!((items[1].percentage - 33.333_333).abs() < 1e-3);
    }

    #[test]
    fn test_tie_break_by_entity_id() {
        let results = vec![
            result("zeta", 3, 3.0),
            result("alpha", 3, 3.0),
            result("mid", 5, 5.0),
        ];
        let items = rank(&results, RankMetric::Count, 10).unwrap();
        let order: Vec<_> = items.iter().map(|i| i.entity_id.as_str()).collect();
        assert_eq!(order, vec!["mid", "alpha", "zeta"]);
        let ranks: Vec<_> = items.iter().map(|i| i.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn test_rank_is_deterministic_under_shuffles() {
        let base = vec![
            result("c", 2, 10.0),
            result("a", 2, 10.0),
            result("d", 1, 1.0),
            result("b", 4, 10.0),
            result("e", 7, 0.0),
        ];
        let expected = rank(&base, RankMetric::Sum, 10).unwrap();

        for shift in 1..base.len() {
            let mut shuffled = base.clone();
            shuffled.rotate_left(shift);
            assert_eq!(rank(&shuffled, RankMetric::Sum, 10).unwrap(), expected);
            shuffled.reverse();
            assert_eq!(rank(&shuffled, RankMetric::Sum, 10).unwrap(), expected);
        }
    }

    #[test]
    fn test_percentage_uses_untruncated_total() {
        let results = vec![
            result("a", 5, 5.0),
            result("b", 3, 3.0),
            result("c", 2, 2.0),
        ];
        let full = rank(&results, RankMetric::Count, 10).unwrap();
        let total: f64 = full.iter().map(|i| i.percentage).sum();
        assert!((total - 100.0).abs() < 1e-9);

        let top = rank(&results, RankMetric::Count, 1).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].percentage, 50.0);
    }

    #[test]
    fn test_zero_total_gives_zero_percentage() {
        let results = vec![result("a", 0, 0.0), result("b", 0, 0.0)];
        let items = rank(&results, RankMetric::Sum, 10).unwrap();
        assert!(items.iter().all(|i| i.percentage == 0.0));
    }

    #[test]
    fn test_empty_group_ranks_empty() {
        assert!(rank(&[], RankMetric::Count, 5).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_limit_and_metric() {
        assert!(matches!(
            rank(&[result("a", 1, 1.0)], RankMetric::Count, 0),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            "median".parse::<RankMetric>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_mixed_groups_are_rejected() {
        let mut other = result("b", 1, 1.0);
        other.cohort = "paid".to_string();
        assert!(rank(&[result("a", 1, 1.0), other], RankMetric::Count, 5).is_err());
    }

    #[test]
    fn test_entity_name_falls_back_to_id() {
        let mut named = result("poster", 1, 1.0);
        named.entity_name = Some("Poster".to_string());
        let items = rank(&[named, result("misc", 1, 1.0)], RankMetric::Count, 5).unwrap();
        assert_eq!(items[0].entity_name, "misc");
        assert_eq!(items[1].entity_name, "Poster");
    }
}
