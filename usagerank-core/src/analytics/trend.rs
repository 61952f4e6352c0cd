//! Period-over-period comparisons
//!
//! Growth rates for ranked items against the previous bucket, and a
//! per-cohort summary of how the group total moved across the range.

use super::aggregate::{AggregateResult, GroupSample};
use super::rank::{RankMetric, RankingItem};
use serde::Serialize;
use std::collections::BTreeMap;

/// Percentage change from `previous` to `current`.
///
/// Growth from zero is shown as 100%.
pub fn calc_delta(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        if current == 0.0 {
            0.0
        } else {
            100.0
        }
    } else {
        (current - previous) / previous * 100.0
    }
}

/// Format delta for display (e.g., "+23%" or "-15%").
pub fn format_delta(delta: f64) -> String {
    if delta >= 0.0 {
        format!("+{:.0}%", delta)
    } else {
        format!("{:.0}%", delta)
    }
}

/// Fill `growth_rate` on `items` from the same cohort's previous bucket.
///
/// `previous` is `None` for the first bucket, which leaves every rate unset.
/// Entities missing from the previous bucket count as zero there.
pub fn apply_growth(
    items: &mut [RankingItem],
    previous: Option<&[AggregateResult]>,
    metric: RankMetric,
) {
    let Some(previous) = previous else {
        return;
    };
    let before: BTreeMap<&str, f64> = previous
        .iter()
        .map(|r| (r.entity_id.as_str(), metric.value(r)))
        .collect();

    for item in items.iter_mut() {
        let prev = before.get(item.entity_id.as_str()).copied().unwrap_or(0.0);
        item.growth_rate = Some(calc_delta(item.value, prev));
    }
}

/// The ranked metric applied to a whole `(bucket, cohort)` group.
pub fn group_value(group: Option<&GroupSample>, metric: RankMetric) -> f64 {
    let Some(group) = group else {
        return 0.0;
    };
    match metric {
        RankMetric::Count => group.record_count as f64,
        RankMetric::Sum => group.total,
        RankMetric::Avg => {
            if group.record_count > 0 {
                group.total / group.record_count as f64
            } else {
                0.0
            }
        }
    }
}

/// One bucket of a cohort trend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub period: String,
    pub value: f64,
    pub record_count: i64,
    pub user_count: i64,
}

/// How one cohort's total moved across the requested range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortTrend {
    pub cohort: String,
    pub points: Vec<TrendPoint>,
    pub average: f64,
    pub max: f64,
    pub min: f64,
    /// Last point against the first; unset with one point or a zero start
    pub growth_rate: Option<f64>,
}

impl CohortTrend {
    pub fn from_points(cohort: impl Into<String>, points: Vec<TrendPoint>) -> Self {
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let (average, max, min) = if values.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                values.iter().sum::<f64>() / values.len() as f64,
                values.iter().copied().fold(f64::MIN, f64::max),
                values.iter().copied().fold(f64::MAX, f64::min),
            )
        };

        let growth_rate = match (values.first(), values.last()) {
            (Some(&first), Some(&last)) if values.len() > 1 && first != 0.0 => {
                Some(calc_delta(last, first))
            }
            _ => None,
        };

        Self {
            cohort: cohort.into(),
            points,
            average,
            max,
            min,
            growth_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::period::PeriodBucket;
    use chrono::{FixedOffset, TimeZone};

    fn point(period: &str, value: f64) -> TrendPoint {
        TrendPoint {
            period: period.to_string(),
            value,
            record_count: value as i64,
            user_count: 0,
        }
    }

    fn item(entity: &str, value: f64) -> RankingItem {
        RankingItem {
            rank: 1,
            entity_id: entity.to_string(),
            entity_name: entity.to_string(),
            usage_count: value as i64,
            user_count: 0,
            value,
            percentage: 0.0,
            growth_rate: None,
            breakdown: BTreeMap::new(),
        }
    }

    fn previous(entity: &str, count: i64) -> AggregateResult {
        let zone = FixedOffset::east_opt(8 * 3600).unwrap();
        AggregateResult {
            bucket: PeriodBucket {
                label: "2024-01-01".to_string(),
                range_start: zone.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                range_end: zone.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            },
            bucket_index: 0,
            cohort: "all".to_string(),
            entity_id: entity.to_string(),
            entity_name: None,
            count,
            sum: count as f64,
            avg: 1.0,
            user_count: 0,
            breakdown: BTreeMap::new(),
        }
    }

    #[test]
    fn test_calc_delta() {
        assert_eq!(calc_delta(123.0, 100.0), 23.0);
        assert_eq!(calc_delta(80.0, 100.0), -20.0);
        assert_eq!(calc_delta(100.0, 0.0), 100.0);
        assert_eq!(calc_delta(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_format_delta() {
        assert_eq!(format_delta(23.0), "+23%");
        assert_eq!(format_delta(-15.4), "-15%");
        assert_eq!(format_delta(0.0), "+0%");
    }

    #[test]
    fn test_apply_growth() {
        let prev = vec![previous("a", 4), previous("c", 2)];

        let mut items = vec![item("a", 6.0), item("b", 3.0)];
        apply_growth(&mut items, Some(prev.as_slice()), RankMetric::Count);
        assert_eq!(items[0].growth_rate, Some(50.0));
        // new entity grows from zero
        assert_eq!(items[1].growth_rate, Some(100.0));
    }

    #[test]
    fn test_first_bucket_has_no_growth() {
        let mut items = vec![item("a", 6.0)];
        apply_growth(&mut items, None, RankMetric::Count);
        assert_eq!(items[0].growth_rate, None);
    }

    #[test]
    fn test_group_value() {
        let group = GroupSample {
            record_count: 4,
            total: 10.0,
            ..Default::default()
        };
        assert_eq!(group_value(Some(&group), RankMetric::Count), 4.0);
        assert_eq!(group_value(Some(&group), RankMetric::Sum), 10.0);
        assert_eq!(group_value(Some(&group), RankMetric::Avg), 2.5);
        assert_eq!(group_value(None, RankMetric::Avg), 0.0);
    }

    #[test]
    fn test_cohort_trend_summary() {
        let trend = CohortTrend::from_points(
            "all",
            vec![point("d1", 10.0), point("d2", 30.0), point("d3", 20.0)],
        );
        assert_eq!(trend.average, 20.0);
        assert_eq!(trend.max, 30.0);
        assert_eq!(trend.min, 10.0);
        assert_eq!(trend.growth_rate, Some(100.0));
    }

    #[test]
    fn test_cohort_trend_edge_cases() {
        let single = CohortTrend::from_points("all", vec![point("d1", 5.0)]);
        assert_eq!(single.growth_rate, None);
        assert_eq!(single.min, 5.0);

        let from_zero = CohortTrend::from_points("all", vec![point("d1", 0.0), point("d2", 5.0)]);
        assert_eq!(from_zero.growth_rate, None);

        let empty = CohortTrend::from_points("all", vec![]);
        assert_eq!(empty.average, 0.0);
        assert_eq!(empty.max, 0.0);
    }
}
