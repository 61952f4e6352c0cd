//! Period bucketing
//!
//! Splits a date range into daily, weekly or monthly buckets in a fixed
//! civil timezone and decides which bucket a record belongs to.
//!
//! Membership rules differ by granularity:
//! - **daily**: the record's civil date equals the bucket's date
//! - **weekly / monthly**: `range_start <= t < range_end`, with the final
//!   bucket closed at the end of the requested range
//!
//! Weekly buckets are 7-day spans counted from the range start, not
//! calendar weeks.

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Bucket span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily" => Ok(Granularity::Daily),
            "weekly" => Ok(Granularity::Weekly),
            "monthly" => Ok(Granularity::Monthly),
            _ => Err(Error::invalid(format!(
                "invalid period_type {:?}, must be daily, weekly or monthly",
                s
            ))),
        }
    }
}

// ============================================
// TimeRange
// ============================================

/// Closed `[start, end]` range in the civil timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

impl TimeRange {
    /// Build a range. `end` is converted into `start`'s timezone.
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Result<Self> {
        if start > end {
            return Err(Error::invalid(format!(
                "start {} is after end {}",
                start.format(DATE_FORMAT),
                end.format(DATE_FORMAT)
            )));
        }
        let end = end.with_timezone(start.offset());
        Ok(Self { start, end })
    }

    /// Whole civil days `first..=last` in `zone`.
    pub fn from_dates(first: NaiveDate, last: NaiveDate, zone: FixedOffset) -> Result<Self> {
        Self::new(start_of_day(first, zone)?, end_of_day(last, zone)?)
    }

    pub fn start(&self) -> DateTime<FixedOffset> {
        self.start
    }

    pub fn end(&self) -> DateTime<FixedOffset> {
        self.end
    }

    pub fn zone(&self) -> FixedOffset {
        *self.start.offset()
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end.date_naive()
    }

    /// Inclusive count of civil days touched by the range.
    pub fn span_days(&self) -> i64 {
        (self.end_date() - self.start_date()).num_days() + 1
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t <= self.end
    }
}

/// One contiguous slice of the requested range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodBucket {
    /// `YYYY-MM-DD`, `YYYY-MM-DD ~ YYYY-MM-DD` or `YYYY-MM`
    pub label: String,
    pub range_start: DateTime<FixedOffset>,
    /// Exclusive, except for the last bucket of a timeline
    pub range_end: DateTime<FixedOffset>,
}

// ============================================
// Bucketing
// ============================================

/// Split `range` into ordered, gap-free buckets.
///
/// The cursor starts at the civil midnight of `range.start` (first of the
/// month for monthly) and advances one span at a time until it passes
/// `range.end`. Bucket bounds are clamped to the range.
pub fn bucketize(range: &TimeRange, granularity: Granularity) -> Result<Vec<PeriodBucket>> {
    if range.start > range.end {
        return Err(Error::invalid("range start is after range end"));
    }

    let zone = range.zone();
    let mut cursor = match granularity {
        Granularity::Daily | Granularity::Weekly => range.start_date(),
        Granularity::Monthly => first_of_month(range.start_date())?,
    };

    let mut buckets = Vec::new();
    loop {
        let cursor_at = start_of_day(cursor, zone)?;
        if cursor_at > range.end {
            break;
        }

        let next = advance(cursor, granularity)?;
        let next_at = start_of_day(next, zone)?;

        let range_start = cursor_at.max(range.start);
        let range_end = next_at.min(range.end);

        let label = match granularity {
            Granularity::Daily => cursor.format(DATE_FORMAT).to_string(),
            Granularity::Weekly => {
                let last_day = previous_day(next)?.min(range.end_date());
                format!(
                    "{} ~ {}",
                    cursor.format(DATE_FORMAT),
                    last_day.format(DATE_FORMAT)
                )
            }
            Granularity::Monthly => cursor.format("%Y-%m").to_string(),
        };

        buckets.push(PeriodBucket {
            label,
            range_start,
            range_end,
        });
        cursor = next;
    }

    Ok(buckets)
}

fn advance(date: NaiveDate, granularity: Granularity) -> Result<NaiveDate> {
    let next = match granularity {
        Granularity::Daily => date.checked_add_days(Days::new(1)),
        Granularity::Weekly => date.checked_add_days(Days::new(7)),
        Granularity::Monthly => {
            let (year, month) = if date.month() == 12 {
                (date.year() + 1, 1)
            } else {
                (date.year(), date.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, 1)
        }
    };
    next.ok_or_else(|| Error::invalid(format!("date {} out of range", date)))
}

fn first_of_month(date: NaiveDate) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
        .ok_or_else(|| Error::invalid(format!("date {} out of range", date)))
}

fn previous_day(date: NaiveDate) -> Result<NaiveDate> {
    date.pred_opt()
        .ok_or_else(|| Error::invalid(format!("date {} out of range", date)))
}

fn start_of_day(date: NaiveDate, zone: FixedOffset) -> Result<DateTime<FixedOffset>> {
    date.and_hms_opt(0, 0, 0)
        .and_then(|dt| dt.and_local_timezone(zone).single())
        .ok_or_else(|| Error::invalid(format!("date {} out of range", date)))
}

fn end_of_day(date: NaiveDate, zone: FixedOffset) -> Result<DateTime<FixedOffset>> {
    date.and_hms_nano_opt(23, 59, 59, 999_999_999)
        .and_then(|dt| dt.and_local_timezone(zone).single())
        .ok_or_else(|| Error::invalid(format!("date {} out of range", date)))
}

// ============================================
// Timeline (bucket membership)
// ============================================

/// Buckets of one request plus the membership rule for their granularity.
#[derive(Debug, Clone)]
pub struct Timeline {
    granularity: Granularity,
    zone: FixedOffset,
    buckets: Vec<PeriodBucket>,
}

impl Timeline {
    pub fn new(range: &TimeRange, granularity: Granularity) -> Result<Self> {
        Ok(Self {
            granularity,
            zone: range.zone(),
            buckets: bucketize(range, granularity)?,
        })
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn buckets(&self) -> &[PeriodBucket] {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Index of the bucket owning `t`, if any.
    pub fn locate(&self, t: DateTime<Utc>) -> Option<usize> {
        let first = self.buckets.first()?;
        match self.granularity {
            Granularity::Daily => {
                let day = t.with_timezone(&self.zone).date_naive();
                let offset = (day - first.range_start.date_naive()).num_days();
                usize::try_from(offset)
                    .ok()
                    .filter(|idx| *idx < self.buckets.len())
            }
            Granularity::Weekly | Granularity::Monthly => {
                let idx = self
                    .buckets
                    .partition_point(|b| b.range_start <= t)
                    .checked_sub(1)?;
                let bucket = &self.buckets[idx];
                let is_last = idx + 1 == self.buckets.len();
                if t < bucket.range_end || (is_last && t <= bucket.range_end) {
                    Some(idx)
                } else {
                    None
                }
            }
        }
    }
}

// ============================================
// Date range parsing
// ============================================

/// Resolve optional `YYYY-MM-DD` strings into a [`TimeRange`].
///
/// - missing `end` means `today`
/// - missing `start` means a trailing `default_days` window ending at `end`
/// - the end date is inclusive (23:59:59.999999999)
/// - ranges longer than `max_span_days` calendar days are rejected
pub fn parse_date_range(
    start: Option<&str>,
    end: Option<&str>,
    zone: FixedOffset,
    default_days: u32,
    max_span_days: u32,
    today: NaiveDate,
) -> Result<TimeRange> {
    let end_date = match end {
        Some(s) => parse_date("end_date", s)?,
        None => today,
    };
    let start_date = match start {
        Some(s) => parse_date("start_date", s)?,
        None => end_date
            .checked_sub_days(Days::new(u64::from(default_days.saturating_sub(1))))
            .ok_or_else(|| Error::invalid("default window reaches before the first date"))?,
    };

    if start_date > end_date {
        return Err(Error::invalid(format!(
            "start_date {} is after end_date {}",
            start_date, end_date
        )));
    }

    let range = TimeRange::from_dates(start_date, end_date, zone)?;
    if range.span_days() > i64::from(max_span_days) {
        return Err(Error::invalid(format!(
            "date range of {} days exceeds the maximum of {} days",
            range.span_days(),
            max_span_days
        )));
    }
    Ok(range)
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| {
        Error::invalid(format!(
            "invalid {} {:?}, expected YYYY-MM-DD",
            field, value
        ))
    })
}

/// Today's civil date in `zone`.
pub fn today_in(zone: FixedOffset) -> NaiveDate {
    Utc::now().with_timezone(&zone).date_naive()
}
