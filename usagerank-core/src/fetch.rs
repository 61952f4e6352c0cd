//! Record fetcher port
//!
//! The engine never queries storage directly. It asks a [`RecordFetcher`]
//! for the records of one source inside one range and treats the answer as
//! an immutable in-memory slice.

use crate::analytics::period::TimeRange;
use crate::error::Result;
use crate::types::{RawRecord, RecordSource};
use async_trait::async_trait;
use std::collections::HashMap;

/// One fetch: every record of `source` inside `range`.
///
/// Cohorts are not part of the filter. Records carry their tags and the
/// aggregator segments them, so one fetch per source serves every cohort.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchFilter {
    pub source: RecordSource,
    pub range: TimeRange,
}

impl FetchFilter {
    pub fn new(source: RecordSource, range: TimeRange) -> Self {
        Self { source, range }
    }

    /// Whether `record` falls inside the range.
    pub fn matches(&self, record: &RawRecord) -> bool {
        self.range.contains(record.occurred_at)
    }
}

impl std::fmt::Display for FetchFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{} .. {}]",
            self.source,
            self.range.start().to_rfc3339(),
            self.range.end().to_rfc3339()
        )
    }
}

/// Source of raw records.
#[async_trait]
pub trait RecordFetcher: Send + Sync {
    /// Records of `filter.source` inside `filter.range`.
    async fn fetch(&self, filter: &FetchFilter) -> Result<Vec<RawRecord>>;
}

/// Fetcher over records held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryFetcher {
    records: HashMap<RecordSource, Vec<RawRecord>>,
}

impl InMemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: RecordSource, record: RawRecord) {
        self.records.entry(source).or_default().push(record);
    }

    pub fn extend<I>(&mut self, source: RecordSource, records: I)
    where
        I: IntoIterator<Item = RawRecord>,
    {
        self.records.entry(source).or_default().extend(records);
    }
}

#[async_trait]
impl RecordFetcher for InMemoryFetcher {
    async fn fetch(&self, filter: &FetchFilter) -> Result<Vec<RawRecord>> {
        Ok(self
            .records
            .get(&filter.source)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| filter.matches(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};

    fn range() -> TimeRange {
        TimeRange::from_dates(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            FixedOffset::east_opt(8 * 3600).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_in_memory_fetch_filters_source_and_range() {
        let inside = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2024, 2, 5, 0, 0, 0).unwrap();

        let mut fetcher = InMemoryFetcher::new();
        fetcher.insert(RecordSource::Trade, RawRecord::new("vip", inside, 99.0));
        fetcher.insert(RecordSource::Trade, RawRecord::new("vip", outside, 99.0));
        fetcher.insert(RecordSource::Commission, RawRecord::new("u1", inside, 5.0));

        let trades = fetcher
            .fetch(&FetchFilter::new(RecordSource::Trade, range()))
            .await
            .unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].occurred_at, inside);

        let scenes = fetcher
            .fetch(&FetchFilter::new(RecordSource::SceneUsage, range()))
            .await
            .unwrap();
        assert!(scenes.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_returns_every_cohort() {
        let t = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let mut fetcher = InMemoryFetcher::new();
        fetcher.extend(
            RecordSource::SceneUsage,
            vec![
                RawRecord::new("poster", t, 1.0).with_tag("paid"),
                RawRecord::new("poster", t, 1.0).with_tag("free"),
                RawRecord::new("poster", t, 1.0),
            ],
        );

        let filter = FetchFilter::new(RecordSource::SceneUsage, range());
        let records = fetcher.fetch(&filter).await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(filter.to_string().starts_with("scene_usage ["));
    }
}
