//! Core domain types for usagerank
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Source** | A kind of raw record: scene usage, commission, trade or credit ledger entry |
//! | **Entity** | The thing being ranked (a scene type, a referrer, a product) |
//! | **Actor** | The user that produced a record; used for distinct-user counts |
//! | **Cohort** | A tag partition of records (`paid`, `free`, a product name); not exclusive |
//! | **Bucket** | One day, week or month of the requested range |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Implicit cohort every record belongs to.
pub const ALL_COHORT: &str = "all";
/// Cohort tag carried by records of paying users.
pub const PAID_COHORT: &str = "paid";
/// Cohort tag carried by records of free users.
pub const FREE_COHORT: &str = "free";

// ============================================
// RecordSource
// ============================================

/// Which record family a metric is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    /// One row per scene used by a user
    SceneUsage,
    /// Referral commission paid to an inviter
    Commission,
    /// Completed purchase
    Trade,
    /// Signed credit delta (consumption, expiry, top-up)
    CreditLedger,
}

impl RecordSource {
    pub const ALL: [RecordSource; 4] = [
        RecordSource::SceneUsage,
        RecordSource::Commission,
        RecordSource::Trade,
        RecordSource::CreditLedger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordSource::SceneUsage => "scene_usage",
            RecordSource::Commission => "commission",
            RecordSource::Trade => "trade",
            RecordSource::CreditLedger => "credit_ledger",
        }
    }

    /// Signed sources are aggregated as magnitudes.
    pub fn is_signed(&self) -> bool {
        matches!(self, RecordSource::CreditLedger)
    }
}

impl std::fmt::Display for RecordSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scene_usage" | "scene" => Ok(RecordSource::SceneUsage),
            "commission" => Ok(RecordSource::Commission),
            "trade" => Ok(RecordSource::Trade),
            "credit_ledger" | "credits" => Ok(RecordSource::CreditLedger),
            _ => Err(format!("unknown metric: {}", s)),
        }
    }
}

// ============================================
// RawRecord
// ============================================

/// One fetched record. Read-only once it leaves the fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Identifier of the ranked entity
    pub entity_id: String,
    /// Display name carried by the source, if any
    #[serde(default)]
    pub entity_name: Option<String>,
    /// User that produced the record
    #[serde(default)]
    pub actor_id: Option<String>,
    /// When the record happened
    pub occurred_at: DateTime<Utc>,
    /// Metric value; `None` marks a malformed row
    #[serde(default)]
    pub metric_value: Option<f64>,
    /// Cohort tags such as `paid` or a product name
    #[serde(default)]
    pub cohort_tags: BTreeSet<String>,
}

impl RawRecord {
    pub fn new(entity_id: impl Into<String>, occurred_at: DateTime<Utc>, value: f64) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_name: None,
            actor_id: None,
            occurred_at,
            metric_value: Some(value),
            cohort_tags: BTreeSet::new(),
        }
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.entity_name = Some(name.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.cohort_tags.insert(tag.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_source_roundtrip() {
        for source in RecordSource::ALL {
            assert_eq!(source.as_str().parse::<RecordSource>().unwrap(), source);
        }
        assert!("refunds".parse::<RecordSource>().is_err());
        assert!(RecordSource::CreditLedger.is_signed());
        assert!(!RecordSource::Trade.is_signed());
    }

    #[test]
    fn test_raw_record_deserialize_defaults() {
        let json = r#"{"entity_id":"poster","occurred_at":"2024-01-03T02:00:00Z"}"#;
        let record: RawRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.entity_id, "poster");
        assert!(record.metric_value.is_none());
        assert!(record.cohort_tags.is_empty());
        assert_eq!(
            record.occurred_at,
            Utc.with_ymd_and_hms(2024, 1, 3, 2, 0, 0).unwrap()
        );
    }
}
