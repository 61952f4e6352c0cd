//! Database repository layer
//!
//! Insert and range queries over stored raw records.

use crate::error::Result;
use crate::fetch::FetchFilter;
use crate::types::{RawRecord, RecordSource};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Mutex;

/// Bookkeeping row for one importer run.
#[derive(Debug, Clone)]
pub struct ImportRun {
    /// Run id (UUID v4)
    pub id: String,
    pub source: RecordSource,
    pub source_file: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records_inserted: i64,
    pub lines_skipped: i64,
}

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

/// Storage form of a timestamp; string order equals time order.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Record operations
    // ============================================

    /// Insert records of one source in a single transaction
    pub fn insert_records(&self, source: RecordSource, records: &[RawRecord]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let imported_at = format_timestamp(Utc::now());

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO usage_records (source, entity_id, entity_name, actor_id,
                                           occurred_at, metric_value, cohort_tags, imported_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;
            for record in records {
                let tags = serde_json::to_string(&record.cohort_tags)?;
                stmt.execute(params![
                    source.as_str(),
                    record.entity_id,
                    record.entity_name,
                    record.actor_id,
                    format_timestamp(record.occurred_at),
                    record.metric_value,
                    tags,
                    imported_at,
                ])?;
            }
        }

        tx.commit()?;
        Ok(records.len())
    }

    /// Records matching `filter`, ordered by time.
    ///
    /// Rows with an unreadable timestamp or tag list are logged and skipped.
    pub fn query_records(&self, filter: &FetchFilter) -> Result<Vec<RawRecord>> {
        let conn = self.conn.lock().unwrap();
        let start = format_timestamp(filter.range.start().with_timezone(&Utc));
        let end = format_timestamp(filter.range.end().with_timezone(&Utc));

        let mut stmt = conn.prepare(
            r#"
            SELECT id, entity_id, entity_name, actor_id, occurred_at, metric_value, cohort_tags
            FROM usage_records
            WHERE source = ?1 AND occurred_at >= ?2 AND occurred_at <= ?3
            ORDER BY occurred_at, id
            "#,
        )?;

        let rows: Vec<RawRecord> = stmt
            .query_map(params![filter.source.as_str(), start, end], |row| {
                Ok(StoredRow {
                    id: row.get(0)?,
                    entity_id: row.get(1)?,
                    entity_name: row.get(2)?,
                    actor_id: row.get(3)?,
                    occurred_at: row.get(4)?,
                    metric_value: row.get(5)?,
                    cohort_tags: row.get(6)?,
                })
            })?
            .filter_map(|r| r.ok())
            .filter_map(StoredRow::into_record)
            .filter(|record| filter.matches(record))
            .collect();

        Ok(rows)
    }

    /// Count stored records, optionally for one source
    pub fn count_records(&self, source: Option<RecordSource>) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = match source {
            Some(source) => conn.query_row(
                "SELECT COUNT(*) FROM usage_records WHERE source = ?",
                [source.as_str()],
                |r| r.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM usage_records", [], |r| r.get(0))?,
        };
        Ok(count)
    }

    // ============================================
    // Import bookkeeping
    // ============================================

    /// Record one finished import run
    pub fn insert_import_run(&self, run: &ImportRun) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO import_runs (id, source, source_file, started_at, finished_at,
                                     records_inserted, lines_skipped)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                run.id,
                run.source.as_str(),
                run.source_file,
                format_timestamp(run.started_at),
                format_timestamp(run.finished_at),
                run.records_inserted,
                run.lines_skipped,
            ],
        )?;
        Ok(())
    }

    /// Number of import runs recorded so far
    pub fn count_import_runs(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM import_runs", [], |r| r.get(0))?;
        Ok(count)
    }
}

/// Row as stored, before timestamp and tag parsing.
struct StoredRow {
    id: i64,
    entity_id: String,
    entity_name: Option<String>,
    actor_id: Option<String>,
    occurred_at: String,
    metric_value: Option<f64>,
    cohort_tags: String,
}

impl StoredRow {
    fn into_record(self) -> Option<RawRecord> {
        let Some(occurred_at) = parse_timestamp(&self.occurred_at) else {
            tracing::warn!(
                row_id = self.id,
                value = %self.occurred_at,
                "Skipping row with bad timestamp"
            );
            return None;
        };
        let cohort_tags: BTreeSet<String> = match serde_json::from_str(&self.cohort_tags) {
            Ok(tags) => tags,
            Err(e) => {
                tracing::warn!(row_id = self.id, error = %e, "Skipping row with bad cohort tags");
                return None;
            }
        };
        Some(RawRecord {
            entity_id: self.entity_id,
            entity_name: self.entity_name,
            actor_id: self.actor_id,
            occurred_at,
            metric_value: self.metric_value,
            cohort_tags,
        })
    }
}
