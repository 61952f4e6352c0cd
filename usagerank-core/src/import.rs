//! JSON-lines import into the record store
//!
//! Each non-blank line is one [`RawRecord`] as JSON. A file holds records of
//! a single [`RecordSource`], taken from the caller or from the file stem
//! (`trade.jsonl`, `scene_usage.jsonl`, ...).
//!
//! Lines that do not parse are counted and skipped; they never abort the
//! import. Records are written in batches, each in its own transaction.

use crate::db::{Database, ImportRun};
use crate::error::{Error, Result};
use crate::types::{RawRecord, RecordSource};
use chrono::Utc;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Records per insert transaction.
const BATCH_SIZE: usize = 1000;

/// Counters for one import.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportStats {
    /// Non-blank lines seen
    pub lines_read: usize,
    pub records_inserted: usize,
    /// Lines that were not a valid record
    pub lines_skipped: usize,
}

/// Record source named by a file stem, if any.
pub fn source_from_path(path: &Path) -> Option<RecordSource> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.parse().ok())
}

/// Parse one line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<RawRecord>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let record: RawRecord = serde_json::from_str(line)?;
    if record.entity_id.trim().is_empty() {
        return Err(Error::invalid("entity_id must not be empty"));
    }
    Ok(Some(record))
}

/// Import every line of `reader` as records of `source`.
///
/// `progress` is called after each line with the number of bytes consumed.
pub fn import_reader<R, F>(
    db: &Database,
    source: RecordSource,
    reader: R,
    mut progress: F,
) -> Result<ImportStats>
where
    R: BufRead,
    F: FnMut(u64),
{
    let mut stats = ImportStats::default();
    let mut batch = Vec::with_capacity(BATCH_SIZE);

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        progress(line.len() as u64 + 1);

        match parse_line(&line) {
            Ok(Some(record)) => {
                stats.lines_read += 1;
                batch.push(record);
            }
            Ok(None) => continue,
            Err(e) => {
                stats.lines_read += 1;
                stats.lines_skipped += 1;
                tracing::warn!(line = idx + 1, error = %e, "Skipping malformed line");
                continue;
            }
        }

        if batch.len() >= BATCH_SIZE {
            stats.records_inserted += db.insert_records(source, &batch)?;
            batch.clear();
        }
    }

    if !batch.is_empty() {
        stats.records_inserted += db.insert_records(source, &batch)?;
    }

    Ok(stats)
}

/// Import a JSON-lines file and record the run.
pub fn import_file<F>(
    db: &Database,
    source: RecordSource,
    path: &Path,
    progress: F,
) -> Result<ImportRun>
where
    F: FnMut(u64),
{
    let started_at = Utc::now();
    let file = File::open(path)?;
    let stats = import_reader(db, source, BufReader::new(file), progress)?;

    let run = ImportRun {
        id: uuid::Uuid::new_v4().to_string(),
        source,
        source_file: path.display().to_string(),
        started_at,
        finished_at: Utc::now(),
        records_inserted: stats.records_inserted as i64,
        lines_skipped: stats.lines_skipped as i64,
    };
    db.insert_import_run(&run)?;

    tracing::info!(
        run_id = %run.id,
        source = %source,
        file = %run.source_file,
        inserted = run.records_inserted,
        skipped = run.lines_skipped,
        "Import complete"
    );
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_source_from_path() {
        assert_eq!(
            source_from_path(Path::new("/tmp/trade.jsonl")),
            Some(RecordSource::Trade)
        );
        assert_eq!(
            source_from_path(Path::new("credit_ledger.jsonl")),
            Some(RecordSource::CreditLedger)
        );
        assert_eq!(source_from_path(Path::new("export.jsonl")), None);
    }

    #[test]
    fn test_parse_line() {
        assert!(parse_line("   ").unwrap().is_none());
        let record = parse_line(
            r#"{"entity_id":"poster","occurred_at":"2024-01-01T02:00:00Z","metric_value":1}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(record.entity_id, "poster");
        assert_eq!(record.metric_value, Some(1.0));

        assert!(parse_line("{not json").is_err());
        assert!(parse_line(r#"{"entity_id":"","occurred_at":"2024-01-01T02:00:00Z"}"#).is_err());
    }

    #[test]
    fn test_import_reader_counts_malformed_lines() {
        let db = db();
        let input = concat!(
            r#"{"entity_id":"vip","occurred_at":"2024-01-01T02:00:00Z","metric_value":99}"#,
            "\n",
            "\n",
            "garbage\n",
            r#"{"entity_id":"vip","occurred_at":"2024-01-02T02:00:00Z","metric_value":199}"#,
            "\n",
        );

        let mut consumed = 0;
        let stats = import_reader(&db, RecordSource::Trade, Cursor::new(input), |n| {
            consumed += n
        })
        .unwrap();

        assert_eq!(
            stats,
            ImportStats {
                lines_read: 3,
                records_inserted: 2,
                lines_skipped: 1,
            }
        );
        assert_eq!(consumed, input.len() as u64);
        assert_eq!(db.count_records(Some(RecordSource::Trade)).unwrap(), 2);
    }

    #[test]
    fn test_import_file_records_run() {
        let db = db();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"entity_id":"u1","occurred_at":"2024-01-01T02:00:00Z","metric_value":5}}"#
        )
        .unwrap();

        let run = import_file(&db, RecordSource::Commission, file.path(), |_| {}).unwrap();
        assert_eq!(run.records_inserted, 1);
        assert_eq!(run.lines_skipped, 0);
        assert_eq!(db.count_import_runs().unwrap(), 1);
    }
}
