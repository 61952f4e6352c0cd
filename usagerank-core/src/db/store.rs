//! [`RecordFetcher`] over the local SQLite database.

use super::Database;
use crate::error::{Error, Result};
use crate::fetch::{FetchFilter, RecordFetcher};
use crate::types::RawRecord;
use async_trait::async_trait;
use std::sync::Arc;

/// Serves fetches from a [`Database`] on tokio's blocking pool.
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Arc<Database>,
}

impl SqliteRecordStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl RecordFetcher for SqliteRecordStore {
    async fn fetch(&self, filter: &FetchFilter) -> Result<Vec<RawRecord>> {
        let db = Arc::clone(&self.db);
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || db.query_records(&filter))
            .await
            .map_err(|e| Error::Internal(format!("record query task failed: {}", e)))?
    }
}
