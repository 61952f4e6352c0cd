//! Database layer for usagerank
//!
//! Local SQLite record store:
//! - Schema migrations
//! - Repository for inserting and range-querying raw records
//! - [`SqliteRecordStore`], the [`RecordFetcher`](crate::fetch::RecordFetcher) backed by it

pub mod repo;
pub mod schema;
pub mod store;

pub use repo::{Database, ImportRun};
pub use store::SqliteRecordStore;
