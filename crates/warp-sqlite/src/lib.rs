//! # warp-sqlite
//!
//! The reference SQLite backend for Warp: a sqlx-based connection
//! driver implementing the `warp-sql` [`Database`](warp_sql::Database)
//! contract, plus the warehouse and mutable-dataset implementations
//! with `PRAGMA table_info` identifier discovery.

mod database;
mod mutable;

pub use database::SqliteDatabase;
pub use mutable::{SqliteMutableDataset, SqliteWarehouse};
