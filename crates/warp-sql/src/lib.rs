//! # warp-sql
//!
//! The SQL pushdown substrate of Warp: a dialect abstraction over
//! SQLite, MySQL, PostgreSQL and CockroachDB, an ordered fragment
//! builder that preserves logical execution order through automatic
//! subquerying, and a generic [`SqlDataset`] that composes fragments
//! per operator and falls back to the stream path whenever a dialect
//! cannot represent a construct.
//!
//! Connection drivers implement the [`Database`] trait; the reference
//! SQLite driver lives in the `warp-sqlite` crate. Storage targets
//! implement [`Warehouse`] and [`MutableDataset`].

pub mod database;
pub mod dataset;
pub mod dialect;
pub mod expression;
pub mod fragment;
pub mod warehouse;

pub use database::{Database, DatabaseRef, QueryResult};
pub use dataset::SqlDataset;
pub use dialect::{
    CockroachDialect, Dialect, MysqlDialect, PostgresDialect, SqliteDialect,
};
pub use expression::sql_expression;
pub use fragment::{SqlFragment, SqlStage};
pub use warehouse::{
    mapped_row, MutableDataset, Mutation, MutationKind, RowKey, Warehouse, WarehouseMutation,
};
