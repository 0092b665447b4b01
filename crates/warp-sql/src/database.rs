//! The connection-driver contract the SQL dataset executes through.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use warp_core::{Job, OrderedColumns, Raster, Result, Value};

use crate::dialect::Dialect;

/// A fully drained query result.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Column metadata as reported by the backend.
    pub columns: OrderedColumns,
    /// The result rows.
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// The result as a frozen raster.
    #[must_use]
    pub fn into_raster(self) -> Raster {
        Raster::new(self.columns, self.rows).freeze()
    }
}

/// A connection to one SQL backend.
///
/// Implementations own their connection behind a mutex and execute
/// statements serially: only one active result set is permitted per
/// connection, so `query` drains the result before returning.
#[async_trait]
pub trait Database: fmt::Debug + Send + Sync {
    /// The dialect this backend speaks.
    fn dialect(&self) -> Arc<dyn Dialect>;

    /// Connection identity. Two datasets may join or union in SQL
    /// only when their identities match (same server, same session).
    fn identity(&self) -> String;

    /// Runs a query and drains its result.
    async fn query(&self, sql: &str, job: &Job) -> Result<QueryResult>;

    /// Executes a statement, returning the number of affected rows.
    async fn execute(&self, sql: &str, job: &Job) -> Result<u64>;

    /// The smallest set of columns that uniquely identifies a row of
    /// `table`, or an error when none exists. Discovery is
    /// dialect-specific (`PRAGMA table_info`, `information_schema`,
    /// `SHOW INDEX`).
    async fn table_identifier(&self, table: &str, job: &Job) -> Result<OrderedColumns>;
}

/// A shared database handle.
pub type DatabaseRef = Arc<dyn Database>;
