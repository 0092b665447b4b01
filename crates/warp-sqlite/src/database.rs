//! The sqlx-backed SQLite connection driver.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column as _, Executor as _, Row as _, TypeInfo as _, ValueRef as _};
use tracing::debug;

use warp_core::{Column, Job, OrderedColumns, Result, Value, WarpError};
use warp_sql::{Database, Dialect, QueryResult, SqliteDialect};

/// Serializes connection initialization process-wide. Some native
/// client libraries are not thread-safe until their first connection
/// is fully set up; per-connection locking applies from then on.
static INIT_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// A SQLite database reachable through a connection URL.
///
/// The pool holds a single connection, so statements execute serially
/// and only one result set is ever active; `query` drains its result
/// before returning.
#[derive(Debug)]
pub struct SqliteDatabase {
    pool: SqlitePool,
    url: String,
}

impl SqliteDatabase {
    /// Opens a database. Use `sqlite::memory:` for an in-memory
    /// database.
    pub async fn connect(url: &str) -> Result<Self> {
        let _guard = INIT_LOCK.lock().await;
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .connect(url)
            .await
            .map_err(backend)?;
        Ok(Self {
            pool,
            url: url.to_string(),
        })
    }

    /// The underlying pool, for the mutation layer.
    pub(crate) const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Wraps a driver error as a backend error.
pub(crate) fn backend(error: sqlx::Error) -> WarpError {
    WarpError::Backend(error.to_string())
}

/// Decodes one cell by its declared storage class. NULL reads as
/// Empty; an undecodable cell reads as Invalid.
pub(crate) fn decode_value(row: &SqliteRow, index: usize) -> Value {
    let Ok(raw) = row.try_get_raw(index) else {
        return Value::Invalid;
    };
    if raw.is_null() {
        return Value::Empty;
    }
    match raw.type_info().name() {
        "INTEGER" => row
            .try_get::<i64, _>(index)
            .map_or(Value::Invalid, Value::Int),
        "REAL" => row
            .try_get::<f64, _>(index)
            .map_or(Value::Invalid, Value::Double),
        "BOOLEAN" => row
            .try_get::<bool, _>(index)
            .map_or(Value::Invalid, Value::Bool),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(index)
            .map_or(Value::Invalid, Value::Blob),
        _ => row
            .try_get::<String, _>(index)
            .map_or(Value::Invalid, Value::String),
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::new(SqliteDialect::new())
    }

    fn identity(&self) -> String {
        format!("sqlite:{}", self.url)
    }

    async fn query(&self, sql: &str, job: &Job) -> Result<QueryResult> {
        if job.is_cancelled() {
            return Ok(QueryResult {
                columns: OrderedColumns::new(),
                rows: Vec::new(),
            });
        }
        debug!(%sql, "sqlite query");
        let description = self.pool.describe(sql).await.map_err(backend)?;
        let columns: OrderedColumns = description
            .columns()
            .iter()
            .map(|column| Column::new(column.name()))
            .collect();
        let fetched = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        let rows = fetched
            .iter()
            .map(|row| {
                (0..columns.len())
                    .map(|index| decode_value(row, index))
                    .collect()
            })
            .collect();
        Ok(QueryResult { columns, rows })
    }

    async fn execute(&self, sql: &str, _job: &Job) -> Result<u64> {
        debug!(%sql, "sqlite execute");
        let result = sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn table_identifier(&self, table: &str, _job: &Job) -> Result<OrderedColumns> {
        let dialect = self.dialect();
        let sql = format!("PRAGMA table_info({})", dialect.quote_identifier(table));
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        // `pk` gives the 1-based position of a column within the
        // primary key, 0 for non-key columns.
        let mut keyed: Vec<(i64, String)> = Vec::new();
        for row in &rows {
            let position: i64 = row.try_get("pk").map_err(backend)?;
            if position > 0 {
                let name: String = row.try_get("name").map_err(backend)?;
                keyed.push((position, name));
            }
        }
        if keyed.is_empty() {
            return Err(WarpError::Schema(format!(
                "table {table} has no primary key"
            )));
        }
        keyed.sort_by_key(|(position, _)| *position);
        Ok(keyed.into_iter().map(|(_, name)| Column::new(name)).collect())
    }
}
