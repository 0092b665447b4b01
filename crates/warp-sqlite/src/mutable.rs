//! Warehouse and mutable-dataset implementation over SQLite.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::Row as _;
use tracing::debug;

use warp_core::{Column, Job, OrderedColumns, Result, Value, WarpError, REFERENCE_UNIX_OFFSET};
use warp_engine::{Dataset, DatasetRef};
use warp_sql::{
    mapped_row, Database, DatabaseRef, Dialect, MutableDataset, Mutation, MutationKind,
    SqlDataset, Warehouse, WarehouseMutation,
};

use crate::database::{backend, SqliteDatabase};

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

/// Binds one value as a statement parameter. Dates bind as UNIX
/// seconds; Empty and Invalid bind as NULL.
fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::String(s) => query.bind(s.clone()),
        Value::Int(i) => query.bind(*i),
        Value::Double(d) => query.bind(*d),
        Value::Bool(b) => query.bind(*b),
        Value::Date(d) => query.bind(d + REFERENCE_UNIX_OFFSET),
        Value::Blob(b) => query.bind(b.clone()),
        Value::Empty | Value::Invalid => query.bind(Option::<i64>::None),
    }
}

/// A mutable SQLite table.
#[derive(Debug)]
pub struct SqliteMutableDataset {
    database: Arc<SqliteDatabase>,
    table: String,
    columns: OrderedColumns,
}

impl SqliteMutableDataset {
    /// Opens a table, reading its schema. Fails when the table does
    /// not exist.
    pub async fn open(database: Arc<SqliteDatabase>, table: &str) -> Result<Self> {
        let dialect = database.dialect();
        let sql = format!("PRAGMA table_info({})", dialect.quote_identifier(table));
        let rows = sqlx::query(&sql)
            .fetch_all(database.pool())
            .await
            .map_err(backend)?;
        if rows.is_empty() {
            return Err(WarpError::Schema(format!("no such table: {table}")));
        }
        let mut columns = OrderedColumns::new();
        for row in &rows {
            let name: String = row.try_get("name").map_err(backend)?;
            columns.insert(Column::new(name));
        }
        Ok(Self {
            database,
            table: table.to_string(),
            columns,
        })
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        self.database.dialect()
    }

    fn quoted_table(&self) -> String {
        self.dialect().quote_identifier(&self.table)
    }

    async fn insert(
        &self,
        raster: &warp_core::Raster,
        mapping: &[(Column, Column)],
        job: &Job,
    ) -> Result<()> {
        let dialect = self.dialect();
        let column_list: Vec<String> = self
            .columns
            .iter()
            .map(|column| dialect.quote_identifier(column.name()))
            .collect();
        let placeholders: Vec<&str> = self.columns.iter().map(|_| "?").collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quoted_table(),
            column_list.join(", "),
            placeholders.join(", ")
        );
        let shared = raster.shared_columns();
        for index in 0..raster.row_count() {
            if job.is_cancelled() {
                return Ok(());
            }
            let source = raster.row(index, &shared);
            let values = mapped_row(&self.columns, mapping, &source);
            let mut query = sqlx::query(&sql);
            for value in &values {
                query = bind_value(query, value);
            }
            query.execute(self.database.pool()).await.map_err(backend)?;
        }
        Ok(())
    }

    async fn alter(&self, target: &OrderedColumns, job: &Job) -> Result<()> {
        let dialect = self.dialect();
        for column in target.iter() {
            if !self.columns.contains(column) {
                let sql = format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    self.quoted_table(),
                    dialect.quote_identifier(column.name())
                );
                self.database.execute(&sql, job).await?;
            }
        }
        for column in self.columns.iter() {
            if !target.contains(column) {
                let sql = format!(
                    "ALTER TABLE {} DROP COLUMN {}",
                    self.quoted_table(),
                    dialect.quote_identifier(column.name())
                );
                self.database.execute(&sql, job).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MutableDataset for SqliteMutableDataset {
    fn can_perform_mutation(&self, kind: MutationKind) -> bool {
        // Rows in a SQL table have no stable position, so positional
        // edits are rejected up front.
        !matches!(kind, MutationKind::Edit)
    }

    #[allow(clippy::too_many_lines)]
    async fn perform_mutation(&self, mutation: Mutation, job: &Job) -> Result<()> {
        debug!(kind = ?mutation.kind(), table = %self.table, "mutation");
        if !self.can_perform_mutation(mutation.kind()) {
            return Err(WarpError::Contract(format!(
                "mutation {:?} is not supported on table {}",
                mutation.kind(),
                self.table
            )));
        }
        let dialect = self.dialect();
        match mutation {
            Mutation::Truncate => {
                self.database
                    .execute(&format!("DELETE FROM {}", self.quoted_table()), job)
                    .await?;
            }
            Mutation::Drop => {
                self.database
                    .execute(&format!("DROP TABLE {}", self.quoted_table()), job)
                    .await?;
            }
            Mutation::Insert { raster, mapping } => {
                self.insert(&raster, &mapping, job).await?;
            }
            Mutation::Alter { columns } => {
                self.alter(&columns, job).await?;
            }
            Mutation::Rename { from, to } => {
                let sql = format!(
                    "ALTER TABLE {} RENAME COLUMN {} TO {}",
                    self.quoted_table(),
                    dialect.quote_identifier(from.name()),
                    dialect.quote_identifier(to.name())
                );
                self.database.execute(&sql, job).await?;
            }
            Mutation::Update {
                key,
                column,
                old,
                new,
            } => {
                if key.is_empty() {
                    return Err(WarpError::Contract(
                        "update requires a non-empty identifying key".to_string(),
                    ));
                }
                let mut conditions: Vec<String> = key
                    .iter()
                    .map(|(c, _)| format!("{} = ?", dialect.quote_identifier(c.name())))
                    .collect();
                conditions.push(format!("{} = ?", dialect.quote_identifier(column.name())));
                let sql = format!(
                    "UPDATE {} SET {} = ? WHERE {}",
                    self.quoted_table(),
                    dialect.quote_identifier(column.name()),
                    conditions.join(" AND ")
                );
                let mut query = sqlx::query(&sql);
                query = bind_value(query, &new);
                for (_, value) in &key {
                    query = bind_value(query, value);
                }
                query = bind_value(query, &old);
                query.execute(self.database.pool()).await.map_err(backend)?;
            }
            Mutation::Delete { keys } => {
                for key in keys {
                    if job.is_cancelled() {
                        return Ok(());
                    }
                    if key.is_empty() {
                        return Err(WarpError::Contract(
                            "delete requires a non-empty identifying key".to_string(),
                        ));
                    }
                    let conditions: Vec<String> = key
                        .iter()
                        .map(|(c, _)| format!("{} = ?", dialect.quote_identifier(c.name())))
                        .collect();
                    let sql = format!(
                        "DELETE FROM {} WHERE {}",
                        self.quoted_table(),
                        conditions.join(" AND ")
                    );
                    let mut query = sqlx::query(&sql);
                    for (_, value) in &key {
                        query = bind_value(query, value);
                    }
                    query.execute(self.database.pool()).await.map_err(backend)?;
                }
            }
            Mutation::Edit { .. } => {
                return Err(WarpError::Contract(
                    "positional edits are not supported on SQL tables".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn identifier(&self, job: &Job) -> Result<OrderedColumns> {
        self.database.table_identifier(&self.table, job).await
    }

    fn dataset(&self) -> DatasetRef {
        Arc::new(SqlDataset::table(
            Arc::clone(&self.database) as DatabaseRef,
            &self.table,
            self.columns.clone(),
        ))
    }
}

/// A SQLite database as a storage target.
#[derive(Debug)]
pub struct SqliteWarehouse {
    database: Arc<SqliteDatabase>,
}

impl SqliteWarehouse {
    /// Wraps a database as a warehouse.
    #[must_use]
    pub const fn new(database: Arc<SqliteDatabase>) -> Self {
        Self { database }
    }
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    fn has_fixed_columns(&self) -> bool {
        true
    }

    fn can_perform_mutation(&self, mutation: &WarehouseMutation) -> bool {
        let WarehouseMutation::Create { name, .. } = mutation;
        !name.is_empty()
    }

    async fn perform_mutation(&self, mutation: WarehouseMutation, job: &Job) -> Result<()> {
        if !self.can_perform_mutation(&mutation) {
            return Err(WarpError::Contract(
                "warehouse cannot perform this mutation".to_string(),
            ));
        }
        let WarehouseMutation::Create { name, source } = mutation;
        let dialect = self.database.dialect();
        let columns = source.columns(job).await?;
        let column_list: Vec<String> = columns
            .iter()
            .map(|column| dialect.quote_identifier(column.name()))
            .collect();
        // SQLite columns need no declared type.
        let create = format!(
            "CREATE TABLE {} ({})",
            dialect.quote_identifier(&name),
            column_list.join(", ")
        );
        self.database.execute(&create, job).await?;

        let raster = source.raster(job).await?;
        let mapping: Vec<(Column, Column)> = columns
            .iter()
            .map(|column| (column.clone(), column.clone()))
            .collect();
        let table = SqliteMutableDataset::open(Arc::clone(&self.database), &name).await?;
        table
            .perform_mutation(
                Mutation::Insert {
                    raster: (*raster).clone(),
                    mapping,
                },
                job,
            )
            .await
    }
}
