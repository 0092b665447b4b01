//! The pushdown dataset: operators compose SQL fragments.
//!
//! Every operator either produces a new fragment or, when the dialect
//! cannot represent a construct, falls back to the stream path so the
//! raster/stream evaluators take over with identical semantics.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use warp_core::{
    Column, Expression, Job, Order, OrderedColumns, Raster, Result, ValueFuture,
};
use warp_engine::{
    Calculation, Dataset, DatasetRef, JoinClause, Operation, RasterStream, StreamDataset,
    StreamRef,
};

use crate::database::DatabaseRef;
use crate::dialect::Dialect;
use crate::expression::sql_expression;
use crate::fragment::{derived_alias, SqlFragment, SqlStage};

/// A dataset whose operators push down to a SQL backend.
#[derive(Debug, Clone)]
pub struct SqlDataset {
    database: DatabaseRef,
    dialect: Arc<dyn Dialect>,
    fragment: SqlFragment,
    columns: OrderedColumns,
}

impl SqlDataset {
    /// A dataset reading a whole table.
    #[must_use]
    pub fn table(database: DatabaseRef, name: &str, columns: OrderedColumns) -> Self {
        let dialect = database.dialect();
        let fragment = SqlFragment::table(name, dialect.as_ref());
        Self {
            database,
            dialect,
            fragment,
            columns,
        }
    }

    /// The statement this dataset would execute.
    #[must_use]
    pub fn sql_string(&self) -> String {
        self.fragment.sql_string()
    }

    fn derived(&self, fragment: SqlFragment, columns: OrderedColumns) -> Self {
        Self {
            database: Arc::clone(&self.database),
            dialect: Arc::clone(&self.dialect),
            fragment,
            columns,
        }
    }

    /// Attempts to express one operator as SQL. `None` means the
    /// construct is unrepresentable here and the caller must fall
    /// back.
    #[allow(clippy::too_many_lines)]
    fn push_down(&self, operation: &Operation) -> Option<Self> {
        let dialect = self.dialect.as_ref();
        match operation {
            Operation::Filter(condition) => {
                let condition = condition.prepare();
                if condition.depends_on_foreign() {
                    return None;
                }
                let stage = self.fragment.filter_stage();
                let base = self.fragment.advanced(stage, dialect);
                let emitted = sql_expression(&condition, dialect, base.alias(), None)?;
                let keyword = if stage == SqlStage::Having {
                    "HAVING"
                } else {
                    "WHERE"
                };
                Some(self.derived(
                    base.appended(stage, &format!("{keyword} {emitted}"), dialect),
                    self.columns.clone(),
                ))
            }
            Operation::Calculate(calculation) => {
                let output = self.columns.union(&calculation.targets());
                self.projected(&output, calculation)
            }
            Operation::CalculateThenSelect {
                columns,
                calculation,
            } => {
                let available = self.columns.union(&calculation.targets());
                let kept: OrderedColumns = columns
                    .iter()
                    .filter(|column| available.contains(column))
                    .cloned()
                    .collect();
                self.projected(&kept, calculation)
            }
            Operation::Select(columns) => {
                let kept: OrderedColumns = columns
                    .iter()
                    .filter(|column| self.columns.contains(column))
                    .cloned()
                    .collect();
                self.projected(&kept, &Calculation::new())
            }
            Operation::Sort(orders) => {
                let base = self.fragment.advanced(SqlStage::Order, dialect);
                let parts = self.order_list(orders, base.alias())?;
                Some(self.derived(
                    base.appended(SqlStage::Order, &format!("ORDER BY {parts}"), dialect),
                    self.columns.clone(),
                ))
            }
            Operation::Distinct => Some(self.derived(
                self.fragment.with_select(true, None, dialect),
                self.columns.clone(),
            )),
            Operation::Limit(count) => {
                let base = self.fragment.advanced(SqlStage::Limit, dialect);
                Some(self.derived(
                    base.appended(SqlStage::Limit, &dialect.limit_clause(*count), dialect),
                    self.columns.clone(),
                ))
            }
            Operation::Offset(count) => {
                let base = self.fragment.advanced(SqlStage::Limit, dialect);
                Some(self.derived(
                    base.appended(SqlStage::Limit, &dialect.offset_clause(*count), dialect),
                    self.columns.clone(),
                ))
            }
            Operation::Random(count) => {
                let random = dialect.random_function()?;
                let base = self.fragment.advanced(SqlStage::Order, dialect);
                let ordered = base.appended(SqlStage::Order, &format!("ORDER BY {random}"), dialect);
                Some(self.derived(
                    ordered.appended(SqlStage::Limit, &dialect.limit_clause(*count), dialect),
                    self.columns.clone(),
                ))
            }
            Operation::Aggregate { groups, values } => self.aggregated(groups, values),
            Operation::Join(clause) => self.joined(clause),
            Operation::Union(other) => self.unioned(other),
            Operation::Transpose
            | Operation::Pivot { .. }
            | Operation::Flatten { .. } => None,
        }
    }

    /// SELECT projection shared by calculate, select and their fused
    /// form: `output` lists the emitted columns in order; calculated
    /// targets emit their expression, the rest pass through qualified.
    fn projected(&self, output: &OrderedColumns, calculation: &Calculation) -> Option<Self> {
        let dialect = self.dialect.as_ref();
        let base = self.fragment.select_base(dialect);
        let alias = base.alias().to_string();
        let mut parts = Vec::with_capacity(output.len());
        for column in output.iter() {
            let calculated = calculation
                .entries()
                .iter()
                .find(|(target, _)| target == column);
            match calculated {
                Some((_, expression)) => {
                    let emitted =
                        sql_expression(&expression.prepare(), dialect, &alias, None)?;
                    parts.push(format!(
                        "{emitted} AS {}",
                        dialect.quote_identifier(column.name())
                    ));
                }
                None => parts.push(dialect.qualify(&alias, column.name())),
            }
        }
        let fragment = base.with_select(false, Some(&parts.join(", ")), dialect);
        Some(self.derived(fragment, output.clone()))
    }

    fn order_list(&self, orders: &[Order], alias: &str) -> Option<String> {
        let dialect = self.dialect.as_ref();
        let mut parts = Vec::with_capacity(orders.len());
        for order in orders {
            let emitted = sql_expression(&order.expression.prepare(), dialect, alias, None)?;
            let direction = if order.ascending { "ASC" } else { "DESC" };
            parts.push(format!("{emitted} {direction}"));
        }
        if parts.is_empty() {
            return None;
        }
        Some(parts.join(", "))
    }

    fn aggregated(
        &self,
        groups: &[(Column, Expression)],
        values: &[(Column, warp_core::Aggregation)],
    ) -> Option<Self> {
        let dialect = self.dialect.as_ref();
        let base = self.fragment.advanced(SqlStage::Group, dialect);
        let alias = base.alias().to_string();

        let mut group_parts = Vec::with_capacity(groups.len());
        let mut select_parts = Vec::with_capacity(groups.len() + values.len());
        for (column, expression) in groups {
            let emitted = sql_expression(&expression.prepare(), dialect, &alias, None)?;
            select_parts.push(format!(
                "{emitted} AS {}",
                dialect.quote_identifier(column.name())
            ));
            group_parts.push(emitted);
        }
        for (column, aggregation) in values {
            let map = sql_expression(&aggregation.map.prepare(), dialect, &alias, None)?;
            let emitted = dialect.aggregation(aggregation.reduce, &map)?;
            select_parts.push(format!(
                "{emitted} AS {}",
                dialect.quote_identifier(column.name())
            ));
        }

        let grouped = if group_parts.is_empty() {
            base
        } else {
            base.appended(
                SqlStage::Group,
                &format!("GROUP BY {}", group_parts.join(", ")),
                dialect,
            )
        };
        let fragment = grouped.with_select(false, Some(&select_parts.join(", ")), dialect);
        let columns: OrderedColumns = groups
            .iter()
            .map(|(column, _)| column.clone())
            .chain(values.iter().map(|(column, _)| column.clone()))
            .collect();
        Some(self.derived(fragment, columns))
    }

    fn joined(&self, clause: &JoinClause) -> Option<Self> {
        let dialect = self.dialect.as_ref();
        let foreign = clause.foreign.as_any().downcast_ref::<Self>()?;
        if foreign.database.identity() != self.database.identity() {
            return None;
        }
        let keyword = dialect.join_keyword(clause.join_type)?;
        let condition = clause.condition.prepare();

        let base = self.fragment.advanced(SqlStage::Join, dialect);
        let inner = foreign.fragment.sql_string();
        let foreign_alias = derived_alias(&inner);
        let emitted = sql_expression(&condition, dialect, base.alias(), Some(&foreign_alias))?;
        let join_clause = format!(
            "{keyword} ({inner}) AS {} ON {emitted}",
            dialect.quote_identifier(&foreign_alias)
        );
        let joined = base.appended(SqlStage::Join, &join_clause, dialect);

        // Pin the output schema: left columns, then foreign columns
        // that do not collide.
        let alias = joined.alias().to_string();
        let mut columns = self.columns.clone();
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|column| dialect.qualify(&alias, column.name()))
            .collect();
        for column in foreign.columns.iter() {
            if columns.insert(column.clone()) {
                parts.push(dialect.qualify(&foreign_alias, column.name()));
            }
        }
        let fragment = joined.with_select(false, Some(&parts.join(", ")), dialect);
        Some(self.derived(fragment, columns))
    }

    fn unioned(&self, other: &DatasetRef) -> Option<Self> {
        let dialect = self.dialect.as_ref();
        if !dialect.supports_union() {
            return None;
        }
        let foreign = other.as_any().downcast_ref::<Self>()?;
        if foreign.database.identity() != self.database.identity() {
            return None;
        }
        // UNION is positional; require an identical header.
        if foreign.columns != self.columns {
            return None;
        }
        let fragment = self.fragment.with_union(&foreign.fragment.sql_string());
        Some(self.derived(fragment, self.columns.clone()))
    }
}

#[async_trait]
impl Dataset for SqlDataset {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn columns(&self, _job: &Job) -> Result<OrderedColumns> {
        Ok(self.columns.clone())
    }

    async fn raster(&self, job: &Job) -> Result<Arc<Raster>> {
        let sql = self.fragment.sql_string();
        debug!(%sql, "executing pushdown query");
        let result = self.database.query(&sql, job).await?;
        Ok(Arc::new(result.into_raster()))
    }

    fn stream(&self) -> StreamRef {
        let database = Arc::clone(&self.database);
        let sql = self.fragment.sql_string();
        let future = Arc::new(ValueFuture::new(move |job| async move {
            match database.query(&sql, &job).await {
                Ok(result) => Ok(Arc::new(result.into_raster())),
                Err(error) => Err(Arc::new(error)),
            }
        }));
        Arc::new(RasterStream::new(future))
    }

    fn apply(self: Arc<Self>, operation: Operation) -> DatasetRef {
        match self.push_down(&operation) {
            Some(pushed) => Arc::new(pushed),
            None => {
                debug!(
                    operation = operation.name(),
                    dialect = self.dialect.name(),
                    "pushdown unavailable, falling back to the stream path"
                );
                let streamed: DatasetRef = Arc::new(StreamDataset::new(self.stream()));
                streamed.apply(operation)
            }
        }
    }
}
