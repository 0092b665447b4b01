//! Per-operator stream transformer stages.
//!
//! A transformer wraps an upstream stream and rewrites each batch as
//! it passes through. Operators without a transformer (sort,
//! aggregate, distinct, pivot, transpose, union) have no incremental
//! form and materialize instead.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell};

use warp_core::{Column, Expression, Job, OrderedColumns, Reservoir, Result, Row, Value};

use crate::dataset::{Calculation, Dataset, JoinClause, Operation};
use crate::raster_ops::{
    calculate_row, calculated_columns, flatten_columns, flatten_row, select_columns, JoinIndex,
};
use crate::stream::{Stream, StreamBatch, StreamRef, StreamStatus};

/// The transformer stage for an operation, when one exists.
pub(crate) fn transform(stream: StreamRef, operation: &Operation) -> Option<StreamRef> {
    match operation {
        Operation::Filter(condition) => Some(Arc::new(FilterTransformer::new(
            stream,
            condition.prepare(),
        ))),
        Operation::Calculate(calculation) => Some(Arc::new(CalculateTransformer::new(
            stream,
            calculation.clone(),
        ))),
        Operation::Select(columns) => {
            Some(Arc::new(SelectTransformer::new(stream, columns.clone())))
        }
        Operation::CalculateThenSelect {
            columns,
            calculation,
        } => {
            let calculated: StreamRef =
                Arc::new(CalculateTransformer::new(stream, calculation.clone()));
            Some(Arc::new(SelectTransformer::new(
                calculated,
                columns.clone(),
            )))
        }
        Operation::Limit(count) => Some(Arc::new(LimitTransformer::new(stream, *count))),
        Operation::Offset(count) => Some(Arc::new(OffsetTransformer::new(stream, *count))),
        Operation::Random(count) => Some(Arc::new(RandomTransformer::new(stream, *count))),
        Operation::Flatten {
            value_column,
            name_column,
            row_column,
            row_identifier,
        } => Some(Arc::new(FlattenTransformer::new(
            stream,
            value_column.clone(),
            name_column.clone(),
            row_column.clone(),
            row_identifier.clone(),
        ))),
        Operation::Join(clause) => Some(Arc::new(JoinTransformer::new(stream, clause.clone()))),
        _ => None,
    }
}

/// Shared upstream-header cache.
#[derive(Debug, Default)]
struct Header(OnceCell<Arc<OrderedColumns>>);

impl Header {
    async fn of(&self, upstream: &StreamRef, job: &Job) -> Result<Arc<OrderedColumns>> {
        self.0
            .get_or_try_init(|| async { upstream.columns(job).await.map(Arc::new) })
            .await
            .map(Arc::clone)
    }
}

/// Drops rows whose condition is not `Bool(true)`.
#[derive(Debug)]
pub struct FilterTransformer {
    upstream: StreamRef,
    condition: Expression,
    header: Header,
}

impl FilterTransformer {
    fn new(upstream: StreamRef, condition: Expression) -> Self {
        Self {
            upstream,
            condition,
            header: Header::default(),
        }
    }
}

#[async_trait]
impl Stream for FilterTransformer {
    async fn columns(&self, job: &Job) -> Result<OrderedColumns> {
        Ok((*self.header.of(&self.upstream, job).await?).clone())
    }

    async fn fetch(&self, job: &Job) -> Result<StreamBatch> {
        let header = self.header.of(&self.upstream, job).await?;
        let mut batch = self.upstream.fetch(job).await?;
        batch.rows = batch
            .rows
            .into_iter()
            .filter_map(|values| {
                let row = Row::new(values, Arc::clone(&header));
                if self.condition.apply_row(&row) == Value::Bool(true) {
                    Some(row.into_values())
                } else {
                    None
                }
            })
            .collect();
        Ok(batch)
    }

    fn clone_stream(&self) -> StreamRef {
        Arc::new(Self::new(
            self.upstream.clone_stream(),
            self.condition.clone(),
        ))
    }
}

/// Adds calculated columns to every row.
#[derive(Debug)]
pub struct CalculateTransformer {
    upstream: StreamRef,
    calculation: Calculation,
    header: Header,
    output: OnceCell<OrderedColumns>,
}

impl CalculateTransformer {
    fn new(upstream: StreamRef, calculation: Calculation) -> Self {
        Self {
            upstream,
            calculation,
            header: Header::default(),
            output: OnceCell::new(),
        }
    }

    async fn output(&self, job: &Job) -> Result<OrderedColumns> {
        let upstream = self.header.of(&self.upstream, job).await?;
        self.output
            .get_or_try_init(|| async {
                Ok(calculated_columns(&upstream, &self.calculation))
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl Stream for CalculateTransformer {
    async fn columns(&self, job: &Job) -> Result<OrderedColumns> {
        self.output(job).await
    }

    async fn fetch(&self, job: &Job) -> Result<StreamBatch> {
        let header = self.header.of(&self.upstream, job).await?;
        let output = self.output(job).await?;
        let mut batch = self.upstream.fetch(job).await?;
        batch.rows = batch
            .rows
            .into_iter()
            .map(|values| {
                let row = Row::new(values, Arc::clone(&header));
                calculate_row(&row, &output, &self.calculation)
            })
            .collect();
        Ok(batch)
    }

    fn clone_stream(&self) -> StreamRef {
        Arc::new(Self::new(
            self.upstream.clone_stream(),
            self.calculation.clone(),
        ))
    }
}

#[derive(Debug, Clone)]
struct Projection {
    columns: OrderedColumns,
    indices: Vec<usize>,
}

/// Keeps only the selected columns.
#[derive(Debug)]
pub struct SelectTransformer {
    upstream: StreamRef,
    wanted: Vec<Column>,
    projection: OnceCell<Projection>,
}

impl SelectTransformer {
    fn new(upstream: StreamRef, wanted: Vec<Column>) -> Self {
        Self {
            upstream,
            wanted,
            projection: OnceCell::new(),
        }
    }

    async fn projection(&self, job: &Job) -> Result<Projection> {
        self.projection
            .get_or_try_init(|| async {
                let upstream = self.upstream.columns(job).await?;
                let columns = select_columns(&upstream, &self.wanted);
                let indices = columns
                    .iter()
                    .filter_map(|column| upstream.index_of(column))
                    .collect();
                Ok(Projection { columns, indices })
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl Stream for SelectTransformer {
    async fn columns(&self, job: &Job) -> Result<OrderedColumns> {
        Ok(self.projection(job).await?.columns)
    }

    async fn fetch(&self, job: &Job) -> Result<StreamBatch> {
        let projection = self.projection(job).await?;
        let mut batch = self.upstream.fetch(job).await?;
        batch.rows = batch
            .rows
            .into_iter()
            .map(|values| {
                projection
                    .indices
                    .iter()
                    .map(|&index| values.get(index).cloned().unwrap_or(Value::Empty))
                    .collect()
            })
            .collect();
        Ok(batch)
    }

    fn clone_stream(&self) -> StreamRef {
        Arc::new(Self::new(self.upstream.clone_stream(), self.wanted.clone()))
    }
}

/// Stops after n rows. Fetches serialize through the row budget so
/// wavefronts cannot overshoot the limit.
#[derive(Debug)]
pub struct LimitTransformer {
    upstream: StreamRef,
    limit: usize,
    remaining: Mutex<usize>,
}

impl LimitTransformer {
    fn new(upstream: StreamRef, limit: usize) -> Self {
        Self {
            upstream,
            limit,
            remaining: Mutex::new(limit),
        }
    }
}

#[async_trait]
impl Stream for LimitTransformer {
    async fn columns(&self, job: &Job) -> Result<OrderedColumns> {
        self.upstream.columns(job).await
    }

    async fn fetch(&self, job: &Job) -> Result<StreamBatch> {
        let mut remaining = self.remaining.lock().await;
        if *remaining == 0 {
            return Ok(StreamBatch::finished(0));
        }
        let mut batch = self.upstream.fetch(job).await?;
        let take = batch.rows.len().min(*remaining);
        batch.rows.truncate(take);
        *remaining -= take;
        if *remaining == 0 {
            batch.status = StreamStatus::Finished;
        }
        Ok(batch)
    }

    fn clone_stream(&self) -> StreamRef {
        Arc::new(Self::new(self.upstream.clone_stream(), self.limit))
    }
}

/// Skips the first n rows.
#[derive(Debug)]
pub struct OffsetTransformer {
    upstream: StreamRef,
    offset: usize,
    remaining: Mutex<usize>,
}

impl OffsetTransformer {
    fn new(upstream: StreamRef, offset: usize) -> Self {
        Self {
            upstream,
            offset,
            remaining: Mutex::new(offset),
        }
    }
}

#[async_trait]
impl Stream for OffsetTransformer {
    async fn columns(&self, job: &Job) -> Result<OrderedColumns> {
        self.upstream.columns(job).await
    }

    async fn fetch(&self, job: &Job) -> Result<StreamBatch> {
        let mut remaining = self.remaining.lock().await;
        let mut batch = self.upstream.fetch(job).await?;
        if *remaining > 0 {
            let skip = batch.rows.len().min(*remaining);
            batch.rows.drain(..skip);
            *remaining -= skip;
        }
        Ok(batch)
    }

    fn clone_stream(&self) -> StreamRef {
        Arc::new(Self::new(self.upstream.clone_stream(), self.offset))
    }
}

#[derive(Debug)]
struct RandomState {
    reservoir: Reservoir<Vec<Value>>,
    emitted: bool,
}

/// Replaces the stream with a uniform reservoir sample of n rows,
/// emitted once the upstream finishes.
#[derive(Debug)]
pub struct RandomTransformer {
    upstream: StreamRef,
    count: usize,
    state: Mutex<RandomState>,
}

impl RandomTransformer {
    fn new(upstream: StreamRef, count: usize) -> Self {
        Self {
            upstream,
            count,
            state: Mutex::new(RandomState {
                reservoir: Reservoir::new(count),
                emitted: false,
            }),
        }
    }
}

#[async_trait]
impl Stream for RandomTransformer {
    async fn columns(&self, job: &Job) -> Result<OrderedColumns> {
        self.upstream.columns(job).await
    }

    async fn fetch(&self, job: &Job) -> Result<StreamBatch> {
        let mut state = self.state.lock().await;
        if state.emitted {
            return Ok(StreamBatch::finished(0));
        }
        loop {
            if job.is_cancelled() {
                state.emitted = true;
                return Ok(StreamBatch::finished(0));
            }
            let batch = self.upstream.fetch(job).await?;
            state.reservoir.add(batch.rows);
            if batch.status == StreamStatus::Finished {
                break;
            }
        }
        state.emitted = true;
        Ok(StreamBatch {
            ordinal: 0,
            rows: state.reservoir.sample().to_vec(),
            status: StreamStatus::Finished,
        })
    }

    fn clone_stream(&self) -> StreamRef {
        Arc::new(Self::new(self.upstream.clone_stream(), self.count))
    }
}

/// Emits one row per cell.
#[derive(Debug)]
pub struct FlattenTransformer {
    upstream: StreamRef,
    value_column: Column,
    name_column: Option<Column>,
    row_column: Option<Column>,
    row_identifier: Option<Expression>,
    header: Header,
}

impl FlattenTransformer {
    fn new(
        upstream: StreamRef,
        value_column: Column,
        name_column: Option<Column>,
        row_column: Option<Column>,
        row_identifier: Option<Expression>,
    ) -> Self {
        Self {
            upstream,
            value_column,
            name_column,
            row_column,
            row_identifier,
            header: Header::default(),
        }
    }
}

#[async_trait]
impl Stream for FlattenTransformer {
    async fn columns(&self, _job: &Job) -> Result<OrderedColumns> {
        Ok(flatten_columns(
            &self.value_column,
            self.name_column.as_ref(),
            self.row_column.as_ref(),
        ))
    }

    async fn fetch(&self, job: &Job) -> Result<StreamBatch> {
        let header = self.header.of(&self.upstream, job).await?;
        let mut batch = self.upstream.fetch(job).await?;
        batch.rows = batch
            .rows
            .into_iter()
            .flat_map(|values| {
                let row = Row::new(values, Arc::clone(&header));
                flatten_row(
                    &row,
                    self.name_column.is_some(),
                    self.row_column.is_some(),
                    self.row_identifier.as_ref(),
                )
            })
            .collect();
        Ok(batch)
    }

    fn clone_stream(&self) -> StreamRef {
        Arc::new(Self::new(
            self.upstream.clone_stream(),
            self.value_column.clone(),
            self.name_column.clone(),
            self.row_column.clone(),
            self.row_identifier.clone(),
        ))
    }
}

/// Joins each batch against a fully materialized foreign dataset.
#[derive(Debug)]
pub struct JoinTransformer {
    upstream: StreamRef,
    clause: JoinClause,
    header: Header,
    index: OnceCell<Arc<JoinIndex>>,
}

impl JoinTransformer {
    fn new(upstream: StreamRef, clause: JoinClause) -> Self {
        Self {
            upstream,
            clause,
            header: Header::default(),
            index: OnceCell::new(),
        }
    }

    async fn index(&self, job: &Job) -> Result<Arc<JoinIndex>> {
        self.index
            .get_or_try_init(|| async {
                let left = self.header.of(&self.upstream, job).await?;
                let right = self.clause.foreign.raster(job).await?;
                Ok(Arc::new(JoinIndex::build(
                    &left,
                    right,
                    self.clause.join_type,
                    &self.clause.condition,
                )))
            })
            .await
            .map(Arc::clone)
    }
}

#[async_trait]
impl Stream for JoinTransformer {
    async fn columns(&self, job: &Job) -> Result<OrderedColumns> {
        Ok(self.index(job).await?.output_columns().clone())
    }

    async fn fetch(&self, job: &Job) -> Result<StreamBatch> {
        let header = self.header.of(&self.upstream, job).await?;
        let index = self.index(job).await?;
        let mut batch = self.upstream.fetch(job).await?;
        batch.rows = batch
            .rows
            .into_iter()
            .flat_map(|values| {
                let row = Row::new(values, Arc::clone(&header));
                index.join_row(&row)
            })
            .collect();
        Ok(batch)
    }

    fn clone_stream(&self) -> StreamRef {
        Arc::new(Self::new(self.upstream.clone_stream(), self.clause.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::to_raster;
    use warp_core::{BinaryOp, Raster, ValueFuture};

    fn source(rows: usize) -> StreamRef {
        let raster = Raster::new(
            OrderedColumns::from_names(["n"]),
            (0..rows).map(|i| vec![Value::Int(i as i64)]).collect(),
        )
        .freeze();
        Arc::new(crate::stream::RasterStream::new(Arc::new(
            ValueFuture::ready(Ok(Arc::new(raster))),
        )))
    }

    #[tokio::test]
    async fn test_filter_transformer() {
        let condition = Expression::binary(
            BinaryOp::Lt,
            Expression::sibling("n"),
            Expression::literal(Value::Int(5)),
        );
        let stream = transform(source(1000), &Operation::Filter(condition)).unwrap();
        let raster = to_raster(stream, &Job::new()).await.unwrap();
        assert_eq!(raster.row_count(), 5);
    }

    #[tokio::test]
    async fn test_limit_transformer_stops_early() {
        let stream = transform(source(10_000), &Operation::Limit(10)).unwrap();
        let raster = to_raster(stream, &Job::new()).await.unwrap();
        assert_eq!(raster.row_count(), 10);
        for i in 0..10 {
            assert_eq!(raster.value_at(i, 0), Value::Int(i as i64));
        }
    }

    #[tokio::test]
    async fn test_offset_transformer() {
        let stream = transform(source(600), &Operation::Offset(500)).unwrap();
        let raster = to_raster(stream, &Job::new()).await.unwrap();
        assert_eq!(raster.row_count(), 100);
        assert_eq!(raster.value_at(0, 0), Value::Int(500));
    }

    #[tokio::test]
    async fn test_random_transformer_samples_exactly() {
        let stream = transform(source(1000), &Operation::Random(7)).unwrap();
        let raster = to_raster(stream, &Job::new()).await.unwrap();
        assert_eq!(raster.row_count(), 7);
    }

    #[tokio::test]
    async fn test_calculate_transformer_appends_column() {
        let calculation = Calculation::new().with(
            "double",
            Expression::binary(
                BinaryOp::Mul,
                Expression::sibling("n"),
                Expression::literal(Value::Int(2)),
            ),
        );
        let stream = transform(source(3), &Operation::Calculate(calculation)).unwrap();
        let raster = to_raster(stream, &Job::new()).await.unwrap();
        assert_eq!(raster.column_count(), 2);
        assert_eq!(raster.value_at(2, 1), Value::Double(4.0));
    }

    #[tokio::test]
    async fn test_aggregate_has_no_transformer() {
        assert!(transform(
            source(1),
            &Operation::Aggregate {
                groups: vec![],
                values: vec![],
            }
        )
        .is_none());
    }
}
