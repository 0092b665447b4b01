//! The raster evaluator: every operator over in-memory data.
//!
//! Row-wise operators (filter, calculate, select, join, flatten) run
//! as parallel chunked maps that preserve source order; sort, limit,
//! offset and the combination passes of aggregate run serially.
//! Cancellation is polled every [`PROGRESS_INTERVAL`] rows and yields
//! an empty raster, never an error.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use warp_core::{
    Aggregation, Column, Expression, Job, Order, OrderedColumns, Raster, Result, Row, Value,
    PROGRESS_INTERVAL,
};

use crate::dataset::{Calculation, Dataset, JoinClause, JoinType, Operation};
use crate::parallel;

/// Applies one operator to a raster, producing a new frozen raster.
pub(crate) async fn apply(operation: &Operation, raster: &Raster, job: &Job) -> Result<Raster> {
    debug!(operation = operation.name(), rows = raster.row_count(), "raster operator");
    match operation {
        Operation::Filter(condition) => filter(raster, condition, job).await,
        Operation::Calculate(calculation) => calculate(raster, calculation, job).await,
        Operation::Select(columns) => select(raster, columns, job).await,
        Operation::CalculateThenSelect {
            columns,
            calculation,
        } => {
            let calculated = calculate(raster, calculation, job).await?;
            select(&calculated, columns, job).await
        }
        Operation::Sort(orders) => sort(raster, orders, job),
        Operation::Distinct => distinct(raster, job),
        Operation::Limit(count) => Ok(slice(raster, 0, *count)),
        Operation::Offset(count) => Ok(slice(raster, *count, usize::MAX)),
        Operation::Random(count) => random(raster, *count, job),
        Operation::Transpose => transpose(raster, job),
        Operation::Aggregate { groups, values } => aggregate(raster, groups, values, job),
        Operation::Join(clause) => join(raster, clause, job).await,
        Operation::Union(other) => {
            let foreign = other.raster(job).await?;
            union(raster, &foreign, job)
        }
        Operation::Pivot {
            horizontal,
            vertical,
            values,
        } => pivot(raster, horizontal, vertical, values, job),
        Operation::Flatten {
            value_column,
            name_column,
            row_column,
            row_identifier,
        } => {
            flatten(
                raster,
                value_column,
                name_column.as_ref(),
                row_column.as_ref(),
                row_identifier.as_ref(),
                job,
            )
            .await
        }
    }
}

/// An empty raster on cancellation, the computed rows otherwise.
fn finish(job: &Job, columns: OrderedColumns, rows: Vec<Vec<Value>>) -> Result<Raster> {
    if job.is_cancelled() {
        debug!("raster operator cancelled");
        return Ok(Raster::empty(columns).freeze());
    }
    Ok(Raster::new(columns, rows).freeze())
}

async fn filter(raster: &Raster, condition: &Expression, job: &Job) -> Result<Raster> {
    let condition = condition.prepare();
    let columns = raster.shared_columns();
    let kept = parallel::map_rows(
        job,
        "filter",
        Arc::clone(&columns),
        raster.rows().to_vec(),
        move |row| {
            if condition.apply_row(row) == Value::Bool(true) {
                vec![row.values().to_vec()]
            } else {
                Vec::new()
            }
        },
    )
    .await;
    finish(job, (*columns).clone(), kept)
}

/// The output header of a calculation step: source columns, then new
/// targets appended in calculation order.
pub(crate) fn calculated_columns(
    source: &OrderedColumns,
    calculation: &Calculation,
) -> OrderedColumns {
    source.union(&calculation.targets())
}

/// Evaluates one calculation step for a row. Every expression sees the
/// pre-batch row, so calculated columns do not observe each other.
pub(crate) fn calculate_row(
    row: &Row,
    output: &OrderedColumns,
    calculation: &Calculation,
) -> Vec<Value> {
    let mut values: Vec<Value> = (0..output.len()).map(|index| row.value_at(index)).collect();
    for (column, expression) in calculation.entries() {
        if let Some(index) = output.index_of(column) {
            values[index] = expression.apply_row(row);
        }
    }
    values
}

async fn calculate(raster: &Raster, calculation: &Calculation, job: &Job) -> Result<Raster> {
    let output = calculated_columns(raster.columns(), calculation);
    let prepared: Calculation = calculation
        .entries()
        .iter()
        .map(|(column, expression)| (column.clone(), expression.prepare()))
        .collect();
    let columns = raster.shared_columns();
    let output_header = output.clone();
    let rows = parallel::map_rows(
        job,
        "calculate",
        Arc::clone(&columns),
        raster.rows().to_vec(),
        move |row| vec![calculate_row(row, &output_header, &prepared)],
    )
    .await;
    finish(job, output, rows)
}

/// The selected header: requested columns that exist, in request
/// order.
pub(crate) fn select_columns(source: &OrderedColumns, wanted: &[Column]) -> OrderedColumns {
    wanted
        .iter()
        .filter(|column| source.contains(column))
        .cloned()
        .collect()
}

async fn select(raster: &Raster, wanted: &[Column], job: &Job) -> Result<Raster> {
    let selected = select_columns(raster.columns(), wanted);
    let indices: Vec<usize> = selected
        .iter()
        .filter_map(|column| raster.index_of_column(column))
        .collect();
    let columns = raster.shared_columns();
    let rows = parallel::map_rows(
        job,
        "select",
        Arc::clone(&columns),
        raster.rows().to_vec(),
        move |row| {
            vec![indices.iter().map(|&index| row.value_at(index)).collect()]
        },
    )
    .await;
    finish(job, selected, rows)
}

fn sort(raster: &Raster, orders: &[Order], job: &Job) -> Result<Raster> {
    let prepared: Vec<Order> = orders
        .iter()
        .map(|order| Order {
            expression: order.expression.prepare(),
            ascending: order.ascending,
            numeric: order.numeric,
        })
        .collect();
    let columns = raster.shared_columns();
    let mut keyed: Vec<(Vec<Value>, Vec<Value>)> = Vec::with_capacity(raster.row_count());
    for (index, values) in raster.rows().iter().enumerate() {
        if index % PROGRESS_INTERVAL == 0 {
            if job.is_cancelled() {
                return finish(job, (*columns).clone(), Vec::new());
            }
            job.report_progress("sort", index as f64 / raster.row_count().max(1) as f64);
        }
        let row = Row::new(values.clone(), Arc::clone(&columns));
        let keys: Vec<Value> = prepared
            .iter()
            .map(|order| order.expression.apply_row(&row))
            .collect();
        keyed.push((keys, values.clone()));
    }
    // Vec::sort_by is stable, so equal keys keep their source order.
    keyed.sort_by(|a, b| warp_core::sorting::compare_keys(&prepared, &a.0, &b.0));
    let rows = keyed.into_iter().map(|(_, values)| values).collect();
    finish(job, (*columns).clone(), rows)
}

fn distinct(raster: &Raster, job: &Job) -> Result<Raster> {
    let width = raster.column_count();
    let mut seen: HashSet<Vec<Value>> = HashSet::new();
    let mut rows = Vec::new();
    for (index, values) in raster.rows().iter().enumerate() {
        if index % PROGRESS_INTERVAL == 0 {
            if job.is_cancelled() {
                return finish(job, raster.columns().clone(), Vec::new());
            }
            job.report_progress("distinct", index as f64 / raster.row_count().max(1) as f64);
        }
        // Short rows normalize to header width so they compare equal
        // to their padded form.
        let mut key = values.clone();
        key.resize(width, Value::Empty);
        if seen.insert(key) {
            rows.push(values.clone());
        }
    }
    finish(job, raster.columns().clone(), rows)
}

fn slice(raster: &Raster, offset: usize, count: usize) -> Raster {
    let start = offset.min(raster.row_count());
    let end = count
        .saturating_add(start)
        .min(raster.row_count());
    Raster::new(raster.columns().clone(), raster.rows()[start..end].to_vec()).freeze()
}

fn random(raster: &Raster, count: usize, job: &Job) -> Result<Raster> {
    let mut rng = rand::thread_rng();
    let mut tagged: Vec<(f64, Vec<Value>)> = Vec::with_capacity(raster.row_count());
    for (index, values) in raster.rows().iter().enumerate() {
        if index % PROGRESS_INTERVAL == 0 && job.is_cancelled() {
            return finish(job, raster.columns().clone(), Vec::new());
        }
        tagged.push((rng.gen::<f64>(), values.clone()));
    }
    tagged.sort_by(|a, b| a.0.total_cmp(&b.0));
    tagged.truncate(count);
    let rows = tagged.into_iter().map(|(_, values)| values).collect();
    finish(job, raster.columns().clone(), rows)
}

fn transpose(raster: &Raster, job: &Job) -> Result<Raster> {
    if raster.column_count() == 0 {
        return Ok(Raster::empty(OrderedColumns::new()).freeze());
    }
    let first = raster
        .columns()
        .get(0)
        .map_or_else(|| "column".to_string(), |c| c.name().to_string());
    let mut columns = OrderedColumns::new();
    columns.insert(Column::new(first));
    for index in 0..raster.row_count() {
        let name = raster
            .value_at(index, 0)
            .string_value()
            .unwrap_or_default();
        let mut candidate = name.clone();
        let mut suffix = 2;
        while !columns.insert(Column::new(candidate.clone())) {
            candidate = format!("{name}_{suffix}");
            suffix += 1;
        }
    }
    let mut rows = Vec::with_capacity(raster.column_count().saturating_sub(1));
    for source_column in 1..raster.column_count() {
        let name = raster
            .columns()
            .get(source_column)
            .map_or_else(String::new, |c| c.name().to_string());
        let mut row = Vec::with_capacity(raster.row_count() + 1);
        row.push(Value::String(name));
        for source_row in 0..raster.row_count() {
            row.push(raster.value_at(source_row, source_column));
        }
        rows.push(row);
    }
    finish(job, columns, rows)
}

fn aggregate(
    raster: &Raster,
    groups: &[(Column, Expression)],
    values: &[(Column, Aggregation)],
    job: &Job,
) -> Result<Raster> {
    let group_expressions: Vec<Expression> =
        groups.iter().map(|(_, e)| e.prepare()).collect();
    let maps: Vec<Expression> = values.iter().map(|(_, a)| a.map.prepare()).collect();
    let columns = raster.shared_columns();

    // Group labels in discovery order; per group, one value list per
    // aggregated column.
    let mut labels: Vec<Vec<Value>> = Vec::new();
    let mut index: HashMap<Vec<Value>, usize> = HashMap::new();
    let mut accumulators: Vec<Vec<Vec<Value>>> = Vec::new();
    for (row_index, row_values) in raster.rows().iter().enumerate() {
        if row_index % PROGRESS_INTERVAL == 0 {
            if job.is_cancelled() {
                return finish(job, output_columns(groups, values), Vec::new());
            }
            job.report_progress(
                "aggregate",
                row_index as f64 / raster.row_count().max(1) as f64,
            );
        }
        let row = Row::new(row_values.clone(), Arc::clone(&columns));
        let key: Vec<Value> = group_expressions
            .iter()
            .map(|expression| expression.apply_row(&row))
            .collect();
        let slot = match index.get(&key) {
            Some(&slot) => slot,
            None => {
                index.insert(key.clone(), labels.len());
                labels.push(key);
                accumulators.push(vec![Vec::new(); values.len()]);
                labels.len() - 1
            }
        };
        for (value_index, map) in maps.iter().enumerate() {
            accumulators[slot][value_index].push(map.apply_row(&row));
        }
    }

    let mut rows = Vec::with_capacity(labels.len());
    for (slot, label) in labels.into_iter().enumerate() {
        let mut out = label;
        for (value_index, (_, aggregation)) in values.iter().enumerate() {
            out.push(aggregation.reduce_values(&accumulators[slot][value_index]));
        }
        rows.push(out);
    }
    finish(job, output_columns(groups, values), rows)
}

fn output_columns(
    groups: &[(Column, Expression)],
    values: &[(Column, Aggregation)],
) -> OrderedColumns {
    groups
        .iter()
        .map(|(c, _)| c.clone())
        .chain(values.iter().map(|(c, _)| c.clone()))
        .collect()
}

/// A prepared join: right-side hash index when the condition
/// factorizes, the Cartesian scan otherwise. Shared by the raster
/// evaluator and the join transformer.
#[derive(Debug)]
pub(crate) struct JoinIndex {
    right: Arc<Raster>,
    right_columns: Arc<OrderedColumns>,
    pairs: Option<Vec<(Expression, Expression)>>,
    by_key: HashMap<Vec<Value>, Vec<usize>>,
    right_only: Vec<usize>,
    output: OrderedColumns,
    left_width: usize,
    condition: Expression,
    join_type: JoinType,
}

impl JoinIndex {
    pub(crate) fn build(
        left_columns: &OrderedColumns,
        right: Arc<Raster>,
        join_type: JoinType,
        condition: &Expression,
    ) -> Self {
        let condition = condition.prepare();
        let right_columns = right.shared_columns();
        let mut output = left_columns.clone();
        let mut right_only = Vec::new();
        for (index, column) in right.columns().iter().enumerate() {
            if output.insert(column.clone()) {
                right_only.push(index);
            }
        }
        let pairs = condition.equijoin_pairs();
        let mut by_key: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
        if let Some(pairs) = &pairs {
            let empty = Row::empty();
            for index in 0..right.row_count() {
                let right_row = right.row(index, &right_columns);
                let key: Vec<Value> = pairs
                    .iter()
                    .map(|(_, foreign)| foreign.apply(&empty, Some(&right_row), &Value::Empty))
                    .collect();
                by_key.entry(key).or_default().push(index);
            }
        }
        Self {
            right,
            right_columns,
            pairs,
            by_key,
            right_only,
            output,
            left_width: left_columns.len(),
            condition,
            join_type,
        }
    }

    pub(crate) const fn output_columns(&self) -> &OrderedColumns {
        &self.output
    }

    /// All joined rows for one left row.
    pub(crate) fn join_row(&self, row: &Row) -> Vec<Vec<Value>> {
        let candidates: Vec<usize> = match &self.pairs {
            Some(pairs) => {
                let key: Vec<Value> = pairs
                    .iter()
                    .map(|(local, _)| local.apply_row(row))
                    .collect();
                self.by_key.get(&key).cloned().unwrap_or_default()
            }
            None => (0..self.right.row_count()).collect(),
        };
        let mut out = Vec::new();
        let mut matched = false;
        for candidate in candidates {
            let right_row = self.right.row(candidate, &self.right_columns);
            if self.condition.apply(row, Some(&right_row), &Value::Empty) == Value::Bool(true) {
                matched = true;
                out.push(self.joined(row, Some(&right_row)));
            }
        }
        if !matched && self.join_type == JoinType::Left {
            out.push(self.joined(row, None));
        }
        out
    }

    fn joined(&self, left: &Row, right: Option<&Row>) -> Vec<Value> {
        let mut values: Vec<Value> = (0..self.left_width).map(|i| left.value_at(i)).collect();
        for &index in &self.right_only {
            values.push(right.map_or(Value::Empty, |row| row.value_at(index)));
        }
        values
    }
}

async fn join(raster: &Raster, clause: &JoinClause, job: &Job) -> Result<Raster> {
    let foreign = clause.foreign.raster(job).await?;
    let index = Arc::new(JoinIndex::build(
        raster.columns(),
        foreign,
        clause.join_type,
        &clause.condition,
    ));
    let output = index.output_columns().clone();
    let columns = raster.shared_columns();
    let rows = parallel::map_rows(
        job,
        "join",
        Arc::clone(&columns),
        raster.rows().to_vec(),
        move |row| index.join_row(row),
    )
    .await;
    finish(job, output, rows)
}

fn union(raster: &Raster, foreign: &Raster, job: &Job) -> Result<Raster> {
    let columns = raster.columns().union(foreign.columns());
    let mut rows: Vec<Vec<Value>> = raster.rows().to_vec();
    rows.reserve(foreign.row_count());
    for index in 0..foreign.row_count() {
        if index % PROGRESS_INTERVAL == 0 && job.is_cancelled() {
            return finish(job, columns, Vec::new());
        }
        let row: Vec<Value> = columns
            .iter()
            .map(|column| {
                foreign
                    .index_of_column(column)
                    .map_or(Value::Empty, |i| foreign.value_at(index, i))
            })
            .collect();
        rows.push(row);
    }
    finish(job, columns, rows)
}

fn pivot(
    raster: &Raster,
    horizontal: &[Column],
    vertical: &[Column],
    values: &[Column],
    job: &Job,
) -> Result<Raster> {
    let horizontal_indices: Vec<Option<usize>> =
        horizontal.iter().map(|c| raster.index_of_column(c)).collect();
    let vertical_indices: Vec<Option<usize>> =
        vertical.iter().map(|c| raster.index_of_column(c)).collect();
    let value_indices: Vec<Option<usize>> =
        values.iter().map(|c| raster.index_of_column(c)).collect();

    let read = |row: usize, index: &Option<usize>| {
        index.map_or(Value::Empty, |i| raster.value_at(row, i))
    };

    let mut vertical_keys: Vec<Vec<Value>> = Vec::new();
    let mut vertical_slots: HashMap<Vec<Value>, usize> = HashMap::new();
    let mut horizontal_keys: Vec<Vec<Value>> = Vec::new();
    let mut horizontal_slots: HashMap<Vec<Value>, usize> = HashMap::new();
    let mut cells: HashMap<(usize, usize, usize), Value> = HashMap::new();

    for row in 0..raster.row_count() {
        if row % PROGRESS_INTERVAL == 0 {
            if job.is_cancelled() {
                let header: OrderedColumns = vertical.iter().cloned().collect();
                return finish(job, header, Vec::new());
            }
            job.report_progress("pivot", row as f64 / raster.row_count().max(1) as f64);
        }
        let vkey: Vec<Value> = vertical_indices.iter().map(|i| read(row, i)).collect();
        let vslot = *vertical_slots.entry(vkey.clone()).or_insert_with(|| {
            vertical_keys.push(vkey.clone());
            vertical_keys.len() - 1
        });
        let hkey: Vec<Value> = horizontal_indices.iter().map(|i| read(row, i)).collect();
        let hslot = *horizontal_slots.entry(hkey.clone()).or_insert_with(|| {
            horizontal_keys.push(hkey.clone());
            horizontal_keys.len() - 1
        });
        for (value_index, i) in value_indices.iter().enumerate() {
            cells.insert((vslot, hslot, value_index), read(row, i));
        }
    }

    let mut columns: OrderedColumns = vertical.iter().cloned().collect();
    for hkey in &horizontal_keys {
        let base: String = hkey
            .iter()
            .map(|v| v.string_value().unwrap_or_default())
            .collect::<Vec<_>>()
            .join("_");
        for value_column in values {
            let name = if values.len() > 1 {
                format!("{base}_{value_column}")
            } else {
                base.clone()
            };
            let mut candidate = name.clone();
            let mut suffix = 2;
            while !columns.insert(Column::new(candidate.clone())) {
                candidate = format!("{name}_{suffix}");
                suffix += 1;
            }
        }
    }

    let mut rows = Vec::with_capacity(vertical_keys.len());
    for (vslot, vkey) in vertical_keys.into_iter().enumerate() {
        let mut row = vkey;
        for hslot in 0..horizontal_keys.len() {
            for value_index in 0..values.len() {
                row.push(
                    cells
                        .get(&(vslot, hslot, value_index))
                        .cloned()
                        .unwrap_or(Value::Invalid),
                );
            }
        }
        rows.push(row);
    }
    finish(job, columns, rows)
}

/// The flattened header: row identifier, column name, then the value.
pub(crate) fn flatten_columns(
    value_column: &Column,
    name_column: Option<&Column>,
    row_column: Option<&Column>,
) -> OrderedColumns {
    let mut columns = OrderedColumns::new();
    if let Some(column) = row_column {
        columns.insert(column.clone());
    }
    if let Some(column) = name_column {
        columns.insert(column.clone());
    }
    columns.insert(value_column.clone());
    columns
}

/// One output row per cell of the source row.
pub(crate) fn flatten_row(
    row: &Row,
    with_name: bool,
    with_row: bool,
    row_identifier: Option<&Expression>,
) -> Vec<Vec<Value>> {
    let identifier = row_identifier.map_or(Value::Empty, |e| e.apply_row(row));
    let mut out = Vec::with_capacity(row.columns().len());
    for (index, column) in row.columns().iter().enumerate() {
        let mut cell_row = Vec::with_capacity(3);
        if with_row {
            cell_row.push(identifier.clone());
        }
        if with_name {
            cell_row.push(Value::String(column.name().to_string()));
        }
        cell_row.push(row.value_at(index));
        out.push(cell_row);
    }
    out
}

async fn flatten(
    raster: &Raster,
    value_column: &Column,
    name_column: Option<&Column>,
    row_column: Option<&Column>,
    row_identifier: Option<&Expression>,
    job: &Job,
) -> Result<Raster> {
    let output = flatten_columns(value_column, name_column, row_column);
    let with_name = name_column.is_some();
    let with_row = row_column.is_some();
    let identifier = row_identifier.map(Expression::prepare);
    let columns = raster.shared_columns();
    let rows = parallel::map_rows(
        job,
        "flatten",
        Arc::clone(&columns),
        raster.rows().to_vec(),
        move |row| flatten_row(row, with_name, with_row, identifier.as_ref()),
    )
    .await;
    finish(job, output, rows)
}
