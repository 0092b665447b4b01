//! Rows and rasters: the in-memory tabular containers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::column::{Column, OrderedColumns};
use crate::error::{Result, WarpError};
use crate::value::Value;

/// A single row: an ordered sequence of values under a shared header.
///
/// Access by column name is case-insensitive; a missing column reads as
/// [`Value::Empty`], not Invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<OrderedColumns>,
}

impl Row {
    /// Creates a row over a shared header. Values shorter than the
    /// header read as Empty beyond their length.
    #[must_use]
    pub const fn new(values: Vec<Value>, columns: Arc<OrderedColumns>) -> Self {
        Self { values, columns }
    }

    /// An empty row with no columns, for evaluating constant
    /// expressions.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            values: Vec::new(),
            columns: Arc::new(OrderedColumns::new()),
        }
    }

    /// The header shared by this row.
    #[must_use]
    pub fn columns(&self) -> &OrderedColumns {
        &self.columns
    }

    /// The raw values; may be shorter than the header.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value for a column by name; Empty when the column is missing.
    #[must_use]
    pub fn value(&self, column: &Column) -> Value {
        self.columns
            .index_of(column)
            .map_or(Value::Empty, |index| self.value_at(index))
    }

    /// Value at an index; Empty when the row is shorter.
    #[must_use]
    pub fn value_at(&self, index: usize) -> Value {
        self.values.get(index).cloned().unwrap_or(Value::Empty)
    }

    /// Consumes the row into its values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// An ordered sequence of rows sharing one column header.
///
/// A raster is mutable while it is being built; [`Raster::freeze`]
/// marks it read-only. Rows may be shorter than the header; missing
/// trailing cells read as Empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raster {
    columns: OrderedColumns,
    rows: Vec<Vec<Value>>,
    read_only: bool,
}

impl Raster {
    /// Creates a raster from a header and rows.
    #[must_use]
    pub const fn new(columns: OrderedColumns, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            read_only: false,
        }
    }

    /// An empty raster with the given header.
    #[must_use]
    pub const fn empty(columns: OrderedColumns) -> Self {
        Self::new(columns, Vec::new())
    }

    /// Marks the raster read-only and returns it.
    #[must_use]
    pub const fn freeze(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Whether the raster has been frozen.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The column header.
    #[must_use]
    pub const fn columns(&self) -> &OrderedColumns {
        &self.columns
    }

    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of header columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// The raw row data.
    #[must_use]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Position of a column by name. O(n); callers looping over many
    /// rows should resolve indices once up front.
    #[must_use]
    pub fn index_of_column(&self, column: &Column) -> Option<usize> {
        self.columns.index_of(column)
    }

    /// The cell at (row, column index); Empty when the row is shorter
    /// than the header.
    #[must_use]
    pub fn value_at(&self, row: usize, column: usize) -> Value {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .cloned()
            .unwrap_or(Value::Empty)
    }

    /// Materializes one row with a shared header handle.
    #[must_use]
    pub fn row(&self, index: usize, columns: &Arc<OrderedColumns>) -> Row {
        Row::new(self.rows.get(index).cloned().unwrap_or_default(), Arc::clone(columns))
    }

    /// A shared handle to the header for building [`Row`]s.
    #[must_use]
    pub fn shared_columns(&self) -> Arc<OrderedColumns> {
        Arc::new(self.columns.clone())
    }

    /// Appends a row. Fails on a frozen raster.
    pub fn add_row(&mut self, values: Vec<Value>) -> Result<()> {
        if self.read_only {
            return Err(WarpError::Contract(
                "cannot add a row to a read-only raster".to_string(),
            ));
        }
        self.rows.push(values);
        Ok(())
    }

    /// Replaces one cell. Fails on a frozen raster or out-of-bounds
    /// coordinates.
    pub fn set_value(&mut self, row: usize, column: usize, value: Value) -> Result<()> {
        if self.read_only {
            return Err(WarpError::Contract(
                "cannot mutate a read-only raster".to_string(),
            ));
        }
        let cells = self
            .rows
            .get_mut(row)
            .ok_or_else(|| WarpError::Schema(format!("row {row} out of bounds")))?;
        if column >= self.columns.len() {
            return Err(WarpError::Schema(format!("column {column} out of bounds")));
        }
        if cells.len() <= column {
            cells.resize(column + 1, Value::Empty);
        }
        cells[column] = value;
        Ok(())
    }

    /// The subset of `columns` on which every selected row agrees.
    ///
    /// Used by the mutation planner to find primary-key candidates for
    /// row edits: a column whose value is shared by all selected rows
    /// cannot distinguish them and is reported as a commonality.
    #[must_use]
    pub fn commonalities_of(&self, rows: &[usize], columns: &[Column]) -> Vec<Column> {
        columns
            .iter()
            .filter(|column| {
                let Some(index) = self.index_of_column(column) else {
                    return false;
                };
                let mut selected = rows.iter().map(|&r| self.value_at(r, index));
                match selected.next() {
                    Some(first) => selected.all(|v| v == first),
                    None => false,
                }
            })
            .cloned()
            .collect()
    }
}
