//! Aggregation bindings: a map expression paired with a reducer.

use serde::{Deserialize, Serialize};

use crate::expression::Expression;
use crate::functions::Function;
use crate::row::Row;
use crate::value::Value;

/// One aggregated column: `map` projects each row of a group, `reduce`
/// folds the projected values.
///
/// The reducer must be associative — `reduce(a..z)` equals
/// `reduce(reduce(a..k), reduce(l..z))` — so partial aggregation (and
/// SQL pushdown) is sound. [`Function::is_reducer`] gates this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    /// Projects a row to the value being aggregated.
    pub map: Expression,
    /// The associative fold over projected values.
    pub reduce: Function,
}

impl Aggregation {
    /// Creates an aggregation; `reduce` should satisfy
    /// [`Function::is_reducer`].
    #[must_use]
    pub const fn new(map: Expression, reduce: Function) -> Self {
        Self { map, reduce }
    }

    /// Projects one row.
    #[must_use]
    pub fn map_row(&self, row: &Row) -> Value {
        self.map.apply_row(row)
    }

    /// Folds the projected values of one group.
    #[must_use]
    pub fn reduce_values(&self, values: &[Value]) -> Value {
        self.reduce.apply(values)
    }
}
