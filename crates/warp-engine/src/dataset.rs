//! The dataset trait and the operator algebra.
//!
//! A dataset is an immutable value; every operator produces a new
//! dataset. Operator composition is synchronous and pure — only the
//! terminal calls (`columns`, `raster`, `unique`, and pulling a
//! stream) suspend and do work.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use warp_core::{
    Aggregation, Column, Expression, Job, Order, OrderedColumns, Raster, Result, Value,
};

use crate::coalesce::Coalesced;
use crate::stream::StreamRef;

/// A shared, type-erased dataset.
pub type DatasetRef = Arc<dyn Dataset>;

/// An ordered set of calculated columns.
///
/// Within one calculation step every expression sees the *pre-batch*
/// row: a calculated column does not observe the new value of another
/// column calculated in the same step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calculation {
    entries: Vec<(Column, Expression)>,
}

impl Calculation {
    /// An empty calculation.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds or replaces a target column.
    #[must_use]
    pub fn with(mut self, column: impl Into<Column>, expression: Expression) -> Self {
        let column = column.into();
        if let Some(entry) = self.entries.iter_mut().find(|(c, _)| *c == column) {
            entry.1 = expression;
        } else {
            self.entries.push((column, expression));
        }
        self
    }

    /// True when no column is calculated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The target/expression pairs, in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[(Column, Expression)] {
        &self.entries
    }

    /// The calculated columns, in insertion order.
    #[must_use]
    pub fn targets(&self) -> OrderedColumns {
        self.entries.iter().map(|(c, _)| c.clone()).collect()
    }

    /// Every sibling column read by any calculated expression.
    #[must_use]
    pub fn reads(&self) -> HashSet<Column> {
        let mut all = HashSet::new();
        for (_, expression) in &self.entries {
            all.extend(expression.sibling_dependencies());
        }
        all
    }

    /// Whether any expression of `self` reads a target of `other`.
    #[must_use]
    pub fn reads_any_target_of(&self, other: &Self) -> bool {
        let targets = other.targets();
        self.reads().iter().any(|column| targets.contains(column))
    }

    /// `other` layered over `self`: targets of `other` replace targets
    /// of `self`. Only sound when `other` reads none of self's
    /// targets.
    #[must_use]
    pub fn merged_with(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for (column, expression) in &other.entries {
            merged = merged.with(column.clone(), expression.clone());
        }
        merged
    }
}

impl FromIterator<(Column, Expression)> for Calculation {
    fn from_iter<I: IntoIterator<Item = (Column, Expression)>>(iter: I) -> Self {
        let mut calculation = Self::new();
        for (column, expression) in iter {
            calculation = calculation.with(column, expression);
        }
        calculation
    }
}

/// Join flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// Keep only matched left rows.
    Inner,
    /// Keep unmatched left rows once, with Empty in right-only
    /// columns.
    Left,
}

/// A join against a foreign dataset.
///
/// When the condition factorizes into a conjunction of sibling-versus-
/// foreign equalities the evaluators use a hash join; otherwise a
/// Cartesian product is scanned.
#[derive(Debug, Clone)]
pub struct JoinClause {
    /// Inner or left.
    pub join_type: JoinType,
    /// The right-hand dataset.
    pub foreign: DatasetRef,
    /// Condition over sibling (left) and foreign (right) references.
    pub condition: Expression,
}

/// One relational operator application.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Keep rows where the condition is `Bool(true)`.
    Filter(Expression),
    /// Add or replace calculated columns.
    Calculate(Calculation),
    /// Keep only the named columns, in the given order.
    Select(Vec<Column>),
    /// Combined calculate-then-project step, produced by the
    /// coalescer so SQL can emit `SELECT expr AS col, …` in one pass.
    CalculateThenSelect {
        /// Columns kept, in order.
        columns: Vec<Column>,
        /// Calculations applied before projecting.
        calculation: Calculation,
    },
    /// Stable lexicographic sort.
    Sort(Vec<Order>),
    /// Unique rows in discovery order.
    Distinct,
    /// First n rows.
    Limit(usize),
    /// Skip n rows.
    Offset(usize),
    /// A uniform random sample of n rows. The raster and stream paths
    /// use an exact reservoir; SQL pushdown orders by the backend's
    /// random function, which differs for small populations.
    Random(usize),
    /// Rotate the raster; first-column values become the new header.
    Transpose,
    /// Group and reduce.
    Aggregate {
        /// Group label columns and their expressions, in output order.
        groups: Vec<(Column, Expression)>,
        /// Aggregated columns and their bindings, in output order.
        values: Vec<(Column, Aggregation)>,
    },
    /// Join against a foreign dataset.
    Join(JoinClause),
    /// Append another dataset; columns are unioned, missing cells are
    /// Empty.
    Union(DatasetRef),
    /// Denormalize: vertical combinations become rows, horizontal
    /// combinations become column groups; missing cells are Invalid.
    Pivot {
        /// Columns whose combinations become column groups.
        horizontal: Vec<Column>,
        /// Columns whose combinations become rows.
        vertical: Vec<Column>,
        /// Value columns emitted per horizontal combination.
        values: Vec<Column>,
    },
    /// Emit one row per cell.
    Flatten {
        /// Column receiving the cell value.
        value_column: Column,
        /// Column receiving the originating column name, when wanted.
        name_column: Option<Column>,
        /// Column receiving the row identifier, when wanted.
        row_column: Option<Column>,
        /// Evaluated per source row to produce the row identifier.
        row_identifier: Option<Expression>,
    },
}

impl Operation {
    /// A short name for progress keys and logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Filter(_) => "filter",
            Self::Calculate(_) => "calculate",
            Self::Select(_) => "select",
            Self::CalculateThenSelect { .. } => "calculateThenSelect",
            Self::Sort(_) => "sort",
            Self::Distinct => "distinct",
            Self::Limit(_) => "limit",
            Self::Offset(_) => "offset",
            Self::Random(_) => "random",
            Self::Transpose => "transpose",
            Self::Aggregate { .. } => "aggregate",
            Self::Join(_) => "join",
            Self::Union(_) => "union",
            Self::Pivot { .. } => "pivot",
            Self::Flatten { .. } => "flatten",
        }
    }
}

/// The algebraic dataset surface.
///
/// Implementations: the in-memory raster dataset, the streaming
/// dataset, the SQL pushdown dataset and the [`Coalesced`] wrapper.
/// A raster converts to a stream through [`Dataset::stream`]; there is
/// no delegation cycle between the substrates.
#[async_trait]
pub trait Dataset: fmt::Debug + Send + Sync + 'static {
    /// The concrete type, for substrate-compatibility checks (two SQL
    /// datasets may join/union in SQL only when they share a
    /// database).
    fn as_any(&self) -> &dyn std::any::Any;

    /// The columns this dataset produces.
    async fn columns(&self, job: &Job) -> Result<OrderedColumns>;

    /// Materializes the full result. On cancellation the result is an
    /// empty raster, not an error.
    async fn raster(&self, job: &Job) -> Result<Arc<Raster>>;

    /// An incremental stream over the result. Clone the stream before
    /// consuming it from more than one terminal operation.
    fn stream(&self) -> StreamRef;

    /// Applies one operator, producing a new dataset. Pure and
    /// synchronous; no work happens until a terminal call.
    fn apply(self: Arc<Self>, operation: Operation) -> DatasetRef;

    /// The distinct values an expression takes over this dataset.
    async fn unique(&self, expression: &Expression, job: &Job) -> Result<HashSet<Value>> {
        let raster = self.raster(job).await?;
        let columns = raster.shared_columns();
        let mut values = HashSet::new();
        for index in 0..raster.row_count() {
            values.insert(expression.apply_row(&raster.row(index, &columns)));
        }
        Ok(values)
    }
}

/// Operator sugar over [`DatasetRef`]: each method applies one
/// [`Operation`].
pub trait DatasetExt {
    /// Wraps this dataset in the coalescing rewriter; subsequent
    /// operators fuse where the algebra allows.
    fn coalesced(&self) -> DatasetRef;
    /// Keep rows where the condition holds.
    fn filter(&self, condition: Expression) -> DatasetRef;
    /// Add or replace calculated columns.
    fn calculate(&self, calculation: Calculation) -> DatasetRef;
    /// Keep only the named columns.
    fn select(&self, columns: Vec<Column>) -> DatasetRef;
    /// Stable sort by the given orders.
    fn sort(&self, orders: Vec<Order>) -> DatasetRef;
    /// Unique rows.
    fn distinct(&self) -> DatasetRef;
    /// First n rows.
    fn limit(&self, count: usize) -> DatasetRef;
    /// Skip n rows.
    fn offset(&self, count: usize) -> DatasetRef;
    /// Random sample of n rows.
    fn random(&self, count: usize) -> DatasetRef;
    /// Rotate rows and columns.
    fn transpose(&self) -> DatasetRef;
    /// Group and reduce.
    fn aggregate(
        &self,
        groups: Vec<(Column, Expression)>,
        values: Vec<(Column, Aggregation)>,
    ) -> DatasetRef;
    /// Join against a foreign dataset.
    fn join(&self, clause: JoinClause) -> DatasetRef;
    /// Append another dataset.
    fn union(&self, other: DatasetRef) -> DatasetRef;
}

impl DatasetExt for DatasetRef {
    fn coalesced(&self) -> DatasetRef {
        Arc::new(Coalesced::wrap(Arc::clone(self)))
    }

    fn filter(&self, condition: Expression) -> DatasetRef {
        Arc::clone(self).apply(Operation::Filter(condition))
    }

    fn calculate(&self, calculation: Calculation) -> DatasetRef {
        Arc::clone(self).apply(Operation::Calculate(calculation))
    }

    fn select(&self, columns: Vec<Column>) -> DatasetRef {
        Arc::clone(self).apply(Operation::Select(columns))
    }

    fn sort(&self, orders: Vec<Order>) -> DatasetRef {
        Arc::clone(self).apply(Operation::Sort(orders))
    }

    fn distinct(&self) -> DatasetRef {
        Arc::clone(self).apply(Operation::Distinct)
    }

    fn limit(&self, count: usize) -> DatasetRef {
        Arc::clone(self).apply(Operation::Limit(count))
    }

    fn offset(&self, count: usize) -> DatasetRef {
        Arc::clone(self).apply(Operation::Offset(count))
    }

    fn random(&self, count: usize) -> DatasetRef {
        Arc::clone(self).apply(Operation::Random(count))
    }

    fn transpose(&self) -> DatasetRef {
        Arc::clone(self).apply(Operation::Transpose)
    }

    fn aggregate(
        &self,
        groups: Vec<(Column, Expression)>,
        values: Vec<(Column, Aggregation)>,
    ) -> DatasetRef {
        Arc::clone(self).apply(Operation::Aggregate { groups, values })
    }

    fn join(&self, clause: JoinClause) -> DatasetRef {
        Arc::clone(self).apply(Operation::Join(clause))
    }

    fn union(&self, other: DatasetRef) -> DatasetRef {
        Arc::clone(self).apply(Operation::Union(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_core::BinaryOp;

    #[test]
    fn test_calculation_merge() {
        let first = Calculation::new().with("a", Expression::literal(Value::Int(1)));
        let second = Calculation::new().with("b", Expression::sibling("x"));
        assert!(!second.reads_any_target_of(&first));
        let merged = first.merged_with(&second);
        assert_eq!(merged.entries().len(), 2);

        let dependent = Calculation::new().with(
            "c",
            Expression::binary(
                BinaryOp::Add,
                Expression::sibling("a"),
                Expression::literal(Value::Int(1)),
            ),
        );
        assert!(dependent.reads_any_target_of(&first));
    }

    #[test]
    fn test_calculation_with_replaces() {
        let calc = Calculation::new()
            .with("a", Expression::literal(Value::Int(1)))
            .with("A", Expression::literal(Value::Int(2)));
        assert_eq!(calc.entries().len(), 1);
        assert_eq!(
            calc.entries()[0].1,
            Expression::literal(Value::Int(2))
        );
    }
}
