//! The coalesce rewriter: algebraic fusion of adjacent operators.
//!
//! A [`Coalesced`] dataset defers exactly one operation on its source.
//! Applying another operator first tries the fusion axioms; a
//! reordering axiom pushes the new operation into the source, where it
//! may fuse again or push into SQL. Operators with no axiom force the
//! deferred step. The coalescer never fails on its own.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use warp_core::{
    Expression, Job, OrderedColumns, Raster, Result, Value,
};

use crate::dataset::{Dataset, DatasetRef, Operation};
use crate::raster_dataset::RasterDataset;
use crate::stream::StreamRef;

/// A dataset with one deferred operation.
#[derive(Debug)]
pub struct Coalesced {
    source: DatasetRef,
    pending: Option<Operation>,
}

/// The fusion decision for a (pending, incoming) operator pair.
#[derive(Debug)]
enum Fusion {
    /// Replace the pending operation on the same source.
    Replace(Option<Operation>),
    /// Apply the first operation to the source, keep the second
    /// pending (a reordering axiom).
    PushDown(Operation, Operation),
    /// No axiom applies; force the pending step.
    Force(Operation),
}

/// Operators that may fuse with a later operation and are therefore
/// worth deferring.
const fn fusable(operation: &Operation) -> bool {
    matches!(
        operation,
        Operation::Filter(_)
            | Operation::Calculate(_)
            | Operation::Select(_)
            | Operation::CalculateThenSelect { .. }
            | Operation::Sort(_)
            | Operation::Limit(_)
            | Operation::Offset(_)
            | Operation::Distinct
            | Operation::Transpose
    )
}

fn is_constant_true(condition: &Expression) -> bool {
    matches!(
        condition.prepare(),
        Expression::Literal {
            value: Value::Bool(true)
        }
    )
}

/// The fusion axiom table. `pending` ran conceptually first,
/// `incoming` second.
fn fuse(pending: &Operation, incoming: Operation) -> Fusion {
    match (pending, incoming) {
        // transpose(transpose(d)) = d
        (Operation::Transpose, Operation::Transpose) => Fusion::Replace(None),
        // limit(x; limit(y; d)) = limit(min(x, y); d)
        (Operation::Limit(first), Operation::Limit(second)) => {
            Fusion::Replace(Some(Operation::Limit((*first).min(second))))
        }
        // offset(x; offset(y; d)) = offset(x + y; d)
        (Operation::Offset(first), Operation::Offset(second)) => {
            Fusion::Replace(Some(Operation::Offset(first.saturating_add(second))))
        }
        (Operation::Distinct, Operation::Distinct) => {
            Fusion::Replace(Some(Operation::Distinct))
        }
        // filter(a; filter(b; d)) = filter(and(a, b); d)
        (Operation::Filter(first), Operation::Filter(second)) => {
            let both = Expression::and(vec![first.clone(), second]).prepare();
            Fusion::Replace(Some(Operation::Filter(both)))
        }
        // limit/offset/filter commute with a calculation they do not
        // read into, so they sink toward the source.
        (Operation::Calculate(calculation), Operation::Limit(count)) => Fusion::PushDown(
            Operation::Limit(count),
            Operation::Calculate(calculation.clone()),
        ),
        (Operation::Calculate(calculation), Operation::Offset(count)) => Fusion::PushDown(
            Operation::Offset(count),
            Operation::Calculate(calculation.clone()),
        ),
        (Operation::Calculate(calculation), Operation::Filter(condition))
            if disjoint(&condition.sibling_dependencies(), &calculation.targets()) =>
        {
            Fusion::PushDown(
                Operation::Filter(condition),
                Operation::Calculate(calculation.clone()),
            )
        }
        // select(a; select(b; d)) = select(a ∩ b in a-order; d)
        (Operation::Select(first), Operation::Select(second)) => {
            let narrowed = second
                .into_iter()
                .filter(|column| first.contains(column))
                .collect();
            Fusion::Replace(Some(Operation::Select(narrowed)))
        }
        // select after calculate becomes the combined form the SQL
        // transpiler emits as SELECT expr AS col, …
        (Operation::Calculate(calculation), Operation::Select(columns)) => {
            Fusion::Replace(Some(Operation::CalculateThenSelect {
                columns,
                calculation: calculation.clone(),
            }))
        }
        (
            Operation::CalculateThenSelect {
                columns,
                calculation,
            },
            Operation::Select(second),
        ) => {
            let narrowed = second
                .into_iter()
                .filter(|column| columns.contains(column))
                .collect();
            Fusion::Replace(Some(Operation::CalculateThenSelect {
                columns: narrowed,
                calculation: calculation.clone(),
            }))
        }
        // Two calculations merge when the later one reads none of the
        // earlier one's targets.
        (Operation::Calculate(first), Operation::Calculate(second))
            if !second.reads_any_target_of(first) =>
        {
            Fusion::Replace(Some(Operation::Calculate(first.merged_with(&second))))
        }
        // sort(o1; sort(o2; d)) = sort(o1 ⋅ o2; d); the outer sort is
        // the primary key.
        (Operation::Sort(inner), Operation::Sort(outer)) => {
            let mut combined = outer;
            combined.extend(inner.iter().cloned());
            Fusion::Replace(Some(Operation::Sort(combined)))
        }
        (_, incoming) => Fusion::Force(incoming),
    }
}

fn disjoint(reads: &HashSet<warp_core::Column>, targets: &OrderedColumns) -> bool {
    reads.iter().all(|column| !targets.contains(column))
}

impl Coalesced {
    /// Wraps a dataset with no deferred operation.
    #[must_use]
    pub fn wrap(source: DatasetRef) -> Self {
        Self {
            source,
            pending: None,
        }
    }

    fn with(source: DatasetRef, pending: Option<Operation>) -> DatasetRef {
        Arc::new(Self { source, pending })
    }

    /// The source with the deferred operation applied.
    fn forced(&self) -> DatasetRef {
        match &self.pending {
            None => Arc::clone(&self.source),
            Some(operation) => Arc::clone(&self.source).apply(operation.clone()),
        }
    }
}

#[async_trait]
impl Dataset for Coalesced {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn columns(&self, job: &Job) -> Result<OrderedColumns> {
        self.forced().columns(job).await
    }

    async fn raster(&self, job: &Job) -> Result<Arc<Raster>> {
        self.forced().raster(job).await
    }

    fn stream(&self) -> StreamRef {
        self.forced().stream()
    }

    async fn unique(
        &self,
        expression: &Expression,
        job: &Job,
    ) -> Result<std::collections::HashSet<Value>> {
        self.forced().unique(expression, job).await
    }

    fn apply(self: Arc<Self>, operation: Operation) -> DatasetRef {
        // Identity operations disappear regardless of what is pending.
        match &operation {
            Operation::Filter(condition) if is_constant_true(condition) => return self,
            Operation::Sort(orders) if orders.is_empty() => return self,
            Operation::Select(columns) if columns.is_empty() => {
                return Self::with(
                    Arc::new(RasterDataset::from_raster(Raster::empty(
                        OrderedColumns::new(),
                    ))),
                    None,
                );
            }
            _ => {}
        }
        let source = Arc::clone(&self.source);
        match &self.pending {
            None => {
                if fusable(&operation) {
                    Self::with(source, Some(operation))
                } else {
                    Self::with(source.apply(operation), None)
                }
            }
            Some(pending) => match fuse(pending, operation) {
                Fusion::Replace(next) => Self::with(source, next),
                Fusion::PushDown(below, kept) => {
                    trace!(pushed = below.name(), kept = kept.name(), "coalesce reorder");
                    Self::with(source.apply(below), Some(kept))
                }
                Fusion::Force(operation) => {
                    trace!(forced = pending.name(), "coalesce force");
                    let forced = source.apply(pending.clone());
                    if fusable(&operation) {
                        Self::with(forced, Some(operation))
                    } else {
                        Self::with(forced.apply(operation), None)
                    }
                }
            },
        }
    }
}
