//! Storage-target contracts: warehouses and mutable datasets.
//!
//! A warehouse is a place datasets can be created in; a mutable
//! dataset accepts row- and schema-level mutations. Every mutation is
//! first offered to `can_perform_mutation`, a fast conservative check
//! with no side effects; `perform_mutation` may still fail at runtime
//! even after a yes.

use std::fmt;

use async_trait::async_trait;

use warp_core::{Column, Job, OrderedColumns, Raster, Result, Row, Value};
use warp_engine::DatasetRef;

/// A key addressing one row: column/value pairs that must all match.
pub type RowKey = Vec<(Column, Value)>;

/// The kinds of dataset mutation, for capability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// Remove all rows.
    Truncate,
    /// Remove the dataset itself.
    Drop,
    /// Insert rows through a column map.
    Insert,
    /// Change the schema.
    Alter,
    /// Change one cell, addressed by key.
    Update,
    /// Change one cell, addressed by position.
    Edit,
    /// Rename a column.
    Rename,
    /// Delete rows by key.
    Delete,
}

/// A mutation on a mutable dataset.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Remove all rows, keeping the schema.
    Truncate,
    /// Remove the dataset itself.
    Drop,
    /// Insert the raster's rows. The mapping pairs destination
    /// columns with source columns; unmapped destinations fill Empty.
    Insert {
        /// Rows to insert.
        raster: Raster,
        /// Destination column → source column.
        mapping: Vec<(Column, Column)>,
    },
    /// Replace the schema with the given columns.
    Alter {
        /// The new schema.
        columns: OrderedColumns,
    },
    /// Set `column` to `new` in the row addressed by `key`, verifying
    /// the cell still holds `old`. Requires a non-empty identifier.
    Update {
        /// Identifying column/value pairs.
        key: RowKey,
        /// The column to change.
        column: Column,
        /// The expected current value.
        old: Value,
        /// The replacement value.
        new: Value,
    },
    /// Set `column` to `new` in the row at `row`, verifying the cell
    /// still holds `old`. Position-addressed, for targets whose
    /// identifier is not yet known; `commonalities_of` promotes these
    /// to key-addressed updates once key candidates exist.
    Edit {
        /// Zero-based row position.
        row: usize,
        /// The column to change.
        column: Column,
        /// The expected current value.
        old: Value,
        /// The replacement value.
        new: Value,
    },
    /// Rename a column.
    Rename {
        /// The column to rename.
        from: Column,
        /// Its new name.
        to: Column,
    },
    /// Delete every row matching one of the keys. Requires a
    /// non-empty identifier.
    Delete {
        /// Keys of the rows to remove.
        keys: Vec<RowKey>,
    },
}

impl Mutation {
    /// The capability this mutation requires.
    #[must_use]
    pub const fn kind(&self) -> MutationKind {
        match self {
            Self::Truncate => MutationKind::Truncate,
            Self::Drop => MutationKind::Drop,
            Self::Insert { .. } => MutationKind::Insert,
            Self::Alter { .. } => MutationKind::Alter,
            Self::Update { .. } => MutationKind::Update,
            Self::Edit { .. } => MutationKind::Edit,
            Self::Rename { .. } => MutationKind::Rename,
            Self::Delete { .. } => MutationKind::Delete,
        }
    }
}

/// A mutation on a warehouse.
#[derive(Debug, Clone)]
pub enum WarehouseMutation {
    /// Create a dataset under `name`, shaped like (and filled from)
    /// `source`.
    Create {
        /// The name of the new dataset.
        name: String,
        /// The dataset providing schema and rows.
        source: DatasetRef,
    },
}

/// A dataset that accepts mutations.
#[async_trait]
pub trait MutableDataset: fmt::Debug + Send + Sync {
    /// Fast, conservative, side-effect-free capability check.
    fn can_perform_mutation(&self, kind: MutationKind) -> bool;

    /// Applies a mutation. May fail at runtime even when
    /// `can_perform_mutation` returned true; attempting a mutation it
    /// rejects is a contract violation.
    async fn perform_mutation(&self, mutation: Mutation, job: &Job) -> Result<()>;

    /// The smallest set of columns that uniquely identifies a row.
    /// Key-addressed mutations (Update, Delete) require this to be
    /// non-empty.
    async fn identifier(&self, job: &Job) -> Result<OrderedColumns>;

    /// A read view over the mutated data.
    fn dataset(&self) -> DatasetRef;
}

/// A storage target datasets can be created in.
#[async_trait]
pub trait Warehouse: fmt::Debug + Send + Sync {
    /// Whether datasets here have a fixed column set. NoSQL targets
    /// return false and accept rows of any shape.
    fn has_fixed_columns(&self) -> bool;

    /// Fast, conservative, side-effect-free capability check.
    fn can_perform_mutation(&self, mutation: &WarehouseMutation) -> bool;

    /// Applies a warehouse mutation.
    async fn perform_mutation(&self, mutation: WarehouseMutation, job: &Job) -> Result<()>;
}

/// Projects one source row through a destination→source column map.
/// Unmapped destination columns fill Empty.
#[must_use]
pub fn mapped_row(
    destinations: &OrderedColumns,
    mapping: &[(Column, Column)],
    source: &Row,
) -> Vec<Value> {
    destinations
        .iter()
        .map(|destination| {
            mapping
                .iter()
                .find(|(to, _)| to == destination)
                .map_or(Value::Empty, |(_, from)| source.value(from))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_mutation_kinds() {
        assert_eq!(Mutation::Truncate.kind(), MutationKind::Truncate);
        assert_eq!(
            Mutation::Delete { keys: Vec::new() }.kind(),
            MutationKind::Delete
        );
    }

    #[test]
    fn test_mapped_row_fills_unmapped_with_empty() {
        let destinations = OrderedColumns::from_names(["id", "name", "note"]);
        let mapping = vec![
            (Column::new("name"), Column::new("label")),
            (Column::new("id"), Column::new("key")),
        ];
        let source = Row::new(
            vec![Value::Int(7), Value::from("x")],
            Arc::new(OrderedColumns::from_names(["key", "label"])),
        );
        assert_eq!(
            mapped_row(&destinations, &mapping, &source),
            vec![Value::Int(7), Value::from("x"), Value::Empty]
        );
    }
}
