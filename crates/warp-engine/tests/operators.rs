//! End-to-end operator semantics over the raster and stream paths.

use std::collections::HashSet;
use std::sync::Arc;

use warp_core::{
    Aggregation, BinaryOp, Column, Expression, Function, Job, Order, OrderedColumns, Raster,
    Value,
};
use warp_engine::{
    Calculation, DatasetExt, DatasetRef, JoinClause, JoinType, RasterDataset, StreamDataset,
};

fn dataset(names: &[&str], rows: Vec<Vec<Value>>) -> DatasetRef {
    let raster = Raster::new(OrderedColumns::from_names(names.iter().copied()), rows);
    let dataset: DatasetRef = Arc::new(RasterDataset::from_raster(raster));
    dataset.coalesced()
}

fn sales() -> DatasetRef {
    dataset(
        &["city", "sales"],
        vec![
            vec![Value::from("A"), Value::Int(10)],
            vec![Value::from("A"), Value::Int(20)],
            vec![Value::from("B"), Value::Int(5)],
            vec![Value::from("B"), Value::Int(7)],
            vec![Value::from("B"), Value::Int(8)],
        ],
    )
}

/// Rows as a multiset, for operators with no order guarantee.
fn row_multiset(raster: &Raster) -> Vec<Vec<Value>> {
    let mut rows = raster.rows().to_vec();
    rows.sort_by(|a, b| {
        for (x, y) in a.iter().zip(b.iter()) {
            let ordering = x.total_cmp(y);
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        a.len().cmp(&b.len())
    });
    rows
}

#[tokio::test]
async fn test_filter_then_aggregate_scenario() {
    let result = sales()
        .filter(Expression::binary(
            BinaryOp::Gt,
            Expression::sibling("sales"),
            Expression::literal(Value::Int(6)),
        ))
        .aggregate(
            vec![(Column::new("city"), Expression::sibling("city"))],
            vec![(
                Column::new("total"),
                Aggregation::new(Expression::sibling("sales"), Function::Sum),
            )],
        );
    let job = Job::new();
    let raster = result.raster(&job).await.unwrap();
    assert_eq!(
        row_multiset(&raster),
        vec![
            vec![Value::from("A"), Value::Double(30.0)],
            vec![Value::from("B"), Value::Double(15.0)],
        ]
    );
}

#[tokio::test]
async fn test_hash_join_multiset() {
    let left = dataset(
        &["col1", "n"],
        vec![
            vec![Value::from("k"), Value::Int(1)],
            vec![Value::from("k"), Value::Int(2)],
            vec![Value::from("m"), Value::Int(3)],
        ],
    );
    let right = dataset(
        &["col1", "tag"],
        vec![
            vec![Value::from("k"), Value::from("X")],
            vec![Value::from("m"), Value::from("Y")],
            vec![Value::from("m"), Value::from("Z")],
        ],
    );
    let joined = left.join(JoinClause {
        join_type: JoinType::Inner,
        foreign: right,
        condition: Expression::binary(
            BinaryOp::Eq,
            Expression::sibling("col1"),
            Expression::foreign("col1"),
        ),
    });
    let raster = joined.raster(&Job::new()).await.unwrap();
    assert_eq!(
        row_multiset(&raster),
        vec![
            vec![Value::from("k"), Value::Int(1), Value::from("X")],
            vec![Value::from("k"), Value::Int(2), Value::from("X")],
            vec![Value::from("m"), Value::Int(3), Value::from("Y")],
            vec![Value::from("m"), Value::Int(3), Value::from("Z")],
        ]
    );
}

#[tokio::test]
async fn test_left_join_keeps_unmatched_once() {
    let left = dataset(
        &["k", "n"],
        vec![
            vec![Value::from("k"), Value::Int(1)],
            vec![Value::from("n"), Value::Int(2)],
        ],
    );
    let right = dataset(&["k", "tag"], vec![vec![Value::from("k"), Value::from("X")]]);
    let condition = Expression::binary(
        BinaryOp::Eq,
        Expression::sibling("k"),
        Expression::foreign("k"),
    );

    let inner = left.join(JoinClause {
        join_type: JoinType::Inner,
        foreign: right.clone(),
        condition: condition.clone(),
    });
    assert_eq!(inner.raster(&Job::new()).await.unwrap().row_count(), 1);

    let outer = left.join(JoinClause {
        join_type: JoinType::Left,
        foreign: right,
        condition,
    });
    let raster = outer.raster(&Job::new()).await.unwrap();
    assert_eq!(
        row_multiset(&raster),
        vec![
            vec![Value::from("k"), Value::Int(1), Value::from("X")],
            vec![Value::from("n"), Value::Int(2), Value::Empty],
        ]
    );
}

#[tokio::test]
async fn test_join_equivalence_hash_vs_cartesian() {
    let left = dataset(
        &["k", "n"],
        vec![
            vec![Value::Int(1), Value::Int(10)],
            vec![Value::Int(2), Value::Int(20)],
            vec![Value::Int(2), Value::Int(21)],
        ],
    );
    let right = dataset(
        &["k", "tag"],
        vec![
            vec![Value::Int(1), Value::from("a")],
            vec![Value::Int(2), Value::from("b")],
        ],
    );
    // Factorizing condition: hash path.
    let factorized = Expression::binary(
        BinaryOp::Eq,
        Expression::sibling("k"),
        Expression::foreign("k"),
    );
    // Equivalent but non-factorizing: forces the Cartesian scan.
    let cartesian = Expression::call(
        Function::And,
        vec![Expression::binary(
            BinaryOp::Eq,
            Expression::binary(
                BinaryOp::Add,
                Expression::sibling("k"),
                Expression::foreign("k"),
            ),
            Expression::binary(
                BinaryOp::Mul,
                Expression::foreign("k"),
                Expression::literal(Value::Int(2)),
            ),
        )],
    );
    let via_hash = left.join(JoinClause {
        join_type: JoinType::Inner,
        foreign: right.clone(),
        condition: factorized,
    });
    let via_cartesian = left.join(JoinClause {
        join_type: JoinType::Inner,
        foreign: right,
        condition: cartesian,
    });
    let job = Job::new();
    assert_eq!(
        row_multiset(&via_hash.raster(&job).await.unwrap()),
        row_multiset(&via_cartesian.raster(&job).await.unwrap())
    );
}

#[tokio::test]
async fn test_transpose_involution() {
    let source = dataset(
        &["name", "x", "y"],
        vec![
            vec![Value::from("r1"), Value::Int(1), Value::Int(2)],
            vec![Value::from("r2"), Value::Int(3), Value::Int(4)],
        ],
    );
    let round_tripped = source.transpose().transpose();
    let job = Job::new();
    let original = source.raster(&job).await.unwrap();
    let result = round_tripped.raster(&job).await.unwrap();
    let original_names: Vec<&str> = original.columns().iter().map(Column::name).collect();
    let result_names: Vec<&str> = result.columns().iter().map(Column::name).collect();
    assert_eq!(original_names, result_names);
    assert_eq!(row_multiset(&original), row_multiset(&result));
}

#[tokio::test]
async fn test_distinct_idempotence() {
    let source = dataset(
        &["v"],
        vec![
            vec![Value::Int(1)],
            vec![Value::Int(1)],
            vec![Value::Int(2)],
            vec![Value::Int(1)],
        ],
    );
    let once = source.distinct();
    let twice = once.distinct();
    let job = Job::new();
    assert_eq!(
        row_multiset(&once.raster(&job).await.unwrap()),
        row_multiset(&twice.raster(&job).await.unwrap())
    );
    assert_eq!(once.raster(&job).await.unwrap().row_count(), 2);
}

#[tokio::test]
async fn test_union_fills_missing_with_empty() {
    let left = dataset(&["a", "b"], vec![vec![Value::Int(1), Value::Int(2)]]);
    let right = dataset(&["b", "c"], vec![vec![Value::Int(3), Value::Int(4)]]);
    let unioned = left.union(right);
    let raster = unioned.raster(&Job::new()).await.unwrap();
    let names: Vec<&str> = raster.columns().iter().map(Column::name).collect();
    assert_eq!(names, ["a", "b", "c"]);
    assert_eq!(
        raster.rows().to_vec(),
        vec![
            vec![Value::Int(1), Value::Int(2)],
            vec![Value::Empty, Value::Int(3), Value::Int(4)],
        ]
    );
}

#[tokio::test]
async fn test_sort_is_stable() {
    let source = dataset(
        &["k", "seq"],
        vec![
            vec![Value::Int(2), Value::Int(0)],
            vec![Value::Int(1), Value::Int(1)],
            vec![Value::Int(2), Value::Int(2)],
            vec![Value::Int(1), Value::Int(3)],
        ],
    );
    let sorted = source.sort(vec![Order::ascending(Expression::sibling("k"))]);
    let raster = sorted.raster(&Job::new()).await.unwrap();
    assert_eq!(
        raster.rows().to_vec(),
        vec![
            vec![Value::Int(1), Value::Int(1)],
            vec![Value::Int(1), Value::Int(3)],
            vec![Value::Int(2), Value::Int(0)],
            vec![Value::Int(2), Value::Int(2)],
        ]
    );
}

#[tokio::test]
async fn test_limit_chain_coalesces_to_minimum() {
    let source = dataset(&["n"], (0..100).map(|i| vec![Value::Int(i)]).collect());
    let limited = source.limit(5).limit(10).limit(3);
    let raster = limited.raster(&Job::new()).await.unwrap();
    assert_eq!(raster.row_count(), 3);
}

#[tokio::test]
async fn test_filter_calculate_reorder_is_semantically_equal() {
    let calculation = Calculation::new().with(
        "total",
        Expression::binary(
            BinaryOp::Mul,
            Expression::sibling("sales"),
            Expression::literal(Value::Int(2)),
        ),
    );
    let condition = Expression::binary(
        BinaryOp::Eq,
        Expression::sibling("city"),
        Expression::literal(Value::from("B")),
    );
    // Coalesced form: filter sinks below the calculation.
    let fused = sales()
        .calculate(calculation.clone())
        .filter(condition.clone());
    // Reference form evaluated without reordering.
    let reference = sales().filter(condition).calculate(calculation);
    let job = Job::new();
    assert_eq!(
        row_multiset(&fused.raster(&job).await.unwrap()),
        row_multiset(&reference.raster(&job).await.unwrap())
    );
}

#[tokio::test]
async fn test_random_sample_size() {
    let source = dataset(&["n"], (0..500).map(|i| vec![Value::Int(i)]).collect());
    let sampled = source.random(10);
    let raster = sampled.raster(&Job::new()).await.unwrap();
    assert_eq!(raster.row_count(), 10);
    // Sampled rows come from the population.
    for row in raster.rows() {
        let n = row[0].int_value().unwrap();
        assert!((0..500).contains(&n));
    }
}

#[tokio::test]
async fn test_pivot_fills_missing_with_invalid() {
    let source = dataset(
        &["year", "city", "sales"],
        vec![
            vec![Value::Int(2001), Value::from("A"), Value::Int(10)],
            vec![Value::Int(2001), Value::from("B"), Value::Int(20)],
            vec![Value::Int(2002), Value::from("A"), Value::Int(30)],
        ],
    );
    let pivoted = Arc::clone(&source).apply(warp_engine::Operation::Pivot {
        horizontal: vec![Column::new("city")],
        vertical: vec![Column::new("year")],
        values: vec![Column::new("sales")],
    });
    let raster = pivoted.raster(&Job::new()).await.unwrap();
    let names: Vec<&str> = raster.columns().iter().map(Column::name).collect();
    assert_eq!(names, ["year", "A", "B"]);
    assert_eq!(
        raster.rows().to_vec(),
        vec![
            vec![Value::Int(2001), Value::Int(10), Value::Int(20)],
            vec![Value::Int(2002), Value::Int(30), Value::Invalid],
        ]
    );
}

#[tokio::test]
async fn test_flatten_emits_one_row_per_cell() {
    let source = dataset(&["a", "b"], vec![vec![Value::Int(1), Value::Int(2)]]);
    let flattened = Arc::clone(&source).apply(warp_engine::Operation::Flatten {
        value_column: Column::new("value"),
        name_column: Some(Column::new("column")),
        row_column: Some(Column::new("row")),
        row_identifier: Some(Expression::literal(Value::Int(0))),
    });
    let raster = flattened.raster(&Job::new()).await.unwrap();
    assert_eq!(
        raster.rows().to_vec(),
        vec![
            vec![Value::Int(0), Value::from("a"), Value::Int(1)],
            vec![Value::Int(0), Value::from("b"), Value::Int(2)],
        ]
    );
}

#[tokio::test]
async fn test_cancellation_returns_empty_raster() {
    let source = dataset(&["n"], (0..10_000).map(|i| vec![Value::Int(i)]).collect());
    let sorted = source.sort(vec![Order::ascending(Expression::sibling("n"))]);
    let job = Job::new();
    job.cancel();
    let raster = sorted.raster(&job).await.unwrap();
    assert_eq!(raster.row_count(), 0);
}

#[tokio::test]
async fn test_unique_values() {
    let unique: HashSet<Value> = sales()
        .unique(&Expression::sibling("city"), &Job::new())
        .await
        .unwrap();
    assert_eq!(unique.len(), 2);
    assert!(unique.contains(&Value::from("A")));
    assert!(unique.contains(&Value::from("B")));
}

#[tokio::test]
async fn test_stream_path_matches_raster_path() {
    let condition = Expression::binary(
        BinaryOp::Gt,
        Expression::sibling("sales"),
        Expression::literal(Value::Int(6)),
    );
    let via_raster = sales().filter(condition.clone());
    let streamed: DatasetRef = Arc::new(StreamDataset::new(sales().stream()));
    let via_stream = streamed.filter(condition);
    let job = Job::new();
    assert_eq!(
        row_multiset(&via_raster.raster(&job).await.unwrap()),
        row_multiset(&via_stream.raster(&job).await.unwrap())
    );
}

#[tokio::test]
async fn test_calculate_sees_pre_batch_values() {
    // Swapping two columns in one step reads the original values.
    let source = dataset(&["a", "b"], vec![vec![Value::Int(1), Value::Int(2)]]);
    let swapped = source.calculate(
        Calculation::new()
            .with("a", Expression::sibling("b"))
            .with("b", Expression::sibling("a")),
    );
    let raster = swapped.raster(&Job::new()).await.unwrap();
    assert_eq!(
        raster.rows().to_vec(),
        vec![vec![Value::Int(2), Value::Int(1)]]
    );
}

#[tokio::test]
async fn test_offset_then_limit() {
    let source = dataset(&["n"], (0..10).map(|i| vec![Value::Int(i)]).collect());
    let page = source.offset(4).limit(3);
    let raster = page.raster(&Job::new()).await.unwrap();
    assert_eq!(
        raster.rows().to_vec(),
        vec![vec![Value::Int(4)], vec![Value::Int(5)], vec![Value::Int(6)]]
    );
}
