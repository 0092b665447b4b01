//! End-to-end tests against an in-memory SQLite database.

use std::sync::Arc;

use warp_core::{
    Aggregation, BinaryOp, Column, Expression, Function, Job, Order, OrderedColumns, Raster,
    Value,
};
use warp_engine::{Dataset, DatasetExt, DatasetRef, RasterDataset};
use warp_sql::{
    Database, DatabaseRef, MutableDataset, Mutation, MutationKind, SqlDataset, Warehouse,
    WarehouseMutation,
};
use warp_sqlite::{SqliteDatabase, SqliteMutableDataset, SqliteWarehouse};

fn sales_raster() -> Raster {
    Raster::new(
        OrderedColumns::from_names(["city", "sales"]),
        vec![
            vec![Value::from("A"), Value::Int(10)],
            vec![Value::from("A"), Value::Int(20)],
            vec![Value::from("B"), Value::Int(5)],
            vec![Value::from("B"), Value::Int(7)],
            vec![Value::from("B"), Value::Int(8)],
        ],
    )
}

async fn sales_database() -> Arc<SqliteDatabase> {
    let database = Arc::new(SqliteDatabase::connect("sqlite::memory:").await.unwrap());
    let warehouse = SqliteWarehouse::new(Arc::clone(&database));
    let source: DatasetRef = Arc::new(RasterDataset::from_raster(sales_raster()));
    warehouse
        .perform_mutation(
            WarehouseMutation::Create {
                name: "sales".to_string(),
                source,
            },
            &Job::new(),
        )
        .await
        .unwrap();
    database
}

fn sorted_rows(raster: &Raster) -> Vec<Vec<Value>> {
    let mut rows = raster.rows().to_vec();
    rows.sort_by(|a, b| {
        for (x, y) in a.iter().zip(b.iter()) {
            let ordering = x.total_cmp(y);
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
    rows
}

#[tokio::test]
async fn test_warehouse_create_and_scan() {
    let database = sales_database().await;
    let dataset: DatasetRef = Arc::new(SqlDataset::table(
        Arc::clone(&database) as DatabaseRef,
        "sales",
        OrderedColumns::from_names(["city", "sales"]),
    ));
    let raster = dataset.raster(&Job::new()).await.unwrap();
    assert_eq!(raster.row_count(), 5);
    assert_eq!(raster.columns().len(), 2);
}

#[tokio::test]
async fn test_pushdown_parity_with_raster_path() {
    let database = sales_database().await;
    let condition = Expression::binary(
        BinaryOp::Gt,
        Expression::sibling("sales"),
        Expression::literal(Value::Int(6)),
    );
    let groups = vec![(Column::new("city"), Expression::sibling("city"))];
    let values = vec![(
        Column::new("total"),
        Aggregation::new(Expression::sibling("sales"), Function::Sum),
    )];

    let sql: DatasetRef = Arc::new(SqlDataset::table(
        Arc::clone(&database) as DatabaseRef,
        "sales",
        OrderedColumns::from_names(["city", "sales"]),
    ));
    let pushed = sql
        .coalesced()
        .filter(condition.clone())
        .aggregate(groups.clone(), values.clone());

    let in_memory: DatasetRef = Arc::new(RasterDataset::from_raster(sales_raster()));
    let reference = in_memory
        .coalesced()
        .filter(condition)
        .aggregate(groups, values);

    let job = Job::new();
    assert_eq!(
        sorted_rows(&pushed.raster(&job).await.unwrap()),
        sorted_rows(&reference.raster(&job).await.unwrap())
    );
}

#[tokio::test]
async fn test_limit_and_sort_pushdown() {
    let database = sales_database().await;
    let dataset: DatasetRef = Arc::new(SqlDataset::table(
        Arc::clone(&database) as DatabaseRef,
        "sales",
        OrderedColumns::from_names(["city", "sales"]),
    ));
    let top = dataset
        .coalesced()
        .sort(vec![Order::descending(Expression::sibling("sales"))])
        .limit(2);
    let raster = top.raster(&Job::new()).await.unwrap();
    assert_eq!(raster.row_count(), 2);
    assert_eq!(raster.value_at(0, 1), Value::Int(20));
    assert_eq!(raster.value_at(1, 1), Value::Int(10));
}

#[tokio::test]
async fn test_identifier_discovery() {
    let database = Arc::new(SqliteDatabase::connect("sqlite::memory:").await.unwrap());
    let job = Job::new();
    database
        .execute(
            "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT)",
            &job,
        )
        .await
        .unwrap();
    let key = database.table_identifier("people", &job).await.unwrap();
    let names: Vec<&str> = key.iter().map(Column::name).collect();
    assert_eq!(names, ["id"]);

    database
        .execute("CREATE TABLE keyless (a TEXT, b TEXT)", &job)
        .await
        .unwrap();
    assert!(database.table_identifier("keyless", &job).await.is_err());
}

#[tokio::test]
async fn test_mutations_round_trip() {
    let database = Arc::new(SqliteDatabase::connect("sqlite::memory:").await.unwrap());
    let job = Job::new();
    database
        .execute(
            "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT, note TEXT)",
            &job,
        )
        .await
        .unwrap();
    let table = SqliteMutableDataset::open(Arc::clone(&database), "people")
        .await
        .unwrap();

    assert!(table.can_perform_mutation(MutationKind::Insert));
    assert!(!table.can_perform_mutation(MutationKind::Edit));

    // Insert through a column map; the unmapped note column fills
    // NULL.
    let source = Raster::new(
        OrderedColumns::from_names(["key", "label"]),
        vec![
            vec![Value::Int(1), Value::from("ada")],
            vec![Value::Int(2), Value::from("grace")],
        ],
    );
    table
        .perform_mutation(
            Mutation::Insert {
                raster: source,
                mapping: vec![
                    (Column::new("id"), Column::new("key")),
                    (Column::new("name"), Column::new("label")),
                ],
            },
            &job,
        )
        .await
        .unwrap();

    let read = table.dataset();
    let raster = read.raster(&job).await.unwrap();
    assert_eq!(raster.row_count(), 2);
    assert_eq!(raster.value_at(0, 2), Value::Empty);

    // Key-addressed update verifies the old value.
    table
        .perform_mutation(
            Mutation::Update {
                key: vec![(Column::new("id"), Value::Int(1))],
                column: Column::new("name"),
                old: Value::from("ada"),
                new: Value::from("ada lovelace"),
            },
            &job,
        )
        .await
        .unwrap();
    let raster = table.dataset().raster(&job).await.unwrap();
    assert!(raster
        .rows()
        .iter()
        .any(|row| row[1] == Value::from("ada lovelace")));

    // Delete by key.
    table
        .perform_mutation(
            Mutation::Delete {
                keys: vec![vec![(Column::new("id"), Value::Int(2))]],
            },
            &job,
        )
        .await
        .unwrap();
    assert_eq!(table.dataset().raster(&job).await.unwrap().row_count(), 1);

    // Update without a key is a contract violation.
    let rejected = table
        .perform_mutation(
            Mutation::Update {
                key: Vec::new(),
                column: Column::new("name"),
                old: Value::Empty,
                new: Value::Empty,
            },
            &job,
        )
        .await;
    assert!(rejected.is_err());

    // Truncate keeps the table, drops the rows.
    table
        .perform_mutation(Mutation::Truncate, &job)
        .await
        .unwrap();
    assert_eq!(table.dataset().raster(&job).await.unwrap().row_count(), 0);
}

#[tokio::test]
async fn test_rename_column() {
    let database = Arc::new(SqliteDatabase::connect("sqlite::memory:").await.unwrap());
    let job = Job::new();
    database
        .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, a TEXT)", &job)
        .await
        .unwrap();
    let table = SqliteMutableDataset::open(Arc::clone(&database), "t")
        .await
        .unwrap();
    table
        .perform_mutation(
            Mutation::Rename {
                from: Column::new("a"),
                to: Column::new("b"),
            },
            &job,
        )
        .await
        .unwrap();
    let reopened = SqliteMutableDataset::open(Arc::clone(&database), "t")
        .await
        .unwrap();
    let columns = reopened.dataset().columns(&job).await.unwrap();
    assert!(columns.contains(&Column::new("b")));
    assert!(!columns.contains(&Column::new("a")));
}
