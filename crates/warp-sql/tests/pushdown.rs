//! Pushdown SQL emission, observed through a recording backend.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use warp_core::{
    Aggregation, BinaryOp, Column, Expression, Function, Job, Order, OrderedColumns, Result,
    Value,
};
use warp_engine::{Calculation, Dataset, DatasetExt, DatasetRef};
use warp_sql::{
    Database, DatabaseRef, Dialect, PostgresDialect, QueryResult, SqlDataset, SqliteDialect,
};

/// A backend that records every statement and answers with canned
/// rows.
#[derive(Debug)]
struct RecordingDatabase {
    dialect: Arc<dyn Dialect>,
    identity: String,
    result: QueryResult,
    statements: Mutex<Vec<String>>,
}

impl RecordingDatabase {
    fn new(dialect: Arc<dyn Dialect>, identity: &str, result: QueryResult) -> Arc<Self> {
        Arc::new(Self {
            dialect,
            identity: identity.to_string(),
            result,
            statements: Mutex::new(Vec::new()),
        })
    }

    fn recorded(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl Database for RecordingDatabase {
    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::clone(&self.dialect)
    }

    fn identity(&self) -> String {
        self.identity.clone()
    }

    async fn query(&self, sql: &str, _job: &Job) -> Result<QueryResult> {
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(self.result.clone())
    }

    async fn execute(&self, sql: &str, _job: &Job) -> Result<u64> {
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(0)
    }

    async fn table_identifier(&self, _table: &str, _job: &Job) -> Result<OrderedColumns> {
        Ok(OrderedColumns::from_names(["id"]))
    }
}

fn empty_result(names: &[&str]) -> QueryResult {
    QueryResult {
        columns: OrderedColumns::from_names(names.iter().copied()),
        rows: Vec::new(),
    }
}

fn orders_dataset(database: &Arc<RecordingDatabase>) -> DatasetRef {
    let dataset: DatasetRef = Arc::new(SqlDataset::table(
        Arc::clone(database) as DatabaseRef,
        "orders",
        OrderedColumns::from_names(["price", "qty"]),
    ));
    dataset.coalesced()
}

#[tokio::test]
async fn test_filter_emits_where() {
    let database = RecordingDatabase::new(
        Arc::new(PostgresDialect::new()),
        "pg://main",
        empty_result(&["price", "qty"]),
    );
    let dataset = orders_dataset(&database).filter(Expression::binary(
        BinaryOp::Gt,
        Expression::sibling("price"),
        Expression::literal(Value::Int(100)),
    ));
    dataset.raster(&Job::new()).await.unwrap();
    let recorded = database.recorded();
    assert_eq!(
        recorded,
        vec![
            "SELECT * FROM \"orders\" AS \"orders\" WHERE (\"orders\".\"price\" > 100)"
                .to_string()
        ]
    );
}

#[tokio::test]
async fn test_coalesced_limit_sinks_into_subquery_below_calculation() {
    let database = RecordingDatabase::new(
        Arc::new(PostgresDialect::new()),
        "pg://main",
        empty_result(&["price", "qty", "total"]),
    );
    let dataset = orders_dataset(&database)
        .calculate(Calculation::new().with(
            "total",
            Expression::binary(
                BinaryOp::Mul,
                Expression::sibling("price"),
                Expression::sibling("qty"),
            ),
        ))
        .limit(5);
    dataset.raster(&Job::new()).await.unwrap();
    let recorded = database.recorded();
    assert_eq!(recorded.len(), 1);
    let sql = &recorded[0];
    // The limit is inside the subquery feeding the calculation.
    assert!(
        sql.contains("(SELECT * FROM \"orders\" AS \"orders\" LIMIT 5) AS"),
        "unexpected SQL: {sql}"
    );
    assert!(sql.contains("AS \"total\""), "unexpected SQL: {sql}");
    assert!(!sql.ends_with("LIMIT 5"), "limit must not be outermost: {sql}");
}

#[tokio::test]
async fn test_aggregate_emits_group_by() {
    let database = RecordingDatabase::new(
        Arc::new(PostgresDialect::new()),
        "pg://main",
        empty_result(&["city", "total"]),
    );
    let dataset: DatasetRef = Arc::new(SqlDataset::table(
        Arc::clone(&database) as DatabaseRef,
        "sales",
        OrderedColumns::from_names(["city", "amount"]),
    ));
    let aggregated = dataset.coalesced().aggregate(
        vec![(Column::new("city"), Expression::sibling("city"))],
        vec![(
            Column::new("total"),
            Aggregation::new(Expression::sibling("amount"), Function::Sum),
        )],
    );
    aggregated.raster(&Job::new()).await.unwrap();
    let recorded = database.recorded();
    assert_eq!(
        recorded,
        vec![
            "SELECT \"sales\".\"city\" AS \"city\", SUM(\"sales\".\"amount\") AS \"total\" \
             FROM \"sales\" AS \"sales\" GROUP BY \"sales\".\"city\""
                .to_string()
        ]
    );
}

#[tokio::test]
async fn test_filter_after_aggregate_becomes_having_subquery_or_where() {
    let database = RecordingDatabase::new(
        Arc::new(PostgresDialect::new()),
        "pg://main",
        empty_result(&["city", "total"]),
    );
    let dataset: DatasetRef = Arc::new(SqlDataset::table(
        Arc::clone(&database) as DatabaseRef,
        "sales",
        OrderedColumns::from_names(["city", "amount"]),
    ));
    let filtered = dataset
        .coalesced()
        .aggregate(
            vec![(Column::new("city"), Expression::sibling("city"))],
            vec![(
                Column::new("total"),
                Aggregation::new(Expression::sibling("amount"), Function::Sum),
            )],
        )
        .filter(Expression::binary(
            BinaryOp::Gt,
            Expression::sibling("total"),
            Expression::literal(Value::Int(10)),
        ));
    filtered.raster(&Job::new()).await.unwrap();
    let recorded = database.recorded();
    assert_eq!(recorded.len(), 1);
    // The aggregate closed its statement, so the filter lands on a
    // wrapping query and references the aggregated column.
    assert!(
        recorded[0].contains("WHERE") && recorded[0].contains("\"total\" > 10"),
        "unexpected SQL: {}",
        recorded[0]
    );
}

#[tokio::test]
async fn test_sort_and_distinct() {
    let database = RecordingDatabase::new(
        Arc::new(PostgresDialect::new()),
        "pg://main",
        empty_result(&["price", "qty"]),
    );
    let dataset = orders_dataset(&database)
        .distinct()
        .sort(vec![Order::descending(Expression::sibling("price"))]);
    dataset.raster(&Job::new()).await.unwrap();
    let recorded = database.recorded();
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].starts_with("SELECT * FROM (SELECT DISTINCT *"));
    assert!(recorded[0].contains("ORDER BY"));
    assert!(recorded[0].contains("DESC"));
}

#[tokio::test]
async fn test_union_pushes_down_only_within_one_database() {
    let shared = RecordingDatabase::new(
        Arc::new(PostgresDialect::new()),
        "pg://main",
        empty_result(&["a"]),
    );
    let left: DatasetRef = Arc::new(SqlDataset::table(
        Arc::clone(&shared) as DatabaseRef,
        "l",
        OrderedColumns::from_names(["a"]),
    ));
    let right: DatasetRef = Arc::new(SqlDataset::table(
        Arc::clone(&shared) as DatabaseRef,
        "r",
        OrderedColumns::from_names(["a"]),
    ));
    let unioned = left.coalesced().union(right);
    unioned.raster(&Job::new()).await.unwrap();
    let recorded = shared.recorded();
    assert_eq!(
        recorded,
        vec!["SELECT * FROM \"l\" AS \"l\" UNION ALL SELECT * FROM \"r\" AS \"r\"".to_string()]
    );

    // A second server: the union must not be pushed down.
    let elsewhere = RecordingDatabase::new(
        Arc::new(PostgresDialect::new()),
        "pg://replica",
        empty_result(&["a"]),
    );
    let left: DatasetRef = Arc::new(SqlDataset::table(
        Arc::clone(&shared) as DatabaseRef,
        "l",
        OrderedColumns::from_names(["a"]),
    ));
    let right: DatasetRef = Arc::new(SqlDataset::table(
        Arc::clone(&elsewhere) as DatabaseRef,
        "r",
        OrderedColumns::from_names(["a"]),
    ));
    let unioned = left.coalesced().union(right);
    unioned.raster(&Job::new()).await.unwrap();
    assert!(elsewhere
        .recorded()
        .iter()
        .all(|sql| !sql.contains("UNION")));
}

#[tokio::test]
async fn test_join_pushes_down_with_subquery_and_on() {
    let database = RecordingDatabase::new(
        Arc::new(PostgresDialect::new()),
        "pg://main",
        empty_result(&["k", "n", "tag"]),
    );
    let left: DatasetRef = Arc::new(SqlDataset::table(
        Arc::clone(&database) as DatabaseRef,
        "l",
        OrderedColumns::from_names(["k", "n"]),
    ));
    let right: DatasetRef = Arc::new(SqlDataset::table(
        Arc::clone(&database) as DatabaseRef,
        "r",
        OrderedColumns::from_names(["k", "tag"]),
    ));
    let joined = left.coalesced().join(warp_engine::JoinClause {
        join_type: warp_engine::JoinType::Left,
        foreign: right,
        condition: Expression::binary(
            BinaryOp::Eq,
            Expression::sibling("k"),
            Expression::foreign("k"),
        ),
    });
    joined.raster(&Job::new()).await.unwrap();
    let recorded = database.recorded();
    assert_eq!(recorded.len(), 1);
    let sql = &recorded[0];
    assert!(sql.contains("LEFT JOIN (SELECT * FROM \"r\" AS \"r\")"), "{sql}");
    assert!(sql.contains(" ON (\"l\".\"k\" = "), "{sql}");
    // Colliding column k emits once.
    assert_eq!(sql.matches("AS \"k\"").count(), 0, "{sql}");
}

#[tokio::test]
async fn test_unsupported_construct_falls_back_to_stream_path() {
    // SQLite has no regex operator; the filter must run in memory on
    // the fetched rows.
    let database = RecordingDatabase::new(
        Arc::new(SqliteDialect::new()),
        "sqlite://main",
        QueryResult {
            columns: OrderedColumns::from_names(["name"]),
            rows: vec![
                vec![Value::from("alpha")],
                vec![Value::from("beta")],
                vec![Value::from("architect")],
            ],
        },
    );
    let dataset: DatasetRef = Arc::new(SqlDataset::table(
        Arc::clone(&database) as DatabaseRef,
        "people",
        OrderedColumns::from_names(["name"]),
    ));
    let filtered = dataset.coalesced().filter(Expression::binary(
        BinaryOp::MatchesRegex,
        Expression::sibling("name"),
        Expression::literal(Value::from("^a")),
    ));
    let raster = filtered.raster(&Job::new()).await.unwrap();
    assert_eq!(raster.row_count(), 2);
    // The backend only ever saw the bare table scan.
    assert_eq!(
        database.recorded(),
        vec!["SELECT * FROM \"people\" AS \"people\"".to_string()]
    );
}

#[tokio::test]
async fn test_random_pushdown_orders_by_backend_random() {
    let database = RecordingDatabase::new(
        Arc::new(PostgresDialect::new()),
        "pg://main",
        empty_result(&["price", "qty"]),
    );
    let dataset = orders_dataset(&database).random(3);
    dataset.raster(&Job::new()).await.unwrap();
    let recorded = database.recorded();
    assert_eq!(
        recorded,
        vec!["SELECT * FROM \"orders\" AS \"orders\" ORDER BY RANDOM() LIMIT 3".to_string()]
    );
}
