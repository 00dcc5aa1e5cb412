/// Relational Query Service - Read-Only Query Execution and Result Comparison
///
/// **Core Responsibility:**
/// Run one candidate query against the exercise dataset and compare the
/// materialized result set with the expected rows.
///
/// **Pipeline:**
/// 1. Security gate (no connection is opened for rejected queries)
/// 2. Dataset resolution: file, connection string, named configuration, or
///    an in-memory database seeded from the testcase schema
/// 3. One connection per call, closed on every path
/// 4. Row-by-row comparison through the equivalence utility
///
/// **Security Gate:**
/// Upper-cased, trimmed query must start with a read-only clause keyword and
/// must not contain any mutating keyword as a substring. Deliberately
/// conservative: `SELECT created_at` is rejected because it contains CREATE.

use assay_common::config::{DatasetConfig, EngineConfig};
use assay_common::types::{
    ExecutionEnvironment, ExecutionRequest, ExecutionResult, QueryPayload, ResultPayload,
};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rusqlite::{Connection, OpenFlags};
use serde_json::{Map, Number, Value};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use crate::equivalence::{json_values_match, DEFAULT_TOLERANCE};
use crate::error::EngineError;
use crate::service::ExecutionService;

const READ_ONLY_KEYWORDS: [&str; 2] = ["SELECT", "WITH"];
const FORBIDDEN_KEYWORDS: [&str; 8] = [
    "DROP", "DELETE", "UPDATE", "INSERT", "CREATE", "ALTER", "TRUNCATE", "EXEC",
];
const FILE_EXTENSIONS: [&str; 3] = [".db", ".sqlite", ".sqlite3"];
const SQLITE_SCHEME: &str = "sqlite://";

/// Result sets larger than this are refused rather than materialized
const MAX_ROWS: usize = 10_000;

/// Wait for an interrupted query task to wind down
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);

/// Reason a query was refused by the security gate
pub fn check_query_safety(query: &str) -> Result<(), String> {
    let normalized = query.trim().to_uppercase();

    if normalized.is_empty() {
        return Err("query is empty".to_string());
    }

    if !READ_ONLY_KEYWORDS.iter().any(|k| normalized.starts_with(k)) {
        return Err(format!(
            "only read-only queries are allowed (must start with {})",
            READ_ONLY_KEYWORDS.join(" or ")
        ));
    }

    if let Some(keyword) = FORBIDDEN_KEYWORDS.iter().find(|k| normalized.contains(*k)) {
        return Err(format!("forbidden keyword {}", keyword));
    }

    Ok(())
}

/// Where the query runs
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetLocation {
    /// Local SQLite file, opened read-only
    File(PathBuf),
    /// In-memory SQLite database seeded with the testcase schema
    Memory { schema: String },
    /// Client-server engine addressed by connection string
    ClientServer(String),
}

/// Resolve the testcase's dataset reference
pub fn resolve_dataset(
    reference: Option<&str>,
    input_data: Option<&Value>,
    config: &DatasetConfig,
) -> Result<DatasetLocation, EngineError> {
    match reference.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reference) => resolve_reference(reference, config, true),
        None => {
            let schema = input_data
                .and_then(|data| data.get("schema"))
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty());
            match schema {
                Some(schema) => Ok(DatasetLocation::Memory {
                    schema: schema.to_string(),
                }),
                None => Err(EngineError::UnsupportedDataset(
                    "testcase has neither a dataset reference nor a schema".to_string(),
                )),
            }
        }
    }
}

fn resolve_reference(
    reference: &str,
    config: &DatasetConfig,
    allow_named: bool,
) -> Result<DatasetLocation, EngineError> {
    if let Some(path) = reference.strip_prefix(SQLITE_SCHEME) {
        return resolve_file(path, &config.root);
    }

    let lowered = reference.to_lowercase();
    if FILE_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext)) {
        return resolve_file(reference, &config.root);
    }

    if reference.contains("://") {
        return Ok(DatasetLocation::ClientServer(reference.to_string()));
    }

    if allow_named {
        if let Some(target) = config.named.get(reference) {
            return resolve_reference(target, config, false);
        }
    }

    Err(EngineError::UnsupportedDataset(reference.to_string()))
}

fn resolve_file(relative: &str, root: &Path) -> Result<DatasetLocation, EngineError> {
    let relative = Path::new(relative);
    let escapes = relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes {
        return Err(EngineError::UnsupportedDataset(format!(
            "dataset path must stay under the datasets root: {}",
            relative.display()
        )));
    }

    let path = root.join(relative);
    if !path.is_file() {
        return Err(EngineError::UnsupportedDataset(format!(
            "dataset file not found: {}",
            path.display()
        )));
    }
    Ok(DatasetLocation::File(path))
}

/// Materialized result set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

/// Client-server relational engine, supplied by the embedding application
#[async_trait]
pub trait RemoteQueryEngine: Send + Sync {
    /// Run `sql` over one fresh connection to `connection`, releasing it
    /// before returning
    async fn query(
        &self,
        connection: &str,
        sql: &str,
        timeout: Duration,
    ) -> Result<QueryRows, EngineError>;
}

fn sqlite_to_json(value: rusqlite::types::Value) -> Value {
    use rusqlite::types::Value as Sql;
    match value {
        Sql::Null => Value::Null,
        Sql::Integer(i) => Value::from(i),
        Sql::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        Sql::Text(s) => Value::String(s),
        Sql::Blob(b) => Value::String(general_purpose::STANDARD.encode(b)),
    }
}

/// Open the connection only; an in-memory dataset is seeded by [`seed_schema`]
fn open_connection(location: &DatasetLocation) -> Result<Connection, EngineError> {
    match location {
        DatasetLocation::File(path) => Ok(Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?),
        DatasetLocation::Memory { .. } => Ok(Connection::open_in_memory()?),
        DatasetLocation::ClientServer(url) => Err(EngineError::Internal(format!(
            "{} is not a local dataset",
            url
        ))),
    }
}

fn seed_schema(conn: &Connection, location: &DatasetLocation) -> Result<(), EngineError> {
    if let DatasetLocation::Memory { schema } = location {
        conn.execute_batch(schema)
            .map_err(|e| EngineError::Query(format!("testcase schema failed: {}", e)))?;
    }
    Ok(())
}

fn read_rows(conn: &Connection, sql: &str) -> Result<QueryRows, EngineError> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query([])?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        if records.len() == MAX_ROWS {
            return Err(EngineError::Query(format!(
                "result set exceeds {} rows",
                MAX_ROWS
            )));
        }
        let mut record = Map::new();
        for (idx, name) in columns.iter().enumerate() {
            let value: rusqlite::types::Value = row.get(idx)?;
            record.insert(name.clone(), sqlite_to_json(value));
        }
        records.push(record);
    }

    Ok(QueryRows {
        columns,
        rows: records,
    })
}

/// Run a query against a local SQLite dataset on a blocking thread.
///
/// The connection lives entirely inside the blocking task and is dropped
/// when it ends. The interrupt handle is published before any statement
/// runs, so schema seeding is interruptible too. On timeout the task is
/// interrupted and awaited for at most [`INTERRUPT_GRACE`].
async fn query_sqlite(
    location: DatasetLocation,
    sql: String,
    limit: Duration,
) -> Result<QueryRows, EngineError> {
    let (handle_tx, mut handle_rx) = oneshot::channel();
    let cancelled = Arc::new(AtomicBool::new(false));
    let task_cancelled = Arc::clone(&cancelled);

    let mut task = tokio::task::spawn_blocking(move || {
        let conn = open_connection(&location)?;
        let _ = handle_tx.send(conn.get_interrupt_handle());
        seed_schema(&conn, &location)?;
        // an interrupt issued between statements is lost; the flag is not
        if task_cancelled.load(Ordering::SeqCst) {
            return Err(EngineError::Timeout(limit.as_secs()));
        }
        read_rows(&conn, &sql)
    });

    match tokio::time::timeout(limit, &mut task).await {
        Ok(joined) => {
            joined.map_err(|e| EngineError::Internal(format!("query task failed: {}", e)))?
        }
        Err(_) => {
            cancelled.store(true, Ordering::SeqCst);
            if let Ok(handle) = handle_rx.try_recv() {
                handle.interrupt();
            }
            if tokio::time::timeout(INTERRUPT_GRACE, task).await.is_err() {
                warn!(
                    grace_ms = INTERRUPT_GRACE.as_millis() as u64,
                    "Query task still running after interrupt"
                );
            }
            Err(EngineError::Timeout(limit.as_secs()))
        }
    }
}

/// First difference between actual and expected rows, if any
pub fn compare_rows(
    actual: &[Map<String, Value>],
    expected: &[Value],
    tolerance: f64,
) -> Result<Option<String>, EngineError> {
    if actual.len() != expected.len() {
        return Ok(Some(format!(
            "row count mismatch: expected {}, got {}",
            expected.len(),
            actual.len()
        )));
    }

    for (idx, (actual_row, expected_row)) in actual.iter().zip(expected).enumerate() {
        let expected_row = expected_row.as_object().ok_or_else(|| {
            EngineError::InvalidCriteria(format!("expected row {} is not an object", idx))
        })?;

        let actual_keys: BTreeSet<&str> = actual_row.keys().map(String::as_str).collect();
        let expected_keys: BTreeSet<&str> = expected_row.keys().map(String::as_str).collect();
        if actual_keys != expected_keys {
            return Ok(Some(format!(
                "row {}: columns differ (expected {:?}, got {:?})",
                idx, expected_keys, actual_keys
            )));
        }

        for (key, expected_value) in expected_row {
            let actual_value = &actual_row[key];
            if !json_values_match(actual_value, expected_value, tolerance) {
                return Ok(Some(format!(
                    "row {}, column {}: expected {}, got {}",
                    idx, key, expected_value, actual_value
                )));
            }
        }
    }

    Ok(None)
}

pub struct QueryService {
    datasets: DatasetConfig,
    remote: Option<Arc<dyn RemoteQueryEngine>>,
}

impl QueryService {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            datasets: config.datasets.clone(),
            remote: None,
        }
    }

    /// Enable connection-string datasets
    pub fn with_remote_engine(mut self, engine: Arc<dyn RemoteQueryEngine>) -> Self {
        self.remote = Some(engine);
        self
    }

    #[instrument(skip(self, sql))]
    async fn query(
        &self,
        location: DatasetLocation,
        sql: &str,
        limit: Duration,
    ) -> Result<QueryRows, EngineError> {
        match location {
            DatasetLocation::ClientServer(url) => match &self.remote {
                Some(engine) => engine.query(&url, sql, limit).await,
                None => Err(EngineError::UnsupportedDataset(format!(
                    "no client-server engine configured for {}",
                    url
                ))),
            },
            local => query_sqlite(local, sql.to_string(), limit).await,
        }
    }
}

#[async_trait]
impl ExecutionService for QueryService {
    fn environment(&self) -> ExecutionEnvironment {
        ExecutionEnvironment::Sql
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, EngineError> {
        let sql = request.content.as_text().ok_or_else(|| {
            EngineError::InvalidContent("query submissions must be SQL text".to_string())
        })?;

        if let Err(reason) = check_query_safety(sql) {
            warn!(reason = %reason, "Query rejected by security gate");
            return Ok(ExecutionResult::failure(format!("Query rejected: {}", reason)));
        }

        let location = resolve_dataset(
            request.testcase.dataset_reference.as_deref(),
            request.testcase.input_data.as_ref(),
            &self.datasets,
        )?;

        let limit = Duration::from_secs(
            request
                .options
                .timeout
                .unwrap_or(request.testcase.timeout_seconds)
                .max(1),
        );
        let rows = self.query(location, sql, limit).await?;
        info!(
            columns = rows.columns.len(),
            rows = rows.rows.len(),
            "Query executed"
        );

        let tolerance = request.tolerance(DEFAULT_TOLERANCE);
        let (passed, mismatch) = match &request.testcase.expected_output {
            None | Some(Value::Null) => (true, None),
            Some(Value::Array(expected)) => {
                let mismatch = compare_rows(&rows.rows, expected, tolerance)?;
                (mismatch.is_none(), mismatch)
            }
            Some(other) => {
                return Err(EngineError::InvalidCriteria(format!(
                    "expected output must be a list of rows, got {}",
                    other
                )))
            }
        };
        if let Some(mismatch) = &mismatch {
            debug!(mismatch = %mismatch, "Result set mismatch");
        }

        let payload = QueryPayload {
            row_count: rows.rows.len(),
            columns: rows.columns,
            rows: rows.rows,
            mismatch,
        };
        Ok(ExecutionResult::graded(passed, ResultPayload::Query(payload)))
    }

    fn validate_output(&self, actual: &Value, expected: &Value, tolerance: f64) -> bool {
        match (actual, expected) {
            (Value::Array(actual), Value::Array(expected)) => {
                let actual: Option<Vec<Map<String, Value>>> = actual
                    .iter()
                    .map(|row| row.as_object().cloned())
                    .collect();
                match actual {
                    Some(actual) => matches!(compare_rows(&actual, expected, tolerance), Ok(None)),
                    None => false,
                }
            }
            _ => json_values_match(actual, expected, tolerance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assay_common::types::{ExecutionOptions, Testcase};
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    /// Dataset root with `shop.db` containing a small `products` table
    fn dataset_root() -> TempDir {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(dir.path().join("shop.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT, price REAL);
             INSERT INTO products VALUES (1, 'pen', 1.5), (2, 'book', 12.999), (3, 'bag', 30.0);",
        )
        .unwrap();
        dir
    }

    fn service_for(root: &Path) -> QueryService {
        let mut config = EngineConfig::default();
        config.datasets.root = root.to_path_buf();
        QueryService::new(&config)
    }

    fn testcase(reference: &str, expected: Value) -> Testcase {
        Testcase {
            dataset_reference: Some(reference.to_string()),
            expected_output: Some(expected),
            ..Testcase::default()
        }
    }

    #[test]
    fn test_gate_accepts_read_only() {
        assert!(check_query_safety("SELECT * FROM users").is_ok());
        assert!(check_query_safety("  select name from users where id = 1").is_ok());
        assert!(check_query_safety("WITH t AS (SELECT 1 AS x) SELECT x FROM t").is_ok());
    }

    #[test]
    fn test_gate_rejects_mutations_anywhere() {
        for query in [
            "DROP TABLE users",
            "drop table users",
            "SELECT 1; DELETE FROM users",
            "select * from users; update users set name = 'x'",
            "SELECT * FROM users WHERE 1=1; insert into users values (1)",
            "WITH x AS (SELECT 1) SELECT * FROM x; TRUNCATE users",
            "SELECT created_at FROM orders",
            "select 1; exec sp_who",
        ] {
            assert!(check_query_safety(query).is_err(), "should reject: {}", query);
        }
    }

    #[test]
    fn test_gate_rejects_non_select_start() {
        assert!(check_query_safety("PRAGMA table_info(users)").is_err());
        assert!(check_query_safety("EXPLAIN SELECT 1").is_err());
        assert!(check_query_safety("   ").is_err());
    }

    #[test]
    fn test_resolve_file_reference() {
        let root = dataset_root();
        let config = DatasetConfig {
            root: root.path().to_path_buf(),
            named: BTreeMap::new(),
        };

        assert_eq!(
            resolve_dataset(Some("shop.db"), None, &config).unwrap(),
            DatasetLocation::File(root.path().join("shop.db"))
        );
        assert_eq!(
            resolve_dataset(Some("sqlite://shop.db"), None, &config).unwrap(),
            DatasetLocation::File(root.path().join("shop.db"))
        );
        assert!(matches!(
            resolve_dataset(Some("missing.sqlite"), None, &config),
            Err(EngineError::UnsupportedDataset(_))
        ));
        assert!(matches!(
            resolve_dataset(Some("../shop.db"), None, &config),
            Err(EngineError::UnsupportedDataset(_))
        ));
        assert!(matches!(
            resolve_dataset(Some("/etc/shop.db"), None, &config),
            Err(EngineError::UnsupportedDataset(_))
        ));
    }

    #[test]
    fn test_resolve_connection_and_named() {
        let mut named = BTreeMap::new();
        named.insert("warehouse".to_string(), "postgres://db.internal/warehouse".to_string());
        named.insert("loop".to_string(), "warehouse".to_string());
        let config = DatasetConfig {
            root: PathBuf::from("datasets"),
            named,
        };

        assert_eq!(
            resolve_dataset(Some("mysql://db/hr"), None, &config).unwrap(),
            DatasetLocation::ClientServer("mysql://db/hr".into())
        );
        assert_eq!(
            resolve_dataset(Some("warehouse"), None, &config).unwrap(),
            DatasetLocation::ClientServer("postgres://db.internal/warehouse".into())
        );
        // Named entries resolve one level only
        assert!(resolve_dataset(Some("loop"), None, &config).is_err());
        assert_eq!(
            resolve_dataset(Some("unknown"), None, &config),
            Err(EngineError::UnsupportedDataset("unknown".into()))
        );
    }

    #[test]
    fn test_resolve_inline_schema() {
        let config = DatasetConfig::default();
        let input = json!({"schema": "CREATE TABLE t (x INTEGER);"});
        assert!(matches!(
            resolve_dataset(None, Some(&input), &config).unwrap(),
            DatasetLocation::Memory { .. }
        ));
        assert!(resolve_dataset(None, None, &config).is_err());
    }

    #[test]
    fn test_compare_rows() {
        let actual: Vec<Map<String, Value>> = vec![
            json!({"name": "pen", "price": 1.5}).as_object().unwrap().clone(),
            json!({"name": "book", "price": 12.999}).as_object().unwrap().clone(),
        ];

        let expected = vec![json!({"name": "pen", "price": 1.5}), json!({"price": 13, "name": "book"})];
        assert_eq!(compare_rows(&actual, &expected, 0.01).unwrap(), None);
        assert!(compare_rows(&actual, &expected, 0.0001).unwrap().unwrap().contains("column price"));

        let short = vec![json!({"name": "pen", "price": 1.5})];
        assert!(compare_rows(&actual, &short, 0.01).unwrap().unwrap().starts_with("row count mismatch"));

        let renamed = vec![json!({"label": "pen", "price": 1.5}), json!({"label": "book", "price": 13})];
        assert!(compare_rows(&actual, &renamed, 0.01).unwrap().unwrap().contains("columns differ"));

        let malformed = vec![json!("pen"), json!("book")];
        assert!(compare_rows(&actual, &malformed, 0.01).is_err());
    }

    #[tokio::test]
    async fn test_drop_table_never_connects() {
        // The dataset does not exist: reaching resolution would yield a
        // dataset error instead of the gate's rejection.
        let service = service_for(Path::new("/nonexistent"));
        let request = ExecutionRequest::new("DROP TABLE users", testcase("users.db", json!([])));
        let result = service.execute(&request).await;

        assert!(!result.success);
        assert!(!result.passed);
        assert!(result.error.unwrap().starts_with("Query rejected"));
    }

    #[tokio::test]
    async fn test_query_file_dataset_passes() {
        let root = dataset_root();
        let service = service_for(root.path());
        let request = ExecutionRequest::new(
            "SELECT name, price FROM products WHERE price > 10 ORDER BY id",
            testcase(
                "shop.db",
                json!([{"name": "book", "price": 12.9995}, {"name": "bag", "price": "30"}]),
            ),
        );

        let result = service.execute(&request).await;
        assert!(result.success);
        assert!(result.passed, "{:?}", result);
        match result.payload {
            ResultPayload::Query(payload) => {
                assert_eq!(payload.columns, vec!["name", "price"]);
                assert_eq!(payload.row_count, 2);
                assert!(payload.mismatch.is_none());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_mismatch_is_graded() {
        let root = dataset_root();
        let service = service_for(root.path());
        let request = ExecutionRequest::new(
            "SELECT name FROM products ORDER BY id",
            testcase("shop.db", json!([{"name": "pen"}, {"name": "book"}])),
        );

        let result = service.execute(&request).await;
        assert!(result.success);
        assert!(!result.passed);
        match result.payload {
            ResultPayload::Query(payload) => {
                assert_eq!(
                    payload.mismatch.as_deref(),
                    Some("row count mismatch: expected 2, got 3")
                );
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tolerance_from_options() {
        let root = dataset_root();
        let service = service_for(root.path());
        let request = ExecutionRequest::new(
            "SELECT price FROM products WHERE id = 2",
            testcase("shop.db", json!([{"price": 13}])),
        );
        assert!(!service.execute(&request).await.passed);

        let request = request.with_options(ExecutionOptions {
            numerical_tolerance: Some(0.01),
            ..ExecutionOptions::default()
        });
        assert!(service.execute(&request).await.passed);
    }

    #[tokio::test]
    async fn test_inline_schema_dataset() {
        let service = service_for(Path::new("datasets"));
        let tc = Testcase {
            input_data: Some(json!({
                "schema": "CREATE TABLE emp (name TEXT, salary INTEGER);
                           INSERT INTO emp VALUES ('ada', 100), ('bob', 80);"
            })),
            expected_output: Some(json!([{"total": 180}])),
            ..Testcase::default()
        };
        let result = service
            .execute(&ExecutionRequest::new("SELECT SUM(salary) AS total FROM emp", tc))
            .await;
        assert!(result.passed, "{:?}", result);
    }

    #[tokio::test]
    async fn test_sql_error_is_failure() {
        let root = dataset_root();
        let service = service_for(root.path());
        let request = ExecutionRequest::new(
            "SELECT nope FROM products",
            testcase("shop.db", json!([])),
        );
        let result = service.execute(&request).await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Query failed"));
    }

    #[tokio::test]
    async fn test_runaway_query_times_out() {
        let root = dataset_root();
        let service = service_for(root.path());
        let request = ExecutionRequest::new(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c",
            testcase("shop.db", json!([])),
        )
        .with_options(ExecutionOptions {
            timeout: Some(1),
            ..ExecutionOptions::default()
        });

        let result = service.execute(&request).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Execution timed out after 1s"));
    }

    #[tokio::test]
    async fn test_runaway_schema_seeding_is_interrupted() {
        let location = DatasetLocation::Memory {
            schema: "CREATE TABLE t(x INTEGER); \
                     INSERT INTO t WITH RECURSIVE c(x) AS \
                     (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT x FROM c;"
                .to_string(),
        };

        let started = std::time::Instant::now();
        let outcome = query_sqlite(location, "SELECT 1".to_string(), Duration::from_secs(1)).await;

        assert_eq!(outcome.unwrap_err(), EngineError::Timeout(1));
        // the seeding task was awaited after the interrupt, well inside the grace period
        assert!(started.elapsed() < Duration::from_secs(1) + INTERRUPT_GRACE);
    }

    #[tokio::test]
    async fn test_client_server_requires_engine() {
        let service = service_for(Path::new("datasets"));
        let request = ExecutionRequest::new(
            "SELECT 1 AS one",
            testcase("postgres://db/exercises", json!([{"one": 1}])),
        );
        let result = service.execute(&request).await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Unsupported dataset"));
    }

    struct FixedEngine;

    #[async_trait]
    impl RemoteQueryEngine for FixedEngine {
        async fn query(
            &self,
            connection: &str,
            _sql: &str,
            _timeout: Duration,
        ) -> Result<QueryRows, EngineError> {
            assert_eq!(connection, "postgres://db/exercises");
            Ok(QueryRows {
                columns: vec!["one".to_string()],
                rows: vec![json!({"one": 1}).as_object().unwrap().clone()],
            })
        }
    }

    #[tokio::test]
    async fn test_client_server_with_engine() {
        let service = service_for(Path::new("datasets")).with_remote_engine(Arc::new(FixedEngine));
        let request = ExecutionRequest::new(
            "SELECT 1 AS one",
            testcase("postgres://db/exercises", json!([{"one": "1"}])),
        );
        let result = service.execute(&request).await;
        assert!(result.passed, "{:?}", result);
    }

    #[test]
    fn test_validate_output_rows() {
        let service = service_for(Path::new("datasets"));
        assert!(service.validate_output(&json!([{"a": 1.0004}]), &json!([{"a": 1}]), 0.001));
        assert!(!service.validate_output(&json!([{"a": 1}]), &json!([{"b": 1}]), 0.001));
        assert!(!service.validate_output(&json!([1]), &json!([{"a": 1}]), 0.001));
    }
}
