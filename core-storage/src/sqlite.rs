//! Local embedded store backend.
//!
//! Implements [`SqlStorage`] over an `sqlx` SQLite pool. The pool is the
//! thread-keyed connection map of the engine: each checked-out connection is
//! used by exactly one task at a time and checkout bookkeeping is guarded
//! inside the pool, so connections are never shared across threads.
//!
//! WAL mode is enabled for concurrent readers during scans, and foreign
//! keys are enforced.

use crate::error::{Result, StorageError};
use crate::value::{SqlRow, SqlValue};
use crate::{SqlDialect, SqlStorage};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Column, Pool, Row, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection settings for the local store.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Database file path or `sqlite::memory:`.
    pub database_url: String,

    /// Minimum number of pooled connections.
    pub min_connections: u32,

    /// Maximum number of pooled connections; effectively the number of
    /// worker threads that can hold a connection at once.
    pub max_connections: u32,

    /// Maximum time to wait for a connection from the pool.
    pub acquire_timeout: Duration,

    /// Prepared statement cache capacity per connection.
    pub statement_cache_capacity: usize,
}

impl StorageConfig {
    /// Configuration for an on-disk database file.
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        Self {
            database_url: format!("sqlite:{}", path.display()),
            min_connections: 1,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            statement_cache_capacity: 100,
        }
    }

    /// Configuration for an in-memory database (tests, throwaway indexes).
    ///
    /// Capped at a single connection so every caller sees the same
    /// in-memory database.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            min_connections: 1,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            statement_cache_capacity: 100,
        }
    }

    /// Set the maximum number of pooled connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the connection acquire timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// [`SqlStorage`] implementation backed by an `sqlx` SQLite pool.
pub struct SqliteStorage {
    pool: Pool<Sqlite>,
}

impl SqliteStorage {
    /// Open (or create) the database described by `config`.
    pub async fn connect(config: StorageConfig) -> Result<Self> {
        info!(
            database_url = %config.database_url,
            max_connections = config.max_connections,
            "Opening local collection store"
        );

        let connect_options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(StorageError::from_sqlx)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true)
            .statement_cache_capacity(config.statement_cache_capacity);

        let pool = SqlitePoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to open collection store");
                StorageError::from_sqlx(e)
            })?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close all connections. Subsequent statements fail with
    /// [`StorageError::Closed`].
    pub async fn close(&self) {
        info!("Closing local collection store");
        self.pool.close().await;
    }

    fn row_to_sql_row(row: &sqlx::sqlite::SqliteRow) -> SqlRow {
        let mut result = SqlRow::new();

        for column in row.columns() {
            let ordinal = column.ordinal();
            let value = if let Ok(v) = row.try_get::<Option<i64>, _>(ordinal) {
                v.map(SqlValue::Integer).unwrap_or(SqlValue::Null)
            } else if let Ok(v) = row.try_get::<Option<f64>, _>(ordinal) {
                v.map(SqlValue::Real).unwrap_or(SqlValue::Null)
            } else if let Ok(v) = row.try_get::<Option<String>, _>(ordinal) {
                v.map(SqlValue::Text).unwrap_or(SqlValue::Null)
            } else if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(ordinal) {
                v.map(SqlValue::Blob).unwrap_or(SqlValue::Null)
            } else {
                SqlValue::Null
            };

            result.push(column.name(), value);
        }

        result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.pool.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl SqlStorage for SqliteStorage {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn health_check(&self) -> Result<()> {
        self.ensure_open()?;
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;
        Ok(())
    }

    async fn query(&self, statement: &str) -> Result<Vec<SqlRow>> {
        self.ensure_open()?;
        debug!(statement = %statement, "Executing query");

        let rows = sqlx::query(statement)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;

        Ok(rows.iter().map(Self::row_to_sql_row).collect())
    }

    async fn insert(&self, statement: &str) -> Result<i64> {
        self.ensure_open()?;
        debug!(statement = %statement, "Executing insert");

        let result = sqlx::query(statement)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;

        Ok(result.last_insert_rowid())
    }

    async fn execute(&self, statement: &str) -> Result<u64> {
        self.ensure_open()?;
        debug!(statement = %statement, "Executing statement");

        let result = sqlx::query(statement)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;

        Ok(result.rows_affected())
    }

    async fn execute_transaction(&self, statements: &[String]) -> Result<()> {
        self.ensure_open()?;

        let mut tx = self.pool.begin().await.map_err(StorageError::from_sqlx)?;
        for statement in statements {
            debug!(statement = %statement, "Executing statement in transaction");
            if let Err(e) = sqlx::query(statement).execute(&mut *tx).await {
                let error = StorageError::from_sqlx(e);
                warn!(error = %error, "Transaction statement failed, rolling back");
                tx.rollback().await.ok();
                return Err(error);
            }
        }
        tx.commit().await.map_err(StorageError::from_sqlx)?;
        Ok(())
    }
}

/// Create an in-memory store for tests.
pub async fn create_test_storage() -> Result<SqliteStorage> {
    SqliteStorage::connect(StorageConfig::in_memory()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_returns_ordered_columns() {
        let storage = create_test_storage().await.unwrap();
        let rows = storage
            .query("SELECT 1 AS id, 'Jazz' AS name, NULL AS extra")
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.value_at(0), Some(&SqlValue::Integer(1)));
        assert_eq!(
            row.value_at(1),
            Some(&SqlValue::Text("Jazz".to_string()))
        );
        assert_eq!(row.value_at(2), Some(&SqlValue::Null));
        assert_eq!(row.get("name").and_then(SqlValue::as_str), Some("Jazz"));
    }

    #[tokio::test]
    async fn insert_reports_last_insert_id() {
        let storage = create_test_storage().await.unwrap();
        storage
            .execute("CREATE TABLE genre ( id INTEGER PRIMARY KEY AUTOINCREMENT, name VARCHAR(255) )")
            .await
            .unwrap();

        let first = storage
            .insert("INSERT INTO genre ( name ) VALUES ( 'Jazz' )")
            .await
            .unwrap();
        let second = storage
            .insert("INSERT INTO genre ( name ) VALUES ( 'Blues' )")
            .await
            .unwrap();

        assert!(first > 0);
        assert_eq!(second, first + 1);
    }

    #[tokio::test]
    async fn malformed_statement_surfaces_backend_message() {
        let storage = create_test_storage().await.unwrap();
        let error = storage.query("SELECT FROM nothing").await.unwrap_err();
        match error {
            StorageError::Statement { message } => assert!(!message.is_empty()),
            other => panic!("expected statement error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn closed_handle_fails_liveness_probe() {
        let storage = create_test_storage().await.unwrap();
        assert!(storage.is_connected());

        storage.close().await;
        assert!(!storage.is_connected());
        assert!(matches!(
            storage.query("SELECT 1").await,
            Err(StorageError::Closed)
        ));
    }

    #[tokio::test]
    async fn transaction_rolls_back_on_failure() {
        let storage = create_test_storage().await.unwrap();
        storage
            .execute("CREATE TABLE t ( id INTEGER PRIMARY KEY, v VARCHAR(255) )")
            .await
            .unwrap();

        let result = storage
            .execute_transaction(&[
                "INSERT INTO t ( id, v ) VALUES ( 1, 'kept?' )".to_string(),
                "INSERT INTO missing ( id ) VALUES ( 1 )".to_string(),
            ])
            .await;
        assert!(result.is_err());

        let rows = storage.query("SELECT COUNT(*) AS n FROM t").await.unwrap();
        assert_eq!(rows[0].get("n").and_then(SqlValue::as_i64), Some(0));
    }

    #[tokio::test]
    async fn escape_uses_sqlite_quoting() {
        let storage = create_test_storage().await.unwrap();
        let escaped = storage.escape("Guns N' Roses");
        let rows = storage
            .query(&format!("SELECT '{}' AS name", escaped))
            .await
            .unwrap();
        assert_eq!(
            rows[0].get("name").and_then(SqlValue::as_str),
            Some("Guns N' Roses")
        );
    }
}
