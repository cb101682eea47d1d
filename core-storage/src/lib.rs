//! # Storage Connection Layer
//!
//! Owns the backend database handles and provides a backend-agnostic trait
//! for statement execution.
//!
//! ## Overview
//!
//! This crate abstracts statement execution behind the [`SqlStorage`] trait
//! so the query builder and schema manager work against any SQL backend:
//! - the local embedded store ([`SqliteStorage`], via `sqlx`)
//! - networked SQL servers, which differ only in dialect idioms
//!
//! Backends differ in quoting/escaping, boolean literals and how random
//! ordering is spelled; those idioms live in [`SqlDialect`] and are queried
//! by callers instead of hard-coded. Statements are fully rendered strings;
//! values embedded in them must be pre-escaped with [`SqlDialect::escape`].

pub mod dialect;
pub mod error;
pub mod sqlite;
pub mod value;

pub use dialect::SqlDialect;
pub use error::{Result, StorageError};
pub use sqlite::{create_test_storage, SqliteStorage, StorageConfig};
pub use value::{SqlRow, SqlValue};

use async_trait::async_trait;

/// Backend-agnostic statement execution contract.
///
/// One implementation exists per backend kind. A storage handle owns its
/// native connections exclusively; checked-out connections are never shared
/// between tasks. Every statement is logged at debug granularity before it
/// is executed.
#[async_trait]
pub trait SqlStorage: Send + Sync {
    /// The dialect spoken by this backend.
    fn dialect(&self) -> SqlDialect;

    /// Cheap liveness probe: whether the handle is open. Does not touch the
    /// backend; use [`SqlStorage::health_check`] for a round-trip probe.
    fn is_connected(&self) -> bool;

    /// Round-trip liveness probe.
    async fn health_check(&self) -> Result<()>;

    /// Execute a statement and return its result rows as ordered
    /// (column name, value) pairs.
    ///
    /// Fails with [`StorageError::Connection`] when the handle is closed or
    /// unopened, or [`StorageError::Statement`] with the backend-reported
    /// message on malformed statements.
    async fn query(&self, statement: &str) -> Result<Vec<SqlRow>>;

    /// Execute an INSERT statement and return the last auto-assigned row id
    /// on the connection that ran it. Undefined if the statement inserted
    /// nothing.
    async fn insert(&self, statement: &str) -> Result<i64>;

    /// Execute a statement that returns no rows (UPDATE/DELETE/DDL);
    /// returns the number of affected rows.
    async fn execute(&self, statement: &str) -> Result<u64>;

    /// Execute several statements atomically: all of them run inside one
    /// transaction which is rolled back if any statement fails.
    async fn execute_transaction(&self, statements: &[String]) -> Result<()>;

    /// Escape a raw value for embedding in a statement string, using this
    /// backend's quoting rules.
    fn escape(&self, raw: &str) -> String {
        self.dialect().escape(raw)
    }
}
