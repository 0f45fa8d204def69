//! Backend abstraction: one [`Connection`] implementation per database engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::command::CommandDescriptor;
use crate::sql::{limit_offset_page, limit_rows};
use crate::value::QueryResult;

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[default]
    Sqlite,
}

impl DatabaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
        }
    }

    /// Restrict `sql` to the rows in `[start_row, end_row)`.
    pub fn page_sql(&self, sql: &str, start_row: u64, end_row: u64) -> String {
        match self {
            Self::Sqlite => limit_offset_page(sql, start_row, end_row),
        }
    }

    /// Restrict `sql` to at most `row_limit` rows.
    pub fn row_limit_sql(&self, sql: &str, row_limit: u64) -> String {
        match self {
            Self::Sqlite => limit_rows(sql, row_limit),
        }
    }

    pub fn supports_stored_procedures(&self) -> bool {
        match self {
            Self::Sqlite => false,
        }
    }
}

/// Yields open connections. The caller owns the returned handle; dropping it
/// releases the connection.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Connection>>;
}

/// An open connection with at most one active transaction.
///
/// While a transaction is active, `execute` and `query` run inside it.
/// Dropping a connection with an active transaction rolls that transaction back.
#[async_trait]
pub trait Connection: Send {
    fn database_kind(&self) -> DatabaseKind;

    fn in_transaction(&self) -> bool;

    /// True once a transaction opened by `begin` has been ended by the
    /// database itself (`INSERT OR ROLLBACK`, a `RAISE(ROLLBACK)` trigger, a
    /// full disk). Statements run after that point autocommit.
    fn transaction_lost(&self) -> bool {
        false
    }

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Execute a statement and return the number of rows it affected.
    async fn execute(&mut self, command: &CommandDescriptor) -> Result<u64>;

    async fn query(&mut self, command: &CommandDescriptor) -> Result<QueryResult>;
}
