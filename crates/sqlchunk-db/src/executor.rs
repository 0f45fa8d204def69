//! Single-command execution helpers.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::Result;
use crate::backend::{Connection, ConnectionFactory, DatabaseKind};
use crate::command::CommandDescriptor;
use crate::value::{DbValue, QueryResult};

/// Executor facade over a [`ConnectionFactory`]. Every call acquires its own
/// connection and releases it before returning.
#[derive(Clone)]
pub struct SqlExecutor {
    factory: Arc<dyn ConnectionFactory>,
    kind: DatabaseKind,
}

impl fmt::Debug for SqlExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlExecutor")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl SqlExecutor {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            kind: DatabaseKind::default(),
        }
    }

    pub fn with_kind(mut self, kind: DatabaseKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn database_kind(&self) -> DatabaseKind {
        self.kind
    }

    pub fn factory(&self) -> Arc<dyn ConnectionFactory> {
        self.factory.clone()
    }

    /// Execute outside any transaction and return the affected-row count.
    pub async fn execute_non_query(&self, command: &CommandDescriptor) -> Result<u64> {
        if command.is_empty() {
            debug!("Skipping empty command");
            return Ok(0);
        }
        let mut connection = self.factory.open().await?;
        let affected = connection.execute(command).await?;
        command.check_effect(affected)
    }

    /// Execute inside its own transaction. Commits on success; any failure,
    /// including an effect-policy violation, rolls back.
    pub async fn execute_in_transaction(&self, command: &CommandDescriptor) -> Result<u64> {
        if command.is_empty() {
            debug!("Skipping empty command");
            return Ok(0);
        }
        let mut connection = self.factory.open().await?;
        connection.begin().await?;

        let outcome = match connection.execute(command).await {
            Ok(affected) => command.check_effect(affected),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(affected) => {
                connection.commit().await?;
                Ok(affected)
            }
            Err(err) => {
                rollback_quietly(connection.as_mut(), &command.text).await;
                Err(err)
            }
        }
    }

    pub async fn query(&self, command: &CommandDescriptor) -> Result<QueryResult> {
        if command.is_empty() {
            return Ok(QueryResult::default());
        }
        let mut connection = self.factory.open().await?;
        connection.query(command).await
    }

    /// First column of the first row. `None` for no rows or a NULL value.
    pub async fn query_scalar(&self, command: &CommandDescriptor) -> Result<Option<DbValue>> {
        let result = self.query(command).await?;
        Ok(result.scalar().cloned())
    }

    /// Treat the scalar result as a count and report whether it is positive.
    pub async fn exists(&self, command: &CommandDescriptor) -> Result<bool> {
        let scalar = self.query_scalar(command).await?;
        Ok(scalar
            .and_then(|value| value.as_f64())
            .is_some_and(|count| count > 0.0))
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let command = CommandDescriptor::text(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        )
        .bind(table);
        self.exists(&command).await
    }

    /// Round-trip `SELECT 1` through a fresh connection.
    pub async fn test_connection(&self) -> Result<bool> {
        let scalar = self
            .query_scalar(&CommandDescriptor::text("SELECT 1"))
            .await?;
        Ok(scalar.and_then(|value| value.as_i64()) == Some(1))
    }

    pub fn page_sql(&self, sql: &str, start_row: u64, end_row: u64) -> String {
        self.kind.page_sql(sql, start_row, end_row)
    }

    pub fn row_limit_sql(&self, sql: &str, row_limit: u64) -> String {
        self.kind.row_limit_sql(sql, row_limit)
    }
}

async fn rollback_quietly(connection: &mut dyn Connection, statement: &str) {
    if let Err(err) = connection.rollback().await {
        warn!(statement, error = %err, "Rollback failed");
    }
}
