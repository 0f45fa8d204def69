//! Database connection and transaction primitives.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use libsql::{Connection as NativeConnection, Transaction};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::backend::{Connection, ConnectionFactory, DatabaseKind};
use crate::command::{CommandDescriptor, CommandKind};
use crate::params::bind;
use crate::pool::{ConnectionPool, PoolLease};
use crate::value::{DbValue, QueryResult};
use crate::{Error, Result};

/// Connection behavior for the libsql backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub database_url: String,
    pub auth_token: Option<String>,
    pub max_connections: usize,
    pub timeout_ms: u64,
    pub retry_attempts: usize,
}

impl ConnectionConfig {
    pub fn in_memory() -> Self {
        Self {
            database_url: ":memory:".to_string(),
            auth_token: None,
            max_connections: 1,
            timeout_ms: 5_000,
            retry_attempts: 0,
        }
    }

    pub fn local(path: impl Into<String>) -> Self {
        Self {
            database_url: path.into(),
            auth_token: None,
            max_connections: 8,
            timeout_ms: 5_000,
            retry_attempts: 0,
        }
    }

    pub fn remote(url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            database_url: url.into(),
            auth_token: Some(auth_token.into()),
            max_connections: 8,
            timeout_ms: 5_000,
            retry_attempts: 0,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// A libsql database and its connection pool. Acts as the
/// [`ConnectionFactory`] for executors and batches.
#[derive(Clone)]
pub struct Database {
    state: Arc<DatabaseState>,
    config: ConnectionConfig,
}

struct DatabaseState {
    pool: RwLock<Option<Arc<ConnectionPool>>>,
    connected: AtomicBool,
}

impl Database {
    /// Create a database handle with default config (libsql in-memory).
    pub fn new() -> Self {
        Self::with_config(ConnectionConfig::default())
    }

    /// Create a database handle with explicit config. Call [`Database::connect`]
    /// before acquiring connections.
    pub fn with_config(config: ConnectionConfig) -> Self {
        Self {
            state: Arc::new(DatabaseState {
                pool: RwLock::new(None),
                connected: AtomicBool::new(false),
            }),
            config,
        }
    }

    /// Build a handle and connect it in one step.
    pub async fn connect_with(config: ConnectionConfig) -> Result<Self> {
        let database = Self::with_config(config);
        database.connect().await?;
        Ok(database)
    }

    pub fn config(&self) -> ConnectionConfig {
        self.config.clone()
    }

    pub fn database_kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    /// Open the pool, retrying with exponential backoff.
    pub async fn connect(&self) -> Result<()> {
        if self.state.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let attempts = self.config.retry_attempts + 1;
        for attempt in 0..attempts {
            match ConnectionPool::open(&self.config).await {
                Ok(pool) => {
                    *self.state.pool.write().await = Some(Arc::new(pool));
                    self.state.connected.store(true, Ordering::SeqCst);
                    debug!(
                        database_url = %self.config.database_url,
                        attempt = attempt + 1,
                        "Connected to database"
                    );
                    return Ok(());
                }
                Err(err) => {
                    if attempt + 1 == attempts {
                        return Err(err);
                    }
                    let delay_ms = 100 * (1_u64 << attempt.min(6));
                    warn!(
                        attempt = attempt + 1,
                        delay_ms,
                        error = %err,
                        "Database connection attempt failed; retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }

        Err(Error::Connection {
            details: format!("Failed to connect after {attempts} attempt(s): exhausted retries"),
        })
    }

    pub async fn close(&self) {
        *self.state.pool.write().await = None;
        self.state.connected.store(false, Ordering::SeqCst);
    }

    pub async fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Take a connection from the pool, waiting if all are in use. The
    /// connection goes back to the pool when the handle is dropped.
    pub async fn acquire(&self) -> Result<LibsqlConnection> {
        self.ensure_connected().await?;
        let pool = self
            .state
            .pool
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Connection {
                details: "Connection pool is not initialized".to_string(),
            })?;
        let lease = pool.checkout().await?;
        Ok(LibsqlConnection {
            transaction: None,
            lease,
        })
    }

    async fn ensure_connected(&self) -> Result<()> {
        if !self.is_connected().await {
            return Err(Error::Connection {
                details: "Database is not connected".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionFactory for Database {
    async fn open(&self) -> Result<Box<dyn Connection>> {
        let connection = self.acquire().await?;
        Ok(Box::new(connection))
    }
}

/// A pooled libsql connection implementing [`Connection`].
pub struct LibsqlConnection {
    // Field order matters: an abandoned transaction is dropped (and rolled
    // back by libsql) before the connection returns to the pool.
    transaction: Option<Transaction>,
    lease: PoolLease,
}

impl LibsqlConnection {
    fn native(&self) -> Result<&NativeConnection> {
        match &self.transaction {
            Some(tx) => Ok(&**tx),
            None => self.lease.connection(),
        }
    }
}

#[async_trait]
impl Connection for LibsqlConnection {
    fn database_kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    fn transaction_lost(&self) -> bool {
        self.transaction
            .as_ref()
            .is_some_and(|tx| tx.is_autocommit())
    }

    async fn begin(&mut self) -> Result<()> {
        if self.transaction.is_some() {
            return Err(Error::Transaction {
                details: "Transaction is already active".to_string(),
            });
        }
        let transaction = self
            .lease
            .connection()?
            .transaction()
            .await
            .map_err(|source| Error::Libsql {
                context: "begin transaction".to_string(),
                source,
            })?;
        self.transaction = Some(transaction);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self.transaction.take().ok_or_else(|| Error::Transaction {
            details: "Transaction is no longer active".to_string(),
        })?;
        if tx.is_autocommit() {
            discard(tx).await;
            return Err(Error::Transaction {
                details: "Transaction was rolled back by the database before commit".to_string(),
            });
        }
        tx.commit().await.map_err(|source| Error::Libsql {
            context: "commit transaction".to_string(),
            source,
        })
    }

    async fn rollback(&mut self) -> Result<()> {
        let tx = self.transaction.take().ok_or_else(|| Error::Transaction {
            details: "Transaction is no longer active".to_string(),
        })?;
        if tx.is_autocommit() {
            // Already rolled back by the database.
            discard(tx).await;
            return Ok(());
        }
        tx.rollback().await.map_err(|source| Error::Libsql {
            context: "rollback transaction".to_string(),
            source,
        })
    }

    async fn execute(&mut self, command: &CommandDescriptor) -> Result<u64> {
        ensure_supported(self.database_kind(), command)?;
        let params = bind(command)?;
        self.native()?
            .execute(&command.text, params)
            .await
            .map_err(|source| Error::Sql {
                statement: command.text.clone(),
                source,
            })
    }

    async fn query(&mut self, command: &CommandDescriptor) -> Result<QueryResult> {
        ensure_supported(self.database_kind(), command)?;
        let params = bind(command)?;
        query_rows(self.native()?, &command.text, params).await
    }
}

/// Release a transaction handle whose transaction SQLite already ended.
async fn discard(tx: Transaction) {
    if let Err(err) = tx.rollback().await {
        debug!(error = %err, "Discarded transaction handle");
    }
}

fn ensure_supported(kind: DatabaseKind, command: &CommandDescriptor) -> Result<()> {
    if command.kind == CommandKind::StoredProcedure && !kind.supports_stored_procedures() {
        return Err(Error::Unsupported {
            details: format!(
                "stored procedure `{}` cannot run: {} has no stored procedures",
                command.text,
                kind.as_str()
            ),
        });
    }
    Ok(())
}

async fn query_rows(
    connection: &NativeConnection,
    sql: &str,
    params: libsql::params::Params,
) -> Result<QueryResult> {
    let mut rows = connection
        .query(sql, params)
        .await
        .map_err(|source| Error::Sql {
            statement: sql.to_string(),
            source,
        })?;

    let column_count = rows.column_count();
    let mut columns = Vec::new();
    for idx in 0..column_count {
        columns.push(rows.column_name(idx).unwrap_or_default().to_string());
    }

    let mut output = Vec::new();
    while let Some(row) = rows.next().await.map_err(|source| Error::Sql {
        statement: sql.to_string(),
        source,
    })? {
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..column_count {
            let value = row.get_value(idx).map_err(|source| Error::Sql {
                statement: sql.to_string(),
                source,
            })?;
            values.push(DbValue::from(value));
        }
        output.push(values);
    }

    Ok(QueryResult {
        columns,
        rows: output,
    })
}
