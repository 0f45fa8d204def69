//! libsql connection pool.
//!
//! Idle connections sit in a bounded channel. A [`PoolLease`] takes one out
//! and sends it back when dropped, so waiting for a free connection is just
//! waiting on the channel.

use std::sync::Arc;
use std::time::Duration;

use libsql::{Builder, Connection as NativeConnection};
use tokio::sync::{Mutex, mpsc};

use crate::connection::ConnectionConfig;
use crate::{Error, Result};

const FOREIGN_KEYS_PRAGMA: &str = "PRAGMA foreign_keys = ON";

/// Where a [`ConnectionConfig`] points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Location {
    /// Private in-memory database; `path` is what libsql opens.
    Memory { path: String },
    File { path: String },
    Remote { url: String, auth_token: String },
}

impl Location {
    pub(crate) fn parse(config: &ConnectionConfig) -> Result<Self> {
        let url = config.database_url.trim();
        if url.is_empty() {
            return Err(Error::Config {
                details: "database_url must be provided".to_string(),
            });
        }

        if ["libsql://", "https://", "http://"]
            .iter()
            .any(|scheme| url.starts_with(scheme))
        {
            let auth_token = config
                .auth_token
                .clone()
                .filter(|token| !token.is_empty())
                .ok_or_else(|| Error::Config {
                    details: format!("auth_token is required for remote database {url}"),
                })?;
            return Ok(Location::Remote {
                url: url.to_string(),
                auth_token,
            });
        }

        let path = url.strip_prefix("file:").unwrap_or(url).to_string();
        if path.starts_with(":memory:") || url.contains("mode=memory") {
            Ok(Location::Memory { path })
        } else {
            Ok(Location::File { path })
        }
    }

    /// Each connection to a private in-memory database gets its own empty
    /// database, so such a pool holds exactly one connection.
    pub(crate) fn capacity(&self, max_connections: usize) -> usize {
        match self {
            Location::Memory { .. } => 1,
            Location::File { .. } | Location::Remote { .. } => max_connections,
        }
    }

    async fn open(&self) -> Result<libsql::Database> {
        match self {
            Location::Memory { path } | Location::File { path } => Builder::new_local(path)
                .build()
                .await
                .map_err(|source| Error::Libsql {
                    context: format!("open local database {path}"),
                    source,
                }),
            Location::Remote { url, auth_token } => {
                Builder::new_remote(url.clone(), auth_token.clone())
                    .build()
                    .await
                    .map_err(|source| Error::Libsql {
                        context: format!("open remote database {url}"),
                        source,
                    })
            }
        }
    }

    async fn prepare(&self, database: &libsql::Database, timeout: Duration) -> Result<NativeConnection> {
        let connection = database.connect().map_err(|source| Error::Libsql {
            context: "open pooled connection".to_string(),
            source,
        })?;
        if !matches!(self, Location::Remote { .. }) {
            connection
                .busy_timeout(timeout)
                .map_err(|source| Error::Libsql {
                    context: "set busy timeout".to_string(),
                    source,
                })?;
        }
        connection
            .execute(FOREIGN_KEYS_PRAGMA, ())
            .await
            .map_err(|source| Error::Sql {
                statement: FOREIGN_KEYS_PRAGMA.to_string(),
                source,
            })?;
        Ok(connection)
    }
}

pub(crate) struct ConnectionPool {
    // Outlives every pooled connection.
    _database: libsql::Database,
    idle: Mutex<mpsc::Receiver<NativeConnection>>,
    returns: mpsc::Sender<NativeConnection>,
    capacity: usize,
    checkout_timeout: Duration,
}

impl ConnectionPool {
    pub(crate) async fn open(config: &ConnectionConfig) -> Result<Self> {
        if config.max_connections == 0 {
            return Err(Error::Config {
                details: "max_connections must be greater than zero".to_string(),
            });
        }
        if config.timeout_ms == 0 {
            return Err(Error::Config {
                details: "timeout_ms must be greater than zero".to_string(),
            });
        }

        let location = Location::parse(config)?;
        let timeout = Duration::from_millis(config.timeout_ms);
        let database = tokio::time::timeout(timeout, location.open())
            .await
            .map_err(|_| Error::Connection {
                details: format!(
                    "opening {} timed out after {}ms",
                    config.database_url, config.timeout_ms
                ),
            })??;

        let capacity = location.capacity(config.max_connections);
        let (returns, idle) = mpsc::channel(capacity);
        for _ in 0..capacity {
            let connection = location.prepare(&database, timeout).await?;
            returns.send(connection).await.map_err(|_| Error::Connection {
                details: "connection pool closed while filling".to_string(),
            })?;
        }

        Ok(Self {
            _database: database,
            idle: Mutex::new(idle),
            returns,
            capacity,
            checkout_timeout: timeout,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait up to the configured timeout for an idle connection.
    pub(crate) async fn checkout(self: &Arc<Self>) -> Result<PoolLease> {
        let mut idle = self.idle.lock().await;
        let connection = tokio::time::timeout(self.checkout_timeout, idle.recv())
            .await
            .map_err(|_| Error::Connection {
                details: format!(
                    "all {} pooled connection(s) stayed busy for {}ms",
                    self.capacity,
                    self.checkout_timeout.as_millis()
                ),
            })?
            .ok_or_else(|| Error::Connection {
                details: "connection pool is closed".to_string(),
            })?;
        Ok(PoolLease {
            pool: Arc::clone(self),
            connection: Some(connection),
        })
    }
}

/// A connection checked out of a [`ConnectionPool`].
pub(crate) struct PoolLease {
    pool: Arc<ConnectionPool>,
    connection: Option<NativeConnection>,
}

impl PoolLease {
    pub(crate) fn connection(&self) -> Result<&NativeConnection> {
        self.connection.as_ref().ok_or_else(|| Error::Connection {
            details: "pooled connection already returned".to_string(),
        })
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            // Capacity equals the number of connections, so this only fails
            // once the pool is gone.
            let _ = self.pool.returns.try_send(connection);
        }
    }
}
