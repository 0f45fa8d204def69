//! # sqlchunk-db
//!
//! Connections, transactions and command execution against SQLite/libsql.
//!
//! This crate provides the [`CommandDescriptor`] unit of work, the
//! [`Connection`]/[`ConnectionFactory`] backend traits with their libsql
//! implementation, and [`SqlExecutor`] for single-command operations.

pub mod backend;
pub mod command;
pub mod connection;
pub mod executor;
pub mod params;
mod pool;
pub mod sql;
pub mod value;

pub use backend::{Connection, ConnectionFactory, DatabaseKind};
pub use command::{
    CommandDescriptor, CommandKind, EffectPolicy, FailurePolicy, Parameter, ParameterDirection,
};
pub use connection::{ConnectionConfig, Database, LibsqlConnection};
pub use executor::SqlExecutor;
pub use value::{DbValue, QueryResult};

use thiserror::Error;

/// Errors that can occur when working with the database.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {details}")]
    Config { details: String },

    #[error("Connection error: {details}")]
    Connection { details: String },

    #[error("Libsql error during {context}: {source}")]
    Libsql {
        context: String,
        #[source]
        source: libsql::Error,
    },

    #[error("SQL error executing `{statement}`: {source}")]
    Sql {
        statement: String,
        #[source]
        source: libsql::Error,
    },

    /// Execution failure reported by a backend that does not surface libsql errors.
    #[error("Execution error for `{statement}`: {details}")]
    Execution { statement: String, details: String },

    #[error("Parameter binding error for `{statement}`: {details}")]
    Binding { statement: String, details: String },

    #[error("Unsupported operation: {details}")]
    Unsupported { details: String },

    #[error("Statement `{statement}` was required to affect at least one row but affected none")]
    EffectPolicyViolation { statement: String },

    #[error("Transaction error: {details}")]
    Transaction { details: String },
}

impl Error {
    /// Whether this error comes from a statement that ran but violated its
    /// "must affect rows" policy, as opposed to a failure to execute at all.
    pub fn is_effect_policy_violation(&self) -> bool {
        matches!(self, Error::EffectPolicyViolation { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
