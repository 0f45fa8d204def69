//! Failure reporting hooks.
//!
//! A [`DiagnosticsSink`] observes failures; it never influences control flow.

use sqlchunk_db::{Error as DbError, FailurePolicy};
use tracing::{error, warn};

use crate::runner::{ChunkFailure, CommandFailure};

/// Receives the cause of command and chunk failures.
pub trait DiagnosticsSink: Send + Sync {
    /// Called for every failed command, tolerated or not.
    fn command_failed(&self, failure: &CommandFailure);

    /// Called once for a chunk that did not commit.
    fn chunk_failed(&self, failure: &ChunkFailure);

    /// Called when rolling back a failed chunk itself failed.
    fn rollback_failed(&self, chunk_index: usize, error: &DbError) {
        let _ = (chunk_index, error);
    }
}

/// Forwards failures to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn command_failed(&self, failure: &CommandFailure) {
        match failure.policy {
            FailurePolicy::ContinueOnError => warn!(
                chunk = failure.chunk_index,
                command_index = failure.command_index,
                kind = ?failure.kind,
                statement = %failure.statement,
                error = %failure.error,
                "Command failed; continuing"
            ),
            FailurePolicy::StopOnError => error!(
                chunk = failure.chunk_index,
                command_index = failure.command_index,
                kind = ?failure.kind,
                statement = %failure.statement,
                error = %failure.error,
                "Command failed; rolling back chunk"
            ),
        }
    }

    fn chunk_failed(&self, failure: &ChunkFailure) {
        error!(chunk = failure.chunk_index(), error = %failure, "Chunk failed");
    }

    fn rollback_failed(&self, chunk_index: usize, error: &DbError) {
        error!(chunk = chunk_index, error = %error, "Rollback failed");
    }
}
