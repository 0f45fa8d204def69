//! Batch coordination
//!
//! Drives the planner and the runner across a whole command list. Each chunk
//! gets its own connection and transaction; the first chunk that fails halts
//! the batch and no later chunk is attempted.

use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlchunk_db::{CommandDescriptor, ConnectionFactory};
use tracing::{debug, info};

use crate::diagnostics::DiagnosticsSink;
use crate::planner::ChunkPlanner;
use crate::runner::{ChunkFailure, CommandFailure, FailureKind, TransactionRunner, TransactionStage};
use crate::{Error, Result};

/// Default number of commands per transaction.
pub const DEFAULT_CHUNK_SIZE: usize = 5000;

/// Configuration for batch execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of commands per chunk/transaction
    pub chunk_size: NonZeroUsize,
}

impl BatchConfig {
    pub fn with_chunk_size(chunk_size: usize) -> Result<Self> {
        let chunk_size = NonZeroUsize::new(chunk_size).ok_or_else(|| Error::Config {
            details: "chunk_size must be greater than zero".to_string(),
        })?;
        Ok(Self { chunk_size })
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// Why a batch stopped before attempting every chunk.
#[derive(Debug)]
pub enum HaltReason {
    /// A chunk failed and was rolled back (or never started).
    ChunkFailed(ChunkFailure),
    /// The continue predicate declined before chunk `next_chunk` started.
    Cancelled { next_chunk: usize },
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::ChunkFailed(failure) => write!(f, "{failure}"),
            HaltReason::Cancelled { next_chunk } => {
                write!(f, "cancelled before chunk {next_chunk}")
            }
        }
    }
}

/// Summary of a full batch run.
///
/// `total_affected_rows` is always usable: it counts the rows of every
/// committed chunk, even when the batch halted.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub total_affected_rows: u64,
    pub halted_early: bool,
    pub halt: Option<HaltReason>,
    pub chunks_committed: usize,
    /// Commands belonging to chunks that were attempted
    pub commands_attempted: usize,
    /// Commands never attempted because the batch halted
    pub commands_remaining: usize,
    /// Continue-on-error failures inside committed chunks
    pub tolerated_failures: Vec<CommandFailure>,
}

impl BatchResult {
    pub fn is_complete(&self) -> bool {
        !self.halted_early
    }

    /// Serializable view for reporting.
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total_affected_rows: self.total_affected_rows,
            halted_early: self.halted_early,
            halt_reason: self.halt.as_ref().map(ToString::to_string),
            failed_chunk: match &self.halt {
                Some(HaltReason::ChunkFailed(failure)) => Some(failure.chunk_index()),
                _ => None,
            },
            chunks_committed: self.chunks_committed,
            commands_attempted: self.commands_attempted,
            commands_remaining: self.commands_remaining,
            tolerated_failures: self
                .tolerated_failures
                .iter()
                .map(|failure| ToleratedFailure {
                    command_index: failure.command_index,
                    kind: failure.kind,
                    error: failure.error.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total_affected_rows: u64,
    pub halted_early: bool,
    pub halt_reason: Option<String>,
    pub failed_chunk: Option<usize>,
    pub chunks_committed: usize,
    pub commands_attempted: usize,
    pub commands_remaining: usize,
    pub tolerated_failures: Vec<ToleratedFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToleratedFailure {
    pub command_index: usize,
    pub kind: FailureKind,
    pub error: String,
}

type ContinuePredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Runs command lists as a sequence of chunked transactions.
#[derive(Clone)]
pub struct BatchCoordinator {
    factory: Arc<dyn ConnectionFactory>,
    runner: TransactionRunner,
    should_continue: Option<ContinuePredicate>,
}

impl fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("runner", &self.runner)
            .field("should_continue", &self.should_continue.is_some())
            .finish_non_exhaustive()
    }
}

impl BatchCoordinator {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            runner: TransactionRunner::new(),
            should_continue: None,
        }
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.runner = self.runner.with_diagnostics(sink);
        self
    }

    /// Consulted before each chunk starts; returning `false` halts the batch.
    pub fn with_continue_predicate(
        mut self,
        predicate: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_continue = Some(Arc::new(predicate));
        self
    }

    /// Run with the default chunk size.
    pub async fn run(&self, commands: impl IntoIterator<Item = CommandDescriptor>) -> BatchResult {
        self.run_batch(commands, &BatchConfig::default()).await
    }

    /// Execute `commands` in order, `config.chunk_size` per transaction.
    ///
    /// Never fails: the result carries the committed total, whether the run
    /// halted, and the full cause of the halt.
    pub async fn run_batch(
        &self,
        commands: impl IntoIterator<Item = CommandDescriptor>,
        config: &BatchConfig,
    ) -> BatchResult {
        let mut pending: VecDeque<CommandDescriptor> = commands.into_iter().collect();
        let mut planner = ChunkPlanner::new(config.chunk_size);
        let mut result = BatchResult::default();

        debug!(
            commands = pending.len(),
            chunk_size = config.chunk_size.get(),
            "Starting batch"
        );

        while !pending.is_empty() {
            if let Some(predicate) = &self.should_continue {
                if !predicate() {
                    result.halted_early = true;
                    result.halt = Some(HaltReason::Cancelled {
                        next_chunk: planner.next_index(),
                    });
                    break;
                }
            }

            let Some(chunk) = planner.take(&mut pending) else {
                break;
            };
            result.commands_attempted += chunk.len();

            let outcome = match self.factory.open().await {
                Ok(mut connection) => self.runner.execute_chunk(&chunk, connection.as_mut()).await,
                Err(error) => Err(self.runner.chunk_failed(ChunkFailure::Transaction {
                    chunk_index: chunk.index,
                    stage: TransactionStage::Connect,
                    error,
                })),
            };

            match outcome {
                Ok(outcome) => {
                    result.total_affected_rows += outcome.affected_rows;
                    result.chunks_committed += 1;
                    result.tolerated_failures.extend(outcome.tolerated);
                }
                Err(failure) => {
                    result.halted_early = true;
                    result.halt = Some(HaltReason::ChunkFailed(failure));
                    break;
                }
            }
        }

        result.commands_remaining = pending.len();
        info!(
            total_affected_rows = result.total_affected_rows,
            chunks_committed = result.chunks_committed,
            commands_attempted = result.commands_attempted,
            commands_remaining = result.commands_remaining,
            tolerated_failures = result.tolerated_failures.len(),
            halted_early = result.halted_early,
            "Batch finished"
        );
        result
    }
}
