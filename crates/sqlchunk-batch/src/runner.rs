//! Transaction runner
//!
//! Executes one chunk inside one transaction. A stop-on-error failure rolls
//! back every statement of the chunk; a continue-on-error failure only drops
//! that command's contribution.

use std::fmt;
use std::sync::Arc;

use sqlchunk_db::{CommandDescriptor, Connection, Error as DbError, FailurePolicy};
use tracing::{debug, trace};

use crate::diagnostics::DiagnosticsSink;
use crate::planner::Chunk;

/// Why a command counted as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The statement ran but affected no rows while required to.
    EffectPolicyViolation,
    /// The statement could not be executed.
    Execution,
}

/// A failed command with its position and cause.
#[derive(Debug)]
pub struct CommandFailure {
    pub chunk_index: usize,
    /// Position of the command in the submitted sequence
    pub command_index: usize,
    pub statement: String,
    pub policy: FailurePolicy,
    pub kind: FailureKind,
    pub error: DbError,
}

impl CommandFailure {
    fn new(chunk_index: usize, command_index: usize, command: &CommandDescriptor, error: DbError) -> Self {
        let kind = if error.is_effect_policy_violation() {
            FailureKind::EffectPolicyViolation
        } else {
            FailureKind::Execution
        };
        Self {
            chunk_index,
            command_index,
            statement: command.text.clone(),
            policy: command.failure_policy,
            kind,
            error,
        }
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "command #{} (chunk {}) failed: {}",
            self.command_index, self.chunk_index, self.error
        )
    }
}

/// Transaction step that failed outside of any single command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStage {
    Connect,
    Begin,
    /// The database ended the transaction on its own mid-chunk.
    Lost,
    Commit,
}

impl fmt::Display for TransactionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            TransactionStage::Connect => "connect",
            TransactionStage::Begin => "begin",
            TransactionStage::Lost => "lost transaction",
            TransactionStage::Commit => "commit",
        };
        f.write_str(stage)
    }
}

/// A chunk that did not commit. Its contribution to the batch total is zero.
#[derive(Debug)]
pub enum ChunkFailure {
    /// A stop-on-error command failed and the chunk was rolled back.
    Command(CommandFailure),
    /// The chunk's connection or transaction could not be opened or committed.
    Transaction {
        chunk_index: usize,
        stage: TransactionStage,
        error: DbError,
    },
}

impl ChunkFailure {
    pub fn chunk_index(&self) -> usize {
        match self {
            ChunkFailure::Command(failure) => failure.chunk_index,
            ChunkFailure::Transaction { chunk_index, .. } => *chunk_index,
        }
    }

    pub fn error(&self) -> &DbError {
        match self {
            ChunkFailure::Command(failure) => &failure.error,
            ChunkFailure::Transaction { error, .. } => error,
        }
    }
}

impl fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkFailure::Command(failure) => write!(f, "{failure}"),
            ChunkFailure::Transaction {
                chunk_index,
                stage,
                error,
            } => write!(f, "chunk {chunk_index} failed at {stage}: {error}"),
        }
    }
}

/// Result of a committed chunk.
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    /// Sum of affected rows over successfully counted commands
    pub affected_rows: u64,
    /// Commands sent to the database
    pub executed: usize,
    /// Commands skipped for having no text
    pub skipped: usize,
    /// Continue-on-error failures swallowed inside the committed transaction
    pub tolerated: Vec<CommandFailure>,
}

/// Runs chunks against a connection, one transaction per chunk.
#[derive(Clone, Default)]
pub struct TransactionRunner {
    diagnostics: Option<Arc<dyn DiagnosticsSink>>,
}

impl fmt::Debug for TransactionRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionRunner")
            .field("diagnostics", &self.diagnostics.is_some())
            .finish()
    }
}

impl TransactionRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    /// Execute `chunk` inside exactly one transaction on `connection`.
    pub async fn execute_chunk(
        &self,
        chunk: &Chunk<CommandDescriptor>,
        connection: &mut dyn Connection,
    ) -> Result<ChunkOutcome, ChunkFailure> {
        if let Err(error) = connection.begin().await {
            return Err(self.chunk_failed(ChunkFailure::Transaction {
                chunk_index: chunk.index,
                stage: TransactionStage::Begin,
                error,
            }));
        }

        let mut outcome = ChunkOutcome::default();
        for (position, command) in chunk.items.iter().enumerate() {
            let command_index = chunk.global_index(position);
            if command.is_empty() {
                trace!(chunk = chunk.index, command_index, "Skipping empty command");
                outcome.skipped += 1;
                continue;
            }

            outcome.executed += 1;
            let result = match connection.execute(command).await {
                Ok(affected) => command.check_effect(affected),
                Err(error) => Err(error),
            };

            match result {
                Ok(affected) => outcome.affected_rows += affected,
                Err(error) => {
                    let failure = CommandFailure::new(chunk.index, command_index, command, error);
                    if let Some(sink) = &self.diagnostics {
                        sink.command_failed(&failure);
                    }

                    match command.failure_policy {
                        FailurePolicy::ContinueOnError => outcome.tolerated.push(failure),
                        FailurePolicy::StopOnError => {
                            self.rollback(connection, chunk.index).await;
                            return Err(self.chunk_failed(ChunkFailure::Command(failure)));
                        }
                    }
                }
            }

            // Anything executed from here on would autocommit outside the chunk.
            if connection.transaction_lost() {
                self.rollback(connection, chunk.index).await;
                return Err(self.chunk_failed(ChunkFailure::Transaction {
                    chunk_index: chunk.index,
                    stage: TransactionStage::Lost,
                    error: DbError::Transaction {
                        details: format!(
                            "transaction ended by the database during command #{command_index}"
                        ),
                    },
                }));
            }
        }

        if let Err(error) = connection.commit().await {
            if connection.in_transaction() {
                self.rollback(connection, chunk.index).await;
            }
            return Err(self.chunk_failed(ChunkFailure::Transaction {
                chunk_index: chunk.index,
                stage: TransactionStage::Commit,
                error,
            }));
        }

        debug!(
            chunk = chunk.index,
            affected_rows = outcome.affected_rows,
            executed = outcome.executed,
            skipped = outcome.skipped,
            tolerated = outcome.tolerated.len(),
            "Committed chunk"
        );
        Ok(outcome)
    }

    /// Report a chunk failure that happened before the runner was involved,
    /// such as a connection that could not be acquired.
    pub(crate) fn chunk_failed(&self, failure: ChunkFailure) -> ChunkFailure {
        if let Some(sink) = &self.diagnostics {
            sink.chunk_failed(&failure);
        }
        failure
    }

    async fn rollback(&self, connection: &mut dyn Connection, chunk_index: usize) {
        if let Err(error) = connection.rollback().await {
            if let Some(sink) = &self.diagnostics {
                sink.rollback_failed(chunk_index, &error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use sqlchunk_db::{Database, LibsqlConnection};

    use super::*;
    use crate::planner::plan_chunks;

    async fn setup() -> (Database, LibsqlConnection) {
        let database = Database::new();
        database.connect().await.unwrap();
        let mut connection = database.acquire().await.unwrap();
        connection
            .execute(&CommandDescriptor::text(
                "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
            ))
            .await
            .unwrap();
        (database, connection)
    }

    fn single_chunk(commands: Vec<CommandDescriptor>) -> Chunk<CommandDescriptor> {
        let size = NonZeroUsize::new(commands.len().max(1)).unwrap();
        plan_chunks(commands, size).remove(0)
    }

    fn insert(id: i64) -> CommandDescriptor {
        CommandDescriptor::text("INSERT INTO items (id, name) VALUES (?1, ?2)")
            .bind(id)
            .bind(format!("item-{id}"))
    }

    async fn count(connection: &mut LibsqlConnection) -> i64 {
        connection
            .query(&CommandDescriptor::text("SELECT COUNT(*) FROM items"))
            .await
            .unwrap()
            .scalar()
            .and_then(|value| value.as_i64())
            .unwrap()
    }

    #[tokio::test]
    async fn test_chunk_commits_and_sums_rows() {
        let (_database, mut connection) = setup().await;
        let chunk = single_chunk(vec![insert(1), insert(2), CommandDescriptor::text(""), insert(3)]);

        let outcome = TransactionRunner::new()
            .execute_chunk(&chunk, &mut connection)
            .await
            .unwrap();

        assert_eq!(outcome.affected_rows, 3);
        assert_eq!(outcome.executed, 3);
        assert_eq!(outcome.skipped, 1);
        assert!(outcome.tolerated.is_empty());
        assert!(!connection.in_transaction());
        assert_eq!(count(&mut connection).await, 3);
    }

    #[tokio::test]
    async fn test_stop_on_error_rolls_back_whole_chunk() {
        let (_database, mut connection) = setup().await;
        let chunk = single_chunk(vec![insert(1), insert(1), insert(2)]);

        let failure = TransactionRunner::new()
            .execute_chunk(&chunk, &mut connection)
            .await
            .unwrap_err();

        match failure {
            ChunkFailure::Command(failure) => {
                assert_eq!(failure.command_index, 1);
                assert_eq!(failure.kind, FailureKind::Execution);
                assert_eq!(failure.policy, FailurePolicy::StopOnError);
            }
            other => panic!("unexpected failure: {other}"),
        }
        assert!(!connection.in_transaction());
        assert_eq!(count(&mut connection).await, 0);
    }

    #[tokio::test]
    async fn test_continue_on_error_keeps_other_commands() {
        let (_database, mut connection) = setup().await;
        let chunk = single_chunk(vec![insert(1), insert(1).continue_on_error(), insert(2)]);

        let outcome = TransactionRunner::new()
            .execute_chunk(&chunk, &mut connection)
            .await
            .unwrap();

        assert_eq!(outcome.affected_rows, 2);
        assert_eq!(outcome.tolerated.len(), 1);
        assert_eq!(outcome.tolerated[0].command_index, 1);
        assert_eq!(count(&mut connection).await, 2);
    }

    #[tokio::test]
    async fn test_zero_rows_violates_required_effect() {
        let (_database, mut connection) = setup().await;
        let update = CommandDescriptor::text("UPDATE items SET name = 'x' WHERE id = 99").require_rows();

        let chunk = single_chunk(vec![insert(1), update.clone()]);
        let failure = TransactionRunner::new()
            .execute_chunk(&chunk, &mut connection)
            .await
            .unwrap_err();
        assert!(failure.error().is_effect_policy_violation());
        assert_eq!(count(&mut connection).await, 0);

        let chunk = single_chunk(vec![insert(1), update.continue_on_error()]);
        let outcome = TransactionRunner::new()
            .execute_chunk(&chunk, &mut connection)
            .await
            .unwrap();
        assert_eq!(outcome.affected_rows, 1);
        assert_eq!(outcome.tolerated[0].kind, FailureKind::EffectPolicyViolation);
    }

    #[tokio::test]
    async fn test_begin_failure_is_transaction_failure() {
        let (_database, mut connection) = setup().await;
        connection.begin().await.unwrap();

        let failure = TransactionRunner::new()
            .execute_chunk(&single_chunk(vec![insert(1)]), &mut connection)
            .await
            .unwrap_err();
        assert!(matches!(
            failure,
            ChunkFailure::Transaction {
                stage: TransactionStage::Begin,
                ..
            }
        ));
        connection.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_transaction_ended_by_database_stops_chunk() {
        let (_database, mut connection) = setup().await;
        connection.execute(&insert(1)).await.unwrap();

        let chunk = single_chunk(vec![
            insert(2),
            CommandDescriptor::text("INSERT OR ROLLBACK INTO items (id, name) VALUES (1, 'dup')")
                .continue_on_error(),
            insert(3),
        ]);
        let failure = TransactionRunner::new()
            .execute_chunk(&chunk, &mut connection)
            .await
            .unwrap_err();

        assert!(matches!(
            failure,
            ChunkFailure::Transaction {
                chunk_index: 0,
                stage: TransactionStage::Lost,
                ..
            }
        ));
        assert!(failure.to_string().contains("lost transaction"));
        assert!(!connection.in_transaction());
        let ids = connection
            .query(&CommandDescriptor::text("SELECT id FROM items ORDER BY id"))
            .await
            .unwrap();
        assert_eq!(ids.rows, vec![vec![sqlchunk_db::DbValue::Integer(1)]]);
    }
}
