//! Scripted backend shared by the batch tests.
//!
//! Statement text drives the fake: `rows N` affects N rows, `fail` raises an
//! execution error and `abort` raises one after discarding the open
//! transaction, the way SQLite does for `INSERT OR ROLLBACK`. Everything else
//! affects one row.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlchunk_batch::{ChunkFailure, CommandFailure, DiagnosticsSink};
use sqlchunk_db::{
    CommandDescriptor, Connection, ConnectionFactory, DatabaseKind, Error, QueryResult, Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open,
    Begin,
    Execute(String),
    Commit,
    Rollback,
}

#[derive(Debug, Default)]
struct State {
    events: Vec<Event>,
    committed: Vec<String>,
    opens: usize,
    fail_open_at: Option<usize>,
    fail_commit_at: Option<usize>,
    commits: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedFactory {
    state: Arc<Mutex<State>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `nth` (zero-based) call to `open` fail.
    pub fn fail_open_at(self, nth: usize) -> Self {
        self.state.lock().unwrap().fail_open_at = Some(nth);
        self
    }

    /// Make the `nth` (zero-based) commit fail.
    pub fn fail_commit_at(self, nth: usize) -> Self {
        self.state.lock().unwrap().fail_commit_at = Some(nth);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    /// Statements that are part of a committed transaction.
    pub fn committed(&self) -> Vec<String> {
        self.state.lock().unwrap().committed.clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Execute(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn count(&self, wanted: &Event) -> usize {
        self.events().iter().filter(|event| *event == wanted).count()
    }
}

#[async_trait]
impl ConnectionFactory for ScriptedFactory {
    async fn open(&self) -> Result<Box<dyn Connection>> {
        let mut state = self.state.lock().unwrap();
        let nth = state.opens;
        state.opens += 1;
        state.events.push(Event::Open);
        if state.fail_open_at == Some(nth) {
            return Err(Error::Connection {
                details: format!("scripted open failure #{nth}"),
            });
        }
        Ok(Box::new(ScriptedConnection {
            state: self.state.clone(),
            pending: None,
            lost: false,
        }))
    }
}

struct ScriptedConnection {
    state: Arc<Mutex<State>>,
    pending: Option<Vec<String>>,
    lost: bool,
}

impl ScriptedConnection {
    fn record(&self, event: Event) {
        self.state.lock().unwrap().events.push(event);
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn database_kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    fn in_transaction(&self) -> bool {
        self.pending.is_some()
    }

    fn transaction_lost(&self) -> bool {
        self.lost
    }

    async fn begin(&mut self) -> Result<()> {
        if self.pending.is_some() {
            return Err(Error::Transaction {
                details: "already in a transaction".to_string(),
            });
        }
        self.record(Event::Begin);
        self.pending = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let pending = self.pending.take().ok_or_else(|| Error::Transaction {
            details: "no active transaction".to_string(),
        })?;
        let mut state = self.state.lock().unwrap();
        let nth = state.commits;
        state.commits += 1;
        if state.fail_commit_at == Some(nth) {
            // Failed commits leave the transaction open so the caller rolls back.
            drop(state);
            self.pending = Some(pending);
            return Err(Error::Transaction {
                details: format!("scripted commit failure #{nth}"),
            });
        }
        state.events.push(Event::Commit);
        state.committed.extend(pending);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.pending.take().ok_or_else(|| Error::Transaction {
            details: "no active transaction".to_string(),
        })?;
        self.lost = false;
        self.record(Event::Rollback);
        Ok(())
    }

    async fn execute(&mut self, command: &CommandDescriptor) -> Result<u64> {
        self.record(Event::Execute(command.text.clone()));
        let text = command.text.trim();
        if text == "abort" {
            if let Some(pending) = self.pending.as_mut() {
                pending.clear();
                self.lost = true;
            }
            return Err(Error::Execution {
                statement: command.text.clone(),
                details: "scripted abort".to_string(),
            });
        }
        let affected = if text == "fail" {
            return Err(Error::Execution {
                statement: command.text.clone(),
                details: "scripted failure".to_string(),
            });
        } else if let Some(rows) = text.strip_prefix("rows ") {
            rows.trim().parse().unwrap()
        } else {
            1
        };
        if let Some(pending) = self.pending.as_mut() {
            pending.push(command.text.clone());
        }
        Ok(affected)
    }

    async fn query(&mut self, _command: &CommandDescriptor) -> Result<QueryResult> {
        Ok(QueryResult::default())
    }
}

/// Records what the coordinator reports.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub commands: Mutex<Vec<usize>>,
    pub chunks: Mutex<Vec<usize>>,
}

impl DiagnosticsSink for RecordingSink {
    fn command_failed(&self, failure: &CommandFailure) {
        self.commands.lock().unwrap().push(failure.command_index);
    }

    fn chunk_failed(&self, failure: &ChunkFailure) {
        self.chunks.lock().unwrap().push(failure.chunk_index());
    }
}

pub fn stmt(text: &str) -> CommandDescriptor {
    CommandDescriptor::text(text)
}
