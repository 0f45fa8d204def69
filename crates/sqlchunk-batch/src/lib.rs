#![deny(rust_2018_idioms)]
#![warn(clippy::all)]

//! # sqlchunk-batch
//!
//! Chunked transactional batch execution.
//!
//! A command list is split into fixed-size chunks by the [`ChunkPlanner`];
//! each chunk runs inside exactly one transaction through the
//! [`TransactionRunner`], and the [`BatchCoordinator`] stops at the first
//! chunk that fails to commit.

pub mod coordinator;
pub mod diagnostics;
pub mod planner;
pub mod runner;

pub use coordinator::{
    BatchConfig, BatchCoordinator, BatchResult, BatchSummary, DEFAULT_CHUNK_SIZE, HaltReason,
    ToleratedFailure,
};
pub use diagnostics::{DiagnosticsSink, TracingSink};
pub use planner::{Chunk, ChunkPlanner, plan_chunks};
pub use runner::{
    ChunkFailure, ChunkOutcome, CommandFailure, FailureKind, TransactionRunner, TransactionStage,
};

use thiserror::Error;

/// Errors raised while setting up a batch.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {details}")]
    Config { details: String },
}

pub type Result<T> = std::result::Result<T, Error>;
