//! # sqlchunk-cli
//!
//! Command-line front end for sqlchunk.
//!
//! Runs command files as chunked transactional batches and exposes the
//! single-statement helpers for ad-hoc use.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlchunk_batch::{BatchConfig, BatchCoordinator, TracingSink};
use sqlchunk_db::{CommandDescriptor, Database, DbValue, Parameter, QueryResult, SqlExecutor};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{Config, load_commands};

/// Exit code for a batch that stopped before its last chunk.
const EXIT_HALTED: u8 = 2;

#[derive(Parser)]
#[command(name = "sqlchunk")]
#[command(about = "Chunked transactional SQL batch runner")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database URL or path, overriding the config file
    #[arg(short, long, env = "SQLCHUNK_DATABASE_URL")]
    database: Option<String>,

    /// Auth token for remote databases
    #[arg(long, env = "SQLCHUNK_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a YAML or JSON list of commands as a chunked batch
    Run {
        /// Commands file path
        commands: PathBuf,

        /// Commands per transaction
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Execute a single statement and print the affected row count
    Exec {
        sql: String,

        /// Positional parameter, bound in order (JSON literal or plain text)
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Run inside its own transaction
        #[arg(long)]
        transaction: bool,

        /// Fail when the statement affects no rows
        #[arg(long)]
        require_rows: bool,
    },

    /// Run a query and print the rows as JSON
    Query {
        sql: String,

        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// Check whether a table exists
    TableExists { name: String },

    /// Check that the database answers
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?.with_overrides(cli.database, cli.auth_token);

    let database = Database::connect_with(config.connection.clone())
        .await
        .with_context(|| format!("connecting to {}", config.connection.database_url))?;
    let factory = Arc::new(database.clone());

    let code = match cli.command {
        Commands::Run {
            commands,
            chunk_size,
        } => {
            let batch = match chunk_size {
                Some(size) => BatchConfig::with_chunk_size(size)?,
                None => config.batch,
            };
            let commands = load_commands(&commands)?;
            info!(
                commands = commands.len(),
                chunk_size = batch.chunk_size.get(),
                "Running batch"
            );

            let result = BatchCoordinator::new(factory)
                .with_diagnostics(Arc::new(TracingSink))
                .run_batch(commands, &batch)
                .await;
            println!("{}", serde_json::to_string_pretty(&result.summary())?);
            if result.halted_early {
                ExitCode::from(EXIT_HALTED)
            } else {
                ExitCode::SUCCESS
            }
        }
        Commands::Exec {
            sql,
            params,
            transaction,
            require_rows,
        } => {
            let mut command = with_params(CommandDescriptor::text(sql), &params);
            if require_rows {
                command = command.require_rows();
            }
            let executor = SqlExecutor::new(factory);
            let affected = if transaction {
                executor.execute_in_transaction(&command).await?
            } else {
                executor.execute_non_query(&command).await?
            };
            println!("{affected}");
            ExitCode::SUCCESS
        }
        Commands::Query { sql, params } => {
            let command = with_params(CommandDescriptor::text(sql), &params);
            let result = SqlExecutor::new(factory).query(&command).await?;
            println!("{}", serde_json::to_string_pretty(&rows_as_json(&result))?);
            ExitCode::SUCCESS
        }
        Commands::TableExists { name } => {
            let exists = SqlExecutor::new(factory).table_exists(&name).await?;
            println!("{exists}");
            if exists {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Commands::Ping => {
            let ok = SqlExecutor::new(factory).test_connection().await?;
            println!("{}", if ok { "ok" } else { "unexpected response" });
            if ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    };

    database.close().await;
    Ok(code)
}

/// `42`, `true`, `null` and quoted strings parse as JSON; anything else binds as text.
fn parse_param(raw: &str) -> DbValue {
    serde_json::from_str(raw).unwrap_or_else(|_| DbValue::String(raw.to_string()))
}

fn with_params(command: CommandDescriptor, params: &[String]) -> CommandDescriptor {
    command.with_parameters(params.iter().map(|raw| Parameter::positional(parse_param(raw))))
}

fn rows_as_json(result: &QueryResult) -> Vec<serde_json::Map<String, serde_json::Value>> {
    result
        .rows
        .iter()
        .map(|row| {
            result
                .columns
                .iter()
                .cloned()
                .zip(row.iter().map(|value| serde_json::to_value(value).unwrap_or_default()))
                .collect()
        })
        .collect()
}
