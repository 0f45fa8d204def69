//! CLI configuration: a YAML file with `connection` and `batch` sections,
//! overridden by flags and environment variables.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlchunk_batch::BatchConfig;
use sqlchunk_db::{CommandDescriptor, ConnectionConfig};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub batch: BatchConfig,
}

impl Config {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Apply `--database` / `--auth-token` on top of the file.
    pub fn with_overrides(mut self, database: Option<String>, auth_token: Option<String>) -> Self {
        if let Some(url) = database {
            self.connection.database_url = url;
        }
        if auth_token.is_some() {
            self.connection.auth_token = auth_token;
        }
        self
    }
}

/// Load a command list. `.json` files are read as JSON, anything else as YAML.
pub fn load_commands(path: &Path) -> anyhow::Result<Vec<CommandDescriptor>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading commands file {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let commands = if is_json {
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
    } else {
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
    };
    Ok(commands)
}
