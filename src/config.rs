//! Runtime settings, read from an optional file layered under `CODING_*`
//! environment variables.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{CodingError, Result};
use crate::retry::Backoff;

pub const IN_MEMORY: &str = ":memory:";

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(PathBuf),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: String,
    pub prefix: String,
    pub backoff_ms: u64,
    pub query_timeout_ms: u64,
    pub busy_timeout_ms: u64,
    pub listen: String,
    pub clean: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: IN_MEMORY.to_string(),
            prefix: "coding".to_string(),
            backoff_ms: 10,
            query_timeout_ms: 5000,
            busy_timeout_ms: 1000,
            listen: "127.0.0.1:8080".to_string(),
            clean: false,
        }
    }
}

impl Settings {
    /// Loads the defaults, then `file` (any format the `config` crate knows,
    /// extension optional) if given and present, then the environment.
    pub fn load(file: Option<&str>) -> Result<Self> {
        let defaults = Settings::default();
        let mut builder = Config::builder()
            .set_default("database", defaults.database)?
            .set_default("prefix", defaults.prefix)?
            .set_default("backoff_ms", defaults.backoff_ms)?
            .set_default("query_timeout_ms", defaults.query_timeout_ms)?
            .set_default("busy_timeout_ms", defaults.busy_timeout_ms)?
            .set_default("listen", defaults.listen)?
            .set_default("clean", defaults.clean)?;
        if let Some(file) = file {
            builder = builder.add_source(File::with_name(file).required(false));
        }
        let settings: Settings = builder
            .add_source(Environment::with_prefix("CODING"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// In-memory settings under the given namespace, otherwise defaults.
    pub fn in_memory(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            ..Self::default()
        }
    }

    /// Rejects a namespace that cannot be spliced into table names.
    pub fn validate(&self) -> Result<()> {
        let mut chars = self.prefix.chars();
        let valid = match chars.next() {
            Some(first) => {
                (first.is_ascii_alphabetic() || first == '_')
                    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            None => false,
        };
        if !valid {
            return Err(CodingError::Config(format!("invalid table prefix '{}'", self.prefix)));
        }
        Ok(())
    }

    pub fn persistence_mode(&self) -> PersistenceMode {
        if self.database.is_empty() || self.database == IN_MEMORY {
            PersistenceMode::InMemory
        } else {
            PersistenceMode::File(PathBuf::from(&self.database))
        }
    }
    pub fn backoff(&self) -> Backoff {
        Backoff::new(Duration::from_millis(self.backoff_ms))
    }
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
