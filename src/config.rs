//! Configuration loaded from `.entomo-rollup.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! `DATABASE_URL` from the environment always wins over the file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::aggregate::ConflictPolicy;

pub const DEFAULT_PATH: &str = ".entomo-rollup.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub aggregation: AggregationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection string. Usually supplied through `DATABASE_URL`.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Policy used by regenerate commands that do not pass `--policy`.
    /// Accepts the same names as the flag.
    #[serde(default = "default_policy")]
    pub default_policy: String,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            default_policy: default_policy(),
        }
    }
}

fn default_policy() -> String {
    ConflictPolicy::default().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `entomo_rollup=debug`.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Loads `path` when given, otherwise the default location if it exists.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None if Path::new(DEFAULT_PATH).exists() => Self::load(Path::new(DEFAULT_PATH))?,
            None => Self::default(),
        };
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = Some(url);
        }
        Ok(config)
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database
            .url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }

    pub fn default_policy(&self) -> Result<ConflictPolicy> {
        self.aggregation
            .default_policy
            .parse()
            .context("invalid aggregation.default_policy in config")
    }

    pub fn default_toml() -> String {
        let body = toml::to_string_pretty(&Self::default()).unwrap_or_default();
        format!(
            "# entomo-rollup configuration\n# DATABASE_URL in the environment overrides database.url\n\n{body}"
        )
    }
}
