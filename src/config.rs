use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CatalogError, Result};
use crate::pipeline::processing::merge::SourcePriority;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "cd_catalog.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub discogs: DiscogsConfig,
    pub enrich: EnrichConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/cd_collection.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscogsConfig {
    pub base_url: String,
    pub user_agent: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub result_limit: usize,
}

impl Default for DiscogsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.discogs.com".to_string(),
            user_agent: "CDCollectionAgent/1.0".to_string(),
            token: None,
            timeout_secs: 10,
            result_limit: 5,
        }
    }
}

impl DiscogsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    /// Pause between successive lookups
    pub delay_ms: u64,
    /// Minimum candidate score; 0.0 accepts the top-scored candidate
    pub match_threshold: f64,
    pub source_priority: SourcePriority,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            match_threshold: 0.0,
            source_priority: SourcePriority::Enriched,
        }
    }
}

impl EnrichConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub file_name: String,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            file_name: "cd_catalog.log".to_string(),
            filter: "cd_catalog=info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Where to write the Prometheus text snapshot after a run
    pub snapshot_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `path`, or from [`DEFAULT_CONFIG_FILE`] when it
    /// exists, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CatalogError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if !(0.0..=2.0).contains(&config.enrich.match_threshold) {
            return Err(CatalogError::Config(format!(
                "enrich.match_threshold must be within [0.0, 2.0], got {}",
                config.enrich.match_threshold
            )));
        }
        Ok(config)
    }

    /// Apply an explicitly supplied Discogs token, e.g. from the environment.
    pub fn with_discogs_token(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.discogs.token = Some(token);
        }
        self
    }
}
