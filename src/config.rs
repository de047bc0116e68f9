//! Configuration management for saylimit.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Result, SaylimitError};
use crate::ratelimit::RateLimitConfig;

/// Prefix for environment overrides, e.g. `SAYLIMIT__RATE_LIMIT__MAX_MESSAGES=3`.
pub const ENV_PREFIX: &str = "SAYLIMIT";

/// Main configuration for the saylimit binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Rate limiting rule
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// History storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// The agent being spoken to
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file for message history. History is kept in memory when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Target agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_id")]
    pub id: String,

    /// Display name used when the agent speaks
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Sources with this id bypass rate limiting
    #[serde(default = "default_owner_id")]
    pub owner_id: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: default_agent_id(),
            name: default_agent_name(),
            owner_id: default_owner_id(),
        }
    }
}

fn default_agent_id() -> String {
    "assistant".to_string()
}

fn default_agent_name() -> String {
    "Assistant".to_string()
}

fn default_owner_id() -> String {
    "owner".to_string()
}

impl AppConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| SaylimitError::Config(e.to_string()))
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load an optional YAML file, then apply `SAYLIMIT__*` environment
    /// overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
