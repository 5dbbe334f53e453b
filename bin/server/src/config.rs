//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables. Nested keys
//! use a double underscore, e.g. `ENGINE__NODE_TIMEOUT_SECONDS=60`.

use nodeweave_workflow::{EngineConfig, FrontierMode};
use serde::Deserialize;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Maximum number of pooled database connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Execution engine settings.
    #[serde(default)]
    pub engine: EngineSettings,
}

/// Execution engine settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Upper bound on a single node's execution, in seconds.
    #[serde(default = "default_node_timeout_seconds")]
    pub node_timeout_seconds: u64,

    /// Dispatch each frontier concurrently instead of one node at a time.
    #[serde(default)]
    pub parallel_frontier: bool,

    /// Record nodes a failed or cancelled run never started as `skipped`.
    #[serde(default)]
    pub record_skipped_nodes: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_node_timeout_seconds() -> u64 {
    300
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            node_timeout_seconds: default_node_timeout_seconds(),
            parallel_frontier: false,
            record_skipped_nodes: false,
        }
    }
}

impl From<&EngineSettings> for EngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        let frontier_mode = if settings.parallel_frontier {
            FrontierMode::Parallel
        } else {
            FrontierMode::Sequential
        };
        EngineConfig::default()
            .with_node_timeout(Duration::from_secs(settings.node_timeout_seconds))
            .with_frontier_mode(frontier_mode)
            .with_record_skipped_nodes(settings.record_skipped_nodes)
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
