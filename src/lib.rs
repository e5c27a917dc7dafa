pub mod api;
pub mod build;
pub mod cancel;
pub mod db;
pub mod error;
pub mod gitprovider;
pub mod logging;
pub mod prebuild;
pub mod service;
pub mod template;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use error::{PrebuildError, Result};
use gitprovider::ProviderKind;
use service::{GitEventProcessor, PrebuildConfigManager, RetentionEnforcer};
use template::WorkspaceTemplate;

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
const DEFAULT_DATABASE_PATH: &str = "data/prebuilds.db";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Deadline applied to every git provider and build gateway call; must be non-zero
    #[serde(default = "default_gateway_timeout")]
    pub gateway_timeout_secs: u64,
    #[serde(default, rename = "git_provider")]
    pub git_providers: Vec<GitProviderConfig>,
    #[serde(default, rename = "template")]
    pub templates: Vec<WorkspaceTemplate>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Public URL providers deliver push events to
    #[serde(default)]
    pub webhook_endpoint: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            webhook_endpoint: String::new(),
            webhook_secret: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default)]
    pub level: Option<String>,
    /// Enables the rolling file layer
    #[serde(default)]
    pub directory: Option<String>,
    /// "daily", "hourly" or "never"
    #[serde(default)]
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetentionConfig {
    /// 0 disables the periodic sweep
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct GitProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub host: String,
    pub api_url: String,
    /// Name of the environment variable holding the API token
    #[serde(default)]
    pub token_env: Option<String>,
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_database_path() -> String {
    DEFAULT_DATABASE_PATH.to_string()
}

fn default_gateway_timeout() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

impl AppConfig {
    /// Reject configurations that would make lookups ambiguous or calls unusable.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for template in &self.templates {
            if template.name.trim().is_empty() {
                return Err(PrebuildError::Config("template name must not be empty".into()));
            }
            if template.repository_url.trim().is_empty() {
                return Err(PrebuildError::Config(format!(
                    "template '{}' has no repository_url",
                    template.name
                )));
            }
            if !names.insert(template.name.as_str()) {
                return Err(PrebuildError::Config(format!(
                    "duplicate template name '{}'",
                    template.name
                )));
            }
        }

        if self.gateway_timeout_secs == 0 {
            return Err(PrebuildError::Config(
                "gateway_timeout_secs must be at least 1".into(),
            ));
        }

        let mut ids = HashSet::new();
        for provider in &self.git_providers {
            if !ids.insert(provider.id.as_str()) {
                return Err(PrebuildError::Config(format!(
                    "duplicate git provider id '{}'",
                    provider.id
                )));
            }
        }
        Ok(())
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }
}

/// Load, parse and validate the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let config_str = fs::read_to_string(path).map_err(|e| {
        PrebuildError::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let config: AppConfig = toml::from_str(&config_str)?;
    config.validate()?;
    Ok(config)
}

pub struct AppState {
    pub manager: PrebuildConfigManager,
    pub processor: GitEventProcessor,
    pub retention: RetentionEnforcer,
    pub config: AppConfig,
    pub started_at: DateTime<Utc>,
    /// Cancelled on shutdown; request handlers work on child tokens
    pub shutdown: CancellationToken,
}

pub type SharedState = Arc<AppState>;
