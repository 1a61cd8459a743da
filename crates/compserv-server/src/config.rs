//! Service configuration.
//!
//! Built once at startup from a YAML file (`configs/config.yaml` by default)
//! overlaid with `COMPSERV_*` environment variables, where `__` separates
//! nesting levels: `COMPSERV_DATABASE__URL=/data/compliance.db`.

use std::path::{Path, PathBuf};

use compserv_store_sqlite::{
  SchemaRegistry, StoreConfig,
  registry::RegistryError,
};
use serde::Deserialize;
use thiserror::Error;

use crate::secrets::{SecretError, SecretProvider};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error(transparent)]
  Load(#[from] config::ConfigError),

  #[error("invalid configuration: {0}")]
  Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub app:        AppConfig,
  pub database:   DatabaseConfig,
  pub migrations: MigrationsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub host: String,
  pub port: u16,
}

impl Default for AppConfig {
  fn default() -> Self { Self { host: "localhost".into(), port: 50051 } }
}

/// Connection settings. The connection string is either `url` or whatever
/// `secret` resolves to; a secret wins when both are set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
  pub url:                String,
  pub busy_timeout_ms:    u64,
  pub connect_attempts:   u32,
  pub connect_backoff_ms: u64,
  pub secret:             Option<SecretProvider>,
}

impl Default for DatabaseConfig {
  fn default() -> Self {
    let store = StoreConfig::default();
    Self {
      url:                store.url,
      busy_timeout_ms:    store.busy_timeout_ms,
      connect_attempts:   store.connect_attempts,
      connect_backoff_ms: store.connect_backoff_ms,
      secret:             None,
    }
  }
}

impl DatabaseConfig {
  /// Resolve the secret, if any, into a ready-to-connect [`StoreConfig`].
  pub async fn store_config(&self) -> Result<StoreConfig, SecretError> {
    let url = match &self.secret {
      Some(provider) => provider.resolve_secret().await?,
      None => self.url.clone(),
    };
    Ok(StoreConfig {
      url,
      busy_timeout_ms: self.busy_timeout_ms,
      connect_attempts: self.connect_attempts,
      connect_backoff_ms: self.connect_backoff_ms,
    })
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
  /// Directory of `NNNNNN_<name>.{up,down}.sql` files. The migrations built
  /// into the binary are used when unset.
  pub path:           Option<PathBuf>,
  /// Version `compserv-migrate up` stops at instead of the latest.
  pub target_version: Option<u32>,
}

impl Config {
  /// Read `file` (if it exists) and the `COMPSERV_*` environment.
  pub fn load(file: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let settings = config::Config::builder()
      .add_source(config::File::from(file.as_ref()).required(false))
      .add_source(
        config::Environment::with_prefix("COMPSERV")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()?;

    let config: Config = settings.try_deserialize()?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.app.host.is_empty() {
      return Err(ConfigError::Invalid("app.host must not be empty".into()));
    }
    if self.database.secret.is_none() && self.database.url.is_empty() {
      return Err(ConfigError::Invalid(
        "database.url or database.secret must be provided".into(),
      ));
    }
    if self.database.connect_attempts == 0 {
      return Err(ConfigError::Invalid(
        "database.connect_attempts must be at least 1".into(),
      ));
    }
    Ok(())
  }

  /// The migrations this deployment runs against.
  pub fn registry(&self) -> Result<SchemaRegistry, RegistryError> {
    match &self.migrations.path {
      Some(dir) => SchemaRegistry::from_dir(dir),
      None => Ok(SchemaRegistry::embedded()),
    }
  }

  pub fn address(&self) -> String { format!("{}:{}", self.app.host, self.app.port) }
}
