//! Error type for `compserv-store-sqlite`.

use compserv_core::ValidationError;
use thiserror::Error;

use crate::registry::RegistryError;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error("core error: {0}")]
  Core(#[from] compserv_core::Error),

  /// An insert pointed at a missing row, or a delete would orphan a child.
  #[error("foreign key {constraint} on table {table} violated")]
  ForeignKeyViolation { constraint: String, table: String },

  #[error("{entity} not found: {id}")]
  NotFound { entity: &'static str, id: String },

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  // ── Connection ──────────────────────────────────────────────────────────

  #[error("could not connect to database after {attempts} attempt(s): {source}")]
  Connection {
    attempts: u32,
    #[source]
    source:   tokio_rusqlite::Error,
  },

  // ── Migrations ──────────────────────────────────────────────────────────

  #[error("invalid migration registry: {0}")]
  Registry(#[from] RegistryError),

  /// `version()` on a database no migration has ever touched.
  #[error("no migration has been applied")]
  NoMigration,

  #[error("database is dirty at version {0}; fix the schema and force a version")]
  Dirty(u32),

  #[error("migration to version {version} failed: {message}")]
  MigrationFailed { version: u32, message: String },

  #[error("another migration is in progress")]
  MigrationInProgress,

  #[error("unknown schema version {0}")]
  UnknownVersion(u32),

  #[error("schema is at {current:?}, store requires version {required}")]
  SchemaNotReady { current: Option<u32>, required: u32 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
