//! Opening the database.
//!
//! A connection is retried a bounded number of times with a fixed delay, but
//! only for failures that can clear up on their own (a busy or locked file,
//! an I/O hiccup on network storage). Anything else fails on the first
//! attempt: no amount of waiting fixes a bad path or a file that is not a
//! database.

use std::time::Duration;

use rusqlite::ErrorCode;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{Error, Result};

/// Database settings, usually a section of the service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// A file path, `:memory:`, or a `file:` URI.
  pub url:                String,
  /// How long a writer waits for a lock held elsewhere before giving up.
  pub busy_timeout_ms:    u64,
  pub connect_attempts:   u32,
  pub connect_backoff_ms: u64,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      url:                "compliance.db".into(),
      busy_timeout_ms:    5_000,
      connect_attempts:   10,
      connect_backoff_ms: 3_000,
    }
  }
}

impl StoreConfig {
  pub fn in_memory() -> Self {
    Self { url: ":memory:".into(), ..Self::default() }
  }

  pub fn busy_timeout(&self) -> Duration { Duration::from_millis(self.busy_timeout_ms) }

  pub fn connect_backoff(&self) -> Duration {
    Duration::from_millis(self.connect_backoff_ms)
  }
}

/// Open the configured database, enable foreign keys, and check it answers.
pub async fn connect(config: &StoreConfig) -> Result<tokio_rusqlite::Connection> {
  let attempts = config.connect_attempts.max(1);

  let mut attempt = 1;
  loop {
    match try_connect(config).await {
      Ok(conn) => {
        info!(url = %config.url, attempt, "connected to database");
        return Ok(conn);
      }
      Err(e) if is_transient(&e) && attempt < attempts => {
        warn!(
          url = %config.url,
          attempt,
          error = %e,
          "retrying database connection",
        );
        tokio::time::sleep(config.connect_backoff()).await;
        attempt += 1;
      }
      Err(source) => return Err(Error::Connection { attempts: attempt, source }),
    }
  }
}

async fn try_connect(config: &StoreConfig) -> tokio_rusqlite::Result<tokio_rusqlite::Connection> {
  let conn = if config.url == ":memory:" {
    tokio_rusqlite::Connection::open_in_memory().await?
  } else {
    tokio_rusqlite::Connection::open(&config.url).await?
  };

  let busy_timeout = config.busy_timeout();
  conn
    .call(move |conn| {
      conn.busy_timeout(busy_timeout)?;
      conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
      // Opening is lazy; make the file prove it is a database.
      conn.query_row("SELECT count(*) FROM sqlite_master", [], |_| Ok(()))?;
      Ok(())
    })
    .await?;

  Ok(conn)
}

/// Whether `e` is worth another attempt.
pub(crate) fn is_transient(e: &tokio_rusqlite::Error) -> bool {
  match e {
    tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
      err.code,
      ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::SystemIoFailure
    ),
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn in_memory_connection_enforces_foreign_keys() {
    let conn = connect(&StoreConfig::in_memory()).await.unwrap();
    let enabled: bool = conn
      .call(|conn| Ok(conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0))?))
      .await
      .unwrap();
    assert!(enabled);
  }

  #[tokio::test]
  async fn non_database_file_fails_without_retry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.db");
    std::fs::write(&path, vec![0x42u8; 4096]).unwrap();

    let config = StoreConfig {
      url: path.display().to_string(),
      connect_attempts: 5,
      connect_backoff_ms: 60_000,
      ..StoreConfig::default()
    };
    let err = connect(&config).await.unwrap_err();
    assert!(matches!(err, Error::Connection { attempts: 1, .. }), "{err}");
  }

  #[tokio::test]
  async fn missing_directory_fails_without_retry() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
      url: dir.path().join("no/such/dir/db.sqlite").display().to_string(),
      connect_attempts: 5,
      connect_backoff_ms: 60_000,
      ..StoreConfig::default()
    };
    let err = connect(&config).await.unwrap_err();
    assert!(matches!(err, Error::Connection { attempts: 1, .. }), "{err}");
  }

  #[test]
  fn busy_is_transient_and_cantopen_is_not() {
    let busy = tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(
      rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
      None,
    ));
    assert!(is_transient(&busy));

    let cant_open = tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(
      rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
      None,
    ));
    assert!(!is_transient(&cant_open));
  }
}
