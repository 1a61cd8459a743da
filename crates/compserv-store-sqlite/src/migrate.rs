//! [`MigrationEngine`] moves a live database between registry versions.
//!
//! The persisted state is one row in `schema_migrations`: the version the
//! schema is at and whether the step that produced it failed part-way.
//!
//! Each step is its own atomic unit, run under SQLite's database-wide write
//! lock (`BEGIN IMMEDIATE`):
//!
//! 1. foreign-key enforcement is switched off for the step (table rebuilds
//!    need it) and switched back on afterwards, whatever happened;
//! 2. the state is re-read inside the lock, so a caller that waited on
//!    another one continues from wherever that caller left the schema;
//! 3. the script runs inside a savepoint and must leave no dangling
//!    references behind (`PRAGMA foreign_key_check`);
//! 4. on success the state becomes `(target, clean)`; on failure the
//!    savepoint is rolled back and the state becomes `(target, dirty)`.
//!
//! A dirty database refuses every further migration until an operator
//! repairs the schema and calls [`MigrationEngine::force`].

use std::sync::Arc;

use rusqlite::{
  Connection, ErrorCode, OptionalExtension as _, Transaction, TransactionBehavior,
};
use tracing::{debug, error, info};

use crate::{
  Error, Result,
  registry::{Direction, MigrationStep, SchemaRegistry},
};

const STATE_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER NOT NULL,
    dirty   INTEGER NOT NULL
)";

// ─── State ───────────────────────────────────────────────────────────────────

/// Where the database stands relative to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
  /// No migration has ever run against this database.
  Unversioned,
  At { version: u32, dirty: bool },
}

impl MigrationState {
  /// The version steps are planned from; an unversioned database is at 0.
  pub fn version(self) -> u32 {
    match self {
      MigrationState::Unversioned => 0,
      MigrationState::At { version, .. } => version,
    }
  }

  pub fn is_dirty(self) -> bool {
    matches!(self, MigrationState::At { dirty: true, .. })
  }
}

/// What happened to a single step, decided inside the write lock.
enum StepOutcome {
  Applied,
  /// Someone else moved the schema since the step was planned.
  Moved,
  /// The write lock stayed busy past the connection's busy timeout.
  Busy,
  Dirty(u32),
  Failed { version: u32, message: String },
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Applies and reverts [`SchemaRegistry`] steps against one database.
///
/// Cloning is cheap; clones share the connection and the registry.
#[derive(Clone)]
pub struct MigrationEngine {
  conn:     tokio_rusqlite::Connection,
  registry: Arc<SchemaRegistry>,
}

impl MigrationEngine {
  pub fn new(conn: tokio_rusqlite::Connection, registry: SchemaRegistry) -> Self {
    Self { conn, registry: Arc::new(registry) }
  }

  pub fn registry(&self) -> &SchemaRegistry { &self.registry }

  /// Apply every pending step up to the registry's latest version.
  ///
  /// Returns how many steps ran.
  pub async fn up(&self) -> Result<usize> { self.migrate(self.registry.latest()).await }

  /// Revert every applied step back to version 0.
  pub async fn down(&self) -> Result<usize> { self.migrate(0).await }

  /// Move the schema to exactly `target`, applying steps upwards or
  /// reverting them downwards one at a time. Already being at `target` is
  /// not an error and changes nothing.
  pub async fn migrate(&self, target: u32) -> Result<usize> {
    if !self.registry.contains(target) {
      return Err(Error::UnknownVersion(target));
    }

    let mut applied = 0;
    loop {
      let current = match self.state().await? {
        MigrationState::At { version, dirty: true } => return Err(Error::Dirty(version)),
        state => state.version(),
      };

      if current == target {
        if applied == 0 {
          debug!(version = current, "schema already at target version");
        }
        return Ok(applied);
      }

      let (version, direction) = if target > current {
        (current + 1, Direction::Up)
      } else {
        (current, Direction::Down)
      };
      let step = self
        .registry
        .get(version)
        .ok_or(Error::UnknownVersion(current))?
        .clone();

      match self.run_step(step, direction, current).await? {
        StepOutcome::Applied => applied += 1,
        StepOutcome::Moved => continue,
        StepOutcome::Busy => return Err(Error::MigrationInProgress),
        StepOutcome::Dirty(version) => return Err(Error::Dirty(version)),
        StepOutcome::Failed { version, message } => {
          error!(version, %message, "migration failed; schema left dirty");
          return Err(Error::MigrationFailed { version, message });
        }
      }
    }
  }

  /// The persisted `(version, dirty)` pair.
  ///
  /// Fails with [`Error::NoMigration`] on a database that has never been
  /// migrated, which is distinct from failing to read the state at all.
  pub async fn version(&self) -> Result<(u32, bool)> {
    match self.state().await? {
      MigrationState::Unversioned => Err(Error::NoMigration),
      MigrationState::At { version, dirty } => Ok((version, dirty)),
    }
  }

  pub async fn state(&self) -> Result<MigrationState> { schema_state(&self.conn).await }

  /// Overwrite the state with `(version, clean)` without running anything.
  ///
  /// This is the operator's way out of a dirty state once the schema has
  /// been repaired by hand; the engine never calls it itself.
  pub async fn force(&self, version: u32) -> Result<()> {
    if !self.registry.contains(version) {
      return Err(Error::UnknownVersion(version));
    }

    let forced = self
      .conn
      .call(move |conn| {
        let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
          Ok(tx) => tx,
          Err(e) if is_busy(&e) => return Ok(false),
          Err(e) => return Err(e.into()),
        };
        tx.execute(STATE_DDL, [])?;
        write_state(&tx, version, false)?;
        tx.commit()?;
        Ok(true)
      })
      .await?;

    if !forced {
      return Err(Error::MigrationInProgress);
    }
    info!(version, "schema version forced");
    Ok(())
  }

  async fn run_step(
    &self,
    step: MigrationStep,
    direction: Direction,
    expected: u32,
  ) -> Result<StepOutcome> {
    let target = step.target(direction);
    info!(version = step.version, name = %step.name, %direction, "running migration");

    let outcome = self
      .conn
      .call(move |conn| {
        conn.pragma_update(None, "foreign_keys", false)?;
        let outcome = run_step_locked(conn, &step, direction, expected);
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(outcome?)
      })
      .await?;

    if let StepOutcome::Applied = outcome {
      info!(version = target, "schema migrated");
    }
    Ok(outcome)
  }
}

/// Read the persisted migration state of `conn` without an engine.
pub async fn schema_state(conn: &tokio_rusqlite::Connection) -> Result<MigrationState> {
  Ok(conn.call(|conn| Ok(read_state(conn)?)).await?)
}

// ─── Blocking helpers (run on the connection thread) ─────────────────────────

fn run_step_locked(
  conn: &mut Connection,
  step: &MigrationStep,
  direction: Direction,
  expected: u32,
) -> rusqlite::Result<StepOutcome> {
  let mut tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
    Ok(tx) => tx,
    Err(e) if is_busy(&e) => return Ok(StepOutcome::Busy),
    Err(e) => return Err(e),
  };

  tx.execute(STATE_DDL, [])?;
  match read_state(&tx)? {
    MigrationState::At { version, dirty: true } => return Ok(StepOutcome::Dirty(version)),
    state if state.version() != expected => return Ok(StepOutcome::Moved),
    _ => {}
  }

  let target = step.target(direction);
  let failure = {
    let sp = tx.savepoint()?;
    let result = sp
      .execute_batch(step.script(direction))
      .and_then(|()| check_foreign_keys(&sp));
    match result {
      Ok(()) => {
        sp.commit()?;
        None
      }
      // Dropping the savepoint rolls the script back.
      Err(e) => Some(e.to_string()),
    }
  };

  write_state(&tx, target, failure.is_some())?;
  tx.commit()?;

  Ok(match failure {
    None => StepOutcome::Applied,
    Some(message) => StepOutcome::Failed { version: target, message },
  })
}

fn read_state(conn: &Connection) -> rusqlite::Result<MigrationState> {
  let has_table: bool = conn.query_row(
    "SELECT count(*) > 0 FROM sqlite_master
     WHERE type = 'table' AND name = 'schema_migrations'",
    [],
    |r| r.get(0),
  )?;
  if !has_table {
    return Ok(MigrationState::Unversioned);
  }

  let row: Option<(u32, bool)> = conn
    .query_row("SELECT version, dirty FROM schema_migrations LIMIT 1", [], |r| {
      Ok((r.get(0)?, r.get(1)?))
    })
    .optional()?;

  Ok(match row {
    None => MigrationState::Unversioned,
    Some((version, dirty)) => MigrationState::At { version, dirty },
  })
}

fn write_state(tx: &Transaction<'_>, version: u32, dirty: bool) -> rusqlite::Result<()> {
  tx.execute("DELETE FROM schema_migrations", [])?;
  tx.execute(
    "INSERT INTO schema_migrations (version, dirty) VALUES (?1, ?2)",
    rusqlite::params![version, dirty],
  )?;
  Ok(())
}

/// Fail if the schema change left any row pointing at nothing.
fn check_foreign_keys(conn: &Connection) -> rusqlite::Result<()> {
  let dangling: Option<String> = conn
    .query_row("PRAGMA foreign_key_check", [], |r| r.get(0))
    .optional()?;
  match dangling {
    None => Ok(()),
    Some(table) => Err(rusqlite::Error::SqliteFailure(
      rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY),
      Some(format!("foreign key check failed on table {table}")),
    )),
  }
}

fn is_busy(e: &rusqlite::Error) -> bool {
  matches!(
    e,
    rusqlite::Error::SqliteFailure(err, _)
      if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
  )
}
