//! [`SqliteStore`]: the SQLite implementation of [`ComplianceStore`].
//!
//! SQL is generated from each entity's [`TableDef`], so one set of generic
//! methods serves every table.

use compserv_core::{
  entity::Metadata,
  model::{self, Entity, METADATA, TableDef},
  store::ComplianceStore,
};
use rusqlite::OptionalExtension as _;
use tracing::debug;

use crate::{
  Error, Result,
  connect::{StoreConfig, connect},
  encode::{self, RawRow, Violation, encode_field},
  migrate::{MigrationEngine, MigrationState, schema_state},
  registry::SchemaRegistry,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A compliance store backed by a single SQLite database.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Wrap a connection whose schema is at `required` or later.
  ///
  /// A dirty schema is accepted: a failed migration blocks further schema
  /// changes, not reads and writes against the tables already there.
  pub async fn new(conn: tokio_rusqlite::Connection, required: u32) -> Result<Self> {
    let state = schema_state(&conn).await?;
    if state.version() < required {
      let current = match state {
        MigrationState::Unversioned => None,
        MigrationState::At { version, .. } => Some(version),
      };
      return Err(Error::SchemaNotReady { current, required });
    }
    Ok(Self { conn })
  }

  /// Connect per `config`, bring the schema up to date, and wrap it.
  pub async fn open(config: &StoreConfig, registry: SchemaRegistry) -> Result<Self> {
    let conn = connect(config).await?;
    let engine = MigrationEngine::new(conn.clone(), registry);
    engine.up().await?;
    Self::new(conn, engine.registry().latest()).await
  }

  /// Open a fully migrated in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    Self::open(&StoreConfig::in_memory(), SchemaRegistry::embedded()).await
  }

  pub fn connection(&self) -> &tokio_rusqlite::Connection { &self.conn }

  /// Change a metadata record's version and description.
  ///
  /// `updated_at` is refreshed by the schema's trigger.
  pub async fn update_metadata(
    &self,
    id: &str,
    version: &str,
    description: &str,
  ) -> Result<Metadata> {
    let (id_str, version, description) =
      (id.to_owned(), version.to_owned(), description.to_owned());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE metadata SET version = ?2, description = ?3 WHERE id = ?1",
          rusqlite::params![id_str, version, description],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::NotFound { entity: METADATA.name, id: id.to_owned() });
    }
    self.get(id).await
  }

  /// Work out which foreign key an insert of `values` tripped over.
  async fn missing_parent(
    &self,
    table: &'static TableDef,
    values: &[rusqlite::types::Value],
  ) -> Result<Error> {
    let candidates = table
      .columns
      .iter()
      .zip(values)
      .filter_map(|(column, value)| Some((column.references?, value)));

    for (fk, value) in candidates {
      let rusqlite::types::Value::Text(parent_id) = value else {
        continue;
      };
      if !self.exists(fk.table, parent_id.clone()).await? {
        return Ok(Error::ForeignKeyViolation {
          constraint: fk.constraint.into(),
          table:      table.name.into(),
        });
      }
    }
    Ok(Error::ForeignKeyViolation { constraint: "unknown".into(), table: table.name.into() })
  }

  /// Work out which child row still points at `id` in `table`.
  async fn referencing_child(&self, table: &str, id: &str) -> Result<Error> {
    for (child, column, fk) in model::referencing(table) {
      let sql = format!("SELECT 1 FROM {} WHERE {} = ?1 LIMIT 1", child.name, column.name);
      let id = id.to_owned();
      let found = self
        .conn
        .call(move |conn| {
          Ok(conn.query_row(&sql, [id], |_| Ok(())).optional()?.is_some())
        })
        .await?;
      if found {
        return Ok(Error::ForeignKeyViolation {
          constraint: fk.constraint.into(),
          table:      child.name.into(),
        });
      }
    }
    Ok(Error::ForeignKeyViolation { constraint: "unknown".into(), table: table.into() })
  }

  async fn exists(&self, table: &'static str, id: String) -> Result<bool> {
    let sql = format!("SELECT 1 FROM {table} WHERE id = ?1");
    Ok(
      self
        .conn
        .call(move |conn| Ok(conn.query_row(&sql, [id], |_| Ok(())).optional()?.is_some()))
        .await?,
    )
  }
}

// ─── SQL ─────────────────────────────────────────────────────────────────────

fn column_list(table: &TableDef) -> String {
  table
    .columns
    .iter()
    .map(|c| format!("\"{}\"", c.name))
    .collect::<Vec<_>>()
    .join(", ")
}

fn insert_sql(table: &TableDef) -> String {
  let placeholders = (1..=table.columns.len())
    .map(|i| format!("?{i}"))
    .collect::<Vec<_>>()
    .join(", ");
  format!(
    "INSERT INTO {} ({}) VALUES ({placeholders})",
    table.name,
    column_list(table)
  )
}

fn select_sql(table: &TableDef) -> String {
  format!("SELECT {} FROM {}", column_list(table), table.name)
}

// ─── ComplianceStore impl ────────────────────────────────────────────────────

impl ComplianceStore for SqliteStore {
  type Error = Error;

  async fn create<E: Entity>(&self, entity: E) -> Result<E> {
    let table = E::TABLE;
    let fields = entity.to_fields();
    table.validate(&fields)?;

    let values: Vec<_> = fields.into_iter().map(encode_field).collect();
    let params = values.clone();
    let sql = insert_sql(table);

    let inserted = self
      .conn
      .call(move |conn| {
        conn.execute(&sql, rusqlite::params_from_iter(params))?;
        Ok(())
      })
      .await;

    match inserted {
      Ok(()) => Ok(entity),
      Err(e) => match encode::classify(&e) {
        Some(Violation::ForeignKey) => Err(self.missing_parent(table, &values).await?),
        Some(Violation::Field(violation)) => {
          Err(encode::into_validation(table, violation).into())
        }
        None => Err(e.into()),
      },
    }
  }

  async fn get<'a, E: Entity>(&'a self, id: &'a str) -> Result<E> {
    let table = E::TABLE;
    let sql = format!("{} WHERE id = ?1", select_sql(table));
    let width = table.columns.len();
    let id_str = id.to_owned();

    let raw: Option<RawRow> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(&sql, [id_str], |row| encode::read_raw_row(row, width))
            .optional()?,
        )
      })
      .await?;

    let Some(raw) = raw else {
      debug!(table = table.name, id, "row not found");
      return Err(Error::NotFound { entity: table.name, id: id.to_owned() });
    };
    Ok(E::from_fields(encode::decode_row(table, raw)?)?)
  }

  async fn list<E: Entity>(&self) -> Result<Vec<E>> {
    let table = E::TABLE;
    let sql = format!("{} ORDER BY rowid", select_sql(table));
    let width = table.columns.len();

    let raws: Vec<RawRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([], |row| encode::read_raw_row(row, width))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|raw| Ok(E::from_fields(encode::decode_row(table, raw)?)?))
      .collect()
  }

  async fn delete<'a, E: Entity>(&'a self, entity: &'a E) -> Result<()> {
    let table = E::TABLE;
    let sql = format!("DELETE FROM {} WHERE id = ?1", table.name);
    let id_str = entity.id().to_owned();

    let deleted = self
      .conn
      .call(move |conn| Ok(conn.execute(&sql, [id_str])?))
      .await;

    match deleted {
      Ok(0) => Err(Error::NotFound { entity: table.name, id: entity.id().to_owned() }),
      Ok(_) => Ok(()),
      Err(e) if encode::classify(&e) == Some(Violation::ForeignKey) => {
        Err(self.referencing_child(table.name, entity.id()).await?)
      }
      Err(e) => Err(e.into()),
    }
  }
}
