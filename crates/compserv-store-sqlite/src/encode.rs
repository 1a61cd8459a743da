//! Encoding and decoding helpers between model values and the plain-text
//! representations stored in SQLite columns, plus classification of the
//! constraint failures SQLite reports.
//!
//! All columns are `TEXT`. Timestamps are stored as RFC 3339 strings.

use chrono::{DateTime, Utc};
use compserv_core::{
  ValidationError, ValidationReason,
  model::{ColumnKind, FieldValue, TableDef},
};
use rusqlite::{ErrorCode, ffi, types::Value};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── Field values ────────────────────────────────────────────────────────────

pub fn encode_field(value: FieldValue) -> Value {
  match value {
    FieldValue::Null => Value::Null,
    FieldValue::Text(s) => Value::Text(s),
    FieldValue::Timestamp(dt) => Value::Text(encode_dt(dt)),
  }
}

/// Raw column strings read straight from a row, in table column order.
pub type RawRow = Vec<Option<String>>;

pub fn read_raw_row(row: &rusqlite::Row<'_>, width: usize) -> rusqlite::Result<RawRow> {
  (0..width).map(|i| row.get(i)).collect()
}

pub fn decode_row(table: &TableDef, raw: RawRow) -> Result<Vec<FieldValue>> {
  table
    .columns
    .iter()
    .zip(raw)
    .map(|(column, value)| {
      Ok(match (column.kind, value) {
        (_, None) => FieldValue::Null,
        (ColumnKind::Timestamp, Some(s)) => FieldValue::Timestamp(decode_dt(&s)?),
        (_, Some(s)) => FieldValue::Text(s),
      })
    })
    .collect()
}

// ─── Constraint failures ─────────────────────────────────────────────────────

/// A constraint failure reported by SQLite, before it is tied to an entity.
#[derive(Debug, PartialEq, Eq)]
pub enum Violation {
  ForeignKey,
  Field(FieldViolation),
}

/// A constraint failure on a single column of the row being written.
#[derive(Debug, PartialEq, Eq)]
pub enum FieldViolation {
  /// `UNIQUE`/`PRIMARY KEY` on the given column.
  Unique(String),
  /// `NOT NULL` on the given column.
  NotNull(String),
  /// A named `CHECK` constraint.
  Check(String),
}

const FOREIGN_KEY_FAILED: &str = "FOREIGN KEY constraint failed";

/// Recognise a constraint failure in `e`, if it is one.
pub fn classify(e: &tokio_rusqlite::Error) -> Option<Violation> {
  let tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(err, msg)) = e else {
    return None;
  };
  if err.code != ErrorCode::ConstraintViolation {
    return None;
  }
  let msg = msg.as_deref().unwrap_or_default();

  // Messages look like "UNIQUE constraint failed: subjects.id".
  let column = || {
    msg
      .rsplit_once('.')
      .map_or(msg, |(_, column)| column)
      .to_owned()
  };
  let detail = || {
    msg
      .split_once(": ")
      .map_or(msg, |(_, detail)| detail)
      .to_owned()
  };

  Some(match err.extended_code {
    ffi::SQLITE_CONSTRAINT_FOREIGNKEY => Violation::ForeignKey,
    // A delete blocked by `ON DELETE RESTRICT` is reported through the
    // trigger code, with the foreign key message.
    ffi::SQLITE_CONSTRAINT_TRIGGER if msg.starts_with(FOREIGN_KEY_FAILED) => {
      Violation::ForeignKey
    }
    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
      Violation::Field(FieldViolation::Unique(column()))
    }
    ffi::SQLITE_CONSTRAINT_NOTNULL => Violation::Field(FieldViolation::NotNull(column())),
    _ => Violation::Field(FieldViolation::Check(detail())),
  })
}

/// Turn a column-level violation into the validation error it stands for.
pub fn into_validation(table: &TableDef, violation: FieldViolation) -> ValidationError {
  match violation {
    FieldViolation::Unique(column) => {
      ValidationError::new(table.name, column, ValidationReason::Duplicate)
    }
    FieldViolation::NotNull(column) => {
      ValidationError::new(table.name, column, ValidationReason::Missing)
    }
    // Check constraints are named `ck_<table>_<column>`.
    FieldViolation::Check(name) => {
      let column = name
        .strip_prefix(&format!("ck_{}_", table.name))
        .unwrap_or(&name)
        .to_owned();
      ValidationError::new(table.name, column, ValidationReason::Check(name))
    }
  }
}
