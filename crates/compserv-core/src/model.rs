//! The entity model: tables, columns, and the foreign keys between them.
//!
//! Every table the migrations create is declared here once. The store reads
//! these declarations to build its SQL, to validate writes before they reach
//! the database, and to work out which constraint a foreign-key failure
//! refers to. All foreign keys are restrict-on-delete.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  Error, Result,
  error::{ValidationError, ValidationReason},
};

// ─── Declarations ────────────────────────────────────────────────────────────

/// Semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
  /// UUID text in hyphenated form.
  Uuid,
  /// Text bounded to `n` characters.
  VarChar(usize),
  /// Unbounded text.
  Text,
  /// RFC 3339 UTC timestamp.
  Timestamp,
}

/// A foreign key from a column to `table.column`, restrict-on-delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
  pub constraint: &'static str,
  pub table:      &'static str,
  pub column:     &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
  pub name:       &'static str,
  pub kind:       ColumnKind,
  pub nullable:   bool,
  pub references: Option<ForeignKey>,
}

impl ColumnDef {
  const fn required(name: &'static str, kind: ColumnKind) -> Self {
    Self { name, kind, nullable: false, references: None }
  }

  const fn optional(name: &'static str, kind: ColumnKind) -> Self {
    Self { name, kind, nullable: true, references: None }
  }

  const fn references(
    mut self,
    constraint: &'static str,
    table: &'static str,
  ) -> Self {
    self.references = Some(ForeignKey { constraint, table, column: "id" });
    self
  }
}

/// A table and its columns, in storage order. The first column is always
/// the `id` primary key.
#[derive(Debug, PartialEq, Eq)]
pub struct TableDef {
  pub name:    &'static str,
  pub columns: &'static [ColumnDef],
}

impl TableDef {
  pub fn column(&self, name: &str) -> Option<&ColumnDef> {
    self.columns.iter().find(|c| c.name == name)
  }

  /// Foreign keys declared on this table.
  pub fn foreign_keys(&self) -> impl Iterator<Item = (&ColumnDef, ForeignKey)> {
    self
      .columns
      .iter()
      .filter_map(|c| c.references.map(|fk| (c, fk)))
  }

  /// Check `values` (one per column, in order) against the declarations.
  pub fn validate(&self, values: &[FieldValue]) -> Result<(), ValidationError> {
    for (column, value) in self.columns.iter().zip(values) {
      let text = match value {
        FieldValue::Null if column.nullable => continue,
        FieldValue::Null => {
          return Err(ValidationError::new(
            self.name,
            column.name,
            ValidationReason::Missing,
          ));
        }
        FieldValue::Timestamp(_) => continue,
        FieldValue::Text(text) => text,
      };

      match column.kind {
        // Only the hyphenated form is stored.
        ColumnKind::Uuid if text.len() != 36 || Uuid::try_parse(text).is_err() => {
          return Err(ValidationError::new(
            self.name,
            column.name,
            ValidationReason::NotUuid,
          ));
        }
        ColumnKind::VarChar(max) => {
          let len = text.chars().count();
          if len > max {
            return Err(ValidationError::new(
              self.name,
              column.name,
              ValidationReason::TooLong { max, len },
            ));
          }
        }
        _ => {}
      }
    }
    Ok(())
  }
}

// ─── Tables ──────────────────────────────────────────────────────────────────

use ColumnKind::{Text, Timestamp, Uuid as Id, VarChar};

pub static METADATA: TableDef = TableDef {
  name:    "metadata",
  columns: &[
    ColumnDef::required("id", Id),
    ColumnDef::required("created_at", Timestamp),
    ColumnDef::required("updated_at", Timestamp),
    ColumnDef::required("version", Text),
    ColumnDef::required("description", Text),
  ],
};

pub static CATALOGS: TableDef = TableDef {
  name:    "catalogs",
  columns: &[
    ColumnDef::required("id", Id),
    ColumnDef::required("name", Text),
    ColumnDef::required("metadata_id", Id)
      .references("fk_catalogs_metadata_id", "metadata"),
    ColumnDef::optional("content", Text),
  ],
};

pub static PROFILES: TableDef = TableDef {
  name:    "profiles",
  columns: &[
    ColumnDef::required("id", Id),
    ColumnDef::required("name", Text),
    ColumnDef::required("metadata_id", Id)
      .references("fk_profiles_metadata_id", "metadata"),
    ColumnDef::required("catalog_id", Id)
      .references("fk_profiles_catalog_id", "catalogs"),
  ],
};

pub static CONTROLS: TableDef = TableDef {
  name:    "controls",
  columns: &[
    ColumnDef::required("id", Id),
    ColumnDef::required("name", Text),
    ColumnDef::required("severity", Text),
    ColumnDef::required("profile_id", Id)
      .references("fk_controls_profile_id", "profiles"),
    ColumnDef::required("metadata_id", Id)
      .references("fk_controls_metadata_id", "metadata"),
  ],
};

pub static SUBJECTS: TableDef = TableDef {
  name:    "subjects",
  columns: &[
    ColumnDef::required("id", Id),
    ColumnDef::required("name", VarChar(255)),
    ColumnDef::required("type", VarChar(50)),
    ColumnDef::optional("parent_id", Id)
      .references("fk_subjects_parent_id", "subjects"),
    ColumnDef::optional("metadata_id", Id)
      .references("fk_subjects_metadata_id", "metadata"),
  ],
};

pub static ASSESSMENTS: TableDef = TableDef {
  name:    "assessments",
  columns: &[
    ColumnDef::required("id", Id),
    ColumnDef::required("name", Text),
    ColumnDef::required("metadata_id", Id)
      .references("fk_assessments_metadata_id", "metadata"),
  ],
};

pub static RESULTS: TableDef = TableDef {
  name:    "results",
  columns: &[
    ColumnDef::required("id", Id),
    ColumnDef::required("name", Text),
    ColumnDef::required("outcome", Text),
    ColumnDef::optional("instruction", Text),
    ColumnDef::optional("rationale", Text),
    ColumnDef::required("control_id", Id)
      .references("fk_results_control_id", "controls"),
    ColumnDef::required("metadata_id", Id)
      .references("fk_results_metadata_id", "metadata"),
    ColumnDef::required("subject_id", Id)
      .references("fk_results_subject_id", "subjects"),
    ColumnDef::required("assessment_id", Id)
      .references("fk_results_assessment_id", "assessments"),
  ],
};

/// Every table, parents before children.
pub static TABLES: &[&TableDef] = &[
  &METADATA,
  &SUBJECTS,
  &ASSESSMENTS,
  &CATALOGS,
  &PROFILES,
  &CONTROLS,
  &RESULTS,
];

/// Foreign keys in any table that point at `table`.
pub fn referencing(
  table: &str,
) -> impl Iterator<Item = (&'static TableDef, &'static ColumnDef, ForeignKey)> + '_ {
  TABLES.iter().flat_map(move |t| {
    t.columns.iter().filter_map(move |c| match c.references {
      Some(fk) if fk.table == table => Some((*t, c, fk)),
      _ => None,
    })
  })
}

// ─── Values ──────────────────────────────────────────────────────────────────

/// A single column value as it crosses the persistence boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
  Null,
  Text(String),
  Timestamp(DateTime<Utc>),
}

impl From<String> for FieldValue {
  fn from(s: String) -> Self { FieldValue::Text(s) }
}

impl From<Option<String>> for FieldValue {
  fn from(s: Option<String>) -> Self { s.map_or(FieldValue::Null, FieldValue::Text) }
}

impl From<DateTime<Utc>> for FieldValue {
  fn from(dt: DateTime<Utc>) -> Self { FieldValue::Timestamp(dt) }
}

/// Reads a row of [`FieldValue`]s back into entity fields, column by column.
pub struct Fields {
  table:  &'static TableDef,
  values: std::vec::IntoIter<FieldValue>,
  index:  usize,
}

impl Fields {
  pub fn new(table: &'static TableDef, values: Vec<FieldValue>) -> Self {
    Self { table, values: values.into_iter(), index: 0 }
  }

  fn next(&mut self) -> Result<(&'static str, FieldValue)> {
    let column = self
      .table
      .columns
      .get(self.index)
      .map_or("<extra>", |c| c.name);
    self.index += 1;
    let value = self.values.next().ok_or_else(|| Error::Decode {
      table:  self.table.name,
      column,
      reason: "missing value".into(),
    })?;
    Ok((column, value))
  }

  pub fn text(&mut self) -> Result<String> {
    match self.next()? {
      (_, FieldValue::Text(s)) => Ok(s),
      (column, other) => Err(self.mismatch(column, "text", &other)),
    }
  }

  pub fn opt_text(&mut self) -> Result<Option<String>> {
    match self.next()? {
      (_, FieldValue::Text(s)) => Ok(Some(s)),
      (_, FieldValue::Null) => Ok(None),
      (column, other) => Err(self.mismatch(column, "text", &other)),
    }
  }

  pub fn timestamp(&mut self) -> Result<DateTime<Utc>> {
    match self.next()? {
      (_, FieldValue::Timestamp(dt)) => Ok(dt),
      (column, other) => Err(self.mismatch(column, "timestamp", &other)),
    }
  }

  fn mismatch(&self, column: &'static str, want: &str, got: &FieldValue) -> Error {
    Error::Decode {
      table: self.table.name,
      column,
      reason: format!("expected {want}, found {got:?}"),
    }
  }
}

// ─── Entity ──────────────────────────────────────────────────────────────────

/// A row type persisted in one of the [`TABLES`].
///
/// Entities are plain data. Persistence goes through
/// [`ComplianceStore`](crate::store::ComplianceStore).
pub trait Entity: Sized + Send + Sync + 'static {
  const TABLE: &'static TableDef;

  fn id(&self) -> &str;

  /// One value per column of [`Self::TABLE`], in declaration order.
  fn to_fields(&self) -> Vec<FieldValue>;

  fn from_fields(fields: Vec<FieldValue>) -> Result<Self>;

  fn validate(&self) -> Result<(), ValidationError> {
    Self::TABLE.validate(&self.to_fields())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_table_starts_with_uuid_id() {
    for table in TABLES {
      let first = table.columns[0];
      assert_eq!(first.name, "id", "{}", table.name);
      assert_eq!(first.kind, ColumnKind::Uuid, "{}", table.name);
      assert!(!first.nullable);
    }
  }

  #[test]
  fn foreign_keys_point_at_declared_tables() {
    for table in TABLES {
      for (_, fk) in table.foreign_keys() {
        let parent = TABLES
          .iter()
          .position(|t| t.name == fk.table)
          .unwrap_or_else(|| panic!("{} references unknown {}", table.name, fk.table));
        let child = TABLES.iter().position(|t| t.name == table.name).unwrap();
        assert!(parent <= child, "{} listed before its parent", table.name);
        assert!(fk.constraint.starts_with(&format!("fk_{}_", table.name)));
      }
    }
  }

  #[test]
  fn referencing_metadata_lists_every_owner() {
    let mut owners: Vec<_> = referencing("metadata").map(|(t, _, _)| t.name).collect();
    owners.sort_unstable();
    assert_eq!(
      owners,
      ["assessments", "catalogs", "controls", "profiles", "results", "subjects"]
    );
  }

  #[test]
  fn referencing_subjects_includes_self_reference() {
    let constraints: Vec<_> =
      referencing("subjects").map(|(_, _, fk)| fk.constraint).collect();
    assert_eq!(constraints, ["fk_subjects_parent_id", "fk_results_subject_id"]);
  }

  #[test]
  fn validate_counts_characters_not_bytes() {
    let id = Uuid::new_v4().to_string();
    let name = "é".repeat(255);
    let values = vec![
      FieldValue::Text(id),
      FieldValue::Text(name),
      FieldValue::Text("cluster".into()),
      FieldValue::Null,
      FieldValue::Null,
    ];
    assert!(SUBJECTS.validate(&values).is_ok());
  }

  #[test]
  fn validate_rejects_missing_required_value() {
    let values = vec![
      FieldValue::Text(Uuid::new_v4().to_string()),
      FieldValue::Null,
      FieldValue::Text("cluster".into()),
      FieldValue::Null,
      FieldValue::Null,
    ];
    let err = SUBJECTS.validate(&values).unwrap_err();
    assert_eq!(err.column, "name");
    assert_eq!(err.reason, ValidationReason::Missing);
  }

  #[test]
  fn fields_reports_type_mismatch_with_column() {
    let mut fields = Fields::new(&ASSESSMENTS, vec![FieldValue::Null]);
    let err = fields.text().unwrap_err();
    assert!(matches!(err, Error::Decode { column: "id", .. }));
  }
}
