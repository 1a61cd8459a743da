//! The compliance entities.
//!
//! Identifiers are UUID-format strings; the store validates them against the
//! [`model`](crate::model) before every write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Result,
  model::{
    ASSESSMENTS, CATALOGS, CONTROLS, Entity, FieldValue, Fields, METADATA,
    PROFILES, RESULTS, SUBJECTS, TableDef,
  },
};

/// A fresh random identifier in the hyphenated form the store expects.
pub fn new_id() -> String { Uuid::new_v4().hyphenated().to_string() }

// ─── Metadata ────────────────────────────────────────────────────────────────

/// Provenance record referenced by the other entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
  pub id:          String,
  pub created_at:  DateTime<Utc>,
  pub updated_at:  DateTime<Utc>,
  pub version:     String,
  pub description: String,
}

impl Metadata {
  pub fn new(version: impl Into<String>, description: impl Into<String>) -> Self {
    let now = Utc::now();
    Self {
      id:          new_id(),
      created_at:  now,
      updated_at:  now,
      version:     version.into(),
      description: description.into(),
    }
  }
}

impl Entity for Metadata {
  const TABLE: &'static TableDef = &METADATA;

  fn id(&self) -> &str { &self.id }

  fn to_fields(&self) -> Vec<FieldValue> {
    vec![
      self.id.clone().into(),
      self.created_at.into(),
      self.updated_at.into(),
      self.version.clone().into(),
      self.description.clone().into(),
    ]
  }

  fn from_fields(fields: Vec<FieldValue>) -> Result<Self> {
    let mut f = Fields::new(Self::TABLE, fields);
    Ok(Self {
      id:          f.text()?,
      created_at:  f.timestamp()?,
      updated_at:  f.timestamp()?,
      version:     f.text()?,
      description: f.text()?,
    })
  }
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
  pub id:          String,
  pub name:        String,
  pub metadata_id: String,
  /// Opaque catalog document.
  pub content:     Option<String>,
}

impl Entity for Catalog {
  const TABLE: &'static TableDef = &CATALOGS;

  fn id(&self) -> &str { &self.id }

  fn to_fields(&self) -> Vec<FieldValue> {
    vec![
      self.id.clone().into(),
      self.name.clone().into(),
      self.metadata_id.clone().into(),
      self.content.clone().into(),
    ]
  }

  fn from_fields(fields: Vec<FieldValue>) -> Result<Self> {
    let mut f = Fields::new(Self::TABLE, fields);
    Ok(Self {
      id:          f.text()?,
      name:        f.text()?,
      metadata_id: f.text()?,
      content:     f.opt_text()?,
    })
  }
}

// ─── Profile ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
  pub id:          String,
  pub name:        String,
  pub metadata_id: String,
  pub catalog_id:  String,
}

impl Entity for Profile {
  const TABLE: &'static TableDef = &PROFILES;

  fn id(&self) -> &str { &self.id }

  fn to_fields(&self) -> Vec<FieldValue> {
    vec![
      self.id.clone().into(),
      self.name.clone().into(),
      self.metadata_id.clone().into(),
      self.catalog_id.clone().into(),
    ]
  }

  fn from_fields(fields: Vec<FieldValue>) -> Result<Self> {
    let mut f = Fields::new(Self::TABLE, fields);
    Ok(Self {
      id:          f.text()?,
      name:        f.text()?,
      metadata_id: f.text()?,
      catalog_id:  f.text()?,
    })
  }
}

// ─── Control ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
  pub id:          String,
  pub name:        String,
  pub severity:    String,
  pub profile_id:  String,
  pub metadata_id: String,
}

impl Entity for Control {
  const TABLE: &'static TableDef = &CONTROLS;

  fn id(&self) -> &str { &self.id }

  fn to_fields(&self) -> Vec<FieldValue> {
    vec![
      self.id.clone().into(),
      self.name.clone().into(),
      self.severity.clone().into(),
      self.profile_id.clone().into(),
      self.metadata_id.clone().into(),
    ]
  }

  fn from_fields(fields: Vec<FieldValue>) -> Result<Self> {
    let mut f = Fields::new(Self::TABLE, fields);
    Ok(Self {
      id:          f.text()?,
      name:        f.text()?,
      severity:    f.text()?,
      profile_id:  f.text()?,
      metadata_id: f.text()?,
    })
  }
}

// ─── Subject ─────────────────────────────────────────────────────────────────

/// Something that was audited: a cluster, a node, a namespace.
///
/// Subjects may form a hierarchy through `parent_id`. Cycles are not
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
  pub id:          String,
  /// At most 255 characters.
  pub name:        String,
  /// At most 50 characters.
  #[serde(rename = "type")]
  pub kind:        String,
  pub parent_id:   Option<String>,
  pub metadata_id: Option<String>,
}

impl Subject {
  pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
    Self {
      id:          new_id(),
      name:        name.into(),
      kind:        kind.into(),
      parent_id:   None,
      metadata_id: None,
    }
  }

  pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
    self.parent_id = Some(parent_id.into());
    self
  }

  pub fn with_metadata(mut self, metadata_id: impl Into<String>) -> Self {
    self.metadata_id = Some(metadata_id.into());
    self
  }
}

impl Entity for Subject {
  const TABLE: &'static TableDef = &SUBJECTS;

  fn id(&self) -> &str { &self.id }

  fn to_fields(&self) -> Vec<FieldValue> {
    vec![
      self.id.clone().into(),
      self.name.clone().into(),
      self.kind.clone().into(),
      self.parent_id.clone().into(),
      self.metadata_id.clone().into(),
    ]
  }

  fn from_fields(fields: Vec<FieldValue>) -> Result<Self> {
    let mut f = Fields::new(Self::TABLE, fields);
    Ok(Self {
      id:          f.text()?,
      name:        f.text()?,
      kind:        f.text()?,
      parent_id:   f.opt_text()?,
      metadata_id: f.opt_text()?,
    })
  }
}

// ─── Assessment ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
  pub id:          String,
  pub name:        String,
  pub metadata_id: String,
}

impl Entity for Assessment {
  const TABLE: &'static TableDef = &ASSESSMENTS;

  fn id(&self) -> &str { &self.id }

  fn to_fields(&self) -> Vec<FieldValue> {
    vec![
      self.id.clone().into(),
      self.name.clone().into(),
      self.metadata_id.clone().into(),
    ]
  }

  fn from_fields(fields: Vec<FieldValue>) -> Result<Self> {
    let mut f = Fields::new(Self::TABLE, fields);
    Ok(Self {
      id:          f.text()?,
      name:        f.text()?,
      metadata_id: f.text()?,
    })
  }
}

// ─── Result ──────────────────────────────────────────────────────────────────

/// The outcome of evaluating one control against one subject during an
/// assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceResult {
  pub id:            String,
  pub name:          String,
  pub outcome:       String,
  #[serde(default)]
  pub instruction:   Option<String>,
  #[serde(default)]
  pub rationale:     Option<String>,
  pub control_id:    String,
  pub metadata_id:   String,
  pub subject_id:    String,
  pub assessment_id: String,
}

impl Entity for ComplianceResult {
  const TABLE: &'static TableDef = &RESULTS;

  fn id(&self) -> &str { &self.id }

  fn to_fields(&self) -> Vec<FieldValue> {
    vec![
      self.id.clone().into(),
      self.name.clone().into(),
      self.outcome.clone().into(),
      self.instruction.clone().into(),
      self.rationale.clone().into(),
      self.control_id.clone().into(),
      self.metadata_id.clone().into(),
      self.subject_id.clone().into(),
      self.assessment_id.clone().into(),
    ]
  }

  fn from_fields(fields: Vec<FieldValue>) -> Result<Self> {
    let mut f = Fields::new(Self::TABLE, fields);
    Ok(Self {
      id:            f.text()?,
      name:          f.text()?,
      outcome:       f.text()?,
      instruction:   f.opt_text()?,
      rationale:     f.opt_text()?,
      control_id:    f.text()?,
      metadata_id:   f.text()?,
      subject_id:    f.text()?,
      assessment_id: f.text()?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{ValidationReason, model::TABLES};

  #[test]
  fn fields_match_table_width() {
    let metadata = Metadata::new("v1", "nightly scan");
    assert_eq!(metadata.to_fields().len(), METADATA.columns.len());
    let subject = Subject::new("cluster-a", "cluster");
    assert_eq!(subject.to_fields().len(), SUBJECTS.columns.len());
    assert_eq!(TABLES.len(), 7);
  }

  #[test]
  fn subject_round_trips_through_fields() {
    let subject = Subject::new("node-1", "node")
      .with_parent(new_id())
      .with_metadata(new_id());
    let back = Subject::from_fields(subject.to_fields()).unwrap();
    assert_eq!(back, subject);
  }

  #[test]
  fn subject_name_limit_is_255_characters() {
    let ok = Subject::new("a".repeat(255), "cluster");
    assert!(ok.validate().is_ok());

    let err = Subject::new("a".repeat(256), "cluster").validate().unwrap_err();
    assert_eq!(err.column, "name");
    assert_eq!(err.reason, ValidationReason::TooLong { max: 255, len: 256 });
  }

  #[test]
  fn subject_type_limit_is_50_characters() {
    let err = Subject::new("cluster-a", "a".repeat(51)).validate().unwrap_err();
    assert_eq!(err.column, "type");
  }

  #[test]
  fn non_uuid_ids_are_rejected() {
    let mut subject = Subject::new("cluster-a", "cluster");
    subject.id = "1".into();
    let err = subject.validate().unwrap_err();
    assert_eq!(err.column, "id");
    assert_eq!(err.reason, ValidationReason::NotUuid);

    let subject = Subject::new("cluster-a", "cluster").with_parent("parent");
    assert_eq!(subject.validate().unwrap_err().column, "parent_id");
  }

  #[test]
  fn subject_serializes_kind_as_type() {
    let subject = Subject::new("cluster-a", "cluster");
    let json = serde_json::to_value(&subject).unwrap();
    assert_eq!(json["type"], "cluster");
  }
}
