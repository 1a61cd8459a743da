//! Error types for `compserv-core`.

use thiserror::Error;

/// Why a single column value was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationReason {
  /// A required column was given no value.
  Missing,
  /// The value is longer than the column allows (in characters).
  TooLong { max: usize, len: usize },
  /// The value does not parse as a UUID.
  NotUuid,
  /// A uniqueness constraint rejected the value.
  Duplicate,
  /// A named `CHECK` constraint in the schema rejected the value.
  Check(String),
}

/// A write rejected because a column value breaks the entity model.
///
/// Raised locally before any database round trip where the violation is
/// cheap to detect, and by the store when the schema rejects a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {table}.{column}: {}", describe(.reason))]
pub struct ValidationError {
  pub table:  &'static str,
  pub column: String,
  pub reason: ValidationReason,
}

impl ValidationError {
  pub fn new(
    table: &'static str,
    column: impl Into<String>,
    reason: ValidationReason,
  ) -> Self {
    Self { table, column: column.into(), reason }
  }
}

fn describe(reason: &ValidationReason) -> String {
  match reason {
    ValidationReason::Missing => "value is required".into(),
    ValidationReason::TooLong { max, len } => {
      format!("{len} characters exceeds the limit of {max}")
    }
    ValidationReason::NotUuid => "not a UUID".into(),
    ValidationReason::Duplicate => "value already exists".into(),
    ValidationReason::Check(name) => format!("check constraint {name} failed"),
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Validation(#[from] ValidationError),

  /// A stored value could not be turned back into its entity field.
  #[error("cannot decode {table}.{column}: {reason}")]
  Decode {
    table:  &'static str,
    column: &'static str,
    reason: String,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
