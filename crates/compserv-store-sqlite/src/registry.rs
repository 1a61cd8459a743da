//! The schema registry: what "version N" means.
//!
//! A registry is an immutable, gap-free sequence of migration steps numbered
//! from 1. Each step carries a forward (`up`) and a reverse (`down`) SQL
//! script. Steps are either compiled in ([`SchemaRegistry::embedded`]) or
//! loaded from a directory of `NNNNNN_<name>.up.sql` /
//! `NNNNNN_<name>.down.sql` pairs ([`SchemaRegistry::from_dir`]).

use std::{collections::BTreeMap, path::Path};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("migration version {0} is declared more than once")]
  Duplicate(u32),

  #[error("migration versions must be contiguous from 1: expected {expected}, found {found}")]
  Gap { expected: u32, found: u32 },

  #[error("migration {version} has no {direction} script")]
  MissingScript { version: u32, direction: Direction },

  #[error("unrecognised migration file name: {0:?}")]
  BadFileName(String),

  #[error("cannot read migrations: {0}")]
  Io(#[from] std::io::Error),
}

/// Which way a step moves the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Up,
  Down,
}

impl std::fmt::Display for Direction {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
      Direction::Up => "up",
      Direction::Down => "down",
    })
  }
}

// ─── Step ────────────────────────────────────────────────────────────────────

/// One numbered, reversible schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
  pub version: u32,
  pub name:    String,
  pub up:      String,
  pub down:    String,
}

impl MigrationStep {
  pub fn new(
    version: u32,
    name: impl Into<String>,
    up: impl Into<String>,
    down: impl Into<String>,
  ) -> Self {
    Self { version, name: name.into(), up: up.into(), down: down.into() }
  }

  pub fn script(&self, direction: Direction) -> &str {
    match direction {
      Direction::Up => &self.up,
      Direction::Down => &self.down,
    }
  }

  /// The version the schema is at once this step ran in `direction`.
  pub fn target(&self, direction: Direction) -> u32 {
    match direction {
      Direction::Up => self.version,
      Direction::Down => self.version - 1,
    }
  }
}

// ─── Registry ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
  steps: Vec<MigrationStep>,
}

macro_rules! embedded {
  ($($version:literal => $file:literal),* $(,)?) => {
    vec![$(
      MigrationStep::new(
        $version,
        $file,
        include_str!(concat!("../migrations/", $file, ".up.sql")),
        include_str!(concat!("../migrations/", $file, ".down.sql")),
      ),
    )*]
  };
}

impl SchemaRegistry {
  /// Build a registry, rejecting duplicate or non-contiguous versions.
  pub fn new(mut steps: Vec<MigrationStep>) -> Result<Self, RegistryError> {
    steps.sort_by_key(|s| s.version);
    for (index, step) in steps.iter().enumerate() {
      let expected = index as u32 + 1;
      if step.version == expected {
        continue;
      }
      if index > 0 && steps[index - 1].version == step.version {
        return Err(RegistryError::Duplicate(step.version));
      }
      return Err(RegistryError::Gap { expected, found: step.version });
    }
    Ok(Self { steps })
  }

  /// The migrations shipped with this crate.
  pub fn embedded() -> Self {
    let steps = embedded![
      1 => "000001_create_subjects",
      2 => "000002_create_metadata",
      3 => "000003_add_subjects_parent_id",
      4 => "000004_create_assessments",
      5 => "000005_add_subjects_metadata_id",
      6 => "000006_create_catalogs",
      7 => "000007_create_profiles",
      8 => "000008_create_controls",
      9 => "000009_create_results",
    ];
    Self { steps }
  }

  /// Load `NNNNNN_<name>.{up,down}.sql` pairs from `dir`.
  ///
  /// Files without a `.sql` extension are ignored. Every version needs both
  /// halves.
  pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, RegistryError> {
    type Halves = (String, Option<String>, Option<String>);
    let mut found: BTreeMap<u32, Halves> = BTreeMap::new();

    for entry in std::fs::read_dir(dir)? {
      let path = entry?.path();
      if path.extension().is_none_or(|ext| ext != "sql") {
        continue;
      }
      let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RegistryError::BadFileName(path.display().to_string()))?;
      let (version, name, direction) = parse_file_name(file_name)?;
      let sql = std::fs::read_to_string(&path)?;

      let slot = found
        .entry(version)
        .or_insert_with(|| (name.to_owned(), None, None));
      let half = match direction {
        Direction::Up => &mut slot.1,
        Direction::Down => &mut slot.2,
      };
      if half.replace(sql).is_some() {
        return Err(RegistryError::Duplicate(version));
      }
    }

    let steps = found
      .into_iter()
      .map(|(version, (name, up, down))| {
        let up = up.ok_or(RegistryError::MissingScript {
          version,
          direction: Direction::Up,
        })?;
        let down = down.ok_or(RegistryError::MissingScript {
          version,
          direction: Direction::Down,
        })?;
        Ok(MigrationStep::new(version, name, up, down))
      })
      .collect::<Result<Vec<_>, RegistryError>>()?;

    Self::new(steps)
  }

  /// Highest version in the registry; `0` when empty.
  pub fn latest(&self) -> u32 { self.steps.last().map_or(0, |s| s.version) }

  pub fn get(&self, version: u32) -> Option<&MigrationStep> {
    // Contiguity makes the version an index.
    version
      .checked_sub(1)
      .and_then(|i| self.steps.get(i as usize))
  }

  /// Whether `version` is a valid target: `0` or a registered step.
  pub fn contains(&self, version: u32) -> bool {
    version == 0 || self.get(version).is_some()
  }

  pub fn steps(&self) -> &[MigrationStep] { &self.steps }
}

/// Split `000003_add_parent.up.sql` into `(3, "000003_add_parent", Up)`.
fn parse_file_name(file_name: &str) -> Result<(u32, &str, Direction), RegistryError> {
  let bad = || RegistryError::BadFileName(file_name.to_owned());

  let stem = file_name.strip_suffix(".sql").ok_or_else(bad)?;
  let (name, direction) = if let Some(name) = stem.strip_suffix(".up") {
    (name, Direction::Up)
  } else if let Some(name) = stem.strip_suffix(".down") {
    (name, Direction::Down)
  } else {
    return Err(bad());
  };

  let digits = name.split('_').next().unwrap_or_default();
  let version = digits.parse::<u32>().map_err(|_| bad())?;
  Ok((version, name, direction))
}

#[cfg(test)]
mod tests {
  use std::fs;

  use super::*;

  fn step(version: u32) -> MigrationStep {
    MigrationStep::new(version, format!("step_{version}"), "SELECT 1;", "SELECT 1;")
  }

  #[test]
  fn embedded_registry_is_contiguous() {
    let registry = SchemaRegistry::embedded();
    assert_eq!(registry.latest(), 9);
    let rebuilt = SchemaRegistry::new(registry.steps().to_vec()).unwrap();
    assert_eq!(rebuilt.steps(), registry.steps());
    assert!(registry.get(2).unwrap().up.contains("CREATE TABLE metadata"));
  }

  #[test]
  fn new_sorts_steps() {
    let registry = SchemaRegistry::new(vec![step(2), step(1), step(3)]).unwrap();
    let versions: Vec<_> = registry.steps().iter().map(|s| s.version).collect();
    assert_eq!(versions, [1, 2, 3]);
  }

  #[test]
  fn new_rejects_gaps() {
    let err = SchemaRegistry::new(vec![step(1), step(3)]).unwrap_err();
    assert!(matches!(err, RegistryError::Gap { expected: 2, found: 3 }));

    let err = SchemaRegistry::new(vec![step(2)]).unwrap_err();
    assert!(matches!(err, RegistryError::Gap { expected: 1, found: 2 }));
  }

  #[test]
  fn new_rejects_duplicates() {
    let err = SchemaRegistry::new(vec![step(1), step(2), step(2)]).unwrap_err();
    assert!(matches!(err, RegistryError::Duplicate(2)));
  }

  #[test]
  fn empty_registry_is_at_zero() {
    let registry = SchemaRegistry::new(Vec::new()).unwrap();
    assert_eq!(registry.latest(), 0);
    assert!(registry.contains(0));
    assert!(!registry.contains(1));
  }

  #[test]
  fn step_targets() {
    let s = step(4);
    assert_eq!(s.target(Direction::Up), 4);
    assert_eq!(s.target(Direction::Down), 3);
  }

  #[test]
  fn parse_file_names() {
    let (v, name, d) = parse_file_name("000012_add_index.down.sql").unwrap();
    assert_eq!((v, name, d), (12, "000012_add_index", Direction::Down));
    assert!(parse_file_name("000001_create.sql").is_err());
    assert!(parse_file_name("create.up.sql").is_err());
  }

  #[test]
  fn from_dir_loads_in_numeric_order() {
    let dir = tempfile::tempdir().unwrap();
    for (file, sql) in [
      ("10_ten.up.sql", "-- ten up"),
      ("10_ten.down.sql", "-- ten down"),
      ("2_two.up.sql", "-- two up"),
      ("2_two.down.sql", "-- two down"),
      ("README.md", "ignored"),
    ] {
      fs::write(dir.path().join(file), sql).unwrap();
    }
    for v in [1, 3, 4, 5, 6, 7, 8, 9] {
      fs::write(dir.path().join(format!("{v}_s.up.sql")), "").unwrap();
      fs::write(dir.path().join(format!("{v}_s.down.sql")), "").unwrap();
    }

    let registry = SchemaRegistry::from_dir(dir.path()).unwrap();
    assert_eq!(registry.latest(), 10);
    assert_eq!(registry.get(2).unwrap().up, "-- two up");
    assert_eq!(registry.get(10).unwrap().down, "-- ten down");
  }

  #[test]
  fn from_dir_requires_both_halves() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("1_a.up.sql"), "").unwrap();
    let err = SchemaRegistry::from_dir(dir.path()).unwrap_err();
    assert!(matches!(
      err,
      RegistryError::MissingScript { version: 1, direction: Direction::Down }
    ));
  }

  #[test]
  fn from_dir_matches_embedded() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    let loaded = SchemaRegistry::from_dir(dir).unwrap();
    let embedded = SchemaRegistry::embedded();
    assert_eq!(loaded.steps(), embedded.steps());
  }
}
