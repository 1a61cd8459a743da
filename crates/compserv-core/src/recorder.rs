//! The single external write entry point: recording a compliance result.

use std::sync::Arc;

use crate::{entity::ComplianceResult, store::ComplianceStore};

/// Persists compliance results through a [`ComplianceStore`].
///
/// Whatever the store enforces (field validation, foreign keys) is all the
/// checking a result gets.
pub struct ResultRecorder<S> {
  store: Arc<S>,
}

impl<S> Clone for ResultRecorder<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S: ComplianceStore> ResultRecorder<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  pub async fn record(
    &self,
    result: ComplianceResult,
  ) -> Result<ComplianceResult, S::Error> {
    self.store.create(result).await
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use super::*;
  use crate::{
    entity::new_id,
    model::{Entity, FieldValue},
  };

  #[derive(Debug, thiserror::Error)]
  #[error("missing")]
  struct Missing;

  /// Keeps every created row as its raw fields, keyed by table.
  #[derive(Default)]
  struct MemoryStore {
    rows: Mutex<Vec<(&'static str, Vec<FieldValue>)>>,
  }

  impl ComplianceStore for MemoryStore {
    type Error = Missing;

    async fn create<E: Entity>(&self, entity: E) -> Result<E, Missing> {
      self
        .rows
        .lock()
        .unwrap()
        .push((E::TABLE.name, entity.to_fields()));
      Ok(entity)
    }

    async fn get<'a, E: Entity>(&'a self, id: &'a str) -> Result<E, Missing> {
      let rows = self.rows.lock().unwrap();
      rows
        .iter()
        .find(|(t, f)| *t == E::TABLE.name && f[0] == FieldValue::Text(id.into()))
        .map(|(_, f)| E::from_fields(f.clone()).map_err(|_| Missing))
        .unwrap_or(Err(Missing))
    }

    async fn list<E: Entity>(&self) -> Result<Vec<E>, Missing> {
      let rows = self.rows.lock().unwrap();
      rows
        .iter()
        .filter(|(t, _)| *t == E::TABLE.name)
        .map(|(_, f)| E::from_fields(f.clone()).map_err(|_| Missing))
        .collect()
    }

    async fn delete<'a, E: Entity>(&'a self, entity: &'a E) -> Result<(), Missing> {
      let mut rows = self.rows.lock().unwrap();
      let before = rows.len();
      rows.retain(|(t, f)| {
        !(*t == E::TABLE.name && f[0] == FieldValue::Text(entity.id().into()))
      });
      if rows.len() == before { Err(Missing) } else { Ok(()) }
    }
  }

  fn result() -> ComplianceResult {
    ComplianceResult {
      id:            new_id(),
      name:          "ocp4-cis-api-server-anonymous-auth".into(),
      outcome:       "PASS".into(),
      instruction:   None,
      rationale:     Some("anonymous requests are rejected".into()),
      control_id:    new_id(),
      metadata_id:   new_id(),
      subject_id:    new_id(),
      assessment_id: new_id(),
    }
  }

  #[tokio::test]
  async fn record_persists_through_the_store() {
    let store = Arc::new(MemoryStore::default());
    let recorder = ResultRecorder::new(Arc::clone(&store));

    let recorded = recorder.record(result()).await.unwrap();

    let fetched = store.get::<ComplianceResult>(&recorded.id).await.unwrap();
    assert_eq!(fetched, recorded);
    assert_eq!(store.list::<ComplianceResult>().await.unwrap().len(), 1);
  }
}
