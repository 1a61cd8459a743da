//! The `ComplianceStore` trait.
//!
//! Implemented by storage backends (e.g. `compserv-store-sqlite`). The
//! recorder and the HTTP layer depend on this abstraction, not on any
//! concrete backend.

use std::future::Future;

use crate::model::Entity;

/// Typed create/read/delete over every [`Entity`].
///
/// Writes are validated against the entity model before reaching the
/// database. Foreign keys are restrict-on-delete: deleting a row that is
/// still referenced fails and leaves the row in place.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait ComplianceStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Persist a new row and return it as stored.
  fn create<E: Entity>(
    &self,
    entity: E,
  ) -> impl Future<Output = Result<E, Self::Error>> + Send + '_;

  /// Fetch a row by id. A missing row is an error, not `None`.
  fn get<'a, E: Entity>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<E, Self::Error>> + Send + 'a;

  /// Every row of the entity's table.
  fn list<E: Entity>(
    &self,
  ) -> impl Future<Output = Result<Vec<E>, Self::Error>> + Send + '_;

  /// Delete a row. Fails without deleting if another row references it.
  fn delete<'a, E: Entity>(
    &'a self,
    entity: &'a E,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
