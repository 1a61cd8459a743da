//! SQLite backend for the compliance store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. The schema is owned by the
//! versioned migrations under `migrations/`, applied by [`MigrationEngine`].

mod encode;
mod store;

pub mod connect;
pub mod error;
pub mod migrate;
pub mod registry;

pub use connect::{StoreConfig, connect};
pub use error::{Error, Result};
pub use migrate::{MigrationEngine, MigrationState};
pub use registry::{MigrationStep, SchemaRegistry};
pub use store::SqliteStore;
