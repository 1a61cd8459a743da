//! HTTP service and operator tooling for compliance result recording.
//!
//! The library half holds what both binaries share: configuration loading,
//! secret resolution, and the axum [`Router`](axum::Router) that exposes the
//! [`ResultRecorder`](compserv_core::recorder::ResultRecorder) over HTTP.

pub mod api;
pub mod config;
pub mod secrets;

pub use api::{ApiError, router};
pub use config::Config;
