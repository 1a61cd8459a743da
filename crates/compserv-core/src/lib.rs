//! Core types and trait definitions for the compliance service.
//!
//! This crate is deliberately free of HTTP and database dependencies. The
//! entity model declared here is what the migrations create and what every
//! store validates against.

pub mod entity;
pub mod error;
pub mod model;
pub mod recorder;
pub mod store;

pub use error::{Error, Result, ValidationError, ValidationReason};
