//! Shared domain types for the Ensemble runtime and gateway.
//!
//! Everything here is transport-agnostic: message and event shapes, the
//! execution-plan entities with their status machines, approval records,
//! and the configuration tree.

pub mod agent;
pub mod approval;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod message;
pub mod plan;

pub use error::{Error, Result};
