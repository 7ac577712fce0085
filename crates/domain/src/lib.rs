//! Shared domain types for the VoxGate runtime.
//!
//! Everything here is provider- and transport-agnostic: the configuration
//! tree, the error type used across all crates, the session model, call and
//! usage records, plan limits, and the streaming event types the provider
//! adapters produce.

pub mod call;
pub mod config;
pub mod error;
pub mod plan;
pub mod session;
pub mod stream;
pub mod tool;

pub use error::{Error, Result};
