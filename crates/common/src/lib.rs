#![deny(missing_docs)]

//! Shared error taxonomy and request options for AQB crates.
//!
//! Architecture role:
//! - defines the [`CompileError`] / [`Result`] contracts used across the
//!   catalog, expression, and broker layers
//! - carries per-request [`CompileOptions`] from the HTTP collaborator into
//!   the compilation pipeline
//!
//! Key modules:
//! - [`config`]
//! - [`error`]

/// Per-request compilation options.
pub mod config;
/// Shared error taxonomy.
pub mod error;

pub use config::CompileOptions;
pub use error::{CompileError, Result};
