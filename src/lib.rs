//! modproxy library
//!
//! A caching module proxy: answers module-protocol requests for one source
//! namespace by listing tags and checking out refs of repositories on a
//! destination git host, and serves the results from a local disk cache.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
