//! Fetcher: on-demand cache population
//!
//! Turns a cache miss into a checkout of exactly the requested ref, builds
//! the `.info`, `.mod` and `.zip` artifacts and installs them atomically.
//!
//! # Concurrency
//!
//! - **Single flight**: concurrent misses on one key share a single attempt
//!   and all observe its outcome
//! - **Global bound**: at most `max_concurrent_fetches` attempts run at once
//! - **Detached lifetime**: an attempt outlives the requests waiting on it and
//!   is only stopped by its own `fetch_timeout`
//!
//! # Module Organization
//!
//! - [`config`] - Timeouts and concurrency settings
//! - [`inflight`] - Registry of running attempts keyed by cache key
//! - [`core`] - The fetcher itself

pub mod config;
pub mod core;
pub mod inflight;

pub use self::config::{FetcherConfig, FetcherConfigBuilder};
pub use self::core::Fetcher;
pub use self::inflight::{Admission, InflightRegistry, SharedFetch};
