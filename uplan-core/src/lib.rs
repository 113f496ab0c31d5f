//! uplan core library
//!
//! Validates university courses against the directory API, deduplicates
//! courses and feeds, and merges per-course calendars into one feed
//! document. Outbound calls are cached and rate limited per client.

pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod fetch;
pub mod ics;
pub mod limiter;
pub mod path;
pub mod resolver;
pub mod semester;
pub mod service;
pub mod store;
pub mod types;
pub mod upstream;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export core types and error handling
pub use error::{Error, ErrorKind, Result, UpstreamError};
pub use types::*;

/// Commonly used items
pub mod prelude {
    pub use crate::{
        cache::{CacheBackend, MemoryCache, SharedBackend},
        config::Settings,
        fetch::{Fetcher, HttpFetcher},
        service::FeedService,
        store::FeedStore,
        types::*,
    };
}
