//! Keyed in-memory cache of query results.
//!
//! This module provides a resource-agnostic store that:
//! - Keys entries by structural tuples ([`CacheKey`])
//! - Tracks loading/error state and staleness per key
//! - Coalesces concurrent fetches for the same key into one request
//! - Applies only the latest-issued fetch for a key, discarding superseded ones
//! - Marks entries stale on invalidation while keeping last-known-good data

mod entry;
mod key;
mod store;

pub use entry::{CacheEntry, FetchStatus};
pub use key::{CacheKey, KeyFilter, KeyPart};
pub use store::CacheStore;

pub(crate) use store::{AnyData, ErasedFetcher, FetchHandle};
