//! Cache entry types.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::key::CacheKey;
use crate::error::ApiError;

/// Fetch status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchStatus {
  /// Never fetched, or the fetch was skipped (not authenticated, cancelled)
  #[default]
  Idle,
  /// A fetch is in flight; previous data, if any, is still served
  Loading,
  /// Last fetch succeeded
  Success,
  /// Last fetch failed; previous data, if any, is kept
  Error,
}

/// Typed view of one cached query result.
#[derive(Debug, PartialEq)]
pub struct CacheEntry<T> {
  pub key: CacheKey,
  /// Last known good data
  pub data: Option<Arc<T>>,
  pub status: FetchStatus,
  pub error: Option<ApiError>,
  /// When `data` was last successfully fetched
  pub fetched_at: Option<DateTime<Utc>>,
  /// Freshness window measured from `fetched_at`
  pub stale_after: Duration,
  /// Explicitly marked stale by an invalidation
  pub invalidated: bool,
}

impl<T> CacheEntry<T> {
  /// An empty entry that has never been fetched.
  pub fn new(key: CacheKey, stale_after: Duration) -> Self {
    Self {
      key,
      data: None,
      status: FetchStatus::Idle,
      error: None,
      fetched_at: None,
      stale_after,
      invalidated: false,
    }
  }

  /// A fresh, successful entry holding `data`.
  pub fn with_data(key: CacheKey, data: T, stale_after: Duration) -> Self {
    Self {
      data: Some(Arc::new(data)),
      status: FetchStatus::Success,
      fetched_at: Some(Utc::now()),
      ..Self::new(key, stale_after)
    }
  }

  pub fn is_stale(&self) -> bool {
    is_stale_at(self.fetched_at, self.stale_after, self.invalidated, Utc::now())
  }
}

impl<T> Clone for CacheEntry<T> {
  fn clone(&self) -> Self {
    Self {
      key: self.key.clone(),
      data: self.data.clone(),
      status: self.status,
      error: self.error.clone(),
      fetched_at: self.fetched_at,
      stale_after: self.stale_after,
      invalidated: self.invalidated,
    }
  }
}

/// Staleness rule shared by typed entries and the store's untyped slots.
///
/// Data that was never fetched is stale. A zero window makes data stale as
/// soon as it lands.
pub(crate) fn is_stale_at(
  fetched_at: Option<DateTime<Utc>>,
  stale_after: Duration,
  invalidated: bool,
  now: DateTime<Utc>,
) -> bool {
  if invalidated {
    return true;
  }
  match fetched_at {
    None => true,
    Some(at) => {
      let window = TimeDelta::from_std(stale_after).unwrap_or(TimeDelta::MAX);
      now - at >= window
    }
  }
}
