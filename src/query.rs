//! Async query layer for data fetching over the shared cache store.
//!
//! Inspired by TanStack Query: a query is a [`CacheKey`] plus a fetch
//! function. The layer decides whether to serve cached data, join a fetch
//! that is already in flight, or start a new one, and reports the outcome as
//! a [`QueryResult`] instead of an error.
//!
//! # Example
//!
//! ```ignore
//! let client = QueryClient::default();
//! let api = api.clone();
//! let result = client
//!   .query(
//!     cache_key!["restaurants", "all"],
//!     move || {
//!       let api = api.clone();
//!       async move { api.my_restaurants(ListFilter::All).await }
//!     },
//!     QueryOptions::default().with_stale_time(Duration::from_secs(30)),
//!   )
//!   .await;
//!
//! match result.status {
//!   FetchStatus::Success => render(result.data()),
//!   FetchStatus::Error => render_error(result.error()),
//!   FetchStatus::Loading | FetchStatus::Idle => {}
//! }
//! ```

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{
  AnyData, CacheEntry, CacheKey, CacheStore, ErasedFetcher, FetchHandle, FetchStatus, KeyFilter,
};
use crate::error::ApiError;

/// Per-query behaviour.
#[derive(Debug, Clone)]
pub struct QueryOptions {
  /// When false the query never fetches and reports an idle, empty result
  pub enabled: bool,
  /// How long fetched data stays fresh
  pub stale_time: Duration,
  /// Extra attempts after a network failure
  pub retry: u32,
  pub retry_delay: Duration,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      enabled: true,
      stale_time: Duration::ZERO,
      retry: 0,
      retry_delay: Duration::from_secs(1),
    }
  }
}

impl QueryOptions {
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn with_retry(mut self, retry: u32, delay: Duration) -> Self {
    self.retry = retry;
    self.retry_delay = delay;
    self
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }
}

/// What a consumer sees for a query: data, loading state and error.
#[derive(Debug, PartialEq)]
pub struct QueryResult<T> {
  pub data: Option<Arc<T>>,
  pub status: FetchStatus,
  pub error: Option<ApiError>,
  pub is_stale: bool,
  pub fetched_at: Option<DateTime<Utc>>,
}

impl<T> QueryResult<T> {
  /// The result of a query that is not allowed to run.
  pub fn disabled() -> Self {
    Self {
      data: None,
      status: FetchStatus::Idle,
      error: None,
      is_stale: false,
      fetched_at: None,
    }
  }

  pub fn is_loading(&self) -> bool {
    self.status == FetchStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status == FetchStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == FetchStatus::Error
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_deref()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.error.as_ref()
  }

  /// Derive another result from this one, keeping status and error.
  pub fn map<U>(&self, f: impl FnOnce(&T) -> U) -> QueryResult<U> {
    QueryResult {
      data: self.data.as_deref().map(|data| Arc::new(f(data))),
      status: self.status,
      error: self.error.clone(),
      is_stale: self.is_stale,
      fetched_at: self.fetched_at,
    }
  }

  fn from_entry(entry: CacheEntry<T>) -> Self {
    let is_stale = entry.is_stale();
    Self {
      data: entry.data,
      status: entry.status,
      error: entry.error,
      is_stale,
      fetched_at: entry.fetched_at,
    }
  }
}

impl<T> Clone for QueryResult<T> {
  fn clone(&self) -> Self {
    Self {
      data: self.data.clone(),
      status: self.status,
      error: self.error.clone(),
      is_stale: self.is_stale,
      fetched_at: self.fetched_at,
    }
  }
}

/// Box a typed fetch function for storage in the cache, adding retries for
/// network failures.
fn erase<T, F, Fut>(fetcher: F, options: &QueryOptions) -> ErasedFetcher
where
  T: Send + Sync + 'static,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
{
  let fetcher = Arc::new(fetcher);
  let retry = options.retry;
  let retry_delay = options.retry_delay;

  Arc::new(move || {
    let fetcher = fetcher.clone();
    async move {
      let mut attempt = 0;
      loop {
        match fetcher().await {
          Ok(data) => return Ok(Arc::new(data) as AnyData),
          Err(err) if err.is_retryable() && attempt < retry => {
            attempt += 1;
            debug!(attempt, error = %err, "retrying fetch");
            tokio::time::sleep(retry_delay).await;
          }
          Err(err) => return Err(err),
        }
      }
    }
    .boxed()
  })
}

/// Entry point for queries, invalidation and mutations.
///
/// Cheap to clone; all clones share one [`CacheStore`].
#[derive(Clone, Default)]
pub struct QueryClient {
  store: CacheStore,
}

impl QueryClient {
  pub fn new(store: CacheStore) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  /// Return cached data for `key`, fetching first if it is absent, stale or
  /// invalidated.
  ///
  /// Calls made while a fetch for `key` is in flight wait for that fetch
  /// instead of issuing another. While fetching, previous data stays in the
  /// cache. Failures are reported in the result and never clear data.
  pub async fn query<T, F, Fut>(
    &self,
    key: CacheKey,
    fetcher: F,
    options: QueryOptions,
  ) -> QueryResult<T>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    if !options.enabled {
      return QueryResult::disabled();
    }
    let fetcher = erase(fetcher, &options);
    self.run(&key, fetcher, options.stale_time, false).await
  }

  /// Fetch `key` now, superseding any fetch already in flight. The
  /// superseded fetch's result is never written.
  pub async fn refetch<T, F, Fut>(
    &self,
    key: CacheKey,
    fetcher: F,
    options: QueryOptions,
  ) -> QueryResult<T>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    if !options.enabled {
      return QueryResult::disabled();
    }
    let fetcher = erase(fetcher, &options);
    self.run(&key, fetcher, options.stale_time, true).await
  }

  /// Current state of `key` without fetching.
  pub fn snapshot<T: Send + Sync + 'static>(&self, key: &CacheKey) -> QueryResult<T> {
    self
      .store
      .get::<T>(key)
      .map(QueryResult::from_entry)
      .unwrap_or_else(QueryResult::disabled)
  }

  /// Drop the in-flight fetch for `key` so its result is ignored.
  pub fn cancel(&self, key: &CacheKey) -> bool {
    self.store.cancel(key)
  }

  /// Write data for `key` directly, as if it had just been fetched.
  pub fn set_query_data<T: Send + Sync + 'static>(
    &self,
    key: CacheKey,
    data: T,
    stale_time: Duration,
  ) {
    self.store.set(CacheEntry::with_data(key, data, stale_time));
  }

  /// Mark matching entries stale and refetch the observed ones in the
  /// background. Returns the number of entries marked.
  pub fn invalidate_queries(&self, filter: &KeyFilter) -> usize {
    let keys = self.store.invalidate(filter);
    let refetching = self.store.refetch_active(&keys);
    debug!(?filter, matched = keys.len(), refetching, "invalidated queries");
    keys.len()
  }

  /// Register long-lived interest in a query.
  pub fn observe<T, F, Fut>(
    &self,
    key: CacheKey,
    fetcher: F,
    options: QueryOptions,
  ) -> QueryObserver<T>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let fetcher = erase(fetcher, &options);
    self.store.attach_observer(
      &key,
      options.enabled.then(|| fetcher.clone()),
      options.stale_time,
    );
    QueryObserver {
      client: self.clone(),
      key,
      fetcher,
      options,
      _marker: PhantomData,
    }
  }

  async fn run<T: Send + Sync + 'static>(
    &self,
    key: &CacheKey,
    fetcher: ErasedFetcher,
    stale_time: Duration,
    force: bool,
  ) -> QueryResult<T> {
    let _waiting = self.store.wait(key, stale_time);
    let fetch = if force {
      Some(self.store.force_fetch(key, fetcher, stale_time))
    } else {
      self.store.fetch_if_needed(key, fetcher, stale_time)
    };
    if let Some(fetch) = fetch {
      self.settle(key, fetch).await;
    }
    self.snapshot(key)
  }

  /// Wait for `fetch`, then for whichever fetch superseded it, until nothing
  /// newer is in flight for `key`.
  async fn settle(&self, key: &CacheKey, mut fetch: FetchHandle) {
    loop {
      let generation = fetch.generation;
      fetch.await;
      match self.store.pending(key) {
        Some(next) if next.generation != generation => fetch = next,
        _ => return,
      }
    }
  }
}

/// A consumer's subscription to one query.
///
/// While an enabled observer exists its key is active: invalidations refetch
/// it in the background. Dropping the last observer of a key, or moving it to
/// a new key, cancels the fetch in flight for the old key unless some caller
/// is still awaiting it.
pub struct QueryObserver<T> {
  client: QueryClient,
  key: CacheKey,
  fetcher: ErasedFetcher,
  options: QueryOptions,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> QueryObserver<T> {
  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  pub fn state(&self) -> QueryResult<T> {
    if !self.options.enabled {
      return QueryResult::disabled();
    }
    self.client.snapshot(&self.key)
  }

  pub async fn fetch(&self) -> QueryResult<T> {
    if !self.options.enabled {
      return QueryResult::disabled();
    }
    self
      .client
      .run(&self.key, self.fetcher.clone(), self.options.stale_time, false)
      .await
  }

  pub async fn refetch(&self) -> QueryResult<T> {
    if !self.options.enabled {
      return QueryResult::disabled();
    }
    self
      .client
      .run(&self.key, self.fetcher.clone(), self.options.stale_time, true)
      .await
  }

  /// Point the observer at a new key and fetch function, e.g. after a filter
  /// changed.
  pub fn set_query<F, Fut>(&mut self, key: CacheKey, fetcher: F)
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    self.fetcher = erase(fetcher, &self.options);
    let store = self.client.store();
    store.attach_observer(
      &key,
      self.options.enabled.then(|| self.fetcher.clone()),
      self.options.stale_time,
    );
    store.detach_observer(&self.key, self.options.enabled);
    self.key = key;
  }

  /// Turn the query on or off, e.g. when the user signs in or out.
  pub fn set_enabled(&mut self, enabled: bool) {
    if self.options.enabled == enabled {
      return;
    }
    self.options.enabled = enabled;
    self
      .client
      .store
      .set_observer_enabled(&self.key, enabled, &self.fetcher);
  }
}

impl<T> Drop for QueryObserver<T> {
  fn drop(&mut self) {
    self
      .client
      .store
      .detach_observer(&self.key, self.options.enabled);
  }
}

impl<T> std::fmt::Debug for QueryObserver<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryObserver")
      .field("key", &self.key)
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}
