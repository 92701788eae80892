//! In-memory cache store with per-key fetch coordination.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::future::IntoFuture;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::entry::{is_stale_at, CacheEntry, FetchStatus};
use super::key::{CacheKey, KeyFilter};
use crate::error::ApiError;

/// Type-erased cached value. Entries of different types share one store.
pub(crate) type AnyData = Arc<dyn Any + Send + Sync>;

/// Type-erased fetch function registered for a key.
pub(crate) type ErasedFetcher =
  Arc<dyn Fn() -> BoxFuture<'static, Result<AnyData, ApiError>> + Send + Sync>;

/// Completion signal of an in-flight fetch. Resolves once the result has been
/// applied to (or discarded by) the store.
pub(crate) type PendingFetch = Shared<BoxFuture<'static, ()>>;

/// An in-flight fetch a caller can await.
#[derive(Clone)]
pub(crate) struct FetchHandle {
  pub(crate) generation: u64,
  pub(crate) done: PendingFetch,
}

impl IntoFuture for FetchHandle {
  type Output = ();
  type IntoFuture = PendingFetch;

  fn into_future(self) -> Self::IntoFuture {
    self.done
  }
}

struct InFlight {
  generation: u64,
  pending: PendingFetch,
  abort: AbortHandle,
  /// Status to restore if the fetch is cancelled
  status_before: FetchStatus,
}

impl InFlight {
  fn handle(&self) -> FetchHandle {
    FetchHandle {
      generation: self.generation,
      done: self.pending.clone(),
    }
  }
}

struct Slot {
  data: Option<AnyData>,
  status: FetchStatus,
  error: Option<ApiError>,
  fetched_at: Option<DateTime<Utc>>,
  stale_after: Duration,
  invalidated: bool,
  /// Bumped on every fetch start and cancellation; only the resolution
  /// carrying the current generation is applied.
  generation: u64,
  in_flight: Option<InFlight>,
  /// Most recent fetch function, used for background refetches
  fetcher: Option<ErasedFetcher>,
  observers: usize,
  /// Observers that want background refetches
  enabled_observers: usize,
  /// Callers currently awaiting a fetch of this key
  waiters: usize,
}

impl Slot {
  fn new(stale_after: Duration) -> Self {
    Self {
      data: None,
      status: FetchStatus::Idle,
      error: None,
      fetched_at: None,
      stale_after,
      invalidated: false,
      generation: 0,
      in_flight: None,
      fetcher: None,
      observers: 0,
      enabled_observers: 0,
      waiters: 0,
    }
  }

  fn needs_fetch(&self) -> bool {
    self.status == FetchStatus::Error
      || is_stale_at(self.fetched_at, self.stale_after, self.invalidated, Utc::now())
  }

  fn view<T: Send + Sync + 'static>(&self, key: &CacheKey) -> CacheEntry<T> {
    let data = match self.data.clone().map(|d| d.downcast::<T>()) {
      Some(Ok(data)) => Some(data),
      Some(Err(_)) => {
        warn!(%key, "cached data has a different type than requested");
        None
      }
      None => None,
    };

    CacheEntry {
      key: key.clone(),
      data,
      status: self.status,
      error: self.error.clone(),
      fetched_at: self.fetched_at,
      stale_after: self.stale_after,
      invalidated: self.invalidated,
    }
  }
}

/// Keyed in-memory store of query results.
///
/// Cloning yields another handle to the same store. Build one at startup and
/// [`clear`](Self::clear) it on sign-out. Methods that start fetches spawn
/// tokio tasks and must run inside a runtime.
#[derive(Clone, Default)]
pub struct CacheStore {
  slots: Arc<Mutex<HashMap<CacheKey, Slot>>>,
}

impl CacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  // The lock is never held across an await, so a poisoned map is still
  // consistent.
  fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Typed view of the entry for `key`.
  pub fn get<T: Send + Sync + 'static>(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
    self.lock().get(key).map(|slot| slot.view(key))
  }

  /// Overwrite data and metadata of an entry.
  ///
  /// A fetch already in flight for the key keeps running and will overwrite
  /// this value when it resolves.
  pub fn set<T: Send + Sync + 'static>(&self, entry: CacheEntry<T>) {
    let mut slots = self.lock();
    let slot = slots
      .entry(entry.key)
      .or_insert_with(|| Slot::new(entry.stale_after));

    slot.data = entry.data.map(|d| d as AnyData);
    slot.status = entry.status;
    slot.error = entry.error;
    slot.fetched_at = entry.fetched_at;
    slot.stale_after = entry.stale_after;
    slot.invalidated = entry.invalidated;
  }

  /// Mark matching entries stale without touching their data.
  ///
  /// Returns the matched keys.
  pub fn invalidate(&self, filter: &KeyFilter) -> Vec<CacheKey> {
    let mut slots = self.lock();
    let mut matched = Vec::new();
    for (key, slot) in slots.iter_mut().filter(|(key, _)| filter.matches(key)) {
      slot.invalidated = true;
      matched.push(key.clone());
    }
    debug!(?filter, count = matched.len(), "invalidated cache entries");
    matched
  }

  /// Evict matching entries, cancelling their in-flight fetches.
  pub fn remove(&self, filter: &KeyFilter) -> usize {
    let mut slots = self.lock();
    let before = slots.len();
    slots.retain(|key, slot| {
      if !filter.matches(key) {
        return true;
      }
      if let Some(in_flight) = slot.in_flight.take() {
        in_flight.abort.abort();
      }
      false
    });
    before - slots.len()
  }

  /// Evict everything (sign-out).
  pub fn clear(&self) {
    let removed = self.remove(&KeyFilter::All);
    debug!(removed, "cleared cache");
  }

  /// Cached keys in sorted order.
  pub fn keys(&self) -> Vec<CacheKey> {
    let mut keys: Vec<CacheKey> = self.lock().keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  pub fn is_fetching(&self, key: &CacheKey) -> bool {
    self
      .lock()
      .get(key)
      .is_some_and(|slot| slot.in_flight.is_some())
  }

  /// Register `fetcher` for `key` and make sure the entry is being fetched if
  /// it needs to be.
  ///
  /// Returns the in-flight fetch to await, coalescing onto an existing one,
  /// or `None` if the cached data is fresh.
  pub(crate) fn fetch_if_needed(
    &self,
    key: &CacheKey,
    fetcher: ErasedFetcher,
    stale_after: Duration,
  ) -> Option<FetchHandle> {
    let mut slots = self.lock();
    let slot = slots
      .entry(key.clone())
      .or_insert_with(|| Slot::new(stale_after));
    slot.stale_after = stale_after;
    slot.fetcher = Some(fetcher.clone());

    if let Some(in_flight) = &slot.in_flight {
      debug!(%key, generation = in_flight.generation, "joining in-flight fetch");
      return Some(in_flight.handle());
    }

    if !slot.needs_fetch() {
      return None;
    }

    Some(self.start(key, slot, fetcher))
  }

  /// Start a fetch that supersedes whatever is in flight for `key`.
  pub(crate) fn force_fetch(
    &self,
    key: &CacheKey,
    fetcher: ErasedFetcher,
    stale_after: Duration,
  ) -> FetchHandle {
    let mut slots = self.lock();
    let slot = slots
      .entry(key.clone())
      .or_insert_with(|| Slot::new(stale_after));
    slot.stale_after = stale_after;
    slot.fetcher = Some(fetcher.clone());
    self.start(key, slot, fetcher)
  }

  pub(crate) fn pending(&self, key: &CacheKey) -> Option<FetchHandle> {
    self
      .lock()
      .get(key)
      .and_then(|slot| slot.in_flight.as_ref().map(InFlight::handle))
  }

  /// Drop the in-flight fetch for `key`. Its resolution will be ignored and
  /// the entry returns to the status it had before the fetch started.
  pub(crate) fn cancel(&self, key: &CacheKey) -> bool {
    let mut slots = self.lock();
    match slots.get_mut(key) {
      Some(slot) => Self::cancel_slot(key, slot),
      None => false,
    }
  }

  fn cancel_slot(key: &CacheKey, slot: &mut Slot) -> bool {
    let Some(in_flight) = slot.in_flight.take() else {
      return false;
    };
    in_flight.abort.abort();
    slot.generation += 1;
    slot.status = in_flight.status_before;
    debug!(%key, generation = in_flight.generation, "cancelled fetch");
    true
  }

  /// Start background fetches for the given keys that have enabled
  /// observers, a registered fetcher and nothing in flight. Returns how many
  /// started.
  pub(crate) fn refetch_active(&self, keys: &[CacheKey]) -> usize {
    let mut slots = self.lock();
    let mut started = 0;
    for key in keys {
      let Some(slot) = slots.get_mut(key) else {
        continue;
      };
      if slot.enabled_observers == 0 || slot.in_flight.is_some() {
        continue;
      }
      if let Some(fetcher) = slot.fetcher.clone() {
        // Nobody awaits this; the store applies the result itself.
        drop(self.start(key, slot, fetcher));
        started += 1;
      }
    }
    started
  }

  /// Register interest in `key`. Observed keys are refetched in the
  /// background when invalidated.
  pub(crate) fn attach_observer(
    &self,
    key: &CacheKey,
    fetcher: Option<ErasedFetcher>,
    stale_after: Duration,
  ) {
    let mut slots = self.lock();
    let slot = slots
      .entry(key.clone())
      .or_insert_with(|| Slot::new(stale_after));
    slot.observers += 1;
    if fetcher.is_some() {
      slot.enabled_observers += 1;
      slot.fetcher = fetcher;
    }
  }

  /// Move one observer of `key` in or out of the set that background
  /// refetches serve. The key keeps refetching while any enabled observer
  /// remains.
  pub(crate) fn set_observer_enabled(
    &self,
    key: &CacheKey,
    enabled: bool,
    fetcher: &ErasedFetcher,
  ) {
    let mut slots = self.lock();
    let Some(slot) = slots.get_mut(key) else {
      return;
    };
    if enabled {
      slot.enabled_observers += 1;
      slot.fetcher = Some(fetcher.clone());
    } else {
      slot.enabled_observers = slot.enabled_observers.saturating_sub(1);
    }
  }

  /// Release one observer. When the last one leaves and no caller is
  /// awaiting the key, the in-flight fetch is cancelled.
  pub(crate) fn detach_observer(&self, key: &CacheKey, enabled: bool) {
    let mut slots = self.lock();
    let Some(slot) = slots.get_mut(key) else {
      return;
    };
    slot.observers = slot.observers.saturating_sub(1);
    if enabled {
      slot.enabled_observers = slot.enabled_observers.saturating_sub(1);
    }
    if slot.observers == 0 && slot.waiters == 0 {
      Self::cancel_slot(key, slot);
    }
  }

  /// Count the caller as waiting on `key` until the guard is dropped. A
  /// waited-on fetch survives its last observer leaving.
  pub(crate) fn wait(&self, key: &CacheKey, stale_after: Duration) -> WaitGuard {
    self
      .lock()
      .entry(key.clone())
      .or_insert_with(|| Slot::new(stale_after))
      .waiters += 1;
    WaitGuard {
      store: self.clone(),
      key: key.clone(),
    }
  }

  /// Number of live observers of `key`.
  pub fn observer_count(&self, key: &CacheKey) -> usize {
    self.lock().get(key).map_or(0, |slot| slot.observers)
  }

  fn start(&self, key: &CacheKey, slot: &mut Slot, fetcher: ErasedFetcher) -> FetchHandle {
    let status_before = match slot.in_flight.take() {
      Some(previous) => {
        previous.abort.abort();
        debug!(%key, generation = previous.generation, "superseding in-flight fetch");
        previous.status_before
      }
      None => slot.status,
    };

    slot.generation += 1;
    slot.status = FetchStatus::Loading;
    let generation = slot.generation;
    debug!(%key, generation, "starting fetch");

    let store = self.clone();
    let task_key = key.clone();
    let handle = tokio::spawn(async move {
      let result = match AssertUnwindSafe(async { fetcher().await }).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
          warn!(key = %task_key, generation, "fetch panicked");
          Err(ApiError::InvalidResponse("fetch panicked".to_string()))
        }
      };
      store.resolve(&task_key, generation, result);
    });

    let abort = handle.abort_handle();
    let pending = handle.map(|_| ()).boxed().shared();
    let in_flight = InFlight {
      generation,
      pending,
      abort,
      status_before,
    };
    let fetch = in_flight.handle();
    slot.in_flight = Some(in_flight);
    fetch
  }

  fn resolve(&self, key: &CacheKey, generation: u64, result: Result<AnyData, ApiError>) {
    let mut slots = self.lock();
    let Some(slot) = slots.get_mut(key) else {
      debug!(%key, generation, "discarding result for evicted entry");
      return;
    };
    if slot.generation != generation {
      debug!(%key, generation, current = slot.generation, "discarding superseded result");
      return;
    }
    slot.in_flight = None;

    match result {
      Ok(data) => {
        slot.data = Some(data);
        slot.status = FetchStatus::Success;
        slot.error = None;
        slot.fetched_at = Some(Utc::now());
        slot.invalidated = false;
      }
      Err(ApiError::Unauthenticated) => {
        debug!(%key, "not authenticated, fetch skipped");
        slot.status = FetchStatus::Idle;
        slot.error = None;
      }
      Err(err) => {
        warn!(%key, error = %err, "fetch failed");
        slot.status = FetchStatus::Error;
        slot.error = Some(err);
      }
    }
  }
}

/// Registration of a caller awaiting a key, released on drop.
pub(crate) struct WaitGuard {
  store: CacheStore,
  key: CacheKey,
}

impl Drop for WaitGuard {
  fn drop(&mut self) {
    if let Some(slot) = self.store.lock().get_mut(&self.key) {
      slot.waiters = slot.waiters.saturating_sub(1);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache_key;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn counting_fetcher(counter: Arc<AtomicU32>, delay: Duration) -> ErasedFetcher {
    Arc::new(move || {
      let counter = counter.clone();
      async move {
        tokio::time::sleep(delay).await;
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(n) as AnyData)
      }
      .boxed()
    })
  }

  #[test]
  fn test_set_then_get() {
    let store = CacheStore::new();
    let key = cache_key!["restaurants", "all"];
    store.set(CacheEntry::with_data(
      key.clone(),
      vec!["a", "b"],
      Duration::from_secs(30),
    ));

    let entry = store.get::<Vec<&str>>(&key).expect("entry");
    assert_eq!(entry.data.as_deref(), Some(&vec!["a", "b"]));
    assert_eq!(entry.status, FetchStatus::Success);
    assert!(store.get::<Vec<&str>>(&cache_key!["restaurants"]).is_none());
  }

  #[test]
  fn test_wrong_type_reads_as_absent_data() {
    let store = CacheStore::new();
    let key = cache_key!["k"];
    store.set(CacheEntry::with_data(key.clone(), 1u32, Duration::ZERO));
    let entry = store.get::<String>(&key).expect("entry");
    assert!(entry.data.is_none());
  }

  #[test]
  fn test_invalidate_keeps_data() {
    let store = CacheStore::new();
    let all = cache_key!["restaurants", "all"];
    let user = cache_key!["currentUser"];
    store.set(CacheEntry::with_data(all.clone(), 3u32, Duration::from_secs(60)));
    store.set(CacheEntry::with_data(user.clone(), 9u32, Duration::from_secs(60)));

    let matched = store.invalidate(&KeyFilter::Prefix(cache_key!["restaurants"]));
    assert_eq!(matched, vec![all.clone()]);

    let entry = store.get::<u32>(&all).expect("entry");
    assert!(entry.invalidated);
    assert!(entry.is_stale());
    assert_eq!(entry.data.as_deref(), Some(&3));
    assert!(!store.get::<u32>(&user).expect("entry").invalidated);
  }

  #[test]
  fn test_remove_and_clear() {
    let store = CacheStore::new();
    store.set(CacheEntry::with_data(cache_key!["a", 1i64], 1u32, Duration::ZERO));
    store.set(CacheEntry::with_data(cache_key!["a", 2i64], 2u32, Duration::ZERO));
    store.set(CacheEntry::with_data(cache_key!["b"], 3u32, Duration::ZERO));

    assert_eq!(store.remove(&KeyFilter::Prefix(cache_key!["a"])), 2);
    assert_eq!(store.keys(), vec![cache_key!["b"]]);

    store.clear();
    assert!(store.is_empty());
  }

  #[tokio::test]
  async fn test_concurrent_fetches_are_coalesced() {
    let store = CacheStore::new();
    let key = cache_key!["restaurants", "all"];
    let counter = Arc::new(AtomicU32::new(0));
    let fetcher = counting_fetcher(counter.clone(), Duration::from_millis(30));

    let first = store
      .fetch_if_needed(&key, fetcher.clone(), Duration::from_secs(60))
      .expect("fetch started");
    let second = store
      .fetch_if_needed(&key, fetcher.clone(), Duration::from_secs(60))
      .expect("joined in-flight fetch");
    assert!(store.is_fetching(&key));

    first.await;
    second.await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let entry = store.get::<u32>(&key).expect("entry");
    assert_eq!(entry.data.as_deref(), Some(&1));
    assert_eq!(entry.status, FetchStatus::Success);

    // Fresh now, so nothing to fetch
    assert!(store
      .fetch_if_needed(&key, fetcher, Duration::from_secs(60))
      .is_none());
  }

  #[tokio::test]
  async fn test_superseded_result_is_discarded() {
    let store = CacheStore::new();
    let key = cache_key!["k"];

    let slow: ErasedFetcher = Arc::new(|| {
      async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(Arc::new("slow") as AnyData)
      }
      .boxed()
    });
    let fast: ErasedFetcher = Arc::new(|| async { Ok(Arc::new("fast") as AnyData) }.boxed());

    let first = store.force_fetch(&key, slow, Duration::ZERO);
    let second = store.force_fetch(&key, fast, Duration::ZERO);
    second.await;
    first.await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    let entry = store.get::<&str>(&key).expect("entry");
    assert_eq!(entry.data.as_deref(), Some(&"fast"));
    assert_eq!(entry.status, FetchStatus::Success);
  }

  #[tokio::test]
  async fn test_resolution_with_old_generation_is_ignored() {
    let store = CacheStore::new();
    let key = cache_key!["k"];
    store.set(CacheEntry::with_data(key.clone(), 1u32, Duration::ZERO));
    let fetcher: ErasedFetcher = Arc::new(|| async { Ok(Arc::new(2u32) as AnyData) }.boxed());

    store.force_fetch(&key, fetcher, Duration::ZERO).await;
    store.resolve(&key, 0, Ok(Arc::new(99u32) as AnyData));

    let entry = store.get::<u32>(&key).expect("entry");
    assert_eq!(entry.data.as_deref(), Some(&2));
  }

  #[tokio::test]
  async fn test_cancel_restores_previous_status() {
    let store = CacheStore::new();
    let key = cache_key!["k"];
    store.set(CacheEntry::with_data(key.clone(), 1u32, Duration::ZERO));
    let counter = Arc::new(AtomicU32::new(10));
    let pending = store.force_fetch(
      &key,
      counting_fetcher(counter.clone(), Duration::from_millis(50)),
      Duration::ZERO,
    );
    assert_eq!(
      store.get::<u32>(&key).expect("entry").status,
      FetchStatus::Loading
    );

    assert!(store.cancel(&key));
    pending.await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    let entry = store.get::<u32>(&key).expect("entry");
    assert_eq!(entry.status, FetchStatus::Success);
    assert_eq!(entry.data.as_deref(), Some(&1));
    assert_eq!(counter.load(Ordering::SeqCst), 10);
  }

  #[tokio::test]
  async fn test_failure_keeps_previous_data() {
    let store = CacheStore::new();
    let key = cache_key!["k"];
    store.set(CacheEntry::with_data(key.clone(), 5u32, Duration::ZERO));
    let failing: ErasedFetcher =
      Arc::new(|| async { Err(ApiError::Network("connection reset".to_string())) }.boxed());

    store
      .fetch_if_needed(&key, failing, Duration::ZERO)
      .expect("stale entry refetches")
      .await;

    let entry = store.get::<u32>(&key).expect("entry");
    assert_eq!(entry.status, FetchStatus::Error);
    assert_eq!(entry.data.as_deref(), Some(&5));
    assert_eq!(
      entry.error,
      Some(ApiError::Network("connection reset".to_string()))
    );
  }

  #[tokio::test]
  async fn test_last_observer_leaving_cancels_fetch() {
    let store = CacheStore::new();
    let key = cache_key!["k"];
    let counter = Arc::new(AtomicU32::new(0));
    store.attach_observer(&key, None, Duration::ZERO);
    store.attach_observer(&key, None, Duration::ZERO);
    let _pending = store.force_fetch(
      &key,
      counting_fetcher(counter, Duration::from_millis(50)),
      Duration::ZERO,
    );

    store.detach_observer(&key, false);
    assert!(store.is_fetching(&key));
    store.detach_observer(&key, false);
    assert!(!store.is_fetching(&key));
    assert_eq!(store.observer_count(&key), 0);
  }

  #[tokio::test]
  async fn test_awaited_fetch_outlives_last_observer() {
    let store = CacheStore::new();
    let key = cache_key!["k"];
    let counter = Arc::new(AtomicU32::new(0));
    store.attach_observer(&key, None, Duration::ZERO);
    let waiting = store.wait(&key, Duration::ZERO);
    let pending = store.force_fetch(
      &key,
      counting_fetcher(counter.clone(), Duration::from_millis(20)),
      Duration::ZERO,
    );

    store.detach_observer(&key, false);
    assert!(store.is_fetching(&key));
    pending.await;
    drop(waiting);

    let entry = store.get::<u32>(&key).expect("entry");
    assert_eq!(entry.status, FetchStatus::Success);
    assert_eq!(entry.data.as_deref(), Some(&1));
  }

  #[tokio::test]
  async fn test_panicking_fetch_resolves_to_error() {
    let store = CacheStore::new();
    let key = cache_key!["k"];
    store.set(CacheEntry::with_data(key.clone(), 1u32, Duration::ZERO));
    async fn explode() -> Result<AnyData, ApiError> {
      panic!("fetcher blew up")
    }
    let panicking: ErasedFetcher = Arc::new(|| explode().boxed());

    store.force_fetch(&key, panicking, Duration::ZERO).await;

    assert!(!store.is_fetching(&key));
    let entry = store.get::<u32>(&key).expect("entry");
    assert_eq!(entry.status, FetchStatus::Error);
    assert_eq!(entry.data.as_deref(), Some(&1));
    assert!(matches!(entry.error, Some(ApiError::InvalidResponse(_))));
  }
}
