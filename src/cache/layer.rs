//! Cache layer that orchestrates staleness checks, request coalescing and
//! persistence around an opaque fetch operation.

use color_eyre::eyre::eyre;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::error::{CacheEvent, FetchError, StorageError};
use super::storage::KeyValueStore;
use super::traits::{CacheConfig, CacheEntry, CacheResult, Cacheable, Clock, SystemClock};

type InFlight<T> = Shared<BoxFuture<'static, Result<CacheEntry<T>, FetchError>>>;

/// Per-key state: the last good entry and the refresh currently running, if any.
struct Slot<T> {
  entry: Option<CacheEntry<T>>,
  in_flight: Option<InFlight<T>>,
}

struct Inner<T, S> {
  storage: S,
  clock: Arc<dyn Clock>,
  slots: Mutex<HashMap<String, Slot<T>>>,
  events: broadcast::Sender<CacheEvent>,
}

/// Cache layer that manages caching logic and network fetching.
///
/// One layer can hold any number of slots of the same payload type. Each slot
/// is described by a [`CacheConfig`] that carries its key, TTL and fetcher.
/// The layer keeps at most one fetch per key in flight; every caller that
/// needs a refresh while one is running awaits that same fetch.
pub struct CacheLayer<T, S: KeyValueStore> {
  inner: Arc<Inner<T, S>>,
}

impl<T: Cacheable, S: KeyValueStore + 'static> CacheLayer<T, S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self::with_clock(storage, Arc::new(SystemClock))
  }

  /// Create a cache layer that reads time from `clock`.
  pub fn with_clock(storage: S, clock: Arc<dyn Clock>) -> Self {
    let (events, _) = broadcast::channel(64);
    Self {
      inner: Arc::new(Inner {
        storage,
        clock,
        slots: Mutex::new(HashMap::new()),
        events,
      }),
    }
  }

  /// Subscribe to refresh and storage diagnostics.
  pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
    self.inner.events.subscribe()
  }

  /// Return the current entry for `key` without fetching.
  pub fn peek(&self, key: &str) -> Option<CacheEntry<T>> {
    let mut slots = self.inner.lock_slots();
    self.inner.slot_mut(&mut slots, key).entry.clone()
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Fresh entry: return it immediately
  /// 2. Missing or stale: join the in-flight refresh or start one
  /// 3. On fetch failure, return the stale entry (offline mode)
  /// 4. With nothing cached, the fetch error is returned
  pub async fn get(&self, config: &CacheConfig<T>) -> Result<CacheResult<T>, FetchError> {
    let refresh = {
      let now = self.inner.clock.now();
      let mut slots = self.inner.lock_slots();
      let slot = self.inner.slot_mut(&mut slots, config.key());

      if let Some(entry) = &slot.entry {
        if !entry.is_stale(now, config.ttl()) {
          debug!(key = config.key(), "cache hit");
          return Ok(CacheResult::from_cache(entry.clone()));
        }
      }

      self.inner.join_or_start(slot, config)
    };

    self.settle(config.key(), refresh.await)
  }

  /// Fetch regardless of freshness, with the same stale fallback as [`get`](Self::get).
  pub async fn force_refresh(&self, config: &CacheConfig<T>) -> Result<CacheResult<T>, FetchError> {
    let refresh = {
      let mut slots = self.inner.lock_slots();
      let slot = self.inner.slot_mut(&mut slots, config.key());
      self.inner.join_or_start(slot, config)
    };

    self.settle(config.key(), refresh.await)
  }

  fn settle(
    &self,
    key: &str,
    outcome: Result<CacheEntry<T>, FetchError>,
  ) -> Result<CacheResult<T>, FetchError> {
    match outcome {
      Ok(entry) => Ok(CacheResult::from_network(entry)),
      Err(error) => {
        let mut slots = self.inner.lock_slots();
        match self.inner.slot_mut(&mut slots, key).entry.clone() {
          Some(stale) => Ok(CacheResult::offline(stale)),
          None => Err(error),
        }
      }
    }
  }
}

impl<T: Cacheable, S: KeyValueStore + 'static> Inner<T, S> {
  fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, Slot<T>>> {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Get the slot for `key`, rehydrating it from storage on first access.
  fn slot_mut<'a>(
    &self,
    slots: &'a mut HashMap<String, Slot<T>>,
    key: &str,
  ) -> &'a mut Slot<T> {
    slots.entry(key.to_string()).or_insert_with(|| Slot {
      entry: self.rehydrate(key),
      in_flight: None,
    })
  }

  fn rehydrate(&self, key: &str) -> Option<CacheEntry<T>> {
    let blob = match self.storage.get(key) {
      Ok(Some(blob)) => blob,
      Ok(None) => return None,
      Err(e) => {
        self.storage_failed(key, e.to_string());
        return None;
      }
    };

    match serde_json::from_str::<CacheEntry<T>>(&blob) {
      Ok(entry) => {
        debug!(key, fetched_at = %entry.fetched_at, "rehydrated cache slot");
        let _ = self.events.send(CacheEvent::Rehydrated {
          key: key.to_string(),
          fetched_at: entry.fetched_at,
        });
        Some(entry)
      }
      Err(e) => {
        self.storage_failed(key, format!("corrupt entry: {}", e));
        None
      }
    }
  }

  fn join_or_start(
    self: &Arc<Self>,
    slot: &mut Slot<T>,
    config: &CacheConfig<T>,
  ) -> InFlight<T> {
    if let Some(in_flight) = &slot.in_flight {
      debug!(key = config.key(), "joining in-flight refresh");
      return in_flight.clone();
    }

    let inner = Arc::clone(self);
    let config = config.clone();
    let refresh = async move {
      // A panicking fetcher must still clear the in-flight slot
      let result = match AssertUnwindSafe(async { config.fetch().await })
        .catch_unwind()
        .await
      {
        Ok(result) => result,
        Err(panic) => Err(eyre!("fetch panicked: {}", panic_message(panic.as_ref()))),
      };
      inner.complete(config.key(), result)
    }
    .boxed()
    .shared();

    slot.in_flight = Some(refresh.clone());
    refresh
  }

  /// Record the outcome of a fetch. Runs exactly once per in-flight refresh.
  fn complete(
    &self,
    key: &str,
    result: color_eyre::Result<T>,
  ) -> Result<CacheEntry<T>, FetchError> {
    match result {
      Ok(payload) => {
        let entry = CacheEntry::new(payload, self.clock.now());
        {
          let mut slots = self.lock_slots();
          let slot = self.slot_mut(&mut slots, key);
          slot.entry = Some(entry.clone());
          slot.in_flight = None;
          // Written before the lock is released so a later refresh cannot be overwritten
          self.persist(key, &entry);
        }

        info!(key, fetched_at = %entry.fetched_at, "cache slot refreshed");
        let _ = self.events.send(CacheEvent::Refreshed {
          key: key.to_string(),
          fetched_at: entry.fetched_at,
        });
        Ok(entry)
      }
      Err(e) => {
        let serving_stale = {
          let mut slots = self.lock_slots();
          let slot = self.slot_mut(&mut slots, key);
          slot.in_flight = None;
          slot.entry.is_some()
        };

        let error = FetchError {
          key: key.to_string(),
          message: e.to_string(),
        };
        if serving_stale {
          warn!(key, error = %error, "refresh failed, serving stale value");
        } else {
          warn!(key, error = %error, "refresh failed with nothing cached");
        }
        let _ = self.events.send(CacheEvent::RefreshFailed {
          error: error.clone(),
          serving_stale,
        });
        Err(error)
      }
    }
  }

  fn persist(&self, key: &str, entry: &CacheEntry<T>) {
    let blob = match serde_json::to_string(entry) {
      Ok(blob) => blob,
      Err(e) => {
        self.storage_failed(key, format!("failed to serialize entry: {}", e));
        return;
      }
    };

    if let Err(e) = self.storage.set(key, &blob) {
      self.storage_failed(key, e.to_string());
    }
  }

  fn storage_failed(&self, key: &str, message: String) {
    let error = StorageError {
      key: key.to_string(),
      message,
    };
    warn!(error = %error, "cache storage failure, continuing without it");
    let _ = self.events.send(CacheEvent::StorageFailed(error));
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
  if let Some(message) = panic.downcast_ref::<&str>() {
    *message
  } else if let Some(message) = panic.downcast_ref::<String>() {
    message.as_str()
  } else {
    "unknown panic"
  }
}

impl<T, S: KeyValueStore> Clone for CacheLayer<T, S> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{MemoryStore, NoopStore};
  use crate::cache::traits::{CacheSource, ManualClock};
  use chrono::{DateTime, Duration, Utc};
  use std::sync::atomic::{AtomicUsize, Ordering};

  /// Config whose fetcher returns the next value from `values` and counts calls.
  fn counting_config(
    ttl_ms: i64,
    values: Vec<&'static str>,
    calls: Arc<AtomicUsize>,
  ) -> CacheConfig<String> {
    CacheConfig::new("quotes", Duration::milliseconds(ttl_ms), move || {
      let n = calls.fetch_add(1, Ordering::SeqCst);
      let value = values.get(n).copied();
      async move {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        value
          .map(String::from)
          .ok_or_else(|| eyre!("no more values"))
      }
    })
    .unwrap()
  }

  fn failing_config(calls: Arc<AtomicUsize>) -> CacheConfig<String> {
    CacheConfig::new("quotes", Duration::milliseconds(1_000), move || {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err(eyre!("connection refused")) }
    })
    .unwrap()
  }

  #[tokio::test]
  async fn test_ttl_scenario() {
    let clock = ManualClock::at_epoch();
    let cache = CacheLayer::with_clock(MemoryStore::new(), clock.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let config = counting_config(10_000, vec!["A", "B"], calls.clone());

    clock.set_millis(0);
    let first = cache.get(&config).await.unwrap();
    assert_eq!(first.data, "A");
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    clock.set_millis(5_000);
    let second = cache.get(&config).await.unwrap();
    assert_eq!(second.data, "A");
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    clock.set_millis(10_000);
    let third = cache.get(&config).await.unwrap();
    assert_eq!(third.data, "B");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    clock.set_millis(10_001);
    let fourth = cache.get(&config).await.unwrap();
    assert_eq!(fourth.data, "B");
    assert_eq!(fourth.source, CacheSource::CacheFresh);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_concurrent_cold_gets_share_one_fetch() {
    let cache = CacheLayer::new(NoopStore);
    let calls = Arc::new(AtomicUsize::new(0));
    let config = counting_config(10_000, vec!["A", "B"], calls.clone());

    let results = futures::future::join_all((0..8).map(|_| cache.get(&config))).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
      assert_eq!(result.unwrap().data, "A");
    }
  }

  #[tokio::test]
  async fn test_concurrent_gets_at_boundary_share_one_fetch() {
    let clock = ManualClock::at_epoch();
    let cache = CacheLayer::with_clock(NoopStore, clock.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let config = counting_config(10_000, vec!["A", "B", "C"], calls.clone());

    cache.get(&config).await.unwrap();
    clock.set_millis(10_000);

    let results = futures::future::join_all((0..5).map(|_| cache.get(&config))).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    for result in results {
      assert_eq!(result.unwrap().data, "B");
    }
  }

  #[tokio::test]
  async fn test_force_refresh_joins_in_flight_get() {
    let cache = CacheLayer::new(NoopStore);
    let calls = Arc::new(AtomicUsize::new(0));
    let config = counting_config(10_000, vec!["A", "B"], calls.clone());

    let (a, b) = tokio::join!(cache.get(&config), cache.force_refresh(&config));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.unwrap().data, "A");
    assert_eq!(b.unwrap().data, "A");
  }

  #[tokio::test]
  async fn test_force_refresh_ignores_freshness() {
    let cache = CacheLayer::new(NoopStore);
    let calls = Arc::new(AtomicUsize::new(0));
    let config = counting_config(60_000, vec!["A", "B"], calls.clone());

    assert_eq!(cache.get(&config).await.unwrap().data, "A");
    assert_eq!(cache.force_refresh(&config).await.unwrap().data, "B");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_failure_with_prior_entry_serves_stale() {
    let clock = ManualClock::at_epoch();
    let cache = CacheLayer::with_clock(MemoryStore::new(), clock.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    // Only one value: the second fetch fails
    let config = counting_config(1_000, vec!["A"], calls.clone());
    let mut events = cache.subscribe();

    cache.get(&config).await.unwrap();
    clock.set_millis(2_000);

    let result = cache.get(&config).await.unwrap();
    assert_eq!(result.data, "A");
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.fetched_at, DateTime::<Utc>::UNIX_EPOCH);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Entry untouched by the failure
    let entry = cache.peek("quotes").unwrap();
    assert_eq!(entry.payload, "A");

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
      if let CacheEvent::RefreshFailed { serving_stale, .. } = event {
        assert!(serving_stale);
        saw_failure = true;
      }
    }
    assert!(saw_failure, "failure should be reported on the diagnostic channel");
  }

  #[tokio::test]
  async fn test_cold_start_failure_is_fetch_error() {
    let cache: CacheLayer<String, _> = CacheLayer::new(NoopStore);
    let calls = Arc::new(AtomicUsize::new(0));
    let config = failing_config(calls.clone());

    let err = cache.get(&config).await.unwrap_err();
    assert_eq!(err.key, "quotes");
    assert!(err.message.contains("connection refused"));

    let err = cache.force_refresh(&config).await.unwrap_err();
    assert_eq!(err.key, "quotes");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_rehydrates_fresh_entry_without_fetching() {
    let clock = ManualClock::at_epoch();
    let store = MemoryStore::new();
    let persisted = CacheEntry::new("persisted".to_string(), clock.now());
    store
      .set("quotes", &serde_json::to_string(&persisted).unwrap())
      .unwrap();

    let cache = CacheLayer::with_clock(store, clock.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let config = counting_config(10_000, vec!["A"], calls.clone());

    clock.set_millis(9_000);
    let result = cache.get(&config).await.unwrap();
    assert_eq!(result.data, "persisted");
    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    clock.set_millis(10_000);
    assert_eq!(cache.get(&config).await.unwrap().data, "A");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_successful_refresh_is_persisted() {
    let store = Arc::new(MemoryStore::new());
    let cache = CacheLayer::new(store.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let config = counting_config(10_000, vec!["A"], calls);

    cache.get(&config).await.unwrap();

    let blob = store.get("quotes").unwrap().expect("entry should be persisted");
    let entry: CacheEntry<String> = serde_json::from_str(&blob).unwrap();
    assert_eq!(entry.payload, "A");
  }

  #[tokio::test]
  async fn test_corrupt_persisted_entry_is_ignored() {
    let store = MemoryStore::new();
    store.set("quotes", "not json").unwrap();

    let cache = CacheLayer::new(store);
    let calls = Arc::new(AtomicUsize::new(0));
    let config = counting_config(10_000, vec!["A"], calls.clone());

    assert_eq!(cache.get(&config).await.unwrap().data, "A");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_unavailable_storage_falls_back_to_fetch() {
    let cache = CacheLayer::new(BrokenStore);
    let calls = Arc::new(AtomicUsize::new(0));
    let config = counting_config(10_000, vec!["A"], calls.clone());
    let mut events = cache.subscribe();

    assert_eq!(cache.get(&config).await.unwrap().data, "A");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(events.try_recv(), Ok(CacheEvent::StorageFailed(_))));
  }

  #[tokio::test]
  async fn test_panicking_fetch_does_not_wedge_slot() {
    let cache = CacheLayer::new(NoopStore);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let config = CacheConfig::new("quotes", Duration::seconds(10), move || {
      let n = counter.fetch_add(1, Ordering::SeqCst);
      async move {
        if n == 0 {
          panic!("provider returned garbage");
        }
        Ok("A".to_string())
      }
    })
    .unwrap();
    let mut events = cache.subscribe();

    let err = cache.get(&config).await.unwrap_err();
    assert!(err.message.contains("provider returned garbage"));
    assert!(matches!(
      events.try_recv(),
      Ok(CacheEvent::RefreshFailed {
        serving_stale: false,
        ..
      })
    ));

    // The next call starts a new fetch instead of rejoining the panicked one
    assert_eq!(cache.get(&config).await.unwrap().data, "A");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_persisted_blob_follows_latest_refresh() {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::at_epoch();
    let cache = CacheLayer::with_clock(store.clone(), clock.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let config = counting_config(10_000, vec!["A", "B"], calls);

    cache.force_refresh(&config).await.unwrap();
    clock.set_millis(1_000);
    cache.force_refresh(&config).await.unwrap();

    let blob = store.get("quotes").unwrap().unwrap();
    let entry: CacheEntry<String> = serde_json::from_str(&blob).unwrap();
    assert_eq!(entry.payload, "B");
    assert_eq!(entry.fetched_at, cache.peek("quotes").unwrap().fetched_at);
  }

  struct BrokenStore;

  impl KeyValueStore for BrokenStore {
    fn get(&self, _key: &str) -> color_eyre::Result<Option<String>> {
      Err(eyre!("disk unavailable"))
    }

    fn set(&self, _key: &str, _value: &str) -> color_eyre::Result<()> {
      Err(eyre!("disk unavailable"))
    }
  }
}
