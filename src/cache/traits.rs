//! Core traits and types for the caching system.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// Payloads that can be held by the cache.
///
/// The cache treats payloads as opaque; it only needs to clone them out to
/// concurrent waiters and serialize them into the persisted slot.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Cacheable for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Last successfully fetched value together with the time it was fetched.
///
/// Both fields are always replaced together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub payload: T,
  pub fetched_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
  pub fn new(payload: T, fetched_at: DateTime<Utc>) -> Self {
    Self {
      payload,
      fetched_at,
    }
  }

  /// An entry is stale once its age reaches the TTL; the boundary counts as stale.
  pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
    now - self.fetched_at >= ttl
  }
}

/// Factory producing one fetch attempt per call.
pub type Fetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Describes one cached slot: where it is persisted, how long it stays
/// fresh, and how to fetch a new value.
pub struct CacheConfig<T> {
  key: String,
  ttl: Duration,
  fetcher: Fetcher<T>,
}

impl<T> CacheConfig<T> {
  /// Create a config for the given slot key. The TTL must be positive.
  pub fn new<F, Fut>(key: impl Into<String>, ttl: Duration, fetcher: F) -> Result<Self>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let key = key.into();
    if ttl <= Duration::zero() {
      return Err(eyre!("TTL for cache slot '{}' must be positive", key));
    }

    Ok(Self {
      key,
      ttl,
      fetcher: Arc::new(move || -> BoxFuture<'static, Result<T>> { Box::pin(fetcher()) }),
    })
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  pub(crate) fn fetch(&self) -> BoxFuture<'static, Result<T>> {
    (self.fetcher)()
  }
}

impl<T> Clone for CacheConfig<T> {
  fn clone(&self) -> Self {
    Self {
      key: self.key.clone(),
      ttl: self.ttl,
      fetcher: Arc::clone(&self.fetcher),
    }
  }
}

impl<T> std::fmt::Debug for CacheConfig<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheConfig")
      .field("key", &self.key)
      .field("ttl", &self.ttl)
      .finish_non_exhaustive()
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was fetched from the remote source
  pub fetched_at: DateTime<Utc>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(entry: CacheEntry<T>) -> Self {
    Self {
      data: entry.payload,
      source: CacheSource::Network,
      fetched_at: entry.fetched_at,
    }
  }

  /// Create a new cache result from cached data that is still within its TTL.
  pub fn from_cache(entry: CacheEntry<T>) -> Self {
    Self {
      data: entry.payload,
      source: CacheSource::CacheFresh,
      fetched_at: entry.fetched_at,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(entry: CacheEntry<T>) -> Self {
    Self {
      data: entry.payload,
      source: CacheSource::Offline,
      fetched_at: entry.fetched_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Refresh failed, serving the last good value
  Offline,
}

/// Source of wall-clock time for staleness checks.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Clock that only moves when told to.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct ManualClock {
  now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
  pub(crate) fn at_epoch() -> Arc<Self> {
    Arc::new(Self {
      now: std::sync::Mutex::new(DateTime::<Utc>::UNIX_EPOCH),
    })
  }

  /// Move to `millis` after the epoch.
  pub(crate) fn set_millis(&self, millis: i64) {
    let mut now = self.now.lock().unwrap();
    *now = DateTime::<Utc>::UNIX_EPOCH + Duration::milliseconds(millis);
  }
}

#[cfg(test)]
impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_boundary_counts_as_stale() {
    let entry = CacheEntry::new(1, DateTime::<Utc>::UNIX_EPOCH);
    let ttl = Duration::milliseconds(10_000);

    let before = DateTime::<Utc>::UNIX_EPOCH + Duration::milliseconds(9_999);
    let at = DateTime::<Utc>::UNIX_EPOCH + Duration::milliseconds(10_000);

    assert!(!entry.is_stale(before, ttl));
    assert!(entry.is_stale(at, ttl));
  }

  #[test]
  fn test_config_rejects_non_positive_ttl() {
    let zero = CacheConfig::new("quotes", Duration::zero(), || async { Ok(1) });
    assert!(zero.is_err());

    let negative = CacheConfig::new("quotes", Duration::seconds(-5), || async { Ok(1) });
    assert!(negative.is_err());
  }

  #[test]
  fn test_entry_serializes_payload_and_timestamp() {
    let entry = CacheEntry::new(vec!["AAPL".to_string()], DateTime::<Utc>::UNIX_EPOCH);
    let json = serde_json::to_string(&entry).unwrap();
    assert!(json.contains("\"payload\""));
    assert!(json.contains("\"fetched_at\""));

    let back: CacheEntry<Vec<String>> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, entry);
  }
}
