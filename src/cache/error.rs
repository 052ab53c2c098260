//! Errors and diagnostics surfaced by the cache.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A remote fetch failed and there was no cached value to fall back to.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("fetch for cache slot '{key}' failed: {message}")]
pub struct FetchError {
  pub key: String,
  pub message: String,
}

/// The persisted store could not be read or written.
///
/// Never returned to callers; the cache behaves as if nothing was persisted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cache storage for slot '{key}' unavailable: {message}")]
pub struct StorageError {
  pub key: String,
  pub message: String,
}

/// Diagnostic events published by a cache layer.
#[derive(Debug, Clone)]
pub enum CacheEvent {
  /// A fetch succeeded and the entry was replaced
  Refreshed {
    key: String,
    fetched_at: DateTime<Utc>,
  },
  /// A fetch failed; `serving_stale` tells whether a previous value survives
  RefreshFailed {
    error: FetchError,
    serving_stale: bool,
  },
  /// An entry was loaded from the persisted store
  Rehydrated {
    key: String,
    fetched_at: DateTime<Utc>,
  },
  /// The persisted store failed
  StorageFailed(StorageError),
}
