//! Staleness-bounded caching of remote data.
//!
//! This module provides a source-agnostic caching mechanism that:
//! - Serves a slot's last fetched value while it is younger than its TTL
//! - Coalesces concurrent refreshes of the same slot into one fetch
//! - Falls back to the last good value when a fetch fails (offline mode)
//! - Mirrors every successful refresh to a durable key-value store
//! - Refreshes slots periodically in the background

mod error;
mod layer;
mod refresh;
mod storage;
mod traits;

pub use error::{CacheEvent, FetchError, StorageError};
pub use layer::CacheLayer;
pub use refresh::RefreshHandle;
pub use storage::{KeyValueStore, MemoryStore, NoopStore, SqliteStore};
pub use traits::{CacheConfig, CacheEntry, CacheResult, CacheSource, Cacheable, Clock, SystemClock};
