//! Market data feeds backed by the cache layer.
//!
//! Quotes and analyst recommendations share one caching discipline and differ
//! only in slot key, TTL and fetch function.

mod client;
mod types;

pub use client::FinnhubClient;
pub(crate) use client::parse_base_url;
pub use types::{Quote, Recommendation};

use chrono::Duration;
use color_eyre::Result;
use std::sync::Arc;

use crate::cache::CacheConfig;

pub const QUOTES_KEY: &str = "quotes";
pub const RECOMMENDATIONS_KEY: &str = "analyst_recommendations";

/// Cache slot for quotes of `symbols`.
pub fn quotes_config(
  client: FinnhubClient,
  symbols: Vec<String>,
  ttl: Duration,
) -> Result<CacheConfig<Vec<Quote>>> {
  let symbols = Arc::new(symbols);
  CacheConfig::new(QUOTES_KEY, ttl, move || {
    let client = client.clone();
    let symbols = Arc::clone(&symbols);
    async move { client.quotes(&symbols).await }
  })
}

/// Cache slot for analyst recommendations of `symbols`.
pub fn recommendations_config(
  client: FinnhubClient,
  symbols: Vec<String>,
  ttl: Duration,
) -> Result<CacheConfig<Vec<Recommendation>>> {
  let symbols = Arc::new(symbols);
  CacheConfig::new(RECOMMENDATIONS_KEY, ttl, move || {
    let client = client.clone();
    let symbols = Arc::clone(&symbols);
    async move { client.recommendations(&symbols).await }
  })
}
