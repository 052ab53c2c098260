use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use super::types::{ApiQuote, ApiRecommendation, Quote, Recommendation};

/// Finnhub API client wrapper
#[derive(Clone)]
pub struct FinnhubClient {
  http: reqwest::Client,
  base_url: Url,
  token: String,
}

impl FinnhubClient {
  pub fn new(base_url: &str, token: String) -> Result<Self> {
    let base_url = parse_base_url(base_url)
      .map_err(|e| eyre!("Invalid market data URL {}: {}", base_url, e))?;

    Ok(Self {
      http: reqwest::Client::new(),
      base_url,
      token,
    })
  }

  async fn get_json<T: DeserializeOwned>(&self, endpoint: &str, symbol: &str) -> Result<T> {
    let mut url = self
      .base_url
      .join(endpoint)
      .map_err(|e| eyre!("Failed to build URL for {}: {}", endpoint, e))?;
    url
      .query_pairs_mut()
      .append_pair("symbol", symbol)
      .append_pair("token", &self.token);

    debug!(endpoint, symbol, "requesting market data");
    let response = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Request for {} failed: {}", symbol, e))?
      .error_for_status()
      .map_err(|e| eyre!("Market data for {} unavailable: {}", symbol, e))?;

    response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse market data for {}: {}", symbol, e))
  }

  /// Get the latest quote for one symbol
  pub async fn quote(&self, symbol: &str) -> Result<Quote> {
    let api: ApiQuote = self.get_json("quote", symbol).await?;
    Ok(api.into_quote(symbol))
  }

  /// Get quotes for all symbols concurrently. Any failure fails the batch.
  pub async fn quotes(&self, symbols: &[String]) -> Result<Vec<Quote>> {
    try_join_all(symbols.iter().map(|s| self.quote(s))).await
  }

  /// Get the most recent analyst recommendation for one symbol
  pub async fn recommendation(&self, symbol: &str) -> Result<Recommendation> {
    let periods: Vec<ApiRecommendation> = self.get_json("stock/recommendation", symbol).await?;

    // Newest period comes first
    Ok(match periods.into_iter().next() {
      Some(latest) => latest.into_recommendation(symbol),
      None => Recommendation::empty(symbol),
    })
  }

  /// Get recommendations one symbol at a time.
  ///
  /// A symbol that fails is skipped; the batch only fails when every symbol does.
  pub async fn recommendations(&self, symbols: &[String]) -> Result<Vec<Recommendation>> {
    let mut results = Vec::with_capacity(symbols.len());
    let mut last_error = None;

    for symbol in symbols {
      match self.recommendation(symbol).await {
        Ok(rec) => results.push(rec),
        Err(e) => {
          warn!(symbol = %symbol, error = %e, "skipping recommendation");
          last_error = Some(e);
        }
      }
    }

    match last_error {
      Some(e) if results.is_empty() => Err(e),
      _ => Ok(results),
    }
  }
}

/// Parse a base URL so that relative endpoints join under its path.
pub(crate) fn parse_base_url(raw: &str) -> std::result::Result<Url, url::ParseError> {
  if raw.ends_with('/') {
    Url::parse(raw)
  } else {
    Url::parse(&format!("{}/", raw))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_new_rejects_bad_url() {
    assert!(FinnhubClient::new("::not a url", "token".to_string()).is_err());
  }

  #[test]
  fn test_base_url_gets_trailing_slash() {
    let url = parse_base_url("https://finnhub.io/api/v1").unwrap();
    assert_eq!(url.join("quote").unwrap().as_str(), "https://finnhub.io/api/v1/quote");
  }

  #[tokio::test]
  async fn test_empty_symbol_lists() {
    let client = FinnhubClient::new("http://127.0.0.1:9/api/v1/", "token".to_string()).unwrap();
    assert!(client.quotes(&[]).await.unwrap().is_empty());
    assert!(client.recommendations(&[]).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_unreachable_provider_fails() {
    // Port 9 (discard) is not served; the connection is refused
    let client = FinnhubClient::new("http://127.0.0.1:9/api/v1/", "token".to_string()).unwrap();
    assert!(client.quotes(&["AAPL".to_string()]).await.is_err());
    assert!(client.recommendations(&["AAPL".to_string()]).await.is_err());
  }
}
