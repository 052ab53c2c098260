use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub market: MarketConfig,
  #[serde(default)]
  pub backend: BackendConfig,
  #[serde(default)]
  pub cache: CacheSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
  pub base_url: String,
  /// Symbols shown in the quotes panel
  #[serde(deserialize_with = "deserialize_uppercase_list")]
  pub quote_symbols: Vec<String>,
  /// Symbols shown in the analyst recommendations table
  #[serde(deserialize_with = "deserialize_uppercase_list")]
  pub recommendation_symbols: Vec<String>,
  pub quote_ttl_secs: u64,
  pub recommendation_ttl_secs: u64,
}

impl Default for MarketConfig {
  fn default() -> Self {
    Self {
      base_url: "https://finnhub.io/api/v1/".to_string(),
      quote_symbols: ["AAPL", "MSFT", "AMZN", "SPY", "NVDA", "TSLA", "META", "GOOG"]
        .map(String::from)
        .to_vec(),
      recommendation_symbols: ["AAPL", "MSFT", "AMZN", "GOOG", "NVDA", "TSLA", "META"]
        .map(String::from)
        .to_vec(),
      quote_ttl_secs: 15,
      recommendation_ttl_secs: 600,
    }
  }
}

impl MarketConfig {
  pub fn quote_ttl(&self) -> Duration {
    Duration::seconds(self.quote_ttl_secs as i64)
  }

  pub fn recommendation_ttl(&self) -> Duration {
    Duration::seconds(self.recommendation_ttl_secs as i64)
  }

  /// Background refresh periods for (quotes, recommendations).
  ///
  /// Each feed refreshes at its own TTL unless `override_secs` forces one
  /// period for both.
  pub fn refresh_intervals(&self, override_secs: Option<u64>) -> (StdDuration, StdDuration) {
    let secs =
      |ttl_secs: u64| StdDuration::from_secs(override_secs.unwrap_or(ttl_secs).max(1));
    (secs(self.quote_ttl_secs), secs(self.recommendation_ttl_secs))
  }
}

fn deserialize_uppercase_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.trim().to_uppercase()).collect())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
  pub url: String,
  /// Records belonging to other users are dropped before any view is built
  pub owner_id: u64,
}

impl Default for BackendConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:8000/".to_string(),
      owner_id: 1,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
  /// Disable to keep cache slots in memory only
  pub enabled: bool,
  /// SQLite file (defaults to $XDG_DATA_HOME/fintrack/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./fintrack.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fintrack/config.yaml
  ///
  /// Without any file, defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("fintrack.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fintrack").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;

    if config.market.quote_ttl_secs == 0 || config.market.recommendation_ttl_secs == 0 {
      return Err(eyre!("cache TTLs must be at least one second"));
    }

    Ok(config)
  }

  /// Get the Finnhub API token from environment variables.
  ///
  /// Checks FINTRACK_FINNHUB_TOKEN first, then FINNHUB_TOKEN as fallback.
  pub fn get_finnhub_token() -> Result<String> {
    std::env::var("FINTRACK_FINNHUB_TOKEN")
      .or_else(|_| std::env::var("FINNHUB_TOKEN"))
      .map_err(|_| {
        eyre!(
          "Finnhub API token not found. Set FINTRACK_FINNHUB_TOKEN or FINNHUB_TOKEN environment variable."
        )
      })
  }
}
