use serde::{Deserialize, Serialize};

/// Latest price for a tracked symbol, with the move since the previous close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
  pub symbol: String,
  pub price: Option<f64>,
  pub change_value: Option<f64>,
  pub change_percent: Option<f64>,
}

/// Analyst rating counts for the most recent reporting period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
  pub symbol: String,
  /// Reporting period, "N/A" when the provider had no data
  pub period: String,
  pub strong_buy: u32,
  pub buy: u32,
  pub hold: u32,
  pub sell: u32,
  pub strong_sell: u32,
}

impl Recommendation {
  pub fn empty(symbol: &str) -> Self {
    Self {
      symbol: symbol.to_string(),
      period: "N/A".to_string(),
      strong_buy: 0,
      buy: 0,
      hold: 0,
      sell: 0,
      strong_sell: 0,
    }
  }
}

/// `/quote` response. Zero means "no data" for both prices.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiQuote {
  #[serde(default)]
  pub c: Option<f64>,
  #[serde(default)]
  pub pc: Option<f64>,
}

impl ApiQuote {
  pub fn into_quote(self, symbol: &str) -> Quote {
    let current = self.c.filter(|c| *c != 0.0);
    let previous = self.pc.filter(|pc| *pc != 0.0);

    let (change_value, change_percent) = match (current, previous) {
      (Some(c), Some(pc)) => (Some(c - pc), Some((c - pc) / pc * 100.0)),
      _ => (None, None),
    };

    Quote {
      symbol: symbol.to_string(),
      price: current,
      change_value,
      change_percent,
    }
  }
}

/// One entry of the `/stock/recommendation` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiRecommendation {
  #[serde(default)]
  pub period: Option<String>,
  #[serde(default)]
  pub strong_buy: Option<u32>,
  #[serde(default)]
  pub buy: Option<u32>,
  #[serde(default)]
  pub hold: Option<u32>,
  #[serde(default)]
  pub sell: Option<u32>,
  #[serde(default)]
  pub strong_sell: Option<u32>,
}

impl ApiRecommendation {
  pub fn into_recommendation(self, symbol: &str) -> Recommendation {
    Recommendation {
      symbol: symbol.to_string(),
      period: self.period.unwrap_or_else(|| "N/A".to_string()),
      strong_buy: self.strong_buy.unwrap_or(0),
      buy: self.buy.unwrap_or(0),
      hold: self.hold.unwrap_or(0),
      sell: self.sell.unwrap_or(0),
      strong_sell: self.strong_sell.unwrap_or(0),
    }
  }
}
