use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};

/// A single expense owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialRecord {
  pub id: u64,
  pub date: NaiveDate,
  pub category: String,
  /// Free text; the backend may send null
  #[serde(default, deserialize_with = "deserialize_null_as_empty")]
  pub description: String,
  pub amount: f64,
  #[serde(rename = "user_id")]
  pub owner_id: u64,
}

impl FinancialRecord {
  /// Calendar month bucket, e.g. "2024-03".
  pub fn month_key(&self) -> String {
    format!("{:04}-{:02}", self.date.year(), self.date.month())
  }
}

fn deserialize_null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  let v: Option<String> = Option::deserialize(deserializer)?;
  Ok(v.unwrap_or_default())
}

/// Spending limit for one calendar month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyBudget {
  pub year: i32,
  pub month: u32,
  pub budget: f64,
  #[serde(rename = "user_id")]
  pub owner_id: u64,
}

impl MonthlyBudget {
  pub fn month_key(&self) -> String {
    format!("{:04}-{:02}", self.year, self.month)
  }
}
