//! Loading owner-scoped record snapshots from the expense backend or a file.

use chrono::{Datelike, NaiveDate};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};
use url::Url;

use super::aggregate::recent_months;
use super::sort::{sort, SortKey, SortSpec};
use super::types::{FinancialRecord, MonthlyBudget};

/// Records and budgets as handed to the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordSnapshot {
  pub expenses: Vec<FinancialRecord>,
  #[serde(default)]
  pub budgets: Vec<MonthlyBudget>,
}

impl RecordSnapshot {
  /// Read a snapshot from a JSON file shaped like the backend's `/expenses/` response.
  pub fn load(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read records file {}: {}", path.display(), e))?;

    serde_json::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse records file {}: {}", path.display(), e))
  }

  /// Keep only `owner_id`'s records and budgets, records newest first.
  pub fn scoped_to(self, owner_id: u64) -> Self {
    Self {
      expenses: scope_to_owner(self.expenses, owner_id),
      budgets: self
        .budgets
        .into_iter()
        .filter(|b| b.owner_id == owner_id)
        .collect(),
    }
  }
}

/// Restrict records to one owner and order them newest date first.
///
/// Records with a non-finite amount are dropped.
pub fn scope_to_owner(records: Vec<FinancialRecord>, owner_id: u64) -> Vec<FinancialRecord> {
  let owned: Vec<FinancialRecord> = records
    .into_iter()
    .filter(|r| r.owner_id == owner_id)
    .filter(|r| {
      let finite = r.amount.is_finite();
      if !finite {
        warn!(id = r.id, "dropping record with non-finite amount");
      }
      finite
    })
    .collect();

  sort(&owned, SortSpec::descending(SortKey::Date))
    .into_iter()
    .cloned()
    .collect()
}

/// Client for the expense backend.
#[derive(Clone)]
pub struct BackendClient {
  http: reqwest::Client,
  base_url: Url,
}

impl BackendClient {
  pub fn new(base_url: &str) -> Result<Self> {
    let base_url = crate::market::parse_base_url(base_url)
      .map_err(|e| eyre!("Invalid backend URL {}: {}", base_url, e))?;

    Ok(Self {
      http: reqwest::Client::new(),
      base_url,
    })
  }

  /// Fetch every expense and scope it to `owner_id`.
  pub async fn expenses_for(&self, owner_id: u64) -> Result<Vec<FinancialRecord>> {
    let url = self
      .base_url
      .join("expenses/")
      .map_err(|e| eyre!("Failed to build expenses URL: {}", e))?;

    debug!(%url, "fetching expenses");
    let response = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch expenses: {}", e))?
      .error_for_status()
      .map_err(|e| eyre!("Expense backend returned an error: {}", e))?;

    let snapshot: RecordSnapshot = response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse expenses: {}", e))?;

    Ok(scope_to_owner(snapshot.expenses, owner_id))
  }

  /// Fetch `owner_id`'s budget for one month. `None` when no budget was set.
  pub async fn budget_for(
    &self,
    owner_id: u64,
    year: i32,
    month: u32,
  ) -> Result<Option<MonthlyBudget>> {
    let mut url = self
      .base_url
      .join("budget/status/")
      .map_err(|e| eyre!("Failed to build budget URL: {}", e))?;
    url
      .query_pairs_mut()
      .append_pair("year", &year.to_string())
      .append_pair("month", &month.to_string())
      .append_pair("user_id", &owner_id.to_string());

    debug!(%url, "fetching budget status");
    let response = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch budget for {}-{:02}: {}", year, month, e))?;

    // The backend answers 404 for months without a budget
    if response.status() == reqwest::StatusCode::NOT_FOUND {
      return Ok(None);
    }

    let status: ApiBudgetStatus = response
      .error_for_status()
      .map_err(|e| eyre!("Expense backend returned an error: {}", e))?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse budget status: {}", e))?;

    Ok(Some(MonthlyBudget {
      year: status.year,
      month: status.month,
      budget: status.monthly_budget,
      owner_id,
    }))
  }

  /// Budgets for the last `months` calendar months, newest first. Months
  /// without a budget are left out.
  pub async fn budgets_for(
    &self,
    owner_id: u64,
    today: NaiveDate,
    months: u32,
  ) -> Result<Vec<MonthlyBudget>> {
    let mut budgets = Vec::new();
    for start in recent_months(today, months) {
      if let Some(budget) = self.budget_for(owner_id, start.year(), start.month()).await? {
        budgets.push(budget);
      }
    }
    Ok(budgets)
  }
}

/// `/budget/status/` response
#[derive(Debug, Deserialize)]
struct ApiBudgetStatus {
  year: i32,
  month: u32,
  monthly_budget: f64,
}
