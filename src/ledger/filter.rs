//! Multi-criteria record filtering with staged (pending) and applied criteria.
//!
//! Malformed bounds never fail a filter. A non-numeric or non-finite amount
//! bound is treated as absent, and an inverted range (start after end, min
//! above max) imposes no restriction at all. [`FilterCriteria::issues`]
//! reports what was ignored so callers can surface it.
//!
//! An empty category set means "all categories", not "none".

use chrono::NaiveDate;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

use super::types::FinancialRecord;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DateRange {
  pub start: Option<NaiveDate>,
  pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AmountRange {
  pub min: Option<f64>,
  pub max: Option<f64>,
}

/// Bounds that were ignored while filtering
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
  #[error("{field} amount bound '{raw}' is not a number")]
  NonNumericAmount { field: &'static str, raw: String },
  #[error("{field} amount bound is not finite")]
  NonFiniteAmount { field: &'static str },
  #[error("{field} date '{raw}' is not a YYYY-MM-DD date")]
  InvalidDate { field: &'static str, raw: String },
  #[error("date range starts {start} after it ends {end}")]
  InvertedDateRange { start: NaiveDate, end: NaiveDate },
  #[error("amount range minimum {min} is above maximum {max}")]
  InvertedAmountRange { min: f64, max: f64 },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterCriteria {
  pub date_range: DateRange,
  /// Empty means no category restriction
  pub categories: BTreeSet<String>,
  pub amount_range: AmountRange,
}

impl FilterCriteria {
  pub fn with_date_range(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
    self.date_range = DateRange { start, end };
    self
  }

  pub fn with_categories<I, S>(mut self, categories: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.categories = categories.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_amount_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
    self.amount_range = AmountRange { min, max };
    self
  }

  /// Add the category if absent, remove it if present.
  pub fn toggle_category(&mut self, category: &str) {
    if !self.categories.remove(category) {
      self.categories.insert(category.to_string());
    }
  }

  /// Clear the category selection, which means "all categories".
  pub fn select_all_categories(&mut self) {
    self.categories.clear();
  }

  /// Set date bounds from form text ("YYYY-MM-DD"). Blank or unparseable text
  /// clears the bound; the returned list names any non-blank text that was discarded.
  pub fn set_date_bounds_from_text(&mut self, start: &str, end: &str) -> Vec<ValidationError> {
    let mut issues = Vec::new();
    self.date_range = DateRange {
      start: text_date("start", start, &mut issues),
      end: text_date("end", end, &mut issues),
    };
    issues
  }

  /// Set amount bounds from form text. Blank or non-numeric text clears the
  /// bound; the returned list names any non-blank text that was discarded.
  pub fn set_amount_bounds_from_text(&mut self, min: &str, max: &str) -> Vec<ValidationError> {
    let mut issues = Vec::new();
    self.amount_range = AmountRange {
      min: text_bound("min", min, &mut issues),
      max: text_bound("max", max, &mut issues),
    };
    issues
  }

  /// List the bounds that will be ignored when filtering.
  pub fn issues(&self) -> Vec<ValidationError> {
    self.effective().1
  }

  /// Whether `record` passes every criterion.
  pub fn matches(&self, record: &FinancialRecord) -> bool {
    self.effective().0.matches(record)
  }

  fn effective(&self) -> (Effective<'_>, Vec<ValidationError>) {
    let mut issues = Vec::new();

    let DateRange { start, end } = self.date_range;
    let (start, end) = match (start, end) {
      (Some(s), Some(e)) if s > e => {
        issues.push(ValidationError::InvertedDateRange { start: s, end: e });
        (None, None)
      }
      bounds => bounds,
    };

    let min = finite_bound("min", self.amount_range.min, &mut issues);
    let max = finite_bound("max", self.amount_range.max, &mut issues);
    let (min, max) = match (min, max) {
      (Some(lo), Some(hi)) if lo > hi => {
        issues.push(ValidationError::InvertedAmountRange { min: lo, max: hi });
        (None, None)
      }
      bounds => bounds,
    };

    let effective = Effective {
      start,
      end,
      categories: &self.categories,
      min,
      max,
    };
    (effective, issues)
  }
}

fn finite_bound(
  field: &'static str,
  bound: Option<f64>,
  issues: &mut Vec<ValidationError>,
) -> Option<f64> {
  match bound {
    Some(v) if !v.is_finite() => {
      issues.push(ValidationError::NonFiniteAmount { field });
      None
    }
    other => other,
  }
}

/// Criteria with malformed bounds already dropped
struct Effective<'c> {
  start: Option<NaiveDate>,
  end: Option<NaiveDate>,
  categories: &'c BTreeSet<String>,
  min: Option<f64>,
  max: Option<f64>,
}

impl Effective<'_> {
  fn matches(&self, record: &FinancialRecord) -> bool {
    if self.start.is_some_and(|start| record.date < start) {
      return false;
    }
    if self.end.is_some_and(|end| record.date > end) {
      return false;
    }
    if !self.categories.is_empty() && !self.categories.contains(&record.category) {
      return false;
    }
    if self.min.is_some_and(|min| record.amount < min) {
      return false;
    }
    if self.max.is_some_and(|max| record.amount > max) {
      return false;
    }
    true
  }
}

fn text_date(
  field: &'static str,
  raw: &str,
  issues: &mut Vec<ValidationError>,
) -> Option<NaiveDate> {
  let bound = parse_date_bound(raw);
  if bound.is_none() && !raw.trim().is_empty() {
    issues.push(ValidationError::InvalidDate {
      field,
      raw: raw.trim().to_string(),
    });
  }
  bound
}

fn text_bound(field: &'static str, raw: &str, issues: &mut Vec<ValidationError>) -> Option<f64> {
  let bound = parse_amount_bound(raw);
  if bound.is_none() && !raw.trim().is_empty() {
    issues.push(ValidationError::NonNumericAmount {
      field,
      raw: raw.trim().to_string(),
    });
  }
  bound
}

/// Parse an amount bound typed by a user. Anything that is not a finite number is absent.
pub fn parse_amount_bound(raw: &str) -> Option<f64> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }

  match trimmed.parse::<f64>() {
    Ok(v) if v.is_finite() => Some(v),
    _ => {
      debug!(raw, "ignoring amount bound that is not a number");
      None
    }
  }
}

/// Parse a "YYYY-MM-DD" date bound. Blank or invalid text is absent.
pub fn parse_date_bound(raw: &str) -> Option<NaiveDate> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }

  match NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
    Ok(date) => Some(date),
    Err(_) => {
      debug!(raw, "ignoring date bound that is not a calendar date");
      None
    }
  }
}

/// Keep the records that satisfy `criteria`, in their input order.
pub fn filter<'a, I>(records: I, criteria: &FilterCriteria) -> Vec<&'a FinancialRecord>
where
  I: IntoIterator<Item = &'a FinancialRecord>,
{
  let (effective, issues) = criteria.effective();
  for issue in &issues {
    debug!(%issue, "filter bound ignored");
  }

  records
    .into_iter()
    .filter(|record| effective.matches(record))
    .collect()
}

/// Staged filter edits alongside the criteria that currently govern results.
///
/// Editing the pending criteria never changes what [`applied`](Self::applied)
/// returns until [`apply_pending`](Self::apply_pending) swaps them in.
#[derive(Debug, Clone, Default)]
pub struct FilterState {
  pending: FilterCriteria,
  applied: FilterCriteria,
}

impl FilterState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn pending(&self) -> &FilterCriteria {
    &self.pending
  }

  pub fn pending_mut(&mut self) -> &mut FilterCriteria {
    &mut self.pending
  }

  pub fn applied(&self) -> &FilterCriteria {
    &self.applied
  }

  /// Promote the pending criteria as a whole.
  pub fn apply_pending(&mut self) -> &FilterCriteria {
    self.applied = self.pending.clone();
    &self.applied
  }

  /// Return both pending and applied criteria to "no restriction".
  pub fn reset(&mut self) -> &FilterCriteria {
    *self = Self::default();
    &self.applied
  }
}
