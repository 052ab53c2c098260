//! Grouped sums and per-month summaries over record snapshots.

use chrono::{Datelike, Months, NaiveDate};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use std::hash::Hash;

use super::types::{FinancialRecord, MonthlyBudget};

/// Sums keyed by group, iterated in order of each group's first occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedSums<K: Eq + Hash> {
  groups: IndexMap<K, f64>,
}

impl<K: Eq + Hash> GroupedSums<K> {
  fn add(&mut self, key: K, amount: f64) {
    *self.groups.entry(key).or_insert(0.0) += amount;
  }

  pub fn get(&self, key: &K) -> Option<f64> {
    self.groups.get(key).copied()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&K, f64)> {
    self.groups.iter().map(|(k, v)| (k, *v))
  }

  pub fn keys(&self) -> impl Iterator<Item = &K> {
    self.groups.keys()
  }

  pub fn len(&self) -> usize {
    self.groups.len()
  }

  pub fn is_empty(&self) -> bool {
    self.groups.is_empty()
  }

  pub fn total(&self) -> f64 {
    self.groups.values().sum()
  }
}

impl<K: Eq + Hash> Default for GroupedSums<K> {
  fn default() -> Self {
    Self {
      groups: IndexMap::new(),
    }
  }
}

/// Sum `amount` per `key_fn(record)`.
pub fn group_sum<'a, I, K, F>(records: I, key_fn: F) -> GroupedSums<K>
where
  I: IntoIterator<Item = &'a FinancialRecord>,
  K: Eq + Hash,
  F: Fn(&FinancialRecord) -> K,
{
  let mut sums = GroupedSums::default();
  for record in records {
    sums.add(key_fn(record), record.amount);
  }
  sums
}

/// Unique categories in first-occurrence order, for filter option lists.
pub fn distinct_categories<'a, I>(records: I) -> Vec<String>
where
  I: IntoIterator<Item = &'a FinancialRecord>,
{
  records
    .into_iter()
    .map(|r| r.category.clone())
    .collect::<IndexSet<String>>()
    .into_iter()
    .collect()
}

/// Spending and budget for one calendar month
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlySpend {
  pub month: String,
  pub spent: f64,
  pub budget: f64,
}

/// The last `months` calendar months ending with the month of `today`,
/// newest first. Months without records or budgets report zero.
pub fn monthly_series(
  records: &[FinancialRecord],
  budgets: &[MonthlyBudget],
  today: NaiveDate,
  months: u32,
) -> Vec<MonthlySpend> {
  let spent = group_sum(records, FinancialRecord::month_key);
  let budget_by_month: HashMap<String, f64> = budgets
    .iter()
    .map(|b| (b.month_key(), b.budget))
    .collect();

  recent_months(today, months)
    .into_iter()
    .map(|start| {
      let month = format!("{:04}-{:02}", start.year(), start.month());
      MonthlySpend {
        spent: spent.get(&month).unwrap_or(0.0),
        budget: budget_by_month.get(&month).copied().unwrap_or(0.0),
        month,
      }
    })
    .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetStatus {
  pub year: i32,
  pub month: u32,
  pub budget: f64,
  pub total_expenses: f64,
  pub remaining: f64,
}

/// Budget versus spending for one month. `None` when no budget was set.
pub fn budget_status(
  records: &[FinancialRecord],
  budgets: &[MonthlyBudget],
  year: i32,
  month: u32,
) -> Option<BudgetStatus> {
  let budget = budgets
    .iter()
    .find(|b| b.year == year && b.month == month)?
    .budget;

  let total_expenses: f64 = records
    .iter()
    .filter(|r| r.date.year() == year && r.date.month() == month)
    .map(|r| r.amount)
    .sum();

  Some(BudgetStatus {
    year,
    month,
    budget,
    total_expenses,
    remaining: budget - total_expenses,
  })
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyBreakdown {
  pub total: f64,
  pub by_category: GroupedSums<String>,
}

/// Total and per-category spending within the calendar month of `today`.
pub fn current_month_breakdown(records: &[FinancialRecord], today: NaiveDate) -> MonthlyBreakdown {
  let in_month = records
    .iter()
    .filter(|r| r.date.year() == today.year() && r.date.month() == today.month());
  let by_category = group_sum(in_month, |r| r.category.clone());

  MonthlyBreakdown {
    total: by_category.total(),
    by_category,
  }
}

/// First day of each of the last `months` calendar months, newest first.
pub fn recent_months(today: NaiveDate, months: u32) -> Vec<NaiveDate> {
  let first_of_month = first_of_month(today);
  (0..months)
    .filter_map(|i| first_of_month.checked_sub_months(Months::new(i)))
    .collect()
}

pub(crate) fn first_of_month(day: NaiveDate) -> NaiveDate {
  day.with_day(1).unwrap_or(day)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
  }

  fn record(id: u64, day: &str, category: &str, amount: f64) -> FinancialRecord {
    FinancialRecord {
      id,
      date: date(day),
      category: category.to_string(),
      description: String::new(),
      amount,
      owner_id: 1,
    }
  }

  #[test]
  fn test_group_sum_first_occurrence_order() {
    let records = vec![
      record(1, "2024-01-01", "food", 10.0),
      record(2, "2024-01-02", "food", 5.0),
      record(3, "2024-01-03", "rent", 20.0),
    ];

    let sums = group_sum(&records, |r| r.category.clone());
    let collected: Vec<(String, f64)> = sums.iter().map(|(k, v)| (k.clone(), v)).collect();
    assert_eq!(
      collected,
      vec![("food".to_string(), 15.0), ("rent".to_string(), 20.0)]
    );
    assert_eq!(sums.total(), 35.0);
  }

  #[test]
  fn test_group_sum_is_not_sorted() {
    let records = vec![
      record(1, "2024-01-01", "zoo", 1.0),
      record(2, "2024-01-02", "apples", 2.0),
      record(3, "2024-01-03", "zoo", 3.0),
    ];

    let sums = group_sum(&records, |r| r.category.clone());
    assert_eq!(sums.keys().collect::<Vec<_>>(), vec!["zoo", "apples"]);
    assert_eq!(sums.get(&"zoo".to_string()), Some(4.0));
  }

  #[test]
  fn test_group_by_month() {
    let records = vec![
      record(1, "2024-02-01", "food", 10.0),
      record(2, "2024-01-31", "food", 5.0),
      record(3, "2024-02-20", "rent", 20.0),
    ];

    let sums = group_sum(&records, FinancialRecord::month_key);
    assert_eq!(sums.keys().collect::<Vec<_>>(), vec!["2024-02", "2024-01"]);
    assert_eq!(sums.get(&"2024-02".to_string()), Some(30.0));
  }

  #[test]
  fn test_distinct_categories() {
    let records = vec![
      record(1, "2024-01-01", "rent", 1.0),
      record(2, "2024-01-01", "food", 1.0),
      record(3, "2024-01-01", "rent", 1.0),
      record(4, "2024-01-01", "Food", 1.0),
    ];

    assert_eq!(distinct_categories(&records), vec!["rent", "food", "Food"]);
  }

  #[test]
  fn test_monthly_series_fills_gaps() {
    let records = vec![
      record(1, "2024-03-02", "food", 10.0),
      record(2, "2024-03-20", "rent", 500.0),
      record(3, "2024-01-15", "food", 7.5),
      record(4, "2023-06-01", "food", 99.0),
    ];
    let budgets = vec![
      MonthlyBudget {
        year: 2024,
        month: 3,
        budget: 1000.0,
        owner_id: 1,
      },
      MonthlyBudget {
        year: 2023,
        month: 12,
        budget: 800.0,
        owner_id: 1,
      },
    ];

    let series = monthly_series(&records, &budgets, date("2024-03-28"), 4);
    assert_eq!(
      series,
      vec![
        MonthlySpend {
          month: "2024-03".to_string(),
          spent: 510.0,
          budget: 1000.0
        },
        MonthlySpend {
          month: "2024-02".to_string(),
          spent: 0.0,
          budget: 0.0
        },
        MonthlySpend {
          month: "2024-01".to_string(),
          spent: 7.5,
          budget: 0.0
        },
        MonthlySpend {
          month: "2023-12".to_string(),
          spent: 0.0,
          budget: 800.0
        },
      ]
    );
  }

  #[test]
  fn test_budget_status() {
    let records = vec![
      record(1, "2024-03-02", "food", 100.0),
      record(2, "2024-03-31", "rent", 400.0),
      record(3, "2024-04-01", "rent", 400.0),
    ];
    let budgets = vec![MonthlyBudget {
      year: 2024,
      month: 3,
      budget: 1000.0,
      owner_id: 1,
    }];

    let status = budget_status(&records, &budgets, 2024, 3).unwrap();
    assert_eq!(status.total_expenses, 500.0);
    assert_eq!(status.remaining, 500.0);

    assert!(budget_status(&records, &budgets, 2024, 4).is_none());
  }

  #[test]
  fn test_current_month_breakdown() {
    let records = vec![
      record(1, "2024-03-02", "food", 10.0),
      record(2, "2024-02-28", "food", 50.0),
      record(3, "2024-03-05", "fuel", 30.0),
      record(4, "2023-03-05", "fuel", 30.0),
    ];

    let breakdown = current_month_breakdown(&records, date("2024-03-15"));
    assert_eq!(breakdown.total, 40.0);
    assert_eq!(breakdown.by_category.len(), 2);
    assert_eq!(breakdown.by_category.get(&"fuel".to_string()), Some(30.0));
  }
}
