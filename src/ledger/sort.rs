//! Stable table ordering for expense records.

use std::cmp::Ordering;
use std::str::FromStr;

use super::types::FinancialRecord;

/// Column a table can be sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
  Date,
  Category,
  Description,
  Amount,
}

impl SortKey {
  fn compare(&self, a: &FinancialRecord, b: &FinancialRecord) -> Ordering {
    match self {
      SortKey::Date => a.date.cmp(&b.date),
      SortKey::Category => a.category.cmp(&b.category),
      SortKey::Description => a.description.cmp(&b.description),
      SortKey::Amount => a.amount.total_cmp(&b.amount),
    }
  }
}

impl FromStr for SortKey {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "date" => Ok(SortKey::Date),
      "category" => Ok(SortKey::Category),
      "description" => Ok(SortKey::Description),
      "amount" => Ok(SortKey::Amount),
      other => Err(format!(
        "unknown sort key '{}' (expected date, category, description or amount)",
        other
      )),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
  #[default]
  Ascending,
  Descending,
}

impl SortDirection {
  pub fn toggled(self) -> Self {
    match self {
      SortDirection::Ascending => SortDirection::Descending,
      SortDirection::Descending => SortDirection::Ascending,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
  pub key: SortKey,
  pub direction: SortDirection,
}

impl SortSpec {
  pub fn ascending(key: SortKey) -> Self {
    Self {
      key,
      direction: SortDirection::Ascending,
    }
  }

  pub fn descending(key: SortKey) -> Self {
    Self {
      key,
      direction: SortDirection::Descending,
    }
  }

  /// Column header click: the same key flips direction, a new key starts ascending.
  pub fn select(current: Option<SortSpec>, key: SortKey) -> SortSpec {
    match current {
      Some(spec) if spec.key == key => SortSpec {
        key,
        direction: spec.direction.toggled(),
      },
      _ => SortSpec::ascending(key),
    }
  }
}

/// Stable sort by `spec`. Records with equal keys keep their input order in
/// both directions.
pub fn sort<'a, I>(records: I, spec: SortSpec) -> Vec<&'a FinancialRecord>
where
  I: IntoIterator<Item = &'a FinancialRecord>,
{
  let mut sorted: Vec<&FinancialRecord> = records.into_iter().collect();
  sorted.sort_by(|a, b| match spec.direction {
    SortDirection::Ascending => spec.key.compare(a, b),
    SortDirection::Descending => spec.key.compare(b, a),
  });
  sorted
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDate;

  fn record(id: u64, date: &str, category: &str, description: &str, amount: f64) -> FinancialRecord {
    FinancialRecord {
      id,
      date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
      category: category.to_string(),
      description: description.to_string(),
      amount,
      owner_id: 1,
    }
  }

  fn ids(records: &[&FinancialRecord]) -> Vec<u64> {
    records.iter().map(|r| r.id).collect()
  }

  #[test]
  fn test_ties_keep_input_order() {
    let records = vec![
      record(1, "2024-01-01", "food", "a", 1.0),
      record(2, "2024-01-01", "food", "b", 1.0),
    ];

    for _ in 0..3 {
      let asc = sort(&records, SortSpec::ascending(SortKey::Amount));
      assert_eq!(ids(&asc), vec![1, 2]);

      let desc = sort(&records, SortSpec::descending(SortKey::Amount));
      assert_eq!(ids(&desc), vec![1, 2]);
    }
  }

  #[test]
  fn test_date_sorts_chronologically() {
    let records = vec![
      record(1, "2024-02-10", "food", "", 1.0),
      record(2, "2023-12-31", "food", "", 1.0),
      record(3, "2024-01-05", "food", "", 1.0),
    ];

    let sorted = sort(&records, SortSpec::ascending(SortKey::Date));
    assert_eq!(ids(&sorted), vec![2, 3, 1]);

    let sorted = sort(&records, SortSpec::descending(SortKey::Date));
    assert_eq!(ids(&sorted), vec![1, 3, 2]);
  }

  #[test]
  fn test_amount_sorts_numerically() {
    let records = vec![
      record(1, "2024-01-01", "x", "", 100.0),
      record(2, "2024-01-01", "x", "", 9.5),
      record(3, "2024-01-01", "x", "", -20.0),
    ];

    let sorted = sort(&records, SortSpec::ascending(SortKey::Amount));
    assert_eq!(ids(&sorted), vec![3, 2, 1]);
  }

  #[test]
  fn test_strings_sort_case_sensitive() {
    let records = vec![
      record(1, "2024-01-01", "food", "", 1.0),
      record(2, "2024-01-01", "Rent", "", 1.0),
      record(3, "2024-01-01", "bills", "", 1.0),
    ];

    let sorted = sort(&records, SortSpec::ascending(SortKey::Category));
    // Uppercase sorts before lowercase
    assert_eq!(ids(&sorted), vec![2, 3, 1]);
  }

  #[test]
  fn test_sort_does_not_touch_source() {
    let records = vec![
      record(1, "2024-03-01", "x", "", 3.0),
      record(2, "2024-01-01", "x", "", 1.0),
    ];
    let before = records.clone();

    let _ = sort(&records, SortSpec::ascending(SortKey::Date));
    assert_eq!(records, before);
  }

  #[test]
  fn test_select_toggles_and_resets() {
    let spec = SortSpec::select(None, SortKey::Amount);
    assert_eq!(spec, SortSpec::ascending(SortKey::Amount));

    let spec = SortSpec::select(Some(spec), SortKey::Amount);
    assert_eq!(spec.direction, SortDirection::Descending);

    let spec = SortSpec::select(Some(spec), SortKey::Amount);
    assert_eq!(spec.direction, SortDirection::Ascending);

    let desc = SortSpec::descending(SortKey::Amount);
    let spec = SortSpec::select(Some(desc), SortKey::Date);
    assert_eq!(spec, SortSpec::ascending(SortKey::Date));
  }

  #[test]
  fn test_sort_key_from_str() {
    assert_eq!("Amount".parse::<SortKey>().unwrap(), SortKey::Amount);
    assert!("price".parse::<SortKey>().is_err());
  }
}
