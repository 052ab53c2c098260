use chrono::{Duration, NaiveDate};
use std::fmt;
use std::str::FromStr;

use super::aggregate::first_of_month;
use super::filter::{DateRange, FilterCriteria};

/// Named reporting windows relative to today
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
  CurrentDay,
  CurrentMonth,
  LastSixMonths,
  LastYear,
}

impl Period {
  /// Inclusive date range covered by this period. Open-ended periods run to
  /// the latest record.
  pub fn range(&self, today: NaiveDate) -> DateRange {
    let month_start = first_of_month(today);
    match self {
      Period::CurrentDay => DateRange {
        start: Some(today),
        end: Some(today),
      },
      Period::CurrentMonth => DateRange {
        start: Some(month_start),
        end: None,
      },
      // Windows are counted in 30-day months back from the first of the month
      Period::LastSixMonths => DateRange {
        start: Some(month_start - Duration::days(30 * 5)),
        end: None,
      },
      Period::LastYear => DateRange {
        start: Some(month_start - Duration::days(30 * 11)),
        end: None,
      },
    }
  }

  /// Criteria that select this period and nothing else.
  pub fn criteria(&self, today: NaiveDate) -> FilterCriteria {
    let DateRange { start, end } = self.range(today);
    FilterCriteria::default().with_date_range(start, end)
  }
}

impl FromStr for Period {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "currentDay" | "current-day" | "day" => Ok(Period::CurrentDay),
      "currentMonth" | "current-month" | "month" => Ok(Period::CurrentMonth),
      "last6Months" | "last-6-months" => Ok(Period::LastSixMonths),
      "lastYear" | "last-year" | "year" => Ok(Period::LastYear),
      other => Err(format!("invalid period '{}'", other)),
    }
  }
}

impl fmt::Display for Period {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Period::CurrentDay => "currentDay",
      Period::CurrentMonth => "currentMonth",
      Period::LastSixMonths => "last6Months",
      Period::LastYear => "lastYear",
    };
    f.write_str(name)
  }
}
