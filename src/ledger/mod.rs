//! Sorting, filtering and aggregation over owner-scoped expense snapshots.
//!
//! Every operation takes a snapshot by reference and returns a new derived
//! view; nothing here mutates records or keeps state between calls.

mod aggregate;
mod filter;
mod period;
mod sort;
mod source;
mod types;

pub use aggregate::{
  budget_status, current_month_breakdown, distinct_categories, group_sum, monthly_series,
  recent_months, BudgetStatus, GroupedSums, MonthlyBreakdown, MonthlySpend,
};
pub use filter::{
  filter, parse_amount_bound, parse_date_bound, AmountRange, DateRange, FilterCriteria,
  FilterState, ValidationError,
};
pub use period::Period;
pub use sort::{sort, SortDirection, SortKey, SortSpec};
pub use source::{scope_to_owner, BackendClient, RecordSnapshot};
pub use types::{FinancialRecord, MonthlyBudget};

/// Table rows: sorted first, then filtered, so the filtered rows stay sorted.
///
/// Without a sort spec the snapshot order is kept.
pub fn table_view<'a>(
  records: &'a [FinancialRecord],
  sort_spec: Option<SortSpec>,
  criteria: &FilterCriteria,
) -> Vec<&'a FinancialRecord> {
  match sort_spec {
    Some(spec) => filter(sort(records, spec), criteria),
    None => filter(records, criteria),
  }
}
