use chrono::{DateTime, Local, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use fintrack::cache::{
  CacheConfig, CacheEvent, CacheLayer, CacheResult, CacheSource, Cacheable, KeyValueStore,
  NoopStore, SqliteStore,
};
use fintrack::config::Config;
use fintrack::ledger::{
  self, distinct_categories, group_sum, monthly_series, BackendClient, FilterState,
  FinancialRecord, Period, RecordSnapshot, SortKey, SortSpec,
};
use fintrack::market::{self, FinnhubClient, Quote, Recommendation};
use fintrack::logging;

#[derive(Parser, Debug)]
#[command(name = "fintrack")]
#[command(about = "Market quotes, analyst ratings and expense reports from the terminal")]
#[command(version)]
struct Cli {
  /// Path to config file (default: $XDG_CONFIG_HOME/fintrack/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log filter directive, e.g. "info" or "fintrack=debug"
  #[arg(long, default_value = "warn")]
  log_level: String,

  /// Write logs to a daily file in the data directory instead of stderr
  #[arg(long)]
  log_file: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show cached stock quotes
  Quotes {
    /// Refresh even if the cached quotes are still fresh
    #[arg(long)]
    force: bool,
  },
  /// Show analyst recommendation counts
  Recommendations {
    #[arg(long)]
    force: bool,
  },
  /// Keep quotes and recommendations refreshed until interrupted
  Watch {
    /// Seconds between background refreshes of both feeds (default: each feed's TTL)
    #[arg(long)]
    interval_secs: Option<u64>,
  },
  /// List expenses, sorted and filtered
  Expenses {
    #[command(flatten)]
    source: RecordSource,

    /// Column to sort by (date, category, description, amount)
    #[arg(long)]
    sort: Option<SortKey>,

    /// Sort descending
    #[arg(long, requires = "sort")]
    desc: bool,

    /// Earliest date, YYYY-MM-DD
    #[arg(long)]
    from: Option<String>,

    /// Latest date, YYYY-MM-DD
    #[arg(long)]
    to: Option<String>,

    /// Restrict to a category (repeatable)
    #[arg(long = "category")]
    categories: Vec<String>,

    /// Minimum amount
    #[arg(long, allow_hyphen_values = true)]
    min: Option<String>,

    /// Maximum amount
    #[arg(long, allow_hyphen_values = true)]
    max: Option<String>,

    /// Named window: currentDay, currentMonth, last6Months, lastYear
    #[arg(long, conflicts_with_all = ["from", "to"])]
    period: Option<Period>,
  },
  /// Sum expenses per category or per month
  Breakdown {
    #[command(flatten)]
    source: RecordSource,

    #[arg(long, value_enum, default_value_t = GroupBy::Category)]
    by: GroupBy,
  },
  /// Monthly spending against budget, newest month first
  BudgetSeries {
    #[command(flatten)]
    source: RecordSource,

    #[arg(long, default_value_t = 6)]
    months: u32,
  },
}

#[derive(Args, Debug)]
struct RecordSource {
  /// Read records from a JSON snapshot instead of the expense backend
  #[arg(long)]
  file: Option<PathBuf>,

  /// Owner whose records are shown (default from config)
  #[arg(long)]
  owner: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GroupBy {
  Category,
  Month,
}

type Store = Arc<dyn KeyValueStore>;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let cli = Cli::parse();

  // Load configuration
  let config = Config::load(cli.config.as_deref())?;

  let log_dir = if cli.log_file {
    logging::default_log_dir()
  } else {
    None
  };
  let _log_guard = logging::init(&cli.log_level, log_dir.as_deref())?;

  match cli.command {
    Command::Quotes { force } => {
      let layer = CacheLayer::new(open_store(&config));
      let slot = quotes_slot(&config)?;
      let result = fetch(&layer, &slot, force).await?;
      print_provenance(&result);
      print_quotes(&result.data);
    }
    Command::Recommendations { force } => {
      let layer = CacheLayer::new(open_store(&config));
      let slot = recommendations_slot(&config)?;
      let result = fetch(&layer, &slot, force).await?;
      print_provenance(&result);
      print_recommendations(&result.data);
    }
    Command::Watch { interval_secs } => watch(&config, interval_secs).await?,
    Command::Expenses {
      source,
      sort,
      desc,
      from,
      to,
      categories,
      min,
      max,
      period,
    } => {
      let snapshot = load_records(&source, &config).await?;
      let today = Local::now().date_naive();

      let mut state = FilterState::new();
      let pending = state.pending_mut();
      if let Some(period) = period {
        *pending = period.criteria(today);
      }
      let mut issues = Vec::new();
      if from.is_some() || to.is_some() {
        issues.extend(
          pending.set_date_bounds_from_text(from.as_deref().unwrap_or(""), to.as_deref().unwrap_or("")),
        );
      }
      pending.categories.extend(categories);
      issues.extend(
        pending.set_amount_bounds_from_text(min.as_deref().unwrap_or(""), max.as_deref().unwrap_or("")),
      );

      let applied = state.apply_pending();
      issues.extend(applied.issues());
      for issue in &issues {
        eprintln!("warning: {}, ignored", issue);
      }

      let spec = sort.map(|key| {
        if desc {
          SortSpec::descending(key)
        } else {
          SortSpec::ascending(key)
        }
      });
      let rows = ledger::table_view(&snapshot.expenses, spec, state.applied());
      print_expenses(&rows);
      println!(
        "\nCategories: {}",
        distinct_categories(&snapshot.expenses).join(", ")
      );
    }
    Command::Breakdown { source, by } => {
      let snapshot = load_records(&source, &config).await?;
      let sums = match by {
        GroupBy::Category => group_sum(&snapshot.expenses, |r| r.category.clone()),
        GroupBy::Month => group_sum(&snapshot.expenses, FinancialRecord::month_key),
      };

      for (key, total) in sums.iter() {
        println!("{:<20} {:>12.2}", key, total);
      }
      println!("{:<20} {:>12.2}", "TOTAL", sums.total());
    }
    Command::BudgetSeries { source, months } => {
      let mut snapshot = load_records(&source, &config).await?;
      let today = Local::now().date_naive();
      if source.file.is_none() {
        let client = BackendClient::new(&config.backend.url)?;
        snapshot.budgets = client.budgets_for(owner_of(&source, &config), today, months).await?;
      }
      let series = monthly_series(&snapshot.expenses, &snapshot.budgets, today, months);

      println!("{:<8} {:>12} {:>12} {:>12}", "MONTH", "SPENT", "BUDGET", "REMAINING");
      for month in series {
        println!(
          "{:<8} {:>12.2} {:>12.2} {:>12.2}",
          month.month,
          month.spent,
          month.budget,
          month.budget - month.spent
        );
      }
    }
  }

  Ok(())
}

/// Open the configured cache store, degrading to an unpersisted cache if it fails.
fn open_store(config: &Config) -> Store {
  if !config.cache.enabled {
    return Arc::new(NoopStore);
  }

  let opened = match &config.cache.path {
    Some(path) => SqliteStore::open(path),
    None => SqliteStore::open_default(),
  };

  match opened {
    Ok(store) => Arc::new(store),
    Err(e) => {
      warn!(error = %e, "cache store unavailable, continuing without persistence");
      Arc::new(NoopStore)
    }
  }
}

fn market_client(config: &Config) -> Result<FinnhubClient> {
  let token = Config::get_finnhub_token()?;
  FinnhubClient::new(&config.market.base_url, token)
}

fn quotes_slot(config: &Config) -> Result<CacheConfig<Vec<Quote>>> {
  market::quotes_config(
    market_client(config)?,
    config.market.quote_symbols.clone(),
    config.market.quote_ttl(),
  )
}

fn recommendations_slot(config: &Config) -> Result<CacheConfig<Vec<Recommendation>>> {
  market::recommendations_config(
    market_client(config)?,
    config.market.recommendation_symbols.clone(),
    config.market.recommendation_ttl(),
  )
}

async fn fetch<T: Cacheable>(
  layer: &CacheLayer<T, Store>,
  slot: &CacheConfig<T>,
  force: bool,
) -> Result<CacheResult<T>> {
  let result = if force {
    layer.force_refresh(slot).await?
  } else {
    layer.get(slot).await?
  };
  Ok(result)
}

fn owner_of(source: &RecordSource, config: &Config) -> u64 {
  source.owner.unwrap_or(config.backend.owner_id)
}

/// Records from the snapshot file, or expenses only from the backend.
async fn load_records(source: &RecordSource, config: &Config) -> Result<RecordSnapshot> {
  let owner_id = owner_of(source, config);

  match &source.file {
    Some(path) => Ok(RecordSnapshot::load(path)?.scoped_to(owner_id)),
    None => {
      let client = BackendClient::new(&config.backend.url)?;
      let expenses = client.expenses_for(owner_id).await?;
      Ok(RecordSnapshot {
        expenses,
        budgets: Vec::new(),
      })
    }
  }
}

async fn watch(config: &Config, interval_secs: Option<u64>) -> Result<()> {
  let store = open_store(config);
  let quotes = CacheLayer::new(Arc::clone(&store));
  let recommendations = CacheLayer::new(store);
  let quotes_slot = quotes_slot(config)?;
  let recommendations_slot = recommendations_slot(config)?;

  let mut quote_events = quotes.subscribe();
  let mut recommendation_events = recommendations.subscribe();

  // Initial load; failures are reported and the background loop keeps trying
  match quotes.get(&quotes_slot).await {
    Ok(result) => print_quotes(&result.data),
    Err(e) => eprintln!("quotes unavailable: {}", e),
  }
  match recommendations.get(&recommendations_slot).await {
    Ok(result) => print_recommendations(&result.data),
    Err(e) => eprintln!("recommendations unavailable: {}", e),
  }

  let (quote_interval, recommendation_interval) = config.market.refresh_intervals(interval_secs);
  let quote_refresh = quotes.start_background_refresh(quotes_slot.clone(), quote_interval);
  let recommendation_refresh = recommendations
    .start_background_refresh(recommendations_slot.clone(), recommendation_interval);

  info!(
    quote_interval_secs = quote_interval.as_secs(),
    recommendation_interval_secs = recommendation_interval.as_secs(),
    "watching market data"
  );

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      event = quote_events.recv() => match event {
        Ok(CacheEvent::Refreshed { .. }) => {
          if let Some(entry) = quotes.peek(quotes_slot.key()) {
            println!("\nQuotes as of {}", local_time(entry.fetched_at));
            print_quotes(&entry.payload);
          }
        }
        Ok(event) => report_event(&event),
        Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed cache events"),
        Err(RecvError::Closed) => break,
      },
      event = recommendation_events.recv() => match event {
        Ok(CacheEvent::Refreshed { .. }) => {
          if let Some(entry) = recommendations.peek(recommendations_slot.key()) {
            println!("\nRecommendations as of {}", local_time(entry.fetched_at));
            print_recommendations(&entry.payload);
          }
        }
        Ok(event) => report_event(&event),
        Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed cache events"),
        Err(RecvError::Closed) => break,
      },
    }
  }

  quote_refresh.shutdown().await;
  recommendation_refresh.shutdown().await;
  Ok(())
}

fn report_event(event: &CacheEvent) {
  match event {
    CacheEvent::RefreshFailed {
      error,
      serving_stale: true,
    } => eprintln!("{} (showing last good data)", error),
    CacheEvent::RefreshFailed { error, .. } => eprintln!("{}", error),
    CacheEvent::StorageFailed(error) => eprintln!("{}", error),
    CacheEvent::Refreshed { .. } | CacheEvent::Rehydrated { .. } => {}
  }
}

fn local_time(at: DateTime<Utc>) -> String {
  at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

fn print_provenance<T>(result: &CacheResult<T>) {
  let note = match result.source {
    CacheSource::Network => "fetched",
    CacheSource::CacheFresh => "cached",
    CacheSource::Offline => "OFFLINE, last update",
  };
  println!("({} {})", note, local_time(result.fetched_at));
}

fn print_quotes(quotes: &[Quote]) {
  println!("{:<8} {:>12} {:>10} {:>9}", "SYMBOL", "PRICE", "CHANGE", "CHANGE%");
  for quote in quotes {
    println!(
      "{:<8} {:>12} {:>10} {:>9}",
      quote.symbol,
      format_number(quote.price, ""),
      format_number(quote.change_value, ""),
      format_number(quote.change_percent, "%"),
    );
  }
}

fn print_recommendations(recommendations: &[Recommendation]) {
  println!(
    "{:<8} {:<12} {:>10} {:>5} {:>5} {:>5} {:>11}",
    "SYMBOL", "PERIOD", "STRONG BUY", "BUY", "HOLD", "SELL", "STRONG SELL"
  );
  for r in recommendations {
    println!(
      "{:<8} {:<12} {:>10} {:>5} {:>5} {:>5} {:>11}",
      r.symbol, r.period, r.strong_buy, r.buy, r.hold, r.sell, r.strong_sell
    );
  }
}

fn print_expenses(rows: &[&FinancialRecord]) {
  println!("{:<10}  {:<16} {:<32} {:>12}", "DATE", "CATEGORY", "DESCRIPTION", "AMOUNT");
  for r in rows {
    println!(
      "{:<10}  {:<16} {:<32} {:>12.2}",
      format_date(r.date),
      r.category,
      r.description,
      r.amount
    );
  }
  let total: f64 = rows.iter().map(|r| r.amount).sum();
  println!("{} rows, total {:.2}", rows.len(), total);
}

fn format_date(date: NaiveDate) -> String {
  date.format("%Y-%m-%d").to_string()
}

fn format_number(value: Option<f64>, suffix: &str) -> String {
  match value {
    Some(v) => format!("{:.2}{}", v, suffix),
    None => "N/A".to_string(),
  }
}
