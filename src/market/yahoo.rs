//! # Yahoo Finance Provider
//!
//! Adjusted closes from Yahoo Finance. Request failures are reported as transient,
//! an empty or unparseable quote set as not found.

use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use time::OffsetDateTime;
use yahoo_finance_api as yahoo;

use super::provider::MarketDataProvider;
use super::provider::ProviderError;
use super::series::PriceSeries;
use super::window::LookbackWindow;

pub struct YahooProvider {
  connector: yahoo::YahooConnector,
}

impl YahooProvider {
  pub fn new() -> anyhow::Result<Self> {
    let connector = yahoo::YahooConnector::new().context("failed to build Yahoo connector")?;
    Ok(Self { connector })
  }
}

fn to_offset(date: NaiveDate) -> anyhow::Result<OffsetDateTime> {
  let secs = date
    .and_hms_opt(0, 0, 0)
    .context("invalid midnight")?
    .and_utc()
    .timestamp();
  OffsetDateTime::from_unix_timestamp(secs).context("timestamp out of range")
}

/// Request bounds for `window`; starts before the Unix epoch (`max`) are
/// clamped to it, the end is made inclusive.
fn quote_range(window: &LookbackWindow, today: NaiveDate) -> anyhow::Result<(OffsetDateTime, OffsetDateTime)> {
  let (start, end) = window.resolve(today);
  let start = start.max(DateTime::<Utc>::UNIX_EPOCH.date_naive());
  let end = end.succ_opt().unwrap_or(end);
  Ok((to_offset(start)?, to_offset(end)?))
}

#[async_trait]
impl MarketDataProvider for YahooProvider {
  async fn fetch(&self, ticker: &str, window: &LookbackWindow) -> Result<PriceSeries, ProviderError> {
    let (start, end) = quote_range(window, Utc::now().date_naive())
      .map_err(|e| ProviderError::NotFound(format!("{ticker}: {e}")))?;

    let response = self
      .connector
      .get_quote_history(ticker, start, end)
      .await
      .map_err(|e| ProviderError::Transient(format!("{ticker}: {e}")))?;
    let quotes = response
      .quotes()
      .map_err(|e| ProviderError::NotFound(format!("{ticker}: {e}")))?;

    // Yahoo occasionally repeats the last bar; keep one close per day.
    let mut by_date = BTreeMap::new();
    for q in quotes {
      if let Some(ts) = DateTime::from_timestamp(q.timestamp as i64, 0) {
        by_date.insert(ts.date_naive(), q.adjclose);
      }
    }
    if by_date.is_empty() {
      return Err(ProviderError::NotFound(format!("{ticker}: no quotes in window")));
    }

    PriceSeries::new(ticker, by_date.into_iter().collect())
      .map_err(|e| ProviderError::NotFound(e.to_string()))
  }
}
