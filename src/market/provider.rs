//! # Market Data Provider
//!
//! $$
//! \text{fetch}(\text{ticker}, w) \in \{\text{series}, \text{not found}, \text{transient}\}
//! $$
//!
//! Provider contract plus an in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use super::series::PriceSeries;
use super::window::LookbackWindow;

/// Provider-level failure. `NotFound` is final, `Transient` may be retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
  #[error("no data: {0}")]
  NotFound(String),
  #[error("transient failure: {0}")]
  Transient(String),
}

/// Source of historical adjusted closes.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
  async fn fetch(&self, ticker: &str, window: &LookbackWindow) -> Result<PriceSeries, ProviderError>;
}

/// Serves pre-loaded series, clipped to the requested window.
#[derive(Clone, Debug, Default)]
pub struct StaticProvider {
  series: HashMap<String, PriceSeries>,
  as_of: Option<NaiveDate>,
}

impl StaticProvider {
  /// Named periods are anchored at the latest date found across `series`.
  pub fn from_series(series: impl IntoIterator<Item = PriceSeries>) -> Self {
    let mut provider = Self::default();
    for s in series {
      provider.insert(s);
    }
    provider
  }

  /// Anchor named periods at a fixed date instead of the latest observation.
  pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
    self.as_of = Some(as_of);
    self
  }

  pub fn insert(&mut self, series: PriceSeries) {
    self.series.insert(series.ticker().to_string(), series);
  }

  fn anchor(&self) -> NaiveDate {
    self.as_of.unwrap_or_else(|| {
      self
        .series
        .values()
        .filter_map(|s| s.last_date())
        .max()
        .unwrap_or(NaiveDate::MAX)
    })
  }
}

#[async_trait]
impl MarketDataProvider for StaticProvider {
  async fn fetch(&self, ticker: &str, window: &LookbackWindow) -> Result<PriceSeries, ProviderError> {
    let series = self
      .series
      .get(ticker)
      .ok_or_else(|| ProviderError::NotFound(format!("unknown ticker {ticker}")))?;
    let (start, end) = window.resolve(self.anchor());
    let clipped = series.clip(start, end);
    if clipped.is_empty() {
      return Err(ProviderError::NotFound(format!(
        "{ticker} has no prices between {start} and {end}"
      )));
    }
    Ok(clipped)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::market::window::Period;

  fn series(ticker: &str) -> PriceSeries {
    let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
    PriceSeries::new(
      ticker,
      vec![(d(1, 2), 10.0), (d(6, 3), 11.0), (d(12, 2), 12.0)],
    )
    .unwrap()
  }

  #[tokio::test]
  async fn clips_to_window_anchored_at_latest_date() {
    let provider = StaticProvider::from_series([series("AAA")]);
    let out = provider
      .fetch("AAA", &LookbackWindow::Period(Period::SixMonths))
      .await
      .unwrap();
    assert_eq!(out.len(), 2);
  }

  #[tokio::test]
  async fn unknown_ticker_and_empty_window_are_not_found() {
    let provider = StaticProvider::from_series([series("AAA")]);
    let err = provider
      .fetch("ZZZ", &LookbackWindow::default())
      .await
      .unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));

    let window = LookbackWindow::range(
      NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
      NaiveDate::from_ymd_opt(2020, 2, 1).unwrap(),
    )
    .unwrap();
    let err = provider.fetch("AAA", &window).await.unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));
  }
}
