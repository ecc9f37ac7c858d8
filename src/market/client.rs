//! # Market Data Client
//!
//! $$
//! \text{attempts} \le n_{\max}, \quad t_{\text{attempt}} \le \tau
//! $$
//!
//! Wraps a provider with a bounded retry policy and a hard per-attempt timeout.
//! A basket fetch fails as a whole as soon as one ticker is unavailable.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use tracing::warn;

use super::provider::MarketDataProvider;
use super::provider::ProviderError;
use super::series::PriceSeries;
use super::window::LookbackWindow;
use crate::error::EngineError;
use crate::error::Result;

/// Retry and timeout policy for provider calls.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FetchPolicy {
  /// Total attempts per ticker, including the first one.
  pub max_attempts: u32,
  /// Upper bound on a single provider call. Hitting it aborts the fetch without retrying.
  pub timeout: Duration,
  /// Pause between attempts after a transient failure.
  pub backoff: Duration,
}

impl Default for FetchPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      timeout: Duration::from_secs(30),
      backoff: Duration::from_millis(250),
    }
  }
}

/// Explicitly constructed data-fetch collaborator, shared by reference.
#[derive(Clone, Debug)]
pub struct MarketDataClient<P> {
  provider: P,
  policy: FetchPolicy,
}

impl<P: MarketDataProvider> MarketDataClient<P> {
  pub fn new(provider: P, policy: FetchPolicy) -> Self {
    Self { provider, policy }
  }

  pub fn provider(&self) -> &P {
    &self.provider
  }

  pub fn policy(&self) -> &FetchPolicy {
    &self.policy
  }

  /// Fetch one ticker under the retry policy.
  pub async fn fetch(&self, ticker: &str, window: &LookbackWindow) -> Result<PriceSeries> {
    let attempts = self.policy.max_attempts.max(1);
    let mut last_failure = String::new();

    for attempt in 1..=attempts {
      debug!(ticker, attempt, "fetching price history");
      match tokio::time::timeout(self.policy.timeout, self.provider.fetch(ticker, window)).await {
        Ok(Ok(series)) if series.is_empty() => {
          return Err(EngineError::DataUnavailable {
            ticker: ticker.to_string(),
            reason: "provider returned an empty series".to_string(),
          });
        }
        Ok(Ok(series)) => return Ok(series),
        Ok(Err(ProviderError::NotFound(reason))) => {
          return Err(EngineError::DataUnavailable {
            ticker: ticker.to_string(),
            reason,
          });
        }
        Ok(Err(ProviderError::Transient(reason))) => {
          warn!(ticker, attempt, %reason, "transient market data failure");
          last_failure = reason;
        }
        Err(_) => {
          warn!(ticker, attempt, timeout = ?self.policy.timeout, "market data fetch timed out");
          return Err(EngineError::DataUnavailable {
            ticker: ticker.to_string(),
            reason: format!("timed out after {:?}", self.policy.timeout),
          });
        }
      }

      if attempt < attempts {
        tokio::time::sleep(self.policy.backoff).await;
      }
    }

    Err(EngineError::DataUnavailable {
      ticker: ticker.to_string(),
      reason: format!("gave up after {attempts} attempts: {last_failure}"),
    })
  }

  /// Fetch a whole basket; any unavailable ticker fails the call.
  pub async fn fetch_basket(
    &self,
    tickers: &[String],
    window: &LookbackWindow,
  ) -> Result<Vec<PriceSeries>> {
    validate_tickers(tickers)?;
    let mut out = Vec::with_capacity(tickers.len());
    for ticker in tickers {
      out.push(self.fetch(ticker, window).await?);
    }
    Ok(out)
  }
}

/// Non-empty list of distinct, non-blank tickers.
pub fn validate_tickers(tickers: &[String]) -> Result<()> {
  if tickers.is_empty() {
    return Err(EngineError::invalid("ticker list must not be empty"));
  }
  let mut seen = HashSet::new();
  for t in tickers {
    if t.trim().is_empty() {
      return Err(EngineError::invalid("ticker list contains a blank entry"));
    }
    if !seen.insert(t.as_str()) {
      return Err(EngineError::InvalidInput(format!("duplicate ticker {t}")));
    }
  }
  Ok(())
}
