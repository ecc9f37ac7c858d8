//! # Risk Engine
//!
//! $$
//! r^{(p)}_t = \sum_i w_i\,r_{i,t}
//! $$
//!
//! Single-asset and portfolio risk assessment against a benchmark.

use chrono::NaiveDate;
use impl_new_derive::ImplNew;
use serde::Deserialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::metrics::RiskMetrics;
use super::metrics::TailConfig;
use super::profile::UserRiskProfile;
use super::report::risk_contributions;
use super::report::AssetRiskReport;
use super::report::Diversification;
use super::report::PortfolioRiskReport;
use super::report::RiskAlignment;
use super::report::VarInterpretation;
use crate::error::EngineError;
use crate::error::Result;
use crate::market::LookbackWindow;
use crate::market::MarketDataClient;
use crate::market::MarketDataProvider;
use crate::market::PriceSeries;
use crate::portfolio::data::estimate;
use crate::portfolio::data::EstimatorConfig;
use crate::portfolio::data::TRADING_PERIODS_PER_YEAR;
use crate::portfolio::WeightVector;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
  pub periods_per_year: f64,
  /// Annual risk-free rate for Sharpe ratios.
  pub risk_free: f64,
  /// Horizon of the currency VaR figures.
  pub holding_period_days: u32,
  /// Benchmark ticker used by the fetching entry points.
  pub benchmark: String,
  /// VaR/CVaR confidence levels and Monte Carlo sampler.
  pub tail: TailConfig,
}

impl Default for RiskConfig {
  fn default() -> Self {
    Self {
      periods_per_year: TRADING_PERIODS_PER_YEAR,
      risk_free: 0.02,
      holding_period_days: 1,
      benchmark: "^GSPC".to_string(),
      tail: TailConfig::default(),
    }
  }
}

/// Portfolio to assess by ticker; the tickers are those of `weights`.
#[derive(Clone, Debug, ImplNew)]
pub struct PortfolioRiskRequest {
  pub weights: WeightVector,
  pub profile: UserRiskProfile,
  pub investable_amount: f64,
}

#[derive(Clone, Debug, Default)]
pub struct RiskEngine {
  config: RiskConfig,
}

impl RiskEngine {
  pub fn new(config: RiskConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &RiskConfig {
    &self.config
  }

  fn metrics(
    &self,
    returns: &[(NaiveDate, f64)],
    benchmark: &PriceSeries,
  ) -> Result<RiskMetrics> {
    let metrics = RiskMetrics::from_returns(
      returns,
      &benchmark.simple_returns(),
      self.config.periods_per_year,
      self.config.risk_free,
      &self.config.tail,
    )?;
    if metrics.beta.is_none() {
      warn!(benchmark = benchmark.ticker(), "beta undefined: benchmark is flat or does not overlap");
    }
    if metrics.sharpe.is_none() {
      warn!("sharpe ratio undefined: return series is flat");
    }
    Ok(metrics)
  }

  /// Risk figures of one instrument. Beta uses the dates shared with `benchmark`.
  pub fn assess_asset(&self, asset: &PriceSeries, benchmark: &PriceSeries) -> Result<AssetRiskReport> {
    info!(ticker = asset.ticker(), benchmark = benchmark.ticker(), "assessing asset risk");
    let metrics = self.metrics(&asset.simple_returns(), benchmark)?;
    debug!(
      ticker = asset.ticker(),
      volatility = metrics.volatility,
      var_95 = metrics.var_95,
      risk_level = ?metrics.risk_level,
      "asset risk assessed"
    );

    Ok(AssetRiskReport {
      ticker: asset.ticker().to_string(),
      benchmark: benchmark.ticker().to_string(),
      metrics,
    })
  }

  /// Risk of the weighted basket `holdings`, judged against `profile`.
  ///
  /// Holdings are aligned on shared dates before weighting.
  pub fn assess_portfolio(
    &self,
    holdings: &[PriceSeries],
    weights: &WeightVector,
    profile: &UserRiskProfile,
    investable_amount: f64,
    benchmark: &PriceSeries,
  ) -> Result<PortfolioRiskReport> {
    if !investable_amount.is_finite() || investable_amount <= 0.0 {
      return Err(EngineError::InvalidInput(format!(
        "investable amount must be positive, got {investable_amount}"
      )));
    }
    let estimate = estimate(
      holdings,
      &EstimatorConfig {
        periods_per_year: self.config.periods_per_year,
        min_periods: 2,
      },
    )?;
    let w = weights.aligned_to(&estimate.tickers)?;
    info!(
      instruments = estimate.n_assets(),
      periods = estimate.periods,
      benchmark = benchmark.ticker(),
      "assessing portfolio risk"
    );

    let series: Vec<(NaiveDate, f64)> = estimate
      .dates
      .iter()
      .zip(estimate.returns.rows())
      .map(|(&date, row)| (date, row.iter().zip(&w).fold(0.0, |acc, (r, wi)| acc + wi * r)))
      .collect();
    let metrics = self.metrics(&series, benchmark)?;

    let alignment = RiskAlignment::assess(profile, metrics.volatility);
    debug!(
      volatility = metrics.volatility,
      verdict = ?alignment.verdict,
      "portfolio risk assessed"
    );

    Ok(PortfolioRiskReport {
      weights: weights.clone(),
      benchmark: benchmark.ticker().to_string(),
      profile: *profile,
      contributions: risk_contributions(&estimate.tickers, &w, &estimate.covariance),
      diversification: Diversification::of(weights),
      var_interpretation: VarInterpretation::describe(
        &metrics,
        investable_amount,
        self.config.holding_period_days,
      ),
      alignment,
      metrics,
    })
  }

  /// Fetch `ticker` and the configured benchmark, then [`Self::assess_asset`].
  pub async fn assess_ticker<P: MarketDataProvider>(
    &self,
    client: &MarketDataClient<P>,
    ticker: &str,
    window: &LookbackWindow,
  ) -> Result<AssetRiskReport> {
    let asset = client.fetch(ticker, window).await?;
    let benchmark = client.fetch(&self.config.benchmark, window).await?;
    self.assess_asset(&asset, &benchmark)
  }

  /// Fetch every holding and the configured benchmark, then [`Self::assess_portfolio`].
  pub async fn assess_portfolio_tickers<P: MarketDataProvider>(
    &self,
    client: &MarketDataClient<P>,
    request: &PortfolioRiskRequest,
    window: &LookbackWindow,
  ) -> Result<PortfolioRiskReport> {
    let holdings = client.fetch_basket(request.weights.tickers(), window).await?;
    let benchmark = client.fetch(&self.config.benchmark, window).await?;
    self.assess_portfolio(
      &holdings,
      &request.weights,
      &request.profile,
      request.investable_amount,
      &benchmark,
    )
  }
}
