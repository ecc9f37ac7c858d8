//! # Portfolio Engine
//!
//! $$
//! \mathbf{w}^\* = \operatorname{Optimize}(\hat\mu, \hat\Sigma, \text{mode})
//! $$
//!
//! High-level orchestration: price series in, estimate, then the requested mode.

use serde::Deserialize;
use tracing::info;

use super::data::estimate;
use super::data::CovarianceEstimate;
use super::data::EstimatorConfig;
use super::enhance::optimize_enhance;
use super::optimizers::optimize_full;
use super::rebalance::optimize_rebalance;
use super::solver::SolverConfig;
use super::types::OptimizationMode;
use super::types::OptimizationResult;
use crate::error::Result;
use crate::market::LookbackWindow;
use crate::market::MarketDataClient;
use crate::market::MarketDataProvider;
use crate::market::PriceSeries;

/// Runtime configuration for [`PortfolioEngine`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PortfolioEngineConfig {
  pub estimator: EstimatorConfig,
  pub solver: SolverConfig,
  /// Risk-free rate used in Sharpe computations.
  pub risk_free: f64,
  /// Number of efficient-frontier samples in full mode.
  pub frontier_points: usize,
  /// Solve frontier samples on the rayon pool.
  pub parallel_frontier: bool,
}

impl Default for PortfolioEngineConfig {
  fn default() -> Self {
    Self {
      estimator: EstimatorConfig::default(),
      solver: SolverConfig::default(),
      risk_free: 0.0,
      frontier_points: 50,
      parallel_frontier: true,
    }
  }
}

/// Single entry-point engine for the optimizer modes. Stateless across calls.
#[derive(Clone, Debug, Default)]
pub struct PortfolioEngine {
  config: PortfolioEngineConfig,
}

impl PortfolioEngine {
  /// Construct a new engine with explicit configuration.
  pub fn new(config: PortfolioEngineConfig) -> Self {
    Self { config }
  }

  /// Borrow engine configuration.
  pub fn config(&self) -> &PortfolioEngineConfig {
    &self.config
  }

  /// Annualized mean and covariance of the aligned basket.
  pub fn estimate(&self, series: &[PriceSeries]) -> Result<CovarianceEstimate> {
    estimate(series, &self.config.estimator)
  }

  /// Estimate, then run `mode`.
  pub fn optimize(&self, series: &[PriceSeries], mode: &OptimizationMode) -> Result<OptimizationResult> {
    let estimate = self.estimate(series)?;
    self.optimize_estimate(&estimate, mode)
  }

  /// Run `mode` on an existing estimate.
  pub fn optimize_estimate(
    &self,
    estimate: &CovarianceEstimate,
    mode: &OptimizationMode,
  ) -> Result<OptimizationResult> {
    if estimate.n_assets() > 1 {
      estimate.check_conditioning(mode.kind())?;
    }
    info!(mode = %mode.kind(), instruments = estimate.n_assets(), "optimizing");

    Ok(match mode {
      OptimizationMode::Full { target_return } => {
        OptimizationResult::Full(optimize_full(estimate, *target_return, &self.config)?)
      }
      OptimizationMode::Enhance(request) => {
        OptimizationResult::Enhance(optimize_enhance(estimate, request, &self.config)?)
      }
      OptimizationMode::Rebalance(request) => {
        OptimizationResult::Rebalance(optimize_rebalance(estimate, request, &self.config)?)
      }
    })
  }

  /// Fetch the basket through `client`, then estimate and run `mode`.
  ///
  /// Any ticker the provider cannot deliver fails the whole call.
  pub async fn optimize_tickers<P: MarketDataProvider>(
    &self,
    client: &MarketDataClient<P>,
    tickers: &[String],
    window: &LookbackWindow,
    mode: &OptimizationMode,
  ) -> Result<OptimizationResult> {
    let series = client.fetch_basket(tickers, window).await?;
    self.optimize(&series, mode)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::EngineError;
  use crate::error::ModeKind;
  use crate::market::FetchPolicy;
  use crate::market::StaticProvider;
  use crate::portfolio::types::RebalanceRequest;
  use crate::portfolio::types::WeightVector;
  use crate::risk::RiskCategory;
  use crate::risk::UserRiskProfile;
  use crate::testing::business_days;
  use crate::testing::prices_from_returns;
  use crate::testing::synthetic_basket;

  fn basket() -> Vec<PriceSeries> {
    synthetic_basket(
      3,
      252,
      &["AAA", "BBB", "CCC"],
      &[0.08, 0.10, 0.12],
      &[0.18, 0.22, 0.30],
      0.3,
    )
  }

  #[test]
  fn repeated_calls_are_identical() {
    let engine = PortfolioEngine::default();
    let series = basket();
    let profile = UserRiskProfile::new(RiskCategory::Moderate, 0.4).unwrap();
    let current = WeightVector::new(
      vec!["AAA".into(), "BBB".into(), "CCC".into()],
      vec![0.2, 0.3, 0.5],
    )
    .unwrap();

    for mode in [
      OptimizationMode::Full {
        target_return: Some(0.1),
      },
      OptimizationMode::Rebalance(RebalanceRequest::new(current, profile, Some(2), None)),
    ] {
      let first = engine.optimize(&series, &mode).unwrap();
      let second = engine.optimize(&series, &mode).unwrap();
      assert_eq!(first, second);
      assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
      );
      assert_eq!(first.mode(), mode.kind());
    }
  }

  #[test]
  fn result_serializes_with_mode_tag() {
    let engine = PortfolioEngine::new(PortfolioEngineConfig {
      frontier_points: 5,
      ..PortfolioEngineConfig::default()
    });
    let result = engine
      .optimize(&basket(), &OptimizationMode::Full { target_return: None })
      .unwrap();
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["mode"], "full");
    assert!(json["max_sharpe"]["weights"]["CCC"].is_number());
    assert!(json["correlation"]["AAA"]["BBB"].is_number());
    assert_eq!(json["efficient_frontier"].as_array().unwrap().len(), 5);
  }

  #[test]
  fn duplicated_instrument_is_singular() {
    let mut series = basket();
    let dates = business_days(253);
    let returns: Vec<f64> = series[0]
      .simple_returns()
      .into_iter()
      .map(|(_, r)| r)
      .collect();
    series.push(prices_from_returns("AAA2", &dates, &returns));

    let err = PortfolioEngine::default()
      .optimize(&series, &OptimizationMode::Full { target_return: None })
      .unwrap_err();
    assert!(matches!(
      err,
      EngineError::SingularCovariance {
        mode: ModeKind::Full,
        ..
      }
    ));
  }

  #[tokio::test]
  async fn optimizes_fetched_basket() {
    let client = MarketDataClient::new(StaticProvider::from_series(basket()), FetchPolicy::default());
    let tickers = vec!["AAA".to_string(), "BBB".to_string(), "CCC".to_string()];
    let engine = PortfolioEngine::default();

    let fetched = engine
      .optimize_tickers(
        &client,
        &tickers,
        &LookbackWindow::default(),
        &OptimizationMode::Full { target_return: None },
      )
      .await
      .unwrap();
    let direct = engine
      .optimize(&basket(), &OptimizationMode::Full { target_return: None })
      .unwrap();
    assert_eq!(fetched, direct);

    let missing = vec!["AAA".to_string(), "ZZZ".to_string()];
    let err = engine
      .optimize_tickers(
        &client,
        &missing,
        &LookbackWindow::default(),
        &OptimizationMode::Full { target_return: None },
      )
      .await
      .unwrap_err();
    assert!(matches!(err, EngineError::DataUnavailable { .. }));
  }
}
