//! # Enhance Mode
//!
//! $$
//! \min_{\mathbf w}\ -\alpha\,S(\mathbf w)+(1-\alpha)\,\lVert\mathbf w-\mathbf w_0\rVert_2,
//! \qquad |w_i-w_{0,i}|\le 0.15
//! $$
//!
//! Improves an existing allocation without drifting far from it. With a risk
//! profile the result's volatility is capped relative to the current one.

use tracing::info;

use super::data::CovarianceEstimate;
use super::engine::PortfolioEngineConfig;
use super::objectives::BlendedSharpe;
use super::objectives::NegativeSharpe;
use super::optimizers::solve;
use super::solver::Bounds;
use super::solver::Constraint;
use super::types::Action;
use super::types::EnhanceRequest;
use super::types::Enhancement;
use super::types::PortfolioResult;
use super::types::Recommendation;
use super::types::TickerMap;
use super::types::WeightVector;
use crate::error::EngineError;
use crate::error::ModeKind;
use crate::error::Result;
use crate::risk::RiskCategory;

/// Sharpe weight of the blended objective for aggressive profiles.
pub const ENHANCE_ALPHA_AGGRESSIVE: f64 = 0.7;
/// Sharpe weight for every other profile, or none.
pub const ENHANCE_ALPHA_DEFAULT: f64 = 0.5;
/// Largest move of a single weight away from the current allocation.
pub const MAX_WEIGHT_SHIFT: f64 = 0.15;
/// Volatility cap is `current * (1 + score * VOLATILITY_CAP_SCORE_FACTOR)`.
pub const VOLATILITY_CAP_SCORE_FACTOR: f64 = 0.2;
/// Weight changes below this are not worth a recommendation.
pub const MIN_RECOMMENDATION_SHIFT: f64 = 0.005;

pub(crate) fn validate_amount(amount: Option<f64>) -> Result<()> {
  match amount {
    Some(a) if !a.is_finite() || a <= 0.0 => Err(EngineError::InvalidInput(format!(
      "investable amount must be positive, got {a}"
    ))),
    _ => Ok(()),
  }
}

pub fn optimize_enhance(
  estimate: &CovarianceEstimate,
  request: &EnhanceRequest,
  config: &PortfolioEngineConfig,
) -> Result<Enhancement> {
  validate_amount(request.investable_amount)?;
  let n = estimate.n_assets();
  let mean = &estimate.mean;
  let cov = &estimate.covariance;
  let rf = config.risk_free;

  let w0 = request.current.aligned_to(&estimate.tickers)?;
  let current = PortfolioResult::evaluate(
    WeightVector::from_solution(estimate.tickers.clone(), w0.clone()),
    mean,
    cov,
    rf,
    0,
  );

  let alpha = match request.profile.map(|p| p.category()) {
    Some(RiskCategory::Aggressive) => ENHANCE_ALPHA_AGGRESSIVE,
    _ => ENHANCE_ALPHA_DEFAULT,
  };
  let volatility_cap = request
    .profile
    .map(|p| current.volatility * (1.0 + p.score() * VOLATILITY_CAP_SCORE_FACTOR));
  info!(instruments = n, alpha, ?volatility_cap, "enhance optimization");

  let enhanced = if n == 1 {
    current.clone()
  } else {
    let objective = BlendedSharpe {
      sharpe: NegativeSharpe {
        mean,
        covariance: cov,
        risk_free: rf,
      },
      anchor: &w0,
      alpha,
    };
    let constraints: Vec<Constraint<'_>> = volatility_cap
      .map(|cap| Constraint::MaxVolatility {
        covariance: cov,
        cap,
      })
      .into_iter()
      .collect();
    let solution = solve(
      &objective,
      &w0,
      &Bounds::around(&w0, MAX_WEIGHT_SHIFT),
      &constraints,
      &config.solver,
      ModeKind::Enhance,
      "blended_sharpe",
    )?;
    PortfolioResult::evaluate(
      WeightVector::from_solution(estimate.tickers.clone(), solution.weights),
      mean,
      cov,
      rf,
      solution.iterations,
    )
  };

  let vols = estimate.volatilities();
  let mut moves: Vec<(usize, f64)> = enhanced
    .weights
    .weights()
    .iter()
    .zip(&w0)
    .map(|(new, old)| new - old)
    .enumerate()
    .collect();
  let weight_changes: TickerMap<f64> = moves
    .iter()
    .map(|&(i, d)| (estimate.tickers[i].clone(), d))
    .collect();

  moves.retain(|(_, d)| d.abs() >= MIN_RECOMMENDATION_SHIFT);
  moves.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
  let recommendations = moves
    .into_iter()
    .map(|(i, delta)| {
      let ticker = estimate.tickers[i].clone();
      let standalone = if vols[i] > 0.0 {
        (mean[i] - rf) / vols[i]
      } else {
        0.0
      };
      let (action, rationale) = if delta > 0.0 {
        (
          Action::Increase,
          format!(
            "add to {ticker}: its return per unit of risk (standalone Sharpe {standalone:.2}) lifts the portfolio Sharpe toward {:.2}",
            enhanced.sharpe
          ),
        )
      } else {
        (
          Action::Decrease,
          format!(
            "trim {ticker}: freeing {:.1} points of weight for better risk-adjusted holdings (standalone Sharpe {standalone:.2})",
            delta.abs() * 100.0
          ),
        )
      };
      Recommendation {
        ticker,
        action,
        current_weight: w0[i],
        target_weight: enhanced.weights.weights()[i],
        change_pct: delta.abs() * 100.0,
        amount: request.investable_amount.map(|a| delta.abs() * a),
        rationale,
      }
    })
    .collect();

  Ok(Enhancement {
    return_change: enhanced.expected_return - current.expected_return,
    sharpe_change: enhanced.sharpe - current.sharpe,
    volatility_change: enhanced.volatility - current.volatility,
    current,
    enhanced,
    alpha,
    volatility_cap,
    weight_changes,
    recommendations,
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;
  use crate::portfolio::data::estimate;
  use crate::portfolio::data::EstimatorConfig;
  use crate::risk::UserRiskProfile;
  use crate::testing::synthetic_basket;

  fn lopsided() -> (CovarianceEstimate, WeightVector) {
    let series = synthetic_basket(
      11,
      252,
      &["LAG", "CORE", "GROWTH"],
      &[0.02, 0.12, 0.15],
      &[0.40, 0.20, 0.25],
      0.3,
    );
    let est = estimate(&series, &EstimatorConfig::default()).unwrap();
    let current = WeightVector::new(est.tickers.clone(), vec![0.8, 0.1, 0.1]).unwrap();
    (est, current)
  }

  #[test]
  fn aggressive_profile_improves_sharpe_within_band() {
    let (est, current) = lopsided();
    let profile = UserRiskProfile::new(RiskCategory::Aggressive, 0.6).unwrap();
    let request = EnhanceRequest::new(current, Some(profile), Some(100_000.0));
    let out = optimize_enhance(&est, &request, &PortfolioEngineConfig::default()).unwrap();

    assert_eq!(out.alpha, ENHANCE_ALPHA_AGGRESSIVE);
    assert!(out.sharpe_change > 0.0);
    for (old, new) in out
      .current
      .weights
      .weights()
      .iter()
      .zip(out.enhanced.weights.weights())
    {
      assert!((new - old).abs() <= MAX_WEIGHT_SHIFT + 1e-9);
    }
    assert_abs_diff_eq!(
      out.enhanced.weights.weights().iter().sum::<f64>(),
      1.0,
      epsilon = 1e-6
    );
    assert!(out.enhanced.volatility <= out.volatility_cap.unwrap() + 1e-6);

    let top = &out.recommendations[0];
    assert_eq!(top.ticker, "LAG");
    assert_eq!(top.action, Action::Decrease);
    assert_abs_diff_eq!(top.amount.unwrap(), top.change_pct / 100.0 * 100_000.0, epsilon = 1e-6);
    assert!(out
      .recommendations
      .windows(2)
      .all(|w| w[0].change_pct >= w[1].change_pct));
  }

  #[test]
  fn volatility_cap_binds_for_zero_score() {
    let (est, current) = lopsided();
    let profile = UserRiskProfile::new(RiskCategory::Moderate, 0.0).unwrap();
    let request = EnhanceRequest::new(current, Some(profile), None);
    let out = optimize_enhance(&est, &request, &PortfolioEngineConfig::default()).unwrap();

    assert_eq!(out.alpha, ENHANCE_ALPHA_DEFAULT);
    assert_abs_diff_eq!(out.volatility_cap.unwrap(), out.current.volatility, epsilon = 1e-12);
    assert!(out.enhanced.volatility <= out.current.volatility + 1e-6);
    assert!(out.recommendations.iter().all(|r| r.amount.is_none()));
  }

  #[test]
  fn rejects_foreign_weights_and_bad_amounts() {
    let (est, _) = lopsided();
    let foreign = WeightVector::new(
      vec!["LAG".to_string(), "CORE".to_string(), "OTHER".to_string()],
      vec![0.4, 0.3, 0.3],
    )
    .unwrap();
    let request = EnhanceRequest::new(foreign, None, None);
    assert!(optimize_enhance(&est, &request, &PortfolioEngineConfig::default()).is_err());

    let current = WeightVector::equal(est.tickers.clone()).unwrap();
    let request = EnhanceRequest::new(current, None, Some(-5.0));
    assert!(matches!(
      optimize_enhance(&est, &request, &PortfolioEngineConfig::default()),
      Err(EngineError::InvalidInput(_))
    ));
  }

  #[test]
  fn without_profile_blend_is_even_and_uncapped() {
    let (est, current) = lopsided();
    let request = EnhanceRequest::new(current, None, Some(10_000.0));
    let out = optimize_enhance(&est, &request, &PortfolioEngineConfig::default()).unwrap();

    assert_eq!(out.alpha, ENHANCE_ALPHA_DEFAULT);
    assert_eq!(out.volatility_cap, None);
    assert_abs_diff_eq!(
      out.enhanced.weights.weights().iter().sum::<f64>(),
      1.0,
      epsilon = 1e-6
    );
    for (ticker, change) in out.weight_changes.iter() {
      assert!(change.abs() <= MAX_WEIGHT_SHIFT + 1e-9, "{ticker} moved {change}");
    }
    assert_eq!(
      out.weight_changes.tickers().collect::<Vec<_>>(),
      est.tickers.iter().map(String::as_str).collect::<Vec<_>>()
    );
    assert!(out.recommendations.iter().all(|r| r.amount.is_some()));
  }

  #[test]
  fn single_instrument_is_returned_unchanged() {
    let est = CovarianceEstimate::from_moments(
      vec!["ONLY".into()],
      ndarray::array![0.07],
      ndarray::array![[0.04]],
      252,
    )
    .unwrap();
    let current = WeightVector::equal(est.tickers.clone()).unwrap();
    let profile = UserRiskProfile::new(RiskCategory::Moderate, 0.5).unwrap();
    let request = EnhanceRequest::new(current, Some(profile), None);
    let out = optimize_enhance(&est, &request, &PortfolioEngineConfig::default()).unwrap();

    assert_eq!(out.enhanced, out.current);
    assert_eq!(out.enhanced.iterations, 0);
    assert!(out.recommendations.is_empty());
    assert_eq!(out.weight_changes["ONLY"], 0.0);
  }

  #[test]
  fn riskless_instrument_does_not_break_enhance() {
    let est = CovarianceEstimate::from_moments(
      vec!["CASH".into(), "BOND".into(), "EQ".into()],
      ndarray::array![0.03, 0.08, 0.12],
      ndarray::array![[0.0, 0.0, 0.0], [0.0, 0.04, 0.01], [0.0, 0.01, 0.09]],
      252,
    )
    .unwrap();
    let current = WeightVector::new(est.tickers.clone(), vec![0.2, 0.4, 0.4]).unwrap();
    let profile = UserRiskProfile::new(RiskCategory::Moderate, 0.5).unwrap();
    for profile in [None, Some(profile)] {
      let request = EnhanceRequest::new(current.clone(), profile, None);
      match optimize_enhance(&est, &request, &PortfolioEngineConfig::default()) {
        Ok(out) => assert_abs_diff_eq!(
          out.enhanced.weights.weights().iter().sum::<f64>(),
          1.0,
          epsilon = 1e-6
        ),
        Err(err) => assert!(matches!(
          err,
          EngineError::DidNotConverge { .. } | EngineError::InvalidInput(_)
        )),
      }
    }
  }
}
