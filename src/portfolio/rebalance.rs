//! # Rebalance Mode
//!
//! $$
//! \min_{\mathbf w\in\Delta^N}\ \bigl|\sigma_p(\mathbf w)-\sigma^\*\bigr|-0.1\,\mathbf w^\top\mu
//! $$
//!
//! Moves an allocation to the target volatility of a risk profile, preferring
//! higher return among allocations that match it equally well. The objective is
//! solved as its two smooth pieces, below and above the target, each under the
//! matching volatility constraint; the better of the two is kept.

use argmin::core::CostFunction;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::data::CovarianceEstimate;
use super::engine::PortfolioEngineConfig;
use super::enhance::validate_amount;
use super::objectives::VolatilitySide;
use super::objectives::VolatilityTarget;
use super::solver::minimize;
use super::solver::Bounds;
use super::solver::Constraint;
use super::solver::SolveError;
use super::solver::Solution;
use super::types::PortfolioResult;
use super::types::RebalanceRequest;
use super::types::Rebalancing;
use super::types::Trade;
use super::types::TradeSide;
use super::types::WeightVector;
use crate::error::EngineError;
use crate::error::ModeKind;
use crate::error::Result;

/// Weight on portfolio return in the rebalance objective.
pub const RETURN_TIEBREAK: f64 = 0.1;
/// Weight a position needs to count towards `min_positions`. The bound is
/// inclusive: a weight of exactly 5% counts, as the floored re-solve leaves
/// positions sitting on it.
pub const POSITION_FLOOR: f64 = 0.05;
/// Alignment score points lost per unit of volatility gap.
pub const ALIGNMENT_SCORE_SCALE: f64 = 1000.0;
/// Weight changes below this produce no trade.
pub const MIN_TRADE_SHIFT: f64 = 0.001;

/// `max(0, 100 - 1000 * |volatility - target|)`
pub fn alignment_score(volatility: f64, target: f64) -> f64 {
  (100.0 - ALIGNMENT_SCORE_SCALE * (volatility - target).abs()).max(0.0)
}

fn held_positions(weights: &[f64]) -> usize {
  weights.iter().filter(|&&w| w >= POSITION_FLOOR - 1e-12).count()
}

/// Minimize the volatility-target objective over `bounds` from `x0`.
fn solve_target(
  estimate: &CovarianceEstimate,
  target: f64,
  x0: &[f64],
  bounds: &Bounds,
  config: &PortfolioEngineConfig,
) -> Result<Solution> {
  let mean = &estimate.mean;
  let covariance = &estimate.covariance;
  let exact = VolatilityTarget {
    mean,
    covariance,
    target,
    tiebreak: RETURN_TIEBREAK,
    side: None,
  };

  let mut best: Option<(f64, Solution)> = None;
  let mut spent = 0;
  for side in [VolatilitySide::Below, VolatilitySide::Above] {
    let branch = VolatilityTarget {
      side: Some(side),
      ..exact
    };
    let constraint = match side {
      VolatilitySide::Below => Constraint::MaxVolatility {
        covariance,
        cap: target,
      },
      VolatilitySide::Above => Constraint::MinVolatility {
        covariance,
        floor: target,
      },
    };
    // A target outside the reachable volatility range leaves one side empty.
    match minimize(&branch, x0, bounds, &[constraint], &config.solver) {
      Ok(solution) => {
        spent += solution.iterations;
        let cost = exact.cost(&solution.weights).unwrap_or(f64::INFINITY);
        debug!(?side, cost, iterations = solution.iterations, "volatility branch solved");
        if best.as_ref().map_or(true, |(b, _)| cost < *b) {
          best = Some((cost, solution));
        }
      }
      Err(SolveError::NotConverged { iterations }) => {
        spent += iterations;
        debug!(?side, iterations, "volatility branch did not converge");
      }
      Err(SolveError::Infeasible) => {
        return Err(EngineError::invalid(
          "position floors admit no fully invested long-only allocation",
        ));
      }
      Err(SolveError::Evaluation(err)) => {
        debug!(?side, %err, "volatility branch failed to evaluate");
      }
    }
  }

  match best {
    Some((_, mut solution)) => {
      solution.iterations = spent;
      Ok(solution)
    }
    None => {
      warn!(target, iterations = spent, "no volatility branch converged");
      Err(EngineError::DidNotConverge {
        mode: ModeKind::Rebalance,
        objective: "target_volatility",
        iterations: spent,
      })
    }
  }
}

/// Indices of the `k` largest weights, ties broken by position.
fn largest(weights: &[f64], k: usize) -> Vec<usize> {
  let mut order: Vec<usize> = (0..weights.len()).collect();
  order.sort_by(|&a, &b| weights[b].total_cmp(&weights[a]));
  order.truncate(k);
  order
}

pub fn optimize_rebalance(
  estimate: &CovarianceEstimate,
  request: &RebalanceRequest,
  config: &PortfolioEngineConfig,
) -> Result<Rebalancing> {
  validate_amount(request.investable_amount)?;
  let n = estimate.n_assets();
  let mean = &estimate.mean;
  let cov = &estimate.covariance;
  let rf = config.risk_free;

  if let Some(k) = request.min_positions {
    if k == 0 || k > n || k as f64 * POSITION_FLOOR > 1.0 + 1e-12 {
      return Err(EngineError::InvalidInput(format!(
        "min_positions must be between 1 and {} for {n} instruments, got {k}",
        n.min((1.0 / POSITION_FLOOR).round() as usize)
      )));
    }
  }

  let w0 = request.current.aligned_to(&estimate.tickers)?;
  let current = PortfolioResult::evaluate(
    WeightVector::from_solution(estimate.tickers.clone(), w0.clone()),
    mean,
    cov,
    rf,
    0,
  );
  let target_volatility = request.profile.target_volatility();
  info!(
    instruments = n,
    category = %request.profile.category(),
    target_volatility,
    current_volatility = current.volatility,
    "rebalance optimization"
  );

  let rebalanced = if n == 1 {
    current.clone()
  } else {
    let mut solution = solve_target(estimate, target_volatility, &w0, &Bounds::unit(n), config)?;

    if let Some(k) = request.min_positions {
      let held = held_positions(&solution.weights);
      if held < k {
        let keep = largest(&solution.weights, k);
        debug!(held, required = k, ?keep, "re-solving with position floor");
        let floored = solve_target(
          estimate,
          target_volatility,
          &solution.weights,
          &Bounds::unit(n).with_floor(&keep, POSITION_FLOOR),
          config,
        )?;
        solution.iterations += floored.iterations;
        solution.weights = floored.weights;
      }
    }

    PortfolioResult::evaluate(
      WeightVector::from_solution(estimate.tickers.clone(), solution.weights),
      mean,
      cov,
      rf,
      solution.iterations,
    )
  };

  let mut trades: Vec<Trade> = w0
    .iter()
    .zip(rebalanced.weights.weights())
    .zip(&estimate.tickers)
    .filter_map(|((&old, &new), ticker)| {
      let delta = new - old;
      (delta.abs() >= MIN_TRADE_SHIFT).then(|| Trade {
        ticker: ticker.clone(),
        current_weight: old,
        target_weight: new,
        change_pct: delta * 100.0,
        side: if delta > 0.0 {
          TradeSide::Buy
        } else {
          TradeSide::Sell
        },
        amount: request.investable_amount.map(|a| delta.abs() * a),
      })
    })
    .collect();
  trades.sort_by(|a, b| b.change_pct.abs().total_cmp(&a.change_pct.abs()));

  Ok(Rebalancing {
    profile: request.profile,
    target_volatility,
    alignment_before: alignment_score(current.volatility, target_volatility),
    alignment_after: alignment_score(rebalanced.volatility, target_volatility),
    current,
    rebalanced,
    trades,
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;
  use crate::portfolio::data::estimate;
  use crate::portfolio::data::EstimatorConfig;
  use crate::risk::RiskCategory;
  use crate::risk::UserRiskProfile;
  use crate::testing::synthetic_basket;

  fn high_vol_book() -> (CovarianceEstimate, WeightVector) {
    let series = synthetic_basket(
      23,
      252,
      &["HI", "MID", "LO"],
      &[0.15, 0.10, 0.04],
      &[0.35, 0.25, 0.06],
      0.3,
    );
    let est = estimate(&series, &EstimatorConfig::default()).unwrap();
    let current = WeightVector::new(est.tickers.clone(), vec![0.7, 0.2, 0.1]).unwrap();
    (est, current)
  }

  #[test]
  fn conservative_profile_pulls_volatility_to_lower_bound() {
    let (est, current) = high_vol_book();
    let profile = UserRiskProfile::new(RiskCategory::Conservative, 0.0).unwrap();
    let request = RebalanceRequest::new(current, profile, None, Some(50_000.0));
    let out = optimize_rebalance(&est, &request, &PortfolioEngineConfig::default()).unwrap();

    assert_abs_diff_eq!(out.target_volatility, 0.10);
    assert!(out.rebalanced.volatility < out.current.volatility);
    assert!((out.rebalanced.volatility - 0.10).abs() < 0.01);
    assert!(out.alignment_after > out.alignment_before);
    assert_abs_diff_eq!(
      out.rebalanced.weights.weights().iter().sum::<f64>(),
      1.0,
      epsilon = 1e-6
    );

    assert!(out
      .trades
      .windows(2)
      .all(|w| w[0].change_pct.abs() >= w[1].change_pct.abs()));
    let hi = out.trades.iter().find(|t| t.ticker == "HI").unwrap();
    assert_eq!(hi.side, TradeSide::Sell);
    assert_abs_diff_eq!(hi.amount.unwrap(), hi.change_pct.abs() / 100.0 * 50_000.0, epsilon = 1e-6);
  }

  #[test]
  fn minimum_positions_are_enforced() {
    // B alone sits on the target and C only loses money, so the unconstrained
    // solution holds a single position.
    let est = CovarianceEstimate::from_moments(
      vec!["A".into(), "B".into(), "C".into()],
      array![0.05, 0.06, -0.05],
      array![[0.01, 0.0, 0.0], [0.0, 0.0144, 0.0], [0.0, 0.0, 0.09]],
      252,
    )
    .unwrap();
    let profile = UserRiskProfile::new(RiskCategory::Conservative, 0.5).unwrap();
    let current = WeightVector::equal(est.tickers.clone()).unwrap();

    let request = RebalanceRequest::new(current.clone(), profile, None, None);
    let free = optimize_rebalance(&est, &request, &PortfolioEngineConfig::default()).unwrap();
    assert_abs_diff_eq!(free.rebalanced.volatility, 0.12, epsilon = 1e-5);
    assert_eq!(held_positions(free.rebalanced.weights.weights()), 1);

    let request = RebalanceRequest::new(current.clone(), profile, Some(3), None);
    let out = optimize_rebalance(&est, &request, &PortfolioEngineConfig::default()).unwrap();
    assert!(out.rebalanced.iterations >= free.rebalanced.iterations);
    assert!(out
      .rebalanced
      .weights
      .weights()
      .iter()
      .all(|&w| w >= POSITION_FLOOR - 1e-9));

    let request = RebalanceRequest::new(current, profile, Some(4), None);
    assert!(matches!(
      optimize_rebalance(&est, &request, &PortfolioEngineConfig::default()),
      Err(EngineError::InvalidInput(_))
    ));
  }

  #[test]
  fn alignment_score_is_clamped() {
    assert_abs_diff_eq!(alignment_score(0.12, 0.12), 100.0);
    assert_abs_diff_eq!(alignment_score(0.13, 0.12), 90.0, epsilon = 1e-9);
    assert_eq!(alignment_score(0.40, 0.12), 0.0);
  }

  #[test]
  fn ranks_largest_positions_first() {
    assert_eq!(largest(&[0.1, 0.6, 0.1, 0.2], 3), vec![1, 3, 0]);
    assert_eq!(held_positions(&[0.05, 0.049, 0.9]), 2);
  }

  #[test]
  fn single_instrument_needs_no_trades() {
    let est = CovarianceEstimate::from_moments(
      vec!["ONLY".into()],
      array![0.07],
      array![[0.04]],
      252,
    )
    .unwrap();
    let current = WeightVector::equal(est.tickers.clone()).unwrap();
    let profile = UserRiskProfile::new(RiskCategory::Conservative, 0.0).unwrap();
    let request = RebalanceRequest::new(current, profile, Some(1), Some(1_000.0));
    let out = optimize_rebalance(&est, &request, &PortfolioEngineConfig::default()).unwrap();

    assert_eq!(out.rebalanced, out.current);
    assert_eq!(out.rebalanced.iterations, 0);
    assert!(out.trades.is_empty());
    assert_abs_diff_eq!(out.alignment_before, 0.0);
  }

  #[test]
  fn riskless_instrument_does_not_break_rebalance() {
    let est = CovarianceEstimate::from_moments(
      vec!["CASH".into(), "BOND".into(), "EQ".into()],
      array![0.03, 0.08, 0.12],
      array![[0.0, 0.0, 0.0], [0.0, 0.04, 0.01], [0.0, 0.01, 0.09]],
      252,
    )
    .unwrap();
    let current = WeightVector::new(est.tickers.clone(), vec![0.1, 0.3, 0.6]).unwrap();
    let profile = UserRiskProfile::new(RiskCategory::Moderate, 0.5).unwrap();
    for min_positions in [None, Some(3)] {
      let request = RebalanceRequest::new(current.clone(), profile, min_positions, None);
      match optimize_rebalance(&est, &request, &PortfolioEngineConfig::default()) {
        Ok(out) => {
          assert_abs_diff_eq!(
            out.rebalanced.weights.weights().iter().sum::<f64>(),
            1.0,
            epsilon = 1e-6
          );
          assert!(out.rebalanced.volatility.is_finite());
        }
        Err(err) => assert!(matches!(
          err,
          EngineError::DidNotConverge { .. } | EngineError::InvalidInput(_)
        )),
      }
    }
  }
}
