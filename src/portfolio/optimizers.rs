//! # Full Markowitz Optimization
//!
//! $$
//! \max_{\mathbf w\in\Delta^N}\frac{\mathbf w^\top\mu-r_f}{\sqrt{\mathbf w^\top\Sigma\mathbf w}},\qquad
//! \min_{\mathbf w\in\Delta^N}\mathbf w^\top\Sigma\mathbf w\ \ \text{s.t.}\ \mathbf w^\top\mu=r^\*
//! $$
//!
//! Max-Sharpe and min-volatility allocations, an optional target-return
//! allocation and the efficient frontier between the lowest and highest
//! single-asset mean return.

use argmin::core::CostFunction;
use argmin::core::Gradient;
use ndarray::Array1;
use rayon::prelude::*;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::data::CovarianceEstimate;
use super::engine::PortfolioEngineConfig;
use super::objectives::portfolio_stats;
use super::objectives::NegativeSharpe;
use super::objectives::Variance;
use super::solver::minimize;
use super::solver::Bounds;
use super::solver::Constraint;
use super::solver::SolveError;
use super::solver::Solution;
use super::solver::SolverConfig;
use super::types::CorrelationMatrix;
use super::types::FrontierPoint;
use super::types::FullOptimization;
use super::types::PortfolioResult;
use super::types::TickerMap;
use super::types::WeightVector;
use crate::error::EngineError;
use crate::error::ModeKind;
use crate::error::Result;

/// Run the solver and surface any failure as a typed error of `mode`.
pub(crate) fn solve<O>(
  problem: &O,
  x0: &[f64],
  bounds: &Bounds,
  constraints: &[Constraint<'_>],
  config: &SolverConfig,
  mode: ModeKind,
  objective: &'static str,
) -> Result<Solution>
where
  O: CostFunction<Param = Vec<f64>, Output = f64> + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
{
  match minimize(problem, x0, bounds, constraints, config) {
    Ok(solution) => {
      debug!(%mode, objective, iterations = solution.iterations, cost = solution.cost, "solver converged");
      Ok(solution)
    }
    Err(SolveError::NotConverged { iterations }) => {
      warn!(%mode, objective, iterations, "solver did not converge");
      Err(EngineError::DidNotConverge {
        mode,
        objective,
        iterations,
      })
    }
    Err(SolveError::Infeasible) => Err(EngineError::InvalidInput(format!(
      "{mode} constraints admit no fully invested long-only allocation for {objective}"
    ))),
    Err(SolveError::Evaluation(err)) => {
      warn!(%mode, objective, error = %err, "objective evaluation failed");
      Err(EngineError::DidNotConverge {
        mode,
        objective,
        iterations: 0,
      })
    }
  }
}

/// Max-Sharpe, min-volatility, optional target-return portfolio and frontier.
pub fn optimize_full(
  estimate: &CovarianceEstimate,
  target_return: Option<f64>,
  config: &PortfolioEngineConfig,
) -> Result<FullOptimization> {
  let n = estimate.n_assets();
  let mean = &estimate.mean;
  let cov = &estimate.covariance;
  let rf = config.risk_free;
  let (lo, hi) = return_range(mean);

  if let Some(target) = target_return {
    if !target.is_finite() || target < lo - 1e-12 || target > hi + 1e-12 {
      return Err(EngineError::InvalidInput(format!(
        "target return {target} outside achievable range [{lo}, {hi}]"
      )));
    }
  }

  let individual_returns: TickerMap<f64> = estimate
    .tickers
    .iter()
    .cloned()
    .zip(mean.iter().copied())
    .collect();
  let correlation = CorrelationMatrix {
    tickers: estimate.tickers.clone(),
    values: estimate.correlation.clone(),
  };

  if n == 1 {
    let only = PortfolioResult::evaluate(
      WeightVector::from_solution(estimate.tickers.clone(), vec![1.0]),
      mean,
      cov,
      rf,
      0,
    );
    let point = FrontierPoint {
      expected_return: only.expected_return,
      volatility: only.volatility,
    };
    return Ok(FullOptimization {
      max_sharpe: only.clone(),
      min_volatility: only.clone(),
      target_return: target_return.map(|_| only),
      efficient_frontier: if config.frontier_points > 0 {
        vec![point]
      } else {
        Vec::new()
      },
      frontier_dropped: 0,
      individual_returns,
      correlation,
    });
  }

  info!(instruments = n, periods = estimate.periods, "full optimization");
  let x0 = vec![1.0 / n as f64; n];
  let bounds = Bounds::unit(n);
  let result = |s: Solution| {
    PortfolioResult::evaluate(
      WeightVector::from_solution(estimate.tickers.clone(), s.weights),
      mean,
      cov,
      rf,
      s.iterations,
    )
  };

  let sharpe = NegativeSharpe {
    mean,
    covariance: cov,
    risk_free: rf,
  };
  let max_sharpe = result(solve(
    &sharpe,
    &x0,
    &bounds,
    &[],
    &config.solver,
    ModeKind::Full,
    "max_sharpe",
  )?);

  let variance = Variance { covariance: cov };
  let min_volatility = result(solve(
    &variance,
    &x0,
    &bounds,
    &[],
    &config.solver,
    ModeKind::Full,
    "min_volatility",
  )?);

  let target_result = match target_return {
    Some(target) => {
      let constraint = [Constraint::TargetReturn { mean, target }];
      Some(result(solve(
        &variance,
        &x0,
        &bounds,
        &constraint,
        &config.solver,
        ModeKind::Full,
        "target_return",
      )?))
    }
    None => None,
  };

  let targets = frontier_targets(lo, hi, config.frontier_points);
  let sample = |target: f64| -> Option<FrontierPoint> {
    let constraint = [Constraint::TargetReturn { mean, target }];
    match minimize(&variance, &x0, &bounds, &constraint, &config.solver) {
      Ok(s) => {
        let (expected_return, volatility, _) = portfolio_stats(mean, cov, &s.weights, rf);
        Some(FrontierPoint {
          expected_return,
          volatility,
        })
      }
      Err(err) => {
        debug!(target, ?err, "dropping frontier sample");
        None
      }
    }
  };
  let samples: Vec<Option<FrontierPoint>> = if config.parallel_frontier {
    targets.into_par_iter().map(sample).collect()
  } else {
    targets.into_iter().map(sample).collect()
  };
  let requested = samples.len();
  let efficient_frontier: Vec<FrontierPoint> = samples.into_iter().flatten().collect();
  let frontier_dropped = requested - efficient_frontier.len();
  if frontier_dropped > 0 {
    warn!(frontier_dropped, requested, "frontier samples did not converge");
  }

  Ok(FullOptimization {
    max_sharpe,
    min_volatility,
    target_return: target_result,
    efficient_frontier,
    frontier_dropped,
    individual_returns,
    correlation,
  })
}

fn return_range(mean: &Array1<f64>) -> (f64, f64) {
  mean
    .iter()
    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &m| {
      (lo.min(m), hi.max(m))
    })
}

/// `points` targets evenly spaced over `[lo, hi]`.
fn frontier_targets(lo: f64, hi: f64, points: usize) -> Vec<f64> {
  match points {
    0 => Vec::new(),
    1 => vec![lo],
    _ => Array1::linspace(lo, hi, points).to_vec(),
  }
}
