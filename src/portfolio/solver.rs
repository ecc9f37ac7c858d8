//! # Constrained Solver
//!
//! $$
//! \min_{\mathbf{w}} f(\mathbf{w}) \quad \text{s.t.}\quad \mathbf{1}^\top\mathbf{w}=1,\;
//! \ell \le \mathbf{w} \le u,\; h(\mathbf{w})=0,\; g(\mathbf{w})\le 0
//! $$
//!
//! Spectral projected gradient over the bounded simplex, wrapped in an augmented
//! Lagrangian loop for the extra equality/inequality constraints. Objectives are
//! plain argmin `CostFunction + Gradient` problems. Iterates never leave the
//! bounded simplex, so every returned vector is feasible for the box and budget.

use argmin::core::CostFunction;
use argmin::core::Gradient;
use ndarray::aview1;
use ndarray::Array1;
use ndarray::Array2;
use serde::Deserialize;

/// Iteration budgets and tolerances.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
  /// Projected-gradient iterations per subproblem.
  pub max_iterations: usize,
  /// Multiplier updates of the augmented Lagrangian.
  pub max_outer_iterations: usize,
  /// Projected-gradient norm at which a subproblem counts as solved.
  pub tolerance: f64,
  /// Admissible constraint violation.
  pub constraint_tolerance: f64,
}

impl Default for SolverConfig {
  fn default() -> Self {
    Self {
      max_iterations: 5000,
      max_outer_iterations: 30,
      tolerance: 1e-9,
      constraint_tolerance: 1e-7,
    }
  }
}

/// Per-weight bounds intersected with the budget constraint `sum(w) = 1`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Bounds {
  lower: Vec<f64>,
  upper: Vec<f64>,
}

impl Bounds {
  /// Long-only, fully invested.
  pub(crate) fn unit(n: usize) -> Self {
    Self {
      lower: vec![0.0; n],
      upper: vec![1.0; n],
    }
  }

  /// Each weight within `band` of `center`, clamped to `[0, 1]`.
  pub(crate) fn around(center: &[f64], band: f64) -> Self {
    Self {
      lower: center.iter().map(|c| (c - band).max(0.0)).collect(),
      upper: center.iter().map(|c| (c + band).min(1.0)).collect(),
    }
  }

  /// Raise the lower bound of the given positions to `floor`.
  pub(crate) fn with_floor(mut self, positions: &[usize], floor: f64) -> Self {
    for &i in positions {
      self.lower[i] = self.lower[i].max(floor);
      self.upper[i] = self.upper[i].max(self.lower[i]);
    }
    self
  }

  pub(crate) fn is_feasible(&self) -> bool {
    let ordered = self
      .lower
      .iter()
      .zip(&self.upper)
      .all(|(l, u)| l.is_finite() && u.is_finite() && l <= u);
    ordered
      && self.lower.iter().sum::<f64>() <= 1.0 + 1e-12
      && self.upper.iter().sum::<f64>() >= 1.0 - 1e-12
  }

  /// Euclidean projection onto `{w : sum(w) = 1, lower <= w <= upper}`.
  ///
  /// The projection is `clamp(v - tau)` for the shift `tau` that restores the budget;
  /// `tau` is found by bisection. Bounds must be feasible.
  pub(crate) fn project(&self, v: &[f64]) -> Vec<f64> {
    let shifted = |tau: f64| -> Vec<f64> {
      v.iter()
        .zip(self.lower.iter().zip(&self.upper))
        .map(|(x, (&l, &u))| (x - tau).clamp(l, u))
        .collect()
    };
    let total = |tau: f64| shifted(tau).iter().sum::<f64>();

    // total(lo) = sum(upper) >= 1, total(hi) = sum(lower) <= 1
    let mut lo = v
      .iter()
      .zip(&self.upper)
      .map(|(x, u)| x - u)
      .fold(f64::INFINITY, f64::min)
      - 1.0;
    let mut hi = v
      .iter()
      .zip(&self.lower)
      .map(|(x, l)| x - l)
      .fold(f64::NEG_INFINITY, f64::max)
      + 1.0;

    for _ in 0..200 {
      let mid = 0.5 * (lo + hi);
      if mid <= lo || mid >= hi {
        break;
      }
      if total(mid) > 1.0 {
        lo = mid;
      } else {
        hi = mid;
      }
    }

    let mut w = shifted(0.5 * (lo + hi));
    // Spread the residual of the bisection over coordinates strictly inside their bounds.
    let residual = 1.0 - w.iter().sum::<f64>();
    let free: Vec<usize> = (0..w.len())
      .filter(|&i| w[i] > self.lower[i] && w[i] < self.upper[i])
      .collect();
    if !free.is_empty() && residual != 0.0 {
      let share = residual / free.len() as f64;
      for i in free {
        w[i] = (w[i] + share).clamp(self.lower[i], self.upper[i]);
      }
    }
    w
  }
}

/// Constraint beyond the bounded simplex.
#[derive(Clone, Debug)]
pub(crate) enum Constraint<'a> {
  /// `w'mu = target`
  TargetReturn { mean: &'a Array1<f64>, target: f64 },
  /// `sqrt(w' Sigma w) <= cap`
  MaxVolatility {
    covariance: &'a Array2<f64>,
    cap: f64,
  },
  /// `sqrt(w' Sigma w) >= floor`
  MinVolatility {
    covariance: &'a Array2<f64>,
    floor: f64,
  },
}

impl Constraint<'_> {
  fn is_equality(&self) -> bool {
    matches!(self, Constraint::TargetReturn { .. })
  }

  fn value(&self, w: &[f64]) -> f64 {
    match self {
      Constraint::TargetReturn { mean, target } => mean.dot(&aview1(w)) - target,
      Constraint::MaxVolatility { covariance, cap } => volatility(covariance, w) - cap,
      Constraint::MinVolatility { covariance, floor } => floor - volatility(covariance, w),
    }
  }

  fn gradient(&self, w: &[f64]) -> Vec<f64> {
    match self {
      Constraint::TargetReturn { mean, .. } => mean.to_vec(),
      Constraint::MaxVolatility { covariance, .. } => volatility_gradient(covariance, w, 1.0),
      Constraint::MinVolatility { covariance, .. } => volatility_gradient(covariance, w, -1.0),
    }
  }

  /// Amount by which the constraint is violated at `w`.
  fn violation(&self, w: &[f64]) -> f64 {
    let v = self.value(w);
    if self.is_equality() {
      v.abs()
    } else {
      v.max(0.0)
    }
  }
}

fn volatility(covariance: &Array2<f64>, w: &[f64]) -> f64 {
  let w = aview1(w);
  w.dot(&covariance.dot(&w)).max(0.0).sqrt()
}

/// `sign * Sigma w / sigma`, zero at riskless portfolios.
fn volatility_gradient(covariance: &Array2<f64>, w: &[f64], sign: f64) -> Vec<f64> {
  let wv = aview1(w);
  let sigma_w = covariance.dot(&wv);
  let vol = wv.dot(&sigma_w).max(0.0).sqrt();
  if vol > 1e-12 {
    (sigma_w * (sign / vol)).to_vec()
  } else {
    vec![0.0; w.len()]
  }
}

/// Converged minimizer.
#[derive(Clone, Debug)]
pub(crate) struct Solution {
  pub weights: Vec<f64>,
  pub cost: f64,
  pub iterations: usize,
}

#[derive(Debug)]
pub(crate) enum SolveError {
  /// Bounds leave no fully invested long-only vector.
  Infeasible,
  /// Iteration budget exhausted or constraints still violated.
  NotConverged { iterations: usize },
  /// The objective failed to evaluate or produced a non-finite value.
  Evaluation(argmin::core::Error),
}

/// PHR augmented Lagrangian of `problem` for fixed multipliers and penalty.
struct AugmentedLagrangian<'p, 'c, O> {
  problem: &'p O,
  constraints: &'c [Constraint<'c>],
  multipliers: &'c [f64],
  rho: f64,
}

impl<O> CostFunction for AugmentedLagrangian<'_, '_, O>
where
  O: CostFunction<Param = Vec<f64>, Output = f64>,
{
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
    let mut total = self.problem.cost(w)?;
    for (c, &m) in self.constraints.iter().zip(self.multipliers) {
      let v = c.value(w);
      total += if c.is_equality() {
        m * v + 0.5 * self.rho * v * v
      } else {
        ((m + self.rho * v).max(0.0).powi(2) - m * m) / (2.0 * self.rho)
      };
    }
    Ok(total)
  }
}

impl<O> Gradient for AugmentedLagrangian<'_, '_, O>
where
  O: Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
{
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, w: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
    let mut g = self.problem.gradient(w)?;
    for (c, &m) in self.constraints.iter().zip(self.multipliers) {
      let v = c.value(w);
      let scale = if c.is_equality() {
        m + self.rho * v
      } else {
        (m + self.rho * v).max(0.0)
      };
      if scale != 0.0 {
        for (gi, ci) in g.iter_mut().zip(c.gradient(w)) {
          *gi += scale * ci;
        }
      }
    }
    Ok(g)
  }
}

/// Minimize `problem` over the bounded simplex subject to `constraints`, starting at `x0`.
pub(crate) fn minimize<O>(
  problem: &O,
  x0: &[f64],
  bounds: &Bounds,
  constraints: &[Constraint<'_>],
  config: &SolverConfig,
) -> Result<Solution, SolveError>
where
  O: CostFunction<Param = Vec<f64>, Output = f64> + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
{
  if !bounds.is_feasible() {
    return Err(SolveError::Infeasible);
  }

  let mut w = bounds.project(x0);
  let mut multipliers = vec![0.0; constraints.len()];
  let mut rho = 10.0;
  let mut previous_violation = f64::INFINITY;
  let mut iterations = 0;

  for _ in 0..config.max_outer_iterations.max(1) {
    let lagrangian = AugmentedLagrangian {
      problem,
      constraints,
      multipliers: &multipliers,
      rho,
    };
    let inner = projected_gradient(&lagrangian, &w, bounds, config)?;
    iterations += inner.iterations;
    w = inner.weights;
    if !inner.converged {
      return Err(SolveError::NotConverged { iterations });
    }

    let violation = constraints
      .iter()
      .map(|c| c.violation(&w))
      .fold(0.0, f64::max);
    if violation <= config.constraint_tolerance {
      let cost = problem.cost(&w).map_err(SolveError::Evaluation)?;
      return Ok(Solution {
        weights: w,
        cost,
        iterations,
      });
    }

    for (m, c) in multipliers.iter_mut().zip(constraints) {
      let v = c.value(&w);
      *m = if c.is_equality() {
        *m + rho * v
      } else {
        (*m + rho * v).max(0.0)
      };
    }
    if violation > 0.25 * previous_violation {
      rho = (rho * 10.0).min(1e10);
    }
    previous_violation = violation;
  }

  Err(SolveError::NotConverged { iterations })
}

struct InnerOutcome {
  weights: Vec<f64>,
  iterations: usize,
  converged: bool,
}

const ARMIJO: f64 = 1e-4;
const MIN_LINE_STEP: f64 = 1e-12;
const MIN_SPECTRAL_STEP: f64 = 1e-10;
const MAX_SPECTRAL_STEP: f64 = 1e10;

fn evaluate<O>(problem: &O, w: &Vec<f64>) -> Result<(f64, Vec<f64>), SolveError>
where
  O: CostFunction<Param = Vec<f64>, Output = f64> + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
{
  let f = problem.cost(w).map_err(SolveError::Evaluation)?;
  let g = problem.gradient(w).map_err(SolveError::Evaluation)?;
  if !f.is_finite() || g.iter().any(|x| !x.is_finite()) {
    return Err(SolveError::Evaluation(argmin::core::Error::msg(
      "objective is not finite at the current iterate",
    )));
  }
  Ok((f, g))
}

fn step_towards(w: &[f64], direction: &[f64], t: f64) -> Vec<f64> {
  w.iter().zip(direction).map(|(x, d)| x + t * d).collect()
}

fn inf_norm(v: impl Iterator<Item = f64>) -> f64 {
  v.fold(0.0, |acc, x| acc.max(x.abs()))
}

/// Spectral (Barzilai-Borwein) projected gradient with monotone Armijo backtracking.
///
/// A subproblem is solved once the projected-gradient norm reaches the tolerance, or
/// once no step along the projected direction decreases the cost any further.
fn projected_gradient<O>(
  problem: &O,
  x0: &[f64],
  bounds: &Bounds,
  config: &SolverConfig,
) -> Result<InnerOutcome, SolveError>
where
  O: CostFunction<Param = Vec<f64>, Output = f64> + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
{
  let mut w = bounds.project(x0);
  let (mut f, mut g) = evaluate(problem, &w)?;
  let mut spectral = 1.0;

  for k in 0..config.max_iterations {
    let unit = bounds.project(&step_towards(&w, &g, -1.0));
    let pg_norm = inf_norm(unit.iter().zip(&w).map(|(a, b)| a - b));
    if pg_norm <= config.tolerance {
      return Ok(InnerOutcome {
        weights: w,
        iterations: k,
        converged: true,
      });
    }

    let trial = bounds.project(&step_towards(&w, &g, -spectral));
    let direction: Vec<f64> = trial.iter().zip(&w).map(|(a, b)| a - b).collect();
    let slope: f64 = g.iter().zip(&direction).map(|(a, b)| a * b).sum();

    let mut t = 1.0;
    let accepted = loop {
      let candidate = step_towards(&w, &direction, t);
      if let Ok(fc) = problem.cost(&candidate) {
        if fc.is_finite() && fc <= f + ARMIJO * t * slope {
          break Some((candidate, fc));
        }
      }
      t *= 0.5;
      if t < MIN_LINE_STEP {
        break None;
      }
    };

    let Some((w_next, f_next)) = accepted else {
      return Ok(InnerOutcome {
        weights: w,
        iterations: k,
        converged: true,
      });
    };
    let (_, g_next) = evaluate(problem, &w_next)?;

    let s: Vec<f64> = w_next.iter().zip(&w).map(|(a, b)| a - b).collect();
    let y: Vec<f64> = g_next.iter().zip(&g).map(|(a, b)| a - b).collect();
    let sy: f64 = s.iter().zip(&y).map(|(a, b)| a * b).sum();
    let ss: f64 = s.iter().map(|a| a * a).sum();
    spectral = if sy > 0.0 {
      (ss / sy).clamp(MIN_SPECTRAL_STEP, MAX_SPECTRAL_STEP)
    } else {
      MAX_SPECTRAL_STEP
    };

    let decrease = f - f_next;
    let moved = inf_norm(s.into_iter());
    w = w_next;
    f = f_next;
    g = g_next;

    if moved <= 1e-15 || decrease <= 1e-16 * (1.0 + f.abs()) {
      return Ok(InnerOutcome {
        weights: w,
        iterations: k + 1,
        converged: true,
      });
    }
  }

  Ok(InnerOutcome {
    weights: w,
    iterations: config.max_iterations,
    converged: false,
  })
}
