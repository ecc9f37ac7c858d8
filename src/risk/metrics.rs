//! # Return Statistics
//!
//! $$
//! \mathrm{VaR}_c = Q_{1-c}(r),\qquad
//! \mathrm{CVaR}_c = \mathbb E\left[r \mid r \le \mathrm{VaR}_c\right],\qquad
//! \mathrm{MDD} = \max_t \frac{P_t - W_t}{P_t}
//! $$
//!
//! Per-period return statistics shared by the single-asset and portfolio
//! reports. Dispersion-based figures that are undefined for a flat series come
//! back as `None`.
//!
//! Tail risk is estimated three ways at every configured confidence level:
//! from the empirical quantile, from a normal fit
//! ($\mathrm{CVaR}_c = \mu - \sigma\,\varphi(z_{1-c})/(1-c)$) and from a
//! seeded Monte Carlo sample of that normal fit.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Distribution;
use rand_distr::Normal as Gaussian;
use serde::Deserialize;
use serde::Serialize;
use statrs::distribution::Continuous;
use statrs::distribution::ContinuousCDF;
use statrs::distribution::Normal;
use statrs::statistics::Statistics;

use crate::error::EngineError;
use crate::error::Result;
use crate::portfolio::data::align_dated;

/// Sample standard deviation at or below which a series counts as flat.
pub(crate) const ZERO_DISPERSION: f64 = 1e-12;

/// Confidence levels of the headline VaR and CVaR fields.
pub const CONFIDENCE_95: f64 = 0.95;
pub const CONFIDENCE_99: f64 = 0.99;

/// Confidence levels, Monte Carlo draws and sampler seed of the tail table.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TailConfig {
  /// Each level must lie strictly between 0 and 1.
  pub confidence_levels: Vec<f64>,
  pub simulations: usize,
  pub seed: u64,
}

impl Default for TailConfig {
  fn default() -> Self {
    Self {
      confidence_levels: vec![0.90, CONFIDENCE_95, CONFIDENCE_99],
      simulations: 10_000,
      seed: 42,
    }
  }
}

impl TailConfig {
  fn validate(&self) -> Result<()> {
    if let Some(c) = self
      .confidence_levels
      .iter()
      .find(|c| !(c.is_finite() && **c > 0.0 && **c < 1.0))
    {
      return Err(EngineError::InvalidInput(format!(
        "confidence level must be in (0, 1), got {c}"
      )));
    }
    if self.simulations == 0 {
      return Err(EngineError::invalid("monte carlo simulations must be positive"));
    }
    Ok(())
  }
}

/// Map key of a confidence level, `0.95` becomes `"95%"`.
pub fn confidence_label(confidence: f64) -> String {
  format!("{}%", (confidence * 1e4).round() / 100.0)
}

/// VaR and CVaR at one confidence level as per-period signed returns.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TailEstimate {
  pub confidence: f64,
  pub historical_var: f64,
  pub historical_cvar: f64,
  pub parametric_var: f64,
  pub parametric_cvar: f64,
  pub monte_carlo_var: f64,
  pub monte_carlo_cvar: f64,
}

/// Coarse verdict on a return series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
  Low,
  Moderate,
  High,
}

impl RiskLevel {
  /// Points from volatility, Sharpe and drawdown; 6 or more is high, 3 or more moderate.
  pub fn classify(volatility: f64, sharpe: Option<f64>, max_drawdown: f64) -> Self {
    let mut score = 0;
    score += match volatility {
      v if v > 0.40 => 3,
      v if v > 0.25 => 2,
      v if v > 0.15 => 1,
      _ => 0,
    };
    // an undefined Sharpe earns no credit
    score += match sharpe.unwrap_or(0.0) {
      s if s < 0.5 => 2,
      s if s < 1.0 => 1,
      _ => 0,
    };
    score += match max_drawdown {
      d if d > 0.30 => 3,
      d if d > 0.20 => 2,
      d if d > 0.10 => 1,
      _ => 0,
    };

    match score {
      s if s >= 6 => RiskLevel::High,
      s if s >= 3 => RiskLevel::Moderate,
      _ => RiskLevel::Low,
    }
  }
}

/// Risk figures of one return series.
///
/// VaR, CVaR and drawdown are per-period signed returns (not annualized);
/// volatility, return and downside deviation are annualized.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RiskMetrics {
  pub observations: usize,
  pub start_date: Option<NaiveDate>,
  pub end_date: Option<NaiveDate>,
  pub annualized_return: f64,
  pub volatility: f64,
  /// `None` when the benchmark is flat or overlaps in fewer than two periods.
  pub beta: Option<f64>,
  /// `None` when the series is flat.
  pub sharpe: Option<f64>,
  pub var_95: f64,
  pub var_99: f64,
  pub cvar_95: f64,
  pub cvar_99: f64,
  pub parametric_var_95: f64,
  pub parametric_var_99: f64,
  /// Positive fraction of the running peak.
  pub max_drawdown: f64,
  /// `None` with exactly one losing period.
  pub downside_deviation: Option<f64>,
  pub skewness: Option<f64>,
  pub excess_kurtosis: Option<f64>,
  pub risk_level: RiskLevel,
  /// Every configured confidence level, keyed by [`confidence_label`].
  pub tail: BTreeMap<String, TailEstimate>,
}

impl RiskMetrics {
  /// Compute every figure for `returns`, with beta measured on the dates
  /// shared with `benchmark`.
  pub fn from_returns(
    returns: &[(NaiveDate, f64)],
    benchmark: &[(NaiveDate, f64)],
    periods_per_year: f64,
    risk_free: f64,
    tail: &TailConfig,
  ) -> Result<Self> {
    tail.validate()?;
    if returns.len() < 2 {
      return Err(EngineError::InsufficientHistory {
        required: 2,
        actual: returns.len(),
      });
    }
    let values: Vec<f64> = returns.iter().map(|&(_, r)| r).collect();

    let annual = periods_per_year.sqrt();
    let volatility = std_dev(&values) * annual;
    let sharpe = sharpe_ratio(&values, risk_free, periods_per_year);
    let var_95 = historical_var(&values, CONFIDENCE_95);
    let var_99 = historical_var(&values, CONFIDENCE_99);
    let max_drawdown = max_drawdown(&values);

    let (_, aligned) = align_dated(&[returns.to_vec(), benchmark.to_vec()]);
    let beta = match aligned.as_slice() {
      [asset, bench] => beta(asset, bench),
      _ => None,
    };

    Ok(Self {
      observations: values.len(),
      start_date: returns.first().map(|&(d, _)| d),
      end_date: returns.last().map(|&(d, _)| d),
      annualized_return: values.iter().mean() * periods_per_year,
      volatility,
      beta,
      sharpe,
      var_95,
      var_99,
      cvar_95: expected_shortfall(&values, var_95),
      cvar_99: expected_shortfall(&values, var_99),
      parametric_var_95: parametric_var(&values, CONFIDENCE_95),
      parametric_var_99: parametric_var(&values, CONFIDENCE_99),
      max_drawdown,
      downside_deviation: downside_deviation(&values, periods_per_year),
      skewness: skewness(&values),
      excess_kurtosis: excess_kurtosis(&values),
      risk_level: RiskLevel::classify(volatility, sharpe, max_drawdown),
      tail: tail_table(&values, tail),
    })
  }
}

fn tail_table(values: &[f64], config: &TailConfig) -> BTreeMap<String, TailEstimate> {
  let draws = simulate_normal(
    values.iter().mean(),
    std_dev(values),
    config.simulations,
    config.seed,
  );
  config
    .confidence_levels
    .iter()
    .map(|&confidence| {
      let empirical = historical_var(values, confidence);
      let simulated = historical_var(&draws, confidence);
      let estimate = TailEstimate {
        confidence,
        historical_var: empirical,
        historical_cvar: expected_shortfall(values, empirical),
        parametric_var: parametric_var(values, confidence),
        parametric_cvar: parametric_cvar(values, confidence),
        monte_carlo_var: simulated,
        monte_carlo_cvar: expected_shortfall(&draws, simulated),
      };
      (confidence_label(confidence), estimate)
    })
    .collect()
}

/// `simulations` draws from `N(mean, sd)`; identical for identical inputs.
pub fn simulate_normal(mean: f64, sd: f64, simulations: usize, seed: u64) -> Vec<f64> {
  let mut rng = StdRng::seed_from_u64(seed);
  match Gaussian::new(mean, sd) {
    Ok(normal) => (0..simulations).map(|_| normal.sample(&mut rng)).collect(),
    Err(_) => vec![mean; simulations],
  }
}

fn std_dev(values: &[f64]) -> f64 {
  if values.len() < 2 {
    return 0.0;
  }
  values.iter().std_dev()
}

/// Linear interpolation between closest ranks, `q` in `[0, 1]`.
pub fn percentile(values: &[f64], q: f64) -> f64 {
  if values.is_empty() {
    return f64::NAN;
  }
  let mut sorted = values.to_vec();
  sorted.sort_by(f64::total_cmp);
  let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
  let lo = pos.floor() as usize;
  let hi = pos.ceil() as usize;
  sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
}

/// `(1 - confidence)` quantile of the return distribution.
pub fn historical_var(values: &[f64], confidence: f64) -> f64 {
  percentile(values, 1.0 - confidence)
}

/// Mean of the returns at or below `var`.
pub fn expected_shortfall(values: &[f64], var: f64) -> f64 {
  let tail: Vec<f64> = values.iter().copied().filter(|&r| r <= var).collect();
  if tail.is_empty() {
    return var;
  }
  tail.iter().mean()
}

/// `mean + z_{1-c} * std` under a normal fit.
pub fn parametric_var(values: &[f64], confidence: f64) -> f64 {
  let mean = values.iter().mean();
  match Normal::new(0.0, 1.0) {
    Ok(standard) => mean + standard.inverse_cdf(1.0 - confidence) * std_dev(values),
    Err(_) => mean,
  }
}

/// `mean - std * pdf(z) / (1 - c)` with `z` the `1 - c` normal quantile.
pub fn parametric_cvar(values: &[f64], confidence: f64) -> f64 {
  let mean = values.iter().mean();
  match Normal::new(0.0, 1.0) {
    Ok(standard) => {
      let z = standard.inverse_cdf(1.0 - confidence);
      mean - std_dev(values) * standard.pdf(z) / (1.0 - confidence)
    }
    Err(_) => mean,
  }
}

/// Largest decline from the running peak of compounded wealth, starting from 1.
pub fn max_drawdown(values: &[f64]) -> f64 {
  let mut wealth = 1.0;
  let mut peak = 1.0_f64;
  let mut worst = 0.0_f64;
  for r in values {
    wealth *= 1.0 + r;
    peak = peak.max(wealth);
    if peak > 0.0 {
      worst = worst.max((peak - wealth) / peak);
    }
  }
  worst
}

/// `sqrt(P) * mean(r - rf / P) / std(r)`
pub fn sharpe_ratio(values: &[f64], risk_free: f64, periods_per_year: f64) -> Option<f64> {
  let sd = std_dev(values);
  if sd <= ZERO_DISPERSION {
    return None;
  }
  let excess = values.iter().mean() - risk_free / periods_per_year;
  Some(periods_per_year.sqrt() * excess / sd)
}

/// `Cov(asset, benchmark) / Var(benchmark)` over paired observations.
pub fn beta(asset: &[f64], benchmark: &[f64]) -> Option<f64> {
  if asset.len() != benchmark.len() || asset.len() < 2 {
    return None;
  }
  let var = benchmark.iter().variance();
  if var.sqrt() <= ZERO_DISPERSION {
    return None;
  }
  Some(asset.iter().covariance(benchmark.iter()) / var)
}

/// Annualized sample standard deviation of the losing periods.
pub fn downside_deviation(values: &[f64], periods_per_year: f64) -> Option<f64> {
  let losses: Vec<f64> = values.iter().copied().filter(|&r| r < 0.0).collect();
  match losses.len() {
    0 => Some(0.0),
    1 => None,
    _ => Some(losses.iter().std_dev() * periods_per_year.sqrt()),
  }
}

/// Central moments `(m2, m3, m4)` with divisor `n`.
fn central_moments(values: &[f64]) -> (f64, f64, f64) {
  let n = values.len() as f64;
  let mean = values.iter().mean();
  values.iter().fold((0.0, 0.0, 0.0), |(m2, m3, m4), &x| {
    let d = x - mean;
    (m2 + d * d / n, m3 + d.powi(3) / n, m4 + d.powi(4) / n)
  })
}

/// Adjusted Fisher-Pearson skewness `G1`.
pub fn skewness(values: &[f64]) -> Option<f64> {
  let n = values.len() as f64;
  if values.len() < 3 {
    return None;
  }
  let (m2, m3, _) = central_moments(values);
  if m2.sqrt() <= ZERO_DISPERSION {
    return None;
  }
  let g1 = m3 / m2.powf(1.5);
  Some(g1 * (n * (n - 1.0)).sqrt() / (n - 2.0))
}

/// Bias-corrected excess kurtosis `G2`.
pub fn excess_kurtosis(values: &[f64]) -> Option<f64> {
  let n = values.len() as f64;
  if values.len() < 4 {
    return None;
  }
  let (m2, _, m4) = central_moments(values);
  if m2.sqrt() <= ZERO_DISPERSION {
    return None;
  }
  let g2 = m4 / (m2 * m2) - 3.0;
  Some(((n + 1.0) * g2 + 6.0) * (n - 1.0) / ((n - 2.0) * (n - 3.0)))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;
  use crate::testing::business_days;
  use crate::testing::correlated_returns;

  fn dated(values: &[f64]) -> Vec<(NaiveDate, f64)> {
    business_days(values.len()).into_iter().zip(values.iter().copied()).collect()
  }

  #[test]
  fn percentile_interpolates_between_ranks() {
    let values = [5.0, 1.0, 4.0, 2.0, 3.0];
    assert_abs_diff_eq!(percentile(&values, 0.0), 1.0);
    assert_abs_diff_eq!(percentile(&values, 0.5), 3.0);
    assert_abs_diff_eq!(percentile(&values, 0.1), 1.4, epsilon = 1e-12);
    assert_abs_diff_eq!(percentile(&values, 1.0), 5.0);
  }

  #[test]
  fn var_99_is_deeper_than_var_95() {
    let sample = correlated_returns(5, 500, &[0.08], &[0.25], 0.0);
    let returns = &sample[0];
    let var_95 = historical_var(returns, CONFIDENCE_95);
    let var_99 = historical_var(returns, CONFIDENCE_99);
    assert!(var_99 < var_95);
    assert!(expected_shortfall(returns, var_95) <= var_95);
    assert!(expected_shortfall(returns, var_99) <= var_99);
    assert!(parametric_var(returns, CONFIDENCE_99) < parametric_var(returns, CONFIDENCE_95));
  }

  #[test]
  fn drawdown_is_measured_from_running_peak() {
    // wealth 1.1, 0.88, 0.968, 0.484
    let dd = max_drawdown(&[0.1, -0.2, 0.1, -0.5]);
    assert_abs_diff_eq!(dd, 1.0 - 0.484 / 1.1, epsilon = 1e-12);
    assert_eq!(max_drawdown(&[0.01, 0.02, 0.0]), 0.0);
    assert_abs_diff_eq!(max_drawdown(&[-0.1, 0.05]), 0.1, epsilon = 1e-12);
  }

  #[test]
  fn flat_benchmark_leaves_beta_undefined() {
    let asset = dated(&[0.01, -0.02, 0.015, 0.0, 0.005]);
    let flat = dated(&[0.0; 5]);
    let metrics = RiskMetrics::from_returns(&asset, &flat, 252.0, 0.02, &TailConfig::default()).unwrap();
    assert_eq!(metrics.beta, None);
    assert!(metrics.sharpe.is_some());
    assert_eq!(metrics.observations, 5);

    let metrics = RiskMetrics::from_returns(&flat, &asset, 252.0, 0.02, &TailConfig::default()).unwrap();
    assert_eq!(metrics.sharpe, None);
    assert_eq!(metrics.beta, Some(0.0));
    assert_eq!(metrics.volatility, 0.0);
    assert_eq!(metrics.skewness, None);
  }

  #[test]
  fn beta_of_scaled_series() {
    let bench = [0.01, -0.02, 0.015, 0.0, 0.005, -0.01];
    let asset: Vec<f64> = bench.iter().map(|r| 1.5 * r).collect();
    assert_abs_diff_eq!(beta(&asset, &bench).unwrap(), 1.5, epsilon = 1e-12);
  }

  #[test]
  fn sharpe_uses_per_period_risk_free() {
    let values = [0.01, -0.005, 0.002, 0.004];
    let mean = values.iter().sum::<f64>() / 4.0;
    let sd = std_dev(&values);
    let expected = 252.0_f64.sqrt() * (mean - 0.02 / 252.0) / sd;
    assert_abs_diff_eq!(sharpe_ratio(&values, 0.02, 252.0).unwrap(), expected, epsilon = 1e-12);
  }

  #[test]
  fn symmetric_series_has_no_skew() {
    let values = [-2.0, -1.0, 0.0, 1.0, 2.0];
    assert_abs_diff_eq!(skewness(&values).unwrap(), 0.0, epsilon = 1e-12);
    // uniform-like sample is platykurtic
    assert!(excess_kurtosis(&values).unwrap() < 0.0);
    assert_eq!(skewness(&[1.0, 2.0]), None);
  }

  #[test]
  fn downside_deviation_needs_two_losses() {
    assert_eq!(downside_deviation(&[0.01, 0.02], 252.0), Some(0.0));
    assert_eq!(downside_deviation(&[0.01, -0.02], 252.0), None);
    assert!(downside_deviation(&[-0.01, -0.03, 0.02], 252.0).unwrap() > 0.0);
  }

  #[test]
  fn risk_level_thresholds() {
    assert_eq!(RiskLevel::classify(0.10, Some(1.2), 0.05), RiskLevel::Low);
    assert_eq!(RiskLevel::classify(0.20, Some(0.8), 0.15), RiskLevel::Moderate);
    assert_eq!(RiskLevel::classify(0.45, Some(0.3), 0.35), RiskLevel::High);
    assert_eq!(RiskLevel::classify(0.0, None, 0.0), RiskLevel::Low);
  }

  #[test]
  fn too_short_series_is_rejected() {
    let one = dated(&[0.01]);
    assert!(matches!(
      RiskMetrics::from_returns(&one, &one, 252.0, 0.02, &TailConfig::default()),
      Err(EngineError::InsufficientHistory { required: 2, actual: 1 })
    ));
  }

  #[test]
  fn normal_cvar_matches_closed_form() {
    let values = [0.01, -0.02, 0.015, -0.005, 0.0, 0.02, -0.01];
    let mean = values.iter().sum::<f64>() / 7.0;
    let sd = std_dev(&values);
    // phi(-1.6449) / 0.05
    assert_abs_diff_eq!(
      parametric_cvar(&values, 0.95),
      mean - sd * 2.062_712_8,
      epsilon = 1e-6
    );
    assert!(parametric_cvar(&values, 0.95) < parametric_var(&values, 0.95));
  }

  #[test]
  fn tail_table_covers_every_level() {
    let returns = dated(&correlated_returns(11, 750, &[0.08], &[0.2], 0.0)[0]);
    let metrics =
      RiskMetrics::from_returns(&returns, &returns, 252.0, 0.02, &TailConfig::default()).unwrap();

    let labels: Vec<&str> = metrics.tail.keys().map(String::as_str).collect();
    assert_eq!(labels, vec!["90%", "95%", "99%"]);
    let t95 = metrics.tail["95%"];
    assert_eq!(t95.historical_var, metrics.var_95);
    assert_eq!(t95.historical_cvar, metrics.cvar_95);
    assert_eq!(t95.parametric_var, metrics.parametric_var_95);
    // 10k draws of the normal fit land near its closed form
    assert_abs_diff_eq!(t95.monte_carlo_var, t95.parametric_var, epsilon = 0.1 * t95.parametric_var.abs());
    assert_abs_diff_eq!(t95.monte_carlo_cvar, t95.parametric_cvar, epsilon = 0.1 * t95.parametric_cvar.abs());
    assert!(metrics.tail["99%"].monte_carlo_var < metrics.tail["90%"].monte_carlo_var);
  }

  #[test]
  fn seeded_simulation_is_reproducible() {
    assert_eq!(simulate_normal(0.0, 0.01, 500, 3), simulate_normal(0.0, 0.01, 500, 3));
    assert_ne!(simulate_normal(0.0, 0.01, 500, 3), simulate_normal(0.0, 0.01, 500, 4));
    assert_eq!(simulate_normal(0.002, 0.0, 4, 3), vec![0.002; 4]);
  }

  #[test]
  fn tail_settings_are_validated() {
    let returns = dated(&[0.01, -0.02, 0.015]);
    let bad_level = TailConfig {
      confidence_levels: vec![0.95, 1.0],
      ..TailConfig::default()
    };
    assert!(matches!(
      RiskMetrics::from_returns(&returns, &returns, 252.0, 0.02, &bad_level),
      Err(EngineError::InvalidInput(_))
    ));
    let no_draws = TailConfig {
      simulations: 0,
      ..TailConfig::default()
    };
    assert!(RiskMetrics::from_returns(&returns, &returns, 252.0, 0.02, &no_draws).is_err());
    assert_eq!(confidence_label(0.995), "99.5%");
  }
}
