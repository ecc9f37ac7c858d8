//! # Portfolio Types
//!
//! $$
//! \mathbf{w}\in\Delta^N=\{\mathbf w : w_i\ge 0,\ \textstyle\sum_i w_i=1\}
//! $$
//!
//! Weight vectors, operating modes and the per-mode result containers.

use std::collections::HashSet;
use std::ops::Index;

use impl_new_derive::ImplNew;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use serde::ser::SerializeMap;
use serde::Serialize;
use serde::Serializer;

use super::objectives::portfolio_stats;
use crate::error::EngineError;
use crate::error::ModeKind;
use crate::error::Result;
use crate::risk::UserRiskProfile;

/// Admissible deviation of a weight sum from 1.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Long-only, fully invested allocation keyed by ticker.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightVector {
  tickers: Vec<String>,
  weights: Vec<f64>,
}

impl WeightVector {
  pub fn new(tickers: Vec<String>, weights: Vec<f64>) -> Result<Self> {
    if tickers.is_empty() {
      return Err(EngineError::invalid("weight vector must not be empty"));
    }
    if tickers.len() != weights.len() {
      return Err(EngineError::InvalidInput(format!(
        "{} tickers but {} weights",
        tickers.len(),
        weights.len()
      )));
    }
    let mut seen = HashSet::new();
    for t in &tickers {
      if !seen.insert(t.as_str()) {
        return Err(EngineError::InvalidInput(format!("duplicate ticker {t} in weight vector")));
      }
    }
    for (t, &w) in tickers.iter().zip(&weights) {
      if !w.is_finite() || !(0.0..=1.0).contains(&w) {
        return Err(EngineError::InvalidInput(format!(
          "weight for {t} must be in [0, 1], got {w}"
        )));
      }
    }
    let total: f64 = weights.iter().sum();
    if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
      return Err(EngineError::InvalidInput(format!("weights sum to {total}, expected 1")));
    }
    Ok(Self { tickers, weights })
  }

  /// `1/N` on every ticker.
  pub fn equal(tickers: Vec<String>) -> Result<Self> {
    let n = tickers.len().max(1);
    let weights = vec![1.0 / n as f64; tickers.len()];
    Self::new(tickers, weights)
  }

  /// Wrap a solver output, removing round-off outside the simplex.
  pub(crate) fn from_solution(tickers: Vec<String>, weights: Vec<f64>) -> Self {
    let clipped: Vec<f64> = weights.iter().map(|w| w.clamp(0.0, 1.0)).collect();
    let total: f64 = clipped.iter().sum();
    let weights = if total > 0.0 {
      clipped.iter().map(|w| (w / total).min(1.0)).collect()
    } else {
      clipped
    };
    Self { tickers, weights }
  }

  pub fn tickers(&self) -> &[String] {
    &self.tickers
  }

  pub fn weights(&self) -> &[f64] {
    &self.weights
  }

  pub fn len(&self) -> usize {
    self.weights.len()
  }

  pub fn is_empty(&self) -> bool {
    self.weights.is_empty()
  }

  pub fn get(&self, ticker: &str) -> Option<f64> {
    self
      .tickers
      .iter()
      .position(|t| t == ticker)
      .map(|i| self.weights[i])
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
    self
      .tickers
      .iter()
      .map(String::as_str)
      .zip(self.weights.iter().copied())
  }

  /// Weights reordered to `tickers`, which must name exactly the same instruments.
  pub fn aligned_to(&self, tickers: &[String]) -> Result<Vec<f64>> {
    if tickers.len() != self.tickers.len() {
      return Err(EngineError::InvalidInput(format!(
        "weight vector covers {} tickers, basket has {}",
        self.tickers.len(),
        tickers.len()
      )));
    }
    tickers
      .iter()
      .map(|t| {
        self
          .get(t)
          .ok_or_else(|| EngineError::InvalidInput(format!("no weight given for {t}")))
      })
      .collect()
  }

  /// Herfindahl concentration `sum(w_i^2)`.
  pub fn herfindahl(&self) -> f64 {
    self.weights.iter().map(|w| w * w).sum()
  }
}

impl Serialize for WeightVector {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_map(self.iter())
  }
}

/// Per-ticker values in basket order, serialized as a ticker-keyed map.
#[derive(Clone, Debug, PartialEq)]
pub struct TickerMap<V> {
  entries: Vec<(String, V)>,
}

impl<V> TickerMap<V> {
  pub fn get(&self, ticker: &str) -> Option<&V> {
    self.entries.iter().find(|(t, _)| t == ticker).map(|(_, v)| v)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn tickers(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|(t, _)| t.as_str())
  }

  pub fn values(&self) -> impl Iterator<Item = &V> {
    self.entries.iter().map(|(_, v)| v)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
    self.entries.iter().map(|(t, v)| (t.as_str(), v))
  }
}

impl<V> FromIterator<(String, V)> for TickerMap<V> {
  fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
    Self {
      entries: iter.into_iter().collect(),
    }
  }
}

impl<V> Index<&str> for TickerMap<V> {
  type Output = V;

  fn index(&self, ticker: &str) -> &V {
    match self.get(ticker) {
      Some(v) => v,
      None => panic!("no entry for ticker {ticker}"),
    }
  }
}

impl<V: Serialize> Serialize for TickerMap<V> {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_map(self.iter())
  }
}

/// Output of a portfolio optimization run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PortfolioResult {
  /// Final portfolio weights.
  pub weights: WeightVector,
  /// Model expected portfolio return (annualized).
  pub expected_return: f64,
  /// Model portfolio volatility (annualized).
  pub volatility: f64,
  /// `(expected_return - risk_free) / volatility`, 0 for a riskless portfolio.
  pub sharpe: f64,
  /// Solver iterations spent; 0 when no solve was needed.
  pub iterations: usize,
}

impl PortfolioResult {
  pub(crate) fn evaluate(
    weights: WeightVector,
    mean: &Array1<f64>,
    covariance: &Array2<f64>,
    risk_free: f64,
    iterations: usize,
  ) -> Self {
    let (expected_return, volatility, sharpe) =
      portfolio_stats(mean, covariance, weights.weights(), risk_free);
    Self {
      weights,
      expected_return,
      volatility,
      sharpe,
      iterations,
    }
  }
}

/// One sample of the efficient frontier.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FrontierPoint {
  pub expected_return: f64,
  pub volatility: f64,
}

/// Return correlation matrix, serialized as a map of maps.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrelationMatrix {
  pub tickers: Vec<String>,
  pub values: Array2<f64>,
}

impl CorrelationMatrix {
  pub fn get(&self, a: &str, b: &str) -> Option<f64> {
    let i = self.tickers.iter().position(|t| t == a)?;
    let j = self.tickers.iter().position(|t| t == b)?;
    Some(self.values[[i, j]])
  }
}

struct CorrelationRow<'a> {
  tickers: &'a [String],
  values: ArrayView1<'a, f64>,
}

impl Serialize for CorrelationRow<'_> {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_map(self.tickers.iter().zip(self.values.iter()))
  }
}

impl Serialize for CorrelationMatrix {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.tickers.len()))?;
    for (i, ticker) in self.tickers.iter().enumerate() {
      map.serialize_entry(
        ticker,
        &CorrelationRow {
          tickers: &self.tickers,
          values: self.values.row(i),
        },
      )?;
    }
    map.end()
  }
}

/// Incremental improvement of an existing allocation.
#[derive(Clone, Debug, ImplNew)]
pub struct EnhanceRequest {
  pub current: WeightVector,
  pub profile: Option<UserRiskProfile>,
  pub investable_amount: Option<f64>,
}

/// Move an allocation into the volatility band of a risk profile.
#[derive(Clone, Debug, ImplNew)]
pub struct RebalanceRequest {
  pub current: WeightVector,
  pub profile: UserRiskProfile,
  /// Minimum number of positions holding at least the position floor.
  pub min_positions: Option<usize>,
  pub investable_amount: Option<f64>,
}

/// Optimizer operating mode with the inputs each one needs.
#[derive(Clone, Debug)]
pub enum OptimizationMode {
  Full { target_return: Option<f64> },
  Enhance(EnhanceRequest),
  Rebalance(RebalanceRequest),
}

impl OptimizationMode {
  pub fn kind(&self) -> ModeKind {
    match self {
      OptimizationMode::Full { .. } => ModeKind::Full,
      OptimizationMode::Enhance(_) => ModeKind::Enhance,
      OptimizationMode::Rebalance(_) => ModeKind::Rebalance,
    }
  }
}

/// Full mode output.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FullOptimization {
  pub max_sharpe: PortfolioResult,
  pub min_volatility: PortfolioResult,
  pub target_return: Option<PortfolioResult>,
  /// Converged frontier samples in order of increasing target return.
  pub efficient_frontier: Vec<FrontierPoint>,
  /// Frontier targets whose solve did not converge.
  pub frontier_dropped: usize,
  pub individual_returns: TickerMap<f64>,
  pub correlation: CorrelationMatrix,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
  Increase,
  Decrease,
}

/// Suggested change to one position of an enhanced allocation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Recommendation {
  pub ticker: String,
  pub action: Action,
  pub current_weight: f64,
  pub target_weight: f64,
  /// Absolute weight change in percentage points.
  pub change_pct: f64,
  /// Currency amount to move, when an investable amount was supplied.
  pub amount: Option<f64>,
  pub rationale: String,
}

/// Enhance mode output.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Enhancement {
  pub current: PortfolioResult,
  pub enhanced: PortfolioResult,
  /// Sharpe weight of the blended objective.
  pub alpha: f64,
  pub volatility_cap: Option<f64>,
  /// `enhanced - current` per ticker.
  pub weight_changes: TickerMap<f64>,
  pub return_change: f64,
  pub sharpe_change: f64,
  pub volatility_change: f64,
  pub recommendations: Vec<Recommendation>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
  Buy,
  Sell,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Trade {
  pub ticker: String,
  pub current_weight: f64,
  pub target_weight: f64,
  /// Signed weight change in percentage points.
  pub change_pct: f64,
  pub side: TradeSide,
  pub amount: Option<f64>,
}

/// Rebalance mode output.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Rebalancing {
  pub profile: UserRiskProfile,
  pub target_volatility: f64,
  pub current: PortfolioResult,
  pub rebalanced: PortfolioResult,
  pub alignment_before: f64,
  pub alignment_after: f64,
  /// Ordered by absolute weight change, largest first.
  pub trades: Vec<Trade>,
}

/// Result of one optimizer invocation, tagged by mode.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OptimizationResult {
  Full(FullOptimization),
  Enhance(Enhancement),
  Rebalance(Rebalancing),
}

impl OptimizationResult {
  pub fn mode(&self) -> ModeKind {
    match self {
      OptimizationResult::Full(_) => ModeKind::Full,
      OptimizationResult::Enhance(_) => ModeKind::Enhance,
      OptimizationResult::Rebalance(_) => ModeKind::Rebalance,
    }
  }
}

#[cfg(test)]
mod tests {
  use ndarray::array;

  use super::*;

  fn tickers(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn weight_vector_validation() {
    assert!(WeightVector::new(tickers(&["A", "B"]), vec![0.5, 0.5]).is_ok());
    assert!(WeightVector::new(tickers(&["A", "B"]), vec![0.5, 0.4]).is_err());
    assert!(WeightVector::new(tickers(&["A", "B"]), vec![1.2, -0.2]).is_err());
    assert!(WeightVector::new(tickers(&["A", "A"]), vec![0.5, 0.5]).is_err());
    assert!(WeightVector::new(tickers(&["A"]), vec![0.5, 0.5]).is_err());
    assert!(WeightVector::new(Vec::new(), Vec::new()).is_err());
    assert!(WeightVector::new(tickers(&["A", "B"]), vec![0.5, 0.5 + 5e-7]).is_ok());
  }

  #[test]
  fn aligns_by_ticker() {
    let w = WeightVector::new(tickers(&["B", "A"]), vec![0.25, 0.75]).unwrap();
    assert_eq!(w.aligned_to(&tickers(&["A", "B"])).unwrap(), vec![0.75, 0.25]);
    assert!(w.aligned_to(&tickers(&["A", "C"])).is_err());
    assert!(w.aligned_to(&tickers(&["A"])).is_err());
  }

  #[test]
  fn solver_output_is_snapped_to_simplex() {
    let w = WeightVector::from_solution(tickers(&["A", "B", "C"]), vec![0.5, 0.5 + 1e-13, -1e-15]);
    assert_eq!(w.weights()[2], 0.0);
    assert!((w.weights().iter().sum::<f64>() - 1.0).abs() < 1e-15);
  }

  #[test]
  fn serializes_as_nested_maps() {
    let w = WeightVector::new(tickers(&["B", "A"]), vec![0.25, 0.75]).unwrap();
    assert_eq!(serde_json::to_string(&w).unwrap(), r#"{"B":0.25,"A":0.75}"#);

    let corr = CorrelationMatrix {
      tickers: tickers(&["A", "B"]),
      values: array![[1.0, 0.5], [0.5, 1.0]],
    };
    assert_eq!(
      serde_json::to_string(&corr).unwrap(),
      r#"{"A":{"A":1.0,"B":0.5},"B":{"A":0.5,"B":1.0}}"#
    );
    assert_eq!(corr.get("B", "A"), Some(0.5));
  }

  #[test]
  fn ticker_map_keeps_basket_order() {
    let map: TickerMap<f64> = vec![("ZZZ".to_string(), 0.1), ("AAA".to_string(), 0.2)]
      .into_iter()
      .collect();
    assert_eq!(serde_json::to_string(&map).unwrap(), r#"{"ZZZ":0.1,"AAA":0.2}"#);
    assert_eq!(map["AAA"], 0.2);
    assert_eq!(map.get("BBB"), None);
    assert_eq!(map.tickers().collect::<Vec<_>>(), vec!["ZZZ", "AAA"]);
  }
}
