//! # Risk Reports
//!
//! $$
//! N_{\text{eff}} = \frac{1}{\sum_i w_i^2},\qquad
//! c_i = \frac{w_i\,(\Sigma\mathbf w)_i}{\mathbf w^\top\Sigma\mathbf w}
//! $$
//!
//! Structured single-asset and portfolio reports together with the
//! portfolio-only sections: risk contributions, diversification, alignment
//! with a risk profile and VaR in currency terms.

use ndarray::aview1;
use ndarray::Array2;
use serde::Serialize;

use super::metrics::RiskMetrics;
use super::metrics::ZERO_DISPERSION;
use super::profile::RiskCategory;
use super::profile::UserRiskProfile;
use super::profile::VolatilityBand;
use crate::portfolio::TickerMap;
use crate::portfolio::WeightVector;

/// Largest single weight above which a portfolio is highly concentrated.
pub const HIGH_CONCENTRATION: f64 = 0.40;
/// Largest single weight above which a portfolio is moderately concentrated.
pub const MODERATE_CONCENTRATION: f64 = 0.25;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssetRiskReport {
  pub ticker: String,
  pub benchmark: String,
  pub metrics: RiskMetrics,
}

/// Share of portfolio risk attributed to one holding, in percent.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RiskContribution {
  pub weight: f64,
  /// Annualized volatility of the holding on its own.
  pub volatility: f64,
  /// `w_i * sigma_i / sigma_p`
  pub standalone_pct: f64,
  /// Euler allocation; sums to 100 across holdings.
  pub component_pct: f64,
}

/// Per-ticker contributions from annualized covariance `covariance`.
pub(crate) fn risk_contributions(
  tickers: &[String],
  weights: &[f64],
  covariance: &Array2<f64>,
) -> TickerMap<RiskContribution> {
  let sigma_w = covariance.dot(&aview1(weights));
  let variance = aview1(weights).dot(&sigma_w).max(0.0);
  let volatility = variance.sqrt();
  let riskless = volatility <= ZERO_DISPERSION;

  tickers
    .iter()
    .enumerate()
    .map(|(i, ticker)| {
      let w = weights[i];
      let own = covariance[[i, i]].max(0.0).sqrt();
      let (standalone_pct, component_pct) = if riskless {
        (0.0, 0.0)
      } else {
        (w * own / volatility * 100.0, w * sigma_w[i] / variance * 100.0)
      };
      (
        ticker.clone(),
        RiskContribution {
          weight: w,
          volatility: own,
          standalone_pct,
          component_pct,
        },
      )
    })
    .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcentrationTier {
  Low,
  Moderate,
  High,
}

impl ConcentrationTier {
  pub fn from_largest_weight(weight: f64) -> Self {
    if weight > HIGH_CONCENTRATION {
      ConcentrationTier::High
    } else if weight > MODERATE_CONCENTRATION {
      ConcentrationTier::Moderate
    } else {
      ConcentrationTier::Low
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Diversification {
  pub herfindahl: f64,
  pub effective_positions: f64,
  /// `100 * (N_eff - 1) / (N - 1)`, 0 for a single holding.
  pub score: f64,
  pub largest_weight: f64,
  pub concentration: ConcentrationTier,
}

impl Diversification {
  pub fn of(weights: &WeightVector) -> Self {
    let herfindahl = weights.herfindahl();
    let effective_positions = 1.0 / herfindahl;
    let n = weights.len();
    let score = if n > 1 {
      ((effective_positions - 1.0) / (n - 1) as f64 * 100.0).clamp(0.0, 100.0)
    } else {
      0.0
    };
    let largest_weight = weights.weights().iter().copied().fold(0.0, f64::max);

    Self {
      herfindahl,
      effective_positions,
      score,
      largest_weight,
      concentration: ConcentrationTier::from_largest_weight(largest_weight),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentVerdict {
  Aligned,
  TooConservative,
  TooAggressive,
}

/// Realized volatility against the band of a risk category.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RiskAlignment {
  pub category: RiskCategory,
  pub band: VolatilityBand,
  pub volatility: f64,
  pub verdict: AlignmentVerdict,
  /// Directional hint when the portfolio sits outside the band.
  pub adjustment: Option<String>,
}

impl RiskAlignment {
  pub fn assess(profile: &UserRiskProfile, volatility: f64) -> Self {
    let band = profile.band();
    let (verdict, adjustment) = if band.contains(volatility) {
      (AlignmentVerdict::Aligned, None)
    } else if volatility < band.lower {
      let hint = if volatility <= ZERO_DISPERSION {
        format!(
          "portfolio shows no measurable volatility; add risk assets to reach the {:.0}-{:.0}% band",
          band.lower * 100.0,
          band.upper * 100.0
        )
      } else {
        format!(
          "increase equity allocation by {:.1}% to reach the {:.0}% lower bound",
          (band.lower / volatility - 1.0) * 100.0,
          band.lower * 100.0
        )
      };
      (AlignmentVerdict::TooConservative, Some(hint))
    } else {
      (
        AlignmentVerdict::TooAggressive,
        Some(format!(
          "reduce equity allocation by {:.1}% to stay under the {:.0}% upper bound",
          (1.0 - band.upper / volatility) * 100.0,
          band.upper * 100.0
        )),
      )
    };

    Self {
      category: profile.category(),
      band,
      volatility,
      verdict,
      adjustment,
    }
  }
}

/// VaR figures restated as amounts at risk on the invested capital.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VarInterpretation {
  pub investable_amount: f64,
  pub holding_period_days: u32,
  pub loss_95: f64,
  pub loss_99: f64,
  /// Average loss on the worst 5% of periods.
  pub expected_shortfall_95: f64,
  pub statements: Vec<String>,
}

impl VarInterpretation {
  /// Losses scale with the square root of the holding period.
  pub fn describe(metrics: &RiskMetrics, investable_amount: f64, holding_period_days: u32) -> Self {
    let horizon = f64::from(holding_period_days.max(1));
    let scale = investable_amount * horizon.sqrt();
    let loss = |r: f64| (-r).max(0.0) * scale;
    let loss_95 = loss(metrics.var_95);
    let loss_99 = loss(metrics.var_99);
    let expected_shortfall_95 = loss(metrics.cvar_95);
    let period = match holding_period_days.max(1) {
      1 => "1 day".to_string(),
      d => format!("{d} days"),
    };

    let statements = vec![
      format!("5% chance of losing more than {loss_95:.2} over {period}"),
      format!("1% chance of losing more than {loss_99:.2} over {period}"),
      format!("in the worst 5% of cases the average loss is {expected_shortfall_95:.2} over {period}"),
    ];

    Self {
      investable_amount,
      holding_period_days: holding_period_days.max(1),
      loss_95,
      loss_99,
      expected_shortfall_95,
      statements,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PortfolioRiskReport {
  pub weights: WeightVector,
  pub benchmark: String,
  pub profile: UserRiskProfile,
  pub metrics: RiskMetrics,
  pub contributions: TickerMap<RiskContribution>,
  pub diversification: Diversification,
  pub alignment: RiskAlignment,
  pub var_interpretation: VarInterpretation,
}
