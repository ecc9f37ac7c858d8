//! # User Risk Profile
//!
//! $$
//! \sigma^\* = \sigma_{\text{lo}} + s\,(\sigma_{\text{hi}}-\sigma_{\text{lo}}),\qquad s\in[0,1]
//! $$
//!
//! Risk category, normalized risk score and the annualized volatility band a
//! category maps to.

use std::fmt::Display;
use std::str::FromStr;

use serde::Serialize;

use crate::error::EngineError;
use crate::error::Result;

/// Risk appetite declared by the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
  Conservative,
  Moderate,
  Aggressive,
}

impl RiskCategory {
  /// Fixed mapping from category to target volatility band.
  pub fn band(&self) -> VolatilityBand {
    match self {
      RiskCategory::Conservative => VolatilityBand {
        lower: 0.10,
        upper: 0.14,
      },
      RiskCategory::Moderate => VolatilityBand {
        lower: 0.12,
        upper: 0.18,
      },
      RiskCategory::Aggressive => VolatilityBand {
        lower: 0.18,
        upper: 0.25,
      },
    }
  }
}

impl Display for RiskCategory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RiskCategory::Conservative => write!(f, "conservative"),
      RiskCategory::Moderate => write!(f, "moderate"),
      RiskCategory::Aggressive => write!(f, "aggressive"),
    }
  }
}

impl FromStr for RiskCategory {
  type Err = EngineError;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "conservative" => Ok(RiskCategory::Conservative),
      "moderate" => Ok(RiskCategory::Moderate),
      "aggressive" => Ok(RiskCategory::Aggressive),
      other => Err(EngineError::InvalidInput(format!("unknown risk category {other:?}"))),
    }
  }
}

/// Annualized volatility band.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct VolatilityBand {
  pub lower: f64,
  pub upper: f64,
}

impl VolatilityBand {
  pub fn width(&self) -> f64 {
    self.upper - self.lower
  }

  pub fn contains(&self, volatility: f64) -> bool {
    volatility >= self.lower && volatility <= self.upper
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct UserRiskProfile {
  category: RiskCategory,
  score: f64,
}

impl UserRiskProfile {
  /// `score` must lie in `[0, 1]`.
  pub fn new(category: RiskCategory, score: f64) -> Result<Self> {
    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
      return Err(EngineError::InvalidInput(format!(
        "risk score must be in [0, 1], got {score}"
      )));
    }
    Ok(Self { category, score })
  }

  pub fn category(&self) -> RiskCategory {
    self.category
  }

  pub fn score(&self) -> f64 {
    self.score
  }

  pub fn band(&self) -> VolatilityBand {
    self.category.band()
  }

  /// Point inside the band selected by the score.
  pub fn target_volatility(&self) -> f64 {
    let band = self.band();
    band.lower + self.score * band.width()
  }
}
