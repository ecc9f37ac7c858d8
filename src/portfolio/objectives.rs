//! # Objectives
//!
//! $$
//! \sigma_p^2=\mathbf w^\top\Sigma\mathbf w,\qquad
//! S(\mathbf w)=\frac{\mathbf w^\top\mu-r_f}{\sigma_p}
//! $$
//!
//! Cost functions of the three optimizer modes with analytic (sub)gradients.

use argmin::core::CostFunction;
use argmin::core::Gradient;
use ndarray::aview1;
use ndarray::Array1;
use ndarray::Array2;

/// Volatility below which a portfolio is treated as riskless.
pub(crate) const RISKLESS_VOLATILITY: f64 = 1e-12;

/// `(return, volatility, sharpe)` of `w`; sharpe is 0 for a riskless portfolio.
pub(crate) fn portfolio_stats(
  mean: &Array1<f64>,
  covariance: &Array2<f64>,
  w: &[f64],
  risk_free: f64,
) -> (f64, f64, f64) {
  let w = aview1(w);
  let ret = mean.dot(&w);
  let vol = w.dot(&covariance.dot(&w)).max(0.0).sqrt();
  let sharpe = if vol > RISKLESS_VOLATILITY {
    (ret - risk_free) / vol
  } else {
    0.0
  };
  (ret, vol, sharpe)
}

/// Portfolio variance `w' Sigma w`.
pub(crate) struct Variance<'a> {
  pub covariance: &'a Array2<f64>,
}

impl CostFunction for Variance<'_> {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
    let w = aview1(w);
    Ok(w.dot(&self.covariance.dot(&w)))
  }
}

impl Gradient for Variance<'_> {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, w: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
    Ok((self.covariance.dot(&aview1(w)) * 2.0).to_vec())
  }
}

/// Negative Sharpe ratio. Flat (zero) at riskless portfolios.
pub(crate) struct NegativeSharpe<'a> {
  pub mean: &'a Array1<f64>,
  pub covariance: &'a Array2<f64>,
  pub risk_free: f64,
}

impl CostFunction for NegativeSharpe<'_> {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
    let (_, _, sharpe) = portfolio_stats(self.mean, self.covariance, w, self.risk_free);
    Ok(-sharpe)
  }
}

impl Gradient for NegativeSharpe<'_> {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, w: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
    let wv = aview1(w);
    let sigma_w = self.covariance.dot(&wv);
    let vol = wv.dot(&sigma_w).max(0.0).sqrt();
    if vol <= RISKLESS_VOLATILITY {
      return Ok(vec![0.0; w.len()]);
    }
    let sharpe = (self.mean.dot(&wv) - self.risk_free) / vol;
    // d(-S)/dw = -mu/sigma + S * Sigma w / sigma^2
    Ok(
      self
        .mean
        .iter()
        .zip(sigma_w.iter())
        .map(|(m, s)| -m / vol + sharpe * s / (vol * vol))
        .collect(),
    )
  }
}

/// `alpha * (-S(w)) + (1 - alpha) * ||w - w0||`
pub(crate) struct BlendedSharpe<'a> {
  pub sharpe: NegativeSharpe<'a>,
  pub anchor: &'a [f64],
  pub alpha: f64,
}

impl BlendedSharpe<'_> {
  fn tracking_error(&self, w: &[f64]) -> f64 {
    w.iter()
      .zip(self.anchor)
      .map(|(a, b)| (a - b).powi(2))
      .sum::<f64>()
      .sqrt()
  }
}

impl CostFunction for BlendedSharpe<'_> {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
    Ok(self.alpha * self.sharpe.cost(w)? + (1.0 - self.alpha) * self.tracking_error(w))
  }
}

impl Gradient for BlendedSharpe<'_> {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, w: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
    let te = self.tracking_error(w);
    let g = self.sharpe.gradient(w)?;
    Ok(
      g.iter()
        .zip(w.iter().zip(self.anchor))
        .map(|(gs, (a, b))| {
          // zero subgradient of the norm at the anchor
          let gt = if te < 1e-12 { 0.0 } else { (a - b) / te };
          self.alpha * gs + (1.0 - self.alpha) * gt
        })
        .collect(),
    )
  }
}

/// Side of the target volatility a smooth branch of [`VolatilityTarget`] covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum VolatilitySide {
  /// `sigma <= target`, cost `target - sigma`
  Below,
  /// `sigma >= target`, cost `sigma - target`
  Above,
}

/// `|sigma(w) - target| - tiebreak * w'mu`
///
/// With `side` set, the absolute value is replaced by the linear piece valid on
/// that side of the target, which is smooth away from riskless portfolios.
pub(crate) struct VolatilityTarget<'a> {
  pub mean: &'a Array1<f64>,
  pub covariance: &'a Array2<f64>,
  pub target: f64,
  pub tiebreak: f64,
  pub side: Option<VolatilitySide>,
}

impl VolatilityTarget<'_> {
  fn slope(&self, gap: f64) -> f64 {
    match self.side {
      Some(VolatilitySide::Below) => -1.0,
      Some(VolatilitySide::Above) => 1.0,
      None => gap.signum(),
    }
  }
}

impl CostFunction for VolatilityTarget<'_> {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
    let (ret, vol, _) = portfolio_stats(self.mean, self.covariance, w, 0.0);
    let gap = vol - self.target;
    let distance = match self.side {
      Some(_) => self.slope(gap) * gap,
      None => gap.abs(),
    };
    Ok(distance - self.tiebreak * ret)
  }
}

impl Gradient for VolatilityTarget<'_> {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, w: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
    let wv = aview1(w);
    let sigma_w = self.covariance.dot(&wv);
    let vol = wv.dot(&sigma_w).max(0.0).sqrt();
    let scale = if vol > RISKLESS_VOLATILITY {
      self.slope(vol - self.target) / vol
    } else {
      0.0
    };
    Ok(
      sigma_w
        .iter()
        .zip(self.mean.iter())
        .map(|(s, m)| scale * s - self.tiebreak * m)
        .collect(),
    )
  }
}
