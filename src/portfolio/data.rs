//! # Returns & Covariance Estimator
//!
//! $$
//! \hat\mu = k\,\bar r, \qquad \hat\Sigma = k\,\frac{1}{T-1}\sum_t (r_t-\bar r)(r_t-\bar r)^\top
//! $$
//!
//! Simple returns per instrument, strict date alignment across the basket, and
//! annualized first and second moments (`k` periods per year).

use std::collections::HashMap;

use chrono::NaiveDate;
use nalgebra::DMatrix;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::Axis;
use ndarray_stats::CorrelationExt;
use serde::Deserialize;
use tracing::debug;
use tracing::warn;

use crate::error::EngineError;
use crate::error::ModeKind;
use crate::error::Result;
use crate::market::PriceSeries;

/// Trading periods per year used for annualization.
pub const TRADING_PERIODS_PER_YEAR: f64 = 252.0;

/// Annualized variance below which an instrument counts as constant.
const ZERO_VARIANCE: f64 = 1e-18;

/// Smallest admissible eigenvalue of the correlation matrix of non-constant instruments.
const MIN_CORRELATION_EIGENVALUE: f64 = 1e-10;

/// Estimator settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
  /// Annualization factor.
  pub periods_per_year: f64,
  /// Minimum number of aligned return periods.
  pub min_periods: usize,
}

impl Default for EstimatorConfig {
  fn default() -> Self {
    Self {
      periods_per_year: TRADING_PERIODS_PER_YEAR,
      min_periods: 2,
    }
  }
}

/// `T x N` table of simple returns on dates shared by every instrument.
#[derive(Clone, Debug)]
pub struct AlignedReturns {
  pub tickers: Vec<String>,
  pub dates: Vec<NaiveDate>,
  pub returns: Array2<f64>,
}

/// Inner-join dated columns on date, keeping the order of the first column.
pub(crate) fn align_dated(columns: &[Vec<(NaiveDate, f64)>]) -> (Vec<NaiveDate>, Vec<Vec<f64>>) {
  let Some((first, rest)) = columns.split_first() else {
    return (Vec::new(), Vec::new());
  };
  let lookups: Vec<HashMap<NaiveDate, f64>> = rest
    .iter()
    .map(|c| c.iter().copied().collect())
    .collect();

  let mut dates = Vec::with_capacity(first.len());
  let mut out = vec![Vec::with_capacity(first.len()); columns.len()];
  for &(date, value) in first {
    let others: Option<Vec<f64>> = lookups.iter().map(|m| m.get(&date).copied()).collect();
    if let Some(others) = others {
      dates.push(date);
      out[0].push(value);
      for (col, v) in out[1..].iter_mut().zip(others) {
        col.push(v);
      }
    }
  }
  (dates, out)
}

/// Per-instrument simple returns, dropping every date not present in all of them.
pub fn align_return_series(series: &[PriceSeries]) -> AlignedReturns {
  let columns: Vec<Vec<(NaiveDate, f64)>> = series.iter().map(|s| s.simple_returns()).collect();
  let (dates, aligned) = align_dated(&columns);

  let t = dates.len();
  let n = series.len();
  let returns = Array2::from_shape_fn((t, n), |(i, j)| aligned[j][i]);

  AlignedReturns {
    tickers: series.iter().map(|s| s.ticker().to_string()).collect(),
    dates,
    returns,
  }
}

/// Annualized moments of an aligned return matrix.
#[derive(Clone, Debug)]
pub struct CovarianceEstimate {
  pub tickers: Vec<String>,
  /// Annualized mean return per instrument.
  pub mean: Array1<f64>,
  /// Annualized covariance, symmetric.
  pub covariance: Array2<f64>,
  /// Pearson correlation; pairs involving a constant instrument are 0.
  pub correlation: Array2<f64>,
  /// Instruments with no variance over the window.
  pub zero_variance: Vec<bool>,
  /// Number of aligned return periods.
  pub periods: usize,
  pub dates: Vec<NaiveDate>,
  /// Aligned `T x N` simple returns (empty when built from moments).
  pub returns: Array2<f64>,
}

/// Estimate annualized moments from raw price series.
pub fn estimate(series: &[PriceSeries], config: &EstimatorConfig) -> Result<CovarianceEstimate> {
  if series.is_empty() {
    return Err(EngineError::invalid("at least one price series is required"));
  }
  estimate_from_returns(align_return_series(series), config)
}

/// Estimate annualized moments from an already aligned return matrix.
pub fn estimate_from_returns(
  aligned: AlignedReturns,
  config: &EstimatorConfig,
) -> Result<CovarianceEstimate> {
  let AlignedReturns {
    tickers,
    dates,
    returns,
  } = aligned;
  let periods = returns.nrows();
  let required = config.min_periods.max(2);
  if periods < required {
    return Err(EngineError::InsufficientHistory {
      required,
      actual: periods,
    });
  }

  let k = config.periods_per_year;
  let mean = returns
    .mean_axis(Axis(0))
    .ok_or(EngineError::InsufficientHistory {
      required,
      actual: periods,
    })?
    * k;
  let sample_cov = returns
    .t()
    .cov(1.0)
    .map_err(|_| EngineError::InsufficientHistory {
      required,
      actual: periods,
    })?;
  let covariance = symmetrize(sample_cov * k);

  let zero_variance: Vec<bool> = covariance
    .diag()
    .iter()
    .map(|&v| v <= ZERO_VARIANCE)
    .collect();
  for (ticker, flat) in tickers.iter().zip(&zero_variance) {
    if *flat {
      warn!(ticker = %ticker, "instrument has zero variance over the window");
    }
  }

  let correlation = corr_from_cov(&covariance);
  debug!(
    instruments = tickers.len(),
    periods, "estimated annualized mean and covariance"
  );

  Ok(CovarianceEstimate {
    tickers,
    mean,
    covariance,
    correlation,
    zero_variance,
    periods,
    dates,
    returns,
  })
}

fn symmetrize(mut m: Array2<f64>) -> Array2<f64> {
  let n = m.nrows();
  for i in 0..n {
    for j in (i + 1)..n {
      let avg = 0.5 * (m[[i, j]] + m[[j, i]]);
      m[[i, j]] = avg;
      m[[j, i]] = avg;
    }
  }
  m
}

pub(crate) fn corr_from_cov(cov: &Array2<f64>) -> Array2<f64> {
  let n = cov.nrows();
  let sd: Vec<f64> = cov.diag().iter().map(|v| v.max(0.0).sqrt()).collect();

  Array2::from_shape_fn((n, n), |(i, j)| {
    let denom = sd[i] * sd[j];
    if i == j {
      1.0
    } else if denom > 1e-15 {
      (cov[[i, j]] / denom).clamp(-1.0, 1.0)
    } else {
      0.0
    }
  })
}

impl CovarianceEstimate {
  /// Build directly from annualized moments.
  pub fn from_moments(
    tickers: Vec<String>,
    mean: Array1<f64>,
    covariance: Array2<f64>,
    periods: usize,
  ) -> Result<Self> {
    let n = tickers.len();
    if n == 0 || mean.len() != n || covariance.dim() != (n, n) {
      return Err(EngineError::InvalidInput(format!(
        "moment shapes do not match {n} tickers (mean {}, covariance {:?})",
        mean.len(),
        covariance.dim()
      )));
    }
    let covariance = symmetrize(covariance);
    let zero_variance = covariance.diag().iter().map(|&v| v <= ZERO_VARIANCE).collect();
    let correlation = corr_from_cov(&covariance);

    Ok(Self {
      tickers,
      mean,
      covariance,
      correlation,
      zero_variance,
      periods,
      dates: Vec::new(),
      returns: Array2::zeros((0, n)),
    })
  }

  pub fn n_assets(&self) -> usize {
    self.tickers.len()
  }

  /// Annualized volatility per instrument.
  pub fn volatilities(&self) -> Vec<f64> {
    self.covariance.diag().iter().map(|v| v.max(0.0).sqrt()).collect()
  }

  /// Reject covariance matrices that cannot support a stable solve.
  ///
  /// Constant instruments are left out of the eigenvalue test: their zero row and
  /// column is tolerated and the solver may allocate to them freely.
  pub fn check_conditioning(&self, mode: ModeKind) -> Result<()> {
    let n = self.n_assets();
    if n <= 1 {
      return Ok(());
    }
    if self.periods <= n {
      return Err(EngineError::SingularCovariance {
        mode,
        detail: format!(
          "{} return periods cannot identify a covariance of {n} instruments",
          self.periods
        ),
      });
    }

    let live: Vec<usize> = (0..n).filter(|&i| !self.zero_variance[i]).collect();
    if live.len() < 2 {
      return Ok(());
    }

    let m = DMatrix::from_fn(live.len(), live.len(), |i, j| {
      self.correlation[[live[i], live[j]]]
    });
    let min_eigen = m
      .symmetric_eigenvalues()
      .iter()
      .copied()
      .fold(f64::INFINITY, f64::min);

    if min_eigen < MIN_CORRELATION_EIGENVALUE {
      let mut pair = (live[0], live[1]);
      let mut strongest = f64::NEG_INFINITY;
      for (a, &i) in live.iter().enumerate() {
        for &j in &live[(a + 1)..] {
          let c = self.correlation[[i, j]].abs();
          if c > strongest {
            strongest = c;
            pair = (i, j);
          }
        }
      }
      return Err(EngineError::SingularCovariance {
        mode,
        detail: format!(
          "instruments are collinear (min eigenvalue {min_eigen:.3e}); most correlated pair {} / {} ({strongest:.6})",
          self.tickers[pair.0], self.tickers[pair.1]
        ),
      });
    }
    Ok(())
  }
}
