//! # Price Series
//!
//! $$
//! r_t = \frac{P_t}{P_{t-1}} - 1
//! $$
//!
//! Immutable, date-ordered adjusted-close series.

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::EngineError;
use crate::error::Result;

/// One adjusted close observation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PricePoint {
  pub date: NaiveDate,
  pub close: f64,
}

/// Adjusted closing prices of one instrument, strictly increasing in date.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PriceSeries {
  ticker: String,
  points: Vec<PricePoint>,
}

impl PriceSeries {
  /// Build a validated series.
  ///
  /// Rejects an empty ticker, non-increasing dates and non-finite or non-positive prices.
  pub fn new(ticker: impl Into<String>, points: Vec<(NaiveDate, f64)>) -> Result<Self> {
    let ticker = ticker.into().trim().to_string();
    if ticker.is_empty() {
      return Err(EngineError::invalid("ticker must not be empty"));
    }

    let mut out = Vec::with_capacity(points.len());
    for (date, close) in points {
      if !close.is_finite() || close <= 0.0 {
        return Err(EngineError::InvalidInput(format!(
          "{ticker}: price {close} on {date} is not a positive finite number"
        )));
      }
      if let Some(prev) = out.last().map(|p: &PricePoint| p.date) {
        if date <= prev {
          return Err(EngineError::InvalidInput(format!(
            "{ticker}: dates must be strictly increasing ({date} follows {prev})"
          )));
        }
      }
      out.push(PricePoint { date, close });
    }

    Ok(Self {
      ticker,
      points: out,
    })
  }

  pub fn ticker(&self) -> &str {
    &self.ticker
  }

  pub fn points(&self) -> &[PricePoint] {
    &self.points
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  pub fn first_date(&self) -> Option<NaiveDate> {
    self.points.first().map(|p| p.date)
  }

  pub fn last_date(&self) -> Option<NaiveDate> {
    self.points.last().map(|p| p.date)
  }

  /// Period-over-period simple returns, each dated at the later observation.
  pub fn simple_returns(&self) -> Vec<(NaiveDate, f64)> {
    self
      .points
      .windows(2)
      .map(|w| (w[1].date, w[1].close / w[0].close - 1.0))
      .collect()
  }

  /// Sub-series with `start <= date <= end`.
  pub fn clip(&self, start: NaiveDate, end: NaiveDate) -> PriceSeries {
    PriceSeries {
      ticker: self.ticker.clone(),
      points: self
        .points
        .iter()
        .filter(|p| p.date >= start && p.date <= end)
        .copied()
        .collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
  }

  #[test]
  fn rejects_unordered_dates_and_bad_prices() {
    assert!(PriceSeries::new("AAA", vec![(d(2), 10.0), (d(1), 11.0)]).is_err());
    assert!(PriceSeries::new("AAA", vec![(d(1), 10.0), (d(1), 11.0)]).is_err());
    assert!(PriceSeries::new("AAA", vec![(d(1), 0.0)]).is_err());
    assert!(PriceSeries::new("AAA", vec![(d(1), f64::NAN)]).is_err());
    assert!(PriceSeries::new("  ", vec![(d(1), 1.0)]).is_err());
  }

  #[test]
  fn simple_returns_are_dated_at_later_point() {
    let s = PriceSeries::new("AAA", vec![(d(1), 100.0), (d(4), 110.0), (d(5), 99.0)]).unwrap();
    let r = s.simple_returns();

    assert_eq!(r.len(), 2);
    assert_eq!(r[0].0, d(4));
    assert!((r[0].1 - 0.1).abs() < 1e-12);
    assert!((r[1].1 + 0.1).abs() < 1e-12);
  }

  #[test]
  fn clip_keeps_inclusive_range() {
    let s = PriceSeries::new("AAA", vec![(d(1), 1.0), (d(2), 2.0), (d(3), 3.0)]).unwrap();
    let c = s.clip(d(2), d(3));
    assert_eq!(c.len(), 2);
    assert_eq!(c.first_date(), Some(d(2)));
    assert_eq!(c.ticker(), "AAA");
  }
}
