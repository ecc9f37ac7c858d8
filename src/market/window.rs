//! # Lookback Windows
//!
//! $$
//! [t_0, t_1] = [t_1 - \Delta, t_1]
//! $$
//!
//! Named periods with alias normalization, or explicit date ranges.

use std::fmt::Display;
use std::str::FromStr;

use chrono::Datelike;
use chrono::Days;
use chrono::Months;
use chrono::NaiveDate;
use serde::Serialize;

use crate::error::EngineError;

/// Named lookback period.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Period {
  OneDay,
  FiveDays,
  OneMonth,
  ThreeMonths,
  SixMonths,
  OneYear,
  TwoYears,
  FiveYears,
  TenYears,
  YearToDate,
  Max,
}

impl Period {
  /// Canonical period code (`"6mo"`, `"1y"`, ...).
  pub fn code(&self) -> &'static str {
    match self {
      Period::OneDay => "1d",
      Period::FiveDays => "5d",
      Period::OneMonth => "1mo",
      Period::ThreeMonths => "3mo",
      Period::SixMonths => "6mo",
      Period::OneYear => "1y",
      Period::TwoYears => "2y",
      Period::FiveYears => "5y",
      Period::TenYears => "10y",
      Period::YearToDate => "ytd",
      Period::Max => "max",
    }
  }

  /// First calendar day covered by the period ending on `end`.
  pub fn start_from(&self, end: NaiveDate) -> NaiveDate {
    let months = |m: u32| end.checked_sub_months(Months::new(m));
    let start = match self {
      Period::OneDay => end.checked_sub_days(Days::new(1)),
      Period::FiveDays => end.checked_sub_days(Days::new(5)),
      Period::OneMonth => months(1),
      Period::ThreeMonths => months(3),
      Period::SixMonths => months(6),
      Period::OneYear => months(12),
      Period::TwoYears => months(24),
      Period::FiveYears => months(60),
      Period::TenYears => months(120),
      Period::YearToDate => NaiveDate::from_ymd_opt(end.year(), 1, 1),
      Period::Max => None,
    };
    start.unwrap_or(NaiveDate::MIN)
  }
}

impl Display for Period {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.code())
  }
}

impl FromStr for Period {
  type Err = EngineError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let period = match s.trim().to_lowercase().as_str() {
      "1d" => Period::OneDay,
      "5d" => Period::FiveDays,
      "1mo" | "1m" => Period::OneMonth,
      "3mo" | "3m" => Period::ThreeMonths,
      "6mo" | "6m" => Period::SixMonths,
      "1y" | "1yr" | "1year" | "12mo" | "12m" => Period::OneYear,
      "2y" | "2yr" | "24mo" => Period::TwoYears,
      "5y" | "5yr" => Period::FiveYears,
      "10y" | "10yr" => Period::TenYears,
      "ytd" => Period::YearToDate,
      "max" => Period::Max,
      other => {
        return Err(EngineError::InvalidInput(format!(
          "unknown lookback period '{other}'"
        )))
      }
    };
    Ok(period)
  }
}

/// History window requested from the market data provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookbackWindow {
  Period(Period),
  Range { start: NaiveDate, end: NaiveDate },
}

impl Default for LookbackWindow {
  fn default() -> Self {
    LookbackWindow::Period(Period::OneYear)
  }
}

impl LookbackWindow {
  /// Explicit range; `start` must precede `end`.
  pub fn range(start: NaiveDate, end: NaiveDate) -> Result<Self, EngineError> {
    if start >= end {
      return Err(EngineError::InvalidInput(format!(
        "window start {start} must precede end {end}"
      )));
    }
    Ok(LookbackWindow::Range { start, end })
  }

  /// Concrete inclusive `[start, end]`, anchoring named periods at `today`.
  pub fn resolve(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    match *self {
      LookbackWindow::Period(period) => (period.start_from(today), today),
      LookbackWindow::Range { start, end } => (start, end),
    }
  }
}

impl FromStr for LookbackWindow {
  type Err = EngineError;

  /// Accepts a period code/alias or `YYYY-MM-DD..YYYY-MM-DD`.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if let Some((start, end)) = s.split_once("..") {
      let parse = |x: &str| {
        NaiveDate::parse_from_str(x.trim(), "%Y-%m-%d")
          .map_err(|e| EngineError::InvalidInput(format!("bad window date '{x}': {e}")))
      };
      return LookbackWindow::range(parse(start)?, parse(end)?);
    }
    Ok(LookbackWindow::Period(s.parse()?))
  }
}
