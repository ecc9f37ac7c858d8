//! Deterministic synthetic market data for tests.

use chrono::Datelike;
use chrono::Days;
use chrono::NaiveDate;
use chrono::Weekday;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Distribution;
use rand_distr::Normal;

use crate::market::PriceSeries;

/// `n` consecutive weekdays starting 2024-01-02.
pub(crate) fn business_days(n: usize) -> Vec<NaiveDate> {
  let mut out = Vec::with_capacity(n);
  let mut d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
  while out.len() < n {
    if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
      out.push(d);
    }
    d = d.checked_add_days(Days::new(1)).unwrap();
  }
  out
}

/// Price path starting at 100 on `dates[0]` that realizes `returns` on the following dates.
pub(crate) fn prices_from_returns(ticker: &str, dates: &[NaiveDate], returns: &[f64]) -> PriceSeries {
  assert_eq!(dates.len(), returns.len() + 1);
  let mut price = 100.0;
  let mut points = vec![(dates[0], price)];
  for (d, r) in dates[1..].iter().zip(returns) {
    price *= 1.0 + r;
    points.push((*d, price));
  }
  PriceSeries::new(ticker, points).unwrap()
}

/// Daily returns with exact sample mean/std per asset and pairwise correlation close to `rho`.
pub(crate) fn correlated_returns(
  seed: u64,
  periods: usize,
  annual_means: &[f64],
  annual_vols: &[f64],
  rho: f64,
) -> Vec<Vec<f64>> {
  let mut rng = StdRng::seed_from_u64(seed);
  let normal = Normal::new(0.0, 1.0).unwrap();
  let common: Vec<f64> = (0..periods).map(|_| normal.sample(&mut rng)).collect();

  annual_means
    .iter()
    .zip(annual_vols)
    .map(|(&mu, &sigma)| {
      let raw: Vec<f64> = common
        .iter()
        .map(|f| rho.sqrt() * f + (1.0 - rho).sqrt() * normal.sample(&mut rng))
        .collect();
      let m = raw.iter().sum::<f64>() / periods as f64;
      let sd = (raw.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (periods as f64 - 1.0)).sqrt();
      raw
        .iter()
        .map(|x| (x - m) / sd * sigma / 252.0_f64.sqrt() + mu / 252.0)
        .collect()
    })
    .collect()
}

/// Basket of price series over `periods + 1` business days.
pub(crate) fn synthetic_basket(
  seed: u64,
  periods: usize,
  tickers: &[&str],
  annual_means: &[f64],
  annual_vols: &[f64],
  rho: f64,
) -> Vec<PriceSeries> {
  let dates = business_days(periods + 1);
  correlated_returns(seed, periods, annual_means, annual_vols, rho)
    .iter()
    .zip(tickers)
    .map(|(r, t)| prices_from_returns(t, &dates, r))
    .collect()
}
