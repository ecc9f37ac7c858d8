//! # Errors
//!
//! Typed failures surfaced by the estimator, the optimizer modes and the risk engine.
//! None of them are folded into a default allocation: a caller either gets a result
//! it can trust or one of these.

use std::fmt::Display;

use serde::Serialize;
use thiserror::Error;

/// Operating mode a failure originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
  Full,
  Enhance,
  Rebalance,
}

impl Display for ModeKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ModeKind::Full => write!(f, "full"),
      ModeKind::Enhance => write!(f, "enhance"),
      ModeKind::Rebalance => write!(f, "rebalance"),
    }
  }
}

/// Engine error taxonomy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
  /// The market data provider had no data for a ticker, or kept failing until the
  /// retry budget or the timeout ran out.
  #[error("market data unavailable for {ticker}: {reason}")]
  DataUnavailable { ticker: String, reason: String },

  #[error("insufficient history: need at least {required} aligned periods, got {actual}")]
  InsufficientHistory { required: usize, actual: usize },

  #[error("singular covariance matrix ({mode} mode): {detail}")]
  SingularCovariance { mode: ModeKind, detail: String },

  #[error("{mode} optimization did not converge for {objective} after {iterations} iterations")]
  DidNotConverge {
    mode: ModeKind,
    objective: &'static str,
    iterations: usize,
  },

  #[error("invalid input: {0}")]
  InvalidInput(String),
}

impl EngineError {
  pub(crate) fn invalid(msg: impl Into<String>) -> Self {
    EngineError::InvalidInput(msg.into())
  }
}

pub type Result<T> = std::result::Result<T, EngineError>;
