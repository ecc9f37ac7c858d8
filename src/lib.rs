//! # quantfolio
//!
//! $$
//! \max_{\mathbf w\in\Delta^N}\ \frac{\mathbf w^\top\mu-r_f}{\sqrt{\mathbf w^\top\Sigma\mathbf w}}
//! $$
//!
//! Portfolio optimization and risk assessment on daily price histories.
//!
//! - [`market`]: price series, lookback windows and the market data provider contract,
//! - [`portfolio`]: returns and covariance estimation with the full, enhance and
//!   rebalance optimizer modes,
//! - [`risk`]: single-asset and portfolio risk reports.
//!
//! Every computation is request-scoped; engines hold configuration only.

pub mod error;
pub mod market;
pub mod portfolio;
pub mod risk;

#[cfg(test)]
pub(crate) mod testing;

pub use error::EngineError;
pub use error::ModeKind;
pub use error::Result;
pub use portfolio::OptimizationMode;
pub use portfolio::OptimizationResult;
pub use portfolio::PortfolioEngine;
pub use portfolio::PortfolioEngineConfig;
pub use risk::RiskEngine;
pub use risk::UserRiskProfile;
