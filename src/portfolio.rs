//! # Portfolio
//!
//! $$
//! \mathbf w^\*=\arg\min_{\mathbf w\in\Delta^N} f(\mathbf w;\hat\mu,\hat\Sigma)
//! $$
//!
//! Returns and covariance estimation plus the three allocation modes:
//!
//! - **full**: max-Sharpe, min-volatility, optional target-return portfolio and
//!   the efficient frontier,
//! - **enhance**: Sharpe improvement anchored to an existing allocation,
//! - **rebalance**: move an allocation to the target volatility of a risk profile.
//!
//! Every mode is long-only and fully invested. Solver failures surface as
//! [`EngineError::DidNotConverge`](crate::error::EngineError::DidNotConverge).

pub mod data;
pub mod engine;
pub mod enhance;
mod objectives;
pub mod optimizers;
pub mod rebalance;
mod solver;
pub mod types;

pub use data::align_return_series;
pub use data::estimate;
pub use data::estimate_from_returns;
pub use data::AlignedReturns;
pub use data::CovarianceEstimate;
pub use data::EstimatorConfig;
pub use data::TRADING_PERIODS_PER_YEAR;
pub use engine::PortfolioEngine;
pub use engine::PortfolioEngineConfig;
pub use enhance::optimize_enhance;
pub use enhance::ENHANCE_ALPHA_AGGRESSIVE;
pub use enhance::ENHANCE_ALPHA_DEFAULT;
pub use enhance::MAX_WEIGHT_SHIFT;
pub use enhance::MIN_RECOMMENDATION_SHIFT;
pub use enhance::VOLATILITY_CAP_SCORE_FACTOR;
pub use optimizers::optimize_full;
pub use rebalance::alignment_score;
pub use rebalance::optimize_rebalance;
pub use rebalance::ALIGNMENT_SCORE_SCALE;
pub use rebalance::MIN_TRADE_SHIFT;
pub use rebalance::POSITION_FLOOR;
pub use rebalance::RETURN_TIEBREAK;
pub use solver::SolverConfig;
pub use types::Action;
pub use types::CorrelationMatrix;
pub use types::EnhanceRequest;
pub use types::Enhancement;
pub use types::FrontierPoint;
pub use types::FullOptimization;
pub use types::OptimizationMode;
pub use types::OptimizationResult;
pub use types::PortfolioResult;
pub use types::RebalanceRequest;
pub use types::Rebalancing;
pub use types::Recommendation;
pub use types::TickerMap;
pub use types::Trade;
pub use types::TradeSide;
pub use types::WeightVector;
pub use types::WEIGHT_SUM_TOLERANCE;
