//! # Risk
//!
//! $$
//! \beta=\frac{\operatorname{Cov}(r,r_b)}{\operatorname{Var}(r_b)},\qquad
//! S=\sqrt{P}\,\frac{\overline{r-r_f/P}}{s_r}
//! $$
//!
//! Single-asset and portfolio risk assessment, plus the user risk profiles
//! shared with the rebalance optimizer.

pub mod engine;
pub mod metrics;
pub mod profile;
pub mod report;

pub use engine::PortfolioRiskRequest;
pub use engine::RiskConfig;
pub use engine::RiskEngine;
pub use metrics::RiskLevel;
pub use metrics::RiskMetrics;
pub use metrics::TailConfig;
pub use metrics::TailEstimate;
pub use metrics::CONFIDENCE_95;
pub use metrics::CONFIDENCE_99;
pub use profile::RiskCategory;
pub use profile::UserRiskProfile;
pub use profile::VolatilityBand;
pub use report::AlignmentVerdict;
pub use report::AssetRiskReport;
pub use report::ConcentrationTier;
pub use report::Diversification;
pub use report::PortfolioRiskReport;
pub use report::RiskAlignment;
pub use report::RiskContribution;
pub use report::VarInterpretation;
pub use report::HIGH_CONCENTRATION;
pub use report::MODERATE_CONCENTRATION;
