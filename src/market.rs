//! # Market Data
//!
//! $$
//! \text{fetch}: (\text{ticker}, [t_0, t_1]) \mapsto \{(t_k, P_{t_k})\}_{k}
//! $$
//!
//! Price series, lookback windows and the provider contract the engine consumes.

pub mod client;
pub mod provider;
pub mod series;
pub mod window;
#[cfg(feature = "yahoo")]
pub mod yahoo;

pub use client::FetchPolicy;
pub use client::MarketDataClient;
pub use provider::MarketDataProvider;
pub use provider::ProviderError;
pub use provider::StaticProvider;
pub use series::PricePoint;
pub use series::PriceSeries;
pub use window::LookbackWindow;
pub use window::Period;
#[cfg(feature = "yahoo")]
pub use yahoo::YahooProvider;
