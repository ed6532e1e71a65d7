// ChartPilot - multi-timeframe chart analysis
// Renders charts through a rate-limited upstream API and reads them top-down,
// from the highest timeframe to the lowest, into one trade recommendation.

#![deny(clippy::unwrap_used)]

pub mod cascade;
pub mod cli;
pub mod config;
pub mod interval;
pub mod llm;
pub mod upstream;

// Re-export commonly used items
pub use cascade::{CascadeEngine, CascadeError, CascadeOptions, CascadeOutcome, ChartInfo, TimeframeAnalysis};
pub use config::Config;
pub use upstream::{ChartApiClient, ChartApiError, RequestDescriptor, TokenBudget};
