// =============================================================================
// Trader-quality evaluator (D) — §4.4
// =============================================================================

pub mod evaluator;
pub mod metrics;
pub mod thresholds;

pub use evaluator::{QualityEvaluator, TierChange, TraderQuality};
pub use metrics::EquitySnapshot;
pub use thresholds::{TierThreshold, TierThresholdSet};
