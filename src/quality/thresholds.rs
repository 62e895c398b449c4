// =============================================================================
// Tier threshold configuration (§4.4)
// =============================================================================
//
// One enumerated set of checks per tier. A trader qualifies for a tier iff
// every check in that tier's set passes — see `evaluator::decide_tier` for
// the combining logic. Loaded from an optional JSON override file at
// startup (`RuntimeConfig::from_env`, `TIER_THRESHOLDS_PATH`) and persisted
// back atomically when an operator adjusts them at runtime.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierThreshold {
    pub min_roi_7d_pct: f64,
    pub min_pnl_7d_alt: f64,
    pub min_win_rate: f64,
    pub min_profit_factor: f64,
    pub min_trades: u32,
    pub min_account_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierThresholdSet {
    pub elite: TierThreshold,
    pub good: TierThreshold,
    pub weak: TierThreshold,
}

impl Default for TierThresholdSet {
    fn default() -> Self {
        Self {
            elite: TierThreshold {
                min_roi_7d_pct: 15.0,
                min_pnl_7d_alt: 5_000.0,
                min_win_rate: 55.0,
                min_profit_factor: 1.8,
                min_trades: 15,
                min_account_value: 10_000.0,
            },
            good: TierThreshold {
                min_roi_7d_pct: 7.0,
                min_pnl_7d_alt: 1_500.0,
                min_win_rate: 48.0,
                min_profit_factor: 1.3,
                min_trades: 8,
                min_account_value: 2_000.0,
            },
            weak: TierThreshold {
                min_roi_7d_pct: 0.0,
                min_pnl_7d_alt: 0.0,
                min_win_rate: 0.0,
                min_profit_factor: 0.0,
                min_trades: 1,
                min_account_value: 500.0,
            },
        }
    }
}

impl TierThresholdSet {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_elite_is_stricter_than_good() {
        let t = TierThresholdSet::default();
        assert!(t.elite.min_roi_7d_pct > t.good.min_roi_7d_pct);
        assert!(t.elite.min_win_rate > t.good.min_win_rate);
        assert!(t.good.min_roi_7d_pct > t.weak.min_roi_7d_pct);
    }

    #[test]
    fn round_trips_through_json() {
        let t = TierThresholdSet::default();
        let json = serde_json::to_string(&t).unwrap();
        let back: TierThresholdSet = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
    }
}
