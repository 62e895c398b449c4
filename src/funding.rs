// =============================================================================
// Funding tracker (C) — §4.3
// =============================================================================
//
// Refreshed every 30 min from a single `metaAndAssetCtxs` call (one request
// covers every coin, unlike the volatility tracker's per-coin candle
// fetches). Classification is relative to a prospective position direction,
// so the cache stores the raw 8 h funding rate and callers ask for the
// classification against whichever direction they're evaluating.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::exchange::ExchangeClient;
use crate::types::{Direction, FundingClassification};

const DEFAULT_THRESHOLD: f64 = 0.0001;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingContext {
    pub coin: String,
    pub funding_rate_8h: f64,
    pub updated_at: chrono::DateTime<Utc>,
}

pub struct FundingTracker {
    exchange: Arc<ExchangeClient>,
    threshold: f64,
    cache: RwLock<HashMap<String, FundingContext>>,
}

impl FundingTracker {
    pub fn new(exchange: Arc<ExchangeClient>, threshold: f64) -> Self {
        Self {
            exchange,
            threshold: if threshold > 0.0 { threshold } else { DEFAULT_THRESHOLD },
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn refresh_all(&self) {
        let (meta, ctxs) = match self.exchange.meta_and_asset_ctxs().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "metaAndAssetCtxs unavailable, keeping stale funding cache");
                return;
            }
        };

        if meta.universe.len() != ctxs.len() {
            warn!(
                universe_len = meta.universe.len(),
                ctx_len = ctxs.len(),
                "metaAndAssetCtxs length mismatch, skipping this refresh"
            );
            return;
        }

        let now = Utc::now();
        let mut cache = self.cache.write();
        for (entry, ctx) in meta.universe.iter().zip(ctxs.iter()) {
            cache.insert(
                entry.name.clone(),
                FundingContext {
                    coin: entry.name.clone(),
                    funding_rate_8h: ctx.funding,
                    updated_at: now,
                },
            );
        }
        info!(coins = cache.len(), "funding tracker refreshed");
    }

    /// Classification for `coin` relative to a prospective `direction`
    /// (§4.3). Falls back to `neutral` when no funding data is cached yet
    /// (§7 logic-precondition fallback).
    pub fn classify(&self, coin: &str, direction: Direction) -> FundingClassification {
        let rate = match self.cache.read().get(coin) {
            Some(ctx) => ctx.funding_rate_8h,
            None => return FundingClassification::Neutral,
        };
        classify_rate(rate, direction, self.threshold)
    }

    pub fn get(&self, coin: &str) -> Option<FundingContext> {
        self.cache.read().get(coin).cloned()
    }

    /// Every coin currently cached, for the scheduler's post-refresh
    /// persistence pass.
    pub fn all(&self) -> Vec<FundingContext> {
        self.cache.read().values().cloned().collect()
    }

    /// Test-only seam: inject a cached funding rate for `coin`.
    #[cfg(test)]
    pub(crate) fn seed_for_test(&self, coin: &str, funding_rate_8h: f64) {
        self.cache.write().insert(
            coin.to_string(),
            FundingContext {
                coin: coin.to_string(),
                funding_rate_8h,
                updated_at: Utc::now(),
            },
        );
    }
}

fn classify_rate(rate: f64, direction: Direction, threshold: f64) -> FundingClassification {
    match direction {
        Direction::Long => {
            if rate < -threshold {
                FundingClassification::Favorable
            } else if rate > threshold {
                FundingClassification::Unfavorable
            } else {
                FundingClassification::Neutral
            }
        }
        Direction::Short => {
            if rate > threshold {
                FundingClassification::Favorable
            } else if rate < -threshold {
                FundingClassification::Unfavorable
            } else {
                FundingClassification::Neutral
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_favorable_when_rate_very_negative() {
        assert_eq!(classify_rate(-0.001, Direction::Long, DEFAULT_THRESHOLD), FundingClassification::Favorable);
    }

    #[test]
    fn long_unfavorable_when_rate_very_positive() {
        assert_eq!(classify_rate(0.001, Direction::Long, DEFAULT_THRESHOLD), FundingClassification::Unfavorable);
    }

    #[test]
    fn short_favorable_when_rate_very_positive() {
        assert_eq!(classify_rate(0.001, Direction::Short, DEFAULT_THRESHOLD), FundingClassification::Favorable);
    }

    #[test]
    fn neutral_inside_threshold_band() {
        assert_eq!(classify_rate(0.00001, Direction::Long, DEFAULT_THRESHOLD), FundingClassification::Neutral);
        assert_eq!(classify_rate(-0.00001, Direction::Short, DEFAULT_THRESHOLD), FundingClassification::Neutral);
    }

    #[test]
    fn missing_coin_defaults_neutral() {
        let tracker = FundingTracker::new(Arc::new(ExchangeClient::new("https://example.invalid/info")), DEFAULT_THRESHOLD);
        assert_eq!(tracker.classify("ZZZ", Direction::Long), FundingClassification::Neutral);
    }
}
