// =============================================================================
// Volatility Tracker (B) — §4.2
// =============================================================================
//
// Refreshed every 4 h for every coin currently held by a tracked position
// plus a built-in major-asset list. Caches ATR(7), ATR(14), the 7-day mean
// daily range %, and a cross-sectional volatility rank in a single
// `RwLock<HashMap>` the way the teacher's `regime::RegimeDetector` caches
// its own per-symbol state in `AppState`.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::exchange::models::RawCandle;
use crate::exchange::{ExchangeClient, RateLimiter};
use crate::indicators::atr::{calculate_atr, daily_range_avg_pct};
use crate::indicators::Candle;
use crate::types::{clamp, Direction};

/// Coins tracked regardless of whether a tracked trader currently holds a
/// position in them, so stop/TP math never has to fall back to the 3 %
/// default for the market's most liquid assets.
pub const MAJOR_ASSETS: &[&str] = &["BTC", "ETH", "SOL", "ARB", "AVAX", "MATIC", "OP", "DOGE"];

const ATR_PERIODS: (usize, usize) = (7, 14);
/// Candle buffer requested beyond the longest period, to give the true-range
/// computation a warm-up bar and tolerate the odd missing candle.
const CANDLE_BUFFER_DAYS: i64 = 10;
const DEFAULT_STOP_PCT: f64 = 3.0;
const MIN_STOP_PCT: f64 = 1.0;
const MAX_STOP_PCT: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinVolatility {
    pub coin: String,
    pub atr_14d: f64,
    pub atr_7d: f64,
    pub daily_range_avg_pct: f64,
    pub volatility_rank: f64,
    pub last_price: f64,
    pub price_change_24h_pct: f64,
    pub updated_at: chrono::DateTime<Utc>,
}

pub struct VolatilityTracker {
    exchange: Arc<ExchangeClient>,
    rate_limiter: Arc<RateLimiter>,
    cache: RwLock<HashMap<String, CoinVolatility>>,
}

impl VolatilityTracker {
    pub fn new(exchange: Arc<ExchangeClient>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            exchange,
            rate_limiter,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, coin: &str) -> Option<CoinVolatility> {
        self.cache.read().get(coin).cloned()
    }

    /// Every coin currently cached, for the scheduler's post-refresh
    /// persistence pass.
    pub fn all(&self) -> Vec<CoinVolatility> {
        self.cache.read().values().cloned().collect()
    }

    /// Test-only seam: inject a cached ATR reading for `coin` so signal-
    /// generator tests can drive `volatility_adjusted_stop` without a live
    /// exchange client.
    #[cfg(test)]
    pub(crate) fn seed_for_test(&self, cv: CoinVolatility) {
        self.cache.write().insert(cv.coin.clone(), cv);
    }

    /// Refresh ATR/range/rank for every coin in `held_coins` plus the
    /// built-in major-asset list. Malformed or missing candle data for one
    /// coin never aborts the cycle for the rest (§7 malformed-payload
    /// policy) — that coin simply keeps its last cached value.
    pub async fn refresh_all(&self, held_coins: &[String]) {
        let mut coins: Vec<String> = MAJOR_ASSETS.iter().map(|s| s.to_string()).collect();
        for c in held_coins {
            if !coins.contains(c) {
                coins.push(c.clone());
            }
        }

        let period_days = (ATR_PERIODS.1 as i64) + CANDLE_BUFFER_DAYS;
        let start_time = Utc::now().timestamp_millis() - period_days * 24 * 3_600_000;

        let mut fresh: HashMap<String, CoinVolatility> = HashMap::new();

        for coin in &coins {
            self.rate_limiter.wait_turn().await;
            match self
                .exchange
                .candle_snapshot(coin, "1d", start_time, None)
                .await
            {
                Ok(raw_candles) => {
                    if let Some(cv) = Self::compute_one(coin, &raw_candles) {
                        fresh.insert(coin.clone(), cv);
                    } else {
                        warn!(coin, "insufficient candle data to compute volatility");
                    }
                }
                Err(e) => {
                    warn!(coin, error = %e, "failed to fetch candles for volatility tracker");
                }
            }
        }

        if fresh.is_empty() {
            warn!("volatility refresh produced no results this cycle");
            return;
        }

        Self::assign_ranks(&mut fresh);

        let mut cache = self.cache.write();
        for (coin, cv) in fresh {
            cache.insert(coin, cv);
        }

        info!(coins = cache.len(), "volatility tracker refreshed");
    }

    fn compute_one(coin: &str, raw_candles: &[RawCandle]) -> Option<CoinVolatility> {
        let candles: Vec<Candle> = raw_candles
            .iter()
            .map(|c| Candle {
                time: c.t,
                open: c.o,
                high: c.h,
                low: c.l,
                close: c.c,
            })
            .collect();

        let atr_14d = calculate_atr(&candles, ATR_PERIODS.1)?;
        let atr_7d = calculate_atr(&candles, ATR_PERIODS.0).unwrap_or(atr_14d);
        let daily_range_avg_pct = daily_range_avg_pct(&candles, 7).unwrap_or(0.0);
        let last_price = candles.last()?.close;

        let price_change_24h_pct = if candles.len() >= 2 {
            let prev = candles[candles.len() - 2].close;
            if prev > 0.0 {
                (last_price - prev) / prev * 100.0
            } else {
                0.0
            }
        } else {
            0.0
        };

        debug!(
            coin,
            atr_14d,
            atr_7d,
            daily_range_avg_pct,
            last_price,
            "computed coin volatility"
        );

        Some(CoinVolatility {
            coin: coin.to_string(),
            atr_14d,
            atr_7d,
            daily_range_avg_pct,
            volatility_rank: 0.0, // filled in by assign_ranks
            last_price,
            price_change_24h_pct,
            updated_at: Utc::now(),
        })
    }

    /// Percentile of each coin's `daily_range_avg_pct` among all coins
    /// refreshed this cycle, 0 = lowest, 100 = highest. Ties receive the
    /// same rank (any valid total ordering is acceptable per §8).
    fn assign_ranks(coins: &mut HashMap<String, CoinVolatility>) {
        let n = coins.len();
        if n <= 1 {
            for cv in coins.values_mut() {
                cv.volatility_rank = 50.0;
            }
            return;
        }

        let mut ranges: Vec<(String, f64)> = coins
            .iter()
            .map(|(k, v)| (k.clone(), v.daily_range_avg_pct))
            .collect();
        ranges.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        for (idx, (coin, _)) in ranges.iter().enumerate() {
            let rank = idx as f64 / (n - 1) as f64 * 100.0;
            if let Some(cv) = coins.get_mut(coin) {
                cv.volatility_rank = rank;
            }
        }
    }

    /// Volatility-adjusted stop price for a prospective entry (§4.2).
    /// Falls back to the default 3 % stop distance when no volatility data
    /// exists for `coin` yet.
    pub fn volatility_adjusted_stop(
        &self,
        coin: &str,
        direction: Direction,
        entry_px: f64,
        atr_multiple: f64,
    ) -> f64 {
        let stop_pct = match self.get(coin) {
            Some(cv) if cv.atr_14d > 0.0 && entry_px > 0.0 => {
                let raw_pct = cv.atr_14d * atr_multiple / entry_px * 100.0;
                clamp(raw_pct, MIN_STOP_PCT, MAX_STOP_PCT)
            }
            _ => DEFAULT_STOP_PCT,
        };

        let distance = entry_px * stop_pct / 100.0;
        match direction {
            Direction::Long => entry_px - distance,
            Direction::Short => entry_px + distance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> VolatilityTracker {
        let exchange = Arc::new(ExchangeClient::new("https://example.invalid/info"));
        let limiter = Arc::new(RateLimiter::from_requests_per_second(100.0));
        VolatilityTracker::new(exchange, limiter)
    }

    #[test]
    fn stop_falls_back_to_default_when_no_data() {
        let t = tracker();
        let stop = t.volatility_adjusted_stop("BTC", Direction::Long, 50_000.0, 1.5);
        assert_eq!(stop, 50_000.0 * (1.0 - 0.03));
    }

    #[test]
    fn stop_clamped_to_min_pct() {
        let t = tracker();
        t.cache.write().insert(
            "BTC".to_string(),
            CoinVolatility {
                coin: "BTC".into(),
                atr_14d: 1.0, // tiny ATR -> stop pct would clamp to 1%
                atr_7d: 1.0,
                daily_range_avg_pct: 0.1,
                volatility_rank: 0.0,
                last_price: 50_000.0,
                price_change_24h_pct: 0.0,
                updated_at: Utc::now(),
            },
        );
        let stop = t.volatility_adjusted_stop("BTC", Direction::Long, 50_000.0, 1.5);
        assert_eq!(stop, 50_000.0 * (1.0 - 0.01));
    }

    #[test]
    fn stop_clamped_to_max_pct() {
        let t = tracker();
        t.cache.write().insert(
            "BTC".to_string(),
            CoinVolatility {
                coin: "BTC".into(),
                atr_14d: 20_000.0, // huge ATR -> would exceed 10%
                atr_7d: 20_000.0,
                daily_range_avg_pct: 30.0,
                volatility_rank: 0.0,
                last_price: 50_000.0,
                price_change_24h_pct: 0.0,
                updated_at: Utc::now(),
            },
        );
        let stop = t.volatility_adjusted_stop("BTC", Direction::Short, 50_000.0, 1.5);
        assert_eq!(stop, 50_000.0 * 1.10);
    }

    #[test]
    fn single_coin_rank_is_midpoint() {
        let mut coins = HashMap::new();
        coins.insert(
            "BTC".to_string(),
            CoinVolatility {
                coin: "BTC".into(),
                atr_14d: 1.0,
                atr_7d: 1.0,
                daily_range_avg_pct: 5.0,
                volatility_rank: 0.0,
                last_price: 1.0,
                price_change_24h_pct: 0.0,
                updated_at: Utc::now(),
            },
        );
        VolatilityTracker::assign_ranks(&mut coins);
        assert_eq!(coins["BTC"].volatility_rank, 50.0);
    }

    #[test]
    fn identical_ranges_still_produce_total_ordering() {
        let mut coins = HashMap::new();
        for name in ["A", "B", "C"] {
            coins.insert(
                name.to_string(),
                CoinVolatility {
                    coin: name.into(),
                    atr_14d: 1.0,
                    atr_7d: 1.0,
                    daily_range_avg_pct: 5.0,
                    volatility_rank: 0.0,
                    last_price: 1.0,
                    price_change_24h_pct: 0.0,
                    updated_at: Utc::now(),
                },
            );
        }
        VolatilityTracker::assign_ranks(&mut coins);
        // All ranks must be valid percentiles in [0, 100]; exact tie-break
        // order is unspecified by §8.
        for cv in coins.values() {
            assert!((0.0..=100.0).contains(&cv.volatility_rank));
        }
    }
}
