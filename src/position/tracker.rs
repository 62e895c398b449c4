// =============================================================================
// Position tracker (E) — §4.5
// =============================================================================
//
// Runs on a fixed interval (default 60 s, `RuntimeConfig::position_poll_interval_secs`).
// Fetches `allMids` once, then for each tracked wallet fetches
// `clearinghouseState` + `openOrders`, builds this cycle's `TrackedPosition`
// set, diffs it against the in-memory previous set, and returns both —
// persistence order (delete polled set, insert fresh, then publish changes)
// is the caller's responsibility so the Signal Generator never observes a
// half-written poll cycle (§4.5 "Persistence order").
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::stream::{self, StreamExt};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::exchange::models::AllMidsResponse;
use crate::exchange::{ExchangeClient, RateLimiter};
use crate::position::model::{PositionChange, TrackedPosition};
use crate::types::{Address, Direction, PositionEventType};

/// Positions within 5 % of the previous cycle's size don't count as a
/// change (§8 boundary behaviour: "exactly ±5 % → no event").
const SIZE_CHANGE_THRESHOLD: f64 = 0.05;
const NEWLY_SEEN_STALE_HOURS: i64 = 48;
const FRESH_OPEN_GRACE_HOURS: i64 = 1;
const FIND_OPEN_TIME_LOOKBACK_DAYS: i64 = 90;

pub struct WalletPollResult {
    pub address: Address,
    pub positions: Vec<TrackedPosition>,
    pub changes: Vec<PositionChange>,
}

pub struct PositionTracker {
    exchange: Arc<ExchangeClient>,
    rate_limiter: Arc<RateLimiter>,
    min_position_value_usd: f64,
    batch_size: usize,
    previous: RwLock<HashMap<Address, HashMap<String, TrackedPosition>>>,
    seen_wallets: RwLock<HashSet<Address>>,
}

impl PositionTracker {
    pub fn new(exchange: Arc<ExchangeClient>, rate_limiter: Arc<RateLimiter>, min_position_value_usd: f64, batch_size: usize) -> Self {
        Self {
            exchange,
            rate_limiter,
            min_position_value_usd,
            batch_size: batch_size.max(1),
            previous: RwLock::new(HashMap::new()),
            seen_wallets: RwLock::new(HashSet::new()),
        }
    }

    /// Current snapshot of every wallet's tracked position in `direction`
    /// on `coin`, as of the last completed poll cycle. Read by the signal
    /// generator when building a signal's contributor roster (§4.6 step 3).
    pub fn positions_on(&self, coin: &str, direction: Direction) -> Vec<TrackedPosition> {
        self.previous
            .read()
            .values()
            .filter_map(|m| m.get(coin))
            .filter(|p| p.direction == direction)
            .cloned()
            .collect()
    }

    /// Test-only seam: inject a wallet's current position directly into
    /// the "last poll" cache so signal-generator tests can exercise the
    /// full roster-building path (§4.6) without a live exchange client.
    #[cfg(test)]
    pub(crate) fn seed_position_for_test(&self, position: TrackedPosition) {
        self.previous
            .write()
            .entry(position.address.clone())
            .or_default()
            .insert(position.coin.clone(), position);
    }

    /// Test-only seam: remove a wallet's cached position for `coin`,
    /// simulating a close observed on the previous poll cycle.
    #[cfg(test)]
    pub(crate) fn clear_position_for_test(&self, address: &Address, coin: &str) {
        if let Some(m) = self.previous.write().get_mut(address) {
            m.remove(coin);
        }
    }

    /// Populate the in-memory "seen wallets" set from durable storage at
    /// startup, so wallets already known before this process started don't
    /// get treated as newly discovered (§4.5 step 5).
    pub fn seed_seen_wallets(&self, wallets: impl IntoIterator<Item = Address>) {
        let mut seen = self.seen_wallets.write();
        seen.extend(wallets);
    }

    pub async fn poll_cycle(&self, tracked_wallets: &[Address], now: DateTime<Utc>) -> Vec<WalletPollResult> {
        let mids = match self.exchange.all_mids().await {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "allMids unavailable this cycle, skipping position poll");
                return Vec::new();
            }
        };

        let batch_size = self.batch_size;
        let results: Vec<Option<WalletPollResult>> = stream::iter(tracked_wallets.iter().cloned())
            .map(|address| self.poll_one(address, &mids, now))
            .buffer_unordered(batch_size)
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }

    async fn poll_one(&self, address: Address, mids: &AllMidsResponse, now: DateTime<Utc>) -> Option<WalletPollResult> {
        self.rate_limiter.wait_turn().await;
        let state = match self.exchange.clearinghouse_state(address.as_ref()).await {
            Ok(s) => s,
            Err(e) => {
                debug!(address = %address, error = %e, "clearinghouseState unavailable, skipping wallet this cycle");
                return None;
            }
        };

        self.rate_limiter.wait_turn().await;
        let open_orders = match self.exchange.open_orders(address.as_ref()).await {
            Ok(o) => o,
            Err(e) => {
                debug!(address = %address, error = %e, "openOrders unavailable, skipping wallet this cycle");
                return None;
            }
        };

        let account_value = state.margin_summary.account_value;
        let is_newly_seen = !self.seen_wallets.read().contains(&address);

        let prior_positions = self.previous.read().get(&address).cloned().unwrap_or_default();
        let mut current: HashMap<String, TrackedPosition> = HashMap::new();

        for wrapper in &state.asset_positions {
            let raw = &wrapper.position;
            let value_usd = raw.position_value.abs();
            if value_usd < self.min_position_value_usd {
                continue;
            }

            let direction = raw.direction();
            let prior = prior_positions.get(&raw.coin);

            let opened_at = self
                .derive_opened_at(&address, raw.coin.as_str(), direction, prior, is_newly_seen, now)
                .await;

            let (has_pending_entry, has_stop_order, has_tp_order) = open_orders
                .iter()
                .filter(|o| o.coin == raw.coin)
                .fold((false, false, false), |(pending, stop, tp), o| {
                    (
                        pending || o.is_pending_entry_for(direction),
                        stop || o.is_stop_for(direction),
                        tp || o.is_tp_for(direction),
                    )
                });

            let (peak, trough) = match prior {
                Some(p) if p.direction == direction => (
                    p.peak_unrealized_pnl.max(raw.unrealized_pnl),
                    p.trough_unrealized_pnl.min(raw.unrealized_pnl),
                ),
                _ => (raw.unrealized_pnl, raw.unrealized_pnl),
            };

            let conviction_pct = if account_value > 0.0 {
                (value_usd / account_value * 100.0).min(100.0)
            } else {
                0.0
            };

            current.insert(
                raw.coin.clone(),
                TrackedPosition {
                    address: address.clone(),
                    coin: raw.coin.clone(),
                    direction,
                    size: raw.size(),
                    entry_price: raw.entry_px,
                    value_usd,
                    leverage: raw.leverage.value,
                    unrealized_pnl: raw.unrealized_pnl,
                    margin_used: raw.margin_used,
                    liquidation_price: raw.liquidation_px,
                    has_pending_entry,
                    has_stop_order,
                    has_tp_order,
                    opened_at,
                    peak_unrealized_pnl: peak,
                    trough_unrealized_pnl: trough,
                    conviction_pct,
                },
            );
        }

        let changes = if is_newly_seen {
            Vec::new()
        } else {
            detect_changes(&prior_positions, &current, mids, now)
        };

        self.seen_wallets.write().insert(address.clone());
        self.previous.write().insert(address.clone(), current.clone());

        Some(WalletPollResult {
            address,
            positions: current.into_values().collect(),
            changes,
        })
    }

    /// §4.5 step on deriving `opened_at`.
    async fn derive_opened_at(
        &self,
        address: &Address,
        coin: &str,
        direction: Direction,
        prior: Option<&TrackedPosition>,
        is_newly_seen: bool,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        if let Some(p) = prior {
            if p.direction == direction {
                return p.opened_at;
            }
        }

        self.rate_limiter.wait_turn().await;
        let derived = self
            .exchange
            .find_position_open_time(address.as_ref(), coin, direction, FIND_OPEN_TIME_LOOKBACK_DAYS)
            .await
            .ok()
            .flatten();

        if is_newly_seen {
            match derived {
                Some(ts_ms) => DateTime::from_timestamp_millis(ts_ms).unwrap_or(now),
                None => now - ChronoDuration::hours(NEWLY_SEEN_STALE_HOURS),
            }
        } else {
            match derived {
                Some(ts_ms) => {
                    let derived_at = DateTime::from_timestamp_millis(ts_ms).unwrap_or(now);
                    if now - derived_at < ChronoDuration::hours(FRESH_OPEN_GRACE_HOURS) {
                        now
                    } else {
                        derived_at
                    }
                }
                None => now,
            }
        }
    }
}

fn detect_changes(
    prior: &HashMap<String, TrackedPosition>,
    current: &HashMap<String, TrackedPosition>,
    mids: &AllMidsResponse,
    now: DateTime<Utc>,
) -> Vec<PositionChange> {
    let mut changes = Vec::new();
    let mut coins: HashSet<&str> = HashSet::new();
    coins.extend(prior.keys().map(String::as_str));
    coins.extend(current.keys().map(String::as_str));

    for coin in coins {
        let was = prior.get(coin);
        let now_pos = current.get(coin);
        let price = mids.get_f64(coin).unwrap_or(0.0);

        match (was, now_pos) {
            (None, Some(n)) => changes.push(PositionChange {
                address: n.address.clone(),
                coin: coin.to_string(),
                event_type: PositionEventType::Open,
                prev_direction: None,
                new_direction: Some(n.direction),
                prev_size: None,
                new_size: Some(n.size),
                size_change: n.size,
                price_at_event: if price > 0.0 { price } else { n.entry_price },
                detected_at: now,
            }),
            (Some(p), None) => changes.push(PositionChange {
                address: p.address.clone(),
                coin: coin.to_string(),
                event_type: PositionEventType::Close,
                prev_direction: Some(p.direction),
                new_direction: None,
                prev_size: Some(p.size),
                new_size: None,
                size_change: -p.size,
                price_at_event: if price > 0.0 { price } else { p.entry_price },
                detected_at: now,
            }),
            (Some(p), Some(n)) if p.direction != n.direction => changes.push(PositionChange {
                address: n.address.clone(),
                coin: coin.to_string(),
                event_type: PositionEventType::Flip,
                prev_direction: Some(p.direction),
                new_direction: Some(n.direction),
                prev_size: Some(p.size),
                new_size: Some(n.size),
                size_change: n.size - p.size,
                price_at_event: if price > 0.0 { price } else { n.entry_price },
                detected_at: now,
            }),
            (Some(p), Some(n)) => {
                let ratio = if p.size > 0.0 { n.size / p.size } else { 1.0 };
                if ratio > 1.0 + SIZE_CHANGE_THRESHOLD {
                    changes.push(PositionChange {
                        address: n.address.clone(),
                        coin: coin.to_string(),
                        event_type: PositionEventType::Increase,
                        prev_direction: Some(p.direction),
                        new_direction: Some(n.direction),
                        prev_size: Some(p.size),
                        new_size: Some(n.size),
                        size_change: n.size - p.size,
                        price_at_event: if price > 0.0 { price } else { n.entry_price },
                        detected_at: now,
                    });
                } else if ratio < 1.0 - SIZE_CHANGE_THRESHOLD {
                    changes.push(PositionChange {
                        address: n.address.clone(),
                        coin: coin.to_string(),
                        event_type: PositionEventType::Decrease,
                        prev_direction: Some(p.direction),
                        new_direction: Some(n.direction),
                        prev_size: Some(p.size),
                        new_size: Some(n.size),
                        size_change: n.size - p.size,
                        price_at_event: if price > 0.0 { price } else { n.entry_price },
                        detected_at: now,
                    });
                }
            }
            (None, None) => unreachable!(),
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(coin: &str, direction: Direction, size: f64) -> TrackedPosition {
        TrackedPosition {
            address: Address::new("0xabc"),
            coin: coin.to_string(),
            direction,
            size,
            entry_price: 100.0,
            value_usd: 1000.0,
            leverage: 1.0,
            unrealized_pnl: 0.0,
            margin_used: 100.0,
            liquidation_price: None,
            has_pending_entry: false,
            has_stop_order: false,
            has_tp_order: false,
            opened_at: Utc::now(),
            peak_unrealized_pnl: 0.0,
            trough_unrealized_pnl: 0.0,
            conviction_pct: 10.0,
        }
    }

    fn mids() -> AllMidsResponse {
        let mut m = std::collections::HashMap::new();
        m.insert("BTC".to_string(), "50000".to_string());
        AllMidsResponse(m)
    }

    #[test]
    fn open_detected_when_absent_then_present() {
        let prior = HashMap::new();
        let mut current = HashMap::new();
        current.insert("BTC".to_string(), pos("BTC", Direction::Long, 1.0));
        let changes = detect_changes(&prior, &current, &mids(), Utc::now());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].event_type, PositionEventType::Open);
    }

    #[test]
    fn close_detected_when_present_then_absent() {
        let mut prior = HashMap::new();
        prior.insert("BTC".to_string(), pos("BTC", Direction::Long, 1.0));
        let current = HashMap::new();
        let changes = detect_changes(&prior, &current, &mids(), Utc::now());
        assert_eq!(changes[0].event_type, PositionEventType::Close);
    }

    #[test]
    fn flip_detected_on_direction_change() {
        let mut prior = HashMap::new();
        prior.insert("BTC".to_string(), pos("BTC", Direction::Long, 1.0));
        let mut current = HashMap::new();
        current.insert("BTC".to_string(), pos("BTC", Direction::Short, 1.0));
        let changes = detect_changes(&prior, &current, &mids(), Utc::now());
        assert_eq!(changes[0].event_type, PositionEventType::Flip);
    }

    #[test]
    fn exactly_5pct_change_is_not_an_event() {
        let mut prior = HashMap::new();
        prior.insert("BTC".to_string(), pos("BTC", Direction::Long, 1.0));
        let mut current = HashMap::new();
        current.insert("BTC".to_string(), pos("BTC", Direction::Long, 1.05));
        let changes = detect_changes(&prior, &current, &mids(), Utc::now());
        assert!(changes.is_empty());
    }

    #[test]
    fn six_pct_increase_is_an_event() {
        let mut prior = HashMap::new();
        prior.insert("BTC".to_string(), pos("BTC", Direction::Long, 1.0));
        let mut current = HashMap::new();
        current.insert("BTC".to_string(), pos("BTC", Direction::Long, 1.06));
        let changes = detect_changes(&prior, &current, &mids(), Utc::now());
        assert_eq!(changes[0].event_type, PositionEventType::Increase);
    }

    #[test]
    fn no_change_when_size_stable() {
        let mut prior = HashMap::new();
        prior.insert("BTC".to_string(), pos("BTC", Direction::Long, 1.0));
        let mut current = HashMap::new();
        current.insert("BTC".to_string(), pos("BTC", Direction::Long, 1.0));
        let changes = detect_changes(&prior, &current, &mids(), Utc::now());
        assert!(changes.is_empty());
    }
}
