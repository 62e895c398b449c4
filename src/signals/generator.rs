// =============================================================================
// Signal generator (G) — §4.6
// =============================================================================
//
// Consumes `PositionChange` events one at a time from a bounded channel
// (§9: a single consumer drains serially, so per-`(coin, direction)`
// ordering holds without a per-key mutex). Mutates the in-memory active-
// signal map directly and hands the caller whatever needs persisting —
// this component exclusively mutates Signal rows except for the mark-to-
// market fields the signal tracker (H) owns (§3 ownership table).
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::funding::FundingTracker;
use crate::position::{PositionChange, PositionTracker, TrackedPosition};
use crate::quality::TraderQuality;
use crate::signals::model::{Signal, TraderContribution};
use crate::types::{Address, Direction, PositionEventType, SignalStrength, SignalTier};
use crate::volatility::VolatilityTracker;

#[derive(Debug, Clone)]
pub struct SignalGeneratorConfig {
    pub low_conviction_pct: f64,
    pub medium_conviction_pct: f64,
    pub high_conviction_pct: f64,
    pub freshness_window_hours: i64,
    pub directional_agreement_min: f64,
    pub atr_multiple: f64,
}

#[derive(Debug, Default)]
pub struct GeneratorOutcome {
    pub created: Option<Signal>,
    pub updated: Option<Signal>,
    pub closed: Vec<Signal>,
}

pub struct SignalGenerator {
    active: RwLock<HashMap<(String, Direction), Signal>>,
    positions: Arc<PositionTracker>,
    volatility: Arc<VolatilityTracker>,
    funding: Arc<FundingTracker>,
    quality: Arc<RwLock<HashMap<Address, TraderQuality>>>,
    config: SignalGeneratorConfig,
}

struct RosterStats {
    roster: Vec<(Address, TrackedPosition)>,
    elite_count: u32,
    good_count: u32,
    total_traders: u32,
    entry_price: f64,
    avg_conviction_pct: f64,
}

impl SignalGenerator {
    pub fn new(
        positions: Arc<PositionTracker>,
        volatility: Arc<VolatilityTracker>,
        funding: Arc<FundingTracker>,
        quality: Arc<RwLock<HashMap<Address, TraderQuality>>>,
        config: SignalGeneratorConfig,
    ) -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            positions,
            volatility,
            funding,
            quality,
            config,
        }
    }

    pub fn active_signals(&self) -> Vec<Signal> {
        self.active.read().values().cloned().collect()
    }

    /// Apply a mutation to one active signal and return its post-mutation
    /// value. Used by the signal tracker (H), which owns only the mark-to-
    /// market and outcome fields (§3 ownership table) — the active map
    /// itself stays private to this component.
    pub fn update_signal<F>(&self, coin: &str, direction: Direction, f: F) -> Option<Signal>
    where
        F: FnOnce(&mut Signal),
    {
        let key = (coin.to_string(), direction);
        let mut active = self.active.write();
        let signal = active.get_mut(&key)?;
        f(signal);
        let closed = !signal.is_active;
        let result = signal.clone();
        if closed {
            active.remove(&key);
        }
        Some(result)
    }

    pub async fn handle_event(&self, event: &PositionChange, now: DateTime<Utc>) -> GeneratorOutcome {
        match event.event_type {
            PositionEventType::Open | PositionEventType::Flip => self.handle_open_or_flip(event, now),
            PositionEventType::Increase => self.handle_increase(event, now),
            PositionEventType::Decrease | PositionEventType::Close => self.handle_decrease_or_close(event, now),
        }
    }

    fn handle_open_or_flip(&self, event: &PositionChange, now: DateTime<Utc>) -> GeneratorOutcome {
        let mut outcome = GeneratorOutcome::default();
        let direction = match event.new_direction {
            Some(d) => d,
            None => return outcome,
        };
        let coin = event.coin.as_str();

        let quality = self.quality.read();
        let trader_quality = match quality.get(&event.address) {
            Some(q) if q.tier.is_tracked() => q.clone(),
            _ => return outcome,
        };
        drop(quality);

        let own_position = self
            .positions
            .positions_on(coin, direction)
            .into_iter()
            .find(|p| p.address == event.address);
        let conviction_pct = match own_position {
            Some(p) => p.conviction_pct,
            None => return outcome,
        };
        if conviction_pct < self.config.low_conviction_pct {
            return outcome;
        }

        let opposite = direction.opposite();
        if let Some(opposing_signal) = self.active.write().get_mut(&(coin.to_string(), opposite)) {
            opposing_signal.invalidate(format!("replaced_by_{direction}_signal"), now);
            outcome.closed.push(opposing_signal.clone());
        }
        self.active.write().remove(&(coin.to_string(), opposite));

        let stats = self.roster_stats(coin, direction, now);
        if !eligible(stats.elite_count, stats.good_count) {
            return outcome;
        }

        let opposing_count = self.roster_stats(coin, opposite, now).total_traders;
        let denom = stats.total_traders + opposing_count;
        let directional_agreement = if denom == 0 { 1.0 } else { stats.total_traders as f64 / denom as f64 };
        if directional_agreement < self.config.directional_agreement_min {
            return outcome;
        }

        let stop_loss = self
            .volatility
            .volatility_adjusted_stop(coin, direction, stats.entry_price, self.config.atr_multiple);
        let (tp1, tp2, tp3) = take_profits(direction, stats.entry_price, stop_loss);
        let strength = signal_strength(stats.elite_count, stats.good_count);
        let funding_context = self.funding.classify(coin, direction);
        let confidence = self.confidence(directional_agreement, stats.elite_count, strength, stats.avg_conviction_pct);
        let signal_tier = signal_tier(stats.elite_count, stats.good_count, stats.total_traders);
        let traders = self.build_contributions(&stats.roster);

        let key = (coin.to_string(), direction);
        let mut active = self.active.write();
        let signal = match active.remove(&key) {
            Some(mut existing) => {
                apply_roster(&mut existing, &stats, stop_loss, tp1, tp2, tp3, funding_context, confidence, strength, traders, now);
                existing
            }
            None => Signal {
                coin: coin.to_string(),
                direction,
                elite_count: stats.elite_count,
                good_count: stats.good_count,
                total_traders: stats.total_traders,
                traders,
                entry_price: stats.entry_price,
                current_price: stats.entry_price,
                stop_loss,
                take_profit_1: tp1,
                take_profit_2: tp2,
                take_profit_3: tp3,
                funding_context,
                avg_conviction_pct: stats.avg_conviction_pct,
                confidence,
                signal_strength: strength,
                signal_tier,
                is_active: true,
                created_at: now,
                updated_at: now,
                closed_at: None,
                outcome: None,
                final_pnl_pct: None,
                hit_stop: false,
                hit_tp1: false,
                hit_tp2: false,
                hit_tp3: false,
                invalidated: false,
                invalidation_reason: None,
                max_pnl_pct: 0.0,
                min_pnl_pct: 0.0,
                peak_price: stats.entry_price,
                trough_price: stats.entry_price,
            },
        };

        info!(coin, %direction, elite = stats.elite_count, good = stats.good_count, "signal upserted");
        active.insert(key, signal.clone());
        outcome.created = Some(signal);
        outcome
    }

    fn handle_increase(&self, event: &PositionChange, now: DateTime<Utc>) -> GeneratorOutcome {
        let mut outcome = GeneratorOutcome::default();
        let direction = match event.new_direction {
            Some(d) => d,
            None => return outcome,
        };
        let key = (event.coin.clone(), direction);
        let mut active = self.active.write();
        let Some(signal) = active.get_mut(&key) else { return outcome };

        if let Some(position) = self
            .positions
            .positions_on(&event.coin, direction)
            .into_iter()
            .find(|p| p.address == event.address)
        {
            if let Some(contrib) = signal.traders.iter_mut().find(|t| t.address == event.address) {
                contrib.position_value = position.value_usd;
                contrib.conviction_pct = position.conviction_pct;
            } else {
                let quality = self.quality.read();
                let q = quality.get(&event.address);
                signal.traders.push(TraderContribution {
                    address: event.address.clone(),
                    tier_at_creation: q.map(|q| q.tier).unwrap_or(crate::types::Tier::Weak),
                    pnl_7d: q.map(|q| q.pnl_7d).unwrap_or(0.0),
                    win_rate: q.map(|q| q.win_rate).unwrap_or(0.0),
                    position_value: position.value_usd,
                    conviction_pct: position.conviction_pct,
                    entry_price: position.entry_price,
                    opened_at: position.opened_at,
                    exited: false,
                    exited_at: None,
                });
            }
            let active: Vec<&TraderContribution> = signal.traders.iter().filter(|t| !t.exited).collect();
            signal.avg_conviction_pct = if active.is_empty() {
                0.0
            } else {
                active.iter().map(|t| t.conviction_pct).sum::<f64>() / active.len() as f64
            };
            signal.updated_at = now;
            outcome.updated = Some(signal.clone());
        }

        outcome
    }

    fn handle_decrease_or_close(&self, event: &PositionChange, now: DateTime<Utc>) -> GeneratorOutcome {
        let mut outcome = GeneratorOutcome::default();
        let direction = match event.prev_direction {
            Some(d) => d,
            None => return outcome,
        };
        let key = (event.coin.clone(), direction);
        let mut active = self.active.write();
        let Some(signal) = active.get_mut(&key) else { return outcome };

        if let Some(contrib) = signal.traders.iter_mut().find(|t| t.address == event.address) {
            contrib.exited = true;
            contrib.exited_at = Some(now);
        }

        if signal.remaining_contributor_count() == 0 {
            signal.invalidate("all_traders_exited", now);
            outcome.closed.push(signal.clone());
            active.remove(&key);
            return outcome;
        }

        let remaining_elite = signal.traders.iter().filter(|t| !t.exited && t.tier_at_creation == crate::types::Tier::Elite).count() as u32;
        let remaining_good = signal.traders.iter().filter(|t| !t.exited && t.tier_at_creation == crate::types::Tier::Good).count() as u32;
        if !eligible(remaining_elite, remaining_good) {
            signal.invalidate("below_minimum_traders", now);
            outcome.closed.push(signal.clone());
            active.remove(&key);
            return outcome;
        }

        signal.updated_at = now;
        outcome.updated = Some(signal.clone());
        outcome
    }

    /// Exit hook invoked by the fill stream (F) when a realtime fill closes
    /// all or part of a position, ahead of the next position-poll cycle
    /// (§4.8 step 4). Synthesizes the same contributor-exit handling the
    /// poll-cycle `decrease`/`close` events drive.
    pub fn handle_exit_hint(&self, address: &Address, coin: &str, direction_closed: Direction, now: DateTime<Utc>) -> GeneratorOutcome {
        let synthetic = crate::position::PositionChange {
            address: address.clone(),
            coin: coin.to_string(),
            event_type: PositionEventType::Decrease,
            prev_direction: Some(direction_closed),
            new_direction: Some(direction_closed),
            prev_size: None,
            new_size: None,
            size_change: 0.0,
            price_at_event: 0.0,
            detected_at: now,
        };
        self.handle_decrease_or_close(&synthetic, now)
    }

    /// Drops contributors whose *current* tier has fallen to weak/inactive
    /// and invalidates any signal that no longer qualifies as a result
    /// (§4.6 "Tier-sync sweep").
    pub fn tier_sync_sweep(&self, now: DateTime<Utc>) -> Vec<Signal> {
        let quality = self.quality.read();
        let mut closed = Vec::new();
        let mut active = self.active.write();

        active.retain(|_, signal| {
            signal.traders.retain(|t| {
                !t.exited
                    || quality
                        .get(&t.address)
                        .map(|q| q.tier.is_tracked())
                        .unwrap_or(false)
            });
            let qualified: Vec<&TraderContribution> = signal
                .traders
                .iter()
                .filter(|t| !t.exited)
                .filter(|t| quality.get(&t.address).map(|q| q.tier.is_tracked()).unwrap_or(false))
                .collect();

            let elite = qualified.iter().filter(|t| t.tier_at_creation == crate::types::Tier::Elite).count() as u32;
            let good = qualified.iter().filter(|t| t.tier_at_creation == crate::types::Tier::Good).count() as u32;

            if eligible(elite, good) {
                true
            } else {
                signal.invalidate("traders_no_longer_qualify", now);
                closed.push(signal.clone());
                false
            }
        });

        closed
    }

    fn roster_stats(&self, coin: &str, direction: Direction, now: DateTime<Utc>) -> RosterStats {
        let quality = self.quality.read();
        let freshness = ChronoDuration::hours(self.config.freshness_window_hours);

        let roster: Vec<(Address, TrackedPosition)> = self
            .positions
            .positions_on(coin, direction)
            .into_iter()
            .filter(|p| now - p.opened_at <= freshness)
            .filter_map(|p| quality.get(&p.address).filter(|q| q.tier.is_tracked()).map(|_| (p.address.clone(), p)))
            .collect();

        let elite_count = roster
            .iter()
            .filter(|(a, _)| quality.get(a).map(|q| q.tier == crate::types::Tier::Elite).unwrap_or(false))
            .count() as u32;
        let good_count = roster
            .iter()
            .filter(|(a, _)| quality.get(a).map(|q| q.tier == crate::types::Tier::Good).unwrap_or(false))
            .count() as u32;
        let total_traders = roster.len() as u32;

        let total_value: f64 = roster.iter().map(|(_, p)| p.value_usd).sum();
        let entry_price = if total_value > 0.0 {
            roster.iter().map(|(_, p)| p.entry_price * p.value_usd).sum::<f64>() / total_value
        } else if !roster.is_empty() {
            roster.iter().map(|(_, p)| p.entry_price).sum::<f64>() / roster.len() as f64
        } else {
            0.0
        };
        let avg_conviction_pct = if !roster.is_empty() {
            roster.iter().map(|(_, p)| p.conviction_pct).sum::<f64>() / roster.len() as f64
        } else {
            0.0
        };

        RosterStats {
            roster,
            elite_count,
            good_count,
            total_traders,
            entry_price,
            avg_conviction_pct,
        }
    }

    fn build_contributions(&self, roster: &[(Address, TrackedPosition)]) -> Vec<TraderContribution> {
        let quality = self.quality.read();
        roster
            .iter()
            .map(|(addr, pos)| {
                let q = quality.get(addr);
                TraderContribution {
                    address: addr.clone(),
                    tier_at_creation: q.map(|q| q.tier).unwrap_or(crate::types::Tier::Weak),
                    pnl_7d: q.map(|q| q.pnl_7d).unwrap_or(0.0),
                    win_rate: q.map(|q| q.win_rate).unwrap_or(0.0),
                    position_value: pos.value_usd,
                    conviction_pct: pos.conviction_pct,
                    entry_price: pos.entry_price,
                    opened_at: pos.opened_at,
                    exited: false,
                    exited_at: None,
                }
            })
            .collect()
    }

    fn confidence(&self, directional_agreement: f64, elite_count: u32, strength: SignalStrength, avg_conviction_pct: f64) -> f64 {
        let agreement_band = directional_agreement * 40.0;
        let elite_band = (elite_count.min(3) as f64) * 10.0;
        let strength_band = match strength {
            SignalStrength::Strong => 20.0,
            SignalStrength::Medium => 10.0,
        };
        let conviction_bonus = if avg_conviction_pct >= self.config.high_conviction_pct {
            10.0
        } else if avg_conviction_pct >= self.config.medium_conviction_pct {
            5.0
        } else {
            0.0
        };
        crate::types::clamp(agreement_band + elite_band + strength_band + conviction_bonus, 0.0, 100.0)
    }
}

fn eligible(elite_count: u32, good_count: u32) -> bool {
    elite_count >= 1 || good_count >= 2 || (elite_count >= 1 && good_count >= 1)
}

fn signal_strength(elite_count: u32, good_count: u32) -> SignalStrength {
    if elite_count >= 2 || good_count >= 4 || (elite_count >= 1 && good_count >= 2) {
        SignalStrength::Strong
    } else {
        SignalStrength::Medium
    }
}

fn signal_tier(elite_count: u32, good_count: u32, total_traders: u32) -> SignalTier {
    if elite_count == 1 && total_traders == 1 {
        SignalTier::EliteEntry
    } else if elite_count >= 2 || (elite_count >= 1 && good_count >= 1) {
        SignalTier::Confirmed
    } else {
        SignalTier::Consensus
    }
}

fn take_profits(direction: Direction, entry_price: f64, stop_loss: f64) -> (f64, f64, f64) {
    let distance = (entry_price - stop_loss).abs();
    match direction {
        Direction::Long => (entry_price + distance, entry_price + 2.0 * distance, entry_price + 3.0 * distance),
        Direction::Short => (entry_price - distance, entry_price - 2.0 * distance, entry_price - 3.0 * distance),
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_roster(
    signal: &mut Signal,
    stats: &RosterStats,
    stop_loss: f64,
    tp1: f64,
    tp2: f64,
    tp3: f64,
    funding_context: crate::types::FundingClassification,
    confidence: f64,
    strength: SignalStrength,
    traders: Vec<TraderContribution>,
    now: DateTime<Utc>,
) {
    signal.elite_count = stats.elite_count;
    signal.good_count = stats.good_count;
    signal.total_traders = stats.total_traders;
    signal.traders = traders;
    signal.stop_loss = stop_loss;
    signal.take_profit_1 = tp1;
    signal.take_profit_2 = tp2;
    signal.take_profit_3 = tp3;
    signal.funding_context = funding_context;
    signal.avg_conviction_pct = stats.avg_conviction_pct;
    signal.confidence = confidence;
    signal.signal_strength = strength;
    signal.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ExchangeClient, RateLimiter};
    use crate::types::{PnlMethod, StrategyClass, Tier};
    use crate::volatility::CoinVolatility;

    fn harness() -> (SignalGenerator, Arc<PositionTracker>, Arc<VolatilityTracker>, Arc<FundingTracker>, Arc<RwLock<HashMap<Address, TraderQuality>>>) {
        let exchange = Arc::new(ExchangeClient::new("https://example.invalid/info"));
        let limiter = Arc::new(RateLimiter::from_requests_per_second(100.0));
        let positions = Arc::new(PositionTracker::new(exchange.clone(), limiter.clone(), 0.0, 10));
        let volatility = Arc::new(VolatilityTracker::new(exchange.clone(), limiter.clone()));
        let funding = Arc::new(FundingTracker::new(exchange.clone(), 0.0001));
        let quality: Arc<RwLock<HashMap<Address, TraderQuality>>> = Arc::new(RwLock::new(HashMap::new()));
        let generator = SignalGenerator::new(
            positions.clone(),
            volatility.clone(),
            funding.clone(),
            quality.clone(),
            SignalGeneratorConfig {
                low_conviction_pct: 5.0,
                medium_conviction_pct: 15.0,
                high_conviction_pct: 30.0,
                freshness_window_hours: 4,
                directional_agreement_min: 0.65,
                atr_multiple: 1.5,
            },
        );
        (generator, positions, volatility, funding, quality)
    }

    fn elite_quality(address: &Address) -> TraderQuality {
        TraderQuality {
            address: address.clone(),
            tier: Tier::Elite,
            is_tracked: true,
            account_value: 100_000.0,
            pnl_7d: 10_000.0,
            pnl_30d: 20_000.0,
            pnl_60d: 25_000.0,
            pnl_90d: 30_000.0,
            roi_7d_pct: 10.0,
            roi_30d_pct: 20.0,
            roi_60d_pct: 25.0,
            roi_90d_pct: 30.0,
            pnl_calculation_method: PnlMethod::EquityChange,
            win_rate: 0.65,
            profit_factor: 2.5,
            total_trades: 40,
            max_drawdown_30d_pct: 10.0,
            consistency_score: 80.0,
            sortino_ratio: 1.5,
            strategy_class: StrategyClass::Swing,
            tier_change_count: 0,
            analyzed_at: Utc::now(),
        }
    }

    fn btc_long(address: &Address, entry_price: f64, now: DateTime<Utc>) -> TrackedPosition {
        TrackedPosition {
            address: address.clone(),
            coin: "BTC".to_string(),
            direction: Direction::Long,
            size: 1.0,
            entry_price,
            value_usd: 50_000.0,
            leverage: 1.0,
            unrealized_pnl: 0.0,
            margin_used: 50_000.0,
            liquidation_price: None,
            has_pending_entry: false,
            has_stop_order: false,
            has_tp_order: false,
            opened_at: now,
            peak_unrealized_pnl: 0.0,
            trough_unrealized_pnl: 0.0,
            conviction_pct: 50.0,
        }
    }

    fn open_event(address: &Address, coin: &str, direction: Direction, now: DateTime<Utc>) -> crate::position::PositionChange {
        crate::position::PositionChange {
            address: address.clone(),
            coin: coin.to_string(),
            event_type: PositionEventType::Open,
            prev_direction: None,
            new_direction: Some(direction),
            prev_size: None,
            new_size: Some(1.0),
            size_change: 1.0,
            price_at_event: 50_000.0,
            detected_at: now,
        }
    }

    /// §8 scenario 1: elite wallet opens a fresh BTC long -> a signal is born
    /// with entry/stop/targets derived from the cached ATR.
    #[tokio::test]
    async fn elite_open_creates_signal_with_volatility_adjusted_stop() {
        let (generator, positions, volatility, _funding, quality) = harness();
        let now = Utc::now();
        let addr = Address::new("0xaaa");

        quality.write().insert(addr.clone(), elite_quality(&addr));
        positions.seed_position_for_test(btc_long(&addr, 50_000.0, now));
        volatility.seed_for_test(CoinVolatility {
            coin: "BTC".to_string(),
            atr_14d: 600.0,
            atr_7d: 600.0,
            daily_range_avg_pct: 2.0,
            volatility_rank: 50.0,
            last_price: 50_000.0,
            price_change_24h_pct: 0.0,
            updated_at: now,
        });

        let event = open_event(&addr, "BTC", Direction::Long, now);
        let outcome = generator.handle_event(&event, now).await;

        let signal = outcome.created.expect("signal should be created");
        assert_eq!(signal.entry_price, 50_000.0);
        assert_eq!(signal.stop_loss, 50_000.0 - 1.5 * 600.0);
        assert_eq!(signal.take_profit_1, 50_900.0);
        assert_eq!(signal.take_profit_2, 51_800.0);
        assert_eq!(signal.take_profit_3, 52_700.0);
        assert_eq!(signal.elite_count, 1);
        assert_eq!(signal.signal_tier, SignalTier::EliteEntry);
        assert_eq!(signal.signal_strength, SignalStrength::Medium);
        assert!(signal.is_active);
    }

    /// §8 scenario 2: the sole contributor closes out -> the signal is
    /// invalidated with `all_traders_exited`.
    #[tokio::test]
    async fn all_contributors_exiting_invalidates_signal() {
        let (generator, positions, volatility, _funding, quality) = harness();
        let now = Utc::now();
        let addr = Address::new("0xaaa");

        quality.write().insert(addr.clone(), elite_quality(&addr));
        positions.seed_position_for_test(btc_long(&addr, 50_000.0, now));
        volatility.seed_for_test(CoinVolatility {
            coin: "BTC".to_string(),
            atr_14d: 600.0,
            atr_7d: 600.0,
            daily_range_avg_pct: 2.0,
            volatility_rank: 50.0,
            last_price: 50_000.0,
            price_change_24h_pct: 0.0,
            updated_at: now,
        });

        let open = open_event(&addr, "BTC", Direction::Long, now);
        let created = generator.handle_event(&open, now).await.created.expect("signal created");
        assert!(created.is_active);

        positions.clear_position_for_test(&addr, "BTC");
        let close = crate::position::PositionChange {
            address: addr.clone(),
            coin: "BTC".to_string(),
            event_type: PositionEventType::Close,
            prev_direction: Some(Direction::Long),
            new_direction: None,
            prev_size: Some(1.0),
            new_size: None,
            size_change: -1.0,
            price_at_event: 50_500.0,
            detected_at: now,
        };
        let outcome = generator.handle_event(&close, now).await;

        let closed = outcome.closed.first().expect("signal should close");
        assert!(!closed.is_active);
        assert!(closed.invalidated);
        assert_eq!(closed.invalidation_reason.as_deref(), Some("all_traders_exited"));
    }

    /// §8 scenario 3: a second elite opens the opposite side while a signal
    /// is active -> the old signal is replaced, a new one is created.
    #[tokio::test]
    async fn opposite_direction_open_replaces_existing_signal() {
        let (generator, positions, volatility, _funding, quality) = harness();
        let now = Utc::now();
        let addr_long = Address::new("0xaaa");
        let addr_short = Address::new("0xbbb");
        let addr_short2 = Address::new("0xccc");

        quality.write().insert(addr_long.clone(), elite_quality(&addr_long));
        quality.write().insert(addr_short.clone(), elite_quality(&addr_short));
        quality.write().insert(addr_short2.clone(), elite_quality(&addr_short2));
        volatility.seed_for_test(CoinVolatility {
            coin: "BTC".to_string(),
            atr_14d: 600.0,
            atr_7d: 600.0,
            daily_range_avg_pct: 2.0,
            volatility_rank: 50.0,
            last_price: 50_000.0,
            price_change_24h_pct: 0.0,
            updated_at: now,
        });

        positions.seed_position_for_test(btc_long(&addr_long, 50_000.0, now));
        let long_open = open_event(&addr_long, "BTC", Direction::Long, now);
        let long_signal = generator.handle_event(&long_open, now).await.created.expect("long signal created");
        assert!(long_signal.is_active);

        let mut short_pos = btc_long(&addr_short, 51_000.0, now);
        short_pos.direction = Direction::Short;
        positions.seed_position_for_test(short_pos);
        let mut short_pos2 = btc_long(&addr_short2, 51_000.0, now);
        short_pos2.direction = Direction::Short;
        positions.seed_position_for_test(short_pos2);
        let short_open = open_event(&addr_short, "BTC", Direction::Short, now);
        let outcome = generator.handle_event(&short_open, now).await;

        let replaced = outcome.closed.iter().find(|s| s.direction == Direction::Long).expect("long signal replaced");
        assert!(!replaced.is_active);
        assert_eq!(replaced.invalidation_reason.as_deref(), Some("replaced_by_short_signal"));

        let new_short = outcome.created.expect("short signal created");
        assert_eq!(new_short.direction, Direction::Short);
        assert!(new_short.is_active);
        assert_eq!(new_short.entry_price, 51_000.0);
    }

    #[test]
    fn eligibility_rules() {
        assert!(eligible(1, 0));
        assert!(eligible(0, 2));
        assert!(eligible(1, 1));
        assert!(!eligible(0, 1));
        assert!(!eligible(0, 0));
    }

    #[test]
    fn strength_rules() {
        assert_eq!(signal_strength(2, 0), SignalStrength::Strong);
        assert_eq!(signal_strength(0, 4), SignalStrength::Strong);
        assert_eq!(signal_strength(1, 2), SignalStrength::Strong);
        assert_eq!(signal_strength(1, 0), SignalStrength::Medium);
    }

    #[test]
    fn tier_classification() {
        assert_eq!(signal_tier(1, 0, 1), SignalTier::EliteEntry);
        assert_eq!(signal_tier(1, 1, 2), SignalTier::Confirmed);
        assert_eq!(signal_tier(0, 3, 3), SignalTier::Consensus);
    }

    #[test]
    fn take_profits_scale_by_stop_distance_long() {
        let (tp1, tp2, tp3) = take_profits(Direction::Long, 100.0, 98.0);
        assert_eq!(tp1, 102.0);
        assert_eq!(tp2, 104.0);
        assert_eq!(tp3, 106.0);
    }

    #[test]
    fn take_profits_scale_by_stop_distance_short() {
        let (tp1, tp2, tp3) = take_profits(Direction::Short, 100.0, 102.0);
        assert_eq!(tp1, 98.0);
        assert_eq!(tp2, 96.0);
        assert_eq!(tp3, 94.0);
    }
}
