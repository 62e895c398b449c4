// =============================================================================
// Signal tracker (H) — §4.7
// =============================================================================
//
// Runs every 30 s. Marks every active signal to the latest mid price,
// flips stop/TP/expiry/invalidation flags, and on close rolls the result
// into a Welford-style running `AssetPerformance` aggregate per coin. This
// is the only component allowed to touch a signal's mark-to-market and
// outcome fields (§3 ownership table) — it mutates them through
// `SignalGenerator::update_signal` rather than owning the signal map.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::exchange::ExchangeClient;
use crate::signals::{Signal, SignalGenerator};
use crate::types::{Direction, SignalOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetPerformance {
    pub coin: String,
    pub total_signals: u64,
    pub winning_signals: u64,
    pub win_rate: f64,
    pub avg_pnl_pct: f64,
    pub total_pnl_pct: f64,
    pub avg_duration_hours: f64,
    pub best_signal_pnl_pct: f64,
    pub worst_signal_pnl_pct: f64,
}

impl AssetPerformance {
    fn new(coin: &str) -> Self {
        Self {
            coin: coin.to_string(),
            total_signals: 0,
            winning_signals: 0,
            win_rate: 0.0,
            avg_pnl_pct: 0.0,
            total_pnl_pct: 0.0,
            avg_duration_hours: 0.0,
            best_signal_pnl_pct: f64::MIN,
            worst_signal_pnl_pct: f64::MAX,
        }
    }

    /// Welford-style running update on close: each new observation shifts
    /// the running mean by `(value - mean) / n` rather than recomputing
    /// from a stored sum, so this never needs the full history in memory.
    fn roll_in(&mut self, final_pnl_pct: f64, duration_hours: f64) {
        self.total_signals += 1;
        if final_pnl_pct > 0.0 {
            self.winning_signals += 1;
        }
        let n = self.total_signals as f64;
        self.avg_pnl_pct += (final_pnl_pct - self.avg_pnl_pct) / n;
        self.avg_duration_hours += (duration_hours - self.avg_duration_hours) / n;
        self.total_pnl_pct += final_pnl_pct;
        self.win_rate = self.winning_signals as f64 / n * 100.0;
        self.best_signal_pnl_pct = self.best_signal_pnl_pct.max(final_pnl_pct);
        self.worst_signal_pnl_pct = self.worst_signal_pnl_pct.min(final_pnl_pct);
    }
}

pub struct SignalTracker {
    exchange: Arc<ExchangeClient>,
    generator: Arc<SignalGenerator>,
    max_signal_hours: i64,
    performance: RwLock<HashMap<String, AssetPerformance>>,
}

impl SignalTracker {
    pub fn new(exchange: Arc<ExchangeClient>, generator: Arc<SignalGenerator>, max_signal_hours: i64) -> Self {
        Self {
            exchange,
            generator,
            max_signal_hours,
            performance: RwLock::new(HashMap::new()),
        }
    }

    pub fn performance_for(&self, coin: &str) -> Option<AssetPerformance> {
        self.performance.read().get(coin).cloned()
    }

    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Vec<Signal> {
        let signals = self.generator.active_signals();
        if signals.is_empty() {
            return Vec::new();
        }

        let mids = match self.exchange.all_mids().await {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "allMids unavailable, skipping signal mark-to-market this cycle");
                return Vec::new();
            }
        };

        let mut closed = Vec::new();
        for signal in &signals {
            let Some(current_price) = mids.get_f64(&signal.coin) else {
                continue;
            };

            if let Some(updated) = self.generator.update_signal(&signal.coin, signal.direction, |s| {
                mark_to_market(s, current_price, self.max_signal_hours, now);
            }) {
                if !updated.is_active {
                    self.roll_performance(&updated);
                    closed.push(updated);
                }
            }
        }

        closed
    }

    fn roll_performance(&self, signal: &Signal) {
        let Some(final_pnl_pct) = signal.final_pnl_pct else { return };
        let duration_hours = signal
            .closed_at
            .map(|closed_at| (closed_at - signal.created_at).num_minutes() as f64 / 60.0)
            .unwrap_or(0.0);

        let mut perf = self.performance.write();
        let entry = perf.entry(signal.coin.clone()).or_insert_with(|| AssetPerformance::new(&signal.coin));
        entry.roll_in(final_pnl_pct, duration_hours);
        info!(coin = %signal.coin, final_pnl_pct, total_signals = entry.total_signals, "asset performance updated");
    }
}

fn mark_to_market(signal: &mut Signal, current_price: f64, max_signal_hours: i64, now: DateTime<Utc>) {
    if !signal.is_active {
        return;
    }

    signal.current_price = current_price;
    let pnl_pct = Signal::pnl_pct(signal.direction, signal.entry_price, current_price);
    signal.max_pnl_pct = signal.max_pnl_pct.max(pnl_pct);
    signal.min_pnl_pct = signal.min_pnl_pct.min(pnl_pct);

    match signal.direction {
        Direction::Long => {
            signal.peak_price = signal.peak_price.max(current_price);
            signal.trough_price = signal.trough_price.min(current_price);
        }
        Direction::Short => {
            signal.peak_price = signal.peak_price.min(current_price);
            signal.trough_price = signal.trough_price.max(current_price);
        }
    }

    signal.updated_at = now;

    let stop_hit = match signal.direction {
        Direction::Long => current_price <= signal.stop_loss,
        Direction::Short => current_price >= signal.stop_loss,
    };
    let tp1_hit = tp_hit(signal.direction, current_price, signal.take_profit_1);
    let tp2_hit = tp_hit(signal.direction, current_price, signal.take_profit_2);
    let tp3_hit = tp_hit(signal.direction, current_price, signal.take_profit_3);

    signal.hit_tp1 = signal.hit_tp1 || tp1_hit;
    signal.hit_tp2 = signal.hit_tp2 || tp2_hit;

    if signal.invalidated {
        close_signal(signal, SignalOutcome::Closed, pnl_pct, now);
        return;
    }

    if stop_hit {
        signal.hit_stop = true;
        close_signal(signal, SignalOutcome::Stopped, pnl_pct, now);
        return;
    }

    if tp3_hit {
        signal.hit_tp3 = true;
        close_signal(signal, SignalOutcome::Tp3, pnl_pct, now);
        return;
    }

    let age_hours = (now - signal.created_at).num_minutes() as f64 / 60.0;
    if age_hours >= max_signal_hours as f64 {
        close_signal(signal, SignalOutcome::Expired, pnl_pct, now);
    }
}

fn tp_hit(direction: Direction, current_price: f64, tp: f64) -> bool {
    match direction {
        Direction::Long => current_price >= tp,
        Direction::Short => current_price <= tp,
    }
}

fn close_signal(signal: &mut Signal, outcome: SignalOutcome, final_pnl_pct: f64, now: DateTime<Utc>) {
    signal.is_active = false;
    signal.outcome = Some(outcome);
    signal.final_pnl_pct = Some(final_pnl_pct);
    signal.closed_at = Some(now);
    signal.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FundingClassification, SignalStrength, SignalTier};

    fn base_signal(direction: Direction, entry: f64, stop: f64) -> Signal {
        let (tp1, tp2, tp3) = match direction {
            Direction::Long => (entry + 10.0, entry + 20.0, entry + 30.0),
            Direction::Short => (entry - 10.0, entry - 20.0, entry - 30.0),
        };
        Signal {
            coin: "BTC".into(),
            direction,
            elite_count: 1,
            good_count: 0,
            total_traders: 1,
            traders: vec![],
            entry_price: entry,
            current_price: entry,
            stop_loss: stop,
            take_profit_1: tp1,
            take_profit_2: tp2,
            take_profit_3: tp3,
            funding_context: FundingClassification::Neutral,
            avg_conviction_pct: 10.0,
            confidence: 50.0,
            signal_strength: SignalStrength::Medium,
            signal_tier: SignalTier::EliteEntry,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
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
            peak_price: entry,
            trough_price: entry,
        }
    }

    #[test]
    fn stop_hit_closes_long() {
        let mut s = base_signal(Direction::Long, 100.0, 95.0);
        mark_to_market(&mut s, 94.0, 168, Utc::now());
        assert!(!s.is_active);
        assert_eq!(s.outcome, Some(SignalOutcome::Stopped));
        assert!(s.hit_stop);
    }

    #[test]
    fn tp1_sets_flag_without_closing() {
        let mut s = base_signal(Direction::Long, 100.0, 95.0);
        mark_to_market(&mut s, 111.0, 168, Utc::now());
        assert!(s.is_active);
        assert!(s.hit_tp1);
    }

    #[test]
    fn tp3_closes_signal() {
        let mut s = base_signal(Direction::Long, 100.0, 95.0);
        mark_to_market(&mut s, 131.0, 168, Utc::now());
        assert!(!s.is_active);
        assert_eq!(s.outcome, Some(SignalOutcome::Tp3));
    }

    #[test]
    fn expiry_closes_at_max_age() {
        let mut s = base_signal(Direction::Long, 100.0, 95.0);
        s.created_at = Utc::now() - chrono::Duration::hours(200);
        mark_to_market(&mut s, 101.0, 168, Utc::now());
        assert!(!s.is_active);
        assert_eq!(s.outcome, Some(SignalOutcome::Expired));
    }

    #[test]
    fn final_pnl_matches_direction_formula() {
        let mut s = base_signal(Direction::Short, 100.0, 105.0);
        mark_to_market(&mut s, 106.0, 168, Utc::now());
        let expected = (100.0 - 106.0) / 100.0 * 100.0;
        assert!((s.final_pnl_pct.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn asset_performance_rolls_welford_mean() {
        let mut perf = AssetPerformance::new("BTC");
        perf.roll_in(10.0, 5.0);
        perf.roll_in(-5.0, 15.0);
        assert_eq!(perf.total_signals, 2);
        assert_eq!(perf.winning_signals, 1);
        assert!((perf.avg_pnl_pct - 2.5).abs() < 1e-9);
        assert!((perf.avg_duration_hours - 10.0).abs() < 1e-9);
        assert_eq!(perf.win_rate, 50.0);
    }
}
