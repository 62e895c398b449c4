// =============================================================================
// Signal entities (§3)
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Address, Direction, FundingClassification, SignalOutcome, SignalStrength, SignalTier, Tier};

/// Snapshot of one wallet's contribution to a signal, captured at the time
/// it joined the roster and updated as its position changes (§4.6 step 10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderContribution {
    pub address: Address,
    pub tier_at_creation: Tier,
    pub pnl_7d: f64,
    pub win_rate: f64,
    pub position_value: f64,
    pub conviction_pct: f64,
    pub entry_price: f64,
    pub opened_at: DateTime<Utc>,
    pub exited: bool,
    pub exited_at: Option<DateTime<Utc>>,
}

/// An active directional recommendation on a `(coin, direction)` pair
/// (§3 Signal entity). At most one active signal exists per pair (P2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub coin: String,
    pub direction: Direction,
    pub elite_count: u32,
    pub good_count: u32,
    pub total_traders: u32,
    pub traders: Vec<TraderContribution>,
    pub entry_price: f64,
    pub current_price: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub take_profit_3: f64,
    pub funding_context: FundingClassification,
    pub avg_conviction_pct: f64,
    pub confidence: f64,
    pub signal_strength: SignalStrength,
    pub signal_tier: SignalTier,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub outcome: Option<SignalOutcome>,
    pub final_pnl_pct: Option<f64>,
    pub hit_stop: bool,
    pub hit_tp1: bool,
    pub hit_tp2: bool,
    pub hit_tp3: bool,
    pub invalidated: bool,
    pub invalidation_reason: Option<String>,
    pub max_pnl_pct: f64,
    pub min_pnl_pct: f64,
    pub peak_price: f64,
    pub trough_price: f64,
}

impl Signal {
    pub fn key(&self) -> (String, Direction) {
        (self.coin.clone(), self.direction)
    }

    /// Signal-level P&L for a direction/entry/current triple (§8 P6).
    pub fn pnl_pct(direction: Direction, entry_price: f64, current_price: f64) -> f64 {
        match direction {
            Direction::Long => (current_price - entry_price) / entry_price * 100.0,
            Direction::Short => (entry_price - current_price) / entry_price * 100.0,
        }
    }

    pub fn remaining_contributor_count(&self) -> usize {
        self.traders.iter().filter(|t| !t.exited).count()
    }

    pub fn invalidate(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.is_active = false;
        self.invalidated = true;
        self.invalidation_reason = Some(reason.into());
        self.outcome = Some(SignalOutcome::Closed);
        self.closed_at = Some(now);
        self.updated_at = now;
    }
}
