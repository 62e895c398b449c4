// =============================================================================
// Position entities (§3)
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Address, Direction, PositionEventType};

/// A single open position for a tracked wallet, as last seen on a poll
/// cycle (§3 Position entity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedPosition {
    pub address: Address,
    pub coin: String,
    pub direction: Direction,
    pub size: f64,
    pub entry_price: f64,
    pub value_usd: f64,
    pub leverage: f64,
    pub unrealized_pnl: f64,
    pub margin_used: f64,
    pub liquidation_price: Option<f64>,
    pub has_pending_entry: bool,
    pub has_stop_order: bool,
    pub has_tp_order: bool,
    pub opened_at: DateTime<Utc>,
    pub peak_unrealized_pnl: f64,
    pub trough_unrealized_pnl: f64,
    pub conviction_pct: f64,
}

impl TrackedPosition {
    /// Key used to diff this cycle's positions against the previous cycle's
    /// for a given wallet.
    pub fn key(&self) -> &str {
        &self.coin
    }
}

/// Append-only log entry for a position-lifecycle transition (§3
/// PositionChange, §4.5 change detection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionChange {
    pub address: Address,
    pub coin: String,
    pub event_type: PositionEventType,
    pub prev_direction: Option<Direction>,
    pub new_direction: Option<Direction>,
    pub prev_size: Option<f64>,
    pub new_size: Option<f64>,
    pub size_change: f64,
    pub price_at_event: f64,
    pub detected_at: DateTime<Utc>,
}
