// =============================================================================
// Exchange wire models — typed request/response shapes (§6)
// =============================================================================
//
// The info endpoint multiplexes every request through a single `type` tag;
// here that becomes one `InfoRequest` variant per row of §6's table.
// Numeric fields arrive from the exchange as strings (Hyperliquid convention)
// so every response struct parses them once at the boundary via
// `parse_f64_field`/`#[serde(deserialize_with = ...)]` and carries typed
// `f64`s internally — callers never touch a raw string price again.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::Direction;

// ---------------------------------------------------------------------------
// Request envelope
// ---------------------------------------------------------------------------

/// One variant per request `type` accepted by the info endpoint (§6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum InfoRequest {
    #[serde(rename = "clearinghouseState")]
    ClearinghouseState { user: String },
    #[serde(rename = "userFills")]
    UserFills {
        user: String,
        #[serde(rename = "startTime", skip_serializing_if = "Option::is_none")]
        start_time: Option<i64>,
    },
    #[serde(rename = "openOrders")]
    OpenOrders { user: String },
    #[serde(rename = "userFunding")]
    UserFunding {
        user: String,
        #[serde(rename = "startTime", skip_serializing_if = "Option::is_none")]
        start_time: Option<i64>,
    },
    #[serde(rename = "userNonFundingLedgerUpdates")]
    UserNonFundingLedgerUpdates {
        user: String,
        #[serde(rename = "startTime", skip_serializing_if = "Option::is_none")]
        start_time: Option<i64>,
    },
    #[serde(rename = "allMids")]
    AllMids {},
    #[serde(rename = "meta")]
    Meta {},
    #[serde(rename = "metaAndAssetCtxs")]
    MetaAndAssetCtxs {},
    #[serde(rename = "fundingHistory")]
    FundingHistory { coin: String, #[serde(rename = "startTime")] start_time: i64 },
    #[serde(rename = "candleSnapshot")]
    CandleSnapshot { req: CandleSnapshotReq },
    #[serde(rename = "l2Book")]
    L2Book { coin: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CandleSnapshotReq {
    pub coin: String,
    pub interval: String,
    #[serde(rename = "startTime")]
    pub start_time: i64,
    #[serde(rename = "endTime", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
}

// ---------------------------------------------------------------------------
// String-encoded-number helper
// ---------------------------------------------------------------------------

/// Hyperliquid sends most numeric fields as JSON strings ("123.45"). Parse
/// once here; every typed struct below carries `f64` internally.
pub fn de_f64_str<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = StrOrNum::deserialize(deserializer)?;
    Ok(raw.into_f64())
}

pub fn de_f64_str_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<StrOrNum> = Option::deserialize(deserializer)?;
    Ok(raw.map(|v| v.into_f64()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StrOrNum {
    Str(String),
    Num(f64),
}

impl StrOrNum {
    fn into_f64(self) -> f64 {
        match self {
            Self::Str(s) => s.parse().unwrap_or(0.0),
            Self::Num(n) => n,
        }
    }
}

// ---------------------------------------------------------------------------
// clearinghouseState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ClearinghouseStateResponse {
    #[serde(rename = "marginSummary")]
    pub margin_summary: MarginSummary,
    #[serde(rename = "assetPositions", default)]
    pub asset_positions: Vec<AssetPositionWrapper>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarginSummary {
    #[serde(rename = "accountValue", deserialize_with = "de_f64_str")]
    pub account_value: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetPositionWrapper {
    pub position: RawPosition,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPosition {
    pub coin: String,
    /// Signed size; negative means short (§6 — "szi is signed").
    #[serde(deserialize_with = "de_f64_str")]
    pub szi: f64,
    #[serde(rename = "entryPx", deserialize_with = "de_f64_str")]
    pub entry_px: f64,
    #[serde(rename = "positionValue", deserialize_with = "de_f64_str")]
    pub position_value: f64,
    #[serde(rename = "unrealizedPnl", deserialize_with = "de_f64_str")]
    pub unrealized_pnl: f64,
    #[serde(rename = "marginUsed", deserialize_with = "de_f64_str")]
    pub margin_used: f64,
    #[serde(rename = "liquidationPx", default, deserialize_with = "de_f64_str_opt")]
    pub liquidation_px: Option<f64>,
    pub leverage: RawLeverage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLeverage {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: f64,
}

impl RawPosition {
    pub fn direction(&self) -> Direction {
        Direction::from_position_side(self.szi)
    }

    pub fn size(&self) -> f64 {
        self.szi.abs()
    }
}

// ---------------------------------------------------------------------------
// userFills
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RawFill {
    pub coin: String,
    #[serde(deserialize_with = "de_f64_str")]
    pub px: f64,
    #[serde(deserialize_with = "de_f64_str")]
    pub sz: f64,
    /// "B" (buy) or "A" (ask/sell).
    pub side: String,
    pub time: i64,
    #[serde(rename = "closedPnl", deserialize_with = "de_f64_str")]
    pub closed_pnl: f64,
    /// e.g. "Open Long", "Close Short".
    pub dir: String,
    pub hash: String,
    #[serde(deserialize_with = "de_f64_str")]
    pub fee: f64,
    pub oid: u64,
    #[serde(default)]
    pub crossed: bool,
    #[serde(default)]
    pub liquidation: Option<bool>,
}

impl RawFill {
    /// `true` when this fill realised pnl — i.e. it closed (all or part of)
    /// a position rather than opening/adding to one.
    pub fn is_exit(&self) -> bool {
        self.closed_pnl != 0.0
    }

    /// Direction of the position this fill *closed*, derived from `side`
    /// per §4.8: buy-to-close implies a short was closed, sell-to-close
    /// implies a long was closed.
    pub fn closed_direction(&self) -> Option<Direction> {
        if !self.is_exit() {
            return None;
        }
        match self.side.as_str() {
            "B" => Some(Direction::Short),
            "A" => Some(Direction::Long),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// openOrders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RawOpenOrder {
    pub coin: String,
    pub side: String,
    #[serde(rename = "limitPx", deserialize_with = "de_f64_str")]
    pub limit_px: f64,
    #[serde(deserialize_with = "de_f64_str")]
    pub sz: f64,
    pub oid: u64,
    pub timestamp: i64,
    #[serde(rename = "origSz", deserialize_with = "de_f64_str")]
    pub orig_sz: f64,
    #[serde(rename = "orderType")]
    pub order_type: String,
    #[serde(rename = "reduceOnly", default)]
    pub reduce_only: bool,
    #[serde(rename = "triggerPx", default, deserialize_with = "de_f64_str_opt")]
    pub trigger_px: Option<f64>,
    #[serde(rename = "isTrigger", default)]
    pub is_trigger: bool,
}

impl RawOpenOrder {
    /// Whether this open order functions as a protective stop for a
    /// position in `direction`: a trigger, reduce-only order on the
    /// opposite side of the position.
    pub fn is_stop_for(&self, direction: Direction) -> bool {
        self.is_trigger && self.reduce_only && self.opposes(direction)
    }

    /// Whether this open order functions as a take-profit for a position
    /// in `direction`. Same shape as a stop at the wire level; distinguished
    /// downstream by price relative to entry, so here it simply reports the
    /// structural match the spec asks for.
    pub fn is_tp_for(&self, direction: Direction) -> bool {
        self.is_trigger && self.reduce_only && self.opposes(direction)
    }

    pub fn is_pending_entry_for(&self, direction: Direction) -> bool {
        !self.reduce_only && self.same_side(direction)
    }

    fn same_side(&self, direction: Direction) -> bool {
        match direction {
            Direction::Long => self.side == "B",
            Direction::Short => self.side == "A",
        }
    }

    fn opposes(&self, direction: Direction) -> bool {
        !self.same_side(direction)
    }
}

// ---------------------------------------------------------------------------
// allMids
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct AllMidsResponse(pub std::collections::HashMap<String, String>);

impl AllMidsResponse {
    pub fn get_f64(&self, coin: &str) -> Option<f64> {
        self.0.get(coin).and_then(|s| s.parse().ok())
    }
}

// ---------------------------------------------------------------------------
// candleSnapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RawCandle {
    pub t: i64,
    #[serde(deserialize_with = "de_f64_str")]
    pub o: f64,
    #[serde(deserialize_with = "de_f64_str")]
    pub h: f64,
    #[serde(deserialize_with = "de_f64_str")]
    pub l: f64,
    #[serde(deserialize_with = "de_f64_str")]
    pub c: f64,
    #[serde(deserialize_with = "de_f64_str")]
    pub v: f64,
    pub n: u64,
}

// ---------------------------------------------------------------------------
// metaAndAssetCtxs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AssetCtx {
    #[serde(deserialize_with = "de_f64_str")]
    pub funding: f64,
    #[serde(rename = "openInterest", deserialize_with = "de_f64_str")]
    pub open_interest: f64,
    #[serde(rename = "markPx", deserialize_with = "de_f64_str")]
    pub mark_px: f64,
    #[serde(rename = "midPx", default, deserialize_with = "de_f64_str_opt")]
    pub mid_px: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetaUniverseEntry {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub universe: Vec<MetaUniverseEntry>,
}

// ---------------------------------------------------------------------------
// WebSocket frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum WsRequest {
    Subscribe { subscription: WsSubscription },
    Unsubscribe { subscription: WsSubscription },
    Ping {},
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum WsSubscription {
    #[serde(rename = "trades")]
    Trades { coin: String },
    #[serde(rename = "userFills")]
    UserFills { user: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsEnvelope {
    pub channel: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsUserFillsData {
    pub user: String,
    pub fills: Vec<RawFill>,
    /// `true` on the first message after subscribing — the rest of the
    /// system never needs to know, but callers may use it to suppress
    /// spurious dedup-cache rebuilds on reconnect.
    #[serde(rename = "isSnapshot", default)]
    pub is_snapshot: bool,
}
