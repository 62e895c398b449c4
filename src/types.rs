// =============================================================================
// Shared domain types used across the signal engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// A 40-hex-character lowercase wallet address. Newtype so call sites can't
/// accidentally mix it up with a coin symbol or signal id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    /// Normalize to the canonical lowercase-hex form the rest of the system
    /// assumes as a storage-key invariant.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().to_lowercase())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Position / signal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Parses a Hyperliquid fill `dir` field ("Open Long", "Close Short", ...)
    /// into the direction of the *position*, not the fill side.
    pub fn from_position_side(szi: f64) -> Self {
        if szi >= 0.0 {
            Self::Long
        } else {
            Self::Short
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// Wallet quality tier, re-evaluated periodically (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Elite,
    Good,
    Weak,
    Inactive,
}

impl Tier {
    /// Invariant P1: `is_tracked <=> tier in {elite, good}`.
    pub fn is_tracked(self) -> bool {
        matches!(self, Self::Elite | Self::Good)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Elite => write!(f, "elite"),
            Self::Good => write!(f, "good"),
            Self::Weak => write!(f, "weak"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "elite" => Ok(Self::Elite),
            "good" => Ok(Self::Good),
            "weak" => Ok(Self::Weak),
            "inactive" => Ok(Self::Inactive),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// Hold-time / frequency based strategy classification (§4.4 step 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyClass {
    Scalper,
    Position,
    Swing,
    Momentum,
    MeanReversion,
}

impl std::fmt::Display for StrategyClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalper => write!(f, "scalper"),
            Self::Position => write!(f, "position"),
            Self::Swing => write!(f, "swing"),
            Self::Momentum => write!(f, "momentum"),
            Self::MeanReversion => write!(f, "mean_reversion"),
        }
    }
}

impl std::str::FromStr for StrategyClass {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scalper" => Ok(Self::Scalper),
            "position" => Ok(Self::Position),
            "swing" => Ok(Self::Swing),
            "momentum" => Ok(Self::Momentum),
            "mean_reversion" => Ok(Self::MeanReversion),
            other => Err(format!("unknown strategy class: {other}")),
        }
    }
}

/// Funding-rate classification relative to a prospective position direction
/// (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundingClassification {
    Favorable,
    Unfavorable,
    Neutral,
}

impl std::fmt::Display for FundingClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Favorable => write!(f, "favorable"),
            Self::Unfavorable => write!(f, "unfavorable"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

impl std::str::FromStr for FundingClassification {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "favorable" => Ok(Self::Favorable),
            "unfavorable" => Ok(Self::Unfavorable),
            "neutral" => Ok(Self::Neutral),
            other => Err(format!("unknown funding classification: {other}")),
        }
    }
}

/// Terminal state of a closed signal (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalOutcome {
    Stopped,
    Tp3,
    Expired,
    Closed,
}

impl std::fmt::Display for SignalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Tp3 => write!(f, "tp3"),
            Self::Expired => write!(f, "expired"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for SignalOutcome {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(Self::Stopped),
            "tp3" => Ok(Self::Tp3),
            "expired" => Ok(Self::Expired),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown signal outcome: {other}")),
        }
    }
}

/// Signal confidence banding (§4.6 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStrength {
    Medium,
    Strong,
}

impl std::fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Medium => write!(f, "medium"),
            Self::Strong => write!(f, "strong"),
        }
    }
}

impl std::str::FromStr for SignalStrength {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "medium" => Ok(Self::Medium),
            "strong" => Ok(Self::Strong),
            other => Err(format!("unknown signal strength: {other}")),
        }
    }
}

/// How a signal's provenance is categorised at birth (§4.6 step 9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalTier {
    EliteEntry,
    Confirmed,
    Consensus,
}

impl std::fmt::Display for SignalTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EliteEntry => write!(f, "elite_entry"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Consensus => write!(f, "consensus"),
        }
    }
}

impl std::str::FromStr for SignalTier {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "elite_entry" => Ok(Self::EliteEntry),
            "confirmed" => Ok(Self::Confirmed),
            "consensus" => Ok(Self::Consensus),
            other => Err(format!("unknown signal tier: {other}")),
        }
    }
}

/// A position-lifecycle transition as detected by the position tracker
/// (§4.5 change detection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionEventType {
    Open,
    Increase,
    Decrease,
    Close,
    Flip,
}

impl std::fmt::Display for PositionEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Increase => write!(f, "increase"),
            Self::Decrease => write!(f, "decrease"),
            Self::Close => write!(f, "close"),
            Self::Flip => write!(f, "flip"),
        }
    }
}

impl std::str::FromStr for PositionEventType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "increase" => Ok(Self::Increase),
            "decrease" => Ok(Self::Decrease),
            "close" => Ok(Self::Close),
            "flip" => Ok(Self::Flip),
            other => Err(format!("unknown position event type: {other}")),
        }
    }
}

/// Which method produced a trader's windowed P&L figure (§4.4 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PnlMethod {
    EquityChange,
    RealizedSumFiltered,
}

impl std::fmt::Display for PnlMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EquityChange => write!(f, "equity_change"),
            Self::RealizedSumFiltered => write!(f, "realized_sum_filtered"),
        }
    }
}

impl std::str::FromStr for PnlMethod {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equity_change" => Ok(Self::EquityChange),
            "realized_sum_filtered" => Ok(Self::RealizedSumFiltered),
            other => Err(format!("unknown pnl method: {other}")),
        }
    }
}

/// Clamp helper used throughout the quality evaluator and signal generator
/// (ROI clamping, stop-distance clamping, confidence banding, ...).
pub fn clamp(value: f64, lo: f64, hi: f64) -> f64 {
    if value < lo {
        lo
    } else if value > hi {
        hi
    } else {
        value
    }
}
