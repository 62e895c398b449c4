// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the core technical indicators used
// by the volatility tracker (B). Every public function returns `Option<T>` so
// callers are forced to handle insufficient-data and numerical-edge-case
// scenarios.

pub mod atr;

/// Minimal OHLC bar shape shared by every indicator in this module. The
/// volatility tracker (B) builds these from `candleSnapshot` responses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}
