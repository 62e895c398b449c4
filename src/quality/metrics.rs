// =============================================================================
// Trader performance metrics (§4.4 steps 2-8)
// =============================================================================
//
// Pure functions over fills and equity history. Nothing here talks to the
// exchange or the database — `evaluator.rs` gathers the inputs, these
// functions crunch them. Keeping the math side-effect free makes every rule
// in §4.4 independently testable against hand-built fixtures.
// =============================================================================

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::exchange::models::RawFill;
use crate::types::{clamp, PnlMethod, StrategyClass};

const MS_PER_DAY: i64 = 24 * 3_600_000;
const MAX_HOLD_TIME_HOURS: f64 = 720.0;
const MIN_ACCOUNT_VALUE_BASE: f64 = 100.0;

/// A day's recorded `account_value` for a wallet (§3 EquitySnapshot entity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub date: NaiveDate,
    pub account_value: f64,
    pub recorded_at_ms: i64,
}

/// Aggregated win/loss statistics over a fill window (§4.4 step 5).
#[derive(Debug, Clone, Default)]
pub struct TradeStats {
    pub trades_count: u32,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_winner_pct: f64,
    pub avg_loser_pct: f64,
    pub max_win_streak: u32,
    pub max_loss_streak: u32,
    pub avg_hold_time_hours: f64,
    pub trade_frequency_per_day: f64,
}

/// Drawdown/peak figures derived from equity history (§4.4 step 6).
#[derive(Debug, Clone, Default)]
pub struct DrawdownStats {
    pub max_drawdown_7d_pct: f64,
    pub max_drawdown_30d_pct: f64,
    pub current_drawdown_pct: f64,
    pub peak_equity: f64,
}

/// Retain only fills with `time >= now_ms - days * 1 day` (§4.4 step 2's
/// mandatory client-side filter — the exchange ignores `startTime`).
pub fn filter_fills_within<'a>(fills: &'a [RawFill], now_ms: i64, days: i64) -> Vec<&'a RawFill> {
    let cutoff = now_ms - days * MS_PER_DAY;
    fills.iter().filter(|f| f.time >= cutoff).collect()
}

/// Compute windowed P&L using the best available method (§4.4 step 3):
/// equity-change when at least 2 snapshots span the window, otherwise the
/// sum of realised fill P&L within the window.
pub fn pnl_for_window(
    equity_history: &[EquitySnapshot],
    filtered_fills: &[&RawFill],
    current_equity: f64,
    now_ms: i64,
    days: i64,
) -> (f64, PnlMethod) {
    let cutoff = now_ms - days * MS_PER_DAY;
    let spanning: Vec<&EquitySnapshot> = equity_history
        .iter()
        .filter(|s| s.recorded_at_ms <= now_ms)
        .collect();

    if spanning.len() >= 2 {
        // Snapshot at-or-before the window start, closest to it.
        let baseline = spanning
            .iter()
            .filter(|s| s.recorded_at_ms <= cutoff)
            .max_by_key(|s| s.recorded_at_ms);

        if let Some(baseline) = baseline {
            let pnl = current_equity - baseline.account_value;
            return (pnl, PnlMethod::EquityChange);
        }
    }

    let pnl: f64 = filtered_fills.iter().map(|f| f.closed_pnl).sum();
    (pnl, PnlMethod::RealizedSumFiltered)
}

/// ROI as a percentage of the equity base *before* the P&L was earned,
/// clamped to `[-100, 1000]` (§4.4 step 4).
pub fn roi_pct(pnl: f64, account_value: f64) -> f64 {
    let base = (account_value - pnl).max(MIN_ACCOUNT_VALUE_BASE);
    clamp(pnl / base * 100.0, -100.0, 1000.0)
}

/// Aggregate win/loss statistics over the fills that realised non-zero P&L
/// within `filtered_fills` (§4.4 step 5). `window_days` sizes the
/// trade-frequency denominator.
pub fn trade_stats(filtered_fills: &[&RawFill], window_days: i64) -> TradeStats {
    let mut closing: Vec<&RawFill> = filtered_fills.iter().copied().filter(|f| f.is_exit()).collect();
    closing.sort_by_key(|f| f.time);

    let trades_count = closing.len() as u32;
    if trades_count == 0 {
        return TradeStats::default();
    }

    let mut gross_wins = 0.0;
    let mut gross_losses = 0.0;
    let mut win_count = 0u32;
    let mut winner_pcts = Vec::new();
    let mut loser_pcts = Vec::new();

    let mut max_win_streak = 0u32;
    let mut max_loss_streak = 0u32;
    let mut cur_win_streak = 0u32;
    let mut cur_loss_streak = 0u32;

    for fill in &closing {
        if fill.closed_pnl > 0.0 {
            gross_wins += fill.closed_pnl;
            win_count += 1;
            if fill.px > 0.0 {
                winner_pcts.push(fill.closed_pnl / (fill.px * fill.sz.abs()).max(1e-9) * 100.0);
            }
            cur_win_streak += 1;
            cur_loss_streak = 0;
            max_win_streak = max_win_streak.max(cur_win_streak);
        } else {
            gross_losses += fill.closed_pnl.abs();
            if fill.px > 0.0 {
                loser_pcts.push(fill.closed_pnl / (fill.px * fill.sz.abs()).max(1e-9) * 100.0);
            }
            cur_loss_streak += 1;
            cur_win_streak = 0;
            max_loss_streak = max_loss_streak.max(cur_loss_streak);
        }
    }

    let win_rate = win_count as f64 / trades_count as f64 * 100.0;
    let profit_factor = if gross_losses == 0.0 {
        if gross_wins > 0.0 {
            10.0
        } else {
            0.0
        }
    } else {
        (gross_wins / gross_losses).min(100.0)
    };

    let avg_winner_pct = mean(&winner_pcts);
    let avg_loser_pct = mean(&loser_pcts);
    let avg_hold_time_hours = average_hold_time_hours(filtered_fills);
    let trade_frequency_per_day = trades_count as f64 / window_days.max(1) as f64;

    TradeStats {
        trades_count,
        win_rate,
        profit_factor,
        avg_winner_pct,
        avg_loser_pct,
        max_win_streak,
        max_loss_streak,
        avg_hold_time_hours,
        trade_frequency_per_day,
    }
}

/// FIFO-pairs each coin's opening fills against its closing fills to
/// estimate hold time, capped at 720 h. Falls back to the "1 h before exit"
/// heuristic when no matching open fill is queued (§9 open question — the
/// documented fill-pair time is preferred whenever both sides are present).
fn average_hold_time_hours(filtered_fills: &[&RawFill]) -> f64 {
    let mut by_coin: HashMap<&str, Vec<&RawFill>> = HashMap::new();
    for f in filtered_fills {
        by_coin.entry(f.coin.as_str()).or_default().push(f);
    }

    let mut hold_hours = Vec::new();

    for fills in by_coin.values_mut() {
        fills.sort_by_key(|f| f.time);
        let mut opens: VecDeque<i64> = VecDeque::new();

        for fill in fills.iter() {
            if fill.is_exit() {
                let open_time = opens.pop_front().unwrap_or(fill.time - 3_600_000);
                let hours = (fill.time - open_time) as f64 / 3_600_000.0;
                hold_hours.push(hours.clamp(0.0, MAX_HOLD_TIME_HOURS));
            } else {
                opens.push_back(fill.time);
            }
        }
    }

    mean(&hold_hours)
}

/// Drawdown/peak figures from the full equity history (§4.4 step 6).
pub fn drawdown_stats(equity_history: &[EquitySnapshot], now_ms: i64) -> DrawdownStats {
    if equity_history.is_empty() {
        return DrawdownStats::default();
    }

    let mut sorted: Vec<&EquitySnapshot> = equity_history.iter().collect();
    sorted.sort_by_key(|s| s.recorded_at_ms);

    let window = |days: i64| -> f64 {
        let cutoff = now_ms - days * MS_PER_DAY;
        let mut peak = f64::MIN;
        let mut max_dd = 0.0;
        for s in sorted.iter().filter(|s| s.recorded_at_ms >= cutoff) {
            peak = peak.max(s.account_value);
            if peak > 0.0 {
                let dd = (peak - s.account_value) / peak * 100.0;
                max_dd = f64::max(max_dd, dd);
            }
        }
        max_dd
    };

    let peak_equity = sorted.iter().fold(f64::MIN, |acc, s| acc.max(s.account_value));
    let current = sorted.last().map(|s| s.account_value).unwrap_or(0.0);
    let current_drawdown_pct = if peak_equity > 0.0 {
        ((peak_equity - current) / peak_equity * 100.0).max(0.0)
    } else {
        0.0
    };

    DrawdownStats {
        max_drawdown_7d_pct: window(7),
        max_drawdown_30d_pct: window(30),
        current_drawdown_pct,
        peak_equity,
    }
}

/// `sharpe = mean / stdDev * sqrt(365)`, clamped to `[-10, 10]` (§4.4 step 6).
pub fn sharpe_ratio(daily_returns: &[f64]) -> f64 {
    risk_adjusted(daily_returns, false)
}

/// `sortino = mean / downsideDev * sqrt(365)`, clamped to `[-10, 10]`.
pub fn sortino_ratio(daily_returns: &[f64]) -> f64 {
    risk_adjusted(daily_returns, true)
}

fn risk_adjusted(daily_returns: &[f64], downside_only: bool) -> f64 {
    if daily_returns.len() < 2 {
        return 0.0;
    }
    let m = mean(daily_returns);
    let dev = if downside_only {
        let downside: Vec<f64> = daily_returns.iter().copied().filter(|&r| r < 0.0).collect();
        if downside.is_empty() {
            return 0.0;
        }
        std_dev(&downside, 0.0)
    } else {
        std_dev(daily_returns, m)
    };
    if dev == 0.0 {
        return 0.0;
    }
    clamp(m / dev * 365f64.sqrt(), -10.0, 10.0)
}

fn std_dev(values: &[f64], mean_value: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean_value).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Hold-time/frequency based strategy classification (§4.4 step 7).
pub fn classify_strategy(avg_hold_time_hours: f64, trade_frequency_per_day: f64, win_rate: f64) -> StrategyClass {
    if avg_hold_time_hours < 1.0 && trade_frequency_per_day >= 5.0 {
        StrategyClass::Scalper
    } else if avg_hold_time_hours >= 168.0 {
        StrategyClass::Position
    } else if (24.0..168.0).contains(&avg_hold_time_hours) {
        StrategyClass::Swing
    } else if win_rate >= 50.0 {
        StrategyClass::Momentum
    } else {
        StrategyClass::MeanReversion
    }
}

/// 0-100 composite score from banded contributions of win rate, profit
/// factor, drawdown (inverted), and Sharpe, minus a thin-sample penalty
/// (§4.4 step 8).
pub fn consistency_score(win_rate: f64, profit_factor: f64, max_drawdown_30d_pct: f64, sharpe: f64, trades_count: u32) -> f64 {
    let win_rate_band = clamp(win_rate, 0.0, 100.0) * 0.30;
    let profit_factor_band = clamp(profit_factor / 3.0 * 100.0, 0.0, 100.0) * 0.30;
    let drawdown_band = clamp(100.0 - max_drawdown_30d_pct, 0.0, 100.0) * 0.25;
    let sharpe_band = clamp((sharpe + 10.0) / 20.0 * 100.0, 0.0, 100.0) * 0.15;

    let mut score = win_rate_band + profit_factor_band + drawdown_band + sharpe_band;

    if trades_count < 10 {
        score -= (10 - trades_count) as f64 * 3.0;
    }

    clamp(score, 0.0, 100.0)
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(coin: &str, time: i64, closed_pnl: f64, side: &str, px: f64, sz: f64) -> RawFill {
        RawFill {
            coin: coin.to_string(),
            px,
            sz,
            side: side.to_string(),
            time,
            closed_pnl,
            dir: "Open Long".to_string(),
            hash: format!("h{time}"),
            fee: 0.0,
            oid: time as u64,
            crossed: false,
            liquidation: None,
        }
    }

    #[test]
    fn filter_fills_respects_window() {
        let now = 10 * MS_PER_DAY;
        let fills = vec![
            fill("BTC", now - 2 * MS_PER_DAY, 0.0, "B", 100.0, 1.0),
            fill("BTC", now - 20 * MS_PER_DAY, 0.0, "B", 100.0, 1.0),
        ];
        let filtered = filter_fills_within(&fills, now, 7);
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn pnl_prefers_equity_change_when_two_snapshots_span_window() {
        let now = 15 * MS_PER_DAY;
        let history = vec![
            EquitySnapshot {
                date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                account_value: 80_000.0,
                recorded_at_ms: now - 7 * MS_PER_DAY,
            },
            EquitySnapshot {
                date: NaiveDate::from_ymd_opt(2026, 1, 8).unwrap(),
                account_value: 92_000.0,
                recorded_at_ms: now,
            },
        ];
        let fills: Vec<&RawFill> = vec![];
        let (pnl, method) = pnl_for_window(&history, &fills, 92_000.0, now, 7);
        assert_eq!(pnl, 12_000.0);
        assert_eq!(method, PnlMethod::EquityChange);
    }

    #[test]
    fn pnl_falls_back_to_realized_sum_without_snapshots() {
        let now = 10 * MS_PER_DAY;
        let closing = fill("BTC", now - MS_PER_DAY, 250.0, "A", 100.0, 1.0);
        let filtered = vec![&closing];
        let (pnl, method) = pnl_for_window(&[], &filtered, 10_000.0, now, 7);
        assert_eq!(pnl, 250.0);
        assert_eq!(method, PnlMethod::RealizedSumFiltered);
    }

    #[test]
    fn roi_clamped_near_zero_base() {
        let roi = roi_pct(5_000.0, 5_000.0); // base would be ~0 -> floors at 100
        assert!(roi <= 1000.0);
        assert!(roi > 0.0);
    }

    #[test]
    fn profit_factor_caps_at_10_with_no_losses() {
        let fills = vec![fill("BTC", 1, 500.0, "A", 100.0, 1.0), fill("BTC", 2, 300.0, "A", 100.0, 1.0)];
        let refs: Vec<&RawFill> = fills.iter().collect();
        let stats = trade_stats(&refs, 30);
        assert_eq!(stats.profit_factor, 10.0);
        assert_eq!(stats.win_rate, 100.0);
    }

    #[test]
    fn fifo_hold_time_pairs_open_and_close() {
        let fills = vec![
            fill("BTC", 0, 0.0, "B", 100.0, 1.0), // open
            fill("BTC", 3_600_000 * 5, 100.0, "A", 100.0, 1.0), // close 5h later
        ];
        let refs: Vec<&RawFill> = fills.iter().collect();
        let stats = trade_stats(&refs, 30);
        assert!((stats.avg_hold_time_hours - 5.0).abs() < 1e-9);
    }

    #[test]
    fn classify_scalper() {
        assert_eq!(classify_strategy(0.5, 10.0, 50.0), StrategyClass::Scalper);
    }

    #[test]
    fn classify_position() {
        assert_eq!(classify_strategy(200.0, 0.5, 50.0), StrategyClass::Position);
    }

    #[test]
    fn classify_swing() {
        assert_eq!(classify_strategy(48.0, 1.0, 50.0), StrategyClass::Swing);
    }

    #[test]
    fn consistency_score_penalizes_thin_samples() {
        let full = consistency_score(60.0, 2.0, 5.0, 1.5, 20);
        let thin = consistency_score(60.0, 2.0, 5.0, 1.5, 3);
        assert!(thin < full);
    }
}
