// =============================================================================
// Average True Range (ATR) — simple mean of true range (§4.2)
// =============================================================================
//
// True Range (TR) for each bar:
//   TR_i = max(high - low, |high - prevClose|, |low - prevClose|)
//
// ATR(n) is the simple mean of the last `n` true-range values — the spec
// pins this to a plain average rather than Wilder's exponential smoothing,
// so unlike most textbook ATR implementations there is no seed-then-decay
// step here.
// =============================================================================

use crate::indicators::Candle;

/// Compute ATR(`period`) — the simple mean of the last `period` true-range
/// values — from a slice of OHLC candles (oldest first).
///
/// # Returns
/// `None` when:
/// - `period` is zero.
/// - There are fewer than `period + 1` candles (each TR value needs a
///   previous candle's close).
/// - Any intermediate value is non-finite.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let mut tr_values: Vec<f64> = Vec::with_capacity(candles.len() - 1);
    for i in 1..candles.len() {
        let high = candles[i].high;
        let low = candles[i].low;
        let prev_close = candles[i - 1].close;

        let hl = high - low;
        let hc = (high - prev_close).abs();
        let lc = (low - prev_close).abs();

        tr_values.push(hl.max(hc).max(lc));
    }

    if tr_values.len() < period {
        return None;
    }

    // Simple mean of the most recent `period` true-range values.
    let recent = &tr_values[tr_values.len() - period..];
    let atr: f64 = recent.iter().sum::<f64>() / period as f64;

    if atr.is_finite() {
        Some(atr)
    } else {
        None
    }
}

/// Mean of `(high - low) / mid * 100` across the last 7 completed days
/// (§4.2 "Daily range %").
pub fn daily_range_avg_pct(candles: &[Candle], days: usize) -> Option<f64> {
    if candles.is_empty() {
        return None;
    }
    let window = &candles[candles.len().saturating_sub(days)..];
    if window.is_empty() {
        return None;
    }

    let mut total = 0.0;
    let mut count = 0;
    for c in window {
        let mid = (c.high + c.low) / 2.0;
        if mid <= 0.0 {
            continue;
        }
        total += (c.high - c.low) / mid * 100.0;
        count += 1;
    }

    if count == 0 {
        None
    } else {
        Some(total / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            time: 0,
            open: close,
            high,
            low,
            close,
        }
    }

    #[test]
    fn atr_period_zero() {
        let candles = vec![candle(105.0, 95.0, 102.0); 20];
        assert!(calculate_atr(&candles, 0).is_none());
    }

    #[test]
    fn atr_insufficient_data() {
        let candles = vec![candle(105.0, 95.0, 102.0); 10];
        assert!(calculate_atr(&candles, 14).is_none());
    }

    #[test]
    fn atr_exact_minimum_data() {
        let candles = vec![
            candle(102.0, 98.0, 101.0),
            candle(104.0, 99.0, 103.0),
            candle(106.0, 100.0, 105.0),
            candle(108.0, 102.0, 107.0),
        ];
        let atr = calculate_atr(&candles, 3).unwrap();
        assert!(atr > 0.0 && atr.is_finite());
    }

    #[test]
    fn atr_constant_range_is_simple_mean() {
        // Every bar has range 10 -> ATR must equal exactly 10, not converge
        // toward it the way Wilder smoothing would.
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.1;
                candle(base + 5.0, base - 5.0, base)
            })
            .collect();
        let atr = calculate_atr(&candles, 14).unwrap();
        assert!((atr - 10.0).abs() < 1e-9, "expected exactly 10.0, got {atr}");
    }

    #[test]
    fn atr_true_range_uses_prev_close() {
        let candles = vec![
            candle(105.0, 95.0, 95.0),
            candle(115.0, 108.0, 112.0), // gap up: |115-95|=20 > 115-108=7
            candle(118.0, 110.0, 115.0),
            candle(120.0, 113.0, 118.0),
        ];
        let atr = calculate_atr(&candles, 3).unwrap();
        assert!(atr > 7.0, "ATR should reflect the gap, got {atr}");
    }

    #[test]
    fn atr_nan_returns_none() {
        let candles = vec![
            candle(105.0, 95.0, 100.0),
            candle(f64::NAN, 95.0, 100.0),
            candle(105.0, 95.0, 100.0),
            candle(105.0, 95.0, 100.0),
        ];
        assert!(calculate_atr(&candles, 3).is_none());
    }

    #[test]
    fn daily_range_only_uses_last_n_days() {
        let mut candles: Vec<Candle> = (0..20).map(|_| candle(110.0, 90.0, 100.0)).collect();
        // Make the tail 7 days tighter so the windowed mean differs sharply
        // from a full-history mean.
        for c in candles.iter_mut().rev().take(7) {
            c.high = 101.0;
            c.low = 99.0;
        }
        let pct = daily_range_avg_pct(&candles, 7).unwrap();
        assert!((pct - 2.0).abs() < 0.5, "expected ~2%, got {pct}");
    }

    #[test]
    fn daily_range_empty_is_none() {
        assert!(daily_range_avg_pct(&[], 7).is_none());
    }
}
