// =============================================================================
// Trader-quality evaluator (D) — §4.4
// =============================================================================
//
// Two entry points mirror the two passes described in the spec:
// - `evaluate` — full assessment for a wallet not yet tracked (or being
//   assessed for the first time), free to land on any of Elite/Good/Weak.
// - `reevaluate` — the weekly full pass over already-tracked wallets. It can
//   promote Good -> Elite, but only ever *demotes* Elite/Good using a looser
//   threshold set, plus the sustained-drawdown rules from live positions.
//
// Ownership: this is the only component allowed to mutate
// `TraderQuality.tier` / `is_tracked` (§3 ownership table).
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{info, instrument, warn};

use crate::errors::ExchangeError;
use crate::exchange::ExchangeClient;
use crate::quality::metrics::{
    self, classify_strategy, consistency_score, drawdown_stats, filter_fills_within, pnl_for_window, roi_pct,
    sharpe_ratio, sortino_ratio, trade_stats, EquitySnapshot,
};
use crate::quality::thresholds::{TierThreshold, TierThresholdSet};
use crate::types::{Address, PnlMethod, StrategyClass, Tier};

/// Demotion checks during the weekly re-evaluation pass use thresholds
/// loosened by this factor, so a wallet whose performance merely softens
/// isn't demoted on the spot the way a fresh-evaluation failure would be.
const DEMOTE_LOOSENESS: f64 = 0.7;

const IMMEDIATE_DEMOTION_DRAWDOWN_PCT: f64 = 75.0;
const SUSTAINED_DEMOTION_DRAWDOWN_PCT: f64 = 50.0;
const SUSTAINED_DEMOTION_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct TraderQuality {
    pub address: Address,
    pub tier: Tier,
    pub is_tracked: bool,
    pub account_value: f64,
    pub pnl_7d: f64,
    pub pnl_30d: f64,
    pub pnl_60d: f64,
    pub pnl_90d: f64,
    pub roi_7d_pct: f64,
    pub roi_30d_pct: f64,
    pub roi_60d_pct: f64,
    pub roi_90d_pct: f64,
    pub pnl_calculation_method: PnlMethod,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_trades: u32,
    pub max_drawdown_30d_pct: f64,
    pub consistency_score: f64,
    pub sortino_ratio: f64,
    pub strategy_class: StrategyClass,
    pub tier_change_count: u32,
    pub analyzed_at: DateTime<Utc>,
}

impl TraderQuality {
    fn apply_invariant(&mut self) {
        self.is_tracked = self.tier.is_tracked();
    }
}

#[derive(Debug, Clone)]
pub struct TierChange {
    pub address: Address,
    pub prior_tier: Tier,
    pub new_tier: Tier,
    pub reason: String,
    pub changed_at: DateTime<Utc>,
}

struct Metrics {
    account_value: f64,
    pnl_7d: f64,
    pnl_30d: f64,
    pnl_60d: f64,
    pnl_90d: f64,
    roi_7d_pct: f64,
    roi_30d_pct: f64,
    roi_60d_pct: f64,
    roi_90d_pct: f64,
    pnl_method: PnlMethod,
    win_rate: f64,
    profit_factor: f64,
    trades_count: u32,
    max_drawdown_30d_pct: f64,
    current_drawdown_pct: f64,
    consistency_score: f64,
    sortino_ratio: f64,
    strategy_class: StrategyClass,
}

pub struct QualityEvaluator {
    exchange: Arc<ExchangeClient>,
    drawdown_watch: RwLock<HashMap<Address, DateTime<Utc>>>,
}

impl QualityEvaluator {
    pub fn new(exchange: Arc<ExchangeClient>) -> Self {
        Self {
            exchange,
            drawdown_watch: RwLock::new(HashMap::new()),
        }
    }

    #[instrument(skip(self, equity_history), fields(address = %address))]
    async fn gather_metrics(
        &self,
        address: &Address,
        equity_history: &[EquitySnapshot],
        now: DateTime<Utc>,
    ) -> Result<Metrics, ExchangeError> {
        let now_ms = now.timestamp_millis();

        let state = self.exchange.clearinghouse_state(address.as_ref()).await?;
        let account_value = state.margin_summary.account_value;

        let all_fills = self.exchange.user_fills(address.as_ref()).await?;

        let windows = [7i64, 30, 60, 90];
        let mut pnls = [0.0; 4];
        let mut rois = [0.0; 4];
        let mut method = PnlMethod::RealizedSumFiltered;
        let mut fills_30d: Vec<&crate::exchange::models::RawFill> = Vec::new();

        for (idx, &days) in windows.iter().enumerate() {
            let filtered = filter_fills_within(&all_fills, now_ms, days);
            let (pnl, used_method) = pnl_for_window(equity_history, &filtered, account_value, now_ms, days);
            pnls[idx] = pnl;
            rois[idx] = roi_pct(pnl, account_value);
            if days == 7 {
                method = used_method;
            }
            if days == 30 {
                fills_30d = filtered;
            }
        }

        let stats = trade_stats(&fills_30d, 30);
        let dd = drawdown_stats(equity_history, now_ms);
        let daily_returns = equity_daily_returns(equity_history);
        let sharpe = sharpe_ratio(&daily_returns);
        let sortino = sortino_ratio(&daily_returns);
        let consistency = consistency_score(stats.win_rate, stats.profit_factor, dd.max_drawdown_30d_pct, sharpe, stats.trades_count);
        let strategy_class = classify_strategy(stats.avg_hold_time_hours, stats.trade_frequency_per_day, stats.win_rate);

        Ok(Metrics {
            account_value,
            pnl_7d: pnls[0],
            pnl_30d: pnls[1],
            pnl_60d: pnls[2],
            pnl_90d: pnls[3],
            roi_7d_pct: rois[0],
            roi_30d_pct: rois[1],
            roi_60d_pct: rois[2],
            roi_90d_pct: rois[3],
            pnl_method: method,
            win_rate: stats.win_rate,
            profit_factor: stats.profit_factor,
            trades_count: stats.trades_count,
            max_drawdown_30d_pct: dd.max_drawdown_30d_pct,
            current_drawdown_pct: dd.current_drawdown_pct,
            consistency_score: consistency,
            sortino_ratio: sortino,
            strategy_class,
        })
    }

    /// Full assessment, used for a wallet seen for the first time (or any
    /// pass that should be free to land on Elite/Good/Weak directly).
    pub async fn evaluate(
        &self,
        address: &Address,
        equity_history: &[EquitySnapshot],
        thresholds: &TierThresholdSet,
        now: DateTime<Utc>,
    ) -> Result<TraderQuality, ExchangeError> {
        let m = self.gather_metrics(address, equity_history, now).await?;
        let tier = decide_tier(&m, thresholds);
        Ok(self.to_trader_quality(address, &m, tier, 0, now))
    }

    /// Weekly full pass over an already-tracked wallet: promotes Good ->
    /// Elite, otherwise only demotes (§4.4 "Re-evaluation").
    pub async fn reevaluate(
        &self,
        address: &Address,
        prior: &TraderQuality,
        equity_history: &[EquitySnapshot],
        thresholds: &TierThresholdSet,
        now: DateTime<Utc>,
    ) -> Result<(TraderQuality, Option<TierChange>), ExchangeError> {
        let m = self.gather_metrics(address, equity_history, now).await?;
        let tier = reevaluate_tier(prior.tier, &m, thresholds);

        let mut change = if tier != prior.tier {
            Some(TierChange {
                address: address.clone(),
                prior_tier: prior.tier,
                new_tier: tier,
                reason: format!("weekly re-evaluation: {} -> {}", prior.tier, tier),
                changed_at: now,
            })
        } else {
            None
        };

        // Sustained-drawdown checks from equity history (§4.4 re-evaluation);
        // applied on top of the threshold-based decision and only ever
        // demotes further, never overrides a demotion already decided above.
        let effective_tier = change.as_ref().map(|c| c.new_tier).unwrap_or(prior.tier);
        if let Some(dd_change) = self.check_sustained_drawdown(address, effective_tier, m.current_drawdown_pct, now) {
            change = Some(TierChange {
                address: address.clone(),
                prior_tier: prior.tier,
                new_tier: dd_change.new_tier,
                ..dd_change
            });
        }
        let tier = change.as_ref().map(|c| c.new_tier).unwrap_or(prior.tier);

        let tier_change_count = prior.tier_change_count + change.is_some() as u32;
        let mut updated = self.to_trader_quality(address, &m, tier, tier_change_count, now);
        updated.apply_invariant();

        if change.is_some() {
            info!(address = %address, from = %prior.tier, to = %tier, "trader quality tier changed");
        }

        Ok((updated, change))
    }

    /// Consults and updates the sustained-drawdown watch for `address`
    /// given its current live unrealized-drawdown percentage. Returns the
    /// forced demotion, if any (§4.4 re-evaluation sustained-drawdown
    /// rules).
    pub fn check_sustained_drawdown(
        &self,
        address: &Address,
        current_tier: Tier,
        live_drawdown_pct: f64,
        now: DateTime<Utc>,
    ) -> Option<TierChange> {
        if live_drawdown_pct >= IMMEDIATE_DEMOTION_DRAWDOWN_PCT {
            self.drawdown_watch.write().remove(address);
            let new_tier = demote_one_level(current_tier);
            if new_tier == current_tier {
                return None;
            }
            warn!(address = %address, live_drawdown_pct, "immediate demotion from sustained drawdown");
            return Some(TierChange {
                address: address.clone(),
                prior_tier: current_tier,
                new_tier,
                reason: format!("current_drawdown_pct {live_drawdown_pct:.1} >= {IMMEDIATE_DEMOTION_DRAWDOWN_PCT}"),
                changed_at: now,
            });
        }

        if live_drawdown_pct >= SUSTAINED_DEMOTION_DRAWDOWN_PCT {
            let mut watch = self.drawdown_watch.write();
            let since = *watch.entry(address.clone()).or_insert(now);
            let sustained_hours = (now - since).num_hours();
            if sustained_hours >= SUSTAINED_DEMOTION_HOURS {
                watch.remove(address);
                let new_tier = demote_one_level(current_tier);
                if new_tier == current_tier {
                    return None;
                }
                warn!(address = %address, sustained_hours, "demotion from sustained 50%+ drawdown");
                return Some(TierChange {
                    address: address.clone(),
                    prior_tier: current_tier,
                    new_tier,
                    reason: format!("current_drawdown_pct >= {SUSTAINED_DEMOTION_DRAWDOWN_PCT} sustained {sustained_hours}h"),
                    changed_at: now,
                });
            }
            return None;
        }

        self.drawdown_watch.write().remove(address);
        None
    }

    fn to_trader_quality(&self, address: &Address, m: &Metrics, tier: Tier, tier_change_count: u32, now: DateTime<Utc>) -> TraderQuality {
        let mut q = TraderQuality {
            address: address.clone(),
            tier,
            is_tracked: tier.is_tracked(),
            account_value: m.account_value,
            pnl_7d: m.pnl_7d,
            pnl_30d: m.pnl_30d,
            pnl_60d: m.pnl_60d,
            pnl_90d: m.pnl_90d,
            roi_7d_pct: m.roi_7d_pct,
            roi_30d_pct: m.roi_30d_pct,
            roi_60d_pct: m.roi_60d_pct,
            roi_90d_pct: m.roi_90d_pct,
            pnl_calculation_method: m.pnl_method,
            win_rate: m.win_rate / 100.0,
            profit_factor: m.profit_factor,
            total_trades: m.trades_count,
            max_drawdown_30d_pct: m.max_drawdown_30d_pct,
            consistency_score: m.consistency_score,
            sortino_ratio: m.sortino_ratio,
            strategy_class: m.strategy_class,
            tier_change_count,
            analyzed_at: now,
        };
        q.apply_invariant();
        q
    }
}

/// `performance = roi_Nd_pct >= minRoiNdPct OR pnl_Nd >= minPnlNdAlt`, ANDed
/// with the rest of the tier's checks (§4.4 tier decision).
fn checks_pass(t: &TierThreshold, m: &Metrics) -> bool {
    let performance = m.roi_7d_pct >= t.min_roi_7d_pct || m.pnl_7d >= t.min_pnl_7d_alt;
    performance
        && m.win_rate >= t.min_win_rate
        && m.profit_factor >= t.min_profit_factor
        && m.trades_count >= t.min_trades
        && m.account_value >= t.min_account_value
}

fn checks_pass_loosened(t: &TierThreshold, m: &Metrics, looseness: f64) -> bool {
    let loosened = TierThreshold {
        min_roi_7d_pct: t.min_roi_7d_pct * looseness,
        min_pnl_7d_alt: t.min_pnl_7d_alt * looseness,
        min_win_rate: t.min_win_rate * looseness,
        min_profit_factor: t.min_profit_factor * looseness,
        min_trades: t.min_trades,
        min_account_value: t.min_account_value * looseness,
    };
    checks_pass(&loosened, m)
}

/// Elite's additional condition beyond the base tier checks (§4.4).
fn elite_extra_condition(m: &Metrics, thresholds: &TierThresholdSet) -> bool {
    let drawdown_ok = m.pnl_30d > 0.0 && m.max_drawdown_30d_pct <= 25.0 && m.consistency_score >= 50.0;
    let double_roi = m.roi_7d_pct >= 2.0 * thresholds.elite.min_roi_7d_pct;
    drawdown_ok || double_roi
}

/// Full tier decision for a fresh evaluation (§4.4).
fn decide_tier(m: &Metrics, thresholds: &TierThresholdSet) -> Tier {
    if checks_pass(&thresholds.elite, m) && elite_extra_condition(m, thresholds) {
        Tier::Elite
    } else if checks_pass(&thresholds.good, m) {
        Tier::Good
    } else {
        Tier::Weak
    }
}

/// Weekly re-evaluation: promotes Good -> Elite using the full criteria,
/// otherwise only ever demotes using the loosened threshold set. Weak and
/// Inactive wallets are left untouched by this pass.
fn reevaluate_tier(prior: Tier, m: &Metrics, thresholds: &TierThresholdSet) -> Tier {
    match prior {
        Tier::Elite => {
            if checks_pass_loosened(&thresholds.elite, m, DEMOTE_LOOSENESS) && elite_extra_condition(m, thresholds) {
                Tier::Elite
            } else if checks_pass_loosened(&thresholds.good, m, DEMOTE_LOOSENESS) {
                Tier::Good
            } else {
                Tier::Weak
            }
        }
        Tier::Good => {
            if checks_pass(&thresholds.elite, m) && elite_extra_condition(m, thresholds) {
                Tier::Elite
            } else if checks_pass_loosened(&thresholds.good, m, DEMOTE_LOOSENESS) {
                Tier::Good
            } else {
                Tier::Weak
            }
        }
        other => other,
    }
}

fn demote_one_level(tier: Tier) -> Tier {
    match tier {
        Tier::Elite => Tier::Good,
        Tier::Good => Tier::Weak,
        other => other,
    }
}

/// Day-over-day % returns derived from sorted equity snapshots, the input
/// `sharpe_ratio`/`sortino_ratio` expect.
fn equity_daily_returns(equity_history: &[EquitySnapshot]) -> Vec<f64> {
    let mut sorted: Vec<&EquitySnapshot> = equity_history.iter().collect();
    sorted.sort_by_key(|s| s.recorded_at_ms);

    let mut returns = Vec::with_capacity(sorted.len().saturating_sub(1));
    for pair in sorted.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        if prev.account_value > 0.0 {
            returns.push((cur.account_value - prev.account_value) / prev.account_value);
        }
    }
    returns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_metrics() -> Metrics {
        Metrics {
            account_value: 20_000.0,
            pnl_7d: 0.0,
            pnl_30d: 0.0,
            pnl_60d: 0.0,
            pnl_90d: 0.0,
            roi_7d_pct: 0.0,
            roi_30d_pct: 0.0,
            roi_60d_pct: 0.0,
            roi_90d_pct: 0.0,
            pnl_method: PnlMethod::RealizedSumFiltered,
            win_rate: 0.0,
            profit_factor: 0.0,
            trades_count: 0,
            max_drawdown_30d_pct: 0.0,
            current_drawdown_pct: 0.0,
            consistency_score: 0.0,
            sortino_ratio: 0.0,
            strategy_class: StrategyClass::Swing,
        }
    }

    #[test]
    fn elite_requires_both_base_checks_and_extra_condition() {
        let thresholds = TierThresholdSet::default();
        let mut m = base_metrics();
        m.roi_7d_pct = 20.0;
        m.win_rate = 60.0;
        m.profit_factor = 2.0;
        m.trades_count = 20;
        m.account_value = 20_000.0;
        // fails extra condition: no positive 30d pnl, no high consistency, roi not double
        assert_eq!(decide_tier(&m, &thresholds), Tier::Good);

        m.pnl_30d = 5_000.0;
        m.max_drawdown_30d_pct = 10.0;
        m.consistency_score = 70.0;
        assert_eq!(decide_tier(&m, &thresholds), Tier::Elite);
    }

    #[test]
    fn weak_when_nothing_passes() {
        let thresholds = TierThresholdSet::default();
        let m = base_metrics();
        assert_eq!(decide_tier(&m, &thresholds), Tier::Weak);
    }

    #[test]
    fn reevaluate_never_promotes_weak() {
        let thresholds = TierThresholdSet::default();
        let mut m = base_metrics();
        m.roi_7d_pct = 50.0;
        m.win_rate = 90.0;
        m.profit_factor = 5.0;
        m.trades_count = 50;
        m.account_value = 50_000.0;
        m.pnl_30d = 10_000.0;
        m.consistency_score = 90.0;
        assert_eq!(reevaluate_tier(Tier::Weak, &m, &thresholds), Tier::Weak);
    }

    #[test]
    fn reevaluate_promotes_good_to_elite_on_full_criteria() {
        let thresholds = TierThresholdSet::default();
        let mut m = base_metrics();
        m.roi_7d_pct = 20.0;
        m.win_rate = 60.0;
        m.profit_factor = 2.0;
        m.trades_count = 20;
        m.account_value = 20_000.0;
        m.pnl_30d = 5_000.0;
        m.max_drawdown_30d_pct = 10.0;
        m.consistency_score = 70.0;
        assert_eq!(reevaluate_tier(Tier::Good, &m, &thresholds), Tier::Elite);
    }

    #[test]
    fn reevaluate_demotes_elite_with_loosened_thresholds() {
        let thresholds = TierThresholdSet::default();
        let mut m = base_metrics();
        // Just below the strict elite bar but still above the loosened one.
        m.roi_7d_pct = thresholds.elite.min_roi_7d_pct * 0.8;
        m.win_rate = thresholds.elite.min_win_rate * 0.8;
        m.profit_factor = thresholds.elite.min_profit_factor * 0.8;
        m.trades_count = thresholds.elite.min_trades;
        m.account_value = thresholds.elite.min_account_value * 2.0;
        // Fails elite's extra condition -> demotes to Good, not Weak.
        assert_eq!(reevaluate_tier(Tier::Elite, &m, &thresholds), Tier::Good);
    }

    #[test]
    fn demote_one_level_floors_at_weak() {
        assert_eq!(demote_one_level(Tier::Elite), Tier::Good);
        assert_eq!(demote_one_level(Tier::Good), Tier::Weak);
        assert_eq!(demote_one_level(Tier::Weak), Tier::Weak);
    }

    #[test]
    fn sustained_drawdown_requires_24h_before_demoting() {
        let exchange = Arc::new(ExchangeClient::new("https://example.invalid/info"));
        let evaluator = QualityEvaluator::new(exchange);
        let addr = Address::new("0xabc");
        let t0 = Utc::now();

        assert!(evaluator
            .check_sustained_drawdown(&addr, Tier::Good, 55.0, t0)
            .is_none());

        let t_later = t0 + chrono::Duration::hours(25);
        let change = evaluator.check_sustained_drawdown(&addr, Tier::Good, 55.0, t_later);
        assert!(change.is_some());
        assert_eq!(change.unwrap().new_tier, Tier::Weak);
    }

    #[test]
    fn immediate_demotion_above_75_pct() {
        let exchange = Arc::new(ExchangeClient::new("https://example.invalid/info"));
        let evaluator = QualityEvaluator::new(exchange);
        let addr = Address::new("0xabc");
        let change = evaluator.check_sustained_drawdown(&addr, Tier::Elite, 80.0, Utc::now());
        assert_eq!(change.unwrap().new_tier, Tier::Good);
    }
}
