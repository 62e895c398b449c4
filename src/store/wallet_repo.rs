// =============================================================================
// Wallet repository — Wallet, TraderQuality, TierChangeHistory, EquitySnapshot
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::errors::StoreError;
use crate::quality::evaluator::{TierChange, TraderQuality};
use crate::quality::metrics::EquitySnapshot;
use crate::types::{Address, PnlMethod, StrategyClass, Tier};

pub struct WalletRepo {
    pool: SqlitePool,
}

impl WalletRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Records `address` as known if it isn't already, without disturbing
    /// an existing `first_seen_at` (§4.5 "seen wallets" seeding).
    pub async fn touch_wallet(&self, address: &Address, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO wallets (address, first_seen_at, last_polled_at)
            VALUES (?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET last_polled_at = excluded.last_polled_at
            "#,
        )
        .bind(address.as_ref())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn all_wallets(&self) -> Result<Vec<Address>, StoreError> {
        let rows = sqlx::query("SELECT address FROM wallets").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|r| Address::new(r.get::<String, _>("address"))).collect())
    }

    pub async fn upsert_quality(&self, q: &TraderQuality) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO trader_quality (
                address, tier, is_tracked, account_value, pnl_7d, pnl_30d, pnl_60d, pnl_90d,
                roi_7d_pct, roi_30d_pct, roi_60d_pct, roi_90d_pct, pnl_calculation_method,
                win_rate, profit_factor, total_trades, max_drawdown_30d_pct, consistency_score,
                sortino_ratio, strategy_class, tier_change_count, analyzed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                tier = excluded.tier,
                is_tracked = excluded.is_tracked,
                account_value = excluded.account_value,
                pnl_7d = excluded.pnl_7d,
                pnl_30d = excluded.pnl_30d,
                pnl_60d = excluded.pnl_60d,
                pnl_90d = excluded.pnl_90d,
                roi_7d_pct = excluded.roi_7d_pct,
                roi_30d_pct = excluded.roi_30d_pct,
                roi_60d_pct = excluded.roi_60d_pct,
                roi_90d_pct = excluded.roi_90d_pct,
                pnl_calculation_method = excluded.pnl_calculation_method,
                win_rate = excluded.win_rate,
                profit_factor = excluded.profit_factor,
                total_trades = excluded.total_trades,
                max_drawdown_30d_pct = excluded.max_drawdown_30d_pct,
                consistency_score = excluded.consistency_score,
                sortino_ratio = excluded.sortino_ratio,
                strategy_class = excluded.strategy_class,
                tier_change_count = excluded.tier_change_count,
                analyzed_at = excluded.analyzed_at
            "#,
        )
        .bind(q.address.as_ref())
        .bind(q.tier.to_string())
        .bind(q.is_tracked)
        .bind(q.account_value)
        .bind(q.pnl_7d)
        .bind(q.pnl_30d)
        .bind(q.pnl_60d)
        .bind(q.pnl_90d)
        .bind(q.roi_7d_pct)
        .bind(q.roi_30d_pct)
        .bind(q.roi_60d_pct)
        .bind(q.roi_90d_pct)
        .bind(q.pnl_calculation_method.to_string())
        .bind(q.win_rate)
        .bind(q.profit_factor)
        .bind(q.total_trades)
        .bind(q.max_drawdown_30d_pct)
        .bind(q.consistency_score)
        .bind(q.sortino_ratio)
        .bind(q.strategy_class.to_string())
        .bind(q.tier_change_count)
        .bind(q.analyzed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_quality(&self, address: &Address) -> Result<Option<TraderQuality>, StoreError> {
        let row = sqlx::query("SELECT * FROM trader_quality WHERE address = ?")
            .bind(address.as_ref())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_quality(address.clone(), &r)))
    }

    /// Every currently tracked (Elite/Good) wallet, for rehydrating the
    /// in-memory quality map at startup.
    pub async fn all_quality(&self) -> Result<Vec<TraderQuality>, StoreError> {
        let rows = sqlx::query("SELECT * FROM trader_quality").fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|r| row_to_quality(Address::new(r.get::<String, _>("address")), r))
            .collect())
    }

    pub async fn record_tier_change(&self, change: &TierChange) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tier_change_history (address, from_tier, to_tier, reason, changed_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(change.address.as_ref())
        .bind(change.prior_tier.to_string())
        .bind(change.new_tier.to_string())
        .bind(&change.reason)
        .bind(change.changed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Ordered-select-with-limit: the `n` most recent tier changes for
    /// `address`, newest first.
    pub async fn recent_tier_changes(&self, address: &Address, limit: i64) -> Result<Vec<TierChange>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM tier_change_history WHERE address = ? ORDER BY changed_at DESC LIMIT ?",
        )
        .bind(address.as_ref())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| -> Result<TierChange, StoreError> {
                Ok(TierChange {
                    address: address.clone(),
                    prior_tier: parse_tier(&r.try_get::<String, _>("from_tier")?),
                    new_tier: parse_tier(&r.try_get::<String, _>("to_tier")?),
                    reason: r.try_get("reason")?,
                    changed_at: parse_ts(&r.try_get::<String, _>("changed_at")?),
                })
            })
            .collect()
    }

    pub async fn record_equity_snapshot(&self, address: &Address, date: NaiveDate, account_value: f64, recorded_at_ms: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO equity_snapshots (address, snapshot_date, account_value, recorded_at_ms)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(address, snapshot_date) DO UPDATE SET
                account_value = excluded.account_value,
                recorded_at_ms = excluded.recorded_at_ms
            "#,
        )
        .bind(address.as_ref())
        .bind(date.to_string())
        .bind(account_value)
        .bind(recorded_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn equity_history(&self, address: &Address) -> Result<Vec<EquitySnapshot>, StoreError> {
        let rows = sqlx::query("SELECT * FROM equity_snapshots WHERE address = ? ORDER BY snapshot_date ASC")
            .bind(address.as_ref())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|r| -> Result<EquitySnapshot, StoreError> {
                Ok(EquitySnapshot {
                    date: NaiveDate::parse_from_str(&r.try_get::<String, _>("snapshot_date")?, "%Y-%m-%d").unwrap_or_default(),
                    account_value: r.try_get("account_value")?,
                    recorded_at_ms: r.try_get("recorded_at_ms")?,
                })
            })
            .collect()
    }

    /// Range delete: drops equity snapshots older than `retain_days`, run
    /// from the weekly re-evaluation job's retention pass.
    pub async fn prune_equity_history(&self, cutoff_ms: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM equity_snapshots WHERE recorded_at_ms < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_quality(address: Address, r: &sqlx::sqlite::SqliteRow) -> TraderQuality {
    TraderQuality {
        address,
        tier: parse_tier(&r.get::<String, _>("tier")),
        is_tracked: r.get::<i64, _>("is_tracked") != 0,
        account_value: r.get("account_value"),
        pnl_7d: r.get("pnl_7d"),
        pnl_30d: r.get("pnl_30d"),
        pnl_60d: r.get("pnl_60d"),
        pnl_90d: r.get("pnl_90d"),
        roi_7d_pct: r.get("roi_7d_pct"),
        roi_30d_pct: r.get("roi_30d_pct"),
        roi_60d_pct: r.get("roi_60d_pct"),
        roi_90d_pct: r.get("roi_90d_pct"),
        pnl_calculation_method: PnlMethod::from_str(&r.get::<String, _>("pnl_calculation_method")).unwrap_or(PnlMethod::RealizedSumFiltered),
        win_rate: r.get("win_rate"),
        profit_factor: r.get("profit_factor"),
        total_trades: r.get::<i64, _>("total_trades") as u32,
        max_drawdown_30d_pct: r.get("max_drawdown_30d_pct"),
        consistency_score: r.get("consistency_score"),
        sortino_ratio: r.get("sortino_ratio"),
        strategy_class: StrategyClass::from_str(&r.get::<String, _>("strategy_class")).unwrap_or(StrategyClass::Swing),
        tier_change_count: r.get::<i64, _>("tier_change_count") as u32,
        analyzed_at: parse_ts(&r.get::<String, _>("analyzed_at")),
    }
}

fn parse_tier(s: &str) -> Tier {
    Tier::from_str(s).unwrap_or(Tier::Inactive)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}
