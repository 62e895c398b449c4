// =============================================================================
// Signal repository — Signal, AssetPerformance
// =============================================================================

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::errors::StoreError;
use crate::signal_tracker::AssetPerformance;
use crate::signals::model::{Signal, TraderContribution};
use crate::types::{Direction, FundingClassification, SignalOutcome, SignalStrength, SignalTier};

pub struct SignalRepo {
    pool: SqlitePool,
}

impl SignalRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, signal: &Signal) -> Result<(), StoreError> {
        let traders_json = serde_json::to_string(&signal.traders).unwrap_or_default();
        sqlx::query(
            r#"
            INSERT INTO signals (
                coin, direction, elite_count, good_count, total_traders, traders_json,
                entry_price, current_price, stop_loss, take_profit_1, take_profit_2, take_profit_3,
                funding_context, avg_conviction_pct, confidence, signal_strength, signal_tier,
                is_active, created_at, updated_at, closed_at, outcome, final_pnl_pct,
                hit_stop, hit_tp1, hit_tp2, hit_tp3, invalidated, invalidation_reason,
                max_pnl_pct, min_pnl_pct, peak_price, trough_price
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(coin, direction) DO UPDATE SET
                elite_count = excluded.elite_count,
                good_count = excluded.good_count,
                total_traders = excluded.total_traders,
                traders_json = excluded.traders_json,
                entry_price = excluded.entry_price,
                current_price = excluded.current_price,
                stop_loss = excluded.stop_loss,
                take_profit_1 = excluded.take_profit_1,
                take_profit_2 = excluded.take_profit_2,
                take_profit_3 = excluded.take_profit_3,
                funding_context = excluded.funding_context,
                avg_conviction_pct = excluded.avg_conviction_pct,
                confidence = excluded.confidence,
                signal_strength = excluded.signal_strength,
                signal_tier = excluded.signal_tier,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at,
                closed_at = excluded.closed_at,
                outcome = excluded.outcome,
                final_pnl_pct = excluded.final_pnl_pct,
                hit_stop = excluded.hit_stop,
                hit_tp1 = excluded.hit_tp1,
                hit_tp2 = excluded.hit_tp2,
                hit_tp3 = excluded.hit_tp3,
                invalidated = excluded.invalidated,
                invalidation_reason = excluded.invalidation_reason,
                max_pnl_pct = excluded.max_pnl_pct,
                min_pnl_pct = excluded.min_pnl_pct,
                peak_price = excluded.peak_price,
                trough_price = excluded.trough_price
            "#,
        )
        .bind(&signal.coin)
        .bind(signal.direction.to_string())
        .bind(signal.elite_count)
        .bind(signal.good_count)
        .bind(signal.total_traders)
        .bind(traders_json)
        .bind(signal.entry_price)
        .bind(signal.current_price)
        .bind(signal.stop_loss)
        .bind(signal.take_profit_1)
        .bind(signal.take_profit_2)
        .bind(signal.take_profit_3)
        .bind(signal.funding_context.to_string())
        .bind(signal.avg_conviction_pct)
        .bind(signal.confidence)
        .bind(signal.signal_strength.to_string())
        .bind(signal.signal_tier.to_string())
        .bind(signal.is_active)
        .bind(signal.created_at.to_rfc3339())
        .bind(signal.updated_at.to_rfc3339())
        .bind(signal.closed_at.map(|d| d.to_rfc3339()))
        .bind(signal.outcome.map(|o| o.to_string()))
        .bind(signal.final_pnl_pct)
        .bind(signal.hit_stop)
        .bind(signal.hit_tp1)
        .bind(signal.hit_tp2)
        .bind(signal.hit_tp3)
        .bind(signal.invalidated)
        .bind(&signal.invalidation_reason)
        .bind(signal.max_pnl_pct)
        .bind(signal.min_pnl_pct)
        .bind(signal.peak_price)
        .bind(signal.trough_price)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, coin: &str, direction: Direction) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM signals WHERE coin = ? AND direction = ?")
            .bind(coin)
            .bind(direction.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn active_signals(&self) -> Result<Vec<Signal>, StoreError> {
        let rows = sqlx::query("SELECT * FROM signals WHERE is_active = 1").fetch_all(&self.pool).await?;
        rows.iter().map(row_to_signal).collect()
    }

    pub async fn upsert_asset_performance(&self, perf: &AssetPerformance) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO asset_performance (
                coin, total_signals, winning_signals, win_rate, avg_pnl_pct, total_pnl_pct,
                avg_duration_hours, best_signal_pnl_pct, worst_signal_pnl_pct
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(coin) DO UPDATE SET
                total_signals = excluded.total_signals,
                winning_signals = excluded.winning_signals,
                win_rate = excluded.win_rate,
                avg_pnl_pct = excluded.avg_pnl_pct,
                total_pnl_pct = excluded.total_pnl_pct,
                avg_duration_hours = excluded.avg_duration_hours,
                best_signal_pnl_pct = excluded.best_signal_pnl_pct,
                worst_signal_pnl_pct = excluded.worst_signal_pnl_pct
            "#,
        )
        .bind(&perf.coin)
        .bind(perf.total_signals as i64)
        .bind(perf.winning_signals as i64)
        .bind(perf.win_rate)
        .bind(perf.avg_pnl_pct)
        .bind(perf.total_pnl_pct)
        .bind(perf.avg_duration_hours)
        .bind(perf.best_signal_pnl_pct)
        .bind(perf.worst_signal_pnl_pct)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_signal(r: &sqlx::sqlite::SqliteRow) -> Result<Signal, StoreError> {
    let traders_json: String = r.try_get("traders_json")?;
    let traders: Vec<TraderContribution> = serde_json::from_str(&traders_json).unwrap_or_default();

    Ok(Signal {
        coin: r.try_get("coin")?,
        direction: Direction::from_str(&r.try_get::<String, _>("direction")?).unwrap_or(Direction::Long),
        elite_count: r.try_get::<i64, _>("elite_count")? as u32,
        good_count: r.try_get::<i64, _>("good_count")? as u32,
        total_traders: r.try_get::<i64, _>("total_traders")? as u32,
        traders,
        entry_price: r.try_get("entry_price")?,
        current_price: r.try_get("current_price")?,
        stop_loss: r.try_get("stop_loss")?,
        take_profit_1: r.try_get("take_profit_1")?,
        take_profit_2: r.try_get("take_profit_2")?,
        take_profit_3: r.try_get("take_profit_3")?,
        funding_context: FundingClassification::from_str(&r.try_get::<String, _>("funding_context")?).unwrap_or(FundingClassification::Neutral),
        avg_conviction_pct: r.try_get("avg_conviction_pct")?,
        confidence: r.try_get("confidence")?,
        signal_strength: SignalStrength::from_str(&r.try_get::<String, _>("signal_strength")?).unwrap_or(SignalStrength::Medium),
        signal_tier: SignalTier::from_str(&r.try_get::<String, _>("signal_tier")?).unwrap_or(SignalTier::Consensus),
        is_active: r.try_get::<i64, _>("is_active")? != 0,
        created_at: parse_ts(&r.try_get::<String, _>("created_at")?),
        updated_at: parse_ts(&r.try_get::<String, _>("updated_at")?),
        closed_at: r.try_get::<Option<String>, _>("closed_at")?.map(|s| parse_ts(&s)),
        outcome: r.try_get::<Option<String>, _>("outcome")?.and_then(|s| SignalOutcome::from_str(&s).ok()),
        final_pnl_pct: r.try_get("final_pnl_pct")?,
        hit_stop: r.try_get::<i64, _>("hit_stop")? != 0,
        hit_tp1: r.try_get::<i64, _>("hit_tp1")? != 0,
        hit_tp2: r.try_get::<i64, _>("hit_tp2")? != 0,
        hit_tp3: r.try_get::<i64, _>("hit_tp3")? != 0,
        invalidated: r.try_get::<i64, _>("invalidated")? != 0,
        invalidation_reason: r.try_get("invalidation_reason")?,
        max_pnl_pct: r.try_get("max_pnl_pct")?,
        min_pnl_pct: r.try_get("min_pnl_pct")?,
        peak_price: r.try_get("peak_price")?,
        trough_price: r.try_get("trough_price")?,
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}
