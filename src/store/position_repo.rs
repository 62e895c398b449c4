// =============================================================================
// Position repository — Position, PositionChange
// =============================================================================
//
// `replace_positions` implements the §4.5 persistence ordering contract:
// delete this wallet's polled set, insert the fresh one, all inside a single
// transaction so a reader never observes a half-written poll cycle. Change
// events are appended separately by the caller once persistence completes,
// matching the "persist, then publish" rule.
// =============================================================================

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::errors::StoreError;
use crate::position::model::{PositionChange, TrackedPosition};
use crate::types::{Address, Direction, PositionEventType};

pub struct PositionRepo {
    pool: SqlitePool,
}

impl PositionRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Delete `address`'s previously stored positions and insert the fresh
    /// set, atomically.
    pub async fn replace_positions(&self, address: &Address, positions: &[TrackedPosition]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM positions WHERE address = ?")
            .bind(address.as_ref())
            .execute(&mut *tx)
            .await?;

        for p in positions {
            sqlx::query(
                r#"
                INSERT INTO positions (
                    address, coin, direction, size, entry_price, value_usd, leverage,
                    unrealized_pnl, margin_used, liquidation_price, has_pending_entry,
                    has_stop_order, has_tp_order, opened_at, peak_unrealized_pnl,
                    trough_unrealized_pnl, conviction_pct
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(p.address.as_ref())
            .bind(&p.coin)
            .bind(p.direction.to_string())
            .bind(p.size)
            .bind(p.entry_price)
            .bind(p.value_usd)
            .bind(p.leverage)
            .bind(p.unrealized_pnl)
            .bind(p.margin_used)
            .bind(p.liquidation_price)
            .bind(p.has_pending_entry)
            .bind(p.has_stop_order)
            .bind(p.has_tp_order)
            .bind(p.opened_at.to_rfc3339())
            .bind(p.peak_unrealized_pnl)
            .bind(p.trough_unrealized_pnl)
            .bind(p.conviction_pct)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn positions_for(&self, address: &Address) -> Result<Vec<TrackedPosition>, StoreError> {
        let rows = sqlx::query("SELECT * FROM positions WHERE address = ?")
            .bind(address.as_ref())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_position).collect()
    }

    /// Every coin with a currently open position across all wallets, for the
    /// volatility tracker's "held coins" refresh set (§4.2).
    pub async fn distinct_coins(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT DISTINCT coin FROM positions").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("coin")).collect())
    }

    pub async fn record_change(&self, change: &PositionChange) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO position_changes (
                address, coin, event_type, prev_direction, new_direction,
                prev_size, new_size, size_change, price_at_event, detected_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(change.address.as_ref())
        .bind(&change.coin)
        .bind(change.event_type.to_string())
        .bind(change.prev_direction.map(|d| d.to_string()))
        .bind(change.new_direction.map(|d| d.to_string()))
        .bind(change.prev_size)
        .bind(change.new_size)
        .bind(change.size_change)
        .bind(change.price_at_event)
        .bind(change.detected_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Ordered-select-with-limit: the `limit` most recent change events for
    /// `address`, newest first.
    pub async fn recent_changes(&self, address: &Address, limit: i64) -> Result<Vec<PositionChange>, StoreError> {
        let rows = sqlx::query("SELECT * FROM position_changes WHERE address = ? ORDER BY detected_at DESC LIMIT ?")
            .bind(address.as_ref())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_change).collect()
    }
}

fn row_to_position(r: &sqlx::sqlite::SqliteRow) -> Result<TrackedPosition, StoreError> {
    Ok(TrackedPosition {
        address: Address::new(r.try_get::<String, _>("address")?),
        coin: r.try_get("coin")?,
        direction: Direction::from_str(&r.try_get::<String, _>("direction")?).unwrap_or(Direction::Long),
        size: r.try_get("size")?,
        entry_price: r.try_get("entry_price")?,
        value_usd: r.try_get("value_usd")?,
        leverage: r.try_get("leverage")?,
        unrealized_pnl: r.try_get("unrealized_pnl")?,
        margin_used: r.try_get("margin_used")?,
        liquidation_price: r.try_get("liquidation_price")?,
        has_pending_entry: r.try_get::<i64, _>("has_pending_entry")? != 0,
        has_stop_order: r.try_get::<i64, _>("has_stop_order")? != 0,
        has_tp_order: r.try_get::<i64, _>("has_tp_order")? != 0,
        opened_at: parse_ts(&r.try_get::<String, _>("opened_at")?),
        peak_unrealized_pnl: r.try_get("peak_unrealized_pnl")?,
        trough_unrealized_pnl: r.try_get("trough_unrealized_pnl")?,
        conviction_pct: r.try_get("conviction_pct")?,
    })
}

fn row_to_change(r: &sqlx::sqlite::SqliteRow) -> Result<PositionChange, StoreError> {
    Ok(PositionChange {
        address: Address::new(r.try_get::<String, _>("address")?),
        coin: r.try_get("coin")?,
        event_type: PositionEventType::from_str(&r.try_get::<String, _>("event_type")?).unwrap_or(PositionEventType::Open),
        prev_direction: r.try_get::<Option<String>, _>("prev_direction")?.and_then(|s| Direction::from_str(&s).ok()),
        new_direction: r.try_get::<Option<String>, _>("new_direction")?.and_then(|s| Direction::from_str(&s).ok()),
        prev_size: r.try_get("prev_size")?,
        new_size: r.try_get("new_size")?,
        size_change: r.try_get("size_change")?,
        price_at_event: r.try_get("price_at_event")?,
        detected_at: parse_ts(&r.try_get::<String, _>("detected_at")?),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}
