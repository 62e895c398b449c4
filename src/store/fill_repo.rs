// =============================================================================
// Fill repository — RealtimeFill, AssetPerformance
// =============================================================================
//
// `AssetPerformance` upserts live in `signal_repo.rs` alongside `Signal`
// since both are written from the signal tracker's same update pass; this
// file only owns the raw fill stream's durable record (§4.8).
// =============================================================================

use sqlx::{Row, SqlitePool};

use crate::errors::StoreError;
use crate::fills::RealtimeFill;
use crate::types::{Address, Tier};
use std::str::FromStr;

pub struct FillRepo {
    pool: SqlitePool,
}

impl FillRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a fill, ignoring the row if `(hash, oid)` was already recorded
    /// (the in-memory `DedupRing` is the primary defense; this is a durable
    /// backstop across restarts, §8 R2).
    pub async fn insert(&self, fill: &RealtimeFill) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO realtime_fills (
                hash, oid, address, coin, px, sz, closed_pnl, tier_at_fill, fill_time
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(hash, oid) DO NOTHING
            "#,
        )
        .bind(&fill.hash)
        .bind(fill.oid as i64)
        .bind(fill.address.as_ref())
        .bind(&fill.coin)
        .bind(fill.px)
        .bind(fill.sz)
        .bind(fill.closed_pnl)
        .bind(fill.tier_at_fill.to_string())
        .bind(fill.time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_for_coin(&self, coin: &str, limit: i64) -> Result<Vec<RealtimeFill>, StoreError> {
        let rows = sqlx::query("SELECT * FROM realtime_fills WHERE coin = ? ORDER BY fill_time DESC LIMIT ?")
            .bind(coin)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_fill).collect()
    }

    /// Range delete: drops fills older than `cutoff_ms`, mirroring the
    /// equity-history retention pass for the raw fill table.
    pub async fn prune(&self, cutoff_ms: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM realtime_fills WHERE fill_time < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_fill(r: &sqlx::sqlite::SqliteRow) -> Result<RealtimeFill, StoreError> {
    Ok(RealtimeFill {
        address: Address::new(r.try_get::<String, _>("address")?),
        coin: r.try_get("coin")?,
        px: r.try_get("px")?,
        sz: r.try_get("sz")?,
        closed_pnl: r.try_get("closed_pnl")?,
        tier_at_fill: Tier::from_str(&r.try_get::<String, _>("tier_at_fill")?).unwrap_or(Tier::Inactive),
        hash: r.try_get("hash")?,
        oid: r.try_get::<i64, _>("oid")? as u64,
        time: r.try_get("fill_time")?,
    })
}
