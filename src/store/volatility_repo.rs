// =============================================================================
// Volatility / funding repositories — CoinVolatility, FundingContext
// =============================================================================

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::errors::StoreError;
use crate::funding::FundingContext;
use crate::volatility::CoinVolatility;

pub struct VolatilityRepo {
    pool: SqlitePool,
}

impl VolatilityRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, v: &CoinVolatility) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO coin_volatility (
                coin, atr_14d, atr_7d, daily_range_avg_pct, volatility_rank,
                last_price, price_change_24h_pct, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(coin) DO UPDATE SET
                atr_14d = excluded.atr_14d,
                atr_7d = excluded.atr_7d,
                daily_range_avg_pct = excluded.daily_range_avg_pct,
                volatility_rank = excluded.volatility_rank,
                last_price = excluded.last_price,
                price_change_24h_pct = excluded.price_change_24h_pct,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&v.coin)
        .bind(v.atr_14d)
        .bind(v.atr_7d)
        .bind(v.daily_range_avg_pct)
        .bind(v.volatility_rank)
        .bind(v.last_price)
        .bind(v.price_change_24h_pct)
        .bind(v.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, coin: &str) -> Result<Option<CoinVolatility>, StoreError> {
        let row = sqlx::query("SELECT * FROM coin_volatility WHERE coin = ?")
            .bind(coin)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_volatility(&r)).transpose()
    }

    pub async fn all(&self) -> Result<Vec<CoinVolatility>, StoreError> {
        let rows = sqlx::query("SELECT * FROM coin_volatility").fetch_all(&self.pool).await?;
        rows.iter().map(row_to_volatility).collect()
    }
}

fn row_to_volatility(r: &sqlx::sqlite::SqliteRow) -> Result<CoinVolatility, StoreError> {
    Ok(CoinVolatility {
        coin: r.try_get("coin")?,
        atr_14d: r.try_get("atr_14d")?,
        atr_7d: r.try_get("atr_7d")?,
        daily_range_avg_pct: r.try_get("daily_range_avg_pct")?,
        volatility_rank: r.try_get("volatility_rank")?,
        last_price: r.try_get("last_price")?,
        price_change_24h_pct: r.try_get("price_change_24h_pct")?,
        updated_at: parse_ts(&r.try_get::<String, _>("updated_at")?),
    })
}

pub struct FundingRepo {
    pool: SqlitePool,
}

impl FundingRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, f: &FundingContext) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO funding_context (coin, funding_rate_8h, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(coin) DO UPDATE SET
                funding_rate_8h = excluded.funding_rate_8h,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&f.coin)
        .bind(f.funding_rate_8h)
        .bind(f.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, coin: &str) -> Result<Option<FundingContext>, StoreError> {
        let row = sqlx::query("SELECT * FROM funding_context WHERE coin = ?")
            .bind(coin)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_funding(&r)).transpose()
    }

    pub async fn all(&self) -> Result<Vec<FundingContext>, StoreError> {
        let rows = sqlx::query("SELECT * FROM funding_context").fetch_all(&self.pool).await?;
        rows.iter().map(row_to_funding).collect()
    }
}

fn row_to_funding(r: &sqlx::sqlite::SqliteRow) -> Result<FundingContext, StoreError> {
    Ok(FundingContext {
        coin: r.try_get("coin")?,
        funding_rate_8h: r.try_get("funding_rate_8h")?,
        updated_at: parse_ts(&r.try_get::<String, _>("updated_at")?),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}
