// =============================================================================
// Persistence layer — §3 ambient addition
// =============================================================================
//
// The distilled spec treats the row store as an opaque transactional
// collaborator; this pins it to a concrete `sqlx::SqlitePool`, one repo per
// entity family, following the teacher's `Database` + one-struct-per-concern
// repository layout (`Zuytan-rustrade/infrastructure/persistence`). Every
// table is a `CREATE TABLE IF NOT EXISTS` migration run once at startup;
// every repository method runs plain (non-macro) `sqlx::query` so the crate
// never needs a live database at compile time, and returns `StoreError` so
// callers can apply the per-row-skip policy from §7.
// =============================================================================

pub mod fill_repo;
pub mod position_repo;
pub mod signal_repo;
pub mod volatility_repo;
pub mod wallet_repo;

use std::path::Path;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tokio::fs;
use tracing::info;

pub use fill_repo::FillRepo;
pub use position_repo::PositionRepo;
pub use signal_repo::SignalRepo;
pub use volatility_repo::{FundingRepo, VolatilityRepo};
pub use wallet_repo::WalletRepo;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn connect(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent)
                        .await
                        .context("failed to create database directory")?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to sqlite database")?;

        info!(db_url, "connected to database");

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// One `CREATE TABLE IF NOT EXISTS` per §3 entity, plus the
    /// `tier_change_history` audit table named but left unspecified by the
    /// distilled spec's "history table" in §4.4.
    async fn migrate(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                address TEXT PRIMARY KEY,
                first_seen_at TEXT NOT NULL,
                last_polled_at TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create wallets table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trader_quality (
                address TEXT PRIMARY KEY,
                tier TEXT NOT NULL,
                is_tracked INTEGER NOT NULL,
                account_value REAL NOT NULL,
                pnl_7d REAL NOT NULL,
                pnl_30d REAL NOT NULL,
                pnl_60d REAL NOT NULL,
                pnl_90d REAL NOT NULL,
                roi_7d_pct REAL NOT NULL,
                roi_30d_pct REAL NOT NULL,
                roi_60d_pct REAL NOT NULL,
                roi_90d_pct REAL NOT NULL,
                pnl_calculation_method TEXT NOT NULL,
                win_rate REAL NOT NULL,
                profit_factor REAL NOT NULL,
                total_trades INTEGER NOT NULL,
                max_drawdown_30d_pct REAL NOT NULL,
                consistency_score REAL NOT NULL,
                sortino_ratio REAL NOT NULL,
                strategy_class TEXT NOT NULL,
                tier_change_count INTEGER NOT NULL,
                analyzed_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create trader_quality table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tier_change_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL,
                from_tier TEXT NOT NULL,
                to_tier TEXT NOT NULL,
                reason TEXT NOT NULL,
                changed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tier_change_address
            ON tier_change_history (address, changed_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create tier_change_history table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS equity_snapshots (
                address TEXT NOT NULL,
                snapshot_date TEXT NOT NULL,
                account_value REAL NOT NULL,
                recorded_at_ms INTEGER NOT NULL,
                PRIMARY KEY (address, snapshot_date)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create equity_snapshots table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                address TEXT NOT NULL,
                coin TEXT NOT NULL,
                direction TEXT NOT NULL,
                size REAL NOT NULL,
                entry_price REAL NOT NULL,
                value_usd REAL NOT NULL,
                leverage REAL NOT NULL,
                unrealized_pnl REAL NOT NULL,
                margin_used REAL NOT NULL,
                liquidation_price REAL,
                has_pending_entry INTEGER NOT NULL,
                has_stop_order INTEGER NOT NULL,
                has_tp_order INTEGER NOT NULL,
                opened_at TEXT NOT NULL,
                peak_unrealized_pnl REAL NOT NULL,
                trough_unrealized_pnl REAL NOT NULL,
                conviction_pct REAL NOT NULL,
                PRIMARY KEY (address, coin)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create positions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS position_changes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL,
                coin TEXT NOT NULL,
                event_type TEXT NOT NULL,
                prev_direction TEXT,
                new_direction TEXT,
                prev_size REAL,
                new_size REAL,
                size_change REAL NOT NULL,
                price_at_event REAL NOT NULL,
                detected_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_position_changes_address_time
            ON position_changes (address, detected_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create position_changes table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                coin TEXT NOT NULL,
                direction TEXT NOT NULL,
                elite_count INTEGER NOT NULL,
                good_count INTEGER NOT NULL,
                total_traders INTEGER NOT NULL,
                traders_json TEXT NOT NULL,
                entry_price REAL NOT NULL,
                current_price REAL NOT NULL,
                stop_loss REAL NOT NULL,
                take_profit_1 REAL NOT NULL,
                take_profit_2 REAL NOT NULL,
                take_profit_3 REAL NOT NULL,
                funding_context TEXT NOT NULL,
                avg_conviction_pct REAL NOT NULL,
                confidence REAL NOT NULL,
                signal_strength TEXT NOT NULL,
                signal_tier TEXT NOT NULL,
                is_active INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                closed_at TEXT,
                outcome TEXT,
                final_pnl_pct REAL,
                hit_stop INTEGER NOT NULL,
                hit_tp1 INTEGER NOT NULL,
                hit_tp2 INTEGER NOT NULL,
                hit_tp3 INTEGER NOT NULL,
                invalidated INTEGER NOT NULL,
                invalidation_reason TEXT,
                max_pnl_pct REAL NOT NULL,
                min_pnl_pct REAL NOT NULL,
                peak_price REAL NOT NULL,
                trough_price REAL NOT NULL,
                PRIMARY KEY (coin, direction)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create signals table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS coin_volatility (
                coin TEXT PRIMARY KEY,
                atr_14d REAL NOT NULL,
                atr_7d REAL NOT NULL,
                daily_range_avg_pct REAL NOT NULL,
                volatility_rank REAL NOT NULL,
                last_price REAL NOT NULL,
                price_change_24h_pct REAL NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create coin_volatility table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS funding_context (
                coin TEXT PRIMARY KEY,
                funding_rate_8h REAL NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create funding_context table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS realtime_fills (
                hash TEXT NOT NULL,
                oid INTEGER NOT NULL,
                address TEXT NOT NULL,
                coin TEXT NOT NULL,
                px REAL NOT NULL,
                sz REAL NOT NULL,
                closed_pnl REAL NOT NULL,
                tier_at_fill TEXT NOT NULL,
                fill_time INTEGER NOT NULL,
                PRIMARY KEY (hash, oid)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create realtime_fills table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS asset_performance (
                coin TEXT PRIMARY KEY,
                total_signals INTEGER NOT NULL,
                winning_signals INTEGER NOT NULL,
                win_rate REAL NOT NULL,
                avg_pnl_pct REAL NOT NULL,
                total_pnl_pct REAL NOT NULL,
                avg_duration_hours REAL NOT NULL,
                best_signal_pnl_pct REAL NOT NULL,
                worst_signal_pnl_pct REAL NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create asset_performance table")?;

        info!("database schema ready");
        Ok(())
    }
}
