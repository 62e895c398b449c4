// =============================================================================
// Central Application State
// =============================================================================
//
// Ties every component (A-H) together behind `Arc` handles so the scheduler
// and any future API surface share one set of live instances. Mirrors the
// teacher's central-state module in spirit — one struct wrapping every
// subsystem engine in an `Arc`, built once at startup and handed around as
// `Arc<AppState>` — but the set of subsystems themselves comes from §3/§4
// rather than the teacher's strategy/risk/market-data stack.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;

use crate::config::RuntimeConfig;
use crate::exchange::{ExchangeClient, RateLimiter};
use crate::fills::FillStream;
use crate::funding::FundingTracker;
use crate::position::PositionTracker;
use crate::quality::{QualityEvaluator, TraderQuality};
use crate::scheduler::Scheduler;
use crate::signal_tracker::SignalTracker;
use crate::signals::{SignalGenerator, SignalGeneratorConfig};
use crate::store::{Database, FillRepo, FundingRepo, PositionRepo, SignalRepo, VolatilityRepo, WalletRepo};
use crate::types::Address;
use crate::volatility::VolatilityTracker;

/// Every live subsystem plus the repositories that persist its output,
/// constructed once at process startup and shared via `Arc<AppState>`.
pub struct AppState {
    pub config: RuntimeConfig,

    pub exchange: Arc<ExchangeClient>,
    pub rate_limiter: Arc<RateLimiter>,

    pub position_tracker: Arc<PositionTracker>,
    pub volatility_tracker: Arc<VolatilityTracker>,
    pub funding_tracker: Arc<FundingTracker>,
    pub quality_evaluator: Arc<QualityEvaluator>,
    pub quality_map: Arc<RwLock<HashMap<Address, TraderQuality>>>,
    pub signal_generator: Arc<SignalGenerator>,
    pub signal_tracker: Arc<SignalTracker>,
    pub fill_stream: Arc<FillStream>,

    pub tracked_wallets: Arc<RwLock<HashSet<Address>>>,

    pub wallet_repo: Arc<WalletRepo>,
    pub position_repo: Arc<PositionRepo>,
    pub signal_repo: Arc<SignalRepo>,
    pub volatility_repo: Arc<VolatilityRepo>,
    pub funding_repo: Arc<FundingRepo>,
    pub fill_repo: Arc<FillRepo>,
}

impl AppState {
    /// Construct every subsystem from `config` and `db`, wiring D's
    /// in-memory quality map and E's position tracker into G's signal
    /// generator the way §4.6 "consumers" describes — the generator reads
    /// B/C/D/E state, it never drives them directly.
    pub fn new(config: RuntimeConfig, db: &Database) -> Self {
        let exchange = Arc::new(ExchangeClient::new(&config.exchange_info_url));
        let rate_limiter = Arc::new(RateLimiter::from_requests_per_second(config.requests_per_second));

        let wallet_repo = Arc::new(WalletRepo::new(db.pool.clone()));
        let position_repo = Arc::new(PositionRepo::new(db.pool.clone()));
        let signal_repo = Arc::new(SignalRepo::new(db.pool.clone()));
        let volatility_repo = Arc::new(VolatilityRepo::new(db.pool.clone()));
        let funding_repo = Arc::new(FundingRepo::new(db.pool.clone()));
        let fill_repo = Arc::new(FillRepo::new(db.pool.clone()));

        let position_tracker = Arc::new(PositionTracker::new(
            exchange.clone(),
            rate_limiter.clone(),
            config.min_position_value_usd,
            config.batch_size,
        ));
        let volatility_tracker = Arc::new(VolatilityTracker::new(exchange.clone(), rate_limiter.clone()));
        let funding_tracker = Arc::new(FundingTracker::new(exchange.clone(), config.funding_neutral_threshold));
        let quality_evaluator = Arc::new(QualityEvaluator::new(exchange.clone()));
        let quality_map: Arc<RwLock<HashMap<Address, TraderQuality>>> = Arc::new(RwLock::new(HashMap::new()));

        let signal_generator = Arc::new(SignalGenerator::new(
            position_tracker.clone(),
            volatility_tracker.clone(),
            funding_tracker.clone(),
            quality_map.clone(),
            SignalGeneratorConfig {
                low_conviction_pct: config.low_conviction_pct,
                medium_conviction_pct: config.medium_conviction_pct,
                high_conviction_pct: config.high_conviction_pct,
                freshness_window_hours: config.freshness_window_hours,
                directional_agreement_min: config.directional_agreement_min,
                atr_multiple: config.atr_multiple,
            },
        ));

        let signal_tracker = Arc::new(SignalTracker::new(
            exchange.clone(),
            signal_generator.clone(),
            config.max_signal_hours,
        ));

        let tracked_wallets: Arc<RwLock<HashSet<Address>>> = Arc::new(RwLock::new(HashSet::new()));

        let fill_stream = Arc::new(FillStream::new(
            config.exchange_ws_url.clone(),
            quality_map.clone(),
            config.fill_dedup_capacity,
            fill_repo.clone(),
        ));

        Self {
            config,
            exchange,
            rate_limiter,
            position_tracker,
            volatility_tracker,
            funding_tracker,
            quality_evaluator,
            quality_map,
            signal_generator,
            signal_tracker,
            fill_stream,
            tracked_wallets,
            wallet_repo,
            position_repo,
            signal_repo,
            volatility_repo,
            funding_repo,
            fill_repo,
        }
    }

    /// Rehydrates in-memory state from the row store at startup: every known
    /// wallet seeds E's seen-wallet set (so a restart doesn't replay every
    /// position as freshly "opened"), and every persisted quality row seeds
    /// D's in-memory tier map that F and G consult synchronously.
    pub async fn rehydrate(&self) -> Result<()> {
        let wallets = self.wallet_repo.all_wallets().await?;
        self.position_tracker.seed_seen_wallets(wallets);

        let quality_rows = self.wallet_repo.all_quality().await?;
        {
            let mut map = self.quality_map.write();
            for q in quality_rows {
                if q.is_tracked {
                    self.tracked_wallets.write().insert(q.address.clone());
                }
                map.insert(q.address.clone(), q);
            }
        }

        Ok(())
    }

    /// Assembles the `Scheduler` that owns every job in §4.9. Split out of
    /// `new` so startup can rehydrate state first and seed additional
    /// wallets before jobs start firing.
    pub fn build_scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.config.clone(),
            self.rate_limiter.clone(),
            self.position_tracker.clone(),
            self.volatility_tracker.clone(),
            self.funding_tracker.clone(),
            self.quality_evaluator.clone(),
            self.quality_map.clone(),
            self.signal_generator.clone(),
            self.signal_tracker.clone(),
            self.fill_stream.clone(),
            self.tracked_wallets.clone(),
            self.wallet_repo.clone(),
            self.position_repo.clone(),
            self.signal_repo.clone(),
            self.volatility_repo.clone(),
            self.funding_repo.clone(),
            self.fill_repo.clone(),
        )
    }
}
