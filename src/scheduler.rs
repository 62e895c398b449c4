// =============================================================================
// Scheduler (I) — §4.9 — [ADDED] concrete owner for the orchestration role
// =============================================================================
//
// The distilled spec describes component I only as "starts B->C->E->H and
// subscribes F->E" plus a list of nine fixed-interval jobs; it names no
// struct. This factors those jobs behind a `Scheduler` the way the teacher's
// `main.rs` wires its strategy/exit/reconcile/regime loops inline, except
// each job here gets its own `JoinHandle` so `shutdown` can cancel every task
// instead of relying on process exit.
//
// Position-change events flow from the position-tracker job to a dedicated
// consumer task over a bounded channel (§5); that consumer is the only
// caller of `SignalGenerator::handle_event`, so per-`(coin, direction)`
// ordering holds without a per-key mutex, mirroring the single-consumer
// rationale already used by the fill stream's dedup ring.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::exchange::RateLimiter;
use crate::fills::FillStream;
use crate::funding::FundingTracker;
use crate::position::{PositionChange, PositionTracker};
use crate::quality::{QualityEvaluator, TraderQuality};
use crate::signal_tracker::SignalTracker;
use crate::signals::SignalGenerator;
use crate::store::{FillRepo, FundingRepo, PositionRepo, SignalRepo, VolatilityRepo, WalletRepo};
use crate::types::{Address, Tier};
use crate::volatility::VolatilityTracker;

/// Retention window for equity history and raw fills, enforced by the
/// weekly job (§4.9 "90-day equity/history retention pruning").
const RETENTION_DAYS: i64 = 90;

pub struct Scheduler {
    config: RuntimeConfig,
    rate_limiter: Arc<RateLimiter>,

    position_tracker: Arc<PositionTracker>,
    volatility_tracker: Arc<VolatilityTracker>,
    funding_tracker: Arc<FundingTracker>,
    quality_evaluator: Arc<QualityEvaluator>,
    quality_map: Arc<RwLock<HashMap<Address, TraderQuality>>>,
    signal_generator: Arc<SignalGenerator>,
    signal_tracker: Arc<SignalTracker>,
    fill_stream: Arc<FillStream>,

    tracked_wallets: Arc<RwLock<HashSet<Address>>>,

    wallet_repo: Arc<WalletRepo>,
    position_repo: Arc<PositionRepo>,
    signal_repo: Arc<SignalRepo>,
    volatility_repo: Arc<VolatilityRepo>,
    funding_repo: Arc<FundingRepo>,
    fill_repo: Arc<FillRepo>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

#[allow(clippy::too_many_arguments)]
impl Scheduler {
    pub fn new(
        config: RuntimeConfig,
        rate_limiter: Arc<RateLimiter>,
        position_tracker: Arc<PositionTracker>,
        volatility_tracker: Arc<VolatilityTracker>,
        funding_tracker: Arc<FundingTracker>,
        quality_evaluator: Arc<QualityEvaluator>,
        quality_map: Arc<RwLock<HashMap<Address, TraderQuality>>>,
        signal_generator: Arc<SignalGenerator>,
        signal_tracker: Arc<SignalTracker>,
        fill_stream: Arc<FillStream>,
        tracked_wallets: Arc<RwLock<HashSet<Address>>>,
        wallet_repo: Arc<WalletRepo>,
        position_repo: Arc<PositionRepo>,
        signal_repo: Arc<SignalRepo>,
        volatility_repo: Arc<VolatilityRepo>,
        funding_repo: Arc<FundingRepo>,
        fill_repo: Arc<FillRepo>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
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
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Spawns every job plus the fill-stream supervisor and the
    /// position-change consumer. Returns a handle per task; `shutdown`
    /// signals all of them and joins.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let (change_tx, change_rx) = mpsc::channel::<PositionChange>(self.config.position_change_channel_capacity);

        handles.push(self.spawn_discovery_job());
        handles.push(self.spawn_position_tracker_job(change_tx));
        handles.push(self.spawn_position_change_consumer(change_rx));
        handles.push(self.spawn_signal_tracker_job());
        handles.push(self.spawn_volatility_job());
        handles.push(self.spawn_funding_job());
        handles.push(self.spawn_reanalysis_job(Tier::Elite, Duration::from_secs(3600)));
        handles.push(self.spawn_reanalysis_job(Tier::Good, Duration::from_secs(4 * 3600)));
        handles.push(self.spawn_reanalysis_job(Tier::Weak, Duration::from_secs(24 * 3600)));
        handles.push(self.spawn_weekly_job());
        handles.push(self.spawn_daily_equity_snapshot_job());
        handles.push(self.spawn_fill_stream());

        handles
    }

    /// Flips the shared shutdown flag; every job's `tokio::select!` observes
    /// it on its next tick and returns. Callers should join the handles
    /// returned by `start` after calling this.
    pub fn shutdown(&self) {
        info!("scheduler shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    fn is_shutting_down(rx: &watch::Receiver<bool>) -> bool {
        *rx.borrow()
    }

    // -------------------------------------------------------------------
    // Position tracker job — 60s default (§4.5, §4.9)
    // -------------------------------------------------------------------

    fn spawn_position_tracker_job(&self, change_tx: mpsc::Sender<PositionChange>) -> JoinHandle<()> {
        let tracker = self.position_tracker.clone();
        let tracked_wallets = self.tracked_wallets.clone();
        let position_repo = self.position_repo.clone();
        let wallet_repo = self.wallet_repo.clone();
        let mut shutdown = self.shutdown_rx();
        let interval = Duration::from_secs(self.config.position_poll_interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        if Self::is_shutting_down(&shutdown) {
                            return;
                        }
                    }
                }
                if Self::is_shutting_down(&shutdown) {
                    return;
                }

                let now = Utc::now();
                let wallets: Vec<Address> = tracked_wallets.read().iter().cloned().collect();
                if wallets.is_empty() {
                    continue;
                }

                let results = tracker.poll_cycle(&wallets, now).await;
                for result in results {
                    if let Err(e) = position_repo.replace_positions(&result.address, &result.positions).await {
                        warn!(error = %e, address = %result.address, "failed to persist polled positions");
                    }
                    if let Err(e) = wallet_repo.touch_wallet(&result.address, now).await {
                        warn!(error = %e, address = %result.address, "failed to touch wallet record");
                    }
                    for change in &result.changes {
                        if let Err(e) = position_repo.record_change(change).await {
                            warn!(error = %e, address = %result.address, "failed to persist position change");
                        }
                    }
                    // Persist completes before publish (§4.5 ordering contract).
                    for change in result.changes {
                        if change_tx.send(change).await.is_err() {
                            return; // consumer gone, process shutting down
                        }
                    }
                }
            }
        })
    }

    fn spawn_position_change_consumer(&self, mut change_rx: mpsc::Receiver<PositionChange>) -> JoinHandle<()> {
        let generator = self.signal_generator.clone();
        let signal_repo = self.signal_repo.clone();
        let mut shutdown = self.shutdown_rx();

        tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    maybe = change_rx.recv() => match maybe {
                        Some(c) => c,
                        None => return,
                    },
                    _ = shutdown.changed() => {
                        if Self::is_shutting_down(&shutdown) {
                            return;
                        }
                        continue;
                    }
                };

                let now = Utc::now();
                let outcome = generator.handle_event(&change, now).await;
                for signal in outcome.created.iter().chain(outcome.updated.iter()).chain(outcome.closed.iter()) {
                    if let Err(e) = signal_repo.upsert(signal).await {
                        warn!(error = %e, coin = %signal.coin, "failed to persist signal from position event");
                    }
                }
            }
        })
    }

    // -------------------------------------------------------------------
    // Signal tracker job — 30s default (§4.7, §4.9)
    // -------------------------------------------------------------------

    fn spawn_signal_tracker_job(&self) -> JoinHandle<()> {
        let signal_tracker = self.signal_tracker.clone();
        let generator = self.signal_generator.clone();
        let signal_repo = self.signal_repo.clone();
        let mut shutdown = self.shutdown_rx();
        let interval = Duration::from_secs(self.config.signal_track_interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        if Self::is_shutting_down(&shutdown) {
                            return;
                        }
                    }
                }
                if Self::is_shutting_down(&shutdown) {
                    return;
                }

                let now = Utc::now();
                let closed = signal_tracker.run_cycle(now).await;

                for signal in generator.active_signals() {
                    if let Err(e) = signal_repo.upsert(&signal).await {
                        warn!(error = %e, coin = %signal.coin, "failed to persist marked-to-market signal");
                    }
                }
                for signal in &closed {
                    if let Err(e) = signal_repo.upsert(signal).await {
                        warn!(error = %e, coin = %signal.coin, "failed to persist closed signal");
                    }
                    if let Some(perf) = signal_tracker.performance_for(&signal.coin) {
                        if let Err(e) = signal_repo.upsert_asset_performance(&perf).await {
                            warn!(error = %e, coin = %signal.coin, "failed to persist asset performance");
                        }
                    }
                }
            }
        })
    }

    // -------------------------------------------------------------------
    // Volatility tracker job — 4h default (§4.2, §4.9)
    // -------------------------------------------------------------------

    fn spawn_volatility_job(&self) -> JoinHandle<()> {
        let volatility = self.volatility_tracker.clone();
        let position_repo = self.position_repo.clone();
        let volatility_repo = self.volatility_repo.clone();
        let mut shutdown = self.shutdown_rx();
        let interval = Duration::from_secs(self.config.volatility_refresh_interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        if Self::is_shutting_down(&shutdown) {
                            return;
                        }
                    }
                }
                if Self::is_shutting_down(&shutdown) {
                    return;
                }

                let held_coins = position_repo.distinct_coins().await.unwrap_or_else(|e| {
                    warn!(error = %e, "failed to read held coins, refreshing major assets only");
                    Vec::new()
                });

                volatility.refresh_all(&held_coins).await;
                for cv in volatility.all() {
                    if let Err(e) = volatility_repo.upsert(&cv).await {
                        warn!(error = %e, coin = %cv.coin, "failed to persist coin volatility");
                    }
                }
            }
        })
    }

    // -------------------------------------------------------------------
    // Funding tracker job — 30min default (§4.3, §4.9)
    // -------------------------------------------------------------------

    fn spawn_funding_job(&self) -> JoinHandle<()> {
        let funding = self.funding_tracker.clone();
        let funding_repo = self.funding_repo.clone();
        let mut shutdown = self.shutdown_rx();
        let interval = Duration::from_secs(self.config.funding_refresh_interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        if Self::is_shutting_down(&shutdown) {
                            return;
                        }
                    }
                }
                if Self::is_shutting_down(&shutdown) {
                    return;
                }

                funding.refresh_all().await;
                for fc in funding.all() {
                    if let Err(e) = funding_repo.upsert(&fc).await {
                        warn!(error = %e, coin = %fc.coin, "failed to persist funding context");
                    }
                }
            }
        })
    }

    // -------------------------------------------------------------------
    // Discovery sweep — first evaluation of configured candidate wallets
    // not yet known to the quality map (§3 "Wallet ... first discovery",
    // §4.4 step 1). Runs immediately at startup and hourly thereafter so a
    // candidate list can be grown by redeploying with a new environment
    // without losing wallets already being tracked.
    // -------------------------------------------------------------------

    fn spawn_discovery_job(&self) -> JoinHandle<()> {
        let evaluator = self.quality_evaluator.clone();
        let quality_map = self.quality_map.clone();
        let tracked_wallets = self.tracked_wallets.clone();
        let wallet_repo = self.wallet_repo.clone();
        let rate_limiter = self.rate_limiter.clone();
        let thresholds = self.config.tier_thresholds.clone();
        let candidates = self.config.candidate_addresses.clone();
        let mut shutdown = self.shutdown_rx();

        tokio::spawn(async move {
            if candidates.is_empty() {
                return;
            }

            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        if Self::is_shutting_down(&shutdown) {
                            return;
                        }
                    }
                }
                if Self::is_shutting_down(&shutdown) {
                    return;
                }

                let unseen: Vec<Address> = candidates
                    .iter()
                    .filter(|a| !quality_map.read().contains_key(*a))
                    .cloned()
                    .collect();

                for address in unseen {
                    let now = Utc::now();
                    rate_limiter.wait_turn().await;
                    let equity_history = wallet_repo.equity_history(&address).await.unwrap_or_default();
                    match evaluator.evaluate(&address, &equity_history, &thresholds, now).await {
                        Ok(quality) => {
                            if let Err(e) = wallet_repo.touch_wallet(&address, now).await {
                                warn!(error = %e, address = %address, "failed to record newly discovered wallet");
                            }
                            if let Err(e) = wallet_repo.upsert_quality(&quality).await {
                                warn!(error = %e, address = %address, "failed to persist newly discovered wallet's quality");
                            }
                            info!(address = %address, tier = %quality.tier, "discovered and evaluated candidate wallet");
                            if quality.is_tracked {
                                tracked_wallets.write().insert(address.clone());
                            }
                            quality_map.write().insert(address, quality);
                        }
                        Err(e) => {
                            warn!(error = %e, address = %address, "initial evaluation unavailable this cycle, will retry");
                        }
                    }
                }
            }
        })
    }

    // -------------------------------------------------------------------
    // Re-analysis jobs — elites 1h / goods 4h / weaks 24h, batched (§4.4, §4.9)
    // -------------------------------------------------------------------

    fn spawn_reanalysis_job(&self, tier: Tier, interval: Duration) -> JoinHandle<()> {
        let evaluator = self.quality_evaluator.clone();
        let quality_map = self.quality_map.clone();
        let wallet_repo = self.wallet_repo.clone();
        let signal_generator = self.signal_generator.clone();
        let signal_repo = self.signal_repo.clone();
        let rate_limiter = self.rate_limiter.clone();
        let thresholds = self.config.tier_thresholds.clone();
        let batch_size = self.config.batch_size.max(1);
        let mut shutdown = self.shutdown_rx();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        if Self::is_shutting_down(&shutdown) {
                            return;
                        }
                    }
                }
                if Self::is_shutting_down(&shutdown) {
                    return;
                }

                let wallets: Vec<Address> = quality_map
                    .read()
                    .iter()
                    .filter(|(_, q)| q.tier == tier)
                    .map(|(a, _)| a.clone())
                    .collect();

                for batch in wallets.chunks(batch_size) {
                    for address in batch {
                        let now = Utc::now();
                        let prior = quality_map.read().get(address).cloned();
                        let Some(prior) = prior else { continue };

                        let equity_history = wallet_repo.equity_history(address).await.unwrap_or_default();

                        rate_limiter.wait_turn().await;
                        match evaluator.reevaluate(address, &prior, &equity_history, &thresholds, now).await {
                            Ok((updated, change)) => {
                                if let Err(e) = wallet_repo.upsert_quality(&updated).await {
                                    warn!(error = %e, address = %address, "failed to persist re-evaluated quality");
                                }
                                if let Some(change) = &change {
                                    if let Err(e) = wallet_repo.record_tier_change(change).await {
                                        warn!(error = %e, address = %address, "failed to persist tier change");
                                    }
                                }
                                quality_map.write().insert(address.clone(), updated);
                            }
                            Err(e) => {
                                warn!(error = %e, address = %address, ?tier, "re-evaluation unavailable this cycle");
                            }
                        }
                    }

                    // Tier-sync sweep after each batch (§4.9).
                    let closed = signal_generator.tier_sync_sweep(Utc::now());
                    for signal in &closed {
                        if let Err(e) = signal_repo.upsert(signal).await {
                            warn!(error = %e, coin = %signal.coin, "failed to persist tier-sync-closed signal");
                        }
                    }
                }
            }
        })
    }

    // -------------------------------------------------------------------
    // Weekly full re-evaluation + 90-day retention pruning (§4.9)
    // -------------------------------------------------------------------

    fn spawn_weekly_job(&self) -> JoinHandle<()> {
        let evaluator = self.quality_evaluator.clone();
        let quality_map = self.quality_map.clone();
        let wallet_repo = self.wallet_repo.clone();
        let fill_repo = self.fill_repo.clone();
        let signal_generator = self.signal_generator.clone();
        let signal_repo = self.signal_repo.clone();
        let rate_limiter = self.rate_limiter.clone();
        let thresholds = self.config.tier_thresholds.clone();
        let batch_size = self.config.batch_size.max(1);
        let mut shutdown = self.shutdown_rx();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(7 * 24 * 3600));
            ticker.tick().await; // consume the immediate first tick; run weekly thereafter
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        if Self::is_shutting_down(&shutdown) {
                            return;
                        }
                    }
                }
                if Self::is_shutting_down(&shutdown) {
                    return;
                }

                let wallets = wallet_repo.all_wallets().await.unwrap_or_default();
                info!(count = wallets.len(), "starting weekly full re-evaluation");

                for batch in wallets.chunks(batch_size) {
                    for address in batch {
                        let now = Utc::now();
                        let prior = match quality_map.read().get(address).cloned() {
                            Some(p) => p,
                            None => match wallet_repo.get_quality(address).await {
                                Ok(Some(q)) => q,
                                _ => continue,
                            },
                        };

                        let equity_history = wallet_repo.equity_history(address).await.unwrap_or_default();

                        rate_limiter.wait_turn().await;
                        match evaluator.reevaluate(address, &prior, &equity_history, &thresholds, now).await {
                            Ok((updated, change)) => {
                                if let Err(e) = wallet_repo.upsert_quality(&updated).await {
                                    warn!(error = %e, address = %address, "failed to persist weekly re-evaluated quality");
                                }
                                if let Some(change) = &change {
                                    if let Err(e) = wallet_repo.record_tier_change(change).await {
                                        warn!(error = %e, address = %address, "failed to persist weekly tier change");
                                    }
                                }
                                quality_map.write().insert(address.clone(), updated);
                            }
                            Err(e) => {
                                warn!(error = %e, address = %address, "weekly re-evaluation unavailable this cycle");
                            }
                        }
                    }

                    let closed = signal_generator.tier_sync_sweep(Utc::now());
                    for signal in &closed {
                        if let Err(e) = signal_repo.upsert(signal).await {
                            warn!(error = %e, coin = %signal.coin, "failed to persist tier-sync-closed signal");
                        }
                    }
                }

                let cutoff_ms = (Utc::now() - ChronoDuration::days(RETENTION_DAYS)).timestamp_millis();
                match wallet_repo.prune_equity_history(cutoff_ms).await {
                    Ok(n) => info!(rows = n, "pruned equity history older than 90 days"),
                    Err(e) => warn!(error = %e, "failed to prune equity history"),
                }
                match fill_repo.prune(cutoff_ms).await {
                    Ok(n) => info!(rows = n, "pruned realtime fills older than 90 days"),
                    Err(e) => warn!(error = %e, "failed to prune realtime fills"),
                }
            }
        })
    }

    // -------------------------------------------------------------------
    // Daily equity snapshot — hourly check, fires once per UTC day (§4.9)
    // -------------------------------------------------------------------

    fn spawn_daily_equity_snapshot_job(&self) -> JoinHandle<()> {
        let quality_map = self.quality_map.clone();
        let wallet_repo = self.wallet_repo.clone();
        let mut shutdown = self.shutdown_rx();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            let mut last_snapshot_date = None;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        if Self::is_shutting_down(&shutdown) {
                            return;
                        }
                    }
                }
                if Self::is_shutting_down(&shutdown) {
                    return;
                }

                let now = Utc::now();
                let today = now.date_naive();
                if last_snapshot_date == Some(today) {
                    continue;
                }

                let snapshot: Vec<(Address, f64)> = quality_map
                    .read()
                    .iter()
                    .map(|(a, q)| (a.clone(), q.account_value))
                    .collect();

                for (address, account_value) in &snapshot {
                    if let Err(e) = wallet_repo
                        .record_equity_snapshot(address, today, *account_value, now.timestamp_millis())
                        .await
                    {
                        warn!(error = %e, address = %address, "failed to record daily equity snapshot");
                    }
                }

                info!(count = snapshot.len(), date = %today, "recorded daily equity snapshots");
                last_snapshot_date = Some(today);
            }
        })
    }

    // -------------------------------------------------------------------
    // Fill stream supervisor (F) — long-lived, reconnect-on-disconnect
    // -------------------------------------------------------------------

    fn spawn_fill_stream(&self) -> JoinHandle<()> {
        let stream = self.fill_stream.clone();
        let tracked_wallets = self.tracked_wallets.clone();
        let generator = self.signal_generator.clone();
        let refresh_interval = Duration::from_secs(self.config.fill_subscription_refresh_secs);
        let shutdown = self.shutdown_rx();

        tokio::spawn(async move {
            stream.run(tracked_wallets, generator, refresh_interval, shutdown).await;
        })
    }
}
