// =============================================================================
// Fill stream (F) — §4.8
// =============================================================================
//
// One long-lived WebSocket reader task per process, subscribed to
// `userFills` for every tracked wallet. All subscription state lives here
// (the single owner avoids races between resubscribe and incoming messages,
// §9) — a supervisor loop reconnects on disconnect and a ticker refreshes
// subscription membership every 5 min.
// =============================================================================

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::exchange::models::{RawFill, WsRequest, WsSubscription};
use crate::exchange::ws;
use crate::quality::TraderQuality;
use crate::signals::SignalGenerator;
use crate::types::{Address, Tier};

/// Idle WS connections get dropped by the exchange after a stretch of
/// silence; a ping every 30 s (§4.1, §5 "WS ping 30 s") keeps the socket
/// alive through quiet periods with no fills at all.
const WS_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Fixed WS reconnect delay (§4.1 "auto-reconnect after a fixed delay
/// (default 5 s)") — unlike the HTTP client's exponential 429 back-off,
/// reconnects here never grow the delay.
const WS_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeFill {
    pub address: Address,
    pub coin: String,
    pub px: f64,
    pub sz: f64,
    pub closed_pnl: f64,
    pub tier_at_fill: Tier,
    pub hash: String,
    pub oid: u64,
    pub time: i64,
}

/// Bounded FIFO set of `(hash, oid)` keys, evicting the oldest once it
/// exceeds capacity (§4.8 step 1, §8 P5/R2).
struct DedupRing {
    capacity: usize,
    seen: HashSet<(String, u64)>,
    order: VecDeque<(String, u64)>,
}

impl DedupRing {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns `true` if this is the first time `key` has been seen.
    fn insert_if_new(&mut self, key: (String, u64)) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }
}

pub struct FillStream {
    ws_url: String,
    quality: Arc<RwLock<std::collections::HashMap<Address, TraderQuality>>>,
    dedup: Mutex<DedupRing>,
    subscribed: RwLock<HashSet<Address>>,
    fill_repo: Arc<crate::store::FillRepo>,
}

impl FillStream {
    pub fn new(
        ws_url: impl Into<String>,
        quality: Arc<RwLock<std::collections::HashMap<Address, TraderQuality>>>,
        dedup_capacity: usize,
        fill_repo: Arc<crate::store::FillRepo>,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            quality,
            dedup: Mutex::new(DedupRing::new(dedup_capacity)),
            subscribed: RwLock::new(HashSet::new()),
            fill_repo,
        }
    }

    /// Reconnect-supervising run loop. `tracked` is consulted on connect and
    /// on every subscription-refresh tick to diff the subscribed set
    /// against the current tracked population.
    pub async fn run(
        self: Arc<Self>,
        tracked: Arc<RwLock<HashSet<Address>>>,
        generator: Arc<SignalGenerator>,
        refresh_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            match self.connect_and_serve(&tracked, &generator, refresh_interval, &mut shutdown).await {
                Ok(()) => return, // graceful shutdown
                Err(e) => {
                    warn!(error = %e, delay_secs = WS_RECONNECT_DELAY.as_secs(), "fill stream disconnected, reconnecting");
                    self.subscribed.write().clear();
                    // Drop the dedup cache too (§4.1): a replayed fill after
                    // reconnect must be re-dedup'd against the fill_repo's
                    // upsert-by-tx_hash instead of a stale in-memory ring
                    // that could otherwise carry false state across the gap.
                    self.dedup.lock().clear();
                    tokio::select! {
                        _ = tokio::time::sleep(WS_RECONNECT_DELAY) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn connect_and_serve(
        &self,
        tracked: &Arc<RwLock<HashSet<Address>>>,
        generator: &Arc<SignalGenerator>,
        refresh_interval: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), crate::errors::ExchangeError> {
        let mut stream = ws::connect(&self.ws_url).await?;
        let wanted: HashSet<Address> = tracked.read().clone();
        for addr in &wanted {
            ws::send(&mut stream, &subscribe_request(addr)).await?;
        }
        *self.subscribed.write() = wanted;
        info!(subscribed = self.subscribed.read().len(), "fill stream connected");

        let mut ticker = tokio::time::interval(refresh_interval);
        ticker.tick().await; // consume the immediate first tick
        let mut ping_ticker = tokio::time::interval(WS_PING_INTERVAL);
        ping_ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh_subscriptions(&mut stream, tracked).await?;
                }
                _ = ping_ticker.tick() => {
                    ws::send(&mut stream, &WsRequest::Ping {}).await?;
                }
                envelope = ws::next_envelope(&mut stream) => {
                    match envelope? {
                        Some(env) if env.channel == "userFills" => {
                            self.handle_envelope(env, generator).await;
                        }
                        _ => {}
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn refresh_subscriptions(
        &self,
        stream: &mut ws::WsStream,
        tracked: &Arc<RwLock<HashSet<Address>>>,
    ) -> Result<(), crate::errors::ExchangeError> {
        let wanted: HashSet<Address> = tracked.read().clone();
        let current = self.subscribed.read().clone();

        for addr in wanted.difference(&current) {
            ws::send(stream, &subscribe_request(addr)).await?;
        }
        for addr in current.difference(&wanted) {
            ws::send(stream, &unsubscribe_request(addr)).await?;
        }

        if wanted != current {
            debug!(added = wanted.difference(&current).count(), removed = current.difference(&wanted).count(), "fill stream subscriptions refreshed");
        }
        *self.subscribed.write() = wanted;
        Ok(())
    }

    async fn handle_envelope(&self, envelope: crate::exchange::models::WsEnvelope, generator: &Arc<SignalGenerator>) {
        let data: crate::exchange::models::WsUserFillsData = match serde_json::from_value(envelope.data) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "malformed userFills payload, skipping frame");
                return;
            }
        };

        let address = Address::new(data.user);
        for fill in data.fills {
            if let Some(realtime) = self.process_fill(&address, &fill) {
                if let Err(e) = self.fill_repo.insert(&realtime).await {
                    warn!(error = %e, hash = %realtime.hash, "failed to persist realtime fill");
                }
                if let Some(direction_closed) = fill.closed_direction() {
                    generator.handle_exit_hint(&address, &fill.coin, direction_closed, Utc::now());
                }
                debug!(address = %realtime.address, coin = %realtime.coin, hash = %realtime.hash, "realtime fill recorded");
            }
        }
    }

    fn process_fill(&self, address: &Address, fill: &RawFill) -> Option<RealtimeFill> {
        let key = (fill.hash.clone(), fill.oid);
        if !self.dedup.lock().insert_if_new(key) {
            return None;
        }

        let tier = self
            .quality
            .read()
            .get(address)
            .map(|q| q.tier)
            .unwrap_or(Tier::Inactive);

        Some(RealtimeFill {
            address: address.clone(),
            coin: fill.coin.clone(),
            px: fill.px,
            sz: fill.sz,
            closed_pnl: fill.closed_pnl,
            tier_at_fill: tier,
            hash: fill.hash.clone(),
            oid: fill.oid,
            time: fill.time,
        })
    }
}

fn subscribe_request(address: &Address) -> WsRequest {
    WsRequest::Subscribe {
        subscription: WsSubscription::UserFills { user: address.to_string() },
    }
}

fn unsubscribe_request(address: &Address) -> WsRequest {
    WsRequest::Unsubscribe {
        subscription: WsSubscription::UserFills { user: address.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(hash: &str, oid: u64) -> RawFill {
        RawFill {
            coin: "BTC".into(),
            px: 100.0,
            sz: 1.0,
            side: "A".into(),
            time: 0,
            closed_pnl: 50.0,
            dir: "Close Long".into(),
            hash: hash.into(),
            fee: 0.0,
            oid,
            crossed: false,
            liquidation: None,
        }
    }

    fn stream() -> FillStream {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect_lazy("sqlite::memory:")
            .expect("lazy pool");
        FillStream::new(
            "wss://example.invalid/ws",
            Arc::new(RwLock::new(std::collections::HashMap::new())),
            4,
            Arc::new(crate::store::FillRepo::new(pool)),
        )
    }

    #[test]
    fn dedup_rejects_repeated_hash_oid() {
        let fs = stream();
        let addr = Address::new("0xabc");
        let f = fill("0xhash1", 1);
        assert!(fs.process_fill(&addr, &f).is_some());
        assert!(fs.process_fill(&addr, &f).is_none());
    }

    #[test]
    fn dedup_ring_evicts_oldest_beyond_capacity() {
        let mut ring = DedupRing::new(2);
        assert!(ring.insert_if_new(("a".into(), 1)));
        assert!(ring.insert_if_new(("b".into(), 2)));
        assert!(ring.insert_if_new(("c".into(), 3)));
        // "a" was evicted, so it's accepted as new again.
        assert!(ring.insert_if_new(("a".into(), 1)));
    }

    #[test]
    fn untracked_wallet_gets_inactive_tier() {
        let fs = stream();
        let addr = Address::new("0xabc");
        let realtime = fs.process_fill(&addr, &fill("0xhash2", 2)).unwrap();
        assert_eq!(realtime.tier_at_fill, Tier::Inactive);
    }
}
