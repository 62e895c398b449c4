// =============================================================================
// Exchange client — typed request/reply over the info endpoint (§4.1)
// =============================================================================
//
// A single HTTPS endpoint multiplexed by a `type` tag (§6). Every public
// method here builds the matching `InfoRequest` variant, posts it, and
// parses the JSON response into a typed struct — callers never see a raw
// `serde_json::Value`.
//
// Reliability: HTTP 429 gets exponential back-off up to 3 retries
// (`2^attempt · 1s`); any other failure — timeout, transport error,
// malformed body — comes back as `ExchangeError` so the caller can apply
// the "unavailable, skip this address, keep prior state" policy from §7.
// =============================================================================

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

use crate::errors::ExchangeError;
use crate::exchange::models::*;
use crate::types::Direction;

const MAX_RETRIES: u32 = 3;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ExchangeClient {
    base_url: String,
    http: reqwest::Client,
}

impl ExchangeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");
        Self {
            base_url: base_url.into(),
            http,
        }
    }

    // -------------------------------------------------------------------
    // Transport with 429 back-off
    // -------------------------------------------------------------------

    #[instrument(skip(self, request), name = "exchange::post")]
    async fn post<R>(&self, request: &InfoRequest) -> Result<R, ExchangeError>
    where
        R: serde::de::DeserializeOwned,
    {
        let mut attempt = 0;
        loop {
            let resp = self
                .http
                .post(&self.base_url)
                .json(request)
                .send()
                .await;

            let resp = match resp {
                Ok(r) => r,
                Err(e) if e.is_timeout() => return Err(ExchangeError::Timeout),
                Err(e) => return Err(ExchangeError::Transport(e.to_string())),
            };

            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= MAX_RETRIES {
                    return Err(ExchangeError::RateLimited);
                }
                let delay = Duration::from_secs(2u64.pow(attempt));
                warn!(attempt, delay_secs = delay.as_secs(), "429 from exchange, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if !resp.status().is_success() {
                return Err(ExchangeError::Transport(format!(
                    "unexpected status {}",
                    resp.status()
                )));
            }

            return resp
                .json::<R>()
                .await
                .map_err(|e| ExchangeError::MalformedResponse(e.to_string()));
        }
    }

    // -------------------------------------------------------------------
    // Public operations (§6)
    // -------------------------------------------------------------------

    pub async fn clearinghouse_state(
        &self,
        address: &str,
    ) -> Result<ClearinghouseStateResponse, ExchangeError> {
        self.post(&InfoRequest::ClearinghouseState {
            user: address.to_string(),
        })
        .await
    }

    /// Fetches the last ~2000 fills for `address`. The exchange ignores
    /// `start_time` server-side (§4.1) — always filter the result locally.
    pub async fn user_fills(&self, address: &str) -> Result<Vec<RawFill>, ExchangeError> {
        self.post(&InfoRequest::UserFills {
            user: address.to_string(),
            start_time: None,
        })
        .await
    }

    pub async fn open_orders(&self, address: &str) -> Result<Vec<RawOpenOrder>, ExchangeError> {
        self.post(&InfoRequest::OpenOrders {
            user: address.to_string(),
        })
        .await
    }

    pub async fn user_funding(
        &self,
        address: &str,
        start_time: Option<i64>,
    ) -> Result<serde_json::Value, ExchangeError> {
        self.post(&InfoRequest::UserFunding {
            user: address.to_string(),
            start_time,
        })
        .await
    }

    pub async fn user_non_funding_ledger_updates(
        &self,
        address: &str,
        start_time: Option<i64>,
    ) -> Result<serde_json::Value, ExchangeError> {
        self.post(&InfoRequest::UserNonFundingLedgerUpdates {
            user: address.to_string(),
            start_time,
        })
        .await
    }

    pub async fn all_mids(&self) -> Result<AllMidsResponse, ExchangeError> {
        self.post(&InfoRequest::AllMids {}).await
    }

    pub async fn meta(&self) -> Result<Meta, ExchangeError> {
        self.post(&InfoRequest::Meta {}).await
    }

    pub async fn meta_and_asset_ctxs(&self) -> Result<(Meta, Vec<AssetCtx>), ExchangeError> {
        self.post(&InfoRequest::MetaAndAssetCtxs {}).await
    }

    pub async fn funding_history(
        &self,
        coin: &str,
        start_time: i64,
    ) -> Result<serde_json::Value, ExchangeError> {
        self.post(&InfoRequest::FundingHistory {
            coin: coin.to_string(),
            start_time,
        })
        .await
    }

    pub async fn candle_snapshot(
        &self,
        coin: &str,
        interval: &str,
        start_time: i64,
        end_time: Option<i64>,
    ) -> Result<Vec<RawCandle>, ExchangeError> {
        self.post(&InfoRequest::CandleSnapshot {
            req: CandleSnapshotReq {
                coin: coin.to_string(),
                interval: interval.to_string(),
                start_time,
                end_time,
            },
        })
        .await
    }

    pub async fn l2_book(&self, coin: &str) -> Result<serde_json::Value, ExchangeError> {
        self.post(&InfoRequest::L2Book {
            coin: coin.to_string(),
        })
        .await
    }

    // -------------------------------------------------------------------
    // Derived helper (§4.1)
    // -------------------------------------------------------------------

    /// Walks `address`'s filtered fill history in chronological order,
    /// maintaining a running signed position size for `coin`, and returns
    /// the timestamp at which the *currently open* position in `direction`
    /// began. Used to back-fill `opened_at` for newly discovered wallets
    /// and for positions seen for the first time on a wallet already known
    /// to the tracker (§4.5).
    pub async fn find_position_open_time(
        &self,
        address: &str,
        coin: &str,
        direction: Direction,
        lookback_days: i64,
    ) -> Result<Option<i64>, ExchangeError> {
        let mut fills = self.user_fills(address).await?;
        let cutoff = chrono::Utc::now().timestamp_millis() - lookback_days * 24 * 3_600_000;
        fills.retain(|f| f.coin == coin && f.time >= cutoff);

        let open_started_at = derive_open_start(&fills, direction);
        debug!(address, coin, ?direction, ?open_started_at, "derived position open time from fills");
        Ok(open_started_at)
    }
}

/// Walks `fills` (already filtered to one coin and a lookback window) in
/// chronological order, maintaining a running signed position size, and
/// returns the timestamp at which the currently-open position in
/// `direction` began. Factored out of `find_position_open_time` so the walk
/// itself is testable without a live exchange (§4.5 / §8 scenario 6).
fn derive_open_start(fills: &[RawFill], direction: Direction) -> Option<i64> {
    let mut sorted: Vec<&RawFill> = fills.iter().collect();
    sorted.sort_by_key(|f| f.time);

    let mut running_size = 0.0_f64;
    let mut open_started_at: Option<i64> = None;

    for fill in &sorted {
        let signed_delta = match fill.side.as_str() {
            "B" => fill.sz,
            "A" => -fill.sz,
            _ => 0.0,
        };

        let was_flat = running_size == 0.0;
        running_size += signed_delta;

        let now_matches_direction = match direction {
            Direction::Long => running_size > 0.0,
            Direction::Short => running_size < 0.0,
        };

        if was_flat && now_matches_direction {
            open_started_at = Some(fill.time);
        } else if !now_matches_direction && running_size != 0.0 {
            // Flipped through flat into the opposite side; the position
            // we're tracking restarted here.
            open_started_at = Some(fill.time);
        } else if running_size == 0.0 {
            open_started_at = None;
        }
    }

    open_started_at
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(time: i64, side: &str, sz: f64) -> RawFill {
        RawFill {
            coin: "SOL".to_string(),
            px: 100.0,
            sz,
            side: side.to_string(),
            time,
            closed_pnl: 0.0,
            dir: "Open Long".to_string(),
            hash: format!("h{time}"),
            fee: 0.0,
            oid: time as u64,
            crossed: false,
            liquidation: None,
        }
    }

    /// §8 scenario 6: a wallet opened a SOL long 3 days ago and has not
    /// traded since -> the open-time walk should recover that fill's
    /// timestamp as the position's start, not "now".
    #[test]
    fn open_start_recovered_from_single_opening_fill() {
        const DAY_MS: i64 = 24 * 3_600_000;
        let opened_at = 1_000 - 3 * DAY_MS;
        let fills = vec![fill(opened_at, "B", 1.0)];
        assert_eq!(derive_open_start(&fills, Direction::Long), Some(opened_at));
    }

    #[test]
    fn open_start_none_when_flat() {
        let fills = vec![fill(0, "B", 1.0), fill(1, "A", 1.0)];
        assert_eq!(derive_open_start(&fills, Direction::Long), None);
    }

    #[test]
    fn open_start_restarts_after_flip() {
        let fills = vec![
            fill(0, "B", 1.0),   // open long
            fill(1, "A", 2.0),   // flip to short
        ];
        assert_eq!(derive_open_start(&fills, Direction::Short), Some(1));
    }

    #[test]
    fn open_start_tracks_most_recent_open_after_close_and_reopen() {
        let fills = vec![
            fill(0, "B", 1.0), // open
            fill(1, "A", 1.0), // close, flat
            fill(2, "B", 1.0), // reopen
        ];
        assert_eq!(derive_open_start(&fills, Direction::Long), Some(2));
    }
}
