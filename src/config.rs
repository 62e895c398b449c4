// =============================================================================
// Runtime Configuration — environment + JSON-file driven engine settings
// =============================================================================
//
// Every tunable named in the process-boundary contract lives here. Values
// are read from the environment at startup (`RuntimeConfig::from_env`) with
// an optional tier-threshold JSON file layered on top; everything carries a
// sane default so a bare `.env`-less checkout still starts.
//
// Persistence of the *derived* tier-threshold overrides uses an atomic
// tmp + rename write so a crash mid-save can never corrupt the file on disk.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

fn default_info_url() -> String {
    "https://api.hyperliquid.xyz/info".to_string()
}

fn default_ws_url() -> String {
    "wss://api.hyperliquid.xyz/ws".to_string()
}

fn default_database_url() -> String {
    "sqlite://trader_signals.db".to_string()
}

fn default_position_poll_secs() -> u64 {
    60
}

fn default_signal_track_secs() -> u64 {
    30
}

fn default_volatility_refresh_secs() -> u64 {
    4 * 3600
}

fn default_funding_refresh_secs() -> u64 {
    30 * 60
}

fn default_min_position_value_usd() -> f64 {
    500.0
}

fn default_requests_per_second() -> f64 {
    1.5
}

fn default_batch_size() -> usize {
    10
}

fn default_low_conviction_pct() -> f64 {
    5.0
}

fn default_high_conviction_pct() -> f64 {
    30.0
}

fn default_medium_conviction_pct() -> f64 {
    15.0
}

fn default_freshness_window_hours() -> i64 {
    4
}

fn default_directional_agreement_min() -> f64 {
    0.65
}

fn default_atr_multiple() -> f64 {
    1.5
}

fn default_max_signal_hours() -> i64 {
    168
}

fn default_funding_threshold() -> f64 {
    0.0001
}

fn default_fill_dedup_capacity() -> usize {
    1_000
}

fn default_fill_subscription_refresh_secs() -> u64 {
    5 * 60
}

fn default_position_change_channel_capacity() -> usize {
    1024
}

/// Engine-wide runtime configuration, loaded once at startup.
///
/// All fields carry `#[serde(default = "...")]` so that adding a new knob
/// never breaks loading an older threshold-override file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_info_url")]
    pub exchange_info_url: String,
    #[serde(default = "default_ws_url")]
    pub exchange_ws_url: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_position_poll_secs")]
    pub position_poll_interval_secs: u64,
    #[serde(default = "default_signal_track_secs")]
    pub signal_track_interval_secs: u64,
    #[serde(default = "default_volatility_refresh_secs")]
    pub volatility_refresh_interval_secs: u64,
    #[serde(default = "default_funding_refresh_secs")]
    pub funding_refresh_interval_secs: u64,

    #[serde(default = "default_min_position_value_usd")]
    pub min_position_value_usd: f64,

    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_low_conviction_pct")]
    pub low_conviction_pct: f64,
    #[serde(default = "default_medium_conviction_pct")]
    pub medium_conviction_pct: f64,
    #[serde(default = "default_high_conviction_pct")]
    pub high_conviction_pct: f64,

    #[serde(default = "default_freshness_window_hours")]
    pub freshness_window_hours: i64,
    #[serde(default = "default_directional_agreement_min")]
    pub directional_agreement_min: f64,
    #[serde(default = "default_atr_multiple")]
    pub atr_multiple: f64,
    #[serde(default = "default_max_signal_hours")]
    pub max_signal_hours: i64,

    #[serde(default = "default_funding_threshold")]
    pub funding_neutral_threshold: f64,

    #[serde(default = "default_fill_dedup_capacity")]
    pub fill_dedup_capacity: usize,
    #[serde(default = "default_fill_subscription_refresh_secs")]
    pub fill_subscription_refresh_secs: u64,

    #[serde(default = "default_position_change_channel_capacity")]
    pub position_change_channel_capacity: usize,

    #[serde(default)]
    pub tier_thresholds: crate::quality::thresholds::TierThresholdSet,

    /// Seed pool of addresses to evaluate for tracking (§3 "Wallet ...
    /// created by first discovery"). The spec treats wallet discovery as an
    /// external concern; this is the minimal environment-driven on-ramp a
    /// headless deployment needs to ever acquire a wallet to watch.
    #[serde(default)]
    pub candidate_addresses: Vec<crate::types::Address>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            exchange_info_url: default_info_url(),
            exchange_ws_url: default_ws_url(),
            database_url: default_database_url(),
            position_poll_interval_secs: default_position_poll_secs(),
            signal_track_interval_secs: default_signal_track_secs(),
            volatility_refresh_interval_secs: default_volatility_refresh_secs(),
            funding_refresh_interval_secs: default_funding_refresh_secs(),
            min_position_value_usd: default_min_position_value_usd(),
            requests_per_second: default_requests_per_second(),
            batch_size: default_batch_size(),
            low_conviction_pct: default_low_conviction_pct(),
            medium_conviction_pct: default_medium_conviction_pct(),
            high_conviction_pct: default_high_conviction_pct(),
            freshness_window_hours: default_freshness_window_hours(),
            directional_agreement_min: default_directional_agreement_min(),
            atr_multiple: default_atr_multiple(),
            max_signal_hours: default_max_signal_hours(),
            funding_neutral_threshold: default_funding_threshold(),
            fill_dedup_capacity: default_fill_dedup_capacity(),
            fill_subscription_refresh_secs: default_fill_subscription_refresh_secs(),
            position_change_channel_capacity: default_position_change_channel_capacity(),
            tier_thresholds: crate::quality::thresholds::TierThresholdSet::default(),
            candidate_addresses: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset. Call after `dotenv::dotenv()`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("EXCHANGE_INFO_URL") {
            config.exchange_info_url = v;
        }
        if let Ok(v) = std::env::var("EXCHANGE_WS_URL") {
            config.exchange_ws_url = v;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            config.database_url = v;
        }
        if let Some(v) = env_parse::<u64>("POSITION_POLL_INTERVAL_SECS") {
            config.position_poll_interval_secs = v;
        }
        if let Some(v) = env_parse::<u64>("SIGNAL_TRACK_INTERVAL_SECS") {
            config.signal_track_interval_secs = v;
        }
        if let Some(v) = env_parse::<u64>("VOLATILITY_REFRESH_INTERVAL_SECS") {
            config.volatility_refresh_interval_secs = v;
        }
        if let Some(v) = env_parse::<u64>("FUNDING_REFRESH_INTERVAL_SECS") {
            config.funding_refresh_interval_secs = v;
        }
        if let Some(v) = env_parse::<f64>("MIN_POSITION_VALUE_USD") {
            config.min_position_value_usd = v;
        }
        if let Some(v) = env_parse::<f64>("REQUESTS_PER_SECOND") {
            config.requests_per_second = v;
        }
        if let Some(v) = env_parse::<usize>("BATCH_SIZE") {
            config.batch_size = v;
        }
        if let Some(v) = env_parse::<f64>("LOW_CONVICTION_PCT") {
            config.low_conviction_pct = v;
        }
        if let Some(v) = env_parse::<f64>("MEDIUM_CONVICTION_PCT") {
            config.medium_conviction_pct = v;
        }
        if let Some(v) = env_parse::<f64>("HIGH_CONVICTION_PCT") {
            config.high_conviction_pct = v;
        }
        if let Some(v) = env_parse::<i64>("FRESHNESS_WINDOW_HOURS") {
            config.freshness_window_hours = v;
        }
        if let Some(v) = env_parse::<f64>("DIRECTIONAL_AGREEMENT_MIN") {
            config.directional_agreement_min = v;
        }
        if let Some(v) = env_parse::<f64>("ATR_MULTIPLE") {
            config.atr_multiple = v;
        }
        if let Some(v) = env_parse::<i64>("MAX_SIGNAL_HOURS") {
            config.max_signal_hours = v;
        }
        if let Some(v) = env_parse::<f64>("FUNDING_NEUTRAL_THRESHOLD") {
            config.funding_neutral_threshold = v;
        }
        if let Some(v) = env_parse::<usize>("FILL_DEDUP_CAPACITY") {
            config.fill_dedup_capacity = v;
        }
        if let Some(v) = env_parse::<u64>("FILL_SUBSCRIPTION_REFRESH_SECS") {
            config.fill_subscription_refresh_secs = v;
        }
        if let Some(v) = env_parse::<usize>("POSITION_CHANGE_CHANNEL_CAPACITY") {
            config.position_change_channel_capacity = v;
        }
        if let Ok(v) = std::env::var("CANDIDATE_ADDRESSES") {
            config.candidate_addresses = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| crate::types::Address::new(s.to_lowercase()))
                .collect();
        }

        if let Ok(path) = std::env::var("TIER_THRESHOLDS_PATH") {
            match crate::quality::thresholds::TierThresholdSet::load(&path) {
                Ok(thresholds) => config.tier_thresholds = thresholds,
                Err(e) => warn!(error = %e, path, "failed to load tier thresholds, using defaults"),
            }
        }

        info!(
            exchange_info_url = %config.exchange_info_url,
            database_url = %config.database_url,
            position_poll_interval_secs = config.position_poll_interval_secs,
            "runtime configuration loaded"
        );

        config
    }

    /// Persist the current config's tier-threshold overrides to `path` using
    /// an atomic tmp + rename write (crash mid-write can never corrupt the
    /// file already on disk).
    pub fn save_tier_thresholds(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp_path = path.with_extension("tmp");
        let json = serde_json::to_string_pretty(&self.tier_thresholds)
            .context("failed to serialize tier thresholds")?;
        std::fs::write(&tmp_path, json)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename {} -> {}", tmp_path.display(), path.display()))?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
