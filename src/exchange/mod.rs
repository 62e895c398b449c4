// =============================================================================
// Exchange client module (A) — §4.1
// =============================================================================

pub mod client;
pub mod models;
pub mod rate_limit;
pub mod ws;

pub use client::ExchangeClient;
pub use rate_limit::RateLimiter;
