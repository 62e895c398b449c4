// =============================================================================
// Error taxonomy (§7)
// =============================================================================
//
// Transient upstream failures never propagate as hard errors — they're
// encoded in `PollOutcome` so every call site is forced to handle "the
// exchange was unavailable this cycle" without reaching for `?` and
// accidentally aborting a whole poll cycle over one bad address.
// =============================================================================

use thiserror::Error;

/// Tagged failure returned by the exchange client for a single logical
/// request. Distinguishes "retry later, keep prior state" from genuine
/// caller-facing errors (malformed config, programmer error).
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("rate limited after retries")]
    RateLimited,
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Result of a single per-address (or per-coin) exchange call. Callers that
/// poll many addresses per cycle match on this instead of `Result` so an
/// `Unavailable` entry reads as "skip this address, keep prior state"
/// rather than "abort the cycle" (§7 transient-upstream policy).
#[derive(Debug)]
pub enum PollOutcome<T> {
    Ok(T),
    Unavailable { reason: String },
}

impl<T> PollOutcome<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(v) => Some(v),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn from_result(result: Result<T, ExchangeError>) -> Self {
        match result {
            Ok(v) => Self::Ok(v),
            Err(e) => Self::Unavailable { reason: e.to_string() },
        }
    }
}

/// Persistence-layer failure. A single-row failure is always recoverable by
/// the caller (log + skip, per §7); `StoreError` exists so callers can tell
/// "this row doesn't exist" apart from "the database connection is broken".
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row not found")]
    RowNotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
