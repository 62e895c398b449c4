// =============================================================================
// Rate limiter — self-paced request spacing (§5)
// =============================================================================
//
// The exchange doesn't echo back a used-weight response header the way
// Binance does, so instead of tracking consumed weight we self-pace: every
// call to `wait_turn` blocks until at least `delay_between_requests` has
// elapsed since the previous call returned. A single `Mutex<Instant>` is
// enough because the position tracker fans HTTP calls out serially per
// address within a cycle (§5); any caller that wants to respect the shared
// budget just awaits `wait_turn` before issuing its request.
// =============================================================================

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub struct RateLimiter {
    delay_between_requests: Duration,
    last_request_at: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Build a limiter from a target requests-per-second figure (§5 default
    /// `requestsPerSecond ≈ 1.5`, i.e. `delayBetweenRequests ≈ 750 ms`).
    pub fn from_requests_per_second(requests_per_second: f64) -> Self {
        let delay_ms = if requests_per_second > 0.0 {
            (1000.0 / requests_per_second).round() as u64
        } else {
            750
        };
        Self {
            delay_between_requests: Duration::from_millis(delay_ms),
            last_request_at: Mutex::new(None),
        }
    }

    /// Block until it is this caller's turn to issue a request.
    pub async fn wait_turn(&self) {
        let mut last = self.last_request_at.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.delay_between_requests {
                let remaining = self.delay_between_requests - elapsed;
                debug!(remaining_ms = remaining.as_millis() as u64, "rate limiter pacing request");
                tokio::time::sleep(remaining).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_from_rps() {
        let limiter = RateLimiter::from_requests_per_second(1.5);
        assert_eq!(limiter.delay_between_requests, Duration::from_millis(667));
    }

    #[test]
    fn zero_rps_falls_back_to_default() {
        let limiter = RateLimiter::from_requests_per_second(0.0);
        assert_eq!(limiter.delay_between_requests, Duration::from_millis(750));
    }
}
