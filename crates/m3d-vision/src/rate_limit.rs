//! Optional leaky-bucket limiter at the C4 boundary (§5: "implementations
//! concerned about aggregate throughput must add a leaky-bucket limiter at
//! the C4 boundary"). Off by default; the per-call staggering in
//! [`crate::fanout`] already satisfies the 500ms floor on its own. Mirrors
//! the token-bucket shape of the gateway's `IpLimiter`, but keyed by nothing
//! (one process-wide bucket) since this guards outbound calls, not inbound
//! clients.

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// A single process-wide token bucket guarding outbound vision-provider
/// calls. `acquire` waits (spinning on a short sleep) until a token is
/// available rather than rejecting, since there is no caller here to hand
/// a 429 back to.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    rps: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(rps: u32, burst: u32) -> Self {
        let now = Instant::now();
        Self {
            bucket: Mutex::new(Bucket {
                tokens: burst as f64,
                last: now,
            }),
            rps: rps as f64,
            burst: burst as f64,
        }
    }

    /// Blocks until a token is available, then consumes one.
    pub async fn acquire(&self) {
        loop {
            {
                let mut entry = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(entry.last).as_secs_f64();
                entry.tokens = (entry.tokens + elapsed * self.rps).min(self.burst);
                entry.last = now;
                if entry.tokens >= 1.0 {
                    entry.tokens -= 1.0;
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_is_spent_immediately_then_throttles() {
        let limiter = RateLimiter::new(2, 2);
        limiter.acquire().await;
        limiter.acquire().await;

        let waited = tokio::spawn(async move {
            limiter.acquire().await;
        });
        tokio::time::advance(Duration::from_millis(600)).await;
        tokio::time::timeout(Duration::from_millis(100), waited)
            .await
            .expect("acquire should complete once the clock advances")
            .unwrap();
    }
}
