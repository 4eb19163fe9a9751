//! Fixed-window request limiting per `(identifier, endpoint)`.
//!
//! Windows are not rolling: a client can squeeze up to twice the limit
//! through by straddling a window boundary. That leniency is accepted.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::Serialize;

use crate::{
    clock::ClockHandle,
    error::{Error, Result},
    store::{within, StoreError, StoreHandle, StoreResult},
};

/// Attempts before giving up on a contended window.
const MAX_ATTEMPTS: usize = 3;

/// The verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the current window ends.
    pub reset_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: StoreHandle,
    clock: ClockHandle,
    max_requests: u32,
    window: Duration,
    deadline: StdDuration,
}

impl RateLimiter {
    pub fn new(
        store: StoreHandle,
        clock: ClockHandle,
        max_requests: u32,
        window: Duration,
        deadline: StdDuration,
    ) -> Self {
        Self {
            store,
            clock,
            max_requests: max_requests.max(1),
            window,
            deadline,
        }
    }

    /// Count a request and decide whether it may proceed.
    pub async fn check(&self, identifier: &str, endpoint: &str) -> StoreResult<RateLimitStatus> {
        for _ in 0..MAX_ATTEMPTS {
            let now = self.clock.now();
            let active_since = now - self.window;

            // Common case: a live window with room left.
            let counted = within(
                self.deadline,
                self.store
                    .increment_window(identifier, endpoint, active_since, self.max_requests),
            )
            .await?;
            if let Some(window) = counted {
                return Ok(RateLimitStatus {
                    allowed: true,
                    remaining: self.max_requests.saturating_sub(window.request_count),
                    reset_at: window.window_start + self.window,
                });
            }

            // Either the live window is exhausted, or there is no live window.
            let existing =
                within(self.deadline, self.store.find_window(identifier, endpoint)).await?;
            if let Some(window) = existing {
                if window.window_start > active_since {
                    if window.request_count >= self.max_requests {
                        return Ok(RateLimitStatus {
                            allowed: false,
                            remaining: 0,
                            reset_at: window.window_start + self.window,
                        });
                    }
                    // Someone opened it between our two reads; count again.
                    continue;
                }
            }

            match within(
                self.deadline,
                self.store
                    .start_window(identifier, endpoint, now, active_since),
            )
            .await
            {
                Ok(window) => {
                    return Ok(RateLimitStatus {
                        allowed: true,
                        remaining: self.max_requests - 1,
                        reset_at: window.window_start + self.window,
                    })
                }
                // Lost the race to open the window; count against the winner's.
                Err(StoreError::Duplicate) => continue,
                Err(err) => return Err(err),
            }
        }

        // Persistent contention on one key only happens under a burst, so
        // treat it as one.
        warn!("Rate limit window for {identifier} on {endpoint} too contended, denying");
        Ok(RateLimitStatus {
            allowed: false,
            remaining: 0,
            reset_at: self.clock.now() + self.window,
        })
    }

    /// Like [`Self::check`], but a denial becomes [`Error::RateLimited`].
    pub async fn enforce(&self, identifier: &str, endpoint: &str) -> Result<RateLimitStatus> {
        let status = self.check(identifier, endpoint).await?;
        if status.allowed {
            Ok(status)
        } else {
            warn!("Rate limit exceeded by {identifier} on {endpoint}");
            Err(Error::RateLimited(status))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::MemoryStore;

    fn limiter(max: u32) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::default();
        let limiter = RateLimiter::new(
            Arc::new(MemoryStore::new()),
            Arc::new(clock.clone()),
            max,
            Duration::seconds(60),
            StdDuration::from_secs(1),
        );
        (limiter, clock)
    }

    #[rocket::async_test]
    async fn admits_exactly_max_per_window() {
        let (limiter, clock) = limiter(3);
        let start = clock.now();

        for expected_remaining in [2, 1, 0] {
            let status = limiter.check("10.0.0.1", "submit-votes").await.unwrap();
            assert!(status.allowed);
            assert_eq!(status.remaining, expected_remaining);
            assert_eq!(status.reset_at, start + Duration::seconds(60));
        }

        let denied = limiter.check("10.0.0.1", "submit-votes").await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at, start + Duration::seconds(60));

        // Still denied just before the window closes.
        clock.advance(Duration::seconds(59));
        assert!(!limiter.check("10.0.0.1", "submit-votes").await.unwrap().allowed);

        // A fresh window opens once it has elapsed.
        clock.advance(Duration::seconds(1));
        let status = limiter.check("10.0.0.1", "submit-votes").await.unwrap();
        assert!(status.allowed);
        assert_eq!(status.remaining, 2);
        assert_eq!(status.reset_at, clock.now() + Duration::seconds(60));
    }

    #[rocket::async_test]
    async fn keys_are_independent() {
        let (limiter, _) = limiter(1);
        assert!(limiter.check("a", "verify-vote").await.unwrap().allowed);
        assert!(!limiter.check("a", "verify-vote").await.unwrap().allowed);
        assert!(limiter.check("b", "verify-vote").await.unwrap().allowed);
        assert!(limiter.check("a", "secure-vote").await.unwrap().allowed);
    }

    #[rocket::async_test]
    async fn enforce_reports_reset_metadata() {
        let (limiter, clock) = limiter(1);
        limiter.enforce("a", "check-eligibility").await.unwrap();
        match limiter.enforce("a", "check-eligibility").await {
            Err(Error::RateLimited(status)) => {
                assert_eq!(status.remaining, 0);
                assert_eq!(status.reset_at, clock.now() + Duration::seconds(60));
            }
            other => panic!("expected rate limiting, got {other:?}"),
        }
    }

    #[rocket::async_test]
    async fn concurrent_burst_never_exceeds_max() {
        let (limiter, _) = limiter(5);
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let limiter = limiter.clone();
                rocket::tokio::spawn(async move { limiter.check("burst", "submit-votes").await })
            })
            .collect();
        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().allowed {
                allowed += 1;
            }
        }
        assert!(allowed <= 5, "admitted {allowed}");
        assert!(allowed >= 1);
    }
}
