//! Sliding-window request + cost limiter (§4.D).
//!
//! Process-wide in principle, but modeled as an explicitly constructed,
//! explicitly owned object rather than a module-level singleton — the
//! router owns one; tests construct their own.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use memsearch_core::{Error, RateLimitKind};

#[derive(Debug, Clone, Copy)]
struct Entry {
    at: Instant,
    cost: f64,
}

/// Append-only, age-garbage-collected log of `(timestamp, cost)` entries
/// behind a single mutex. Contention is bounded by the number of concurrent
/// LLM-tier requests (the only caller on the hot path).
pub struct SlidingWindowLimiter {
    max_requests: u64,
    max_cost: f64,
    window: Duration,
    entries: Mutex<Vec<Entry>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: u64, max_cost: f64, window: Duration) -> Self {
        Self {
            max_requests,
            max_cost,
            window,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &memsearch_config::RateLimiterConfig) -> Self {
        Self::new(
            config.max_requests,
            config.max_cost,
            Duration::from_secs(config.window_seconds),
        )
    }

    /// Check whether `cost` fits within both the request-count and cost
    /// budgets of the current window, and if so, record it.
    ///
    /// Request-count is checked before cost, matching the original source's
    /// behavior when both limits would be breached simultaneously.
    pub fn check_and_record(&self, cost: f64) -> Result<(), Error> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        gc(&mut entries, now, self.window);

        if entries.len() as u64 + 1 > self.max_requests {
            let oldest = entries.first().map(|e| e.at).unwrap_or(now);
            let retry_after = retry_after_secs(oldest, now, self.window);
            tracing::warn!(max_requests = self.max_requests, retry_after, "rate limit denied: request count exceeded");
            return Err(Error::RateLimited {
                kind: RateLimitKind::Requests,
                retry_after_secs: retry_after,
            });
        }

        if cost > self.max_cost {
            tracing::warn!(cost, max_cost = self.max_cost, "rate limit denied: single cost exceeds budget");
            return Err(Error::RateLimited {
                kind: RateLimitKind::Budget,
                retry_after_secs: 0.0,
            });
        }

        let current_cost: f64 = entries.iter().map(|e| e.cost).sum();
        if current_cost + cost > self.max_cost {
            // Find the smallest prefix of entries (oldest-first) whose
            // expiry would free enough budget for this request.
            let mut freed = 0.0;
            let mut last_expiring = entries.first().map(|e| e.at).unwrap_or(now);
            for entry in entries.iter() {
                freed += entry.cost;
                last_expiring = entry.at;
                if current_cost + cost - freed <= self.max_cost {
                    break;
                }
            }
            let retry_after = retry_after_secs(last_expiring, now, self.window);
            tracing::warn!(cost, current_cost, retry_after, "rate limit denied: cumulative cost exceeds budget");
            return Err(Error::RateLimited {
                kind: RateLimitKind::Budget,
                retry_after_secs: retry_after,
            });
        }

        entries.push(Entry { at: now, cost });
        Ok(())
    }

    pub fn usage(&self) -> (u64, f64) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        gc(&mut entries, now, self.window);
        let cost: f64 = entries.iter().map(|e| e.cost).sum();
        (entries.len() as u64, cost)
    }

    pub fn reset(&self) {
        self.entries.lock().clear();
    }
}

fn gc(entries: &mut Vec<Entry>, now: Instant, window: Duration) {
    entries.retain(|e| now.duration_since(e.at) < window);
}

fn retry_after_secs(expiring_at: Instant, now: Instant, window: Duration) -> f64 {
    let elapsed = now.duration_since(expiring_at);
    window.saturating_sub(elapsed).as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_allowed() {
        let limiter = SlidingWindowLimiter::new(10, 100.0, Duration::from_secs(3600));
        assert!(limiter.check_and_record(5.0).is_ok());
        assert_eq!(limiter.usage(), (1, 5.0));
    }

    #[test]
    fn zero_max_requests_denies_first_call() {
        let limiter = SlidingWindowLimiter::new(0, 100.0, Duration::from_secs(3600));
        let err = limiter.check_and_record(0.0).unwrap_err();
        assert!(matches!(
            err,
            Error::RateLimited {
                kind: RateLimitKind::Requests,
                ..
            }
        ));
    }

    #[test]
    fn request_count_exceeded() {
        let limiter = SlidingWindowLimiter::new(3, 1000.0, Duration::from_secs(3600));
        for _ in 0..3 {
            limiter.check_and_record(1.0).unwrap();
        }
        let err = limiter.check_and_record(1.0).unwrap_err();
        assert!(matches!(
            err,
            Error::RateLimited {
                kind: RateLimitKind::Requests,
                ..
            }
        ));
    }

    #[test]
    fn single_cost_over_budget_is_unrecoverable() {
        let limiter = SlidingWindowLimiter::new(100, 10.0, Duration::from_secs(3600));
        let err = limiter.check_and_record(100.0).unwrap_err();
        match err {
            Error::RateLimited {
                kind: RateLimitKind::Budget,
                retry_after_secs,
            } => assert_eq!(retry_after_secs, 0.0),
            other => panic!("expected budget rate limit, got {other:?}"),
        }
    }

    #[test]
    fn budget_exceeded_by_cumulative_cost() {
        let limiter = SlidingWindowLimiter::new(100, 10.0, Duration::from_secs(3600));
        limiter.check_and_record(5.0).unwrap();
        let err = limiter.check_and_record(10.0).unwrap_err();
        assert!(matches!(
            err,
            Error::RateLimited {
                kind: RateLimitKind::Budget,
                ..
            }
        ));
    }

    #[test]
    fn request_count_checked_before_budget() {
        // Both limits would be breached; requests must win per spec.
        let limiter = SlidingWindowLimiter::new(2, 100.0, Duration::from_secs(3600));
        limiter.check_and_record(1.0).unwrap();
        limiter.check_and_record(1.0).unwrap();
        let err = limiter.check_and_record(1.0).unwrap_err();
        assert!(matches!(
            err,
            Error::RateLimited {
                kind: RateLimitKind::Requests,
                ..
            }
        ));
    }

    #[test]
    fn reset_clears_state() {
        let limiter = SlidingWindowLimiter::new(10, 100.0, Duration::from_secs(3600));
        limiter.check_and_record(5.0).unwrap();
        limiter.reset();
        assert_eq!(limiter.usage(), (0, 0.0));
    }

    #[test]
    fn retry_after_is_monotone_non_negative() {
        let limiter = SlidingWindowLimiter::new(1, 1000.0, Duration::from_secs(3600));
        limiter.check_and_record(1.0).unwrap();
        let err = limiter.check_and_record(1.0).unwrap_err();
        if let Error::RateLimited { retry_after_secs, .. } = err {
            assert!(retry_after_secs >= 0.0);
            assert!(retry_after_secs <= 3600.0);
        } else {
            panic!("expected rate limited error");
        }
    }
}
