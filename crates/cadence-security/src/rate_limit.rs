use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    /// The request may proceed.
    Allowed,
    /// The bucket is empty; a token is available again after `retry_after`.
    Limited {
        /// Time until the next token.
        retry_after: Duration,
    },
}

impl RateDecision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, capacity: f64, per_sec: f64) {
        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_sec).min(capacity);
        self.refilled_at = now;
    }
}

/// Token buckets keyed by caller identity.
///
/// Callers choose the key; the gateway uses an accepted API key or the peer
/// address, never an unverified client-supplied value. Buckets of idle
/// callers are dropped by [`RateLimiter::prune_idle`], which
/// [`RateLimiter::spawn_pruner`] runs on an interval.
pub struct RateLimiter {
    capacity: f64,
    per_sec: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// `capacity` is the burst size and `per_sec` the sustained rate.
    pub fn new(capacity: f64, per_sec: f64) -> Self {
        Self {
            capacity: capacity.max(1.0),
            per_sec: per_sec.max(0.0),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token from `client`'s bucket.
    pub fn check(&self, client: &str) -> RateDecision {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(client.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            refilled_at: now,
        });
        bucket.refill(now, self.capacity, self.per_sec);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return RateDecision::Allowed;
        }
        let missing = 1.0 - bucket.tokens;
        let retry_after = if self.per_sec > 0.0 {
            Duration::try_from_secs_f64(missing / self.per_sec).unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        };
        RateDecision::Limited { retry_after }
    }

    /// Drop buckets untouched for at least `max_idle`; returns how many.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, b| now.saturating_duration_since(b.refilled_at) < max_idle);
        before - buckets.len()
    }

    /// Callers with a live bucket.
    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Prune idle buckets every `every` until the task is aborted.
    pub fn spawn_pruner(self: &Arc<Self>, every: Duration, max_idle: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.prune_idle(max_idle);
                if removed > 0 {
                    debug!(
                        removed,
                        tracked = limiter.tracked_clients(),
                        "Pruned idle rate-limit buckets"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_limited() {
        let limiter = RateLimiter::new(3.0, 0.1);
        for _ in 0..3 {
            assert!(limiter.check("ops").is_allowed());
        }
        let RateDecision::Limited { retry_after } = limiter.check("ops") else {
            panic!("fourth request should be limited");
        };
        // One token at 0.1/s is ten seconds away at most.
        assert!(retry_after <= Duration::from_secs(10));
        assert!(retry_after > Duration::from_secs(9));
    }

    #[test]
    fn test_zero_rate_never_refills() {
        let limiter = RateLimiter::new(1.0, 0.0);
        assert!(limiter.check("ops").is_allowed());
        assert_eq!(
            limiter.check("ops"),
            RateDecision::Limited {
                retry_after: Duration::MAX
            }
        );
    }

    #[test]
    fn test_keys_have_separate_buckets() {
        let limiter = RateLimiter::new(1.0, 0.01);
        assert!(limiter.check("key:a").is_allowed());
        assert!(!limiter.check("key:a").is_allowed());
        assert!(limiter.check("key:b").is_allowed());
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_prune_keeps_recent_buckets() {
        let limiter = RateLimiter::new(1.0, 1.0);
        limiter.check("a");
        assert_eq!(limiter.prune_idle(Duration::from_secs(60)), 0);
        assert_eq!(limiter.prune_idle(Duration::ZERO), 1);
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[tokio::test]
    async fn test_pruner_empties_idle_buckets() {
        let limiter = Arc::new(RateLimiter::new(1.0, 1.0));
        for n in 0..50 {
            limiter.check(&format!("ip:10.0.0.{n}"));
        }
        let task = limiter.spawn_pruner(Duration::from_millis(10), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(80)).await;
        task.abort();
        assert_eq!(limiter.tracked_clients(), 0);
    }
}
