//! Rate-limited work queue
//!
//! The uninstaller has exactly one unit of work, "run a pass", so the queue
//! holds a single sentinel key. Any number of triggers before the key is
//! picked up collapse into one pending pass, and a trigger that arrives
//! while a pass runs is delivered again once that pass is done.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::ControllerConfig;

/// Key of the single pending pass
pub const UNINSTALL_KEY: &str = "uninstall";

/// Decides how long a failed item waits before it is retried
pub trait RateLimiter: Send + Sync {
    /// Delay before the next retry; records the retry
    fn when(&self) -> Duration;

    /// Reset the failure history after a success
    fn forget(&self);

    /// Retries recorded since the last success
    fn num_requeues(&self) -> u32;
}

/// Doubles the delay on every consecutive failure, up to a cap
#[derive(Debug)]
pub struct ExponentialFailureRateLimiter {
    base: Duration,
    max: Duration,
    failures: AtomicU32,
}

impl ExponentialFailureRateLimiter {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: AtomicU32::new(0),
        }
    }
}

impl RateLimiter for ExponentialFailureRateLimiter {
    fn when(&self) -> Duration {
        let exp = self.failures.fetch_add(1, Ordering::AcqRel).min(62);
        let backoff = self.base.as_secs_f64() * 2f64.powi(exp as i32);
        Duration::from_secs_f64(backoff.min(self.max.as_secs_f64()))
    }

    fn forget(&self) {
        self.failures.store(0, Ordering::Release);
    }

    fn num_requeues(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }
}

/// Token bucket shared by every retry, bounding the overall retry rate
#[derive(Debug)]
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketRateLimiter {
    pub fn new(qps: f64, burst: u32) -> Self {
        Self {
            qps,
            burst: f64::from(burst),
            state: Mutex::new(BucketState {
                tokens: f64::from(burst),
                last_refill: Instant::now(),
            }),
        }
    }
}

impl RateLimiter for BucketRateLimiter {
    /// Reserve a token; a deficit is paid for by waiting
    fn when(&self) -> Duration {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.qps).min(self.burst);
        state.last_refill = now;

        state.tokens -= 1.0;
        if state.tokens >= 0.0 || self.qps <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.qps)
        }
    }

    fn forget(&self) {}

    fn num_requeues(&self) -> u32 {
        0
    }
}

/// Waits as long as the most restrictive of its limiters
pub struct MaxOfRateLimiter {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl MaxOfRateLimiter {
    pub fn new(limiters: Vec<Box<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

impl RateLimiter for MaxOfRateLimiter {
    fn when(&self) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when())
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self) {
        for limiter in &self.limiters {
            limiter.forget();
        }
    }

    fn num_requeues(&self) -> u32 {
        self.limiters
            .iter()
            .map(|l| l.num_requeues())
            .max()
            .unwrap_or(0)
    }
}

/// Per-failure exponential backoff bounded by a shared token bucket
pub fn default_rate_limiter(config: &ControllerConfig) -> MaxOfRateLimiter {
    MaxOfRateLimiter::new(vec![
        Box::new(ExponentialFailureRateLimiter::new(
            config.base_backoff,
            config.max_backoff,
        )),
        Box::new(BucketRateLimiter::new(config.bucket_qps, config.bucket_burst)),
    ])
}

#[derive(Debug, Default)]
struct QueueState {
    /// A pass is owed and nobody has picked it up yet
    queued: bool,
    /// A worker is running a pass
    processing: bool,
    /// A trigger arrived while processing
    dirty: bool,
    shutting_down: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
    limiter: Box<dyn RateLimiter>,
}

/// Coalescing, rate-limited queue of pending passes
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    pub fn new(limiter: impl RateLimiter + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                limiter: Box::new(limiter),
            }),
        }
    }

    /// Record that a pass is owed
    pub fn add(&self) {
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return;
        }
        if state.processing {
            state.dirty = true;
        } else if !state.queued {
            state.queued = true;
            self.inner.notify.notify_one();
        }
    }

    /// Record that a pass is owed once `delay` has passed
    pub fn add_after(&self, delay: Duration) {
        if delay.is_zero() {
            self.add();
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add();
        });
    }

    /// Retry after the delay chosen by the rate limiter
    pub fn add_rate_limited(&self) {
        let delay = self.inner.limiter.when();
        self.add_after(delay);
    }

    /// Clear the failure history after a successful pass
    pub fn forget(&self) {
        self.inner.limiter.forget();
    }

    /// Retries since the last successful pass
    pub fn num_requeues(&self) -> u32 {
        self.inner.limiter.num_requeues()
    }

    /// Wait for a pending pass; `None` once the queue is shut down
    pub async fn get(&self) -> Option<&'static str> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if state.shutting_down {
                    return None;
                }
                if state.queued {
                    state.queued = false;
                    state.processing = true;
                    return Some(UNINSTALL_KEY);
                }
            }

            notified.await;
        }
    }

    /// Mark the pass returned by [`WorkQueue::get`] as finished
    pub fn done(&self) {
        let mut state = self.inner.state.lock();
        state.processing = false;
        if state.dirty {
            state.dirty = false;
            state.queued = true;
            self.inner.notify.notify_one();
        }
    }

    /// Stop handing out work; blocked and future `get` calls return `None`
    pub fn shut_down(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// Whether a pass is waiting to be picked up
    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn queue() -> WorkQueue {
        WorkQueue::new(default_rate_limiter(&ControllerConfig::default()))
    }

    #[tokio::test]
    async fn test_triggers_coalesce_into_one_pass() {
        let q = queue();
        q.add();
        q.add();
        q.add();

        assert_eq!(q.get().await, Some(UNINSTALL_KEY));
        q.done();
        assert!(!q.is_pending());
        assert!(timeout(Duration::from_millis(50), q.get()).await.is_err());
    }

    #[tokio::test]
    async fn test_trigger_during_pass_is_redelivered() {
        let q = queue();
        q.add();
        assert!(q.get().await.is_some());

        q.add();
        assert!(!q.is_pending());
        q.done();

        assert!(q.is_pending());
        assert_eq!(q.get().await, Some(UNINSTALL_KEY));
    }

    #[tokio::test]
    async fn test_shut_down_releases_waiting_worker() {
        let q = queue();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;

        q.shut_down();
        assert_eq!(waiter.await.unwrap(), None);

        q.add();
        assert!(!q.is_pending());
        assert!(q.is_shutting_down());
    }

    #[tokio::test]
    async fn test_add_after_delivers_later() {
        let q = queue();
        q.add_after(Duration::from_millis(20));
        assert!(!q.is_pending());

        let key = timeout(Duration::from_secs(1), q.get()).await.unwrap();
        assert_eq!(key, Some(UNINSTALL_KEY));
    }

    #[test]
    fn test_exponential_backoff_doubles_up_to_cap() {
        let limiter =
            ExponentialFailureRateLimiter::new(Duration::from_millis(100), Duration::from_secs(2));
        let delays: Vec<u128> = (0..7).map(|_| limiter.when().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1600, 2000, 2000]);
        assert_eq!(limiter.num_requeues(), 7);

        limiter.forget();
        assert_eq!(limiter.num_requeues(), 0);
        assert_eq!(limiter.when(), Duration::from_millis(100));
    }

    #[test]
    fn test_bucket_charges_once_burst_is_spent() {
        let limiter = BucketRateLimiter::new(1.0, 2);
        assert_eq!(limiter.when(), Duration::ZERO);
        assert_eq!(limiter.when(), Duration::ZERO);

        let delay = limiter.when();
        assert!(delay > Duration::from_millis(900), "delay {:?}", delay);
        assert!(delay <= Duration::from_secs(1));
    }

    #[test]
    fn test_max_of_takes_most_restrictive() {
        let limiter = MaxOfRateLimiter::new(vec![
            Box::new(ExponentialFailureRateLimiter::new(
                Duration::from_millis(100),
                Duration::from_secs(2),
            )),
            Box::new(BucketRateLimiter::new(100.0, 1000)),
        ]);
        assert_eq!(limiter.when(), Duration::from_millis(100));
        assert_eq!(limiter.when(), Duration::from_millis(200));
        assert_eq!(limiter.num_requeues(), 2);
        limiter.forget();
        assert_eq!(limiter.num_requeues(), 0);
    }
}
