//! Fixed-window admission control keyed by caller.
//!
//! The bucket map lock is held only to find or insert a bucket; counting runs
//! under the bucket's own mutex so unrelated callers never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_BUCKET_RETENTION: Duration = Duration::from_secs(60 * 60);

/// `limit` admissions per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    pub const fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub const fn per_hour(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(3600))
    }
}

/// Named limits applied at different entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitTier {
    /// Every authenticated request, per caller.
    General,
    /// Session establishment, per origin address.
    Login,
    /// Broadcast-style operations (reminder fan-out), per caller.
    Bulk,
}

impl RateLimitTier {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Login => "login",
            Self::Bulk => "bulk",
        }
    }

    pub const fn default_policy(self) -> RateLimitPolicy {
        match self {
            Self::General => RateLimitPolicy::per_minute(100),
            Self::Login => RateLimitPolicy::per_minute(10),
            Self::Bulk => RateLimitPolicy::per_hour(3),
        }
    }

    /// Bucket key namespaced by tier so tiers never share counts.
    pub fn bucket_key(self, caller: &str) -> String {
        format!("{}:{caller}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window resets.
    pub reset_after: Duration,
}

impl RateLimitDecision {
    /// Whole seconds to wait before retrying, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 { secs + 1 } else { secs.max(1) }
    }
}

#[derive(Debug)]
struct Bucket {
    count: u32,
    reset_at: Instant,
    last_touched: Instant,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&self, key: &str, policy: RateLimitPolicy) -> bool {
        self.check(key, policy).allowed
    }

    pub fn check(&self, key: &str, policy: RateLimitPolicy) -> RateLimitDecision {
        let now = Instant::now();
        let bucket = self.bucket(key, now, policy.window);
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);

        if now >= bucket.reset_at {
            bucket.count = 0;
            bucket.reset_at = now + policy.window;
        }
        bucket.last_touched = now;

        let allowed = bucket.count < policy.limit;
        if allowed {
            bucket.count += 1;
        }

        RateLimitDecision {
            allowed,
            limit: policy.limit,
            remaining: policy.limit.saturating_sub(bucket.count),
            reset_after: bucket.reset_at.saturating_duration_since(now),
        }
    }

    /// Drop buckets untouched for longer than `retention`. Returns how many went.
    pub fn sweep(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            let bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
            now.saturating_duration_since(bucket.last_touched) <= retention
        });
        before - buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the handle is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, retention: Duration) -> SweeperHandle {
        let limiter = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.sweep(retention);
                if removed > 0 {
                    tracing::debug!(removed, remaining = limiter.len(), "rate limit buckets swept");
                }
            }
        });
        SweeperHandle { task }
    }

    fn bucket(&self, key: &str, now: Instant, window: Duration) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self
            .buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(bucket);
        }

        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(buckets.entry(key.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Bucket {
                count: 0,
                reset_at: now + window,
                last_touched: now,
            }))
        }))
    }
}

/// Owns the background sweep task; aborts it on drop.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
