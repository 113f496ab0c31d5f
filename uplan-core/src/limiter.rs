//! Per-client sliding window admission control.

use std::time::Duration;

use chrono::Utc;

use crate::{Result, cache::SharedBackend};

/// Window length and the number of charged requests allowed within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    /// Window length W.
    pub window: Duration,
    /// Charged requests allowed per window, N.
    pub max_requests: u64,
}

impl RatePolicy {
    /// Idle records are dropped after two windows.
    pub fn record_ttl(&self) -> Duration {
        self.window * 2
    }

    fn window_millis(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Outcome of an admission check or a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request may go ahead.
    Allowed,
    /// The client's window is full.
    Denied,
}

/// Sliding window limiter. [`admit`](Self::admit) only looks at the window;
/// [`reserve`](Self::reserve) takes a slot, so a caller can skip billing work
/// that never reaches the network.
#[derive(Clone)]
pub struct RateLimiter {
    backend: SharedBackend,
    policy: RatePolicy,
}

impl RateLimiter {
    /// Windows live in `backend`.
    pub fn new(backend: SharedBackend, policy: RatePolicy) -> Self {
        Self { backend, policy }
    }

    fn record_key(client: &str) -> String {
        format!("ratelimit:{client}")
    }

    fn floor(&self, now_millis: i64) -> i64 {
        now_millis.saturating_sub(self.policy.window_millis())
    }

    fn denied(&self, client: &str) -> Admission {
        tracing::warn!(
            "Rate limit reached for {}: {} requests in {:?}",
            client,
            self.policy.max_requests,
            self.policy.window
        );
        Admission::Denied
    }

    /// [`admit_at`](Self::admit_at) with the current time.
    pub async fn admit(&self, client: &str) -> Result<Admission> {
        self.admit_at(client, Utc::now().timestamp_millis()).await
    }

    /// Prunes entries older than `now - window` and admits while fewer than
    /// `max_requests` remain. Does not take a slot.
    pub async fn admit_at(&self, client: &str, now_millis: i64) -> Result<Admission> {
        let count = self
            .backend
            .window_prune_count(&Self::record_key(client), self.floor(now_millis))
            .await?;

        if count >= self.policy.max_requests {
            Ok(self.denied(client))
        } else {
            Ok(Admission::Allowed)
        }
    }

    /// [`reserve_at`](Self::reserve_at) with the current time.
    pub async fn reserve(&self, client: &str) -> Result<Admission> {
        self.reserve_at(client, Utc::now().timestamp_millis()).await
    }

    /// Takes one slot at `now_millis` if the window still has room. Concurrent
    /// reservations for one client never exceed `max_requests` per window.
    pub async fn reserve_at(&self, client: &str, now_millis: i64) -> Result<Admission> {
        let reserved = self
            .backend
            .window_reserve(
                &Self::record_key(client),
                self.floor(now_millis),
                self.policy.max_requests,
                now_millis,
                self.policy.record_ttl(),
            )
            .await?;

        if reserved {
            Ok(Admission::Allowed)
        } else {
            Ok(self.denied(client))
        }
    }
}
