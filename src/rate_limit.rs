//! Sliding send-count window against a [`ProviderProfile`].
//!
//! The limiter answers "can I send now?" and is told about every successful
//! send. A one-second window enforces `max_per_second`; a second, one-minute
//! window enforces `max_per_minute`. Each window resets once its length has
//! elapsed since it started.
//!
//! ```text
//! max_per_second = 3
//! t=0.0  can_send? yes  record   (1)
//! t=0.1  can_send? yes  record   (2)
//! t=0.2  can_send? yes  record   (3)
//! t=0.3  can_send? no
//! t=1.0  can_send? yes  (window reset, count 0)
//! ```

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::profile::ProviderProfile;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Window {
    second_start: Instant,
    second_count: u32,
    minute_start: Instant,
    minute_count: u32,
}

impl Window {
    fn new(now: Instant) -> Self {
        Self {
            second_start: now,
            second_count: 0,
            minute_start: now,
            minute_count: 0,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.second_start) >= SECOND {
            self.second_start = now;
            self.second_count = 0;
        }
        if now.duration_since(self.minute_start) >= MINUTE {
            self.minute_start = now;
            self.minute_count = 0;
        }
    }
}

/// Point-in-time view of the limiter, for metrics.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitSnapshot {
    pub enabled: bool,
    pub sent_this_second: u32,
    pub sent_this_minute: u32,
    pub max_per_second: u32,
    pub max_per_minute: u32,
    /// Milliseconds since the current one-second window started.
    pub window_age_ms: u64,
}

/// Process-wide rate limiter for one delivery session.
#[derive(Debug)]
pub struct RateLimiter {
    profile: ProviderProfile,
    window: Mutex<Window>,
}

impl RateLimiter {
    /// Create a limiter for a profile, starting a fresh window now.
    pub fn new(profile: ProviderProfile) -> Self {
        Self {
            profile,
            window: Mutex::new(Window::new(Instant::now())),
        }
    }

    /// The profile this limiter enforces.
    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    /// Whether one more send fits in the current windows.
    pub fn can_send(&self) -> bool {
        if !self.profile.rate_limit_enabled {
            return true;
        }
        let mut window = self.window.lock();
        window.roll(Instant::now());
        window.second_count < self.profile.max_per_second
            && window.minute_count < self.profile.max_per_minute
    }

    /// Count one successful send.
    pub fn record_send(&self) {
        if !self.profile.rate_limit_enabled {
            return;
        }
        let mut window = self.window.lock();
        window.roll(Instant::now());
        window.second_count = window.second_count.saturating_add(1);
        window.minute_count = window.minute_count.saturating_add(1);
    }

    /// Current counters.
    pub fn snapshot(&self) -> RateLimitSnapshot {
        let window = self.window.lock();
        RateLimitSnapshot {
            enabled: self.profile.rate_limit_enabled,
            sent_this_second: window.second_count,
            sent_this_minute: window.minute_count,
            max_per_second: self.profile.max_per_second,
            max_per_minute: self.profile.max_per_minute,
            window_age_ms: u64::try_from(
                Instant::now().duration_since(window.second_start).as_millis(),
            )
            .unwrap_or(u64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limited(per_second: u32) -> RateLimiter {
        RateLimiter::new(
            ProviderProfile::CONSERVATIVE
                .with_max_per_second(per_second)
                .with_max_per_minute(1000),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_allows_exactly_max_per_second() {
        let limiter = limited(5);
        for _ in 0..5 {
            assert!(limiter.can_send());
            limiter.record_send();
        }
        assert!(!limiter.can_send());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_one_second() {
        let limiter = limited(2);
        limiter.record_send();
        limiter.record_send();
        assert!(!limiter.can_send());

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!limiter.can_send());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(limiter.can_send());
        assert_eq!(limiter.snapshot().sent_this_second, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_minute_window_caps_sustained_rate() {
        let limiter = RateLimiter::new(
            ProviderProfile::CONSERVATIVE
                .with_max_per_second(10)
                .with_max_per_minute(15),
        );
        for _ in 0..10 {
            limiter.record_send();
        }
        tokio::time::advance(SECOND).await;
        for _ in 0..5 {
            assert!(limiter.can_send());
            limiter.record_send();
        }
        assert!(!limiter.can_send());

        tokio::time::advance(MINUTE).await;
        assert!(limiter.can_send());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reports_window_age() {
        let limiter = limited(5);
        limiter.record_send();
        tokio::time::advance(Duration::from_millis(250)).await;

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.window_age_ms, 250);
        assert_eq!(snapshot.sent_this_second, 1);
        assert_eq!(snapshot.sent_this_minute, 1);
    }

    #[tokio::test]
    async fn test_disabled_always_allows() {
        let limiter = RateLimiter::new(ProviderProfile::PERMISSIVE.with_max_per_second(1));
        for _ in 0..100 {
            assert!(limiter.can_send());
            limiter.record_send();
        }
        assert_eq!(limiter.snapshot().sent_this_second, 0);
        assert!(!limiter.snapshot().enabled);
    }
}
