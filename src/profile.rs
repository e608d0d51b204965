//! Provider profiles: rate limits and pacing for the active transport.

use serde::Serialize;
use std::time::Duration;

/// Static rate-limit and pacing settings for one delivery session.
///
/// A profile is chosen once when the engine is built and never changes for
/// the life of that engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderProfile {
    /// Short label used in logs and metrics.
    pub name: &'static str,
    /// Maximum successful sends per one-second window.
    pub max_per_second: u32,
    /// Maximum successful sends per one-minute window.
    pub max_per_minute: u32,
    /// When false, the rate limiter always allows sending.
    pub rate_limit_enabled: bool,
    /// Pause between consecutive sends within a batch.
    pub per_email_delay: Duration,
    /// How often the queue processor ticks.
    pub process_interval: Duration,
}

impl ProviderProfile {
    /// Profile for real carriers.
    pub const CONSERVATIVE: Self = Self {
        name: "conservative",
        max_per_second: 80,
        max_per_minute: 4800,
        rate_limit_enabled: true,
        per_email_delay: Duration::from_millis(15),
        process_interval: Duration::from_secs(1),
    };

    /// Profile for capture/log transports that never reach a carrier.
    pub const PERMISSIVE: Self = Self {
        name: "permissive",
        max_per_second: u32::MAX,
        max_per_minute: u32::MAX,
        rate_limit_enabled: false,
        per_email_delay: Duration::ZERO,
        process_interval: Duration::from_millis(100),
    };

    /// Pick the profile for a transport's [`provider_name`](crate::Transport::provider_name).
    ///
    /// Non-delivering providers get [`PERMISSIVE`](Self::PERMISSIVE); anything
    /// else, including providers this crate does not know about, is treated as a
    /// real carrier.
    pub fn for_provider(provider: &str) -> Self {
        match provider {
            "local" | "logger" => Self::PERMISSIVE,
            _ => Self::CONSERVATIVE,
        }
    }

    /// Override the per-second limit.
    pub const fn with_max_per_second(mut self, max: u32) -> Self {
        self.max_per_second = max;
        self
    }

    /// Override the per-minute limit.
    pub const fn with_max_per_minute(mut self, max: u32) -> Self {
        self.max_per_minute = max;
        self
    }

    /// Enable or disable rate limiting.
    pub const fn with_rate_limit(mut self, enabled: bool) -> Self {
        self.rate_limit_enabled = enabled;
        self
    }

    /// Override the pause between sends.
    pub const fn with_per_email_delay(mut self, delay: Duration) -> Self {
        self.per_email_delay = delay;
        self
    }

    /// Override the processor tick interval.
    pub const fn with_process_interval(mut self, interval: Duration) -> Self {
        self.process_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_provider() {
        assert_eq!(ProviderProfile::for_provider("local"), ProviderProfile::PERMISSIVE);
        assert_eq!(ProviderProfile::for_provider("logger"), ProviderProfile::PERMISSIVE);
        assert_eq!(ProviderProfile::for_provider("smtp"), ProviderProfile::CONSERVATIVE);
        assert_eq!(
            ProviderProfile::for_provider("someday-provider"),
            ProviderProfile::CONSERVATIVE
        );
    }

    #[test]
    fn test_conservative_limits() {
        let p = ProviderProfile::CONSERVATIVE;
        assert!(p.rate_limit_enabled);
        assert_eq!(p.max_per_second, 80);
        assert_eq!(p.max_per_minute, 4800);
        assert!(p.per_email_delay > Duration::ZERO);
    }

    #[test]
    fn test_overrides() {
        let p = ProviderProfile::PERMISSIVE
            .with_rate_limit(true)
            .with_max_per_second(5)
            .with_per_email_delay(Duration::from_millis(2));
        assert!(p.rate_limit_enabled);
        assert_eq!(p.max_per_second, 5);
        assert_eq!(p.per_email_delay, Duration::from_millis(2));
    }
}
