//! Per-identity submission limiter.
//!
//! Windows live in a Moka cache; an identity idle for a whole window is
//! evicted automatically, so the map never needs a manual sweep.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use moka::sync::Cache;
use serde::Deserialize;

/// Upper bound on identities tracked at once.
const MAX_TRACKED_IDENTITIES: u64 = 100_000;

/// Limiter settings as they appear in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Submissions admitted per identity within one window.
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_secs: 60,
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// The ceiling is reached; the current window ends after `retry_after`.
    Rejected { retry_after: Duration },
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    started: Instant,
}

/// Fixed-window admission counter keyed by caller identity.
///
/// Bursts straddling a window boundary can reach twice the ceiling; that is
/// the accepted cost of a fixed window.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Cache<Arc<str>, Arc<Mutex<RateWindow>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        let windows = Cache::builder()
            .max_capacity(MAX_TRACKED_IDENTITIES)
            .time_to_idle(window)
            .build();
        Self {
            max_requests,
            window,
            windows,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }

    pub fn admit(&self, identity: &str) -> Admission {
        self.admit_at(identity, Instant::now())
    }

    pub fn admit_at(&self, identity: &str, now: Instant) -> Admission {
        let entry = self.windows.get_with(Arc::from(identity), || {
            Arc::new(Mutex::new(RateWindow {
                count: 0,
                started: now,
            }))
        });
        let mut window = entry.lock().unwrap_or_else(|p| p.into_inner());

        if now.saturating_duration_since(window.started) > self.window {
            window.count = 0;
            window.started = now;
        }
        if window.count >= self.max_requests {
            let elapsed = now.saturating_duration_since(window.started);
            return Admission::Rejected {
                retry_after: self.window.saturating_sub(elapsed),
            };
        }
        window.count += 1;
        Admission::Admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admitted(limiter: &RateLimiter, identity: &str, at: Instant) -> bool {
        limiter.admit_at(identity, at) == Admission::Admitted
    }

    #[test]
    fn exactly_ceiling_admissions_per_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let t0 = Instant::now();

        let admitted: Vec<bool> = (0..5)
            .map(|i| admitted(&limiter, "10.0.0.1", t0 + Duration::from_secs(i)))
            .collect();
        assert_eq!(admitted, vec![true, true, true, false, false]);
    }

    #[test]
    fn admission_resumes_after_window_elapses() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(admitted(&limiter, "a", t0));
        assert!(admitted(&limiter, "a", t0));
        assert!(!admitted(&limiter, "a", t0 + Duration::from_secs(10)));

        assert!(admitted(&limiter, "a", t0 + Duration::from_secs(11)));
        assert!(admitted(&limiter, "a", t0 + Duration::from_secs(12)));
        assert!(!admitted(&limiter, "a", t0 + Duration::from_secs(13)));
    }

    #[test]
    fn identities_are_counted_separately() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(admitted(&limiter, "a", t0));
        assert!(!admitted(&limiter, "a", t0));
        assert!(admitted(&limiter, "b", t0));
    }

    #[test]
    fn rejection_reports_time_left_in_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(admitted(&limiter, "a", t0));

        assert_eq!(
            limiter.admit_at("a", t0 + Duration::from_secs(45)),
            Admission::Rejected {
                retry_after: Duration::from_secs(15)
            }
        );
    }

    #[test]
    fn idle_identities_are_evicted() {
        let limiter = RateLimiter::new(1, Duration::from_millis(50));
        assert_eq!(limiter.admit("a"), Admission::Admitted);
        assert!(limiter.windows.contains_key("a"));

        std::thread::sleep(Duration::from_millis(120));
        assert!(!limiter.windows.contains_key("a"));
        assert_eq!(limiter.admit("a"), Admission::Admitted);
    }

    #[test]
    fn config_defaults() {
        let config: RateLimitConfig = toml::from_str("max_requests = 3").unwrap();
        assert_eq!(config.max_requests, 3);
        assert_eq!(config.window_secs, 60);
    }
}
