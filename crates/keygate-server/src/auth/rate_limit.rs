//! Sliding-window rate limiter for interactive verification attempts.
//!
//! Each interactive attempt may cost a request against the third-party
//! verifier's quota, so attempts are capped per remote IP.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// A rate limiter with a per-key limit over a rolling window.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum attempts allowed within the window.
    max_attempts: u32,
    /// Duration of the sliding window.
    window: Duration,
    /// Per-key tracking: key → list of attempt timestamps.
    entries: HashMap<String, Vec<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// * `max_attempts` - Maximum allowed attempts within the window.
    /// * `window` - Window duration.
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            entries: HashMap::new(),
        }
    }

    /// Check if an attempt is allowed for the given key, and record it if so.
    ///
    /// Returns `true` if allowed, `false` if rate-limited.
    pub fn check_and_record(&mut self, key: &str) -> bool {
        self.check_and_record_at(key, Instant::now())
    }

    fn check_and_record_at(&mut self, key: &str, now: Instant) -> bool {
        let window = self.window;
        let attempts = self.entries.entry(key.to_string()).or_default();

        attempts.retain(|t| now.saturating_duration_since(*t) < window);

        if attempts.len() as u32 >= self.max_attempts {
            return false;
        }

        attempts.push(now);
        true
    }

    /// Garbage-collect expired entries to prevent memory growth.
    pub fn gc(&mut self) {
        self.gc_at(Instant::now());
    }

    fn gc_at(&mut self, now: Instant) {
        let window = self.window;
        self.entries.retain(|_, attempts| {
            attempts.retain(|t| now.saturating_duration_since(*t) < window);
            !attempts.is_empty()
        });
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }
}

/// Pre-configured rate limiters for the server.
#[derive(Debug)]
pub struct ServerRateLimits {
    /// Interactive verification attempts per remote IP.
    pub interactive: RateLimiter,
}

impl ServerRateLimits {
    /// `interactive_per_minute` attempts per IP per minute.
    pub fn new(interactive_per_minute: u32) -> Self {
        Self {
            interactive: RateLimiter::new(interactive_per_minute, Duration::from_secs(60)),
        }
    }

    /// Check if an interactive attempt from the given IP is allowed.
    pub fn check_interactive(&mut self, ip: &IpAddr) -> bool {
        self.interactive.check_and_record(&ip.to_string())
    }

    /// Run garbage collection on all limiters.
    pub fn gc(&mut self) {
        self.interactive.gc();
    }
}
