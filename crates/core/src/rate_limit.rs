//! Per-submitter usage limiting.
//!
//! A fixed window opens on a submitter's first use; up to `max_uses`
//! submissions are allowed until the window expires, after which the
//! next submission opens a new window. Expired windows are swept at most
//! once per window length, so the table only holds submitters seen within
//! roughly the last two windows. The caller owns the tracker
//! (e.g. behind a `Mutex`) and passes the current time in, which keeps
//! the logic deterministic under test.

use std::collections::HashMap;
use std::time::Duration;

use crate::types::Timestamp;

/// Default submissions allowed per window.
pub const DEFAULT_MAX_USES: u32 = 10;

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
struct Usage {
    window_start: Timestamp,
    count: u32,
}

/// Tracks usage counts per submitter.
#[derive(Debug)]
pub struct RateLimiter {
    max_uses: u32,
    window: chrono::Duration,
    usage: HashMap<String, Usage>,
    last_prune: Option<Timestamp>,
}

impl RateLimiter {
    pub fn new(max_uses: u32, window: Duration) -> Self {
        Self {
            max_uses,
            window: chrono::Duration::from_std(window)
                .unwrap_or_else(|_| chrono::Duration::days(36_500)),
            usage: HashMap::new(),
            last_prune: None,
        }
    }

    /// Record a use by `submitter` at `now`.
    ///
    /// Returns `false` (and records nothing) when the submitter has used
    /// up the current window.
    pub fn check(&mut self, submitter: &str, now: Timestamp) -> bool {
        match self.last_prune {
            Some(last) if now - last < self.window => {}
            _ => self.prune(now),
        }

        match self.usage.get_mut(submitter) {
            Some(usage) if now - usage.window_start <= self.window => {
                if usage.count >= self.max_uses {
                    return false;
                }
                usage.count += 1;
                true
            }
            _ => {
                self.usage.insert(
                    submitter.to_string(),
                    Usage {
                        window_start: now,
                        count: 1,
                    },
                );
                true
            }
        }
    }

    /// Time until `submitter` may submit again; zero when not limited.
    pub fn remaining_cooldown(&self, submitter: &str, now: Timestamp) -> Duration {
        let Some(usage) = self.usage.get(submitter) else {
            return Duration::ZERO;
        };
        if usage.count < self.max_uses {
            return Duration::ZERO;
        }
        let elapsed = now - usage.window_start;
        (self.window - elapsed).to_std().unwrap_or(Duration::ZERO)
    }

    /// Forget windows that expired before `now`.
    pub fn prune(&mut self, now: Timestamp) {
        let window = self.window;
        self.usage.retain(|_, u| now - u.window_start <= window);
        self.last_prune = Some(now);
    }

    /// Number of submitters currently tracked.
    pub fn tracked(&self) -> usize {
        self.usage.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_USES, DEFAULT_WINDOW)
    }
}
