//! Limits on a single synchronization pass.
//!
//! Checked before each object starts, and the pass timeout also bounds the
//! listing. Objects already in flight finish their write; the rest of the
//! queue is abandoned and reported as an abort.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Limits for one pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassLimits {
    /// Maximum number of objects started per pass, parents imported ahead
    /// of their children included (default: unlimited)
    #[serde(default)]
    pub max_objects: Option<u64>,

    /// Total pass timeout in seconds (default: 3600 = 1 hour)
    #[serde(default = "default_pass_timeout")]
    pub pass_timeout_seconds: u64,
}

fn default_pass_timeout() -> u64 {
    3600
} // 1 hour

impl Default for PassLimits {
    fn default() -> Self {
        Self {
            max_objects: None,
            pass_timeout_seconds: default_pass_timeout(),
        }
    }
}

impl PassLimits {
    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_seconds)
    }

    /// Time left before the pass timeout
    pub fn remaining(&self, tracker: &PassTracker) -> Duration {
        self.pass_timeout().saturating_sub(tracker.elapsed())
    }

    /// Check current tracker state against limits
    pub fn check(&self, tracker: &PassTracker) -> Result<(), LimitViolation> {
        if let Some(limit) = self.max_objects {
            let started = tracker.objects_started();
            if started >= limit {
                return Err(LimitViolation::MaxObjects {
                    actual: started,
                    limit,
                });
            }
        }

        let elapsed = tracker.elapsed();
        if elapsed >= self.pass_timeout() {
            return Err(LimitViolation::PassTimeout {
                elapsed_seconds: elapsed.as_secs(),
                limit_seconds: self.pass_timeout_seconds,
            });
        }

        Ok(())
    }
}

/// Tracks resource usage during a pass. Shared by concurrent imports.
#[derive(Debug)]
pub struct PassTracker {
    objects_started: AtomicU64,
    started_at: Instant,
}

impl Default for PassTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PassTracker {
    pub fn new() -> Self {
        Self {
            objects_started: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record that an object started processing
    pub fn record_object(&self) {
        self.objects_started.fetch_add(1, Ordering::SeqCst);
    }

    pub fn objects_started(&self) -> u64 {
        self.objects_started.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Pass limit violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitViolation {
    #[error("Maximum objects per pass reached: {actual} >= {limit}")]
    MaxObjects { actual: u64, limit: u64 },

    #[error("Pass timeout: {elapsed_seconds}s >= {limit_seconds}s")]
    PassTimeout {
        elapsed_seconds: u64,
        limit_seconds: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = PassLimits::default();
        assert_eq!(limits.max_objects, None);
        assert_eq!(limits.pass_timeout_seconds, 3600);
    }

    #[test]
    fn test_object_counting() {
        let limits = PassLimits {
            max_objects: Some(2),
            ..Default::default()
        };

        let tracker = PassTracker::new();
        assert!(limits.check(&tracker).is_ok());

        tracker.record_object();
        assert!(limits.check(&tracker).is_ok());

        tracker.record_object();
        let result = limits.check(&tracker);
        assert!(matches!(result, Err(LimitViolation::MaxObjects { .. })));
    }

    #[test]
    fn test_zero_timeout_trips_immediately() {
        let limits = PassLimits {
            pass_timeout_seconds: 0,
            ..Default::default()
        };

        let tracker = PassTracker::new();
        let result = limits.check(&tracker);
        assert!(matches!(result, Err(LimitViolation::PassTimeout { .. })));
        assert_eq!(limits.remaining(&tracker), Duration::ZERO);
    }
}
