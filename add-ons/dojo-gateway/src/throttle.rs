//! The velocity throttle: per-(identity, action) minimum-interval limiter.
//!
//! Process-local: entries live only for the process lifetime and a
//! background sweep keeps one-off callers from growing the map without
//! bound. Horizontal scale-out needs an external store behind the same
//! interface; see DESIGN.md.

use dashmap::DashMap;
use dojo_core::GatewayError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Entries idle longer than this are purged by the sweep.
const IDLE_TTL_MS: u64 = 10 * 60 * 1000;
/// How often the sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Default)]
pub struct VelocityThrottle {
    /// (identity, action) -> timestamp of the last accepted request (ms).
    entries: DashMap<(String, String), u64>,
}

impl VelocityThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts or rejects one request. Accepted requests overwrite the
    /// stored timestamp; rejected ones leave it untouched and report the
    /// remaining cooldown.
    pub fn check(
        &self,
        identity: &str,
        action: &str,
        cooldown_ms: u64,
    ) -> Result<(), GatewayError> {
        self.check_at(identity, action, cooldown_ms, now_ms())
    }

    fn check_at(
        &self,
        identity: &str,
        action: &str,
        cooldown_ms: u64,
        now: u64,
    ) -> Result<(), GatewayError> {
        let key = (identity.to_string(), action.to_string());
        // The entry API holds the shard lock across the compare-and-update,
        // so two concurrent requests for one key cannot both pass.
        match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let elapsed = now.saturating_sub(*occupied.get());
                if elapsed < cooldown_ms {
                    return Err(GatewayError::VelocityExceeded {
                        action: action.to_string(),
                        retry_after_ms: cooldown_ms - elapsed,
                    });
                }
                occupied.insert(now);
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(now);
            }
        }
        Ok(())
    }

    /// Evicts entries whose last accepted request is older than the idle
    /// TTL. Returns the purge count.
    pub fn sweep(&self) -> usize {
        self.sweep_at(now_ms())
    }

    fn sweep_at(&self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, last| now.saturating_sub(*last) <= IDLE_TTL_MS);
        before - self.entries.len()
    }

    /// Background garbage collector, in the same shape as the other
    /// long-interval maintenance loops.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let throttle = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; skip it so boot stays quiet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = throttle.sweep();
                if purged > 0 {
                    tracing::info!(
                        target: "dojo::throttle",
                        purged,
                        "Memory sweep purged inactive rate-limit entries"
                    );
                }
            }
        })
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_is_allowed() {
        let throttle = VelocityThrottle::new();
        assert!(throttle.check_at("user-1", "chat", 3000, 10_000).is_ok());
    }

    #[test]
    fn test_rapid_repeat_is_rejected_with_remaining_cooldown() {
        let throttle = VelocityThrottle::new();
        throttle.check_at("user-1", "chat", 3000, 10_000).unwrap();

        // 2 seconds later with a 3 second cooldown: reject, ~1000ms left.
        let err = throttle
            .check_at("user-1", "chat", 3000, 12_000)
            .unwrap_err();
        match err {
            GatewayError::VelocityExceeded {
                action,
                retry_after_ms,
            } => {
                assert_eq!(action, "chat");
                assert_eq!(retry_after_ms, 1000);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // 3.1 seconds after the first accepted request: allowed again.
        assert!(throttle.check_at("user-1", "chat", 3000, 13_100).is_ok());
    }

    #[test]
    fn test_rejection_does_not_extend_the_window() {
        let throttle = VelocityThrottle::new();
        throttle.check_at("user-1", "chat", 3000, 10_000).unwrap();
        // Rejected retries must not push the unlock time forward.
        let _ = throttle.check_at("user-1", "chat", 3000, 11_000);
        let _ = throttle.check_at("user-1", "chat", 3000, 12_000);
        assert!(throttle.check_at("user-1", "chat", 3000, 13_000).is_ok());
    }

    #[test]
    fn test_keys_are_scoped_per_identity_and_action() {
        let throttle = VelocityThrottle::new();
        throttle.check_at("user-1", "chat", 3000, 10_000).unwrap();
        assert!(throttle.check_at("user-2", "chat", 3000, 10_001).is_ok());
        assert!(throttle
            .check_at("user-1", "create_workspace", 3000, 10_001)
            .is_ok());
    }

    #[test]
    fn test_sweep_evicts_only_idle_entries() {
        let throttle = VelocityThrottle::new();
        throttle.check_at("idle", "chat", 0, 1_000).unwrap();
        throttle
            .check_at("active", "chat", 0, 1_000 + IDLE_TTL_MS)
            .unwrap();

        let purged = throttle.sweep_at(1_000 + IDLE_TTL_MS + 1);
        assert_eq!(purged, 1);
        // The survivor's timestamp is intact: an immediate retry within a
        // cooldown still fails.
        let err = throttle.check_at("active", "chat", 5000, 1_000 + IDLE_TTL_MS + 2);
        assert!(err.is_err());
    }
}
