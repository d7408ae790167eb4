//! The quota ledger: rolling 24-hour message allowance per identity.
//!
//! `check_and_reserve` gates a turn before the model call; `commit`
//! increments the counter and runs only after the model has fully produced
//! output, so a denied or failed call never consumes allowance.

use crate::store::WorkspaceStore;
use dojo_core::GatewayError;
use std::sync::Arc;

pub const QUOTA_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allow,
    Deny { unlock_at_ms: i64 },
}

pub struct QuotaLedger {
    store: Arc<WorkspaceStore>,
    daily_limit: i64,
}

impl QuotaLedger {
    pub fn new(store: Arc<WorkspaceStore>, daily_limit: i64) -> Self {
        Self { store, daily_limit }
    }

    pub fn check_and_reserve(&self, user_id: &str) -> Result<QuotaDecision, GatewayError> {
        self.check_at(user_id, chrono::Utc::now().timestamp_millis())
    }

    fn check_at(&self, user_id: &str, now_ms: i64) -> Result<QuotaDecision, GatewayError> {
        let quota = self.store.get_quota(user_id).map_err(storage)?;

        let quota = match quota {
            None => {
                // First-ever turn for this identity: fresh ledger row.
                self.store.init_quota(user_id).map_err(storage)?
            }
            Some(mut quota) => {
                // Window rollover happens BEFORE the threshold check.
                if now_ms - quota.last_reset_at_ms >= QUOTA_WINDOW_MS {
                    self.store.reset_quota(user_id, now_ms).map_err(storage)?;
                    quota.message_count = 0;
                    quota.last_reset_at_ms = now_ms;
                }
                quota
            }
        };

        if quota.message_count >= self.daily_limit {
            let unlock_at_ms = quota.last_reset_at_ms + QUOTA_WINDOW_MS;
            tracing::info!(
                target: "dojo::quota",
                user = %user_id,
                unlock_at_ms,
                "Daily allowance exhausted"
            );
            return Ok(QuotaDecision::Deny { unlock_at_ms });
        }
        Ok(QuotaDecision::Allow)
    }

    /// Consumes one unit of allowance. Called exactly once per accepted
    /// request, after the model stream completed successfully.
    pub fn commit(&self, user_id: &str) -> Result<(), GatewayError> {
        self.store.increment_quota(user_id).map_err(storage)
    }
}

fn storage(e: rusqlite::Error) -> GatewayError {
    GatewayError::Store(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ledger() -> (TempDir, Arc<WorkspaceStore>, QuotaLedger) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(WorkspaceStore::new(dir.path().join("dojo.sqlite3")).unwrap());
        store.upsert_user("user-1", "one@example.com").unwrap();
        let ledger = QuotaLedger::new(Arc::clone(&store), 20);
        (dir, store, ledger)
    }

    #[test]
    fn test_first_use_creates_record_and_allows() {
        let (_dir, store, ledger) = ledger();
        assert!(store.get_quota("user-1").unwrap().is_none());
        assert_eq!(
            ledger.check_at("user-1", 1_000_000).unwrap(),
            QuotaDecision::Allow
        );
        let quota = store.get_quota("user-1").unwrap().unwrap();
        assert_eq!(quota.message_count, 0);
    }

    #[test]
    fn test_nineteen_then_twenty_denies_with_unlock_time() {
        let (_dir, store, ledger) = ledger();
        let reset_at = 1_000_000;
        store.set_quota("user-1", 19, reset_at).unwrap();

        // One hour into the window with counter 19: allowed, then committed to 20.
        let now = reset_at + 60 * 60 * 1000;
        assert_eq!(ledger.check_at("user-1", now).unwrap(), QuotaDecision::Allow);
        ledger.commit("user-1").unwrap();
        assert_eq!(store.get_quota("user-1").unwrap().unwrap().message_count, 20);

        // The next turn is denied and reports lastResetAt + 24h.
        assert_eq!(
            ledger.check_at("user-1", now + 1).unwrap(),
            QuotaDecision::Deny {
                unlock_at_ms: reset_at + QUOTA_WINDOW_MS
            }
        );
    }

    #[test]
    fn test_stale_window_resets_before_threshold_check() {
        let (_dir, store, ledger) = ledger();
        let reset_at = 1_000_000;
        store.set_quota("user-1", 20, reset_at).unwrap();

        // 25 hours later the counter is logically zero: allow, reset, re-increment.
        let now = reset_at + 25 * 60 * 60 * 1000;
        assert_eq!(ledger.check_at("user-1", now).unwrap(), QuotaDecision::Allow);
        ledger.commit("user-1").unwrap();

        let quota = store.get_quota("user-1").unwrap().unwrap();
        assert_eq!(quota.message_count, 1);
        assert_eq!(quota.last_reset_at_ms, now);
    }

    #[test]
    fn test_denied_turn_does_not_consume_quota() {
        let (_dir, store, ledger) = ledger();
        store.set_quota("user-1", 20, 1_000_000).unwrap();
        let decision = ledger.check_at("user-1", 1_000_001).unwrap();
        assert!(matches!(decision, QuotaDecision::Deny { .. }));
        // No commit happened; the counter is untouched.
        assert_eq!(store.get_quota("user-1").unwrap().unwrap().message_count, 20);
    }
}
