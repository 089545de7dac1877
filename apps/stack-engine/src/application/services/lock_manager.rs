//! Per-order lock acquisition with bounded waiting.
//!
//! Locks are held for one mutation at a time and never across a broker
//! call. A held lock is waited on until the timeout, then reported as a
//! `LockConflict` for the caller to retry on a later cycle.

use std::time::Duration;

use chrono::TimeDelta;
use tokio::time::Instant;
use tracing::debug;

use crate::config::LockConfig;
use crate::domain::order_stack::{LockToken, OrderStack, StackError, Tier};
use crate::domain::shared::{HolderId, OrderId};
use crate::observability::record_lock_conflict;

/// Acquires and releases order locks on behalf of one holder.
#[derive(Debug, Clone)]
pub struct LockManager {
    holder: HolderId,
    acquire_timeout: Duration,
    poll_interval: Duration,
    stale_after: Option<TimeDelta>,
}

impl LockManager {
    /// Create a lock manager for `holder`.
    #[must_use]
    pub fn new(holder: HolderId, config: &LockConfig) -> Self {
        // Zero, or an age past chrono's range, never breaks a lock.
        let stale_after = i64::try_from(config.stale_after_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .and_then(TimeDelta::try_seconds);
        Self {
            holder,
            acquire_timeout: config.acquire_timeout(),
            poll_interval: config.poll_interval(),
            stale_after,
        }
    }

    /// Lock holder identity.
    #[must_use]
    pub const fn holder(&self) -> &HolderId {
        &self.holder
    }

    /// Acquire with the configured timeout.
    pub async fn acquire<T: Tier>(
        &self,
        stack: &OrderStack<T>,
        id: OrderId,
    ) -> Result<LockToken, StackError> {
        self.acquire_with_timeout(stack, id, self.acquire_timeout)
            .await
    }

    /// Acquire, waiting up to `timeout` for a held lock to be released.
    pub async fn acquire_with_timeout<T: Tier>(
        &self,
        stack: &OrderStack<T>,
        id: OrderId,
        timeout: Duration,
    ) -> Result<LockToken, StackError> {
        let deadline = Instant::now() + timeout;
        loop {
            let attempt = match self.stale_after {
                Some(stale_after) => stack.lock_breaking_stale(id, &self.holder, stale_after),
                None => stack.lock(id, &self.holder),
            };
            match attempt {
                Err(StackError::LockConflict { .. }) if Instant::now() < deadline => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    tokio::time::sleep(self.poll_interval.min(remaining)).await;
                }
                Err(e @ StackError::LockConflict { .. }) => {
                    record_lock_conflict(T::NAME);
                    debug!(tier = T::NAME, order_id = %id, error = %e, "Lock not acquired");
                    return Err(e);
                }
                other => return other,
            }
        }
    }

    /// Release a lock.
    pub fn release<T: Tier>(&self, stack: &OrderStack<T>, token: &LockToken) -> Result<(), StackError> {
        stack.unlock(token.order_id, token)
    }

    /// Run `f` while holding the order's lock. The lock is released whether
    /// or not `f` succeeds; `f`'s error takes precedence over a release error.
    pub async fn with_lock<T, R, F>(
        &self,
        stack: &OrderStack<T>,
        id: OrderId,
        f: F,
    ) -> Result<R, StackError>
    where
        T: Tier,
        F: FnOnce(&LockToken) -> Result<R, StackError>,
    {
        let token = self.acquire(stack, id).await?;
        let result = f(&token);
        let released = self.release(stack, &token);
        let value = result?;
        released?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order_stack::{InstrumentDetail, InstrumentTier, NewOrder, OrderDelta};
    use crate::domain::shared::{InstrumentId, StrategyId, TradeVector};
    use crate::infrastructure::persistence::InMemoryOrderStore;
    use std::sync::Arc;

    fn stack_with_order() -> (OrderStack<InstrumentTier>, OrderId) {
        let stack = OrderStack::new(Arc::new(InMemoryOrderStore::<InstrumentTier>::new()));
        let id = stack
            .create(NewOrder::new(
                StrategyId::new("trend"),
                InstrumentId::new("SOFR"),
                TradeVector::single(3),
                InstrumentDetail::default(),
            ))
            .unwrap();
        (stack, id)
    }

    fn manager(holder: &str, acquire_timeout_ms: u64) -> LockManager {
        LockManager::new(
            HolderId::new(holder),
            &LockConfig {
                acquire_timeout_ms,
                poll_interval_ms: 5,
                stale_after_secs: 0,
            },
        )
    }

    #[tokio::test]
    async fn second_holder_conflicts_without_waiting() {
        let (stack, id) = stack_with_order();
        let a = manager("a", 0);
        let b = manager("b", 0);
        let token = a.acquire(&stack, id).await.unwrap();
        let err = b.acquire(&stack, id).await.unwrap_err();
        assert!(matches!(err, StackError::LockConflict { holder, .. } if holder.as_str() == "a"));
        a.release(&stack, &token).unwrap();
        assert!(b.acquire(&stack, id).await.is_ok());
    }

    #[tokio::test]
    async fn locks_are_not_reentrant() {
        let (stack, id) = stack_with_order();
        let a = manager("a", 0);
        let _token = a.acquire(&stack, id).await.unwrap();
        assert!(a.acquire(&stack, id).await.is_err());
    }

    #[tokio::test]
    async fn waiting_acquire_succeeds_after_release() {
        let (stack, id) = stack_with_order();
        let a = manager("a", 0);
        let b = manager("b", 1_000);
        let token = a.acquire(&stack, id).await.unwrap();

        let releaser = {
            let stack = stack.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                stack.unlock(token.order_id, &token).unwrap();
            })
        };
        assert!(b.acquire(&stack, id).await.is_ok());
        releaser.await.unwrap();
    }

    #[tokio::test]
    async fn with_lock_releases_on_error() {
        let (stack, id) = stack_with_order();
        let a = manager("a", 0);
        let result: Result<(), StackError> = a
            .with_lock(&stack, id, |token| {
                stack.modify(id, token, &OrderDelta::Complete).map(|_| ())
            })
            .await;
        assert!(matches!(result, Err(StackError::InvalidTransition { .. })));
        assert!(!stack.get(id).unwrap().is_locked());
    }

    #[tokio::test]
    async fn stale_locks_are_broken() {
        let (stack, id) = stack_with_order();
        let _abandoned = stack.lock(id, &HolderId::new("dead")).unwrap();
        let config = LockConfig {
            acquire_timeout_ms: 0,
            poll_interval_ms: 5,
            stale_after_secs: 1,
        };
        let fresh = LockManager::new(HolderId::new("alive"), &config);
        assert!(fresh.acquire(&stack, id).await.is_err());

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let token = fresh.acquire(&stack, id).await.unwrap();
        assert_eq!(token.holder, HolderId::new("alive"));
    }

    #[tokio::test]
    async fn stale_age_beyond_calendar_range_never_breaks() {
        let (stack, id) = stack_with_order();
        let _held = stack.lock(id, &HolderId::new("slow")).unwrap();
        let config = LockConfig {
            acquire_timeout_ms: 0,
            poll_interval_ms: 5,
            stale_after_secs: u64::MAX,
        };
        let other = LockManager::new(HolderId::new("other"), &config);
        let err = other.acquire(&stack, id).await.unwrap_err();
        assert!(matches!(err, StackError::LockConflict { .. }));
    }
}
