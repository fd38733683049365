//! Scheduled unmute timers
//!
//! One timer per muted user, kept in a shared map. Scheduling replaces any
//! earlier timer for the user and cancellation aborts the sleeping task. A
//! timer that reaches its deadline must claim its own map entry before
//! running the callback, so a timer that was cancelled or replaced while
//! sleeping becomes a no-op even if the abort missed it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;

/// A pending unmute timer
#[derive(Debug)]
struct PendingUnmute {
    /// When the timer fires
    fire_at: DateTime<Utc>,
    /// Token the fired task must present to claim this entry
    generation: u64,
    /// Handle used to abort the sleeping task on cancellation
    handle: JoinHandle<()>,
}

/// Timer map for scheduled unmutes
#[derive(Debug, Clone, Default)]
pub struct UnmuteScheduler {
    inner: Arc<SchedulerInner>,
}

#[derive(Debug, Default)]
struct SchedulerInner {
    /// Pending timers keyed by user id
    pending: DashMap<u64, PendingUnmute>,
    /// Source of claim tokens
    next_generation: AtomicU64,
}

impl UnmuteScheduler {
    /// Create a scheduler with no pending timers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `on_fire` to run for `user_id` at `fire_at`.
    ///
    /// Replaces any timer already pending for the user. A deadline in the
    /// past fires on the next runtime turn.
    pub fn schedule<F, Fut>(&self, user_id: u64, fire_at: DateTime<Utc>, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel(user_id);

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        // The timer must not race its own registration, so it holds at this
        // gate until the map entry is in place.
        let (armed_tx, armed_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let _ = armed_rx.await;

            let delay = (fire_at - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::time::sleep(delay).await;

            // Claim the entry. Losing the claim means this timer was
            // cancelled or replaced while it slept.
            if inner
                .pending
                .remove_if(&user_id, |_, pending| pending.generation == generation)
                .is_some()
            {
                on_fire().await;
            }
        });

        self.inner.pending.insert(
            user_id,
            PendingUnmute {
                fire_at,
                generation,
                handle,
            },
        );
        let _ = armed_tx.send(());

        info!(
            user_id = %user_id,
            fire_at = %fire_at,
            "Unmute timer scheduled"
        );
    }

    /// Cancel the pending timer for a user.
    ///
    /// Returns true if a timer was pending. Once this returns, the timer's
    /// callback can no longer run.
    pub fn cancel(&self, user_id: u64) -> bool {
        if let Some((_, pending)) = self.inner.pending.remove(&user_id) {
            pending.handle.abort();
            info!(user_id = %user_id, "Unmute timer cancelled");
            true
        } else {
            false
        }
    }

    /// Check whether a user has a timer pending
    #[must_use]
    pub fn is_scheduled(&self, user_id: u64) -> bool {
        self.inner.pending.contains_key(&user_id)
    }

    /// When the user's pending timer fires, if one is pending
    #[must_use]
    pub fn fire_at(&self, user_id: u64) -> Option<DateTime<Utc>> {
        self.inner.pending.get(&user_id).map(|pending| pending.fire_at)
    }

    /// Number of pending timers
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        (Arc::clone(&fired), fired)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once_and_consumes_its_entry() {
        let scheduler = UnmuteScheduler::new();
        let (fired, handle) = counter();

        scheduler.schedule(1, Utc::now() + Duration::seconds(30), move || async move {
            handle.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.is_scheduled(1));
        assert_eq!(scheduler.pending_count(), 1);

        tokio::time::sleep(std::time::Duration::from_secs(60)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled(1));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let scheduler = UnmuteScheduler::new();
        let (fired, handle) = counter();

        scheduler.schedule(2, Utc::now() + Duration::seconds(30), move || async move {
            handle.fetch_add(1, Ordering::SeqCst);
        });

        assert!(scheduler.cancel(2));
        assert!(!scheduler.is_scheduled(2));

        tokio::time::sleep(std::time::Duration::from_secs(120)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        // Nothing left to cancel
        assert!(!scheduler.cancel(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_the_earlier_timer() {
        let scheduler = UnmuteScheduler::new();
        let (first_fired, first_handle) = counter();
        let (second_fired, second_handle) = counter();

        scheduler.schedule(3, Utc::now() + Duration::seconds(30), move || async move {
            first_handle.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.schedule(3, Utc::now() + Duration::seconds(90), move || async move {
            second_handle.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(scheduler.pending_count(), 1);

        tokio::time::sleep(std::time::Duration::from_secs(300)).await;

        assert_eq!(first_fired.load(Ordering::SeqCst), 0);
        assert_eq!(second_fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_deadline_fires_immediately() {
        let scheduler = UnmuteScheduler::new();
        let (fired, handle) = counter();

        scheduler.schedule(4, Utc::now() - Duration::seconds(5), move || async move {
            handle.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_at_reports_the_deadline() {
        let scheduler = UnmuteScheduler::new();
        let deadline = Utc::now() + Duration::seconds(600);

        scheduler.schedule(5, deadline, || async {});

        assert_eq!(scheduler.fire_at(5), Some(deadline));
        assert_eq!(scheduler.fire_at(6), None);

        scheduler.cancel(5);
        assert_eq!(scheduler.fire_at(5), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_for_different_users_are_independent() {
        let scheduler = UnmuteScheduler::new();
        let (first_fired, first_handle) = counter();
        let (second_fired, second_handle) = counter();

        scheduler.schedule(7, Utc::now() + Duration::seconds(30), move || async move {
            first_handle.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.schedule(8, Utc::now() + Duration::seconds(30), move || async move {
            second_handle.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.cancel(7);
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;

        assert_eq!(first_fired.load(Ordering::SeqCst), 0);
        assert_eq!(second_fired.load(Ordering::SeqCst), 1);
    }
}
