//! Registry of cancellable one-shot timers

use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Opaque token identifying one armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TimerHandle(u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Notification that a timer's delay elapsed
#[derive(Debug, Clone, PartialEq)]
pub struct FiredTimer<A> {
    pub handle: TimerHandle,
    pub action: A,
}

/// A live timer as seen from outside the registry
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTimer<A> {
    pub handle: TimerHandle,
    pub action: A,
    /// Delay requested when the timer was armed
    pub delay: Duration,
    pub fire_at: Instant,
}

impl<A> PendingTimer<A> {
    /// Time left until the timer fires
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.fire_at.saturating_duration_since(Instant::now())
    }
}

struct ArmedTimer<A> {
    action: A,
    delay: Duration,
    fire_at: Instant,
    task: Option<JoinHandle<()>>,
}

/// Set of one-shot delayed actions that can be cancelled individually or in bulk
///
/// When a timer elapses its handle and action are sent on the channel
/// returned by [`TimerRegistry::new`]. The entry stays registered until the
/// receiver claims it with [`TimerRegistry::take`], which returns `None` for
/// a timer cancelled in the meantime.
pub struct TimerRegistry<A> {
    timers: DashMap<TimerHandle, ArmedTimer<A>>,
    next_id: AtomicU64,
    fired_tx: mpsc::UnboundedSender<FiredTimer<A>>,
}

impl<A> TimerRegistry<A>
where
    A: Clone + Send + 'static,
{
    /// Create a registry and the receiver its fired timers are reported on
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FiredTimer<A>>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let registry = Self {
            timers: DashMap::new(),
            next_id: AtomicU64::new(1),
            fired_tx,
        };
        (registry, fired_rx)
    }

    /// Arm a timer that reports `action` after `delay`
    ///
    /// A zero delay fires as soon as the runtime polls the timer task.
    pub fn schedule(&self, delay: Duration, action: A) -> TimerHandle {
        let handle = TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let fire_at = Instant::now() + delay;

        // Register before spawning so a zero-delay fire always finds its entry
        self.timers.insert(
            handle,
            ArmedTimer {
                action: action.clone(),
                delay,
                fire_at,
                task: None,
            },
        );

        let fired_tx = self.fired_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(fire_at).await;
            let _ = fired_tx.send(FiredTimer { handle, action });
        });

        if let Some(mut entry) = self.timers.get_mut(&handle) {
            entry.task = Some(task);
        }

        tracing::debug!("Armed timer {} in {:?}", handle, delay);
        handle
    }

    /// Cancel one timer; returns false if it already fired or was cancelled
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        match self.timers.remove(&handle) {
            Some((_, timer)) => {
                if let Some(task) = timer.task {
                    task.abort();
                }
                tracing::debug!("Cancelled timer {}", handle);
                true
            }
            None => false,
        }
    }

    /// Cancel every live timer, returning how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let handles: Vec<TimerHandle> = self.timers.iter().map(|entry| *entry.key()).collect();
        handles
            .into_iter()
            .filter(|handle| self.cancel(*handle))
            .count()
    }

    /// Claim a fired timer, removing it from the registry
    pub fn take(&self, handle: TimerHandle) -> Option<A> {
        self.timers.remove(&handle).map(|(_, timer)| timer.action)
    }

    /// Live timers ordered by fire instant
    #[must_use]
    pub fn pending(&self) -> Vec<PendingTimer<A>> {
        let mut pending: Vec<PendingTimer<A>> = self
            .timers
            .iter()
            .map(|entry| PendingTimer {
                handle: *entry.key(),
                action: entry.action.clone(),
                delay: entry.delay,
                fire_at: entry.fire_at,
            })
            .collect();
        pending.sort_by_key(|timer| (timer.fire_at, timer.handle));
        pending
    }

    /// Get the number of live timers
    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl<A> Drop for TimerRegistry<A> {
    fn drop(&mut self) {
        // Abort all timer tasks
        for entry in self.timers.iter() {
            if let Some(task) = &entry.value().task {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (registry, mut fired) = TimerRegistry::new();
        let handle = registry.schedule(Duration::from_secs(90), "pump_off");

        tokio::time::sleep(Duration::from_secs(89)).await;
        assert!(fired.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let event = fired.try_recv().unwrap();
        assert_eq!(event.handle, handle);
        assert_eq!(registry.take(event.handle), Some("pump_off"));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_fires_immediately() {
        let (registry, mut fired) = TimerRegistry::new();
        let handle = registry.schedule(Duration::ZERO, 7u8);

        let event = fired.recv().await.unwrap();
        assert_eq!(event.handle, handle);
        assert_eq!(registry.take(handle), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (registry, mut fired) = TimerRegistry::new();
        let keep = registry.schedule(Duration::from_secs(10), "keep");
        let drop_me = registry.schedule(Duration::from_secs(5), "drop");

        assert!(registry.cancel(drop_me));
        assert!(!registry.cancel(drop_me));

        tokio::time::sleep(Duration::from_secs(20)).await;
        let event = fired.try_recv().unwrap();
        assert_eq!(event.handle, keep);
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_is_idempotent() {
        let (registry, mut fired) = TimerRegistry::new();
        for secs in 1..=4 {
            registry.schedule(Duration::from_secs(secs), secs);
        }
        assert_eq!(registry.len(), 4);

        assert_eq!(registry.cancel_all(), 4);
        assert_eq!(registry.cancel_all(), 0);
        assert!(registry.is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_after_cancel_returns_none() {
        let (registry, mut fired) = TimerRegistry::new();
        let handle = registry.schedule(Duration::from_secs(1), "stale");

        tokio::time::sleep(Duration::from_secs(2)).await;
        let event = fired.try_recv().unwrap();
        assert_eq!(event.handle, handle);

        // A bulk cancel between firing and claiming wins
        assert_eq!(registry.cancel_all(), 1);
        assert_eq!(registry.take(event.handle), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_ordered_by_fire_instant() {
        let (registry, _fired) = TimerRegistry::new();
        registry.schedule(Duration::from_secs(300), "late");
        registry.schedule(Duration::from_secs(60), "early");

        tokio::time::sleep(Duration::from_secs(30)).await;
        let pending = registry.pending();
        let actions: Vec<&str> = pending.iter().map(|t| t.action).collect();
        assert_eq!(actions, vec!["early", "late"]);
        assert_eq!(pending[0].delay, Duration::from_secs(60));
        assert_eq!(pending[0].remaining(), Duration::from_secs(30));
    }
}
