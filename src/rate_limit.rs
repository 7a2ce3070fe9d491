//! Client-side throttle tracking.
//!
//! One [`RateLimitCoordinator`] is built at startup and shared (behind an
//! `Arc`) between the HTTP layer, which reports 429 responses, and whatever
//! renders the "retry in N sec" indicator. A report starts a one-second
//! countdown that clears the throttle when it reaches zero; a later report
//! replaces the countdown instead of stacking on top of it.

use crate::error::RateLimitError;
use crate::types::RateLimitState;
use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_TOAST_DEBOUNCE: Duration = Duration::from_secs(5);
const TICK: Duration = Duration::from_secs(1);

/// Receives a snapshot after every coordinator mutation.
///
/// Delivery is synchronous. Observers may read the coordinator or subscribe
/// others, but must not call `report_throttled`/`clear` from inside `notify`.
pub trait Observer<T>: Send + Sync {
    fn notify(&self, state: &T);
}

impl<T, F> Observer<T> for F
where
    F: Fn(&T) + Send + Sync,
{
    fn notify(&self, state: &T) {
        self(state)
    }
}

type SharedObserver = Arc<dyn Observer<RateLimitState>>;

struct Inner {
    state: RateLimitState,
    // Bumped whenever the running ticker is replaced or cancelled.
    generation: u64,
    ticker: Option<JoinHandle<()>>,
}

impl Inner {
    fn stop_ticker(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(t) = self.ticker.take() {
            t.abort();
        }
    }

    fn reset(&mut self) {
        self.state.is_limited = false;
        self.state.retry_after = None;
        self.state.countdown = None;
    }
}

struct Shared {
    inner: Mutex<Inner>,
    // Serializes mutate-then-publish so observers see snapshots in mutation order.
    publishing: Mutex<()>,
    observers: Mutex<Vec<(u64, SharedObserver)>>,
    next_observer_id: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn publish(&self, snapshot: &RateLimitState) {
        let observers: Vec<SharedObserver> =
            lock(&self.observers).iter().map(|(_, o)| o.clone()).collect();
        for o in observers {
            o.notify(snapshot);
        }
    }
}

/// Handle returned by [`RateLimitCoordinator::subscribe`].
///
/// Dropping it keeps the observer registered; call [`Subscription::unsubscribe`]
/// to remove it.
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.observers).retain(|(id, _)| *id != self.id);
        }
    }
}

pub struct RateLimitCoordinator {
    shared: Arc<Shared>,
    runtime: Handle,
    debounce: Duration,
}

impl RateLimitCoordinator {
    /// Build a coordinator whose countdown runs on `runtime`.
    pub fn new(runtime: Handle, debounce: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: RateLimitState::default(),
                    generation: 0,
                    ticker: None,
                }),
                publishing: Mutex::new(()),
                observers: Mutex::new(Vec::new()),
                next_observer_id: AtomicU64::new(0),
            }),
            runtime,
            debounce,
        }
    }

    /// Build a coordinator on the ambient Tokio runtime.
    pub fn try_current(debounce: Duration) -> Result<Self, RateLimitError> {
        Ok(Self::new(Handle::try_current()?, debounce))
    }

    /// Record a 429. Returns whether a user-facing notification should be shown.
    ///
    /// The state always updates; only the notification is debounced. A
    /// `retry_after` of zero publishes the cleared state straight away.
    pub fn report_throttled(&self, retry_after: Option<u64>) -> bool {
        let _publishing = lock(&self.shared.publishing);
        let (snapshot, notify) = {
            let mut inner = lock(&self.shared.inner);
            inner.stop_ticker();

            let now = Instant::now();
            let notify = match inner.state.last_toast_notified_at {
                Some(at) => now.duration_since(at) >= self.debounce,
                None => true,
            };
            if notify {
                inner.state.last_toast_notified_at = Some(now);
            }

            inner.state.is_limited = true;
            inner.state.retry_after = retry_after;
            inner.state.countdown = retry_after;

            if retry_after == Some(0) {
                // Nothing to count down; the wait is already over.
                inner.reset();
            } else if retry_after.is_some() {
                let generation = inner.generation;
                let first_tick = now + TICK;
                let shared = self.shared.clone();
                inner.ticker = Some(
                    self.runtime
                        .spawn(run_ticker(shared, generation, first_tick)),
                );
            }
            (inner.state.clone(), notify)
        };
        info!(
            "Throttled by server; retry_after={:?} notify={}",
            retry_after, notify
        );
        self.shared.publish(&snapshot);
        notify
    }

    /// Stop any countdown and return to the cleared state.
    pub fn clear(&self) {
        let _publishing = lock(&self.shared.publishing);
        let snapshot = {
            let mut inner = lock(&self.shared.inner);
            inner.stop_ticker();
            inner.reset();
            inner.state.clone()
        };
        debug!("Rate limit cleared");
        self.shared.publish(&snapshot);
    }

    /// Milliseconds a caller should wait before retrying, or 0 when unknown or not limited.
    pub fn retry_delay_millis(&self) -> u64 {
        let inner = lock(&self.shared.inner);
        match (inner.state.is_limited, inner.state.retry_after) {
            (true, Some(secs)) => secs.saturating_mul(1000),
            _ => 0,
        }
    }

    pub fn subscribe<O>(&self, observer: O) -> Subscription
    where
        O: Observer<RateLimitState> + 'static,
    {
        let id = self.shared.next_observer_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.observers).push((id, Arc::new(observer)));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn state(&self) -> RateLimitState {
        lock(&self.shared.inner).state.clone()
    }

    pub fn is_limited(&self) -> bool {
        lock(&self.shared.inner).state.is_limited
    }

    /// Cancel the countdown without publishing. No tick fires afterwards.
    pub fn shutdown(&self) {
        lock(&self.shared.inner).stop_ticker();
    }
}

impl Drop for RateLimitCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_ticker(shared: Arc<Shared>, generation: u64, first_tick: Instant) {
    let mut interval = tokio::time::interval_at(first_tick, TICK);
    loop {
        interval.tick().await;
        let _publishing = lock(&shared.publishing);
        let (snapshot, done) = {
            let mut inner = lock(&shared.inner);
            if inner.generation != generation {
                return;
            }
            let remaining = inner.state.countdown.unwrap_or(0).saturating_sub(1);
            if remaining == 0 {
                inner.reset();
                inner.ticker = None;
                (inner.state.clone(), true)
            } else {
                inner.state.countdown = Some(remaining);
                (inner.state.clone(), false)
            }
        };
        debug!("Rate limit tick; countdown={:?}", snapshot.countdown);
        shared.publish(&snapshot);
        if done {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(c: &RateLimitCoordinator) -> Arc<Mutex<Vec<RateLimitState>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        c.subscribe(move |s: &RateLimitState| sink.lock().unwrap().push(s.clone()));
        seen
    }

    fn countdowns(seen: &Mutex<Vec<RateLimitState>>) -> Vec<(bool, Option<u64>)> {
        seen.lock()
            .unwrap()
            .iter()
            .map(|s| (s.is_limited, s.countdown))
            .collect()
    }

    async fn after_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_ticks_down_then_clears() {
        let c = RateLimitCoordinator::try_current(DEFAULT_TOAST_DEBOUNCE).unwrap();
        let seen = recorder(&c);
        c.report_throttled(Some(5));
        after_ms(5_500).await;
        assert_eq!(
            countdowns(&seen),
            vec![
                (true, Some(5)),
                (true, Some(4)),
                (true, Some(3)),
                (true, Some(2)),
                (true, Some(1)),
                (false, None),
            ]
        );
        let s = c.state();
        assert!(!s.is_limited);
        assert_eq!(s.retry_after, None);
        assert_eq!(s.countdown, None);
    }

    #[tokio::test(start_paused = true)]
    async fn observer_sees_states_at_each_second() {
        let c = RateLimitCoordinator::try_current(DEFAULT_TOAST_DEBOUNCE).unwrap();
        let seen = recorder(&c);
        c.report_throttled(Some(2));
        assert_eq!(countdowns(&seen), vec![(true, Some(2))]);
        after_ms(1_500).await;
        assert_eq!(countdowns(&seen), vec![(true, Some(2)), (true, Some(1))]);
        after_ms(1_000).await;
        assert_eq!(
            countdowns(&seen),
            vec![(true, Some(2)), (true, Some(1)), (false, None)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn notification_is_debounced() {
        let c = RateLimitCoordinator::try_current(DEFAULT_TOAST_DEBOUNCE).unwrap();
        assert!(c.report_throttled(Some(30)));
        after_ms(2_000).await;
        assert!(!c.report_throttled(Some(30)));
        // Window is measured from the last approved notification.
        after_ms(3_500).await;
        assert!(c.report_throttled(Some(30)));
        assert!(c.state().is_limited);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_report_resets_countdown() {
        let c = RateLimitCoordinator::try_current(DEFAULT_TOAST_DEBOUNCE).unwrap();
        let seen = recorder(&c);
        c.report_throttled(Some(3));
        after_ms(1_500).await;
        c.report_throttled(Some(3));
        after_ms(1_200).await;
        assert_eq!(
            countdowns(&seen),
            vec![(true, Some(3)), (true, Some(2)), (true, Some(3)), (true, Some(2))]
        );
        after_ms(2_000).await;
        assert!(!c.state().is_limited);
        // Only one ticker ran after the reset; nothing extra fired.
        after_ms(5_000).await;
        assert_eq!(seen.lock().unwrap().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retry_after_clears_at_once() {
        let c = RateLimitCoordinator::try_current(DEFAULT_TOAST_DEBOUNCE).unwrap();
        let seen = recorder(&c);
        assert!(c.report_throttled(Some(0)));
        assert_eq!(countdowns(&seen), vec![(false, None)]);
        assert_eq!(c.state().indicator_text(), None);
        assert_eq!(c.retry_delay_millis(), 0);
        // Still counts for the debounce window.
        assert!(!c.report_throttled(Some(0)));
        after_ms(3_000).await;
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_retry_after_stays_limited_without_countdown() {
        let c = RateLimitCoordinator::try_current(DEFAULT_TOAST_DEBOUNCE).unwrap();
        let seen = recorder(&c);
        c.report_throttled(None);
        after_ms(10_000).await;
        let s = c.state();
        assert!(s.is_limited);
        assert_eq!(s.countdown, None);
        assert_eq!(c.retry_delay_millis(), 0);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_stops_ticker_and_keeps_toast_time() {
        let c = RateLimitCoordinator::try_current(DEFAULT_TOAST_DEBOUNCE).unwrap();
        let seen = recorder(&c);
        c.report_throttled(Some(10));
        assert_eq!(c.retry_delay_millis(), 10_000);
        let toast_at = c.state().last_toast_notified_at;
        c.clear();
        after_ms(20_000).await;
        assert_eq!(countdowns(&seen), vec![(true, Some(10)), (false, None)]);
        assert_eq!(c.state().last_toast_notified_at, toast_at);
        assert_eq!(c.retry_delay_millis(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_tick_after_shutdown_or_drop() {
        let c = RateLimitCoordinator::try_current(DEFAULT_TOAST_DEBOUNCE).unwrap();
        let seen = recorder(&c);
        c.report_throttled(Some(4));
        c.shutdown();
        after_ms(10_000).await;
        assert_eq!(seen.lock().unwrap().len(), 1);

        let d = RateLimitCoordinator::try_current(DEFAULT_TOAST_DEBOUNCE).unwrap();
        let seen_d = recorder(&d);
        d.report_throttled(Some(4));
        drop(d);
        after_ms(10_000).await;
        assert_eq!(seen_d.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_stops_delivery() {
        let c = RateLimitCoordinator::try_current(DEFAULT_TOAST_DEBOUNCE).unwrap();
        let a = Arc::new(Mutex::new(0usize));
        let b = Arc::new(Mutex::new(0usize));
        let (ac, bc) = (a.clone(), b.clone());
        let sub_a = c.subscribe(move |_: &RateLimitState| *ac.lock().unwrap() += 1);
        let _sub_b = c.subscribe(move |_: &RateLimitState| *bc.lock().unwrap() += 1);
        c.report_throttled(None);
        sub_a.unsubscribe();
        c.clear();
        assert_eq!(*a.lock().unwrap(), 1);
        assert_eq!(*b.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn observer_can_read_state_during_delivery() {
        let c = Arc::new(RateLimitCoordinator::try_current(DEFAULT_TOAST_DEBOUNCE).unwrap());
        let reads = Arc::new(Mutex::new(Vec::new()));
        let (weak, sink) = (Arc::downgrade(&c), reads.clone());
        c.subscribe(move |_: &RateLimitState| {
            if let Some(c) = weak.upgrade() {
                sink.lock().unwrap().push(c.state().countdown);
            }
        });
        c.report_throttled(Some(7));
        assert_eq!(*reads.lock().unwrap(), vec![Some(7)]);
    }
}
