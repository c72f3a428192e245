//! Test doubles for deterministic testing
//!
//! Mock implementations of the external collaborators that let tests
//! control time, script the OS connectivity facility and capture
//! observations.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::connectivity::{
    ConnectivityCallback, ConnectivityProbe, RawConnectivityState, SubscriptionHandle,
};
use crate::errors::{Result, ShopStateError};
use crate::observability::ObservationSink;
use crate::types::{TimeSource, Timestamp};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// Mock Time Source
// ----------------------------------------------------------------------------

/// Mock time source for deterministic testing
///
/// Time only moves when the test advances it. Clones share the same clock.
#[derive(Debug, Clone, Default)]
pub struct MockTimeSource {
    current_micros: Arc<AtomicU64>,
}

impl MockTimeSource {
    /// Create a new mock time source starting at time 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance time by a duration
    pub fn advance(&self, duration: Duration) {
        self.current_micros
            .fetch_add(duration.as_micros() as u64, Ordering::SeqCst);
    }

    /// Advance time by whole milliseconds
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Set the clock to a specific timestamp
    pub fn set_time(&self, timestamp: Timestamp) {
        self.current_micros
            .store(timestamp.as_micros(), Ordering::SeqCst);
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::from_micros(self.current_micros.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Manual Connectivity Probe
// ----------------------------------------------------------------------------

type PendingFetch = oneshot::Sender<Result<RawConnectivityState>>;

#[derive(Default)]
struct ManualProbeInner {
    pending: Mutex<VecDeque<PendingFetch>>,
    subscribers: Mutex<Vec<(u64, ConnectivityCallback)>>,
    next_subscriber: AtomicU64,
    fetch_calls: AtomicUsize,
    unavailable: AtomicBool,
}

/// Scripted connectivity facility
///
/// `fetch_once` stays pending until the test calls [`ManualProbe::resolve_fetch`]
/// or [`ManualProbe::fail_fetch`]; [`ManualProbe::emit`] delivers a change event
/// to every live subscriber synchronously.
#[derive(Clone, Default)]
pub struct ManualProbe {
    inner: Arc<ManualProbeInner>,
}

impl ManualProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make both operations fail as if the OS facility were missing
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Resolve the oldest pending fetch; false if none was pending
    pub fn resolve_fetch(&self, state: RawConnectivityState) -> bool {
        match lock(&self.inner.pending).pop_front() {
            Some(tx) => tx.send(Ok(state)).is_ok(),
            None => false,
        }
    }

    /// Fail the oldest pending fetch; false if none was pending
    pub fn fail_fetch<T: Into<String>>(&self, reason: T) -> bool {
        match lock(&self.inner.pending).pop_front() {
            Some(tx) => tx
                .send(Err(ShopStateError::probe_unavailable(reason)))
                .is_ok(),
            None => false,
        }
    }

    /// Deliver a change event to every current subscriber
    pub fn emit(&self, state: RawConnectivityState) {
        let callbacks: Vec<ConnectivityCallback> = lock(&self.inner.subscribers)
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(state.clone());
        }
    }

    /// Number of fetches awaiting resolution
    pub fn pending_fetches(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Number of `fetch_once` calls made so far
    pub fn fetch_calls(&self) -> usize {
        self.inner.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }
}

#[async_trait]
impl ConnectivityProbe for ManualProbe {
    async fn fetch_once(&self) -> Result<RawConnectivityState> {
        self.inner.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(ShopStateError::probe_unavailable("connectivity facility missing"));
        }

        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).push_back(tx);

        rx.await
            .map_err(|_| ShopStateError::probe_unavailable("probe dropped before resolving"))?
    }

    fn subscribe(&self, callback: ConnectivityCallback) -> Result<SubscriptionHandle> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(ShopStateError::probe_unavailable("connectivity facility missing"));
        }

        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.subscribers).push((id, callback));

        let inner: Weak<ManualProbeInner> = Arc::downgrade(&self.inner);
        Ok(SubscriptionHandle::new(move || {
            if let Some(inner) = inner.upgrade() {
                lock(&inner.subscribers).retain(|(sub_id, _)| *sub_id != id);
            }
        }))
    }
}

// ----------------------------------------------------------------------------
// Recording Sink
// ----------------------------------------------------------------------------

/// Severity of a captured observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationLevel {
    Info,
    Warn,
}

/// Observation captured by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedObservation {
    pub level: ObservationLevel,
    pub message: String,
}

/// Sink that keeps every observation for later assertions
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    observations: Arc<Mutex<Vec<RecordedObservation>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observations(&self) -> Vec<RecordedObservation> {
        lock(&self.observations).clone()
    }

    pub fn infos(&self) -> Vec<String> {
        self.messages(ObservationLevel::Info)
    }

    pub fn warnings(&self) -> Vec<String> {
        self.messages(ObservationLevel::Warn)
    }

    pub fn clear(&self) {
        lock(&self.observations).clear();
    }

    fn messages(&self, level: ObservationLevel) -> Vec<String> {
        lock(&self.observations)
            .iter()
            .filter(|o| o.level == level)
            .map(|o| o.message.clone())
            .collect()
    }

    fn record(&self, level: ObservationLevel, message: &str) {
        lock(&self.observations).push(RecordedObservation {
            level,
            message: message.to_string(),
        });
    }
}

impl ObservationSink for RecordingSink {
    fn info(&self, message: &str) {
        self.record(ObservationLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.record(ObservationLevel::Warn, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_probe_resolves_in_order() {
        let probe = ManualProbe::new();
        let fetch = {
            let probe = probe.clone();
            tokio::spawn(async move { probe.fetch_once().await })
        };

        while probe.pending_fetches() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(probe.resolve_fetch(RawConnectivityState::new("wifi").connected(true)));
        assert!(!probe.resolve_fetch(RawConnectivityState::new("wifi")));

        let state = fetch.await.unwrap().unwrap();
        assert_eq!(state.is_connected, Some(true));
        assert_eq!(probe.fetch_calls(), 1);
    }

    #[test]
    fn test_manual_probe_subscription_lifecycle() {
        let probe = ManualProbe::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        let handle = probe
            .subscribe(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(probe.subscriber_count(), 1);

        probe.emit(RawConnectivityState::new("cellular"));
        handle.cancel();
        probe.emit(RawConnectivityState::new("cellular"));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(probe.subscriber_count(), 0);
    }

    #[test]
    fn test_mock_time_source_advances() {
        let clock = MockTimeSource::new();
        let start = clock.now();
        clock.advance_millis(20);
        assert_eq!(clock.now() - start, Duration::from_millis(20));
    }
}
