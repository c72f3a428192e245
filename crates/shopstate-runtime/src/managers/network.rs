//! Network status monitor
//!
//! Reconciles the OS one-shot connectivity probe with the live change-event
//! stream into a single current [`ConnectivitySnapshot`].
//!
//! Every observation draws an [`ArrivalTicket`] from a monotonically
//! increasing counter at the moment it reaches the monitor. A snapshot is
//! only replaced by an observation holding a newer ticket, so whichever
//! reading arrived last wins, no matter which operation was issued first or
//! how late the code applying it runs. Tickets also carry the start/stop
//! generation they were drawn in; readings from a stopped generation are
//! dropped.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use shopstate_core::{
    ConnectivityCallback, ConnectivityProbe, ConnectivitySnapshot, MonitorConfig,
    RawConnectivityState, ShopStateError, SubscriptionHandle, TransportType,
};
use tracing::{debug, info, warn};

use crate::observers::{ListenerId, ObserverRegistry};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// Observation Ordering
// ----------------------------------------------------------------------------

/// Where a connectivity reading came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationSource {
    Probe,
    Event,
}

impl fmt::Display for ObservationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservationSource::Probe => write!(f, "probe"),
            ObservationSource::Event => write!(f, "event"),
        }
    }
}

/// Arrival position of a reading, drawn when the reading reaches the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArrivalTicket {
    generation: u64,
    sequence: u64,
}

impl ArrivalTicket {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct MonitorState {
    snapshot: ConnectivitySnapshot,
    /// Sequence of the reading behind `snapshot`, 0 before any reading
    applied_sequence: u64,
    generation: u64,
    running: bool,
}

/// Snapshots committed but not yet delivered to listeners
#[derive(Debug, Default)]
struct Outbox {
    delivering: bool,
    queue: VecDeque<ConnectivitySnapshot>,
}

/// Resets the outbox if a listener panics mid-delivery
struct DeliveryGuard<'a> {
    outbox: &'a Mutex<Outbox>,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut outbox = lock(self.outbox);
            outbox.delivering = false;
            outbox.queue.clear();
        }
    }
}

struct MonitorShared {
    state: Mutex<MonitorState>,
    sequencer: AtomicU64,
    observers: ObserverRegistry<ConnectivitySnapshot>,
    outbox: Mutex<Outbox>,
    stats: Mutex<MonitorStats>,
}

impl MonitorShared {
    fn stamp_for(&self, generation: u64) -> ArrivalTicket {
        ArrivalTicket {
            generation,
            sequence: self.sequencer.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    fn commit(
        &self,
        ticket: ArrivalTicket,
        source: ObservationSource,
        raw: RawConnectivityState,
    ) -> bool {
        let snapshot = ConnectivitySnapshot::from_raw(&raw);

        {
            let mut state = lock(&self.state);
            if !state.running || ticket.generation != state.generation {
                debug!(
                    %source,
                    sequence = ticket.sequence,
                    "dropping reading from a stopped monitor"
                );
                lock(&self.stats).dropped_after_stop += 1;
                return false;
            }
            if ticket.sequence <= state.applied_sequence {
                debug!(
                    %source,
                    sequence = ticket.sequence,
                    applied = state.applied_sequence,
                    "discarding stale connectivity reading"
                );
                lock(&self.stats).stale_discarded += 1;
                return false;
            }
            state.applied_sequence = ticket.sequence;
            state.snapshot = snapshot;
        }

        {
            let mut stats = lock(&self.stats);
            match source {
                ObservationSource::Probe => stats.probes_applied += 1,
                ObservationSource::Event => stats.events_applied += 1,
            }
        }

        debug!(
            %source,
            sequence = ticket.sequence,
            connected = snapshot.is_connected,
            reachable = snapshot.is_internet_reachable,
            transport = %snapshot.transport_type,
            "connectivity changed"
        );
        self.deliver(snapshot);
        true
    }

    /// Hand `snapshot` to listeners in commit order
    ///
    /// A commit made from inside a listener is queued and delivered by the
    /// outermost call once the current pass finishes, so no listener ever
    /// receives an older snapshot after a newer one.
    fn deliver(&self, snapshot: ConnectivitySnapshot) {
        {
            let mut outbox = lock(&self.outbox);
            outbox.queue.push_back(snapshot);
            if outbox.delivering {
                return;
            }
            outbox.delivering = true;
        }

        let _guard = DeliveryGuard {
            outbox: &self.outbox,
        };
        loop {
            let next = {
                let mut outbox = lock(&self.outbox);
                match outbox.queue.pop_front() {
                    Some(next) => next,
                    None => {
                        outbox.delivering = false;
                        return;
                    }
                }
            };
            if !lock(&self.state).running {
                continue;
            }
            self.observers.notify(&next);
        }
    }
}

// ----------------------------------------------------------------------------
// Network Status Monitor
// ----------------------------------------------------------------------------

/// Live connectivity view shared by many UI consumers
pub struct NetworkStatusMonitor {
    shared: Arc<MonitorShared>,
    probe: Arc<dyn ConnectivityProbe>,
    config: MonitorConfig,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl NetworkStatusMonitor {
    /// Create a stopped monitor reporting the configured initial snapshot
    pub fn new(probe: Arc<dyn ConnectivityProbe>, config: MonitorConfig) -> Self {
        let state = MonitorState {
            snapshot: config.initial_snapshot,
            applied_sequence: 0,
            generation: 0,
            running: false,
        };

        Self {
            shared: Arc::new(MonitorShared {
                state: Mutex::new(state),
                sequencer: AtomicU64::new(0),
                observers: ObserverRegistry::new(),
                outbox: Mutex::new(Outbox::default()),
                stats: Mutex::new(MonitorStats::default()),
            }),
            probe,
            config,
            subscription: Mutex::new(None),
        }
    }

    /// Open the event subscription and issue the one-shot probe
    ///
    /// Resolves once the probe has settled. A missing or failing facility is
    /// logged and the last snapshot kept. Calling `start` on a running
    /// monitor returns immediately.
    pub async fn start(&self) {
        let generation = {
            let mut state = lock(&self.shared.state);
            if state.running {
                debug!("network monitor already running");
                return;
            }
            state.running = true;
            state.generation += 1;
            state.generation
        };
        info!(generation, "starting network status monitor");

        // Subscribe before probing so no change between the two is missed
        let weak = Arc::downgrade(&self.shared);
        let callback: ConnectivityCallback = Arc::new(move |raw| {
            if let Some(shared) = weak.upgrade() {
                let ticket = shared.stamp_for(generation);
                shared.commit(ticket, ObservationSource::Event, raw);
            }
        });
        match self.probe.subscribe(callback) {
            Ok(handle) => {
                let previous = lock(&self.subscription).replace(handle);
                drop(previous);
            }
            Err(e) => {
                warn!(error = %e, "connectivity events unavailable, relying on probe only");
            }
        }

        let fetched = match self.config.probe_timeout() {
            Some(limit) => match tokio::time::timeout(limit, self.probe.fetch_once()).await {
                Ok(result) => result,
                Err(_) => Err(ShopStateError::probe_unavailable(format!(
                    "no answer within {:?}",
                    limit
                ))),
            },
            None => self.probe.fetch_once().await,
        };

        match fetched {
            Ok(raw) => {
                let ticket = self.shared.stamp_for(generation);
                self.shared.commit(ticket, ObservationSource::Probe, raw);
            }
            Err(e) => {
                warn!(error = %e, "connectivity probe failed, keeping last snapshot");
                lock(&self.shared.stats).probe_failures += 1;
            }
        }
    }

    /// Release the OS subscription; no listener runs afterwards
    ///
    /// Idempotent, and safe to call on a monitor that never started.
    pub fn stop(&self) {
        let was_running = {
            let mut state = lock(&self.shared.state);
            std::mem::replace(&mut state.running, false)
        };
        let handle = lock(&self.subscription).take();
        if let Some(handle) = handle {
            handle.cancel();
        }
        if was_running {
            info!("stopped network status monitor");
        }
    }

    /// Draw an arrival ticket for a reading that will be committed later
    pub fn stamp(&self) -> ArrivalTicket {
        let generation = lock(&self.shared.state).generation;
        self.shared.stamp_for(generation)
    }

    /// Apply a reading stamped with `ticket`; false if it was stale or the
    /// monitor is not running in the ticket's generation
    pub fn commit(
        &self,
        ticket: ArrivalTicket,
        source: ObservationSource,
        raw: RawConnectivityState,
    ) -> bool {
        self.shared.commit(ticket, source, raw)
    }

    /// Register a listener called with the full snapshot on every transition
    pub fn on_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectivitySnapshot) + Send + Sync + 'static,
    {
        self.shared.observers.subscribe(listener)
    }

    /// Alias of [`NetworkStatusMonitor::on_change`]
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectivitySnapshot) + Send + Sync + 'static,
    {
        self.on_change(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.observers.unsubscribe(id)
    }

    /// Current snapshot
    pub fn snapshot(&self) -> ConnectivitySnapshot {
        lock(&self.shared.state).snapshot
    }

    pub fn is_connected(&self) -> bool {
        self.snapshot().is_connected
    }

    pub fn is_internet_reachable(&self) -> bool {
        self.snapshot().is_internet_reachable
    }

    pub fn transport_type(&self) -> TransportType {
        self.snapshot().transport_type
    }

    pub fn signal_strength(&self) -> Option<u8> {
        self.snapshot().signal_strength
    }

    pub fn is_wifi(&self) -> bool {
        self.snapshot().is_wifi()
    }

    pub fn is_cellular(&self) -> bool {
        self.snapshot().is_cellular()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.state).running
    }

    /// Sequence of the reading behind the current snapshot (0 if none yet)
    pub fn last_sequence(&self) -> u64 {
        lock(&self.shared.state).applied_sequence
    }

    /// Get monitor statistics
    pub fn statistics(&self) -> MonitorStats {
        lock(&self.shared.stats).clone()
    }
}

impl fmt::Debug for NetworkStatusMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkStatusMonitor")
            .field("snapshot", &self.snapshot())
            .field("running", &self.is_running())
            .field("last_sequence", &self.last_sequence())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Statistics for the network monitor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub probes_applied: u64,
    pub events_applied: u64,
    /// Readings that lost to a newer arrival
    pub stale_discarded: u64,
    /// Readings that arrived while stopped or from an earlier generation
    pub dropped_after_stop: u64,
    pub probe_failures: u64,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
