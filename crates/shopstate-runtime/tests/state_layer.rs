//! Integration tests for the assembled state layer
//!
//! Drives the three managers through `AppState` with scripted storage,
//! connectivity and clock to check the behaviour UI consumers rely on.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shopstate_core::testing::{ManualProbe, MockTimeSource, RecordingSink};
use shopstate_runtime::{
    AppState, JsonFileStore, ListenerId, MemoryStore, ObservationSource, RawConnectivityState,
    RenderPhase, ShopStateConfig, TransportType, AVAILABLE_CITIES, CITY_STORAGE_KEY,
};
use tokio_test::{assert_pending, assert_ready, task};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct Harness {
    state: AppState,
    storage: MemoryStore,
    probe: ManualProbe,
    clock: MockTimeSource,
    sink: RecordingSink,
}

fn harness_with_storage(storage: MemoryStore) -> Harness {
    init_tracing();
    let probe = ManualProbe::new();
    let clock = MockTimeSource::new();
    let sink = RecordingSink::new();

    let state = AppState::builder()
        .with_config(ShopStateConfig::testing())
        .with_storage(Arc::new(storage.clone()))
        .with_probe(Arc::new(probe.clone()))
        .with_time_source(Arc::new(clock.clone()))
        .with_sink(Arc::new(sink.clone()))
        .build()
        .expect("testing config is valid");

    Harness {
        state,
        storage,
        probe,
        clock,
        sink,
    }
}

fn harness() -> Harness {
    harness_with_storage(MemoryStore::new())
}

// ----------------------------------------------------------------------------
// Selected City
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_selected_city_survives_restart_for_every_city() {
    let storage = MemoryStore::new();

    for city in AVAILABLE_CITIES {
        let first = harness_with_storage(storage.clone());
        first.state.city().initialize().await;
        first.state.set_city(city).await.unwrap();
        first.state.shutdown();

        let restarted = harness_with_storage(storage.clone());
        restarted.state.city().initialize().await;
        assert_eq!(restarted.state.city().current_value(), city);
    }
}

#[tokio::test]
async fn test_invalid_city_is_rejected_without_a_write() {
    let h = harness();
    h.state.city().initialize().await;

    let err = h.state.set_city("Springfield").await.unwrap_err();
    assert!(err.is_invalid_value());
    assert_eq!(h.state.city().current_value(), "Mumbai");
    assert_eq!(h.storage.write_count(), 0);
    assert!(h.storage.peek(CITY_STORAGE_KEY).is_none());
}

#[tokio::test]
async fn test_failed_write_surfaces_persistence_error() {
    let h = harness();
    h.state.city().initialize().await;
    h.storage.fail_writes(true);

    let err = h.state.set_city("Delhi").await.unwrap_err();
    assert!(err.is_persistence());
    assert_eq!(h.state.city().current_value(), "Mumbai");

    h.storage.fail_writes(false);
    h.state.set_city("Delhi").await.unwrap();
    assert_eq!(h.state.city().current_value(), "Delhi");
}

#[tokio::test]
async fn test_reader_never_sees_a_value_before_it_is_durable() {
    let storage = MemoryStore::new().with_write_latency(Duration::from_millis(20));
    let h = harness_with_storage(storage);
    h.state.city().initialize().await;
    assert_eq!(h.state.city().current_value(), "Mumbai");

    let done = AtomicBool::new(false);
    let write = async {
        let result = h.state.set_city("Delhi").await;
        done.store(true, Ordering::SeqCst);
        result
    };
    let read = async {
        let mut seen = Vec::new();
        loop {
            let value = h.state.city().current_value();
            let stored = h.storage.peek(CITY_STORAGE_KEY);
            seen.push((value, stored));
            if done.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        seen
    };

    let (result, seen) = tokio::join!(write, read);
    result.unwrap();

    assert!(seen.len() > 2);
    assert_eq!(seen.first().map(|(v, _)| v.as_str()), Some("Mumbai"));
    assert_eq!(seen.last().map(|(v, _)| v.as_str()), Some("Delhi"));
    for (value, stored) in &seen {
        assert!(value == "Mumbai" || value == "Delhi", "unexpected value {}", value);
        if value == "Delhi" {
            assert_eq!(stored.as_deref(), Some("Delhi"));
        }
    }
}

#[tokio::test]
async fn test_subscribers_read_the_value_they_are_notified_with() {
    let h = harness();
    h.state.city().initialize().await;

    let mismatches = Arc::new(AtomicUsize::new(0));
    let notifications = Arc::new(Mutex::new(Vec::new()));
    {
        let city = h.state.city().clone();
        let mismatches = mismatches.clone();
        let notifications = notifications.clone();
        h.state.city().subscribe(move |value| {
            if city.current_value() != *value {
                mismatches.fetch_add(1, Ordering::SeqCst);
            }
            notifications.lock().unwrap().push(value.clone());
        });
    }

    for city in ["Delhi", "Pune", "Chennai"] {
        h.state.set_city(city).await.unwrap();
    }

    assert_eq!(mismatches.load(Ordering::SeqCst), 0);
    assert_eq!(*notifications.lock().unwrap(), vec!["Delhi", "Pune", "Chennai"]);
}

#[tokio::test]
async fn test_city_persists_through_json_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs").join("settings.json");

    let first = AppState::builder()
        .with_config(ShopStateConfig::testing())
        .with_storage(Arc::new(JsonFileStore::new(&path)))
        .build_and_start()
        .await
        .unwrap();
    first.set_city("Kolkata").await.unwrap();
    first.shutdown();

    let second = AppState::builder()
        .with_config(ShopStateConfig::testing())
        .with_storage(Arc::new(JsonFileStore::new(&path)))
        .build_and_start()
        .await
        .unwrap();
    assert_eq!(second.city().current_value(), "Kolkata");
}

// ----------------------------------------------------------------------------
// Connectivity
// ----------------------------------------------------------------------------

#[test]
fn test_event_before_probe_is_overwritten_by_later_probe() {
    let h = harness();
    let observed = Arc::new(Mutex::new(Vec::new()));
    {
        let observed = observed.clone();
        h.state
            .network()
            .on_change(move |snapshot| observed.lock().unwrap().push(snapshot.is_connected));
    }

    let mut start = task::spawn(h.state.start());
    assert_pending!(start.poll());
    assert_eq!(h.probe.pending_fetches(), 1);

    h.probe.emit(RawConnectivityState::new("none").connected(false));
    assert!(!h.state.network().is_connected());
    assert_eq!(h.state.network().transport_type(), TransportType::Other);
    assert_eq!(*observed.lock().unwrap(), vec![false]);

    let wifi = RawConnectivityState::new("wifi")
        .connected(true)
        .reachable(true);
    assert!(h.probe.resolve_fetch(wifi));
    assert_ready!(start.poll());

    assert!(h.state.network().is_connected());
    assert!(h.state.network().is_wifi());
    assert_eq!(*observed.lock().unwrap(), vec![false, true]);
}

#[test]
fn test_probe_reading_older_than_event_is_discarded() {
    let h = harness();
    let monitor = h.state.network().clone();

    let mut start = task::spawn(h.state.start());
    assert_pending!(start.poll());

    // The probe's reading arrives first but is applied after the event
    let probe_ticket = monitor.stamp();
    h.probe.emit(RawConnectivityState::new("cellular").connected(true).strength(3));
    let applied = monitor.commit(
        probe_ticket,
        ObservationSource::Probe,
        RawConnectivityState::new("wifi").connected(false),
    );

    assert!(!applied);
    assert!(monitor.is_cellular());
    assert!(monitor.is_connected());
    assert_eq!(monitor.signal_strength(), Some(3));
    assert_eq!(monitor.statistics().stale_discarded, 1);
}

#[test]
fn test_listener_registered_before_start_gets_first_reading() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        h.state.network().on_change(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }

    let mut start = task::spawn(h.state.start());
    assert_pending!(start.poll());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    h.probe.resolve_fetch(RawConnectivityState::new("wifi").connected(true));
    assert_ready!(start.poll());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_listener_removing_itself_gets_no_further_callbacks() {
    let h = harness();
    let monitor = h.state.network().clone();
    let calls = Arc::new(AtomicUsize::new(0));
    let own_id: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

    let id = {
        let monitor_ref = monitor.clone();
        let calls = calls.clone();
        let own_id = own_id.clone();
        monitor.on_change(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *own_id.lock().unwrap() {
                monitor_ref.unsubscribe(id);
            }
        })
    };
    *own_id.lock().unwrap() = Some(id);

    let mut start = task::spawn(h.state.start());
    assert_pending!(start.poll());
    h.probe.emit(RawConnectivityState::new("wifi").connected(true));
    h.probe.emit(RawConnectivityState::new("cellular").connected(true));
    h.probe.resolve_fetch(RawConnectivityState::new("wifi").connected(true));
    assert_ready!(start.poll());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shutdown_silences_connectivity_listeners() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        h.state.network().on_change(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }

    let mut start = task::spawn(h.state.start());
    assert_pending!(start.poll());
    h.probe.emit(RawConnectivityState::new("wifi").connected(true));
    h.state.shutdown();

    h.probe.emit(RawConnectivityState::new("cellular").connected(true));
    h.probe.resolve_fetch(RawConnectivityState::new("cellular").connected(true));
    assert_ready!(start.poll());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.probe.subscriber_count(), 0);
    assert!(h.state.network().is_wifi());
}

#[test]
fn test_absent_fields_normalize_to_disconnected() {
    let h = harness();
    let mut start = task::spawn(h.state.start());
    assert_pending!(start.poll());

    h.probe.resolve_fetch(RawConnectivityState::new("bluetooth"));
    assert_ready!(start.poll());

    let snapshot = h.state.network().snapshot();
    assert!(!snapshot.is_connected);
    assert!(!snapshot.is_internet_reachable);
    assert_eq!(snapshot.transport_type, TransportType::Other);
    assert_eq!(snapshot.signal_strength, None);
}

// ----------------------------------------------------------------------------
// Render Timing
// ----------------------------------------------------------------------------

#[test]
fn test_mount_then_slow_update() {
    let h = harness();
    let timings = h.state.timings();

    timings.begin("X");
    h.clock.advance_millis(4);
    let mount = timings.end("X").unwrap();
    assert_eq!(mount.phase, RenderPhase::Mount);
    let record = timings.record("X").unwrap();
    assert_eq!(record.mount_duration, Some(Duration::from_millis(4)));
    assert_eq!(record.update_count, 0);

    timings.begin("X");
    h.clock.advance_millis(17);
    let update = timings.end("X").unwrap();
    assert_eq!(update.phase, RenderPhase::Update(1));
    assert_eq!(timings.record("X").unwrap().update_count, 1);

    assert_eq!(h.sink.warnings().len(), 1);
    assert_eq!(h.sink.infos(), vec!["X mounted in 4.00ms".to_string()]);
}

#[test]
fn test_scoped_timing_bounded_by_live_instances() {
    let h = harness();
    let timings = h.state.timings();

    for instance in 0..3 {
        let name = format!("ProductCard#{}", instance);
        let _scope = timings.scope(&name);
        h.clock.advance_millis(1);
    }
    assert_eq!(timings.tracked_count(), 3);

    assert!(timings.reset("ProductCard#1"));
    assert_eq!(timings.tracked_count(), 2);
    assert!(h.sink.warnings().is_empty());
}
