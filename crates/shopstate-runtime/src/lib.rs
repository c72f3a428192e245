//! shopstate Runtime Engine
//!
//! This crate turns the definitions in `shopstate-core` into live state:
//! - `PreferenceStore`: persistent reactive preference (the selected city)
//! - `NetworkStatusMonitor`: reconciled connectivity snapshot
//! - `RenderTimingRecorder`: mount/update render timing with frame-budget warnings
//! - `AppStateBuilder`/`AppState`: wiring and lifecycle for all three

pub mod builder;
pub mod managers;
pub mod observers;

pub use builder::{AppState, AppStateBuilder};
pub use managers::*;
pub use observers::{ListenerId, ObserverRegistry};

// Re-export core types for convenience
pub use shopstate_core::{
    config::{AVAILABLE_CITIES, CITY_STORAGE_KEY, DEFAULT_CITY},
    ConnectivityProbe, ConnectivitySnapshot, DurableKeyValueStore, JsonFileStore, MemoryStore,
    MonitorConfig, ObservationSink, PersistenceError, PreferenceConfig, RawConnectivityState,
    ShopStateConfig, ShopStateError, ShopStateResult, TimingConfig, TransportType,
};
