//! shopstate Core
//!
//! Stable API definitions for the client-side reactive state layer:
//! the data model, the traits through which the layer talks to its external
//! collaborators (durable key-value storage, the OS connectivity facility,
//! the observability sink and the clock), the error taxonomy and the
//! centralized configuration.
//!
//! The engine that turns these into live, observable state lives in
//! `shopstate-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod connectivity;
pub mod errors;
pub mod observability;
pub mod storage;
pub mod types;

#[cfg(feature = "testing")]
pub mod testing;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{MonitorConfig, PreferenceConfig, ShopStateConfig, TimingConfig};
pub use connectivity::{
    ConnectionDetails, ConnectivityCallback, ConnectivityProbe, ConnectivitySnapshot,
    RawConnectivityState, SubscriptionHandle, TransportType,
};
pub use errors::{PersistenceError, Result, ShopStateError, ShopStateResult};
pub use observability::{default_sink, NoOpSink, ObservationSink, TracingSink};
pub use storage::{DurableKeyValueStore, JsonFileStore, MemoryStore};
pub use types::{MonotonicTimeSource, Preference, TimeSource, Timestamp};
