//! Stateful managers for the shopstate runtime
//!
//! Each manager owns one piece of observable client state and the rules for
//! changing it.

pub mod network;
pub mod preference;
pub mod timing;

pub use network::{ArrivalTicket, MonitorStats, NetworkStatusMonitor, ObservationSource};
pub use preference::{PreferenceStats, PreferenceStore};
pub use timing::{
    RenderPhase, RenderTimingRecorder, TimingMetrics, TimingRecord, TimingSample, TimingScope,
};
