//! Connectivity types and the OS probe abstraction
//!
//! The OS connectivity facility reports loosely-typed [`RawConnectivityState`]
//! readings, both from a one-shot fetch and from a change-event subscription.
//! They are normalized into an immutable [`ConnectivitySnapshot`] that is
//! replaced wholesale on every observation.

use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

// ----------------------------------------------------------------------------
// Transport Type
// ----------------------------------------------------------------------------

/// Kind of network transport currently in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Wifi,
    Cellular,
    Other,
    #[default]
    Unknown,
}

impl TransportType {
    /// Classify an OS transport label; anything unrecognized (including
    /// `"none"`) is `Other`
    pub fn from_label(label: &str) -> Self {
        match label {
            "wifi" => TransportType::Wifi,
            "cellular" => TransportType::Cellular,
            "unknown" => TransportType::Unknown,
            _ => TransportType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Wifi => "wifi",
            TransportType::Cellular => "cellular",
            TransportType::Other => "other",
            TransportType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Raw OS Reading
// ----------------------------------------------------------------------------

/// Transport-specific details reported with a reading
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDetails {
    /// Signal strength (0-100) where the platform reports one
    pub strength: Option<u8>,
}

/// A reading as delivered by the OS connectivity facility
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConnectivityState {
    pub is_connected: Option<bool>,
    pub is_internet_reachable: Option<bool>,
    #[serde(rename = "type")]
    pub transport: String,
    pub details: Option<ConnectionDetails>,
}

impl RawConnectivityState {
    /// Create a reading for a transport label with every other field absent
    pub fn new<T: Into<String>>(transport: T) -> Self {
        Self {
            transport: transport.into(),
            ..Self::default()
        }
    }

    pub fn connected(mut self, connected: bool) -> Self {
        self.is_connected = Some(connected);
        self
    }

    pub fn reachable(mut self, reachable: bool) -> Self {
        self.is_internet_reachable = Some(reachable);
        self
    }

    pub fn strength(mut self, strength: u8) -> Self {
        self.details = Some(ConnectionDetails {
            strength: Some(strength),
        });
        self
    }
}

// ----------------------------------------------------------------------------
// Connectivity Snapshot
// ----------------------------------------------------------------------------

/// Consistent, immutable view of connectivity at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivitySnapshot {
    pub is_connected: bool,
    pub is_internet_reachable: bool,
    pub transport_type: TransportType,
    pub signal_strength: Option<u8>,
}

impl Default for ConnectivitySnapshot {
    /// Optimistic placeholder used until the first real reading arrives,
    /// so the UI does not flash an offline state on startup
    fn default() -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: true,
            transport_type: TransportType::Unknown,
            signal_strength: None,
        }
    }
}

impl ConnectivitySnapshot {
    /// Normalize a raw reading. Absent booleans become `false`, unlike the
    /// optimistic initial default.
    pub fn from_raw(raw: &RawConnectivityState) -> Self {
        Self {
            is_connected: raw.is_connected.unwrap_or(false),
            is_internet_reachable: raw.is_internet_reachable.unwrap_or(false),
            transport_type: TransportType::from_label(&raw.transport),
            signal_strength: raw.details.as_ref().and_then(|d| d.strength),
        }
    }

    pub fn is_wifi(&self) -> bool {
        self.transport_type == TransportType::Wifi
    }

    pub fn is_cellular(&self) -> bool {
        self.transport_type == TransportType::Cellular
    }

    /// Connected and able to reach the internet
    pub fn is_online(&self) -> bool {
        self.is_connected && self.is_internet_reachable
    }
}

impl From<&RawConnectivityState> for ConnectivitySnapshot {
    fn from(raw: &RawConnectivityState) -> Self {
        Self::from_raw(raw)
    }
}

// ----------------------------------------------------------------------------
// Subscription Handle
// ----------------------------------------------------------------------------

/// Callback invoked by the OS facility on every connectivity change
pub type ConnectivityCallback = Arc<dyn Fn(RawConnectivityState) + Send + Sync>;

/// Releases an OS subscription exactly once, on `cancel` or on drop
pub struct SubscriptionHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    /// Wrap the facility's unsubscribe function
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Release the subscription now
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Connectivity Probe Trait
// ----------------------------------------------------------------------------

/// OS-level connectivity facility
///
/// Implementations wrap the platform API. Failures of either operation are
/// reported as `ShopStateError::ProbeUnavailable`.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// One-shot read of the current connectivity
    async fn fetch_once(&self) -> Result<RawConnectivityState>;

    /// Subscribe to connectivity-change events; dropping or cancelling the
    /// returned handle ends the subscription
    fn subscribe(&self, callback: ConnectivityCallback) -> Result<SubscriptionHandle>;
}
