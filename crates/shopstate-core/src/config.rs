//! Centralized Configuration Management
//!
//! Configuration for the three state components, with presets for the
//! usual deployment profiles. Everything is serde-serializable so a host can
//! ship overrides as JSON.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::connectivity::ConnectivitySnapshot;
use crate::errors::{Result, ShopStateError};

/// Storage key of the selected-city preference
pub const CITY_STORAGE_KEY: &str = "selectedCity";

/// City selected until the user picks one
pub const DEFAULT_CITY: &str = "Mumbai";

/// Cities offered by the city selector, in display order
pub const AVAILABLE_CITIES: [&str; 7] = [
    "Mumbai",
    "Delhi",
    "Bangalore",
    "Chennai",
    "Hyderabad",
    "Kolkata",
    "Pune",
];

/// Frame budget for a 60 updates-per-second target
pub const DEFAULT_FRAME_BUDGET_MS: u64 = 16;

// ----------------------------------------------------------------------------
// Preference Configuration
// ----------------------------------------------------------------------------

/// Definition of one persisted single-value preference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceConfig {
    /// Key in the durable store
    pub key: String,
    /// Compile-time default, current until a stored value loads
    pub default_value: String,
    /// Accepted values in display order
    pub valid_values: Vec<String>,
}

impl Default for PreferenceConfig {
    fn default() -> Self {
        Self::city()
    }
}

impl PreferenceConfig {
    /// Create a preference definition
    pub fn new<K, D, I, V>(key: K, default_value: D, valid_values: I) -> Self
    where
        K: Into<String>,
        D: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            key: key.into(),
            default_value: default_value.into(),
            valid_values: valid_values.into_iter().map(Into::into).collect(),
        }
    }

    /// The selected-city preference
    pub fn city() -> Self {
        Self::new(CITY_STORAGE_KEY, DEFAULT_CITY, AVAILABLE_CITIES)
    }

    /// Check the definition is internally consistent
    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(ShopStateError::config_error("preference key is empty"));
        }
        if self.valid_values.is_empty() {
            return Err(ShopStateError::config_error(format!(
                "preference {} has no valid values",
                self.key
            )));
        }
        if !self.valid_values.contains(&self.default_value) {
            return Err(ShopStateError::config_error(format!(
                "default {:?} of preference {} is not a valid value",
                self.default_value, self.key
            )));
        }
        for (i, value) in self.valid_values.iter().enumerate() {
            if self.valid_values[..i].contains(value) {
                return Err(ShopStateError::config_error(format!(
                    "preference {} lists {:?} twice",
                    self.key, value
                )));
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Network Monitor Configuration
// ----------------------------------------------------------------------------

/// Configuration for the network status monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Snapshot reported before the first real reading arrives
    pub initial_snapshot: ConnectivitySnapshot,
    /// Give up on the one-shot probe after this many milliseconds
    pub probe_timeout_ms: Option<u64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            initial_snapshot: ConnectivitySnapshot::default(),
            probe_timeout_ms: Some(5_000),
        }
    }
}

impl MonitorConfig {
    pub fn probe_timeout(&self) -> Option<Duration> {
        self.probe_timeout_ms.map(Duration::from_millis)
    }

    /// Wait for the probe indefinitely (deterministic tests)
    pub fn testing() -> Self {
        Self {
            probe_timeout_ms: None,
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Render Timing Configuration
// ----------------------------------------------------------------------------

/// Configuration for render-timing instrumentation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Record timings at all
    pub enabled: bool,
    /// Updates slower than this many milliseconds raise a warning
    pub frame_budget_ms: u64,
    /// Emit an info observation for each mount
    pub log_mounts: bool,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frame_budget_ms: DEFAULT_FRAME_BUDGET_MS,
            log_mounts: true,
        }
    }
}

impl TimingConfig {
    pub fn frame_budget(&self) -> Duration {
        Duration::from_millis(self.frame_budget_ms)
    }

    /// Instrumentation off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Warnings only, no mount chatter
    pub fn quiet() -> Self {
        Self {
            log_mounts: false,
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Top-level Configuration
// ----------------------------------------------------------------------------

/// Configuration for the whole state layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShopStateConfig {
    pub city: PreferenceConfig,
    pub network: MonitorConfig,
    pub timing: TimingConfig,
}

impl ShopStateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full instrumentation
    pub fn development() -> Self {
        Self::default()
    }

    /// Render timing disabled
    pub fn production() -> Self {
        Self {
            timing: TimingConfig::disabled(),
            ..Self::default()
        }
    }

    /// No probe timeout so tests control resolution
    pub fn testing() -> Self {
        Self {
            network: MonitorConfig::testing(),
            ..Self::default()
        }
    }

    pub fn with_city(mut self, city: PreferenceConfig) -> Self {
        self.city = city;
        self
    }

    pub fn with_network(mut self, network: MonitorConfig) -> Self {
        self.network = network;
        self
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Validate all sections
    pub fn validate(&self) -> Result<()> {
        self.city.validate()?;

        if self.timing.frame_budget_ms == 0 {
            return Err(ShopStateError::config_error("frame budget must be non-zero"));
        }
        if self.network.probe_timeout_ms == Some(0) {
            return Err(ShopStateError::config_error("probe timeout must be non-zero"));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration; missing sections take defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ShopStateError::config_error(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}
