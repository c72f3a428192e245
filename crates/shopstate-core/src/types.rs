//! Core types for the shopstate layer
//!
//! Timestamps and the clock abstraction used by render timing, plus the
//! in-memory shape of a persisted single-value preference.

use core::fmt;
use core::ops::Sub;
use core::time::Duration;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Monotonic instant in microseconds relative to a time source's origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, other: Timestamp) -> Duration {
        self.duration_since(other)
    }
}

impl Timestamp {
    /// Create a timestamp from microseconds
    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Create a timestamp from milliseconds
    pub fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1000))
    }

    /// Get the raw microseconds
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Get duration since an earlier timestamp (zero if `other` is later)
    pub fn duration_since(&self, other: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(other.0))
    }

    /// Advance this timestamp by a duration
    pub fn add_duration(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_micros() as u64))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Trait for providing monotonic timestamps
///
/// Render timing only ever compares two readings of the same source, so
/// implementations need to be monotonic but not anchored to wall-clock time.
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Monotonic time source backed by `instant::Instant` (works on wasm targets)
#[derive(Debug, Clone, Copy)]
pub struct MonotonicTimeSource {
    origin: instant::Instant,
}

impl MonotonicTimeSource {
    pub fn new() -> Self {
        Self {
            origin: instant::Instant::now(),
        }
    }
}

impl Default for MonotonicTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::from_micros(self.origin.elapsed().as_micros() as u64)
    }
}

// ----------------------------------------------------------------------------
// Preference
// ----------------------------------------------------------------------------

/// A single named scalar preference and its valid values
///
/// Once `loaded` is true, `value` is either one of `valid_values` or the
/// compile-time default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preference {
    /// Current value
    pub value: String,
    /// Valid values in display order
    pub valid_values: Vec<String>,
    /// Whether the startup load has completed (successfully or not)
    pub loaded: bool,
}

impl Preference {
    /// Create an unloaded preference holding its default
    pub fn new<V: Into<String>>(default_value: V, valid_values: Vec<String>) -> Self {
        Self {
            value: default_value.into(),
            valid_values,
            loaded: false,
        }
    }

    /// Whether `value` is one of the valid values
    pub fn accepts(&self, value: &str) -> bool {
        self.valid_values.iter().any(|v| v == value)
    }
}
