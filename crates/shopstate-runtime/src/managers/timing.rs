//! Render timing instrumentation
//!
//! Times the render/commit cycle of tracked operations. The first completed
//! cycle of a tracked name is its mount; every later one is an update, and
//! an update slower than the frame budget raises a warning on the
//! observation sink. Instrumentation never fails the timed operation: a
//! missing `begin`, a disabled recorder or a panicking sink are all absorbed.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use shopstate_core::{ObservationSink, TimeSource, TimingConfig, Timestamp};
use tracing::debug;

// ----------------------------------------------------------------------------
// Records and Samples
// ----------------------------------------------------------------------------

/// Per-name timing state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingRecord {
    pub name: String,
    /// Start marker of the open cycle, if any
    pub started_at: Option<Timestamp>,
    /// Duration of the first completed cycle
    pub mount_duration: Option<Duration>,
    /// Completed cycles after the mount
    pub update_count: u64,
    pub last_update_duration: Duration,
}

impl TimingRecord {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            started_at: None,
            mount_duration: None,
            update_count: 0,
            last_update_duration: Duration::ZERO,
        }
    }
}

/// Classification of a completed cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Mount,
    /// The n-th update (1-based)
    Update(u64),
}

/// Result of closing one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingSample {
    pub name: String,
    pub phase: RenderPhase,
    pub duration: Duration,
    /// Update exceeded the frame budget
    pub slow: bool,
}

/// Summary metrics for a tracked name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingMetrics {
    pub name: String,
    /// Duration of the most recent completed cycle
    pub last_duration: Duration,
    pub mount_duration: Option<Duration>,
    pub update_count: u64,
}

fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

// ----------------------------------------------------------------------------
// Render Timing Recorder
// ----------------------------------------------------------------------------

/// Mount/update classifier with frame-budget warnings
pub struct RenderTimingRecorder {
    clock: Arc<dyn TimeSource>,
    sink: Arc<dyn ObservationSink>,
    config: TimingConfig,
    records: DashMap<String, TimingRecord>,
}

impl RenderTimingRecorder {
    pub fn new(
        clock: Arc<dyn TimeSource>,
        sink: Arc<dyn ObservationSink>,
        config: TimingConfig,
    ) -> Self {
        Self {
            clock,
            sink,
            config,
            records: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn frame_budget(&self) -> Duration {
        self.config.frame_budget()
    }

    /// Mark the start of a cycle, replacing any unfinished start marker
    pub fn begin(&self, name: &str) {
        if !self.config.enabled {
            return;
        }
        let now = self.clock.now();
        self.records
            .entry(name.to_string())
            .or_insert_with(|| TimingRecord::new(name))
            .started_at = Some(now);
    }

    /// Close the open cycle for `name` and classify it
    ///
    /// Returns `None` when there is no matching `begin` or the recorder is
    /// disabled.
    pub fn end(&self, name: &str) -> Option<TimingSample> {
        if !self.config.enabled {
            return None;
        }
        let now = self.clock.now();
        let budget = self.config.frame_budget();

        // The map guard is released before the sink runs
        let sample = {
            let mut record = match self.records.get_mut(name) {
                Some(record) => record,
                None => {
                    debug!(name, "end without begin, ignoring");
                    return None;
                }
            };
            let started = match record.started_at.take() {
                Some(started) => started,
                None => {
                    debug!(name, "end without an open cycle, ignoring");
                    return None;
                }
            };
            let duration = now - started;

            if record.mount_duration.is_none() {
                record.mount_duration = Some(duration);
                TimingSample {
                    name: name.to_string(),
                    phase: RenderPhase::Mount,
                    duration,
                    slow: false,
                }
            } else {
                record.update_count += 1;
                record.last_update_duration = duration;
                TimingSample {
                    name: name.to_string(),
                    phase: RenderPhase::Update(record.update_count),
                    duration,
                    slow: duration > budget,
                }
            }
        };

        self.emit(&sample);
        Some(sample)
    }

    fn emit(&self, sample: &TimingSample) {
        let sink = &self.sink;
        let outcome = match sample.phase {
            RenderPhase::Mount if self.config.log_mounts => {
                let message = format!(
                    "{} mounted in {:.2}ms",
                    sample.name,
                    as_millis_f64(sample.duration)
                );
                catch_unwind(AssertUnwindSafe(|| sink.info(&message)))
            }
            RenderPhase::Update(n) if sample.slow => {
                let message = format!(
                    "{} slow render: {:.2}ms (update #{})",
                    sample.name,
                    as_millis_f64(sample.duration),
                    n
                );
                catch_unwind(AssertUnwindSafe(|| sink.warn(&message)))
            }
            _ => Ok(()),
        };

        if outcome.is_err() {
            debug!(name = %sample.name, "observation sink panicked, observation dropped");
        }
    }

    /// Run `f` inside a timed cycle for `name`
    pub fn time<F, R>(&self, name: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _scope = self.scope(name);
        f()
    }

    /// Open a cycle that closes when the returned guard is dropped or finished
    pub fn scope(&self, name: &str) -> TimingScope<'_> {
        self.begin(name);
        TimingScope {
            recorder: self,
            name: name.to_string(),
            finished: false,
        }
    }

    /// Forget `name`; its next cycle is a mount again
    pub fn reset(&self, name: &str) -> bool {
        self.records.remove(name).is_some()
    }

    /// Forget every tracked name
    pub fn clear(&self) {
        self.records.clear();
    }

    /// Copy of the record for `name`
    pub fn record(&self, name: &str) -> Option<TimingRecord> {
        self.records.get(name).map(|r| r.clone())
    }

    /// Summary metrics for `name`
    pub fn metrics(&self, name: &str) -> Option<TimingMetrics> {
        self.records.get(name).map(|r| TimingMetrics {
            name: r.name.clone(),
            last_duration: if r.update_count > 0 {
                r.last_update_duration
            } else {
                r.mount_duration.unwrap_or_default()
            },
            mount_duration: r.mount_duration,
            update_count: r.update_count,
        })
    }

    /// Number of names currently tracked
    pub fn tracked_count(&self) -> usize {
        self.records.len()
    }
}

impl fmt::Debug for RenderTimingRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderTimingRecorder")
            .field("config", &self.config)
            .field("tracked", &self.records.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Timing Scope
// ----------------------------------------------------------------------------

/// Guard pairing a `begin` with exactly one `end`
#[must_use = "the cycle ends as soon as the scope is dropped"]
pub struct TimingScope<'a> {
    recorder: &'a RenderTimingRecorder,
    name: String,
    finished: bool,
}

impl TimingScope<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// End the cycle now and return its sample
    pub fn finish(mut self) -> Option<TimingSample> {
        self.finished = true;
        self.recorder.end(&self.name)
    }
}

impl Drop for TimingScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.recorder.end(&self.name);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
