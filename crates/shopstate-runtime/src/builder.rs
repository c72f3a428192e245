//! App State Builder API
//!
//! Wires the storage backend, connectivity facility, observation sink and
//! clock into the three managers and hands back an [`AppState`] that the
//! application shell starts once at launch.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use shopstate_core::{
    default_sink, ConnectivityCallback, ConnectivityProbe, DurableKeyValueStore, MemoryStore,
    MonotonicTimeSource, ObservationSink, RawConnectivityState, ShopStateConfig, ShopStateError,
    ShopStateResult, SubscriptionHandle, TimeSource,
};
use tracing::info;

use crate::managers::{NetworkStatusMonitor, PreferenceStore, RenderTimingRecorder};

// ----------------------------------------------------------------------------
// Missing Facility
// ----------------------------------------------------------------------------

/// Stand-in for a platform without a connectivity facility
#[derive(Debug, Default, Clone, Copy)]
struct MissingProbe;

#[async_trait]
impl ConnectivityProbe for MissingProbe {
    async fn fetch_once(&self) -> ShopStateResult<RawConnectivityState> {
        Err(ShopStateError::probe_unavailable("no connectivity facility configured"))
    }

    fn subscribe(&self, _callback: ConnectivityCallback) -> ShopStateResult<SubscriptionHandle> {
        Err(ShopStateError::probe_unavailable("no connectivity facility configured"))
    }
}

// ----------------------------------------------------------------------------
// App State Builder
// ----------------------------------------------------------------------------

/// Builder for the application-wide state layer
pub struct AppStateBuilder {
    config: ShopStateConfig,
    storage: Option<Arc<dyn DurableKeyValueStore>>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    sink: Option<Arc<dyn ObservationSink>>,
    clock: Option<Arc<dyn TimeSource>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self {
            config: ShopStateConfig::default(),
            storage: None,
            probe: None,
            sink: None,
            clock: None,
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: ShopStateConfig) -> Self {
        self.config = config;
        self
    }

    /// Durable storage for the city preference (in-memory if unset)
    pub fn with_storage(mut self, storage: Arc<dyn DurableKeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// OS connectivity facility (treated as missing if unset)
    pub fn with_probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Sink for render timing observations
    pub fn with_sink(mut self, sink: Arc<dyn ObservationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and assemble the managers
    pub fn build(self) -> ShopStateResult<AppState> {
        self.config.validate()?;

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let probe = self.probe.unwrap_or_else(|| Arc::new(MissingProbe));
        let sink = self.sink.unwrap_or_else(default_sink);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicTimeSource::new()));

        let city = PreferenceStore::new(self.config.city.clone(), storage)?;
        let network = NetworkStatusMonitor::new(probe, self.config.network.clone());
        let timings = RenderTimingRecorder::new(clock, sink, self.config.timing.clone());

        Ok(AppState {
            config: self.config,
            city: Arc::new(city),
            network: Arc::new(network),
            timings: Arc::new(timings),
        })
    }

    /// Build, then load the city and start the monitor
    pub async fn build_and_start(self) -> ShopStateResult<AppState> {
        let state = self.build()?;
        state.start().await;
        Ok(state)
    }
}

impl Default for AppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// App State
// ----------------------------------------------------------------------------

/// Handles to the shared state managers
///
/// Cloning the inner `Arc`s is how UI consumers share one instance.
pub struct AppState {
    config: ShopStateConfig,
    city: Arc<PreferenceStore>,
    network: Arc<NetworkStatusMonitor>,
    timings: Arc<RenderTimingRecorder>,
}

impl AppState {
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }

    /// Load the persisted city and start watching connectivity
    pub async fn start(&self) {
        info!("starting shopstate");
        tokio::join!(self.city.initialize(), self.network.start());
    }

    /// Stop the monitor and drop all timing records
    pub fn shutdown(&self) {
        self.network.stop();
        self.timings.clear();
        info!("shopstate shut down");
    }

    pub fn config(&self) -> &ShopStateConfig {
        &self.config
    }

    pub fn city(&self) -> &Arc<PreferenceStore> {
        &self.city
    }

    pub fn network(&self) -> &Arc<NetworkStatusMonitor> {
        &self.network
    }

    pub fn timings(&self) -> &Arc<RenderTimingRecorder> {
        &self.timings
    }

    /// Persist and publish a new selected city
    pub async fn set_city<V: Into<String>>(&self, city: V) -> ShopStateResult<()> {
        self.city.set(city).await
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("city", &self.city.current_value())
            .field("network", &self.network)
            .field("timings", &self.timings)
            .finish()
    }
}
