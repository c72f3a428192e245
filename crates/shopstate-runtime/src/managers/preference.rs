//! Persistent reactive preference store
//!
//! Owns one named scalar preference (for example the selected city). The
//! value is loaded once from durable storage at startup, and every later
//! change is written durably before it becomes visible to readers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use shopstate_core::{
    DurableKeyValueStore, Preference, PreferenceConfig, ShopStateError, ShopStateResult,
};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::observers::{ListenerId, ObserverRegistry};

// ----------------------------------------------------------------------------
// Preference Store
// ----------------------------------------------------------------------------

/// Reactive single-value preference backed by a durable store
///
/// Readers never block on I/O: `current_value` always answers from memory.
/// `initialize` runs at most one load per store; `set` calls are serialized
/// against each other and against that load.
pub struct PreferenceStore {
    config: PreferenceConfig,
    storage: Arc<dyn DurableKeyValueStore>,
    state: RwLock<Preference>,
    observers: ObserverRegistry<String>,
    write_gate: tokio::sync::Mutex<()>,
    init: OnceCell<()>,
    user_committed: AtomicBool,
    stats: Mutex<PreferenceStats>,
}

impl PreferenceStore {
    /// Create a store holding the configured default; call `initialize` to load
    pub fn new(
        config: PreferenceConfig,
        storage: Arc<dyn DurableKeyValueStore>,
    ) -> ShopStateResult<Self> {
        config.validate()?;
        let state = Preference::new(config.default_value.clone(), config.valid_values.clone());

        Ok(Self {
            config,
            storage,
            state: RwLock::new(state),
            observers: ObserverRegistry::new(),
            write_gate: tokio::sync::Mutex::new(()),
            init: OnceCell::new(),
            user_committed: AtomicBool::new(false),
            stats: Mutex::new(PreferenceStats::default()),
        })
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Preference> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Preference> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update_stats<F: FnOnce(&mut PreferenceStats)>(&self, f: F) {
        let mut stats = self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut stats);
    }

    /// Load the persisted value, once per store
    ///
    /// Absent values, unreadable storage and values outside the valid set all
    /// leave the default in place; none of them is an error for the caller.
    /// Concurrent and repeated calls share the single load.
    pub async fn initialize(&self) {
        self.init.get_or_init(|| self.load()).await;
    }

    async fn load(&self) {
        let _gate = self.write_gate.lock().await;
        let key = self.config.key.as_str();

        let stored = match self.storage.get(key).await {
            Ok(Some(value)) if self.read_state().accepts(&value) => Some(value),
            Ok(Some(value)) => {
                warn!(key, value = %value, "stored preference is not a valid value, using default");
                None
            }
            Ok(None) => {
                debug!(key, "no stored preference, using default");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "failed to load preference, using default");
                self.update_stats(|s| s.load_failures += 1);
                None
            }
        };

        let changed = {
            let mut state = self.write_state();
            state.loaded = true;
            match stored {
                // A set that committed first is never overwritten by the load
                Some(value)
                    if !self.user_committed.load(Ordering::SeqCst) && state.value != value =>
                {
                    state.value = value.clone();
                    Some(value)
                }
                _ => None,
            }
        };
        self.update_stats(|s| s.loads += 1);

        if let Some(value) = changed {
            info!(key, value = %value, "loaded preference");
            self.observers.notify(&value);
        }
    }

    /// Check a candidate value without touching storage
    pub fn check(&self, value: &str) -> ShopStateResult<()> {
        if self.read_state().accepts(value) {
            Ok(())
        } else {
            Err(ShopStateError::invalid_value(&self.config.key, value))
        }
    }

    /// Persist `value`, then make it current and notify subscribers
    ///
    /// Values outside the valid set are rejected before storage is touched.
    /// If the durable write fails the in-memory value is left unchanged.
    pub async fn set<V: Into<String>>(&self, value: V) -> ShopStateResult<()> {
        let value = value.into();
        if let Err(e) = self.check(&value) {
            self.update_stats(|s| s.rejected += 1);
            return Err(e);
        }

        let _gate = self.write_gate.lock().await;
        let key = self.config.key.as_str();

        if let Err(e) = self.storage.set(key, value.clone()).await {
            warn!(key, value = %value, error = %e, "failed to persist preference");
            self.update_stats(|s| s.write_failures += 1);
            return Err(e.into());
        }

        {
            let mut state = self.write_state();
            state.value = value.clone();
        }
        self.user_committed.store(true, Ordering::SeqCst);
        self.update_stats(|s| s.writes_committed += 1);

        debug!(key, value = %value, "committed preference");
        self.observers.notify(&value);
        Ok(())
    }

    /// Current value; never blocks on storage
    pub fn current_value(&self) -> String {
        self.read_state().value.clone()
    }

    /// Valid values in display order
    pub fn valid_values(&self) -> &[String] {
        &self.config.valid_values
    }

    /// Whether the startup load has completed
    pub fn is_loaded(&self) -> bool {
        self.read_state().loaded
    }

    /// Copy of the full preference state
    pub fn snapshot(&self) -> Preference {
        self.read_state().clone()
    }

    pub fn key(&self) -> &str {
        &self.config.key
    }

    pub fn default_value(&self) -> &str {
        &self.config.default_value
    }

    /// Register a listener called with the new value on every change
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.observers.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Get store statistics
    pub fn statistics(&self) -> PreferenceStats {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Statistics for a preference store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferenceStats {
    /// Completed startup loads (0 or 1)
    pub loads: u64,
    /// Loads that fell back to the default because storage failed
    pub load_failures: u64,
    /// Values persisted and committed
    pub writes_committed: u64,
    /// Durable writes that failed
    pub write_failures: u64,
    /// Values rejected as invalid
    pub rejected: u64,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use shopstate_core::MemoryStore;
    use std::sync::atomic::AtomicUsize;

    fn city_store(storage: &MemoryStore) -> PreferenceStore {
        PreferenceStore::new(PreferenceConfig::city(), Arc::new(storage.clone())).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_loads_stored_value_and_notifies() {
        let storage = MemoryStore::with_entries([("selectedCity", "Pune")]);
        let store = city_store(&storage);
        assert_eq!(store.current_value(), "Mumbai");
        assert!(!store.is_loaded());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.subscribe(move |v| sink.lock().unwrap().push(v.clone()));

        store.initialize().await;
        assert_eq!(store.current_value(), "Pune");
        assert!(store.is_loaded());
        assert_eq!(*seen.lock().unwrap(), vec!["Pune".to_string()]);
    }

    #[tokio::test]
    async fn test_initialize_keeps_default_when_absent_or_unreadable() {
        let storage = MemoryStore::new();
        let store = city_store(&storage);
        store.initialize().await;
        assert_eq!(store.current_value(), "Mumbai");
        assert!(store.is_loaded());

        let storage = MemoryStore::with_entries([("selectedCity", "Delhi")]);
        storage.fail_reads(true);
        let store = city_store(&storage);
        store.initialize().await;
        assert_eq!(store.current_value(), "Mumbai");
        assert!(store.is_loaded());
        assert_eq!(store.statistics().load_failures, 1);
    }

    #[tokio::test]
    async fn test_initialize_ignores_stored_value_outside_valid_set() {
        let storage = MemoryStore::with_entries([("selectedCity", "Atlantis")]);
        let store = city_store(&storage);
        store.initialize().await;
        assert_eq!(store.current_value(), "Mumbai");
    }

    #[tokio::test]
    async fn test_initialize_runs_once() {
        let storage = MemoryStore::with_entries([("selectedCity", "Chennai")]);
        let store = city_store(&storage);

        futures::future::join_all((0..4).map(|_| store.initialize())).await;
        storage.insert("selectedCity", "Kolkata");
        store.initialize().await;

        assert_eq!(store.current_value(), "Chennai");
        assert_eq!(store.statistics().loads, 1);
    }

    #[tokio::test]
    async fn test_set_racing_initialize_is_not_overwritten() {
        let storage = MemoryStore::with_entries([("selectedCity", "Pune")]);
        let store = city_store(&storage);

        let (_, result) = tokio::join!(store.initialize(), store.set("Delhi"));
        result.unwrap();

        assert_eq!(store.current_value(), "Delhi");
        assert_eq!(storage.peek("selectedCity").as_deref(), Some("Delhi"));
    }

    #[tokio::test]
    async fn test_set_invalid_value_never_touches_storage() {
        let storage = MemoryStore::new();
        let store = city_store(&storage);
        store.initialize().await;

        let err = store.set("Atlantis").await.unwrap_err();
        assert!(err.is_invalid_value());
        assert_eq!(store.current_value(), "Mumbai");
        assert_eq!(storage.write_count(), 0);
        assert_eq!(store.statistics().rejected, 1);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_value_unchanged() {
        let storage = MemoryStore::new();
        let store = city_store(&storage);
        store.initialize().await;

        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        storage.fail_writes(true);
        let err = store.set("Delhi").await.unwrap_err();
        assert!(err.is_persistence());
        assert_eq!(store.current_value(), "Mumbai");
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        assert_eq!(store.statistics().write_failures, 1);
    }

    #[tokio::test]
    async fn test_every_valid_value_survives_restart() {
        let storage = MemoryStore::new();

        for city in PreferenceConfig::city().valid_values {
            let store = city_store(&storage);
            store.initialize().await;
            store.set(city.as_str()).await.unwrap();

            let restarted = city_store(&storage);
            restarted.initialize().await;
            assert_eq!(restarted.current_value(), city);
        }
    }

    #[tokio::test]
    async fn test_unsubscribed_listener_is_not_notified() {
        let store = city_store(&MemoryStore::new());
        let notified = Arc::new(AtomicUsize::new(0));

        let counter = notified.clone();
        let id = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        store.set("Delhi").await.unwrap();
        assert!(store.unsubscribe(id));
        store.set("Pune").await.unwrap();

        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(store.statistics().writes_committed, 2);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = PreferenceConfig::new("selectedCity", "Atlantis", ["Mumbai"]);
        assert!(PreferenceStore::new(config, Arc::new(MemoryStore::new())).is_err());
    }
}
