//! Thread registry implementation
//!
//! The central catalog of managed units, grouped by category.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::error::RegistryError;
use super::key::{UnitCategory, UnitKey};
use super::unit::{RestartableUnit, UnitHandle, UnitState};

/// Central registry for all managed units
///
/// Thread-safe via `RwLock`. Reads hand out snapshot copies, so callers
/// iterate without holding the lock while other threads register or remove
/// units.
pub struct ThreadRegistry {
    /// Units per category, in registration order
    units: RwLock<HashMap<UnitCategory, Vec<UnitHandle>>>,
}

impl ThreadRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            units: RwLock::new(HashMap::new()),
        }
    }

    /// Register a unit under its category
    ///
    /// Returns an error if a unit with the same category and name exists.
    /// The existing unit is left untouched.
    pub fn register(&self, unit: RestartableUnit) -> Result<UnitHandle, RegistryError> {
        let key = unit.key().clone();
        let mut units = self.units.write();
        let bucket = units.entry(key.category).or_default();

        if bucket.iter().any(|existing| existing.key() == &key) {
            tracing::error!(unit = %key, "Duplicate unit registration");
            return Err(RegistryError::DuplicateUnit(key));
        }

        let handle = UnitHandle::new(Arc::new(unit));
        bucket.push(handle.clone());

        tracing::debug!(
            unit = %key,
            supervised = handle.is_supervised(),
            stoppable = handle.is_stoppable(),
            "Unit registered"
        );

        Ok(handle)
    }

    /// Start a registered unit; no-op if it is already running
    pub fn start(&self, handle: &UnitHandle) -> Result<bool, RegistryError> {
        handle.start()
    }

    /// Request a registered unit to stop
    pub fn request_stop(&self, handle: &UnitHandle) -> UnitState {
        handle.request_stop()
    }

    /// Wait up to `timeout` for a unit's execution to return
    pub fn join(&self, handle: &UnitHandle, timeout: Duration) -> bool {
        handle.join(timeout)
    }

    /// Get a unit by key
    pub fn get(&self, key: &UnitKey) -> Option<UnitHandle> {
        self.units
            .read()
            .get(&key.category)
            .and_then(|bucket| bucket.iter().find(|handle| handle.key() == key).cloned())
    }

    /// Snapshot of the units in a category, in registration order
    pub fn list(&self, category: UnitCategory) -> Vec<UnitHandle> {
        self.units
            .read()
            .get(&category)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every unit, grouped by category
    pub fn list_all(&self) -> Vec<UnitHandle> {
        let units = self.units.read();
        UnitCategory::ALL
            .iter()
            .filter_map(|category| units.get(category))
            .flat_map(|bucket| bucket.iter().cloned())
            .collect()
    }

    /// Remove a unit from the catalog
    ///
    /// The unit itself is not stopped; callers stop and join it first.
    pub fn remove(&self, key: &UnitKey) -> Option<UnitHandle> {
        let mut units = self.units.write();
        let bucket = units.get_mut(&key.category)?;
        let index = bucket.iter().position(|handle| handle.key() == key)?;
        let handle = bucket.remove(index);

        tracing::debug!(unit = %key, "Unit removed");

        Some(handle)
    }

    /// Remove and return every unit of a category, in registration order
    pub fn drain(&self, category: UnitCategory) -> Vec<UnitHandle> {
        self.units.write().remove(&category).unwrap_or_default()
    }

    /// Number of units in a category
    pub fn count(&self, category: UnitCategory) -> usize {
        self.units.read().get(&category).map_or(0, Vec::len)
    }

    /// Total number of units
    pub fn len(&self) -> usize {
        self.units.read().values().map(Vec::len).sum()
    }

    /// Whether the registry holds no units
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get unit counts by state
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for handle in self.list_all() {
            let snapshot = handle.snapshot();
            stats.total += 1;
            stats.restarts += snapshot.restarts;
            match snapshot.state {
                UnitState::Created => stats.created += 1,
                UnitState::Running => stats.running += 1,
                UnitState::Stopping => stats.stopping += 1,
                UnitState::Stopped => stats.stopped += 1,
                UnitState::Abandoned => stats.abandoned += 1,
            }
        }
        stats
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Unit counts by state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Total registered units
    pub total: usize,
    /// Units never started
    pub created: usize,
    /// Units with an execution in flight
    pub running: usize,
    /// Units asked to stop, still running
    pub stopping: usize,
    /// Units with no execution in flight
    pub stopped: usize,
    /// Units abandoned at stop
    pub abandoned: usize,
    /// Sum of watchdog restarts across units
    pub restarts: u64,
}
