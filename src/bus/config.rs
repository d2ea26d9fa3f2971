//! Event bus configuration

use serde::Deserialize;

/// What to drop when a subscriber's buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered item to make room
    #[default]
    DropOldest,
    /// Discard the item being published
    DropNewest,
}

/// Event bus configuration options
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-subscriber buffer capacity
    pub subscriber_capacity: usize,

    /// Policy applied when a subscriber's buffer is full
    pub overflow: OverflowPolicy,

    /// Deliver `a/b/c` to subscribers of `a/b` and `a` as well
    pub hierarchical: bool,

    /// Maximum items delivered per scheduled drain before yielding
    pub max_batch: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 100,
            overflow: OverflowPolicy::DropOldest,
            hierarchical: true,
            max_batch: 32,
        }
    }
}

impl BusConfig {
    /// Set the per-subscriber capacity
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity;
        self
    }

    /// Set the overflow policy
    pub fn overflow(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    /// Only deliver to exact topic matches
    pub fn flat(mut self) -> Self {
        self.hierarchical = false;
        self
    }

    /// Set the delivery batch size
    pub fn max_batch(mut self, max: usize) -> Self {
        self.max_batch = max.max(1);
        self
    }
}
