//! Unit identity types
//!
//! This module defines the keys used to identify managed units and the
//! categories they are grouped under in the registry.

use serde::Deserialize;

/// Category a unit is registered under
///
/// Categories group units for bulk operations such as "stop every camera
/// pipeline" during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitCategory {
    /// Per-camera processing pipeline
    CameraPipeline,
    /// Thread or subprocess watchdog
    Watchdog,
    /// Messaging publisher loop
    Messaging,
    /// Recording retention sweep
    Janitor,
}

impl UnitCategory {
    /// All categories, in the order bulk operations visit them
    pub const ALL: [UnitCategory; 4] = [
        UnitCategory::Watchdog,
        UnitCategory::Janitor,
        UnitCategory::Messaging,
        UnitCategory::CameraPipeline,
    ];

    /// Stable string form used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitCategory::CameraPipeline => "camera-pipeline",
            UnitCategory::Watchdog => "watchdog",
            UnitCategory::Messaging => "messaging",
            UnitCategory::Janitor => "janitor",
        }
    }
}

impl std::fmt::Display for UnitCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier for a unit (category + name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitKey {
    /// Category the unit belongs to
    pub category: UnitCategory,
    /// Unit name (e.g., the camera name)
    pub name: String,
}

impl UnitKey {
    /// Create a new unit key
    pub fn new(category: UnitCategory, name: impl Into<String>) -> Self {
        Self {
            category,
            name: name.into(),
        }
    }

    /// Key for a camera pipeline
    pub fn camera(name: impl Into<String>) -> Self {
        Self::new(UnitCategory::CameraPipeline, name)
    }
}

impl std::fmt::Display for UnitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.category, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = UnitKey::camera("front_door");
        assert_eq!(key.to_string(), "camera-pipeline/front_door");
    }

    #[test]
    fn test_same_name_different_category() {
        let a = UnitKey::new(UnitCategory::CameraPipeline, "x");
        let b = UnitKey::new(UnitCategory::Watchdog, "x");
        assert_ne!(a, b);
    }

    #[test]
    fn test_category_from_config_name() {
        let category: UnitCategory = serde_json::from_str("\"camera-pipeline\"").unwrap();
        assert_eq!(category, UnitCategory::CameraPipeline);
    }
}
