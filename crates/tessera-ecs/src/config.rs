//! Store configuration.

use serde::{Deserialize, Serialize};

use crate::EcsError;

/// Configuration for a [`ComponentStore`](crate::store::ComponentStore).
///
/// Every field has a default, so a JSON document only needs to name the
/// fields it changes:
///
/// ```
/// use tessera_ecs::config::StoreConfig;
///
/// let config = StoreConfig::from_json(r#"{ "slot_capacity": 4096 }"#).unwrap();
/// assert_eq!(config.slot_capacity, 4096);
/// assert!(config.enforce_ownership);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Initial capacity of the primary slot array. Default: 256.
    pub slot_capacity: usize,

    /// Initial capacity of the per-entity index and the entity free-list.
    /// Default: 64.
    pub entity_capacity: usize,

    /// Refuse to delete, replace or detach a slot while external
    /// [`ComponentHandle`](crate::component::ComponentHandle)s to it are
    /// alive. Default: `true`.
    pub enforce_ownership: bool,

    /// Largest entity id accepted by
    /// [`create_entity_under`](crate::store::ComponentStore::create_entity_under)
    /// and as the owner of an attached component. The per-entity index is
    /// dense, so this bounds its length. Default: 2^20 - 1.
    pub max_entity_id: u32,

    /// Run [`validate`](crate::store::ComponentStore::validate) after every
    /// mutation and log violations at `error` level. Meant for debugging;
    /// each check is O(n). Default: `false`.
    pub validate_after_mutation: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            slot_capacity: 256,
            entity_capacity: 64,
            enforce_ownership: true,
            max_entity_id: (1 << 20) - 1,
            validate_after_mutation: false,
        }
    }
}

impl StoreConfig {
    /// Parse a configuration from JSON.
    ///
    /// # Errors
    ///
    /// [`EcsError::Config`] if the document is malformed or a field has the
    /// wrong type.
    pub fn from_json(json: &str) -> Result<Self, EcsError> {
        serde_json::from_str(json).map_err(|e| EcsError::Config {
            details: e.to_string(),
        })
    }

    /// Serialize the configuration to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, EcsError> {
        serde_json::to_string_pretty(self).map_err(|e| EcsError::Config {
            details: e.to_string(),
        })
    }
}
