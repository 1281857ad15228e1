//! Tessera ECS -- slot-recycling component storage with entity and family
//! indices.
//!
//! Components live in one flat array of slots. Each component records its
//! slot, its owning entity and its family, and the store keeps two derived
//! indices (entity -> slots, family -> slots) in step with the array on every
//! mutation. Deleted slots are tombstoned and reused FIFO; tombstones at the
//! tail are compacted away. Entity ids come from a recycling
//! [`EntityAllocator`](entity::EntityAllocator) that also supports creation
//! under an externally chosen id, so two stores can mirror each other's
//! entities.
//!
//! Handles returned by the store are reference counted. While any handle to
//! a slot is alive the store refuses to delete, replace or detach it.
//!
//! # Quick Start
//!
//! ```
//! use tessera_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, Default)]
//! struct Position { x: f32, y: f32 }
//!
//! impl Kind for Position {
//!     const FAMILY: FamilyId = FamilyId(1);
//! }
//!
//! let mut store = ComponentStore::new();
//! let ship = store.create_entity();
//!
//! let pos = store.create::<Position>(ship).unwrap();
//! pos.write::<Position>().unwrap().x = 3.0;
//! drop(pos);
//!
//! let found = store.first_of::<Position>(ship).unwrap();
//! assert_eq!(found.read::<Position>().unwrap().x, 3.0);
//! assert_eq!(store.count(ship, FamilyId(1)), 1);
//! ```

#![forbid(unsafe_code)]

pub mod component;
pub mod config;
pub mod entity;
pub mod query;
pub mod store;
pub mod validate;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by store and allocator operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The reserved id 0 was used where a real entity is required.
    #[error("entity {entity:?} is the reserved null id")]
    InvalidEntity { entity: entity::EntityId },

    /// The entity is not currently held by the allocator.
    #[error("entity {entity:?} does not exist (retired or never allocated)")]
    StaleEntity { entity: entity::EntityId },

    /// `create_under` was asked for an id that is already live.
    #[error("entity {entity:?} already exists")]
    AlreadyExists { entity: entity::EntityId },

    /// The entity id is above the configured or absolute limit.
    #[error("entity {entity:?} is above the id limit {limit:?}")]
    EntityOutOfRange {
        entity: entity::EntityId,
        limit: entity::EntityId,
    },

    /// No live component has this family.
    #[error("no live component of family {family}")]
    UnknownFamily { family: component::FamilyId },

    /// A factory could not build a component of this kind name.
    #[error("component kind '{name}' is not registered")]
    UnknownKind { name: String },

    /// A kind name is already registered to a different type.
    #[error("component kind '{name}' is already registered to another type")]
    DuplicateKind { name: String },

    /// The slot is still referenced by handles outside the store.
    #[error("slot {slot} is still held by {holders} handle(s)")]
    OwnershipConflict {
        slot: component::SlotId,
        holders: usize,
    },

    /// The slot is tombstoned or out of range.
    #[error("slot {slot} holds no live component")]
    VacantSlot { slot: component::SlotId },

    /// An index invariant does not hold.
    #[error("component store is inconsistent: {0}")]
    Inconsistent(#[from] validate::Violation),

    /// A configuration document could not be parsed.
    #[error("invalid store configuration: {details}")]
    Config { details: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{
        ComponentData, ComponentFactory, ComponentHandle, FamilyId, Kind, KindInfo, KindRegistry,
        OwnedComponent, SlotId,
    };
    pub use crate::config::StoreConfig;
    pub use crate::entity::{EntityAllocator, EntityId};
    pub use crate::query::StoreStats;
    pub use crate::store::ComponentStore;
    pub use crate::validate::Violation;
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
