//! Read-only lookups on a [`ComponentStore`].
//!
//! Three access paths: by slot id, by owning entity, and by family. The
//! combined entity + family lookup can start from either bucket; all entry
//! points return the same set.
//!
//! Every returned [`ComponentHandle`] counts as an external holder of its
//! slot until dropped.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::component::{ComponentCell, ComponentHandle, FamilyId, Kind, SlotId};
use crate::entity::EntityId;
use crate::store::{ComponentStore, Slot};
use crate::EcsError;

/// Point-in-time counters of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Length of the primary array, tombstones included.
    pub slots: usize,
    /// Live components.
    pub live: usize,
    /// Free-list length.
    pub erased: usize,
    /// Allocator size, retired ids and id 0 included.
    pub entity_size: usize,
    /// Live entities, id 0 excluded.
    pub live_entities: usize,
    /// Families with at least one live component.
    pub families: usize,
}

impl ComponentStore {
    fn cell(&self, slot: SlotId) -> Option<&Rc<ComponentCell>> {
        self.slots.get(slot.index()).and_then(Slot::live)
    }

    fn handle(&self, slot: SlotId) -> Option<ComponentHandle> {
        self.cell(slot).map(|cell| ComponentHandle(Rc::clone(cell)))
    }

    fn handles<'a, I>(&self, slots: I) -> Vec<ComponentHandle>
    where
        I: IntoIterator<Item = &'a SlotId>,
    {
        slots.into_iter().filter_map(|&slot| self.handle(slot)).collect()
    }

    fn entity_bucket(&self, entity: EntityId) -> &[SlotId] {
        if !entity.is_valid() {
            return &[];
        }
        self.by_entity
            .get(entity.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn family_bucket(&self, family: FamilyId) -> &[SlotId] {
        self.by_family
            .get(&family)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn has_family(&self, slot: SlotId, family: FamilyId) -> bool {
        self.cell(slot).is_some_and(|cell| cell.family == family)
    }

    fn has_owner(&self, slot: SlotId, entity: EntityId) -> bool {
        self.cell(slot).is_some_and(|cell| cell.owner == entity)
    }

    // -- by slot --------------------------------------------------------------

    /// The live component at `slot`.
    pub fn get(&self, slot: SlotId) -> Option<ComponentHandle> {
        self.handle(slot)
    }

    /// Number of handles to `slot` alive outside the store. Zero for
    /// tombstoned or out-of-range slots.
    pub fn ref_count(&self, slot: SlotId) -> usize {
        self.cell(slot)
            .map(|cell| Rc::strong_count(cell) - 1)
            .unwrap_or(0)
    }

    // -- by entity ------------------------------------------------------------

    /// All components owned by `entity`, in insertion order. Empty for
    /// [`EntityId::NONE`] or an entity without components.
    pub fn components_of_entity(&self, entity: EntityId) -> Vec<ComponentHandle> {
        self.handles(self.entity_bucket(entity))
    }

    /// Slot ids owned by `entity`.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidEntity`] for [`EntityId::NONE`].
    pub fn entity_slots(&self, entity: EntityId) -> Result<&[SlotId], EcsError> {
        if !entity.is_valid() {
            return Err(EcsError::InvalidEntity { entity });
        }
        Ok(self.entity_bucket(entity))
    }

    /// Append `entity`'s components to `out`.
    pub fn append_components_of_entity(
        &self,
        entity: EntityId,
        out: &mut Vec<ComponentHandle>,
    ) -> Result<(), EcsError> {
        let slots = self.entity_slots(entity)?;
        out.extend(slots.iter().filter_map(|&slot| self.handle(slot)));
        Ok(())
    }

    // -- by family ------------------------------------------------------------

    /// All components of `family`. Empty if the family has none.
    pub fn components_of_family(&self, family: FamilyId) -> Vec<ComponentHandle> {
        self.handles(self.family_bucket(family))
    }

    /// Slot ids of `family`.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownFamily`] if no live component has that family.
    pub fn family_slots(&self, family: FamilyId) -> Result<&[SlotId], EcsError> {
        self.by_family
            .get(&family)
            .map(Vec::as_slice)
            .ok_or(EcsError::UnknownFamily { family })
    }

    /// Families with at least one live component, ascending.
    pub fn families(&self) -> Vec<FamilyId> {
        let mut families: Vec<FamilyId> = self.by_family.keys().copied().collect();
        families.sort();
        families
    }

    // -- by entity and family -------------------------------------------------

    /// Components of `family` owned by `entity`, scanning whichever of the
    /// two buckets is smaller.
    pub fn components_of(&self, entity: EntityId, family: FamilyId) -> Vec<ComponentHandle> {
        if self.entity_bucket(entity).len() <= self.family_bucket(family).len() {
            self.components_of_entity_by_family(entity, family)
        } else {
            self.components_of_family_by_entity(entity, family)
        }
    }

    /// Entity-first lookup: filter `entity`'s bucket by `family`.
    pub fn components_of_entity_by_family(
        &self,
        entity: EntityId,
        family: FamilyId,
    ) -> Vec<ComponentHandle> {
        self.entity_bucket(entity)
            .iter()
            .filter(|&&slot| self.has_family(slot, family))
            .filter_map(|&slot| self.handle(slot))
            .collect()
    }

    /// Family-first lookup: filter `family`'s bucket by `entity`.
    pub fn components_of_family_by_entity(
        &self,
        entity: EntityId,
        family: FamilyId,
    ) -> Vec<ComponentHandle> {
        if !entity.is_valid() {
            return Vec::new();
        }
        self.family_bucket(family)
            .iter()
            .filter(|&&slot| self.has_owner(slot, entity))
            .filter_map(|&slot| self.handle(slot))
            .collect()
    }

    /// First component of `family` owned by `entity`.
    pub fn first_component_of(&self, entity: EntityId, family: FamilyId) -> Option<ComponentHandle> {
        self.entity_bucket(entity)
            .iter()
            .find(|&&slot| self.has_family(slot, family))
            .and_then(|&slot| self.handle(slot))
    }

    /// First component of `family` in the store.
    pub fn first_component_of_family(&self, family: FamilyId) -> Option<ComponentHandle> {
        self.family_bucket(family)
            .first()
            .and_then(|&slot| self.handle(slot))
    }

    /// First component of kind `T` owned by `entity`.
    pub fn first_of<T: Kind>(&self, entity: EntityId) -> Option<ComponentHandle> {
        self.entity_bucket(entity)
            .iter()
            .filter_map(|&slot| self.cell(slot))
            .find(|cell| cell.family == T::FAMILY && cell.is::<T>())
            .map(|cell| ComponentHandle(Rc::clone(cell)))
    }

    /// Number of `family` components owned by `entity`.
    pub fn count(&self, entity: EntityId, family: FamilyId) -> usize {
        self.entity_bucket(entity)
            .iter()
            .filter(|&&slot| self.has_family(slot, family))
            .count()
    }

    // -- sizes ----------------------------------------------------------------

    /// Length of the primary array, tombstones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of tombstoned slots waiting on the free-list.
    pub fn erased_count(&self) -> usize {
        self.free.len()
    }

    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Size of the embedded entity allocator.
    pub fn entity_size(&self) -> usize {
        self.allocator.size()
    }

    pub fn family_count(&self) -> usize {
        self.by_family.len()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            slots: self.len(),
            live: self.live_count(),
            erased: self.erased_count(),
            entity_size: self.entity_size(),
            live_entities: self.allocator.live_count(),
            families: self.family_count(),
        }
    }
}
