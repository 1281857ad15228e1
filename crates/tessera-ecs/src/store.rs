//! The [`ComponentStore`] owns every component together with the two derived
//! indices (entity -> slots, family -> slots) and the entity allocator used to
//! validate owners.
//!
//! Mutations update the primary array and both indices before returning.
//! Deleted slots are tombstoned; tombstones in the middle of the array go on
//! a FIFO free-list for reuse, tombstones at the tail are popped right away.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::component::{
    ComponentCell, ComponentData, ComponentFactory, ComponentHandle, FamilyId, Kind,
    OwnedComponent, SlotId,
};
use crate::config::StoreConfig;
use crate::entity::{EntityAllocator, EntityId};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// One entry of the primary array.
#[derive(Debug)]
pub(crate) enum Slot {
    Live(Rc<ComponentCell>),
    /// Soft-deleted. Keeps the former owner so compaction can prune that
    /// owner's bucket.
    Tombstone { owner: EntityId },
}

impl Slot {
    pub(crate) fn live(&self) -> Option<&Rc<ComponentCell>> {
        match self {
            Slot::Live(cell) => Some(cell),
            Slot::Tombstone { .. } => None,
        }
    }

    pub(crate) fn is_tombstone(&self) -> bool {
        matches!(self, Slot::Tombstone { .. })
    }
}

// ---------------------------------------------------------------------------
// ComponentStore
// ---------------------------------------------------------------------------

/// Slot-recycling component storage with entity and family indices.
///
/// ```
/// use tessera_ecs::prelude::*;
///
/// #[derive(Debug, Clone, Default)]
/// struct Health { health: i32 }
///
/// impl Kind for Health {
///     const FAMILY: FamilyId = FamilyId(1);
/// }
///
/// let mut store = ComponentStore::new();
/// let tank = store.create_entity();
/// let slot = store.create::<Health>(tank).unwrap().slot();
///
/// assert_eq!(store.count(tank, FamilyId(1)), 1);
/// assert!(store.delete(slot));
/// assert!(store.components_of_entity(tank).is_empty());
/// store.validate().unwrap();
/// ```
#[derive(Debug)]
pub struct ComponentStore {
    pub(crate) config: StoreConfig,
    pub(crate) allocator: EntityAllocator,
    /// Primary array, indexed by `SlotId`.
    pub(crate) slots: Vec<Slot>,
    /// Tombstoned slot ids awaiting reuse, oldest first.
    pub(crate) free: VecDeque<SlotId>,
    /// Entity id -> live slots owned by it. Trailing empty buckets are pruned.
    pub(crate) by_entity: Vec<Vec<SlotId>>,
    /// Family -> live slots of that family. Empty buckets are removed.
    pub(crate) by_family: HashMap<FamilyId, Vec<SlotId>>,
}

impl ComponentStore {
    /// Create an empty store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            allocator: EntityAllocator::with_capacity(config.entity_capacity),
            slots: Vec::with_capacity(config.slot_capacity),
            free: VecDeque::new(),
            by_entity: Vec::with_capacity(config.entity_capacity),
            by_family: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // -- entities -------------------------------------------------------------

    /// Read-only access to the embedded entity allocator.
    pub fn entities(&self) -> &EntityAllocator {
        &self.allocator
    }

    /// Allocate a new entity id.
    pub fn create_entity(&mut self) -> EntityId {
        self.allocator.create()
    }

    /// Reserve a specific entity id, used when restoring persisted state.
    ///
    /// See [`EntityAllocator::create_under`] for the error cases. Ids above
    /// [`StoreConfig::max_entity_id`] are rejected with
    /// [`EcsError::EntityOutOfRange`].
    pub fn create_entity_under(&mut self, entity: EntityId) -> Result<EntityId, EcsError> {
        self.check_owner(entity)?;
        self.allocator.create_under(entity)
    }

    pub fn entity_exists(&self, entity: EntityId) -> bool {
        self.allocator.exists(entity)
    }

    /// Bounds check for ids that bypass the allocator.
    fn check_owner(&self, owner: EntityId) -> Result<(), EcsError> {
        if !owner.is_valid() {
            return Err(EcsError::InvalidEntity { entity: owner });
        }
        let limit = EntityId::new(self.config.max_entity_id);
        if owner > limit {
            return Err(EcsError::EntityOutOfRange {
                entity: owner,
                limit,
            });
        }
        Ok(())
    }

    fn check_entity(&self, entity: EntityId) -> Result<(), EcsError> {
        if !entity.is_valid() {
            return Err(EcsError::InvalidEntity { entity });
        }
        if !self.allocator.exists(entity) {
            return Err(EcsError::StaleEntity { entity });
        }
        Ok(())
    }

    // -- creation -------------------------------------------------------------

    /// Create a default-valued `T` under `entity`.
    ///
    /// Reuses the oldest free slot if there is one, otherwise appends.
    ///
    /// # Errors
    ///
    /// - [`EcsError::InvalidEntity`] for [`EntityId::NONE`].
    /// - [`EcsError::StaleEntity`] if the allocator does not hold `entity`.
    pub fn create<T: Kind>(&mut self, entity: EntityId) -> Result<ComponentHandle, EcsError> {
        self.check_entity(entity)?;
        Ok(self.create_unchecked(entity, Box::new(T::default())))
    }

    /// Create a component of a kind chosen at runtime.
    ///
    /// # Errors
    ///
    /// As [`create`](Self::create), plus [`EcsError::UnknownKind`] if the
    /// factory cannot build `kind`.
    pub fn create_from(
        &mut self,
        factory: &dyn ComponentFactory,
        kind: &str,
        entity: EntityId,
    ) -> Result<ComponentHandle, EcsError> {
        self.check_entity(entity)?;
        let data = build(factory, kind)?;
        Ok(self.create_unchecked(entity, data))
    }

    /// Create a component under `new_entity` carrying a copy of `source`'s
    /// payload. The copy gets its own slot and owner; `source` may come from
    /// another store.
    ///
    /// # Panics
    ///
    /// Panics if `source`'s payload is mutably borrowed.
    pub fn duplicate(
        &mut self,
        new_entity: EntityId,
        source: &ComponentHandle,
    ) -> Result<ComponentHandle, EcsError> {
        self.check_entity(new_entity)?;
        Ok(self.create_unchecked(new_entity, source.clone_data()))
    }

    fn create_unchecked(&mut self, entity: EntityId, data: Box<dyn ComponentData>) -> ComponentHandle {
        let slot = self.take_slot();
        let handle = self.install(slot, entity, data);
        tracing::debug!(slot = %slot, entity = %entity, family = %handle.family(), "component created");
        self.after_mutation("create");
        handle
    }

    /// Insert a caller-built component as-is. Its owner is not checked
    /// against the allocator.
    ///
    /// The slot is chosen like [`create`](Self::create) does: the oldest free
    /// slot if there is one, otherwise a new slot at the end.
    ///
    /// # Errors
    ///
    /// - [`EcsError::InvalidEntity`] if the owner is [`EntityId::NONE`].
    /// - [`EcsError::EntityOutOfRange`] if the owner is above
    ///   [`StoreConfig::max_entity_id`].
    pub fn attach(&mut self, component: OwnedComponent) -> Result<ComponentHandle, EcsError> {
        self.check_owner(component.owner())?;
        let (owner, data) = component.into_parts();
        let slot = self.take_slot();
        let handle = self.install(slot, owner, data);
        tracing::debug!(slot = %slot, entity = %owner, family = %handle.family(), "component attached");
        self.after_mutation("attach");
        Ok(handle)
    }

    /// Attach a batch of components. Nothing is attached if any owner is
    /// rejected.
    pub fn attach_all<I>(&mut self, components: I) -> Result<Vec<ComponentHandle>, EcsError>
    where
        I: IntoIterator<Item = OwnedComponent>,
    {
        let components: Vec<OwnedComponent> = components.into_iter().collect();
        for component in &components {
            self.check_owner(component.owner())?;
        }
        components.into_iter().map(|c| self.attach(c)).collect()
    }

    /// Move a component out of the store, e.g. to attach it to another one.
    ///
    /// # Errors
    ///
    /// - [`EcsError::VacantSlot`] if `slot` is tombstoned or out of range.
    /// - [`EcsError::OwnershipConflict`] if handles to the slot are alive.
    ///   The payload can only be moved out once every handle is dropped,
    ///   whatever [`StoreConfig::enforce_ownership`] says.
    pub fn detach(&mut self, slot: SlotId) -> Result<OwnedComponent, EcsError> {
        let holders = match self.slots.get(slot.index()).and_then(Slot::live) {
            Some(cell) => Rc::strong_count(cell) - 1,
            None => return Err(EcsError::VacantSlot { slot }),
        };
        if holders > 0 {
            return Err(EcsError::OwnershipConflict { slot, holders });
        }

        let Some(cell) = self.tombstone(slot) else {
            return Err(EcsError::VacantSlot { slot });
        };
        self.retire(slot);
        self.compact_tail();
        self.after_mutation("detach");

        let cell = Rc::try_unwrap(cell).map_err(|cell| EcsError::OwnershipConflict {
            slot,
            holders: Rc::strong_count(&cell) - 1,
        })?;
        tracing::debug!(slot = %slot, entity = %cell.owner, "component detached");
        Ok(OwnedComponent::from_boxed(cell.owner, cell.data.into_inner()))
    }

    /// Install a default-valued `T` at `slot` under `entity`.
    ///
    /// A live occupant is unregistered from both indices first; a free
    /// occupant is taken off the free-list. A `slot` past the end grows the
    /// array, and the gap slots become free tombstones.
    ///
    /// Returns `Ok(None)` if handles to the current occupant are alive and
    /// ownership is enforced.
    ///
    /// # Errors
    ///
    /// Same entity checks as [`create`](Self::create).
    pub fn replace<T: Kind>(
        &mut self,
        slot: SlotId,
        entity: EntityId,
    ) -> Result<Option<ComponentHandle>, EcsError> {
        self.check_entity(entity)?;
        Ok(self.replace_unchecked(slot, entity, Box::new(T::default())))
    }

    /// [`replace`](Self::replace) with a kind chosen at runtime.
    pub fn replace_from(
        &mut self,
        factory: &dyn ComponentFactory,
        kind: &str,
        slot: SlotId,
        entity: EntityId,
    ) -> Result<Option<ComponentHandle>, EcsError> {
        self.check_entity(entity)?;
        let data = build(factory, kind)?;
        Ok(self.replace_unchecked(slot, entity, data))
    }

    fn replace_unchecked(
        &mut self,
        slot: SlotId,
        entity: EntityId,
        data: Box<dyn ComponentData>,
    ) -> Option<ComponentHandle> {
        if !self.ownership_allows(slot, "replace") {
            return None;
        }
        if self.slots.get(slot.index()).is_some_and(Slot::is_tombstone) {
            self.unfree(slot);
        }
        let handle = self.install(slot, entity, data);
        tracing::debug!(slot = %slot, entity = %entity, family = %handle.family(), "component replaced");
        self.after_mutation("replace");
        Some(handle)
    }

    // -- deletion -------------------------------------------------------------

    /// Soft-delete the component at `slot`.
    ///
    /// Returns `true` without doing anything for an out-of-range slot.
    /// Returns `false` for a tombstoned slot, a component of
    /// [`FamilyId::NONE`], or when handles to the slot are alive and
    /// ownership is enforced.
    pub fn delete(&mut self, slot: SlotId) -> bool {
        let family = match self.slots.get(slot.index()) {
            None => return true,
            Some(Slot::Tombstone { .. }) => return false,
            Some(Slot::Live(cell)) => cell.family,
        };
        if family == FamilyId::NONE {
            return false;
        }
        if !self.ownership_allows(slot, "delete") {
            return false;
        }

        if let Some(cell) = self.tombstone(slot) {
            tracing::debug!(slot = %slot, entity = %cell.owner, family = %family, "component deleted");
        }
        self.retire(slot);
        self.compact_tail();
        self.after_mutation("delete");
        true
    }

    /// Retire `entity` and soft-delete every component it owns.
    ///
    /// Returns `Ok(false)` with no change if the allocator does not hold
    /// `entity`, or if any of its components still has live handles and
    /// ownership is enforced.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidEntity`] for [`EntityId::NONE`].
    pub fn delete_entity(&mut self, entity: EntityId) -> Result<bool, EcsError> {
        if !entity.is_valid() {
            return Err(EcsError::InvalidEntity { entity });
        }

        let owned: Vec<SlotId> = self
            .by_entity
            .get(entity.index())
            .cloned()
            .unwrap_or_default();
        if !owned.iter().all(|&slot| self.ownership_allows(slot, "delete_entity")) {
            return Ok(false);
        }
        if !self.allocator.delete(entity) {
            return Ok(false);
        }

        for &slot in &owned {
            self.tombstone(slot);
            self.free.push_back(slot);
        }
        if let Some(bucket) = self.by_entity.get_mut(entity.index()) {
            bucket.clear();
        }
        self.compact_tail();

        tracing::debug!(entity = %entity, components = owned.len(), "entity deleted");
        self.after_mutation("delete_entity");
        Ok(true)
    }

    /// Empty all indices and reset the allocator. Handles that outlive the
    /// store's copy observe [`ComponentHandle::is_tombstoned`].
    pub fn clear(&mut self) {
        for cell in self.slots.iter().filter_map(Slot::live) {
            cell.tombstoned.set(true);
        }
        self.slots.clear();
        self.free.clear();
        self.by_entity.clear();
        self.by_family.clear();
        self.allocator.clear();
        tracing::debug!("component store cleared");
    }

    // -- internals ------------------------------------------------------------

    /// Oldest free slot, or the next slot past the end.
    fn take_slot(&mut self) -> SlotId {
        self.free
            .pop_front()
            .unwrap_or_else(|| SlotId::from_index(self.slots.len()))
    }

    /// Write a fresh component into `slot` and register it. The caller has
    /// already taken `slot` off the free-list.
    fn install(&mut self, slot: SlotId, owner: EntityId, data: Box<dyn ComponentData>) -> ComponentHandle {
        let idx = slot.index();
        if idx >= self.slots.len() {
            for gap in self.slots.len()..idx {
                self.slots.push(Slot::Tombstone {
                    owner: EntityId::NONE,
                });
                self.free.push_back(SlotId::from_index(gap));
            }
            self.slots.push(Slot::Tombstone {
                owner: EntityId::NONE,
            });
        } else if let Some(old) = self.slots[idx].live().cloned() {
            old.tombstoned.set(true);
            self.unregister(slot, old.owner, old.family);
        }

        let cell = Rc::new(ComponentCell::new(slot, owner, data));
        let family = cell.family;
        self.slots[idx] = Slot::Live(Rc::clone(&cell));
        self.register(slot, owner, family);
        ComponentHandle(cell)
    }

    fn register(&mut self, slot: SlotId, owner: EntityId, family: FamilyId) {
        let idx = owner.index();
        if idx >= self.by_entity.len() {
            self.by_entity.resize_with(idx + 1, Vec::new);
        }
        self.by_entity[idx].push(slot);
        self.by_family.entry(family).or_default().push(slot);
        tracing::trace!(slot = %slot, entity = %owner, family = %family, "slot registered");
    }

    fn unregister(&mut self, slot: SlotId, owner: EntityId, family: FamilyId) {
        if let Some(bucket) = self.by_family.get_mut(&family) {
            if let Some(pos) = bucket.iter().position(|&s| s == slot) {
                bucket.remove(pos);
            }
            if bucket.is_empty() {
                self.by_family.remove(&family);
            }
        }
        if let Some(bucket) = self.by_entity.get_mut(owner.index()) {
            if let Some(pos) = bucket.iter().position(|&s| s == slot) {
                bucket.remove(pos);
            }
        }
        tracing::trace!(slot = %slot, entity = %owner, family = %family, "slot unregistered");
    }

    /// Unregister the live component at `slot` and leave a tombstone behind.
    /// Returns the evicted cell.
    fn tombstone(&mut self, slot: SlotId) -> Option<Rc<ComponentCell>> {
        let cell = self.slots.get(slot.index())?.live()?.clone();
        cell.tombstoned.set(true);
        self.unregister(slot, cell.owner, cell.family);
        self.slots[slot.index()] = Slot::Tombstone { owner: cell.owner };
        Some(cell)
    }

    /// Pop a freshly tombstoned slot if it is the last one, otherwise queue
    /// it for reuse.
    fn retire(&mut self, slot: SlotId) {
        if slot.index() + 1 == self.slots.len() {
            self.slots.pop();
        } else {
            self.free.push_back(slot);
        }
    }

    fn unfree(&mut self, slot: SlotId) {
        if let Some(pos) = self.free.iter().rposition(|&s| s == slot) {
            self.free.remove(pos);
        }
    }

    /// Pop trailing tombstones until the last slot is live, then drop empty
    /// trailing entity buckets.
    fn compact_tail(&mut self) {
        let mut popped = 0usize;
        while let Some(Slot::Tombstone { owner }) = self.slots.last() {
            let owner = *owner;
            let slot = SlotId::from_index(self.slots.len() - 1);
            self.slots.pop();
            self.unfree(slot);

            let slots = &self.slots;
            if let Some(bucket) = self.by_entity.get_mut(owner.index()) {
                bucket.retain(|s| slots.get(s.index()).is_some_and(|e| !e.is_tombstone()));
            }
            popped += 1;
        }

        while self.by_entity.last().is_some_and(Vec::is_empty) {
            self.by_entity.pop();
        }

        if popped > 0 {
            tracing::debug!(popped, len = self.slots.len(), "trailing tombstones compacted");
        }
    }

    /// The ownership gate: `true` if nothing outside the store holds `slot`,
    /// or if the gate is disabled.
    fn ownership_allows(&self, slot: SlotId, op: &'static str) -> bool {
        let holders = self.ref_count(slot);
        if holders == 0 {
            return true;
        }
        if !self.config.enforce_ownership {
            tracing::debug!(slot = %slot, holders, op, "ownership gate disabled, evicting held slot");
            return true;
        }
        tracing::warn!(slot = %slot, holders, op, "slot still has external holders -- refusing");
        false
    }

    fn after_mutation(&self, op: &'static str) {
        if !self.config.validate_after_mutation {
            return;
        }
        if let Err(e) = self.validate() {
            tracing::error!(op, error = %e, "component store consistency check failed");
        }
    }
}

impl Default for ComponentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn build(factory: &dyn ComponentFactory, kind: &str) -> Result<Box<dyn ComponentData>, EcsError> {
    factory.build(kind).ok_or_else(|| EcsError::UnknownKind {
        name: kind.to_owned(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tracing_subscriber::layer::SubscriberExt;

    use super::*;
    use crate::component::KindRegistry;

    macro_rules! kind {
        ($name:ident, $family:expr) => {
            #[derive(Debug, Clone, Default, PartialEq)]
            struct $name {
                value: i32,
            }

            impl Kind for $name {
                const FAMILY: FamilyId = FamilyId($family);
            }
        };
    }

    kind!(Com1, 5);
    kind!(Com2, 2);
    kind!(Com3, 3);
    kind!(Com4, 4);

    #[derive(Debug, Clone, Default)]
    struct Bare;

    impl Kind for Bare {
        const FAMILY: FamilyId = FamilyId::NONE;
    }

    fn store_with_entity() -> (ComponentStore, EntityId) {
        let mut store = ComponentStore::new();
        let e = store.create_entity();
        (store, e)
    }

    #[test]
    fn create_appends_and_indexes() {
        let (mut store, e) = store_with_entity();
        let a = store.create::<Com1>(e).unwrap();
        let b = store.create::<Com2>(e).unwrap();
        assert_eq!(a.slot(), SlotId(0));
        assert_eq!(b.slot(), SlotId(1));
        assert_eq!(a.owner(), e);
        assert_eq!(a.family(), FamilyId(5));
        assert_eq!(store.len(), 2);
        assert_eq!(store.entity_slots(e).unwrap(), &[SlotId(0), SlotId(1)]);
        assert_eq!(store.family_slots(FamilyId(2)).unwrap(), &[SlotId(1)]);
        drop((a, b));
        store.validate().unwrap();
    }

    #[test]
    fn create_rejects_invalid_and_unknown_entities() {
        let mut store = ComponentStore::new();
        assert!(matches!(
            store.create::<Com1>(EntityId::NONE),
            Err(EcsError::InvalidEntity { .. })
        ));
        assert!(matches!(
            store.create::<Com1>(EntityId::new(7)),
            Err(EcsError::StaleEntity { .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn delete_then_create_reuses_freed_slot() {
        let (mut store, e) = store_with_entity();
        for _ in 0..3 {
            store.create::<Com1>(e).unwrap();
        }
        assert!(store.delete(SlotId(1)));
        assert_eq!(store.erased_count(), 1);

        let reused = store.create::<Com2>(e).unwrap();
        assert_eq!(reused.slot(), SlotId(1));
        assert_eq!(store.erased_count(), 0);
        drop(reused);
        store.validate().unwrap();
    }

    #[test]
    fn delete_last_created_then_create_reuses_id() {
        let (mut store, e) = store_with_entity();
        store.create::<Com1>(e).unwrap();
        let last = store.create::<Com1>(e).unwrap().slot();
        assert!(store.delete(last));
        let next = store.create::<Com3>(e).unwrap();
        assert_eq!(next.slot(), last);
    }

    #[test]
    fn free_list_is_fifo() {
        let (mut store, e) = store_with_entity();
        for _ in 0..5 {
            store.create::<Com1>(e).unwrap();
        }
        store.delete(SlotId(3));
        store.delete(SlotId(1));
        assert_eq!(store.create::<Com1>(e).unwrap().slot(), SlotId(3));
        assert_eq!(store.create::<Com1>(e).unwrap().slot(), SlotId(1));
        assert_eq!(store.create::<Com1>(e).unwrap().slot(), SlotId(5));
    }

    #[test]
    fn trailing_deletes_shrink_array() {
        let (mut store, e) = store_with_entity();
        for _ in 0..3 {
            store.create::<Com1>(e).unwrap();
        }
        assert!(store.delete(SlotId(1)));
        assert!(store.delete(SlotId(2)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.erased_count(), 0);
        store.validate().unwrap();
    }

    #[test]
    fn delete_out_of_range_is_a_no_op() {
        let (mut store, e) = store_with_entity();
        store.create::<Com1>(e).unwrap();
        assert!(store.delete(SlotId(40)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn delete_refuses_bare_and_tombstoned_slots() {
        let (mut store, e) = store_with_entity();
        let bare = store.create::<Bare>(e).unwrap().slot();
        store.create::<Com1>(e).unwrap();
        store.create::<Com1>(e).unwrap();
        assert!(!store.delete(bare));

        assert!(store.delete(SlotId(1)));
        assert!(!store.delete(SlotId(1)), "already tombstoned");
        store.validate().unwrap();
    }

    #[test]
    fn delete_drops_empty_family_bucket() {
        let (mut store, e) = store_with_entity();
        let slot = store.create::<Com4>(e).unwrap().slot();
        store.create::<Com1>(e).unwrap();
        assert!(store.delete(slot));
        assert!(matches!(
            store.family_slots(FamilyId(4)),
            Err(EcsError::UnknownFamily { .. })
        ));
    }

    #[test]
    fn compaction_prunes_trailing_entity_buckets() {
        let mut store = ComponentStore::new();
        let a = store.create_entity();
        let b = store.create_entity();
        store.create::<Com1>(a).unwrap();
        let s = store.create::<Com1>(b).unwrap().slot();
        assert_eq!(store.by_entity.len(), 3);
        assert!(store.delete(s));
        assert_eq!(store.by_entity.len(), 2);
        assert!(store.components_of_entity(b).is_empty());
    }

    #[test]
    fn ownership_gate_blocks_delete_while_handle_alive() {
        let (mut store, e) = store_with_entity();
        let handle = store.create::<Com1>(e).unwrap();
        assert_eq!(store.ref_count(handle.slot()), 1);
        assert!(!store.delete(handle.slot()));

        let slot = handle.slot();
        drop(handle);
        assert_eq!(store.ref_count(slot), 0);
        assert!(store.delete(slot));
    }

    #[test]
    fn ownership_gate_blocks_replace_and_delete_entity() {
        let (mut store, e) = store_with_entity();
        let held = store.create::<Com1>(e).unwrap();
        assert!(store.replace::<Com2>(held.slot(), e).unwrap().is_none());
        assert!(!store.delete_entity(e).unwrap());
        assert!(store.entity_exists(e));
        drop(held);
        assert!(store.delete_entity(e).unwrap());
    }

    #[test]
    fn disabled_gate_evicts_held_components() {
        let config = StoreConfig {
            enforce_ownership: false,
            ..StoreConfig::default()
        };
        let mut store = ComponentStore::with_config(config);
        let e = store.create_entity();
        let held = store.create::<Com1>(e).unwrap();
        assert!(store.delete(held.slot()));
        assert!(held.is_tombstoned());
        assert!(store.is_empty());
        store.validate().unwrap();
    }

    #[test]
    fn replace_live_slot_reindexes() {
        let (mut store, e) = store_with_entity();
        store.create::<Com1>(e).unwrap();
        store.create::<Com1>(e).unwrap();
        let other = store.create_entity();

        let new = store.replace::<Com3>(SlotId(0), other).unwrap().unwrap();
        assert_eq!(new.slot(), SlotId(0));
        assert_eq!(new.owner(), other);
        assert_eq!(store.count(e, FamilyId(5)), 1);
        assert_eq!(store.count(other, FamilyId(3)), 1);
        drop(new);
        store.validate().unwrap();
    }

    #[test]
    fn replace_past_end_grows_with_free_gaps() {
        let (mut store, e) = store_with_entity();
        store.create::<Com1>(e).unwrap();
        let h = store.replace::<Com2>(SlotId(4), e).unwrap().unwrap();
        assert_eq!(h.slot(), SlotId(4));
        assert_eq!(store.len(), 5);
        assert_eq!(store.erased_count(), 3);
        drop(h);
        store.validate().unwrap();

        // Gaps are handed out before appending.
        assert_eq!(store.create::<Com1>(e).unwrap().slot(), SlotId(1));
    }

    #[test]
    fn replace_free_slot_takes_it_off_the_free_list() {
        let (mut store, e) = store_with_entity();
        for _ in 0..3 {
            store.create::<Com1>(e).unwrap();
        }
        store.delete(SlotId(0));
        assert_eq!(store.erased_count(), 1);
        store.replace::<Com4>(SlotId(0), e).unwrap();
        assert_eq!(store.erased_count(), 0);
        store.validate().unwrap();
    }

    #[test]
    fn delete_entity_removes_all_components() {
        let mut store = ComponentStore::new();
        let a = store.create_entity();
        let b = store.create_entity();
        store.create::<Com1>(a).unwrap();
        store.create::<Com2>(b).unwrap();
        store.create::<Com2>(a).unwrap();
        store.create::<Com3>(b).unwrap();

        assert!(store.delete_entity(a).unwrap());
        assert!(!store.entity_exists(a));
        assert!(store.components_of_entity(a).is_empty());
        assert_eq!(store.components_of_entity(b).len(), 2);
        assert_eq!(store.erased_count(), 2);
        store.validate().unwrap();

        assert!(store.delete_entity(b).unwrap());
        assert!(store.is_empty());
        assert_eq!(store.erased_count(), 0);
        store.validate().unwrap();
    }

    #[test]
    fn delete_entity_rejects_zero_and_unknown() {
        let mut store = ComponentStore::new();
        assert!(matches!(
            store.delete_entity(EntityId::NONE),
            Err(EcsError::InvalidEntity { .. })
        ));
        assert!(!store.delete_entity(EntityId::new(3)).unwrap());
    }

    #[test]
    fn attach_keeps_owner_and_payload() {
        let (mut store, e) = store_with_entity();
        let h = store
            .attach(OwnedComponent::new(e, Com4 { value: 9 }))
            .unwrap();
        assert_eq!(h.read::<Com4>().unwrap().value, 9);
        assert_eq!(store.first_of::<Com4>(e).unwrap().slot(), h.slot());
        assert!(matches!(
            store.attach(OwnedComponent::new(EntityId::NONE, Com4::default())),
            Err(EcsError::InvalidEntity { .. })
        ));
    }

    #[test]
    fn attach_all_is_all_or_nothing() {
        let (mut store, e) = store_with_entity();
        let batch = vec![
            OwnedComponent::new(e, Com1::default()),
            OwnedComponent::new(EntityId::NONE, Com2::default()),
        ];
        assert!(store.attach_all(batch).is_err());
        assert!(store.is_empty());

        let batch = vec![
            OwnedComponent::new(e, Com1::default()),
            OwnedComponent::new(e, Com2::default()),
        ];
        assert_eq!(store.attach_all(batch).unwrap().len(), 2);
    }

    #[test]
    fn detach_moves_payload_out() {
        let (mut store, e) = store_with_entity();
        let h = store.create::<Com1>(e).unwrap();
        h.write::<Com1>().unwrap().value = 42;
        let slot = h.slot();

        assert!(matches!(
            store.detach(slot),
            Err(EcsError::OwnershipConflict { holders: 1, .. })
        ));
        drop(h);

        let owned = store.detach(slot).unwrap();
        assert_eq!(owned.get::<Com1>().unwrap().value, 42);
        assert_eq!(owned.owner(), e);
        assert!(store.is_empty());
        assert!(matches!(store.detach(slot), Err(EcsError::VacantSlot { .. })));

        let data = owned.into_data();
        assert_eq!(data.family(), FamilyId(5));
        assert_eq!(
            data.as_any().downcast_ref::<Com1>().map(|c| c.value),
            Some(42)
        );
    }

    #[test]
    fn attach_reuses_oldest_free_slot() {
        let (mut store, e) = store_with_entity();
        for _ in 0..3 {
            store.create::<Com1>(e).unwrap();
        }
        assert!(store.delete(SlotId(1)));

        let h = store.attach(OwnedComponent::new(e, Com2 { value: 4 })).unwrap();
        assert_eq!(h.slot(), SlotId(1));
        assert_eq!(store.erased_count(), 0);
        assert_eq!(store.len(), 3);

        let appended = store.attach(OwnedComponent::new(e, Com2::default())).unwrap();
        assert_eq!(appended.slot(), SlotId(3));
        drop((h, appended));
        store.validate().unwrap();
    }

    #[test]
    fn owners_above_the_limit_are_rejected() {
        let config = StoreConfig {
            max_entity_id: 100,
            ..StoreConfig::default()
        };
        let mut store = ComponentStore::with_config(config);
        let far = EntityId::new(u32::MAX - 3);

        assert!(matches!(
            store.attach(OwnedComponent::new(far, Com1::default())),
            Err(EcsError::EntityOutOfRange { .. })
        ));
        assert!(matches!(
            store.create_entity_under(EntityId::new(101)),
            Err(EcsError::EntityOutOfRange { .. })
        ));
        let batch = vec![
            OwnedComponent::new(EntityId::new(100), Com1::default()),
            OwnedComponent::new(far, Com1::default()),
        ];
        assert!(store.attach_all(batch).is_err());
        assert!(store.is_empty());
        assert!(store.by_entity.is_empty());

        assert_eq!(store.create_entity_under(EntityId::new(100)).unwrap(), EntityId::new(100));
    }

    // -- inline validation --------------------------------------------------

    #[derive(Clone, Default)]
    struct ErrorCount(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ErrorCount {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn errors_during(f: impl FnOnce()) -> usize {
        let counter = ErrorCount::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        tracing::subscriber::with_default(subscriber, f);
        counter.0.load(Ordering::SeqCst)
    }

    fn drifted_store(validate_after_mutation: bool) -> (ComponentStore, EntityId) {
        let config = StoreConfig {
            validate_after_mutation,
            ..StoreConfig::default()
        };
        let mut store = ComponentStore::with_config(config);
        let e = store.create_entity();
        for _ in 0..3 {
            store.create::<Com1>(e).unwrap();
        }
        assert!(store.delete(SlotId(1)));
        // The tombstone at 1 is no longer queued for reuse.
        store.free.clear();
        (store, e)
    }

    #[test]
    fn inline_validation_logs_violations() {
        let (mut store, e) = drifted_store(true);
        let errors = errors_during(|| {
            store.create::<Com2>(e).unwrap();
        });
        assert_eq!(errors, 1);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn inline_validation_is_silent_when_consistent_or_disabled() {
        let (mut store, e) = drifted_store(false);
        assert_eq!(errors_during(|| drop(store.create::<Com2>(e).unwrap())), 0);

        let config = StoreConfig {
            validate_after_mutation: true,
            ..StoreConfig::default()
        };
        let mut store = ComponentStore::with_config(config);
        let e = store.create_entity();
        let errors = errors_during(|| {
            store.create::<Com1>(e).unwrap();
            store.create::<Com2>(e).unwrap();
            store.delete(SlotId(0));
            store.delete_entity(e).unwrap();
        });
        assert_eq!(errors, 0);
    }

    #[test]
    fn duplicate_copies_payload_with_new_identity() {
        let mut store = ComponentStore::new();
        let a = store.create_entity();
        let b = store.create_entity();
        let src = store.create::<Com2>(a).unwrap();
        src.write::<Com2>().unwrap().value = 17;

        let copy = store.duplicate(b, &src).unwrap();
        assert_ne!(copy.slot(), src.slot());
        assert_eq!(copy.owner(), b);
        assert_eq!(copy.read::<Com2>().unwrap().value, 17);
        assert_eq!(src.owner(), a);
    }

    #[test]
    fn create_from_factory_by_name() {
        let mut reg = KindRegistry::new();
        reg.register::<Com3>("com3").unwrap();
        let (mut store, e) = store_with_entity();

        let h = store.create_from(&reg, "com3", e).unwrap();
        assert!(h.is::<Com3>());
        assert!(matches!(
            store.create_from(&reg, "nope", e),
            Err(EcsError::UnknownKind { .. })
        ));
        let replaced = store.replace_from(&reg, "com3", SlotId(2), e).unwrap();
        assert!(replaced.is_some());
    }

    #[test]
    fn clear_resets_everything() {
        let (mut store, e) = store_with_entity();
        let held = store.create::<Com1>(e).unwrap();
        store.create::<Com2>(e).unwrap();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.entity_size(), 1);
        assert_eq!(store.family_count(), 0);
        assert!(held.is_tombstoned());
        assert_eq!(store.create_entity(), EntityId::new(1));
    }
}
