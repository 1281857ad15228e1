//! Component kinds, payloads, handles and the kind factory.
//!
//! A concrete component kind is any `Clone + Debug + Default` type that
//! implements [`Kind`], which pins its [`FamilyId`]. Inside the store every
//! payload is type-erased to `Box<dyn ComponentData>`; callers get typed
//! access back through [`ComponentHandle::read`] and
//! [`ComponentHandle::write`].
//!
//! Runtime-selected kinds are built through a [`ComponentFactory`].
//! [`KindRegistry`] is the stock implementation, keyed by kind name.

use std::any::{Any, TypeId};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::EcsError;

// ---------------------------------------------------------------------------
// FamilyId / SlotId
// ---------------------------------------------------------------------------

/// Category tag shared by all components of one kind.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FamilyId(pub u32);

impl FamilyId {
    /// The "no family" sentinel. Components tagged with it cannot be removed
    /// through [`ComponentStore::delete`](crate::store::ComponentStore::delete).
    pub const NONE: FamilyId = FamilyId(0);
}

impl fmt::Debug for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FamilyId({})", self.0)
    }
}

impl fmt::Display for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// Position of a component in the store's primary array.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub u32);

impl SlotId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotId({})", self.0)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Kind / ComponentData
// ---------------------------------------------------------------------------

/// A concrete component kind.
///
/// `Default` supplies the kind's initial field values; `FAMILY` is the
/// category every instance is filed under.
///
/// ```
/// use tessera_ecs::prelude::*;
///
/// #[derive(Debug, Clone)]
/// struct Armor { armor: i32 }
///
/// impl Default for Armor {
///     fn default() -> Self { Self { armor: 3 } }
/// }
///
/// impl Kind for Armor {
///     const FAMILY: FamilyId = FamilyId(2);
/// }
/// ```
pub trait Kind: Any + Clone + fmt::Debug + Default {
    const FAMILY: FamilyId;
}

/// Object-safe view of a component payload. Implemented for every [`Kind`].
pub trait ComponentData: Any + fmt::Debug {
    fn family(&self) -> FamilyId;
    fn kind_name(&self) -> &'static str;
    fn clone_boxed(&self) -> Box<dyn ComponentData>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Kind> ComponentData for T {
    fn family(&self) -> FamilyId {
        T::FAMILY
    }

    fn kind_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn clone_boxed(&self) -> Box<dyn ComponentData> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// OwnedComponent
// ---------------------------------------------------------------------------

/// A component that is not stored anywhere yet: an owner plus a payload.
///
/// Built by callers for [`ComponentStore::attach`](crate::store::ComponentStore::attach)
/// or returned by [`ComponentStore::detach`](crate::store::ComponentStore::detach)
/// when a component moves between stores.
#[derive(Debug)]
pub struct OwnedComponent {
    owner: EntityId,
    data: Box<dyn ComponentData>,
}

impl OwnedComponent {
    pub fn new<T: Kind>(owner: EntityId, value: T) -> Self {
        Self {
            owner,
            data: Box::new(value),
        }
    }

    pub fn from_boxed(owner: EntityId, data: Box<dyn ComponentData>) -> Self {
        Self { owner, data }
    }

    pub fn owner(&self) -> EntityId {
        self.owner
    }

    pub fn family(&self) -> FamilyId {
        self.data.family()
    }

    /// Typed view of the payload, `None` if it is not a `T`.
    pub fn get<T: Kind>(&self) -> Option<&T> {
        self.data.as_any().downcast_ref::<T>()
    }

    pub fn get_mut<T: Kind>(&mut self) -> Option<&mut T> {
        self.data.as_any_mut().downcast_mut::<T>()
    }

    pub fn into_data(self) -> Box<dyn ComponentData> {
        self.data
    }

    pub(crate) fn into_parts(self) -> (EntityId, Box<dyn ComponentData>) {
        (self.owner, self.data)
    }
}

impl Clone for OwnedComponent {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner,
            data: self.data.clone_boxed(),
        }
    }
}

// ---------------------------------------------------------------------------
// ComponentCell / ComponentHandle
// ---------------------------------------------------------------------------

/// Shared record behind a [`ComponentHandle`]. Identity fields are fixed at
/// installation; only the payload is mutable.
#[derive(Debug)]
pub(crate) struct ComponentCell {
    pub(crate) slot: SlotId,
    pub(crate) owner: EntityId,
    pub(crate) family: FamilyId,
    /// `TypeId` of the concrete payload, so kind checks never borrow it.
    pub(crate) kind: TypeId,
    pub(crate) tombstoned: Cell<bool>,
    pub(crate) data: RefCell<Box<dyn ComponentData>>,
}

impl ComponentCell {
    pub(crate) fn new(slot: SlotId, owner: EntityId, data: Box<dyn ComponentData>) -> Self {
        Self {
            slot,
            owner,
            family: data.family(),
            kind: data.as_any().type_id(),
            tombstoned: Cell::new(false),
            data: RefCell::new(data),
        }
    }

    pub(crate) fn is<T: Kind>(&self) -> bool {
        self.kind == TypeId::of::<T>()
    }
}

/// Shared handle to a stored component.
///
/// Every live handle counts as one external holder of its slot: while any
/// handle exists, [`ComponentStore::ref_count`](crate::store::ComponentStore::ref_count)
/// is non-zero and the store refuses to delete, replace or detach the slot.
/// Drop handles before mutating the slot they point at.
///
/// Payload access follows `RefCell` rules: holding a [`write`](Self::write)
/// guard while anything else reads the same payload panics.
#[derive(Clone)]
pub struct ComponentHandle(pub(crate) Rc<ComponentCell>);

impl ComponentHandle {
    pub fn slot(&self) -> SlotId {
        self.0.slot
    }

    pub fn owner(&self) -> EntityId {
        self.0.owner
    }

    pub fn family(&self) -> FamilyId {
        self.0.family
    }

    /// `true` once the store no longer holds this component. Only observable
    /// when the ownership gate is disabled.
    pub fn is_tombstoned(&self) -> bool {
        self.0.tombstoned.get()
    }

    /// Name of the concrete kind behind the payload.
    pub fn kind_name(&self) -> &'static str {
        self.0.data.borrow().kind_name()
    }

    /// `true` if the payload is a `T`.
    pub fn is<T: Kind>(&self) -> bool {
        self.0.is::<T>()
    }

    /// Typed shared borrow of the payload, `None` if it is not a `T`.
    pub fn read<T: Kind>(&self) -> Option<Ref<'_, T>> {
        Ref::filter_map(self.0.data.borrow(), |data| data.as_any().downcast_ref::<T>()).ok()
    }

    /// Typed mutable borrow of the payload, `None` if it is not a `T`.
    pub fn write<T: Kind>(&self) -> Option<RefMut<'_, T>> {
        RefMut::filter_map(self.0.data.borrow_mut(), |data| {
            data.as_any_mut().downcast_mut::<T>()
        })
        .ok()
    }

    /// Untyped copy of the payload.
    pub fn clone_data(&self) -> Box<dyn ComponentData> {
        self.0.data.borrow().clone_boxed()
    }

    /// `true` if both handles point at the same stored component.
    pub fn ptr_eq(&self, other: &ComponentHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("slot", &self.0.slot)
            .field("owner", &self.0.owner)
            .field("family", &self.0.family)
            .field("tombstoned", &self.0.tombstoned.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ComponentFactory / KindRegistry
// ---------------------------------------------------------------------------

/// Builds default-valued payloads for kinds selected at runtime.
pub trait ComponentFactory {
    /// A fresh payload of `kind`, or `None` if the kind is unknown.
    fn build(&self, kind: &str) -> Option<Box<dyn ComponentData>>;
}

/// Metadata about a registered kind.
#[derive(Debug, Clone)]
pub struct KindInfo {
    /// Name supplied at registration.
    pub name: String,
    /// `Kind::FAMILY` of the type.
    pub family: FamilyId,
    /// Rust `TypeId` for runtime type checking.
    pub type_id: TypeId,
    make: fn() -> Box<dyn ComponentData>,
}

fn make_default<T: Kind>() -> Box<dyn ComponentData> {
    Box::new(T::default())
}

/// Name-keyed registry of component kinds.
///
/// A type can only be registered once; registering it again returns the
/// existing info and ignores the new name.
#[derive(Debug, Default)]
pub struct KindRegistry {
    by_type: HashMap<TypeId, usize>,
    by_name: HashMap<String, usize>,
    infos: Vec<KindInfo>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `name`.
    ///
    /// # Errors
    ///
    /// [`EcsError::DuplicateKind`] if `name` already belongs to another type.
    pub fn register<T: Kind>(&mut self, name: &str) -> Result<&KindInfo, EcsError> {
        let type_id = TypeId::of::<T>();
        if let Some(&idx) = self.by_type.get(&type_id) {
            return Ok(&self.infos[idx]);
        }
        if self.by_name.contains_key(name) {
            return Err(EcsError::DuplicateKind {
                name: name.to_owned(),
            });
        }

        let idx = self.infos.len();
        self.infos.push(KindInfo {
            name: name.to_owned(),
            family: T::FAMILY,
            type_id,
            make: make_default::<T>,
        });
        self.by_type.insert(type_id, idx);
        self.by_name.insert(name.to_owned(), idx);
        Ok(&self.infos[idx])
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<&KindInfo> {
        self.by_name.get(name).map(|&idx| &self.infos[idx])
    }

    pub fn lookup<T: Kind>(&self) -> Option<&KindInfo> {
        self.by_type
            .get(&TypeId::of::<T>())
            .map(|&idx| &self.infos[idx])
    }

    /// All kinds filed under `family`, in registration order.
    pub fn kinds_in_family(&self, family: FamilyId) -> impl Iterator<Item = &KindInfo> + '_ {
        self.infos.iter().filter(move |info| info.family == family)
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Names of all registered kinds, sorted.
    pub fn registered_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }
}

impl ComponentFactory for KindRegistry {
    fn build(&self, kind: &str) -> Option<Box<dyn ComponentData>> {
        self.lookup_by_name(kind).map(|info| (info.make)())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Health {
        health: i32,
    }

    impl Default for Health {
        fn default() -> Self {
            Self { health: 10 }
        }
    }

    impl Kind for Health {
        const FAMILY: FamilyId = FamilyId(1);
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Name(String);

    impl Kind for Name {
        const FAMILY: FamilyId = FamilyId(4);
    }

    #[test]
    fn register_and_build_by_name() {
        let mut reg = KindRegistry::new();
        reg.register::<Health>("health").unwrap();
        reg.register::<Name>("name").unwrap();

        let data = reg.build("health").unwrap();
        assert_eq!(data.family(), FamilyId(1));
        assert_eq!(
            data.as_any().downcast_ref::<Health>(),
            Some(&Health { health: 10 })
        );
        assert!(reg.build("armor").is_none());
        assert_eq!(reg.registered_names(), vec!["health", "name"]);
    }

    #[test]
    fn same_type_registers_once() {
        let mut reg = KindRegistry::new();
        reg.register::<Health>("health").unwrap();
        let again = reg.register::<Health>("hp").unwrap();
        assert_eq!(again.name, "health");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn name_clash_is_rejected() {
        let mut reg = KindRegistry::new();
        reg.register::<Health>("thing").unwrap();
        assert!(matches!(
            reg.register::<Name>("thing"),
            Err(EcsError::DuplicateKind { .. })
        ));
    }

    #[test]
    fn kinds_in_family_filters() {
        let mut reg = KindRegistry::new();
        reg.register::<Health>("health").unwrap();
        reg.register::<Name>("name").unwrap();
        let names: Vec<_> = reg
            .kinds_in_family(FamilyId(4))
            .map(|info| info.name.as_str())
            .collect();
        assert_eq!(names, vec!["name"]);
        assert_eq!(reg.lookup::<Name>().unwrap().family, FamilyId(4));
    }

    #[test]
    fn owned_component_typed_access() {
        let mut owned = OwnedComponent::new(EntityId::new(3), Health { health: 7 });
        assert_eq!(owned.family(), FamilyId(1));
        assert!(owned.get::<Name>().is_none());
        owned.get_mut::<Health>().unwrap().health = 2;
        let copy = owned.clone();
        assert_eq!(copy.get::<Health>(), Some(&Health { health: 2 }));
        assert_eq!(copy.owner(), EntityId::new(3));
    }

    #[test]
    fn handle_reads_and_writes_payload() {
        let cell = ComponentCell::new(SlotId(4), EntityId::new(2), Box::new(Health::default()));
        let handle = ComponentHandle(Rc::new(cell));
        assert_eq!(handle.slot(), SlotId(4));
        assert_eq!(handle.family(), FamilyId(1));
        assert!(handle.is::<Health>());
        assert!(handle.read::<Name>().is_none());

        handle.write::<Health>().unwrap().health -= 1;
        assert_eq!(handle.read::<Health>().unwrap().health, 9);

        let other = handle.clone();
        assert!(other.ptr_eq(&handle));
        assert!(!handle.is_tombstoned());
    }
}
