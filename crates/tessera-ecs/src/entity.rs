//! Entity identifiers and allocation.
//!
//! An [`EntityId`] is a plain positive integer. Id `0` is reserved as the
//! "no entity" sentinel and is implicitly allocated by every
//! [`EntityAllocator`]. Retired ids are recycled oldest-first, and runs of
//! retired ids at the top of the range are compacted away eagerly so the
//! free-list never grows past the live range.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

use crate::EcsError;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A numeric entity identifier. No data is attached to an entity beyond its
/// id; components reference it as their owner.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u32);

impl EntityId {
    /// The reserved "no entity" id.
    pub const NONE: EntityId = EntityId(0);

    /// Largest id [`EntityAllocator::create_under`] accepts.
    pub const MAX: EntityId = EntityId(u32::MAX - 1);

    /// Wrap a raw id, e.g. one read back from persisted state.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw `u32` representation.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Position of this id in per-entity tables.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// `false` only for [`EntityId::NONE`].
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

/// Allocates, retires and recycles [`EntityId`]s.
///
/// Ids `0..size()` are allocated; the ones on the free-list are retired.
/// Free ids are kept in a FIFO queue, mirrored by a set for O(1) existence
/// checks.
#[derive(Debug, Clone)]
pub struct EntityAllocator {
    /// High-water mark: ids below this have been allocated at some point.
    len: u32,
    /// Retired ids in retirement order (FIFO).
    free: VecDeque<u32>,
    /// Same contents as `free`.
    retired: HashSet<u32>,
}

impl EntityAllocator {
    /// Create an allocator holding only the implicit id 0.
    pub fn new() -> Self {
        Self {
            len: 1,
            free: VecDeque::new(),
            retired: HashSet::new(),
        }
    }

    /// Create an allocator with room for `capacity` retired ids before the
    /// free-list reallocates.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            len: 1,
            free: VecDeque::with_capacity(capacity),
            retired: HashSet::with_capacity(capacity),
        }
    }

    /// Allocate an id: the oldest retired one if any, otherwise one past the
    /// high-water mark.
    pub fn create(&mut self) -> EntityId {
        if let Some(id) = self.free.pop_front() {
            self.retired.remove(&id);
            EntityId(id)
        } else {
            let id = self.len;
            self.len += 1;
            EntityId(id)
        }
    }

    /// Reserve a caller-chosen id, used when restoring persisted state.
    ///
    /// Ids skipped over when `id` lies beyond the high-water mark are
    /// allocated and immediately retired, in ascending order, so later
    /// [`create`](Self::create) calls hand them out first.
    ///
    /// # Errors
    ///
    /// - [`EcsError::InvalidEntity`] for [`EntityId::NONE`].
    /// - [`EcsError::AlreadyExists`] if `id` is currently live.
    /// - [`EcsError::EntityOutOfRange`] if `id` is above [`EntityId::MAX`].
    pub fn create_under(&mut self, id: EntityId) -> Result<EntityId, EcsError> {
        if !id.is_valid() {
            return Err(EcsError::InvalidEntity { entity: id });
        }
        if self.exists(id) {
            return Err(EcsError::AlreadyExists { entity: id });
        }
        if id > EntityId::MAX {
            return Err(EcsError::EntityOutOfRange {
                entity: id,
                limit: EntityId::MAX,
            });
        }
        if self.retired.remove(&id.0) {
            self.unqueue(id.0);
            return Ok(id);
        }

        // Beyond the range: every gap id becomes retired.
        self.free.reserve((id.0 - self.len) as usize);
        for gap in self.len..id.0 {
            self.free.push_back(gap);
            self.retired.insert(gap);
        }
        self.len = id.0 + 1;
        Ok(id)
    }

    /// `true` if `id` is allocated and not retired. Id 0 always exists.
    pub fn exists(&self, id: EntityId) -> bool {
        id.0 < self.len && !self.retired.contains(&id.0)
    }

    /// Retire `id`.
    ///
    /// Retiring the current maximum shrinks the range instead of touching
    /// the free-list, and then keeps shrinking while the new maximum is
    /// itself retired.
    ///
    /// Returns `false` if `id` does not exist or is the reserved id 0.
    pub fn delete(&mut self, id: EntityId) -> bool {
        if !id.is_valid() || !self.exists(id) {
            return false;
        }

        if id.0 + 1 == self.len {
            self.len -= 1;
            while self.len > 1 && self.retired.remove(&(self.len - 1)) {
                let top = self.len - 1;
                self.unqueue(top);
                self.len -= 1;
            }
        } else {
            self.free.push_back(id.0);
            self.retired.insert(id.0);
        }
        true
    }

    /// Drop `id` from the free-queue. Gap ids are queued in ascending order,
    /// so the top of the range is normally at the back.
    fn unqueue(&mut self, id: u32) {
        if self.free.back() == Some(&id) {
            self.free.pop_back();
        } else if let Some(pos) = self.free.iter().rposition(|&free| free == id) {
            self.free.remove(pos);
        }
    }

    /// Reset to the single implicit id 0.
    pub fn clear(&mut self) {
        self.len = 1;
        self.free.clear();
        self.retired.clear();
    }

    /// Number of allocated ids, retired ones and id 0 included.
    pub fn size(&self) -> usize {
        self.len as usize
    }

    /// Number of retired ids waiting for reuse.
    pub fn retired_count(&self) -> usize {
        self.free.len()
    }

    /// Number of live entities, excluding the implicit id 0.
    pub fn live_count(&self) -> usize {
        self.size() - 1 - self.retired_count()
    }

    /// Retired ids, oldest first.
    pub fn retired(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.free.iter().map(|&id| EntityId(id))
    }

    /// Live ids in ascending order, excluding the implicit id 0.
    pub fn iter_live(&self) -> impl Iterator<Item = EntityId> + '_ {
        (1..self.len)
            .filter(|id| !self.retired.contains(id))
            .map(EntityId)
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
