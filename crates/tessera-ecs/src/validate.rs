//! Index consistency checking and free-list repair.
//!
//! [`ComponentStore::validate`] walks the primary array, the free-list and
//! both indices, and reports the first broken invariant as a [`Violation`].
//! It is O(n) and meant for tests and debugging.

use std::collections::HashSet;

use crate::component::{FamilyId, SlotId};
use crate::entity::EntityId;
use crate::store::{ComponentStore, Slot};
use crate::EcsError;

/// A broken store invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("tombstoned slot {slot} is missing from the free-list")]
    TombstoneNotFree { slot: SlotId },

    #[error("free-list entry {slot} is past the end of the slot array (len {len})")]
    FreeSlotOutOfRange { slot: SlotId, len: usize },

    #[error("free-list holds {slot} more than once")]
    DuplicateFreeSlot { slot: SlotId },

    #[error("live slot {slot} is on the free-list")]
    LiveSlotFree { slot: SlotId },

    #[error("component at index {index} records slot {recorded}")]
    SlotIdMismatch { index: usize, recorded: SlotId },

    #[error("entity bucket {entity} holds {slot}, which is owned by {owner}")]
    EntityBucketOwner {
        entity: EntityId,
        slot: SlotId,
        owner: EntityId,
    },

    #[error("entity bucket {entity} holds non-live slot {slot}")]
    EntityBucketTombstone { entity: EntityId, slot: SlotId },

    #[error("family bucket {family} holds {slot}, which is of family {actual}")]
    FamilyBucketFamily {
        family: FamilyId,
        slot: SlotId,
        actual: FamilyId,
    },

    #[error("family bucket {family} holds non-live slot {slot}")]
    FamilyBucketTombstone { family: FamilyId, slot: SlotId },

    #[error("family bucket {family} is empty")]
    EmptyFamilyBucket { family: FamilyId },

    #[error("last slot {slot} is tombstoned")]
    TrailingTombstone { slot: SlotId },

    #[error("live slot {slot} appears {count} time(s) in the {index} index")]
    IndexCount {
        slot: SlotId,
        index: &'static str,
        count: usize,
    },
}

impl ComponentStore {
    /// Check every index invariant.
    ///
    /// # Errors
    ///
    /// [`EcsError::Inconsistent`] naming the first violation found.
    pub fn validate(&self) -> Result<(), EcsError> {
        self.check_free_list()?;
        self.check_entity_index()?;
        self.check_family_index()?;
        Ok(())
    }

    fn check_free_list(&self) -> Result<(), Violation> {
        let len = self.slots.len();
        let mut free = HashSet::with_capacity(self.free.len());
        for &slot in &self.free {
            if slot.index() >= len {
                return Err(Violation::FreeSlotOutOfRange { slot, len });
            }
            if !free.insert(slot) {
                return Err(Violation::DuplicateFreeSlot { slot });
            }
        }

        for (index, entry) in self.slots.iter().enumerate() {
            let slot = SlotId::from_index(index);
            match entry {
                Slot::Live(cell) => {
                    if cell.slot != slot {
                        return Err(Violation::SlotIdMismatch {
                            index,
                            recorded: cell.slot,
                        });
                    }
                    if free.contains(&slot) {
                        return Err(Violation::LiveSlotFree { slot });
                    }
                }
                Slot::Tombstone { .. } => {
                    if !free.contains(&slot) {
                        return Err(Violation::TombstoneNotFree { slot });
                    }
                }
            }
        }

        if let Some(Slot::Tombstone { .. }) = self.slots.last() {
            return Err(Violation::TrailingTombstone {
                slot: SlotId::from_index(len - 1),
            });
        }
        Ok(())
    }

    fn check_entity_index(&self) -> Result<(), Violation> {
        let mut seen = vec![0usize; self.slots.len()];
        for (index, bucket) in self.by_entity.iter().enumerate() {
            let entity = EntityId::new(index as u32);
            for &slot in bucket {
                match self.slots.get(slot.index()).and_then(Slot::live) {
                    Some(cell) if cell.owner == entity => seen[slot.index()] += 1,
                    Some(cell) => {
                        return Err(Violation::EntityBucketOwner {
                            entity,
                            slot,
                            owner: cell.owner,
                        })
                    }
                    None => return Err(Violation::EntityBucketTombstone { entity, slot }),
                }
            }
        }
        self.check_reachable(&seen, "entity")
    }

    fn check_family_index(&self) -> Result<(), Violation> {
        let mut seen = vec![0usize; self.slots.len()];
        for (&family, bucket) in &self.by_family {
            if bucket.is_empty() {
                return Err(Violation::EmptyFamilyBucket { family });
            }
            for &slot in bucket {
                match self.slots.get(slot.index()).and_then(Slot::live) {
                    Some(cell) if cell.family == family => seen[slot.index()] += 1,
                    Some(cell) => {
                        return Err(Violation::FamilyBucketFamily {
                            family,
                            slot,
                            actual: cell.family,
                        })
                    }
                    None => return Err(Violation::FamilyBucketTombstone { family, slot }),
                }
            }
        }
        self.check_reachable(&seen, "family")
    }

    /// Every live slot must be indexed exactly once.
    fn check_reachable(&self, seen: &[usize], index: &'static str) -> Result<(), Violation> {
        for (i, entry) in self.slots.iter().enumerate() {
            if !entry.is_tombstone() && seen[i] != 1 {
                return Err(Violation::IndexCount {
                    slot: SlotId::from_index(i),
                    index,
                    count: seen[i],
                });
            }
        }
        Ok(())
    }

    /// Recompute the free-list from scratch: every tombstoned slot, in
    /// ascending order.
    pub fn rebuild_free_list(&mut self) {
        let before = self.free.len();
        self.free = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_tombstone())
            .map(|(index, _)| SlotId::from_index(index))
            .collect();
        tracing::debug!(before, after = self.free.len(), "free-list rebuilt");
    }
}
