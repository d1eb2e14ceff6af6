//! The entity handle and its record (component C4).
//!
//! `Entity` itself is a lightweight `Copy` handle — an index into the
//! database's entity pool plus a generation counter — the same shape
//! `specs::world::entity::Entity(Index, Generation)` uses to detect stale
//! handles. The record a handle points at (mask, attached-object vector,
//! per-entity lock) lives in [`crate::database::Database`]'s entity pool;
//! `Entity` itself owns nothing and carries no lock.
//!
//! Unlike the original `enfield::entity`, which resolves a weak reference
//! through a small heap cell nulled out on destruction, stale handles here
//! are detected the same way `specs` detects them: by comparing the
//! handle's recorded generation against the generation currently alive at
//! that slot. It is a smaller mechanism that gives the same
//! [`crate::error::Error::WrongGeneration`] behavior without an extra
//! allocation per entity.

use std::sync::Arc;

use crate::attached::AttachedObjectHandle;
use crate::mask::InlineMask;
use crate::registry::TypeIdx;

/// Monotonically increasing per-slot counter, bumped every time a slot is
/// reused after its previous occupant was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub(crate) u32);

/// A `Copy` handle to an entity: a slot index plus the generation that was
/// alive there when the handle was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entity {
    pub(crate) index: u32,
    pub(crate) generation: Generation,
}

impl Entity {
    /// The raw slot index, for diagnostics only — never use this to index
    /// the pool directly, since it carries no liveness guarantee on its own.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The generation recorded in this handle.
    pub fn generation(&self) -> u32 {
        self.generation.0
    }
}

/// A non-owning reference to an entity, constructed by
/// [`crate::database::Database::weak_reference`] and resolved back to a live
/// [`Entity`] by [`crate::database::Database::upgrade`].
///
/// Plays the same role as `enfield::entity_weak_ref` — a handle that doesn't
/// keep the entity alive and fails to resolve once the entity is gone —
/// without a separate heap-allocated indirection cell nulled out by the
/// database: `WeakEntity` carries the same (index, generation) pair `Entity`
/// does, and resolving it is exactly the generation comparison `Entity`
/// itself is already checked against on every lookup, so no extra allocation
/// or bookkeeping is needed to get "gone once the entity is destroyed" for
/// free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakEntity {
    pub(crate) index: u32,
    pub(crate) generation: Generation,
}

/// The state backing one entity slot.
///
/// Guarded, as a whole, by one `parking_lot::RwLock` in the database's entity
/// pool — `add`/`remove`/`require` take the writer half, `get`/`has`/`for_each`
/// callbacks take the reader half, matching the per-entity spinlock in
/// `SPEC_FULL.md` §5.
pub(crate) struct EntityRecord {
    pub generation: Generation,
    pub alive: bool,
    pub mask: InlineMask,
    pub objects: Vec<(TypeIdx, Arc<AttachedObjectHandle>)>,
    pub strong_count: u32,
}

impl EntityRecord {
    pub fn new(generation: Generation, mask_capacity: u32) -> Self {
        EntityRecord {
            generation,
            alive: true,
            mask: InlineMask::new(mask_capacity),
            objects: Vec::new(),
            strong_count: 0,
        }
    }

    pub fn reset(&mut self, mask_capacity: u32) {
        self.alive = true;
        self.mask = InlineMask::new(mask_capacity);
        self.objects.clear();
        self.strong_count = 0;
    }

    pub fn find(&self, type_idx: TypeIdx) -> Option<&Arc<AttachedObjectHandle>> {
        self.objects
            .iter()
            .find(|(t, _)| *t == type_idx)
            .map(|(_, h)| h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attached::Header;

    fn handle(owner: Entity, type_idx: TypeIdx) -> Arc<AttachedObjectHandle> {
        Arc::new(AttachedObjectHandle::new_poisoned(Header::new(owner, type_idx, 0, "t", 64)))
    }

    #[test]
    fn find_returns_none_before_insertion() {
        let record = EntityRecord::new(Generation(0), 64);
        assert!(record.find(3).is_none());
    }

    #[test]
    fn find_returns_the_matching_handle() {
        let owner = Entity {
            index: 0,
            generation: Generation(0),
        };
        let mut record = EntityRecord::new(Generation(0), 64);
        record.objects.push((2, handle(owner, 2)));
        assert!(record.find(2).is_some());
        assert!(record.find(5).is_none());
    }

    #[test]
    fn reset_clears_objects_and_bumps_alive() {
        let owner = Entity {
            index: 0,
            generation: Generation(0),
        };
        let mut record = EntityRecord::new(Generation(0), 64);
        record.objects.push((1, handle(owner, 1)));
        record.alive = false;
        record.reset(64);
        assert!(record.alive);
        assert!(record.objects.is_empty());
        assert_eq!(record.strong_count, 0);
    }
}
