//! The database kernel (component C6).
//!
//! Owns the entity pool, the per-type attached-object indices ("AO-DB"), and
//! the pending-changes queue; exposes the public lifecycle API plus the
//! internal `create_ao`/`delete_ao` primitives attached objects reach through
//! [`crate::attached::Cursor`]. Grounded throughout on
//! `examples/original_source/enfield/database.hpp` — `create_entity`,
//! `for_each_list`, `query`, `optimize`, `apply_component_db_changes`,
//! `_create_ao`, `_delete_ao` — with the pending-changes queue itself
//! modeled on `examples/amethyst-specs/src/world/lazy.rs`'s `LazyUpdate`
//! (`crossbeam_queue::SegQueue<Box<LazyUpdateInternal>>`).

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use crossbeam_queue::SegQueue;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};

use crate::access::{AccessRights, AttachedObjectClass, DatabaseConfig};
use crate::attached::{AttachedObjectHandle, Cursor, Flags, Header};
use crate::entity::{Entity, EntityRecord, Generation, WeakEntity};
use crate::error::{assert_fatal, fatal, Error, Result};
use crate::mask::Mask;
use crate::registry::{self, TypeIdx};
use crate::slab::SlabAllocator;

/// How a newly created attached object becomes visible to
/// [`Database::for_each`]/[`Database::query`]. Mirrors the creation-flags
/// table in `SPEC_FULL.md` §4.C6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreationFlags {
    /// Enqueued; visible after the next [`Database::apply_changes`]. The default.
    #[default]
    Delayed,
    /// Never inserted into the per-type index at all.
    Transient,
    /// Inserted into the per-type index synchronously, before the creating
    /// call returns.
    ForceImmediate,
}

struct TypeIndex {
    slots: Vec<Option<Arc<AttachedObjectHandle>>>,
    deletion_count: AtomicUsize,
}

impl TypeIndex {
    fn new() -> Self {
        TypeIndex {
            slots: Vec::new(),
            deletion_count: AtomicUsize::new(0),
        }
    }

    fn live_len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

enum PendingChange {
    Insert {
        type_idx: TypeIdx,
        handle: Arc<AttachedObjectHandle>,
    },
    Remove {
        type_idx: TypeIdx,
        handle: Arc<AttachedObjectHandle>,
    },
}

/// The entity–attached-object database.
///
/// Parameterized by a compile-time [`DatabaseConfig`], the same role
/// `enfield::database<DatabaseConf>` plays.
pub struct Database<C: DatabaseConfig> {
    entities: RwLock<Vec<RwLock<EntityRecord>>>,
    free_entities: parking_lot::Mutex<Vec<u32>>,
    indices: RwLock<AHashMap<TypeIdx, RwLock<TypeIndex>>>,
    pending: SegQueue<PendingChange>,
    slab: SlabAllocator,
    _conf: PhantomData<C>,
}

impl<C: DatabaseConfig> Default for Database<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: DatabaseConfig> Database<C> {
    /// Creates an empty database for configuration `C`.
    pub fn new() -> Self {
        assert_fatal(
            C::MAX_TYPES % 64 == 0,
            "DatabaseConfig::MAX_TYPES must be a multiple of 64",
        );
        Database {
            entities: RwLock::new(Vec::new()),
            free_entities: parking_lot::Mutex::new(Vec::new()),
            indices: RwLock::new(AHashMap::new()),
            pending: SegQueue::new(),
            slab: SlabAllocator::new(),
            _conf: PhantomData,
        }
    }

    /// Registers attached-object type `T` if needed and ensures it has a
    /// per-type index (when `T`'s class is `DB_QUERYABLE` and the
    /// configuration maintains attached-object indices at all).
    pub(crate) fn ensure_registered<T: crate::attached::AttachedObject>(&self) -> TypeIdx {
        let idx = registry::register::<T>(C::MAX_TYPES);
        if C::USE_ATTACHED_OBJECT_DB && T::Class::RIGHTS.contains(AccessRights::DB_QUERYABLE) {
            self.indices
                .write()
                .entry(idx)
                .or_insert_with(|| RwLock::new(TypeIndex::new()));
        }
        idx
    }

    fn entity_slot(&self, entity: Entity) -> Result<MappedRwLockReadGuard<'_, RwLock<EntityRecord>>> {
        let pool = self.entities.read();
        if (entity.index as usize) >= pool.len() {
            return Err(Error::WrongGeneration {
                expected: entity.generation,
                found: None,
            });
        }
        Ok(RwLockReadGuard::map(pool, |p| &p[entity.index as usize]))
    }

    fn check_generation(record: &EntityRecord, entity: Entity) -> Result<()> {
        if !record.alive || record.generation != entity.generation {
            return Err(Error::WrongGeneration {
                expected: entity.generation,
                found: record.alive.then_some(record.generation),
            });
        }
        Ok(())
    }

    /// Creates a new entity.
    pub fn create_entity(&self) -> Entity {
        if let Some(index) = self.free_entities.lock().pop() {
            let pool = self.entities.read();
            let mut record = pool[index as usize].write();
            let generation = Generation(record.generation.0 + 1);
            record.reset(C::MAX_TYPES);
            record.generation = generation;
            return Entity { index, generation };
        }
        let mut pool = self.entities.write();
        let index = pool.len() as u32;
        let generation = Generation(0);
        pool.push(RwLock::new(EntityRecord::new(generation, C::MAX_TYPES)));
        Entity { index, generation }
    }

    /// Destroys an entity and everything still attached to it.
    ///
    /// Every externally-added and automanaged object on the entity is torn
    /// down first (in arbitrary order among themselves, recursively
    /// releasing their requirements exactly as [`Self::remove`] would), then
    /// the slot is freed for reuse with a bumped generation.
    pub fn destroy_entity(&self, entity: Entity) {
        let slot = match self.entity_slot(entity) {
            Ok(slot) => slot,
            Err(_) => return,
        };
        let mut guard = slot.write();
        if Self::check_generation(&guard, entity).is_err() {
            return;
        }
        if C::ALLOW_REF_COUNTING_ON_ENTITIES {
            assert_fatal(
                guard.strong_count == 0,
                "destroy_entity: entity still has outstanding strong references",
            );
        }
        // Release every external/automanaged root up front so the ordinary
        // required_count-driven teardown below can run to completion without
        // tripping the "still held" assertions.
        for (_, handle) in guard.objects.iter() {
            handle.header.write().flags.remove(Flags::EXTERNALLY_ADDED | Flags::AUTOMANAGED);
        }
        loop {
            let next = guard
                .objects
                .iter()
                .find(|(_, h)| h.header.read().can_be_destroyed())
                .map(|(t, h)| (*t, h.clone()));
            let Some((type_idx, handle)) = next else {
                break;
            };
            self.destroy_attached_object(&mut guard, type_idx, handle);
        }
        assert_fatal(
            guard.objects.is_empty(),
            "dependency cycle detected: destroy_entity could not make every attached object destroyable",
        );
        guard.alive = false;
        drop(guard);
        self.free_entities.lock().push(entity.index);
    }

    /// Bumps `entity`'s strong-reference count, declaring an intent to hold
    /// it alive past the current scope. Pairs with
    /// [`Self::release_tracking_reference`]; while the count is above zero,
    /// [`Self::destroy_entity`] refuses to tear the entity down.
    ///
    /// Gated on [`DatabaseConfig::ALLOW_REF_COUNTING_ON_ENTITIES`], matching
    /// `enfield::entity::duplicate_tracking_reference`'s
    /// `static_assert(DatabaseConf::allow_ref_counting_on_entities, ...)`.
    pub fn duplicate_tracking_reference(&self, entity: Entity) -> Entity {
        assert_fatal(
            C::ALLOW_REF_COUNTING_ON_ENTITIES,
            "duplicate_tracking_reference: ref counting is not enabled for this database configuration",
        );
        let slot = self
            .entity_slot(entity)
            .unwrap_or_else(|_| fatal("duplicate_tracking_reference: unknown entity"));
        let mut guard = slot.write();
        Self::check_generation(&guard, entity)
            .unwrap_or_else(|_| fatal("duplicate_tracking_reference: stale entity handle"));
        guard.strong_count += 1;
        entity
    }

    /// Releases one strong reference taken by
    /// [`Self::duplicate_tracking_reference`]. Does not itself destroy the
    /// entity — it only lifts the hold that [`Self::destroy_entity`] checks.
    pub fn release_tracking_reference(&self, entity: Entity) {
        assert_fatal(
            C::ALLOW_REF_COUNTING_ON_ENTITIES,
            "release_tracking_reference: ref counting is not enabled for this database configuration",
        );
        let slot = self
            .entity_slot(entity)
            .unwrap_or_else(|_| fatal("release_tracking_reference: unknown entity"));
        let mut guard = slot.write();
        Self::check_generation(&guard, entity)
            .unwrap_or_else(|_| fatal("release_tracking_reference: stale entity handle"));
        assert_fatal(guard.strong_count > 0, "release_tracking_reference: strong-ref count underflow");
        guard.strong_count -= 1;
    }

    /// Produces a [`WeakEntity`] for `entity` — see that type's doc comment
    /// for why this needs no separate indirection cell.
    pub fn weak_reference(&self, entity: Entity) -> WeakEntity {
        WeakEntity {
            index: entity.index,
            generation: entity.generation,
        }
    }

    /// Resolves a [`WeakEntity`] back to a live [`Entity`], or `None` if the
    /// entity it pointed at is gone (destroyed, or never existed).
    pub fn upgrade(&self, weak: WeakEntity) -> Option<Entity> {
        let entity = Entity {
            index: weak.index,
            generation: weak.generation,
        };
        let slot = self.entity_slot(entity).ok()?;
        let guard = slot.read();
        Self::check_generation(&guard, entity).ok()?;
        Some(entity)
    }

    /// Looks up the attached object of type `T` on `entity`, if present and
    /// the entity is alive.
    pub(crate) fn get_handle<T: crate::attached::AttachedObject>(
        &self,
        entity: Entity,
    ) -> Option<Arc<AttachedObjectHandle>> {
        let type_idx = registry::lookup::<T>()?;
        let slot = self.entity_slot(entity).ok()?;
        let guard = slot.read();
        if Self::check_generation(&guard, entity).is_err() {
            return None;
        }
        guard.find(type_idx).cloned()
    }

    /// Adds an attached object of type `T` to `entity`, constructed by `ctor`.
    ///
    /// If `T` is already present, marks it externally-added (fatal if it
    /// already was). Otherwise allocates, runs `ctor` (which may itself
    /// `require` other types on the same entity), installs the payload, then
    /// publishes it to the index according to `flags`.
    pub fn add<T: crate::attached::AttachedObject>(
        &self,
        entity: Entity,
        flags: CreationFlags,
        ctor: impl FnOnce(Cursor<'_, C>) -> T,
    ) {
        crate::access::assert_class_can::<T::Class>(AccessRights::EXT_CREATABLE);
        let type_idx = self.ensure_registered::<T>();
        let slot = self
            .entity_slot(entity)
            .unwrap_or_else(|_| fatal("add: unknown entity"));
        let mut guard = slot.write();
        Self::check_generation(&guard, entity).unwrap_or_else(|_| fatal("add: stale entity handle"));

        if let Some(handle) = guard.find(type_idx).cloned() {
            let mut header = handle.header.write();
            assert_fatal(
                !header.flags.contains(Flags::EXTERNALLY_ADDED),
                "add: type is already externally added on this entity",
            );
            header.flags.insert(Flags::EXTERNALLY_ADDED);
            return;
        }

        let handle = self.allocate_and_construct::<T>(&mut guard, entity, type_idx, flags, ctor);
        handle.header.write().flags.insert(Flags::EXTERNALLY_ADDED);
    }

    /// Internal: allocates a poisoned handle, runs `ctor` against a fresh
    /// [`Cursor`] borrowing `guard` directly (no re-locking), installs the
    /// payload, and publishes it to the index. Used both by [`Self::add`]
    /// and by [`Cursor::require`] for implicit creation.
    pub(crate) fn allocate_and_construct<T: crate::attached::AttachedObject>(
        &self,
        guard: &mut EntityRecord,
        entity: Entity,
        type_idx: TypeIdx,
        flags: CreationFlags,
        ctor: impl FnOnce(Cursor<'_, C>) -> T,
    ) -> Arc<AttachedObjectHandle> {
        let class_id = registry::class_id::<T::Class>();
        let mut header = Header::new(entity, type_idx, class_id, T::Class::NAME, C::MAX_TYPES);
        header.flags.set(Flags::FULLY_TRANSIENT, matches!(flags, CreationFlags::Transient));
        header.flags.set(Flags::FORCE_IMMEDIATE, matches!(flags, CreationFlags::ForceImmediate));
        let handle = self.slab.allocate(header, matches!(flags, CreationFlags::Transient));

        guard.objects.push((type_idx, handle.clone()));
        guard.mask.set(type_idx);

        let cursor = Cursor {
            db: self,
            entity,
            entity_guard: guard,
            this: handle.clone(),
        };
        let value = ctor(cursor);
        handle.install_payload(value);

        self.publish_new_object(type_idx, handle.clone(), flags);
        log::trace!("created attached object #{type_idx} ({})", T::Class::NAME);
        handle
    }

    /// Makes a freshly-constructed object visible per its creation flags.
    fn publish_new_object(&self, type_idx: TypeIdx, handle: Arc<AttachedObjectHandle>, flags: CreationFlags) {
        if !C::USE_ATTACHED_OBJECT_DB {
            return;
        }
        match flags {
            CreationFlags::Transient => {}
            CreationFlags::ForceImmediate => {
                self.insert_into_index(type_idx, handle);
            }
            CreationFlags::Delayed => {
                self.pending.push(PendingChange::Insert { type_idx, handle });
            }
        }
    }

    fn insert_into_index(&self, type_idx: TypeIdx, handle: Arc<AttachedObjectHandle>) {
        let indices = self.indices.read();
        let Some(index_lock) = indices.get(&type_idx) else {
            return;
        };
        let mut index = index_lock.write();
        let slot_idx = index.slots.len();
        index.slots.push(Some(handle.clone()));
        handle.header.write().index = Some(slot_idx);
        handle.header.write().flags.insert(Flags::IN_INDEX);
    }

    /// Removes `T` from `entity`, tearing it down if nothing else still
    /// requires or automanages it.
    pub fn remove<T: crate::attached::AttachedObject>(&self, entity: Entity) {
        crate::access::assert_class_can::<T::Class>(AccessRights::EXT_REMOVABLE);
        let slot = self
            .entity_slot(entity)
            .unwrap_or_else(|_| fatal("remove: unknown entity"));
        let mut guard = slot.write();
        Self::check_generation(&guard, entity).unwrap_or_else(|_| fatal("remove: stale entity handle"));
        let Some(type_idx) = registry::lookup::<T>() else {
            fatal("remove: type was never registered");
        };
        let Some(handle) = guard.find(type_idx).cloned() else {
            fatal("remove: type not present on this entity");
        };
        handle.header.write().flags.remove(Flags::EXTERNALLY_ADDED);
        if handle.header.read().can_be_destroyed() {
            self.destroy_attached_object(&mut guard, type_idx, handle);
        }
    }

    /// The destruction-unwind protocol: authorizes destruction, removes the
    /// object from the entity, walks its requirements mask releasing each in
    /// turn (recursively destroying any that become unreferenced as a
    /// result), then retires the object's storage.
    ///
    /// `guard` must already be the write-locked record for the entity that
    /// owns `handle`; this never locks the entity again, matching
    /// `SPEC_FULL.md`'s single-lock-acquisition discipline.
    pub(crate) fn destroy_attached_object(
        &self,
        guard: &mut EntityRecord,
        type_idx: TypeIdx,
        handle: Arc<AttachedObjectHandle>,
    ) {
        {
            let mut header = handle.header.write();
            assert_fatal(
                !header.flags.contains(Flags::AUTHORIZED_DESTRUCTION),
                "dependency cycle detected: attached object already authorized for destruction",
            );
            header.flags.insert(Flags::AUTHORIZED_DESTRUCTION);
        }

        guard.objects.retain(|(t, _)| *t != type_idx);
        guard.mask.unset(type_idx);

        let required: Vec<TypeIdx> = handle.header.read().requirements.iter_set().collect();
        for req_type in required {
            let Some(req_handle) = guard.find(req_type).cloned() else {
                continue;
            };
            {
                let mut req_header = req_handle.header.write();
                assert_fatal(
                    req_header.required_count > 0,
                    "dependency cycle detected: required_count underflow during teardown",
                );
                req_header.required_count -= 1;
                if req_header.required_count == 0
                    && req_header.flags.contains(Flags::AUTOMANAGED | Flags::AUTOMANAGED_TRACKS_REQUIRERS)
                {
                    // Only a concept-style root that opted into tracking its
                    // requirers auto-clears here; a plain `create_self` root
                    // stays independent of required_count (see attached.rs's
                    // `unrequire` for the matching rule).
                    req_header.flags.remove(Flags::AUTOMANAGED);
                }
            }
            if req_handle.header.read().can_be_destroyed() {
                self.destroy_attached_object(guard, req_type, req_handle);
            }
        }
        handle.header.write().requirements = crate::mask::LazyMask::new(C::MAX_TYPES);

        let fully_transient = handle.header.read().flags.contains(Flags::FULLY_TRANSIENT);
        let in_index = handle.header.read().flags.contains(Flags::IN_INDEX);
        if C::USE_ATTACHED_OBJECT_DB && !fully_transient && in_index {
            self.pending.push(PendingChange::Remove {
                type_idx,
                handle: handle.clone(),
            });
        }

        let transient = handle.header.read().flags.contains(Flags::FULLY_TRANSIENT);
        handle.take_payload();
        self.slab.deallocate(transient, handle);
        log::trace!("destroyed attached object #{type_idx}");
    }

    /// Drains the pending-changes queue, applying every insertion/removal to
    /// the per-type indices. Single-threaded: holds every index's writer
    /// lock for the duration, matching
    /// `database::apply_component_db_changes`.
    pub fn apply_changes(&self) {
        let indices = self.indices.read();
        let mut locked: AHashMap<TypeIdx, parking_lot::RwLockWriteGuard<'_, TypeIndex>> = indices
            .iter()
            .map(|(&idx, lock)| (idx, lock.write()))
            .collect();

        let mut inserted = 0usize;
        let mut removed = 0usize;
        while let Some(change) = self.pending.pop() {
            match change {
                PendingChange::Insert { type_idx, handle } => {
                    if handle.header.read().flags.contains(Flags::AUTHORIZED_DESTRUCTION) {
                        // created, then destroyed, before this apply — nothing to publish.
                        continue;
                    }
                    if let Some(index) = locked.get_mut(&type_idx) {
                        let slot_idx = index.slots.len();
                        index.slots.push(Some(handle.clone()));
                        handle.header.write().index = Some(slot_idx);
                        handle.header.write().flags.insert(Flags::IN_INDEX);
                        inserted += 1;
                    }
                }
                PendingChange::Remove { type_idx, handle } => {
                    if let Some(index) = locked.get_mut(&type_idx) {
                        if let Some(slot_idx) = handle.header.read().index {
                            if let Some(slot) = index.slots.get_mut(slot_idx) {
                                *slot = None;
                                index.deletion_count.fetch_add(1, Ordering::Relaxed);
                                removed += 1;
                            }
                        }
                    }
                }
            }
        }
        log::debug!("apply_changes: inserted {inserted}, removed {removed}");
    }

    /// Compacts every per-type index whose deletion count exceeds
    /// [`DatabaseConfig::OPTIMIZE_THRESHOLD`] (or every index, if `force`),
    /// shifting live entries down over deleted slots and truncating.
    pub fn optimize(&self, force: bool) {
        let indices = self.indices.read();
        for (type_idx, lock) in indices.iter() {
            let mut index = lock.write();
            let deletions = index.deletion_count.load(Ordering::Relaxed);
            if !force && deletions < C::OPTIMIZE_THRESHOLD {
                continue;
            }
            let mut write = 0;
            for read in 0..index.slots.len() {
                if index.slots[read].is_some() {
                    if read != write {
                        index.slots.swap(read, write);
                        if let Some(handle) = &index.slots[write] {
                            handle.header.write().index = Some(write);
                        }
                    }
                    write += 1;
                }
            }
            index.slots.truncate(write);
            index.deletion_count.store(0, Ordering::Relaxed);
            log::debug!("optimize: compacted type #{type_idx} to {write} live entries");
        }
    }

    /// Visits every live attached object of type `T` in iteration order,
    /// passing the owning entity alongside each reference.
    ///
    /// Iterates `T`'s per-type index when one exists; otherwise falls back to
    /// [`Self::for_each_entity_with_types`] (entity index, or nothing if that
    /// too is disabled — `DESIGN.md` Open Question #5). See [`crate::query`]
    /// for the multi-type for-each that picks the smallest candidate index.
    pub fn for_each_of_type<T: crate::attached::AttachedObject>(&self, mut f: impl FnMut(Entity, &T)) {
        self.for_each_of_type_locked::<T>(|entity, v, _rec| f(entity, v));
    }

    /// As [`Self::for_each_of_type`], but also hands the callback the owning
    /// entity's already-read-locked record, matching the shared lock
    /// `database::for_each_list` takes around its callback
    /// (`spinlock_shared_adapter::adapt(it->owner.lock)`) — `SPEC_FULL.md`
    /// §5/§8 require the visited entity's lock to be held for the duration of
    /// the callback, not just for the snapshot read that found it.
    ///
    /// Callers that need to inspect sibling attached objects on the same
    /// entity (see [`crate::query::for_each2`]) must go through the passed
    /// `&EntityRecord` rather than re-locking the entity — the lock is
    /// already held here, and `parking_lot::RwLock` is not reentrant.
    pub(crate) fn for_each_of_type_locked<T: crate::attached::AttachedObject>(
        &self,
        mut f: impl FnMut(Entity, &T, &EntityRecord),
    ) {
        let Some(type_idx) = registry::lookup::<T>() else {
            return;
        };
        let indices = self.indices.read();
        if let Some(lock) = indices.get(&type_idx) {
            let index = lock.read();
            for slot in index.slots.iter().flatten() {
                if slot.header.read().flags.contains(Flags::AUTHORIZED_DESTRUCTION) {
                    continue;
                }
                if slot.is_poisoned() {
                    continue;
                }
                let owner = slot.header.read().owner;
                let Ok(owner_slot) = self.entity_slot(owner) else {
                    continue;
                };
                // A writer already holding this entity (a constructor running
                // on it, reached back in through the same `&Database`) is
                // indistinguishable from genuine contention here, and
                // `parking_lot::RwLock` isn't reentrant — blocking would
                // deadlock. Treat a held write lock the same as "not visible
                // yet", exactly like the poisoned-handle skip above.
                let Some(owner_guard) = owner_slot.try_read() else {
                    continue;
                };
                slot.with::<T, ()>(|v| f(owner, v, &owner_guard));
            }
            return;
        }
        drop(indices);
        self.for_each_entity_with_types(&[type_idx], |entity, rec| {
            let Some(handle) = rec.find(type_idx) else {
                return;
            };
            if handle.header.read().flags.contains(Flags::AUTHORIZED_DESTRUCTION) || handle.is_poisoned() {
                return;
            }
            handle.with::<T, ()>(|v| f(entity, v, rec));
        });
    }

    /// Visits every alive entity whose type-membership mask has every id in
    /// `types` set, passing its record alongside.
    ///
    /// The entity-index fallback used when a per-type attached-object index
    /// isn't available for one or more of the requested types (`use_entity_db`
    /// disabled means no iteration at all, matching `SPEC_FULL.md`'s
    /// "entity index if available, else empty" rule).
    pub(crate) fn for_each_entity_with_types(&self, types: &[TypeIdx], mut f: impl FnMut(Entity, &EntityRecord)) {
        if !C::USE_ENTITY_DB {
            return;
        }
        let pool = self.entities.read();
        for (index, record_lock) in pool.iter().enumerate() {
            let record = record_lock.read();
            if !record.alive || !types.iter().all(|t| record.mask.is_set(*t)) {
                continue;
            }
            let entity = Entity {
                index: index as u32,
                generation: record.generation,
            };
            f(entity, &record);
        }
    }

    /// A snapshot of every live attached object of type `T`, suitable for use
    /// after [`Self::apply_changes`]. Handles since destroyed must be
    /// filtered by the caller checking liveness, mirroring the original's
    /// "query performs a copy of the vector" note.
    pub fn query<T: crate::attached::AttachedObject>(&self) -> Vec<Arc<AttachedObjectHandle>> {
        assert_fatal(
            T::Class::RIGHTS.contains(AccessRights::DB_QUERYABLE),
            "query: this attached object class is not db_queryable",
        );
        let Some(type_idx) = registry::lookup::<T>() else {
            return Vec::new();
        };
        let indices = self.indices.read();
        let Some(lock) = indices.get(&type_idx) else {
            return Vec::new();
        };
        lock.read()
            .slots
            .iter()
            .flatten()
            .filter(|h| !h.header.read().flags.contains(Flags::AUTHORIZED_DESTRUCTION))
            .cloned()
            .collect()
    }

    /// Live entry count for `T`'s per-type index, used by
    /// [`crate::query::for_each`] to pick the smallest candidate index.
    pub(crate) fn index_len<T: crate::attached::AttachedObject>(&self) -> Option<usize> {
        let type_idx = registry::lookup::<T>()?;
        let indices = self.indices.read();
        indices.get(&type_idx).map(|lock| lock.read().live_len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{Component, Concept};

    struct TestConf;
    impl DatabaseConfig for TestConf {
        const MAX_TYPES: u32 = 64;
    }

    struct Pos(i32);
    impl crate::attached::AttachedObject for Pos {
        type Class = Component;
    }

    struct Vel(i32);
    impl crate::attached::AttachedObject for Vel {
        type Class = Component;
    }

    /// Only `Concept`-classed types carry `AUTOMANAGED` rights by default, so
    /// `create_self`/`self_destruct` tests need a type of this class rather
    /// than `Pos`/`Vel`.
    struct Aura(i32);
    impl crate::attached::AttachedObject for Aura {
        type Class = Concept;
    }

    #[test]
    fn create_entity_assigns_fresh_generations_on_reuse() {
        let db: Database<TestConf> = Database::new();
        let a = db.create_entity();
        db.destroy_entity(a);
        let b = db.create_entity();
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
    }

    #[test]
    fn added_component_is_visible_through_get_handle_immediately() {
        let db: Database<TestConf> = Database::new();
        let e = db.create_entity();
        db.add::<Pos>(e, CreationFlags::Delayed, |_cursor| Pos(1));
        let handle = db.get_handle::<Pos>(e).expect("component present");
        handle.with::<Pos, ()>(|p| assert_eq!(p.0, 1));
    }

    #[test]
    fn delayed_insertion_only_visible_to_for_each_after_apply_changes() {
        let db: Database<TestConf> = Database::new();
        let e = db.create_entity();
        db.add::<Pos>(e, CreationFlags::Delayed, |_cursor| Pos(7));
        let mut seen = Vec::new();
        db.for_each_of_type::<Pos>(|_entity, p: &Pos| seen.push(p.0));
        assert!(seen.is_empty());
        db.apply_changes();
        db.for_each_of_type::<Pos>(|_entity, p: &Pos| seen.push(p.0));
        assert_eq!(seen, vec![7]);
    }

    #[test]
    fn force_immediate_insertion_is_visible_before_apply_changes() {
        let db: Database<TestConf> = Database::new();
        let e = db.create_entity();
        db.add::<Pos>(e, CreationFlags::ForceImmediate, |_cursor| Pos(9));
        let mut seen = Vec::new();
        db.for_each_of_type::<Pos>(|_entity, p: &Pos| seen.push(p.0));
        assert_eq!(seen, vec![9]);
    }

    #[test]
    fn requiring_a_missing_type_creates_it_and_removing_the_last_requirer_destroys_it() {
        let db: Database<TestConf> = Database::new();
        let e = db.create_entity();
        db.add::<Pos>(e, CreationFlags::Delayed, |mut cursor| {
            cursor.require::<Vel>(|_inner| Vel(0));
            Pos(1)
        });
        assert!(db.get_handle::<Vel>(e).is_some());
        db.remove::<Pos>(e);
        assert!(db.get_handle::<Pos>(e).is_none());
        assert!(
            db.get_handle::<Vel>(e).is_none(),
            "Vel should have been torn down once its last requirer was removed"
        );
    }

    #[test]
    fn a_requirement_shared_by_two_owners_survives_the_first_removal() {
        let db: Database<TestConf> = Database::new();
        let e = db.create_entity();
        db.add::<Pos>(e, CreationFlags::Delayed, |mut cursor| {
            cursor.require::<Vel>(|_inner| Vel(0));
            Pos(1)
        });
        db.add::<Vel>(e, CreationFlags::Delayed, |_cursor| Vel(0));
        db.remove::<Pos>(e);
        assert!(
            db.get_handle::<Vel>(e).is_some(),
            "Vel is still externally added and must survive Pos's removal"
        );
        db.remove::<Vel>(e);
        assert!(db.get_handle::<Vel>(e).is_none());
    }

    #[test]
    fn destroy_entity_tears_down_every_attached_object() {
        let db: Database<TestConf> = Database::new();
        let e = db.create_entity();
        db.add::<Pos>(e, CreationFlags::Delayed, |mut cursor| {
            cursor.require::<Vel>(|_inner| Vel(0));
            Pos(1)
        });
        db.destroy_entity(e);
        assert!(db.get_handle::<Pos>(e).is_none());
        assert!(db.get_handle::<Vel>(e).is_none());
    }

    #[test]
    fn weak_reference_resolves_while_alive_and_fails_after_destruction() {
        let db: Database<TestConf> = Database::new();
        let e = db.create_entity();
        let weak = db.weak_reference(e);
        assert_eq!(db.upgrade(weak), Some(e));
        db.destroy_entity(e);
        assert_eq!(db.upgrade(weak), None);
    }

    #[test]
    #[should_panic(expected = "outstanding strong references")]
    fn destroy_entity_refuses_while_a_strong_reference_is_outstanding() {
        let db: Database<TestConf> = Database::new();
        let e = db.create_entity();
        db.duplicate_tracking_reference(e);
        db.destroy_entity(e);
    }

    #[test]
    fn destroy_entity_succeeds_once_every_strong_reference_is_released() {
        let db: Database<TestConf> = Database::new();
        let e = db.create_entity();
        db.duplicate_tracking_reference(e);
        db.duplicate_tracking_reference(e);
        db.release_tracking_reference(e);
        db.release_tracking_reference(e);
        db.destroy_entity(e);
        let reused = db.create_entity();
        assert_eq!(reused.index(), e.index());
    }

    #[test]
    fn is_required_reflects_this_objects_own_requirements() {
        let db: Database<TestConf> = Database::new();
        let e = db.create_entity();
        db.add::<Pos>(e, CreationFlags::Delayed, |mut cursor| {
            assert!(!cursor.is_required::<Vel>());
            cursor.require::<Vel>(|_inner| Vel(0));
            assert!(cursor.is_required::<Vel>());
            Pos(1)
        });
    }

    #[test]
    fn create_self_brings_an_object_into_existence_via_the_automanaged_root() {
        let db: Database<TestConf> = Database::new();
        let e = db.create_entity();
        db.add::<Pos>(e, CreationFlags::Delayed, |mut cursor| {
            cursor.create_self::<Aura>(|_inner| Aura(0));
            Pos(1)
        });
        assert!(db.get_handle::<Aura>(e).is_some());
        assert_eq!(
            db.get_handle::<Aura>(e).map(|h| h.header.read().required_count),
            Some(0),
            "create_self holds it up without bumping required_count"
        );
    }

    #[test]
    fn self_destruct_tears_down_an_automanaged_object_with_no_other_root() {
        let db: Database<TestConf> = Database::new();
        let e = db.create_entity();
        db.add::<Pos>(e, CreationFlags::Delayed, |mut cursor| {
            cursor.create_self::<Aura>(|_inner| Aura(0));
            cursor.self_destruct::<Aura>();
            Pos(1)
        });
        assert!(db.get_handle::<Aura>(e).is_none());
    }

    #[test]
    fn self_destruct_leaves_an_object_alone_while_still_required() {
        let db: Database<TestConf> = Database::new();
        let e = db.create_entity();
        db.add::<Pos>(e, CreationFlags::Delayed, |mut cursor| {
            cursor.create_self::<Aura>(|_inner| Aura(0));
            cursor.require::<Aura>(|_| fatal("Aura should already exist"));
            cursor.self_destruct::<Aura>();
            Pos(1)
        });
        assert!(
            db.get_handle::<Aura>(e).is_some(),
            "Pos still requires Aura, self_destruct should only release the automanaged root"
        );
    }

    #[test]
    fn get_unsafe_reads_an_object_not_required_by_the_caller() {
        let db: Database<TestConf> = Database::new();
        let e = db.create_entity();
        db.add::<Vel>(e, CreationFlags::Delayed, |_c| Vel(5));
        db.add::<Pos>(e, CreationFlags::Delayed, |cursor| {
            let seen = cursor.get_unsafe::<Vel, i32>(|v| v.0);
            assert_eq!(seen, Some(5));
            Pos(1)
        });
    }

    #[test]
    fn get_unsafe_returns_none_for_a_type_not_present() {
        let db: Database<TestConf> = Database::new();
        let e = db.create_entity();
        db.add::<Pos>(e, CreationFlags::Delayed, |cursor| {
            assert_eq!(cursor.get_unsafe::<Vel, i32>(|v| v.0), None);
            Pos(1)
        });
    }

    #[test]
    #[should_panic(expected = "still under construction")]
    fn reading_a_sibling_under_construction_is_fatal() {
        let db: Database<TestConf> = Database::new();
        let e = db.create_entity();
        db.add::<Pos>(e, CreationFlags::Delayed, |mut cursor| {
            cursor.require::<Vel>(|inner| {
                // Vel's own constructor reaches back for Pos, which is still
                // being built by this very `add` call — the poisoned-payload
                // assertion should fire here.
                inner.get_required::<Pos, ()>(|_p| ());
                Vel(0)
            });
            Pos(1)
        });
    }
}
