//! The attached-object header and require/unrequire protocol (component C5).
//!
//! Grounded on `enfield::attached_object::base`/`base_tpl`
//! (`base_attached_object.hpp`) — the modern, bitmask-based requirements
//! graph, *not* the older `std::set<base*>`-based
//! `internal_base_attached_object.hpp`, which `SPEC_FULL.md`'s Open
//! Questions explicitly direct to ignore.
//!
//! An attached object never touches [`crate::entity::Entity`]'s public API
//! directly; its only outward surface is [`Cursor`], handed to its
//! constructor by [`crate::database::Database::create_ao`] and to every
//! `require`/`unrequire` call after that.

use std::any::Any;

use bitflags::bitflags;
use parking_lot::RwLock;

use crate::access::{AccessRights, AttachedObjectClass};
use crate::error::{assert_fatal, debug_assert_fatal, fatal};
use crate::mask::{LazyMask, Mask};
use crate::registry::TypeIdx;

bitflags! {
    /// Per-instance lifetime/visibility flags tracked in [`Header`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u8 {
        /// Set while the external API holds this object (one of the three
        /// independent lifetime roots).
        const EXTERNALLY_ADDED   = 1 << 0;
        /// Set while the object manages its own lifetime (the other root;
        /// see [`crate::concept`]).
        const AUTOMANAGED        = 1 << 1;
        /// Set by the kernel the moment it has decided to destroy this
        /// object; only then may its destructor actually run.
        const AUTHORIZED_DESTRUCTION = 1 << 2;
        /// Set once this object is present in its type's per-type index.
        const IN_INDEX           = 1 << 3;
        /// Never inserted into the per-type index at all (the `transient`
        /// creation flag).
        const FULLY_TRANSIENT    = 1 << 4;
        /// Was created with `force_immediate`: inserted into the index
        /// synchronously instead of through the pending-changes queue.
        const FORCE_IMMEDIATE    = 1 << 5;
        /// Narrows `AUTOMANAGED` for the concept/provider pattern only: the
        /// automanaged root was established purely to give the aggregator an
        /// identity before its first provider, not to outlive its requirers —
        /// it is released automatically the moment `required_count` returns
        /// to zero, instead of needing an explicit `self_destruct`. Ordinary
        /// `create_self` callers never set this, so their automanaged root
        /// stays independent of `required_count`, matching the three
        /// lifetime roots' documented independence.
        const AUTOMANAGED_TRACKS_REQUIRERS = 1 << 6;
    }
}

/// Header shared by every attached object, mirroring `attached_object::base`'s
/// private fields (`object_type_id`, `class_id`, `required_by`,
/// `requirements`, `authorized_destruction`, `user_added`, `automanaged`).
#[derive(Debug)]
pub struct Header {
    pub owner: crate::entity::Entity,
    pub type_idx: TypeIdx,
    pub class_id: TypeIdx,
    pub class_name: &'static str,
    pub flags: Flags,
    /// How many other attached objects on the same entity `require` this one.
    pub required_count: u32,
    /// Which types on the same entity *this* object requires — walked in
    /// reverse during teardown to release them.
    pub requirements: LazyMask,
    /// Position of this object in its type's per-type index, once present.
    pub index: Option<usize>,
}

impl Header {
    pub fn new(
        owner: crate::entity::Entity,
        type_idx: TypeIdx,
        class_id: TypeIdx,
        class_name: &'static str,
        mask_capacity: u32,
    ) -> Self {
        Header {
            owner,
            type_idx,
            class_id,
            class_name,
            flags: Flags::empty(),
            required_count: 0,
            requirements: LazyMask::new(mask_capacity),
            index: None,
        }
    }

    /// Whether this object may be destroyed right now: no longer externally
    /// held, not automanaged, and nothing still requires it. Mirrors the
    /// three-assertion check in `base::~base`.
    pub fn can_be_destroyed(&self) -> bool {
        !self.flags.contains(Flags::EXTERNALLY_ADDED)
            && !self.flags.contains(Flags::AUTOMANAGED)
            && self.required_count == 0
    }
}

/// A type-erased, shared handle to one attached object's header and payload.
///
/// Held both by the owning entity's attached-object vector and by that
/// type's per-type index, the same dual-ownership the original expresses
/// with a raw pointer into entity-owned storage. `Arc` plus an `RwLock`
/// around header and payload gives the same sharing without unsafe code; see
/// `DESIGN.md`'s Open Question #3.
pub struct AttachedObjectHandle {
    pub header: RwLock<Header>,
    /// `None` while the payload is under construction — the poisoned-pointer
    /// sentinel from `base_tpl::entity_get`'s assertion.
    payload: RwLock<Option<Box<dyn Any + Send + Sync>>>,
}

impl AttachedObjectHandle {
    pub(crate) fn new_poisoned(header: Header) -> Self {
        AttachedObjectHandle {
            header: RwLock::new(header),
            payload: RwLock::new(None),
        }
    }

    pub(crate) fn install_payload<T: Send + Sync + 'static>(&self, value: T) {
        let mut slot = self.payload.write();
        debug_assert_fatal(slot.is_none(), "attached object payload installed twice");
        *slot = Some(Box::new(value));
    }

    pub(crate) fn take_payload(&self) -> Box<dyn Any + Send + Sync> {
        self.payload
            .write()
            .take()
            .unwrap_or_else(|| fatal("taking payload from an attached object with none installed"))
    }

    pub fn is_poisoned(&self) -> bool {
        self.payload.read().is_none()
    }

    /// Runs `f` with a typed, shared reference to the payload.
    ///
    /// Fatal if the object is still under construction — reading a poisoned
    /// attached object is a programming error (a cyclic requirement almost
    /// always), matching `entity_get`'s assertion in the original.
    pub fn with<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.payload.read();
        let boxed = guard.as_ref().unwrap_or_else(|| {
            fatal("reading an attached object that is still under construction (cyclic requirement?)")
        });
        let value = boxed
            .downcast_ref::<T>()
            .unwrap_or_else(|| fatal("attached object type mismatch"));
        f(value)
    }

    /// Runs `f` with a typed, exclusive reference to the payload. See [`Self::with`].
    pub fn with_mut<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.payload.write();
        let boxed = guard.as_mut().unwrap_or_else(|| {
            fatal("writing an attached object that is still under construction (cyclic requirement?)")
        });
        let value = boxed
            .downcast_mut::<T>()
            .unwrap_or_else(|| fatal("attached object type mismatch"));
        f(value)
    }
}

/// Marker trait implemented by every concrete attached-object payload type.
///
/// Analogous to inheriting from `attached_object::base_tpl<DatabaseConf,
/// AttachedObjectClass, FinalClass>`: it names the class the type belongs to
/// (and hence the rights it has) without requiring real inheritance.
pub trait AttachedObject: Send + Sync + Sized + 'static {
    /// The class (component, concept, ...) this type belongs to.
    type Class: AttachedObjectClass;
}

/// Handed to an attached object's constructor and to every subsequent
/// `require`/`unrequire` call it makes.
///
/// Borrows the owning entity's record directly rather than going back
/// through the database's per-entity lock: the entity's writer lock is
/// acquired exactly once, at the top of
/// [`crate::database::Database::add`], and every nested `require` reborrows
/// the same `&mut EntityRecord` instead of trying to lock again —
/// re-acquiring a non-reentrant `parking_lot::RwLock` writer guard from
/// inside a nested call on the same entity would deadlock.
pub struct Cursor<'e, C: crate::access::DatabaseConfig> {
    pub(crate) db: &'e crate::database::Database<C>,
    pub(crate) entity: crate::entity::Entity,
    pub(crate) entity_guard: &'e mut crate::entity::EntityRecord,
    pub(crate) this: std::sync::Arc<AttachedObjectHandle>,
}

impl<'e, C: crate::access::DatabaseConfig> Cursor<'e, C> {
    /// Declares that this object depends on an attached object of type `U`
    /// on the same entity, creating it via `ctor` if absent.
    ///
    /// Mirrors `base_tpl::require`: increments `U`'s `required_count`, sets
    /// `U`'s bit in this object's requirements mask, and checks at compile
    /// time that this object's class is allowed to require `U`'s class.
    pub fn require<U: AttachedObject>(&mut self, ctor: impl FnOnce(Cursor<'_, C>) -> U) {
        crate::access::assert_class_can::<U::Class>(AccessRights::AO_REQUIREABLE);
        let type_idx = self.db.ensure_registered::<U>();
        let handle = match self.entity_guard.find(type_idx).cloned() {
            Some(existing) => existing,
            None => self.db.allocate_and_construct::<U>(
                self.entity_guard,
                self.entity,
                type_idx,
                crate::database::CreationFlags::Delayed,
                ctor,
            ),
        };
        handle.header.write().required_count += 1;
        self.this.header.write().requirements.set(type_idx);
    }

    /// Releases a dependency previously declared with [`Self::require`]. If
    /// `U` becomes destroyable as a result, it is torn down immediately.
    pub fn unrequire<U: AttachedObject>(&mut self) {
        let Some(type_idx) = crate::registry::lookup::<U>() else {
            fatal("unrequire called for a type that was never registered");
        };
        let Some(handle) = self.entity_guard.find(type_idx).cloned() else {
            fatal("unrequire called for a type that was never required");
        };
        {
            let mut header = handle.header.write();
            assert_fatal(header.required_count > 0, "unrequire: required_count underflow");
            header.required_count -= 1;
            if header.required_count == 0
                && header.flags.contains(Flags::AUTOMANAGED | Flags::AUTOMANAGED_TRACKS_REQUIRERS)
            {
                // The last provider just released a concept whose automanaged
                // root tracks its requirers — the same transition
                // `self_destruct` performs explicitly. A plain `create_self`
                // root (no AUTOMANAGED_TRACKS_REQUIRERS) is left untouched:
                // it stays alive independent of required_count.
                header.flags.remove(Flags::AUTOMANAGED);
            }
        }
        self.this.header.write().requirements.unset(type_idx);
        if handle.header.read().can_be_destroyed() {
            self.db.destroy_attached_object(self.entity_guard, type_idx, handle);
        }
    }

    /// Whether an attached object of type `U` is present on the same entity.
    pub fn has<U: AttachedObject>(&self) -> bool {
        crate::registry::lookup::<U>()
            .map(|idx| self.entity_guard.find(idx).is_some())
            .unwrap_or(false)
    }

    /// Whether this object currently `require`s an attached object of type
    /// `U` — implies `U` exists on the same entity.
    pub fn is_required<U: AttachedObject>(&self) -> bool {
        let Some(type_idx) = crate::registry::lookup::<U>() else {
            return false;
        };
        self.this.header.read().requirements.is_set(type_idx)
    }

    /// Reads a required attached object of type `U`, which must already be present.
    pub fn get_required<U: AttachedObject, R>(&self, f: impl FnOnce(&U) -> R) -> R {
        let type_idx = crate::registry::lookup::<U>()
            .unwrap_or_else(|| fatal("get_required: type was never registered"));
        let handle = self
            .entity_guard
            .find(type_idx)
            .unwrap_or_else(|| fatal("get_required: type not present on this entity"));
        handle.with(f)
    }

    /// Reads an attached object of type `U` that may or may not be
    /// `require`d, gated on `AO_UNSAFE_GETABLE`. Unlike [`Self::get_required`],
    /// nothing pins `U`'s lifetime to this call — another writer on the same
    /// entity could remove it the moment this returns. Concepts, which can't
    /// be `require`d by external callers, are read this way.
    pub fn get_unsafe<U: AttachedObject, R>(&self, f: impl FnOnce(&U) -> R) -> Option<R> {
        crate::access::assert_class_can::<U::Class>(AccessRights::AO_UNSAFE_GETABLE);
        let type_idx = crate::registry::lookup::<U>()?;
        let handle = self.entity_guard.find(type_idx)?;
        if handle.is_poisoned() {
            return None;
        }
        Some(handle.with(f))
    }

    /// Brings an automanaged instance of `U` into existence on this entity —
    /// the "self" lifetime root, independent of `require`/`unrequire`'s
    /// `required_count`. If `U` already exists it must already be
    /// automanaged; this is the only sanctioned way to create it.
    pub fn create_self<U: AttachedObject>(&mut self, ctor: impl FnOnce(Cursor<'_, C>) -> U) {
        crate::access::assert_class_can::<U::Class>(AccessRights::AUTOMANAGED);
        let type_idx = self.db.ensure_registered::<U>();
        match self.entity_guard.find(type_idx).cloned() {
            Some(existing) => {
                assert_fatal(
                    existing.header.read().flags.contains(Flags::AUTOMANAGED),
                    "create_self: an attached object of this type already exists but is not automanaged",
                );
            }
            None => {
                let handle = self.db.allocate_and_construct::<U>(
                    self.entity_guard,
                    self.entity,
                    type_idx,
                    crate::database::CreationFlags::Delayed,
                    ctor,
                );
                handle.header.write().flags.insert(Flags::AUTOMANAGED);
            }
        }
    }

    /// As [`Self::create_self`], but additionally marks the automanaged root
    /// as tracking `required_count` ([`Flags::AUTOMANAGED_TRACKS_REQUIRERS`]):
    /// the root is released automatically once `required_count` returns to
    /// zero, instead of needing an explicit [`Self::self_destruct`]. Used only
    /// by [`crate::concept::ConceptProvider::require_concept`] — a plain
    /// `create_self` caller's automanaged root must stay independent of its
    /// requirers.
    pub(crate) fn bind_concept_root<U: AttachedObject>(&mut self, ctor: impl FnOnce(Cursor<'_, C>) -> U) {
        self.create_self::<U>(ctor);
        let type_idx = crate::registry::lookup::<U>().unwrap_or_else(|| fatal("bind_concept_root: type not registered"));
        let handle = self
            .entity_guard
            .find(type_idx)
            .unwrap_or_else(|| fatal("bind_concept_root: create_self did not install the object"))
            .clone();
        handle.header.write().flags.insert(Flags::AUTOMANAGED_TRACKS_REQUIRERS);
    }

    /// Releases the automanaged root on `U`, tearing it down immediately if
    /// nothing else still holds it. The only sanctioned way to destroy an
    /// object created with [`Self::create_self`].
    pub fn self_destruct<U: AttachedObject>(&mut self) {
        crate::access::assert_class_can::<U::Class>(AccessRights::AUTOMANAGED);
        let Some(type_idx) = crate::registry::lookup::<U>() else {
            fatal("self_destruct called for a type that was never registered");
        };
        let Some(handle) = self.entity_guard.find(type_idx).cloned() else {
            fatal("self_destruct called for a type that does not exist on this entity");
        };
        {
            let mut header = handle.header.write();
            assert_fatal(
                !header.flags.contains(Flags::AUTHORIZED_DESTRUCTION),
                "self_destruct: destruction is already in progress for this object",
            );
            header.flags.remove(Flags::AUTOMANAGED);
        }
        if handle.header.read().can_be_destroyed() {
            self.db.destroy_attached_object(self.entity_guard, type_idx, handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> crate::entity::Entity {
        crate::entity::Entity {
            index: 0,
            generation: crate::entity::Generation(0),
        }
    }

    #[test]
    fn can_be_destroyed_requires_every_root_released() {
        let mut header = Header::new(owner(), 0, 0, "t", 64);
        assert!(header.can_be_destroyed());
        header.flags.insert(Flags::EXTERNALLY_ADDED);
        assert!(!header.can_be_destroyed());
        header.required_count += 1;
        header.flags.remove(Flags::EXTERNALLY_ADDED);
        assert!(!header.can_be_destroyed());
        header.required_count -= 1;
        assert!(header.can_be_destroyed());
        header.flags.insert(Flags::AUTOMANAGED);
        assert!(!header.can_be_destroyed());
    }

    #[test]
    fn handle_is_poisoned_until_payload_installed() {
        let handle = AttachedObjectHandle::new_poisoned(Header::new(owner(), 0, 0, "t", 64));
        assert!(handle.is_poisoned());
        handle.install_payload(42i32);
        assert!(!handle.is_poisoned());
        handle.with::<i32, ()>(|v| assert_eq!(*v, 42));
        handle.with_mut::<i32, ()>(|v| *v += 1);
        handle.with::<i32, ()>(|v| assert_eq!(*v, 43));
    }

    #[test]
    #[should_panic(expected = "still under construction")]
    fn reading_a_poisoned_handle_is_fatal() {
        let handle = AttachedObjectHandle::new_poisoned(Header::new(owner(), 0, 0, "t", 64));
        handle.with::<i32, ()>(|_| ());
    }

    #[test]
    #[should_panic(expected = "payload installed twice")]
    fn installing_a_payload_twice_is_fatal() {
        let handle = AttachedObjectHandle::new_poisoned(Header::new(owner(), 0, 0, "t", 64));
        handle.install_payload(1i32);
        handle.install_payload(2i32);
    }
}
