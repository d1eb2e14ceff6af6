//! Per-type attached-object pools (component C2).
//!
//! `enfield::default_attached_object_allocator` keeps one fixed-size raw
//! memory pool per `(type_id, transient?)` pair and hands out raw pointers.
//! Since every attached object here already lives behind an
//! [`crate::attached::AttachedObjectHandle`] (an `Arc`-shared, heap-boxed
//! cell — see `DESIGN.md` Open Question #3), there is no raw memory to pool;
//! instead this recycles the `AttachedObjectHandle` allocations themselves,
//! keeping a per-`(type, transient)` free list so that the common
//! create/destroy/create cycle for a given type doesn't keep round-tripping
//! through the global allocator.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::attached::{AttachedObjectHandle, Header};
use crate::registry::TypeIdx;

/// Caps how many retired handles of one `(type, transient)` pair are kept
/// around for reuse before the rest are just dropped.
const MAX_FREE_PER_TYPE: usize = 64;

#[derive(Default)]
struct Pool {
    free: Vec<Arc<AttachedObjectHandle>>,
}

/// A typed slab allocator: one durable and one transient pool per registered
/// type, shared across a [`crate::database::Database`].
#[derive(Default)]
pub struct SlabAllocator {
    pools: Mutex<AHashMap<(TypeIdx, bool), Pool>>,
}

impl SlabAllocator {
    pub fn new() -> Self {
        SlabAllocator::default()
    }

    /// Hands out a fresh, poisoned [`AttachedObjectHandle`] for `header`,
    /// reusing a retired handle of the same type when one is available.
    pub fn allocate(&self, header: Header, transient: bool) -> Arc<AttachedObjectHandle> {
        let key = (header.type_idx, transient);
        let mut pools = self.pools.lock();
        let pool = pools.entry(key).or_default();
        if let Some(handle) = pool.free.pop() {
            *handle.header.write() = header;
            return handle;
        }
        Arc::new(AttachedObjectHandle::new_poisoned(header))
    }

    /// Returns a handle whose attached object has just been destroyed to the
    /// pool for its type, for reuse by a future `allocate`.
    ///
    /// No-op (the handle is simply dropped) once `MAX_FREE_PER_TYPE` is
    /// already held, or if another `Arc` clone of this handle is still
    /// outstanding somewhere (e.g. a caller holding a stale reference) —
    /// recycling it into a reused slot while something still points at it
    /// would hand that caller another type's object underfoot.
    pub fn deallocate(&self, transient: bool, handle: Arc<AttachedObjectHandle>) {
        if Arc::strong_count(&handle) != 1 {
            return;
        }
        let key = (handle.header.read().type_idx, transient);
        let mut pools = self.pools.lock();
        let pool = pools.entry(key).or_default();
        if pool.free.len() < MAX_FREE_PER_TYPE {
            pool.free.push(handle);
        }
    }
}
