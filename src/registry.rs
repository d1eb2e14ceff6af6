//! Process-wide attached-object type registry (component C1).
//!
//! `enfield::type_registry` assigns each `(Type, Class)` a dense integer id
//! via a C++ template-static counter: one counter instance per
//! instantiation. Rust statics declared inside a generic function don't work
//! the same way — there is exactly one instance of the static regardless of
//! the type parameter — so this is rebuilt on top of a `TypeId`-keyed map
//! instead, the same technique `shred`/`specs` use for their own resource
//! registries (see `world_ext.rs`'s `TypeId`-based `MetaTable`).

use std::any::{type_name, TypeId};
use std::mem::{align_of, size_of};

use ahash::AHashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::assert_fatal;

/// Dense id assigned to an attached-object type. Stable for the lifetime of
/// the process, not across runs.
pub type TypeIdx = u32;

/// Size/alignment/name bookkeeping recorded once per registered type.
///
/// Mirrors `enfield::type_registry::allocator_info_t` and `debug_info_t`,
/// merged into one record since nothing here needs them stored separately.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub idx: TypeIdx,
    pub size: usize,
    pub align: usize,
    pub name: &'static str,
}

struct Registry {
    by_type: AHashMap<TypeId, TypeIdx>,
    infos: Vec<TypeInfo>,
}

impl Registry {
    fn new() -> Self {
        Registry {
            by_type: AHashMap::new(),
            infos: Vec::new(),
        }
    }
}

static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| Mutex::new(Registry::new()));

/// A second, unbounded `TypeId`-keyed table used only to assign stable ids to
/// attached-object *classes* (`Component`, `Concept`, ...) for bookkeeping
/// purposes. Separate from [`REGISTRY`] because classes don't occupy a mask
/// bit and aren't subject to `DatabaseConfig::MAX_TYPES`.
static CLASS_REGISTRY: Lazy<Mutex<AHashMap<TypeId, TypeIdx>>> = Lazy::new(|| Mutex::new(AHashMap::new()));

/// Assigns (or looks up) a dense id for attached-object class `T`.
pub fn class_id<T: 'static>() -> TypeIdx {
    let key = TypeId::of::<T>();
    let mut reg = CLASS_REGISTRY.lock();
    let next = reg.len() as TypeIdx;
    *reg.entry(key).or_insert(next)
}

/// Registers `T` if it isn't already known and returns its dense id.
///
/// `max_types` is the configured [`crate::access::DatabaseConfig::MAX_TYPES`]
/// ceiling; exceeding it on first registration of the over-limit type is a
/// fatal assertion, matching `base::base`'s
/// `object_type_id < DatabaseConf::max_attached_objects_types` check.
pub fn register<T: 'static>(max_types: u32) -> TypeIdx {
    let key = TypeId::of::<T>();
    let mut reg = REGISTRY.lock();
    if let Some(&idx) = reg.by_type.get(&key) {
        return idx;
    }
    let idx = reg.infos.len() as TypeIdx;
    assert_fatal(
        idx < max_types,
        format_args!(
            "too many attached object types registered ({idx} >= configured max {max_types})"
        ),
    );
    let info = TypeInfo {
        idx,
        size: size_of::<T>(),
        align: align_of::<T>(),
        name: type_name::<T>(),
    };
    log::debug!("registered attached object type {} as #{idx}", info.name);
    reg.infos.push(info);
    reg.by_type.insert(key, idx);
    idx
}

/// Looks up the dense id for `T`, if it has been registered.
pub fn lookup<T: 'static>() -> Option<TypeIdx> {
    REGISTRY.lock().by_type.get(&TypeId::of::<T>()).copied()
}

/// Returns a copy of the bookkeeping record for `idx`, if registered.
pub fn info(idx: TypeIdx) -> Option<TypeInfo> {
    REGISTRY.lock().infos.get(idx as usize).cloned()
}

/// Number of distinct attached-object types registered so far.
pub fn registered_count() -> usize {
    REGISTRY.lock().infos.len()
}

/// Test-only: wipes the registry so each test gets a fresh type-id space.
///
/// Only meant for `#[test]` isolation; never call this outside tests, since
/// any live [`crate::database::Database`] built against the old ids would
/// have its type ids silently reassigned out from under it.
#[cfg(test)]
pub fn reset_for_tests() {
    let mut reg = REGISTRY.lock();
    reg.by_type.clear();
    reg.infos.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    struct A;
    struct B;

    #[test]
    fn assigns_dense_ids_and_is_idempotent() {
        reset_for_tests();
        let a = register::<A>(256);
        let b = register::<B>(256);
        assert_ne!(a, b);
        assert_eq!(register::<A>(256), a);
        assert_eq!(registered_count(), 2);
    }

    #[test]
    #[should_panic(expected = "too many attached object types")]
    fn panics_past_configured_max() {
        reset_for_tests();
        register::<A>(0);
    }
}
