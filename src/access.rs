//! Compile-time class / access-rights configuration (component C7).
//!
//! `enfield::database_conf.hpp` fixes, per database configuration, which
//! classes of attached object exist (component, concept, ...) and which
//! operations (`ao_requireable`, `ext_creatable`, ...) each class grants,
//! checked at compile time via `static_assert_can<...>()`. Rust has no direct
//! equivalent of that template machinery, but a `const { assert!(...) }`
//! block inside a generic function *is* evaluated once per monomorphization
//! on stable Rust (since 1.79), which gives the same "impermissible
//! combination fails to compile" property without any unstable features.
//!
//! The harder part of the original — a two-dimensional
//! `specific_class_rights[target, caller]` override matrix keyed by
//! arbitrary user types — needs specialization to express generically, which
//! stable Rust doesn't have. This crate downgrades that one piece to a
//! runtime check performed once at registration time; see `DESIGN.md`.

use bitflags::bitflags;

use crate::registry::TypeIdx;

bitflags! {
    /// Rights grantable to an attached-object class, mirroring
    /// `enfield::attached_object_access`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessRights: u32 {
        /// Another attached object may `require` this class (creating it on demand).
        const AO_REQUIREABLE    = 1 << 2;
        /// Another attached object may destroy instances of this class.
        const AO_REMOVABLE      = 1 << 3;
        /// Instances of this class may be fetched via `get_unsafe`.
        const AO_UNSAFE_GETABLE = 1 << 4;
        /// This class may create and destroy itself (concepts/mixins).
        const AUTOMANAGED       = 1 << 5;
        /// The external API may create instances of this class.
        const EXT_CREATABLE     = 1 << 8;
        /// The external API may fetch instances of this class.
        const EXT_GETABLE       = 1 << 9;
        /// The external API may remove instances of this class.
        const EXT_REMOVABLE     = 1 << 10;
        /// Instances of this class are tracked in a per-type index for
        /// `for_each`/`query`.
        const DB_QUERYABLE      = 1 << 11;

        /// All rights grantable to other attached objects.
        const AO_ALL = Self::AO_REQUIREABLE.bits() | Self::AO_REMOVABLE.bits() | Self::AO_UNSAFE_GETABLE.bits();
        /// All rights grantable to the external API.
        const EXT_ALL = Self::EXT_CREATABLE.bits() | Self::EXT_GETABLE.bits() | Self::EXT_REMOVABLE.bits();
        /// Every right, to everybody.
        const ALL = Self::AO_ALL.bits() | Self::EXT_ALL.bits() | Self::AUTOMANAGED.bits() | Self::DB_QUERYABLE.bits();
    }
}

/// An attached-object class: components, concepts, or a user-defined
/// grouping, each with its own [`AccessRights`].
///
/// Implemented by a zero-sized marker type per class, the same role
/// `enfield`'s `class_t` template parameter plays.
pub trait AttachedObjectClass: 'static {
    /// Rights granted to this class by default.
    const RIGHTS: AccessRights;

    /// Human-readable class name, used only in diagnostics.
    const NAME: &'static str;
}

/// Marker class for ordinary externally-managed attached objects
/// ("components" in the glossary): full external and peer rights, not
/// automanaged.
pub struct Component;

impl AttachedObjectClass for Component {
    const RIGHTS: AccessRights = AccessRights::EXT_ALL
        .union(AccessRights::AO_ALL)
        .union(AccessRights::DB_QUERYABLE);
    const NAME: &'static str = "component";
}

/// Marker class for concept/mixin aggregators: automanaged, queryable,
/// peer-requireable, but never externally creatable or removable — only the
/// concept itself decides when it exists (see [`crate::concept`]).
pub struct Concept;

impl AttachedObjectClass for Concept {
    const RIGHTS: AccessRights = AccessRights::AUTOMANAGED
        .union(AccessRights::DB_QUERYABLE)
        .union(AccessRights::AO_REQUIREABLE)
        .union(AccessRights::EXT_GETABLE);
    const NAME: &'static str = "concept";
}

/// Compile-time database configuration: the bit width of every mask and the
/// default creation behavior of newly attached objects.
///
/// Implemented once per `Database` instantiation, analogous to a
/// `DatabaseConf` template parameter.
pub trait DatabaseConfig: 'static {
    /// Bit capacity of every [`crate::mask::InlineMask`]/[`crate::mask::LazyMask`]
    /// this configuration creates. Must be a multiple of 64.
    const MAX_TYPES: u32;

    /// Whether per-type attached-object indices (component C6's "AO-DB") are
    /// maintained at all. If false, [`crate::query`] can only fall back to
    /// the entity index.
    const USE_ATTACHED_OBJECT_DB: bool = true;

    /// Whether the flat entity index is maintained.
    const USE_ENTITY_DB: bool = true;

    /// Whether entities support strong reference counting
    /// (`duplicate_tracking_reference`).
    const ALLOW_REF_COUNTING_ON_ENTITIES: bool = true;

    /// Live-object count past which `optimize` is worth compacting an index.
    const OPTIMIZE_THRESHOLD: usize = 1024;
}

/// Checks at compile time, once per monomorphization, that `Class` grants
/// `required`.
///
/// Call this from every generic entry point that needs a class-level right
/// (`require::<U>()`, `Entity::add::<T>()`, ...); an impermissible
/// combination fails the build of that specific instantiation instead of
/// merely panicking at runtime, the direct analogue of
/// `static_assert_can<DatabaseConf, AttachedObjectClass, Operation>()`.
pub const fn assert_class_can<Class: AttachedObjectClass>(required: AccessRights) {
    assert!(
        Class::RIGHTS.contains(required),
        "operation not permitted for this attached object class"
    );
}

/// Runtime override of [`AttachedObjectClass::RIGHTS`] for one specific
/// `(requiring class, required class)` pair.
///
/// This is the documented downgrade of `specific_class_rights[target,
/// caller]` from a compile-time matrix to a runtime check: expressing an
/// arbitrary two-dimensional override table over user types at compile time
/// needs specialization, which stable Rust doesn't have. Unlike
/// [`assert_class_can`], which the kernel runs unconditionally on every
/// generic entry point, an override is only ever as strict as `Self::Class`'s
/// own default — so it can't be wired into that same blanket check without
/// specialization to resolve the conflict between the default and the
/// override impl. Instead a `Caller` class that needs the broader grant calls
/// [`has_specific_right`] itself, once, at the point it would otherwise be
/// rejected (typically the top of its own constructor, right before
/// `Cursor::require`).
pub trait SpecificRights<Caller: AttachedObjectClass> {
    /// Additional rights `Self` grants specifically to `Caller`, beyond
    /// [`AttachedObjectClass::RIGHTS`]. Defaults to no override.
    fn specific_rights() -> AccessRights {
        AccessRights::empty()
    }
}

/// Whether `Target`'s class grants `required` to `Caller`'s class, either by
/// its own default [`AttachedObjectClass::RIGHTS`] or by a
/// [`SpecificRights<Caller>`] override.
pub fn has_specific_right<Target, Caller>(required: AccessRights) -> bool
where
    Target: AttachedObjectClass + SpecificRights<Caller>,
    Caller: AttachedObjectClass,
{
    Target::RIGHTS.contains(required) || Target::specific_rights().contains(required)
}

/// A compile-time-distinct identifier for an attached-object class, used to
/// group types sharing the same rights in runtime bookkeeping (logging,
/// registration records) without needing a `TypeId` lookup.
pub type ClassId = TypeIdx;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_has_ext_and_ao_rights_but_not_automanaged() {
        assert!(Component::RIGHTS.contains(AccessRights::EXT_CREATABLE));
        assert!(Component::RIGHTS.contains(AccessRights::AO_REQUIREABLE));
        assert!(!Component::RIGHTS.contains(AccessRights::AUTOMANAGED));
    }

    #[test]
    fn concept_is_automanaged_and_not_externally_creatable() {
        assert!(Concept::RIGHTS.contains(AccessRights::AUTOMANAGED));
        assert!(!Concept::RIGHTS.contains(AccessRights::EXT_CREATABLE));
        assert!(Concept::RIGHTS.contains(AccessRights::DB_QUERYABLE));
    }

    #[test]
    fn const_assert_passes_for_granted_rights() {
        const _: () = assert_class_can::<Component>(AccessRights::EXT_CREATABLE);
    }

    struct Trusted;
    impl AttachedObjectClass for Trusted {
        const RIGHTS: AccessRights = AccessRights::empty();
        const NAME: &'static str = "trusted";
    }
    impl SpecificRights<Trusted> for Concept {
        fn specific_rights() -> AccessRights {
            AccessRights::AO_REMOVABLE
        }
    }
    impl SpecificRights<Component> for Concept {}

    #[test]
    fn specific_rights_override_grants_beyond_the_default() {
        assert!(!Concept::RIGHTS.contains(AccessRights::AO_REMOVABLE));
        assert!(has_specific_right::<Concept, Trusted>(AccessRights::AO_REMOVABLE));
        assert!(!has_specific_right::<Concept, Component>(AccessRights::AO_REMOVABLE));
    }
}
