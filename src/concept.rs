//! Concept / mixin aggregator helper (component C13, design note "Concepts /
//! mixins").
//!
//! `enfield::ecs_concept` keeps its own `concept_providers` vector: each
//! provider registers itself in its constructor and deregisters in its
//! destructor, and the concept calls `self_destruct()` once that vector
//! empties.
//!
//! This crate doesn't need a separate vector for that: a provider's
//! constructor brings the concept into existence through
//! [`Cursor::bind_concept_root`] — the same automanaged lifetime root
//! `ecs_concept`'s providers establish by pushing onto `concept_providers`,
//! marked (unlike a plain [`Cursor::create_self`] root) to track this one
//! object's requirers — then `require`s it like any other dependency, so
//! [`crate::attached::Header::required_count`] tracks exactly the providers
//! currently attached. [`crate::database::Database::destroy_attached_object`]'s
//! teardown-unwind clears the automanaged flag itself once `required_count`
//! reaches zero (mirroring `self_destruct` on an empty provider list) and
//! destroys the concept immediately after. The `Concept`
//! [`crate::access::AttachedObjectClass`] marker exists only to deny external
//! creation/removal (`SPEC_FULL.md` §4.C7), not to change how teardown works.

use crate::access::{Concept, DatabaseConfig};
use crate::attached::{AttachedObject, Cursor};

/// Implemented by a provider type naming the concept it aggregates into.
///
/// `require_concept` is a thin, named wrapper around
/// [`Cursor::bind_concept_root`]/[`Cursor::require`] so call sites read as
/// "this type provides `Conc`" rather than an anonymous dependency.
pub trait ConceptProvider: AttachedObject {
    /// The concept this type contributes to.
    type Concept: AttachedObject<Class = Concept>;

    /// Registers `self` as a provider of `Self::Concept` on the same entity,
    /// constructing the concept via `ctor` the first time any provider
    /// requires it. Call this from `Self`'s own constructor.
    fn require_concept<C: DatabaseConfig>(
        cursor: &mut Cursor<'_, C>,
        ctor: impl FnOnce(Cursor<'_, C>) -> Self::Concept,
    ) {
        cursor.bind_concept_root::<Self::Concept>(ctor);
        // bind_concept_root guarantees Self::Concept already exists, so
        // require's own construction path never runs.
        cursor.require::<Self::Concept>(|_| {
            crate::error::fatal("require_concept: concept should already exist after bind_concept_root")
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attached::AttachedObject;
    use crate::database::{CreationFlags, Database};

    struct ConceptTestConf;
    impl DatabaseConfig for ConceptTestConf {
        const MAX_TYPES: u32 = 64;
    }

    /// An aggregator every shape-ish component contributes to.
    struct Collidable;
    impl AttachedObject for Collidable {
        type Class = crate::access::Concept;
    }

    struct Circle;
    impl AttachedObject for Circle {
        type Class = crate::access::Component;
    }
    impl ConceptProvider for Circle {
        type Concept = Collidable;
    }

    struct Square;
    impl AttachedObject for Square {
        type Class = crate::access::Component;
    }
    impl ConceptProvider for Square {
        type Concept = Collidable;
    }

    #[test]
    fn concept_exists_while_any_provider_requires_it_and_vanishes_once_the_last_does() {
        let db: Database<ConceptTestConf> = Database::new();
        let e = db.create_entity();

        db.add::<Circle>(e, CreationFlags::Delayed, |mut cursor| {
            Circle::require_concept(&mut cursor, |_inner| Collidable);
            Circle
        });
        assert!(db.get_handle::<Collidable>(e).is_some());

        db.add::<Square>(e, CreationFlags::Delayed, |mut cursor| {
            Square::require_concept(&mut cursor, |_inner| Collidable);
            Square
        });
        assert!(db.get_handle::<Collidable>(e).is_some());

        db.remove::<Circle>(e);
        assert!(
            db.get_handle::<Collidable>(e).is_some(),
            "Square still provides Collidable"
        );

        db.remove::<Square>(e);
        assert!(
            db.get_handle::<Collidable>(e).is_none(),
            "no provider left, the concept should self-destruct"
        );
    }

    /// A concept can exist purely via the automanaged root, with zero
    /// current requirers — `create_self` alone is enough to bring it into
    /// existence and keep it alive until `self_destruct` releases it.
    #[test]
    fn concept_survives_via_automanaged_root_with_no_requirers() {
        let db: Database<ConceptTestConf> = Database::new();
        let e = db.create_entity();

        db.add::<Circle>(e, CreationFlags::Delayed, |mut cursor| {
            cursor.create_self::<Collidable>(|_inner| Collidable);
            Circle
        });
        assert!(db.get_handle::<Collidable>(e).is_some());
        assert_eq!(
            db.get_handle::<Collidable>(e)
                .map(|h| h.header.read().required_count),
            Some(0),
            "nothing requires it, only the automanaged root holds it up"
        );

        db.remove::<Circle>(e);
        assert!(
            db.get_handle::<Collidable>(e).is_some(),
            "Circle never required the concept, only created it — removing Circle shouldn't touch it"
        );
    }
}
