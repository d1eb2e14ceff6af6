//! The for-each / query engine (component C8).
//!
//! `enfield::database::for_each_list` picks the per-type index with the
//! fewest live entries among the callback's argument types and iterates
//! just that one, checking every other argument's bit against a
//! precomputed mask. The single-type case lives directly on
//! [`crate::database::Database`] (`for_each_of_type`, `query`); this module
//! adds the two-type case, the shape every sample in
//! `original_source/enfield/samples` actually uses.

use crate::access::DatabaseConfig;
use crate::attached::AttachedObject;
use crate::database::Database;

/// Visits every entity that has both `A` and `B`, iterating whichever of the
/// two per-type indices currently holds fewer live entries and fetching the
/// other type directly off the same entity.
///
/// A visited object found still under construction (the poisoned-pointer
/// placeholder) is silently skipped rather than passed to `f` — it signals
/// "this entity is mid-construction", not an error, matching
/// `for_each_list`'s handling of a `nullptr` candidate.
pub fn for_each2<C, A, B>(db: &Database<C>, mut f: impl FnMut(&A, &B))
where
    C: DatabaseConfig,
    A: AttachedObject,
    B: AttachedObject,
{
    let a_len = db.index_len::<A>();
    let b_len = db.index_len::<B>();

    match (a_len, b_len) {
        (Some(a_len), Some(b_len)) if a_len <= b_len => {
            let Some(b_idx) = crate::registry::lookup::<B>() else {
                return;
            };
            db.for_each_of_type_locked::<A>(|_owner, a: &A, rec| {
                if let Some(b_handle) = rec.find(b_idx) {
                    if !b_handle.is_poisoned() {
                        b_handle.with::<B, ()>(|b| f(a, b));
                    }
                }
            });
        }
        (Some(_), Some(_)) => {
            let Some(a_idx) = crate::registry::lookup::<A>() else {
                return;
            };
            db.for_each_of_type_locked::<B>(|_owner, b: &B, rec| {
                if let Some(a_handle) = rec.find(a_idx) {
                    if !a_handle.is_poisoned() {
                        a_handle.with::<A, ()>(|a| f(a, b));
                    }
                }
            });
        }
        _ => {
            let Some(a_idx) = crate::registry::lookup::<A>() else {
                return;
            };
            let Some(b_idx) = crate::registry::lookup::<B>() else {
                return;
            };
            db.for_each_entity_with_types(&[a_idx, b_idx], |_entity, rec| {
                let (Some(a_handle), Some(b_handle)) = (rec.find(a_idx), rec.find(b_idx)) else {
                    return;
                };
                if a_handle.is_poisoned() || b_handle.is_poisoned() {
                    return;
                }
                a_handle.with::<A, ()>(|a| b_handle.with::<B, ()>(|b| f(a, b)));
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Component;
    use crate::database::{CreationFlags, Database};

    struct QueryTestConf;
    impl DatabaseConfig for QueryTestConf {
        const MAX_TYPES: u32 = 64;
    }

    struct Health(i32);
    impl AttachedObject for Health {
        type Class = Component;
    }

    struct Shield(i32);
    impl AttachedObject for Shield {
        type Class = Component;
    }

    #[test]
    fn visits_only_entities_that_have_both_types() {
        let db: Database<QueryTestConf> = Database::new();

        let both = db.create_entity();
        db.add::<Health>(both, CreationFlags::ForceImmediate, |_c| Health(10));
        db.add::<Shield>(both, CreationFlags::ForceImmediate, |_c| Shield(5));

        let only_health = db.create_entity();
        db.add::<Health>(only_health, CreationFlags::ForceImmediate, |_c| Health(20));

        let mut seen = Vec::new();
        for_each2::<QueryTestConf, Health, Shield>(&db, |h, s| seen.push((h.0, s.0)));
        assert_eq!(seen, vec![(10, 5)]);
    }
}
