//! Fixed-width bitmasks over attached-object type ids (component C3).
//!
//! Mirrors `enfield::inline_mask`/`delayed_mask`: a word array long enough to
//! hold one bit per registered type, with `match` implementing the subset
//! test `self & other == self`. Two variants are kept for the same reason the
//! original does: an entity's membership mask is read on every `get`/`has`
//! and is worth keeping inline, while an attached object's *requirements*
//! mask is usually empty and not worth allocating for up front.

use crate::registry::TypeIdx;

const WORD_BITS: u32 = 64;

fn word_count(capacity: u32) -> usize {
    ((capacity + WORD_BITS - 1) / WORD_BITS) as usize
}

fn split(id: TypeIdx) -> (usize, u64) {
    ((id / WORD_BITS) as usize, 1u64 << (id % WORD_BITS))
}

/// Common bitmask operations shared by [`InlineMask`] and [`LazyMask`].
pub trait Mask {
    /// Sets bit `id`.
    fn set(&mut self, id: TypeIdx);
    /// Clears bit `id`.
    fn unset(&mut self, id: TypeIdx);
    /// Returns whether bit `id` is set.
    fn is_set(&self, id: TypeIdx) -> bool;
    /// Returns whether any bit is set.
    fn has_any(&self) -> bool;
    /// Returns `self & other == self`, i.e. whether `self` is a subset of `other`.
    fn matches(&self, other: &Self) -> bool;
}

/// An always-allocated bitmask, sized at construction to `capacity` bits.
///
/// Used for an entity's type-membership mask, which is read on essentially
/// every public operation and is worth keeping eagerly allocated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineMask {
    words: Vec<u64>,
}

impl InlineMask {
    /// Creates an all-zero mask able to hold `capacity` distinct bits.
    pub fn new(capacity: u32) -> Self {
        InlineMask {
            words: vec![0u64; word_count(capacity)],
        }
    }
}

impl Mask for InlineMask {
    fn set(&mut self, id: TypeIdx) {
        let (word, bit) = split(id);
        self.words[word] |= bit;
    }

    fn unset(&mut self, id: TypeIdx) {
        let (word, bit) = split(id);
        self.words[word] &= !bit;
    }

    fn is_set(&self, id: TypeIdx) -> bool {
        let (word, bit) = split(id);
        self.words[word] & bit != 0
    }

    fn has_any(&self) -> bool {
        self.words.iter().any(|&w| w != 0)
    }

    fn matches(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(&s, &o)| s & o == s)
    }
}

/// A bitmask whose backing storage is allocated lazily, on first `set`.
///
/// Used for an attached object's requirements mask, which is empty for the
/// overwhelming majority of attached objects (`mask.hpp`'s `delayed_mask`
/// makes the same tradeoff — "we don't have any bit set: 0 & x == 0").
#[derive(Clone, Debug, Default)]
pub struct LazyMask {
    words: Option<Vec<u64>>,
    capacity: u32,
}

impl LazyMask {
    /// Creates an empty, unallocated mask able to hold `capacity` distinct bits
    /// once it is actually populated.
    pub fn new(capacity: u32) -> Self {
        LazyMask {
            words: None,
            capacity,
        }
    }

    fn ensure(&mut self) -> &mut Vec<u64> {
        self.words
            .get_or_insert_with(|| vec![0u64; word_count(self.capacity)])
    }

    /// Iterates the ids currently set. Empty iterator if never allocated.
    pub fn iter_set(&self) -> impl Iterator<Item = TypeIdx> + '_ {
        self.words.iter().flat_map(|words| {
            words.iter().enumerate().flat_map(|(word_idx, &word)| {
                (0..WORD_BITS).filter_map(move |bit| {
                    (word & (1u64 << bit) != 0)
                        .then(|| word_idx as TypeIdx * WORD_BITS + bit)
                })
            })
        })
    }
}

impl Mask for LazyMask {
    fn set(&mut self, id: TypeIdx) {
        let (word, bit) = split(id);
        self.ensure()[word] |= bit;
    }

    fn unset(&mut self, id: TypeIdx) {
        if let Some(words) = &mut self.words {
            let (word, bit) = split(id);
            words[word] &= !bit;
        }
    }

    fn is_set(&self, id: TypeIdx) -> bool {
        match &self.words {
            None => false,
            Some(words) => {
                let (word, bit) = split(id);
                words[word] & bit != 0
            }
        }
    }

    fn has_any(&self) -> bool {
        match &self.words {
            None => false,
            Some(words) => words.iter().any(|&w| w != 0),
        }
    }

    fn matches(&self, other: &Self) -> bool {
        match (&self.words, &other.words) {
            (None, _) => true,
            (Some(_), None) => !self.has_any(),
            (Some(s), Some(o)) => s.iter().zip(o.iter()).all(|(&s, &o)| s & o == s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_mask_set_unset_is_set() {
        let mut m = InlineMask::new(256);
        assert!(!m.is_set(130));
        m.set(130);
        assert!(m.is_set(130));
        assert!(m.has_any());
        m.unset(130);
        assert!(!m.is_set(130));
        assert!(!m.has_any());
    }

    #[test]
    fn inline_mask_match_is_subset() {
        let mut a = InlineMask::new(256);
        let mut b = InlineMask::new(256);
        a.set(1);
        b.set(1);
        b.set(2);
        assert!(a.matches(&b));
        assert!(!b.matches(&a));
    }

    #[test]
    fn lazy_mask_stays_unallocated_until_set() {
        let m = LazyMask::new(256);
        assert!(!m.is_set(5));
        assert!(!m.has_any());
        assert!(m.words.is_none());
    }

    #[test]
    fn lazy_mask_matches_like_inline() {
        let mut req = LazyMask::new(256);
        req.set(3);
        let mut owner = LazyMask::new(256);
        owner.set(3);
        owner.set(9);
        assert!(req.matches(&owner));
        assert!(!owner.matches(&req));
    }

    #[test]
    fn lazy_mask_iter_set() {
        let mut m = LazyMask::new(256);
        m.set(0);
        m.set(64);
        m.set(200);
        let got: Vec<_> = m.iter_set().collect();
        assert_eq!(got, vec![0, 64, 200]);
    }
}
