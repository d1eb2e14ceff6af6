//! Error handling.
//!
//! Almost everything this crate can detect going wrong is a programming
//! error: a cyclic requirement, destroying an object that's still required,
//! registering more attached-object types than a [`crate::access::DatabaseConfig`]
//! allows. Those are [fatal](fatal) by design and never recoverable, matching
//! `enfield`'s `check::debug::n_assert` semantics.
//!
//! The one exception is looking up an [`crate::Entity`] handle whose
//! generation no longer matches the live entity at that slot (for example
//! after a `WeakEntity` is resolved following entity destruction, or a stale
//! handle surviving past an `apply_changes`). That case is a [`Result`], not a
//! panic, the same way `specs::error::WrongGeneration` carves out a single
//! recoverable case from an otherwise-fatal world.

use std::fmt;

use crate::entity::Generation;

/// Errors this crate can return from a fallible API.
///
/// This enum is intentionally small: every other failure mode is a logic
/// error reported through [`fatal`] instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The entity handle's generation no longer matches the live entity at
    /// that slot; the entity it once referred to is gone.
    #[error("stale entity handle: expected generation {expected:?}, found {found:?}")]
    WrongGeneration {
        /// The generation recorded in the handle.
        expected: Generation,
        /// The generation currently alive at that slot, if any.
        found: Option<Generation>,
    },
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Logs `message` at `error` level and then panics.
///
/// All of this crate's invariant violations go through this function so that
/// the diagnostic is never lost even if something downstream catches the
/// unwind before it reaches a terminal.
#[track_caller]
pub(crate) fn fatal(message: impl fmt::Display) -> ! {
    log::error!("{message}");
    panic!("{message}");
}

/// Panics with `message` unless `cond` holds, logging first.
///
/// The debug-only counterpart to `enfield::check::debug::n_assert`: kept
/// cheap in release builds since every call site here guards an invariant
/// that, once broken, already corrupted state beyond safe recovery, so the
/// cost of checking it is only worth paying while developing against it.
#[track_caller]
pub(crate) fn debug_assert_fatal(cond: bool, message: impl fmt::Display) {
    if cfg!(debug_assertions) && !cond {
        fatal(message);
    }
}

/// Panics with `message` unless `cond` holds; never compiled out.
#[track_caller]
pub(crate) fn assert_fatal(cond: bool, message: impl fmt::Display) {
    if !cond {
        fatal(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_fatal_passes_silently_when_true() {
        assert_fatal(true, "unreachable");
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn assert_fatal_panics_when_false() {
        assert_fatal(false, "boom");
    }

    #[test]
    fn wrong_generation_display_names_both_generations() {
        let err = Error::WrongGeneration {
            expected: Generation(3),
            found: Some(Generation(4)),
        };
        let message = err.to_string();
        assert!(message.contains("Generation(3)"));
        assert!(message.contains("Generation(4)"));
    }
}
