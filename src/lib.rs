//! `aodb` is an entity-attached-object database.
//!
//! Entities own a heterogeneous set of *attached objects* (components,
//! concepts) linked by a `require`/`unrequire` dependency graph with
//! refcounted teardown. Attached objects of the same type are additionally
//! tracked in a dense per-type index so that systems can iterate or query
//! them without walking every entity.
//!
//! The pieces, roughly leaf-to-root:
//!
//! - [`mask`] — fixed-width bitmasks used both as an entity's type-membership
//!   set and as an attached object's requirements set.
//! - [`registry`] — process-wide `TypeId -> type_id` assignment.
//! - [`access`] — compile-time class/access-rights configuration.
//! - [`slab`] — per-type object pools.
//! - [`attached`] — the attached-object header and require/unrequire protocol.
//! - [`entity`] — the entity handle and its record.
//! - [`database`] — the kernel: entity pool, per-type indices, pending queue.
//! - [`query`] — the for-each / query engine.
//! - [`concept`] — a helper for building aggregator ("concept") objects.
//! - [`error`] — the one recoverable error type plus fatal-assertion helpers.

pub mod access;
pub mod attached;
pub mod concept;
pub mod database;
pub mod entity;
pub mod error;
pub mod mask;
pub mod query;
pub mod registry;
pub mod slab;

pub use access::{AccessRights, AttachedObjectClass, DatabaseConfig};
pub use attached::AttachedObject;
pub use database::{CreationFlags, Database};
pub use entity::{Entity, WeakEntity};
pub use error::{Error, Result};
pub use mask::Mask;
