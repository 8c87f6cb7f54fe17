//! Object model: schema, attribute values and managed object records.
//!
//! # Responsibility
//! - Define the schema every context and the store agree on.
//! - Keep record shape generic so any model can be persisted by one store.
//!
//! # Invariants
//! - Every managed object is identified by a stable `ObjectId`.
//! - A loaded `ObjectModel` is shared read-only by both contexts.

pub mod object;
pub mod schema;
pub mod value;
