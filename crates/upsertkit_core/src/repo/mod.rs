//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define entity-generic data access contracts.
//! - Isolate SQLite query details from the upsert engines.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`, `MissingKeyValue`)
//!   in addition to DB transport errors.
//! - Driver errors are wrapped, never rewritten, so classification still sees
//!   the driver result codes.

pub mod entity_repo;
