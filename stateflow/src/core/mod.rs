//! Deterministic, pure logic shared by every pipeline step.
//!
//! Core modules must be free of I/O side effects. They operate on the
//! in-memory entity arenas and return deterministic outputs suitable for
//! tests.

pub mod context;
pub mod grouping;
pub mod invariants;
pub mod model;
pub mod parameters;
pub mod sort;
