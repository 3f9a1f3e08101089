//! Pluggable pipeline engine for analyzing collections of state records.
//!
//! An [`analysis::Analysis`] is an ordered list of named processes
//! (acquisition, grouping, measurement, reporting) folded over one shared
//! [`core::model::StateCollection`]. The crate is split the same way the
//! data flows:
//!
//! - **[`core`]**: Pure, deterministic logic (entity model, grouping
//!   materialization, selector chaining, hierarchical sort, integrity
//!   checks). No I/O.
//! - **[`io`]**: Side-effecting helpers (run log destinations, TOML
//!   configuration and definition files).
//!
//! Orchestration modules ([`process`], [`measure`], [`analysis`]) bind
//! plugins into processes and run them with per-step failure containment.

pub mod analysis;
pub mod core;
pub mod io;
pub mod logging;
pub mod measure;
pub mod process;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
