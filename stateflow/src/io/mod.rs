//! I/O helpers: run log destinations and TOML files.

pub mod config;
pub mod definitions;
pub mod run_log;
