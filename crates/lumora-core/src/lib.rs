//! Lumora Core
//!
//! Ambient utilities shared by the Lumora crates: logging setup and profiling scopes.

pub mod logging;
pub mod profiling;
