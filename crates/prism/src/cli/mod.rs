//! Command implementations for the `prism` binary.

pub mod config;
pub mod handle;
