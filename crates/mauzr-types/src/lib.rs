//! Core types for the mauzr release tooling.
//!
//! This crate defines the shared data structures used by the version
//! resolver, the container image builder and the CLI: version tags,
//! resolved versions, build labels, configuration and errors. It contains
//! no process or network access.

pub mod config;
pub mod error;
pub mod labels;
pub mod platform;
pub mod version;
