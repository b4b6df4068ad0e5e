//! Release engine for mauzr.
//!
//! Resolves the version of a checkout from its `vYYMMDD.N` tags, builds
//! container images pinned to that version with provenance labels, publishes
//! them per architecture, drives the ESP firmware builder and uploads
//! MicroPython units.

pub mod config;
pub mod deploy;
pub mod docker;
pub mod esp;
pub mod git;
pub mod image;
pub mod index;
pub mod pipeline;
pub mod publish;
pub mod resolver;

pub use mauzr_types::error::{ReleaseError, ReleaseResult};
