//! Boxfile CLI - validate, fill and build container image manifests.

pub mod commands;
pub mod output;
