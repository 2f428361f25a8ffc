//! Boxfile Core - shared types for the Boxfile build toolchain.
//!
//! Error taxonomy, builder configuration, validation reports and build
//! events used by the runtime and the CLI.

pub mod config;
pub mod error;
pub mod event;
pub mod validation;

// Re-export commonly used types
pub use config::{BuilderConfig, InstallConfig, LogLevel, PlaceholderConfig};
pub use error::{BuildError, Result};
pub use event::{BuildEvent, EventEmitter, EventPayload};
pub use validation::{Rule, ValidationReport, Violation, ViolationClass};

/// Boxfile version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
