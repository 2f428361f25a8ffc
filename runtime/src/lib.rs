//! Boxfile Runtime - manifest interpreter and image build engine.
//!
//! Parses and validates build manifests, resolves placeholder tokens,
//! and applies directives in order to produce layered image artifacts.

#![allow(clippy::result_large_err)]

pub mod artifact;
pub mod build;
pub mod manifest;
pub mod placeholder;

// Re-export common types
pub use artifact::{FilesystemDelta, HistoryEntry, ImageArtifact};
pub use build::{
    BuildContext, BuildPhase, BuildState, Builder, DeferredInstaller, DependencyInstaller,
    InstallOutcome, InstallRequest, ShellInstaller,
};
pub use manifest::{Directive, DirectiveKind, ExposedPort, Manifest, Protocol, ValidatedManifest};
pub use placeholder::{fill, parse_env_file, parse_pairs, PlaceholderPolicy, Vars};

/// Boxfile Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Manifest file names looked up in a build context, in order.
pub const MANIFEST_NAMES: &[&str] = &["Boxfile", "Dockerfile"];
