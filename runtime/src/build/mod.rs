//! Image building.
//!
//! Turns a validated manifest and a build context into an
//! [`ImageArtifact`](crate::artifact::ImageArtifact).

pub mod context;
pub mod deps;
pub mod engine;
pub mod installer;
pub mod layer;
pub mod phase;
pub mod state;

pub use context::BuildContext;
pub use engine::Builder;
pub use installer::{DeferredInstaller, DependencyInstaller, InstallOutcome, InstallRequest, ShellInstaller};
pub use phase::BuildPhase;
pub use state::BuildState;
