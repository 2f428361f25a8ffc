//! Build state machine.
//!
//! `NotStarted → Applying(1) → … → Applying(n) → Complete`, with
//! `Applying(k) → Failed(k, reason)` on any error. Failed and Complete
//! are terminal.

use std::fmt;

use boxfile_core::error::{BuildError, Result};
use boxfile_core::event::{events, BuildEvent, EventEmitter};
use serde::Serialize;

/// Phase of a single build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "kebab-case")]
pub enum BuildPhase {
    NotStarted,
    Applying { position: usize },
    Failed { position: usize, reason: String },
    Complete,
}

impl BuildPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildPhase::Failed { .. } | BuildPhase::Complete)
    }

    /// Move to the next directive, or to Complete after the last one.
    pub fn advance(self, total: usize) -> Result<Self> {
        match self {
            BuildPhase::NotStarted if total > 0 => Ok(BuildPhase::Applying { position: 1 }),
            BuildPhase::Applying { position } if position < total => Ok(BuildPhase::Applying {
                position: position + 1,
            }),
            BuildPhase::Applying { position } if position == total => Ok(BuildPhase::Complete),
            other => Err(BuildError::InvalidTransition(format!(
                "cannot advance from {} with {} directives",
                other, total
            ))),
        }
    }

    /// Fail the directive currently being applied.
    pub fn fail(self, reason: impl Into<String>) -> Result<Self> {
        match self {
            BuildPhase::Applying { position } => Ok(BuildPhase::Failed {
                position,
                reason: reason.into(),
            }),
            other => Err(BuildError::InvalidTransition(format!("cannot fail from {}", other))),
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildPhase::NotStarted => write!(f, "not-started"),
            BuildPhase::Applying { position } => write!(f, "applying({})", position),
            BuildPhase::Failed { position, reason } => write!(f, "failed({}, {})", position, reason),
            BuildPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Drives a [`BuildPhase`] and publishes every transition.
pub(crate) struct PhaseTracker {
    phase: BuildPhase,
    total: usize,
    build_id: String,
    events: EventEmitter,
}

impl PhaseTracker {
    pub(crate) fn new(build_id: &str, total: usize, events: EventEmitter) -> Self {
        Self {
            phase: BuildPhase::NotStarted,
            total,
            build_id: build_id.to_string(),
            events,
        }
    }

    pub(crate) fn phase(&self) -> &BuildPhase {
        &self.phase
    }

    fn transition(&mut self, next: impl FnOnce(BuildPhase) -> Result<BuildPhase>) -> Result<()> {
        let current = std::mem::replace(&mut self.phase, BuildPhase::NotStarted);
        match next(current.clone()) {
            Ok(phase) => {
                tracing::trace!(build_id = %self.build_id, from = %current, to = %phase, "Build phase transition");
                self.phase = phase;
                Ok(())
            }
            Err(e) => {
                self.phase = current;
                Err(e)
            }
        }
    }

    /// Begin applying the next directive, returning its position.
    pub(crate) fn begin(&mut self, label: &str) -> Result<usize> {
        if self.phase == BuildPhase::NotStarted {
            self.events
                .emit(BuildEvent::empty(events::BUILD_STARTED, &self.build_id, None));
        }
        let total = self.total;
        self.transition(|p| p.advance(total))?;
        match self.phase {
            BuildPhase::Applying { position } => {
                self.events.emit(BuildEvent::with_string(
                    events::DIRECTIVE_APPLYING,
                    &self.build_id,
                    Some(position),
                    label,
                ));
                Ok(position)
            }
            _ => Err(BuildError::InvalidTransition(format!(
                "no directive left to apply ({})",
                self.phase
            ))),
        }
    }

    /// Mark the current directive as applied.
    pub(crate) fn applied(&self, position: usize, label: &str) {
        self.events.emit(BuildEvent::with_string(
            events::DIRECTIVE_APPLIED,
            &self.build_id,
            Some(position),
            label,
        ));
    }

    /// Fail the current directive.
    pub(crate) fn fail(&mut self, error: &BuildError) -> Result<()> {
        let cancelled = matches!(error, BuildError::Cancelled { .. });
        let reason = if cancelled {
            "cancelled".to_string()
        } else {
            error.to_string()
        };
        self.transition(|p| p.fail(reason.clone()))?;
        let key = if cancelled {
            events::BUILD_CANCELLED
        } else {
            events::BUILD_FAILED
        };
        if let BuildPhase::Failed { position, .. } = self.phase {
            self.events
                .emit(BuildEvent::with_string(key, &self.build_id, Some(position), reason));
        }
        Ok(())
    }

    /// Complete the build after the last directive.
    pub(crate) fn complete(&mut self) -> Result<()> {
        let total = self.total;
        self.transition(|p| p.advance(total))?;
        if self.phase != BuildPhase::Complete {
            return Err(BuildError::InvalidTransition(format!(
                "build ended while {}",
                self.phase
            )));
        }
        self.events
            .emit(BuildEvent::empty(events::BUILD_COMPLETED, &self.build_id, None));
        Ok(())
    }
}
