//! Build manifests.
//!
//! A manifest is the ordered list of directives describing how to
//! construct an image. Parse it from text, validate it, and hand the
//! resulting [`ValidatedManifest`] to the build engine.
//!
//! # Supported Instructions
//!
//! FROM, WORKDIR, COPY, RUN, ENV, EXPOSE, CMD

pub mod directive;
mod parser;
mod validate;

use std::path::Path;

use boxfile_core::error::{BuildError, Result};
use boxfile_core::validation::ValidationReport;

use crate::placeholder::PlaceholderPolicy;

pub use directive::{Directive, DirectiveKind, ExposedPort, Protocol};

/// An ordered sequence of directives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    directives: Vec<Directive>,
}

impl Manifest {
    /// Build a manifest from already-positioned directives.
    pub fn new(directives: Vec<Directive>) -> Self {
        Self { directives }
    }

    /// Build a manifest from kinds, numbering them 1..=n.
    pub fn from_kinds(kinds: impl IntoIterator<Item = DirectiveKind>) -> Self {
        let directives = kinds
            .into_iter()
            .enumerate()
            .map(|(idx, kind)| Directive::new(idx + 1, kind))
            .collect();
        Self { directives }
    }

    /// Parse a manifest from its text content.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(Self {
            directives: parser::parse_directives(content)?,
        })
    }

    /// Parse a manifest from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BuildError::Config(format!(
                "Failed to read manifest at {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// Check ordering, cardinality, placeholder and path rules.
    pub fn validate(&self, policy: &PlaceholderPolicy) -> ValidationReport {
        validate::validate(&self.directives, policy)
    }

    /// Validate and, on success, return a manifest the engine accepts.
    pub fn into_validated(self, policy: &PlaceholderPolicy) -> Result<ValidatedManifest> {
        let report = self.validate(policy);
        if !report.is_valid() {
            return Err(BuildError::Invalid(report));
        }
        Ok(ValidatedManifest { inner: self })
    }

    /// Render back to manifest text, one directive per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for directive in &self.directives {
            out.push_str(&directive.to_string());
            out.push('\n');
        }
        out
    }
}

/// A manifest that has passed validation. Only obtainable through
/// [`Manifest::into_validated`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedManifest {
    inner: Manifest,
}

impl ValidatedManifest {
    pub fn directives(&self) -> &[Directive] {
        self.inner.directives()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.inner
    }

    pub fn into_inner(self) -> Manifest {
        self.inner
    }
}
