//! Validation report types.
//!
//! A report collects every rule violation found in a manifest. Each
//! violation names the offending directive's position (when it has one)
//! and the rule it breaks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error class a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationClass {
    /// Ordering, cardinality and well-formedness rules.
    Structural,
    /// An authoring-time sentinel is still present.
    UnresolvedPlaceholder,
}

/// A manifest rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rule {
    /// The manifest has no directives.
    EmptyManifest,
    /// No SelectBase directive.
    MissingBase,
    /// SelectBase is not at position 1.
    BaseNotFirst,
    /// More than one SelectBase directive.
    DuplicateBase,
    /// No SetCommand directive.
    MissingCommand,
    /// SetCommand is not the last directive.
    CommandNotLast,
    /// More than one SetCommand directive.
    DuplicateCommand,
    /// Positions are not exactly 1..=n in sequence.
    PositionOutOfOrder,
    /// A COPY source is absolute or climbs out of the build context.
    SourceEscapesContext,
    /// An EXPOSE spec is not a valid port.
    InvalidPort,
    /// A parameter still contains a placeholder token.
    UnresolvedPlaceholder,
}

impl Rule {
    /// The error class this rule reports under.
    pub fn class(self) -> ViolationClass {
        match self {
            Rule::UnresolvedPlaceholder => ViolationClass::UnresolvedPlaceholder,
            _ => ViolationClass::Structural,
        }
    }

    /// Short kebab-case identifier.
    pub fn code(self) -> &'static str {
        match self {
            Rule::EmptyManifest => "empty-manifest",
            Rule::MissingBase => "missing-base",
            Rule::BaseNotFirst => "base-not-first",
            Rule::DuplicateBase => "duplicate-base",
            Rule::MissingCommand => "missing-command",
            Rule::CommandNotLast => "command-not-last",
            Rule::DuplicateCommand => "duplicate-command",
            Rule::PositionOutOfOrder => "position-out-of-order",
            Rule::SourceEscapesContext => "source-escapes-context",
            Rule::InvalidPort => "invalid-port",
            Rule::UnresolvedPlaceholder => "unresolved-placeholder",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A single rule violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Offending directive position; `None` for manifest-wide violations
    pub position: Option<usize>,
    /// Violated rule
    pub rule: Rule,
    /// Human-readable detail
    pub detail: String,
}

impl Violation {
    pub fn new(position: Option<usize>, rule: Rule, detail: impl Into<String>) -> Self {
        Self {
            position,
            rule,
            detail: detail.into(),
        }
    }

    pub fn class(&self) -> ViolationClass {
        self.rule.class()
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(position) => write!(f, "step {}: {} ({})", position, self.detail, self.rule),
            None => write!(f, "{} ({})", self.detail, self.rule),
        }
    }
}

/// Outcome of validating a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    pub fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Whether any violation belongs to `class`.
    pub fn has_class(&self, class: ViolationClass) -> bool {
        self.violations.iter().any(|v| v.class() == class)
    }

    /// Whether any violation breaks `rule`.
    pub fn has_rule(&self, rule: Rule) -> bool {
        self.violations.iter().any(|v| v.rule == rule)
    }

    /// Sort violations by position, manifest-wide ones first.
    pub fn sorted(mut self) -> Self {
        self.violations.sort_by_key(|v| v.position);
        self
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.violations.is_empty() {
            return f.write_str("no violations");
        }
        let rendered: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", rendered.join("; "))
    }
}
