use thiserror::Error;

use crate::validation::ValidationReport;

/// Boxfile error types
#[derive(Error, Debug)]
pub enum BuildError {
    /// Manifest text could not be parsed
    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Manifest failed validation (structural or placeholder violations)
    #[error("Invalid manifest: {0}")]
    Invalid(ValidationReport),

    /// A COPY source or dependency manifest is absent
    #[error("Step {position}: missing resource '{path}'")]
    MissingResource { position: usize, path: String },

    /// The dependency installer failed
    #[error("Step {position}: `{command}` failed{}: {message}", exit_suffix(.exit_code))]
    ExternalTool {
        position: usize,
        command: String,
        exit_code: Option<i32>,
        message: String,
    },

    /// Build was cancelled between directives
    #[error("Step {position}: build cancelled")]
    Cancelled { position: usize },

    /// Illegal build phase transition
    #[error("Invalid build transition: {0}")]
    InvalidTransition(String),

    /// Layer creation error
    #[error("Layer error: {0}")]
    Layer(String),

    /// Template fill error
    #[error("Template error: {0}")]
    Template(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BuildError {
    /// Position of the directive the error is attributed to, if any.
    pub fn position(&self) -> Option<usize> {
        match self {
            BuildError::MissingResource { position, .. }
            | BuildError::ExternalTool { position, .. }
            | BuildError::Cancelled { position } => Some(*position),
            BuildError::Invalid(report) => report.violations().iter().find_map(|v| v.position),
            _ => None,
        }
    }
}

fn exit_suffix(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!(" (exit {code})"),
        None => String::new(),
    }
}

impl From<serde_json::Error> for BuildError {
    fn from(err: serde_json::Error) -> Self {
        BuildError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for BuildError {
    fn from(err: serde_yaml::Error) -> Self {
        BuildError::Serialization(err.to_string())
    }
}

/// Result type alias for Boxfile operations
pub type Result<T> = std::result::Result<T, BuildError>;
