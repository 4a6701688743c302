use std::fmt;
use thiserror::Error;

/// A single problem found while checking labels, bounds or a potential definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// The offending label, if the problem is tied to one.
    pub label: Option<String>,
    pub message: String,
}

impl Violation {
    pub fn general(message: impl Into<String>) -> Self {
        Self { label: None, message: message.into() }
    }

    pub fn for_label(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self { label: Some(label.into()), message: message.into() }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "'{}': {}", label, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Every violation collected during a pre-flight check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// Returns true if any violation is attached to `label`.
    pub fn mentions(&self, label: &str) -> bool {
        self.violations.iter().any(|v| v.label.as_deref() == Some(label))
    }

    /// Converts the report into `Ok(())` when nothing was found.
    pub fn into_result(self) -> Result<(), FitError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(FitError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} problem(s) found", self.violations.len())?;
        for v in &self.violations {
            write!(f, "\n  - {}", v)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum FitError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Validation failed: {0}")]
    Validation(ValidationReport),

    #[error("Invalid parameter label '{label}': {reason}")]
    InvalidLabel { label: String, reason: String },

    #[error("Mechanics engine failed on structure {structure}: {source:#}")]
    Engine {
        structure: usize,
        #[source]
        source: anyhow::Error,
    },

    /// The engine could not prepare a session or accept a potential; no
    /// single structure is at fault.
    #[error("Mechanics engine session failed: {0:#}")]
    Session(#[source] anyhow::Error),

    #[error("Fit cancelled after generation {generation}")]
    Cancelled { generation: usize },

    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FitError {
    pub(crate) fn invalid_label(label: &str, reason: impl Into<String>) -> Self {
        FitError::InvalidLabel { label: label.to_string(), reason: reason.into() }
    }
}
