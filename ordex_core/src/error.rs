//! Error types for ordex.

use thiserror::Error;

/// Failures raised while ingesting a model-parameter artifact.
///
/// Engines themselves are infallible: lookups report absence through
/// `Option`, and a rejected duplicate insert is a `false` return. Only the
/// RMI loader touches the filesystem, and a failed load leaves the engine in
/// its unloaded state where queries degrade to plain binary search.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed artifact at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("artifact is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("stage2 holds {found} records, branch_factor says {expected}")]
    StageCountMismatch { expected: usize, found: usize },
}

impl LoadError {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            line,
            reason: reason.into(),
        }
    }
}
