//! Error taxonomy for workflow runs.
//!
//! External-tool failures (non-zero exit, timeout, spawn failure) are *not*
//! errors - the runner reports them as a `false` result and the orchestrator
//! decides how to proceed. Only validation, aggregate extraction failures,
//! I/O and cancellation surface through `WorkflowError`.

use std::path::PathBuf;

use thiserror::Error;

/// One archive that failed to extract.
#[derive(Debug, Clone)]
pub struct ExtractFailure {
    /// Archive path as it appeared in the filetable
    pub path: PathBuf,
    /// Underlying error message
    pub message: String,
}

/// Errors that abort a workflow stage.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("failed to extract {} data file(s)", .0.len())]
    Extraction(Vec<ExtractFailure>),

    /// Distinct terminal state, not a failure per se. Triggers subprocess
    /// cleanup and (when activation already succeeded) deactivation.
    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to write condition table: {0}")]
    Condition(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkflowError {
    /// True for the cancellation outcome, which unwinds across stage
    /// boundaries instead of being recovered locally.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkflowError::Cancelled)
    }
}
