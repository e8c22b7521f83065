//! Structured error kinds for the pipeline.
//!
//! Any of these aborts the whole run; there is no retry or partial
//! recovery path. The driver attaches the failing stage name as
//! context before the error reaches `main`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed or misaligned input files
    #[error("schema error: {0}")]
    Schema(String),

    /// Data fails a pipeline invariant (empty post-filter matrix,
    /// zero-total cell at normalization, ...)
    #[error("validation error: {0}")]
    Validation(String),

    /// Read/write failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-convergent or degenerate numerical step
    #[error("numeric error: {0}")]
    Numeric(String),
}

impl PipelineError {
    /// Re-tag a filesystem failure with the `Io` kind so the driver can
    /// name it; non-I/O errors pass through untouched.
    pub fn tag_io(err: anyhow::Error) -> anyhow::Error {
        match err.downcast::<std::io::Error>() {
            Ok(io) => PipelineError::Io(io).into(),
            Err(other) => other,
        }
    }
}
