//! Error types for work-engine.
//!
//! [`Error`] covers failures of the crate's own plumbing (configuration,
//! telemetry, I/O). [`RunError`] is what a task or coordinator unit resolves
//! with when it does not produce a value; it is `Clone` because one result is
//! delivered to every observer of a task.

use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a unit of work.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    /// The work was cancelled, either explicitly or by propagation.
    #[error("operation cancelled")]
    Cancelled,

    /// Internal signal: the synchronous execution path is not provided and
    /// the asynchronous one must be used instead.
    #[error("synchronous execution is not implemented")]
    NotImplemented,

    #[error("operation timed out")]
    Timeout,

    #[error("{0}")]
    Custom(String),

    /// Arbitrary error raised by user code.
    #[error("{0}")]
    Failed(Arc<anyhow::Error>),
}

impl RunError {
    pub fn custom(message: impl Into<String>) -> Self {
        RunError::Custom(message.into())
    }

    pub fn failed(err: impl Into<anyhow::Error>) -> Self {
        RunError::Failed(Arc::new(err.into()))
    }

    /// Consumers use this to keep cancellations out of user-facing failure
    /// reporting.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunError::Cancelled)
    }
}

impl PartialEq for RunError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RunError::Cancelled, RunError::Cancelled) => true,
            (RunError::NotImplemented, RunError::NotImplemented) => true,
            (RunError::Timeout, RunError::Timeout) => true,
            (RunError::Custom(a), RunError::Custom(b)) => a == b,
            (RunError::Failed(a), RunError::Failed(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<anyhow::Error> for RunError {
    fn from(err: anyhow::Error) -> Self {
        RunError::Failed(Arc::new(err))
    }
}

pub type TaskResult<T> = std::result::Result<T, RunError>;
