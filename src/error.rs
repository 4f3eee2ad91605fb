//! Error types.
//!
//! The library reports failures through [`FitError`]. The binary wraps those in
//! [`AppError`], which also carries the process exit code.

use thiserror::Error;

/// Errors raised by dataset construction, peak management and fitting.
///
/// Numerical non-convergence is not an error; it is reported through
/// `FitResult::converged`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    /// Malformed input at construction time (lengths, non-finite values, widths, bounds).
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Operation invoked in a state that does not allow it.
    #[error("Invalid state: {0}")]
    State(String),

    /// Peak index outside the current peak list.
    #[error("Peak index {index} out of range (peaks: {len})")]
    Index { index: usize, len: usize },
}

impl FitError {
    pub fn validation(message: impl Into<String>) -> Self {
        FitError::Validation(message.into())
    }

    pub fn state(message: impl Into<String>) -> Self {
        FitError::State(message.into())
    }
}

/// Result alias for library operations.
pub type Result<T> = std::result::Result<T, FitError>;

/// Error surfaced by the `peakfit` binary.
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        let exit_code = match err {
            FitError::Validation(_) => 2,
            FitError::State(_) | FitError::Index { .. } => 4,
        };
        AppError::new(exit_code, err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
