//! Error types for the glyphtrain-core crate.

use thiserror::Error;

/// Top-level error type for training supervision.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("A training job is already active")]
    AlreadyRunning,

    #[error("Model is busy: {0}")]
    ModelBusy(String),

    #[error("Iteration {iteration} failed: {message}")]
    Iteration { iteration: u64, message: String },

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Worker context failed: {0}")]
    Worker(String),

    #[error("Reporting context is no longer running")]
    ReportingClosed,
}

impl TrainerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn model_busy(msg: impl Into<String>) -> Self {
        Self::ModelBusy(msg.into())
    }

    pub fn iteration(iteration: u64, msg: impl Into<String>) -> Self {
        Self::Iteration {
            iteration,
            message: msg.into(),
        }
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Errors raised synchronously at start time, before any worker exists.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_) | Self::AlreadyRunning)
    }
}

impl From<std::io::Error> for TrainerError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(TrainerError::config("no fonts").is_configuration());
        assert!(TrainerError::AlreadyRunning.is_configuration());
        assert!(!TrainerError::model_busy("evaluating").is_configuration());
        assert!(!TrainerError::iteration(3, "nan").is_configuration());
    }

    #[test]
    fn test_display() {
        let err = TrainerError::iteration(12, "matrix shape mismatch");
        assert_eq!(err.to_string(), "Iteration 12 failed: matrix shape mismatch");
    }
}
