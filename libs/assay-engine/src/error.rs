//! Error taxonomy for the grading engine.
//!
//! Errors never escape `ExecutionService::execute`; they are folded into a
//! failure `ExecutionResult` there. The variants exist so that "could not
//! grade" causes stay distinguishable in logs and in the error text.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("Unsupported dataset: {0}")]
    UnsupportedDataset(String),
    #[error("No kernel available for interpreter '{interpreter}' (installed: {installed:?})")]
    NoKernelAvailable {
        interpreter: String,
        installed: Vec<String>,
    },
    #[error("Missing dependency '{dependency}': {message}")]
    MissingDependency { dependency: String, message: String },
    #[error("Invalid content: {0}")]
    InvalidContent(String),
    #[error("Invalid expected criteria: {0}")]
    InvalidCriteria(String),
    #[error("Execution backend failed: {0}")]
    Backend(String),
    #[error("Query failed: {0}")]
    Query(String),
    #[error("Execution timed out after {0}s")]
    Timeout(u64),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Configuration-class errors are never worth resubmitting unchanged
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EngineError::UnsupportedEnvironment(_)
                | EngineError::UnsupportedLanguage(_)
                | EngineError::UnsupportedDataset(_)
                | EngineError::NoKernelAvailable { .. }
                | EngineError::MissingDependency { .. }
        )
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::InvalidContent(err.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Backend(err.to_string())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Query(err.to_string())
    }
}
