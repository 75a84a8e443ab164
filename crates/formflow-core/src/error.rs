use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormError {
    // Form definition errors
    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Form has no fields")]
    EmptyForm,

    #[error("Duplicate field id: {0}")]
    DuplicateField(String),

    // Submission errors
    #[error("Form is not complete, current field: {0}")]
    NotComplete(String),

    #[error("Dispatch failed: {action}: {message}")]
    Dispatch { action: String, message: String },

    #[error("No dispatcher registered for action kind: {0}")]
    DispatcherMissing(String),

    #[error("Submission failed: {failures} action(s) failed")]
    Orchestration {
        failures: usize,
        details: Vec<String>,
    },

    #[error("Submission cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FormError {
    /// Shorthand for a transport failure of a single action.
    pub fn dispatch(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dispatch {
            action: action.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FormError>;
