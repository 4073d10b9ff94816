//! Error types shared across the workspace.

use crate::transition::TransitionError;
use crate::validation::ValidationError;

/// Errors raised by the waitlist core, stores and workflow.
#[derive(Debug, thiserror::Error)]
pub enum CmeiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The store refused a well-formed request (e.g. a full turma).
    #[error("{0}")]
    Rejected(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CmeiError {
    /// True for errors caught before any backend call was issued.
    pub fn is_client_side(&self) -> bool {
        matches!(self, CmeiError::Validation(_) | CmeiError::Transition(_))
    }

    /// Single human-readable message shown to the operator.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

pub type Result<T> = std::result::Result<T, CmeiError>;
