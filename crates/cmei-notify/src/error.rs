/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Request failed: {0}")]
    Http(String),

    /// Downstream answered with a non-success status.
    #[error("Downstream error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid input: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, NotifyError>;
