use thiserror::Error;

/// Crate-wide error taxonomy for the ticket engine.
///
/// Permission and precondition failures are user-visible and non-retryable;
/// callers must surface them, never swallow them as success. Classification
/// and identifier-resolution misses are NOT errors; those paths degrade to a
/// clarification prompt instead.
#[derive(Debug, Error)]
pub enum TicketError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("ticket {0} not found")]
    NotFound(i64),

    #[error("user {user} is not allowed to {action}")]
    PermissionDenied { user: String, action: String },

    #[error("ticket {id} is {state}, expected pending")]
    PreconditionFailed { id: i64, state: String },

    #[error("team {team} already confirmed ticket {id}")]
    AlreadyConfirmed { id: i64, team: String },

    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage boundary error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TicketError>;
