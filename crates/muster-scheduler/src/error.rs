use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors that can occur within the attendance scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The schedule expression is invalid or unsupported.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The schedule has no occurrence after the requested instant.
    #[error("Schedule exhausted")]
    ScheduleExhausted,

    /// The zone id is not a known IANA time zone.
    #[error("Unknown time zone: {0}")]
    UnknownZone(String),

    /// A creation request failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// An event was observed in a state it can never legally occupy here.
    #[error("Invariant violated: {0}")]
    InvalidState(&'static str),

    /// A collaborator call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl SchedulerError {
    /// Whether a driven pass hitting this error must permanently disable
    /// the event rather than leave it due for retry.
    pub fn is_unrecoverable(&self) -> bool {
        match self {
            SchedulerError::InvalidSchedule(_)
            | SchedulerError::ScheduleExhausted
            | SchedulerError::UnknownZone(_)
            | SchedulerError::InvalidState(_)
            | SchedulerError::Gateway(GatewayError::Unreachable(_)) => true,
            SchedulerError::Database(_)
            | SchedulerError::Validation(_)
            | SchedulerError::Gateway(GatewayError::Transport(_)) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
