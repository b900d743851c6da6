//! Rejections raised by the offer program.

use loyalty_domain::{Address, DomainError, OnCompletion, Timestamp};
use thiserror::Error;

/// Why the offer program refused an operation.
///
/// A rejection aborts the whole operation (and any group it belongs to)
/// with no side effects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Arguments could not be decoded
    #[error("Malformed arguments: {0}")]
    MalformedArguments(String),

    /// First argument names no known method
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// On-completion action the program never approves
    #[error("Unsupported on-completion: {0}")]
    UnsupportedCompletion(OnCompletion),

    /// Create requires `now < start < end`
    #[error("Invalid offer window: now={now} start={start} end={end}")]
    InvalidWindow {
        now: Timestamp,
        start: Timestamp,
        end: Timestamp,
    },

    /// Setup is only allowed before the window opens
    #[error("Offer already started: now={now} start={start}")]
    AlreadyStarted { now: Timestamp, start: Timestamp },

    /// Action is only allowed inside `[start, end)`
    #[error("Outside offer window: now={now} start={start} end={end}")]
    OutsideWindow {
        now: Timestamp,
        start: Timestamp,
        end: Timestamp,
    },

    /// The reward was already paid out
    #[error("Offer already completed")]
    AlreadyCompleted,

    /// Sender lacks authority for this operation
    #[error("Unauthorized sender: {sender}")]
    Unauthorized { sender: Address },

    /// Close attempted while the window is open
    #[error("Offer window still open: now={now} start={start} end={end}")]
    WindowOpen {
        now: Timestamp,
        start: Timestamp,
        end: Timestamp,
    },

    /// Persisted record could not be decoded
    #[error("Corrupt offer state: {0}")]
    CorruptState(String),
}

impl From<DomainError> for Rejection {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidGlobalState(msg) => Rejection::CorruptState(msg),
            DomainError::InvalidStatus(v) => Rejection::CorruptState(format!("status {}", v)),
            other => Rejection::MalformedArguments(other.to_string()),
        }
    }
}
