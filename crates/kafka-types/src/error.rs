//! Error type shared by every kafka-bridge crate.

use thiserror::Error;

use crate::state::{ConsumerState, TransactionState};

/// Errors surfaced by the producer, consumer and transactional clients.
///
/// The type is `Clone` because failed delivery reports carry it and reports
/// are plain values handed to whichever task reads the event stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed input. Fatal to the call and never retried internally.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The native outbound queue is saturated. Retry after backoff or after
    /// draining events.
    #[error("Producer queue is full")]
    QueueFull,

    /// The broker or group/transaction coordinator rejected the operation.
    #[error("Broker error {code}: {reason}")]
    Broker { code: String, reason: String },

    /// A transaction transition was attempted from the wrong state.
    #[error("Invalid transaction state: expected {expected}, found {actual}")]
    TransactionState {
        expected: TransactionState,
        actual: TransactionState,
    },

    /// An abort failed while recovering from an earlier failure. The producer
    /// instance should be treated as unusable.
    #[error("Inconsistent transaction state: {cause}; abort also failed: {abort}")]
    InconsistentState { cause: Box<Error>, abort: Box<Error> },

    /// A consumer operation was called in the wrong lifecycle state.
    #[error("Cannot {operation} while consumer is {state}")]
    ClientState {
        operation: &'static str,
        state: ConsumerState,
    },

    /// The message was accepted by `send` but never acknowledged before the
    /// producer shut down.
    #[error("Message was not delivered before the producer shut down")]
    Undelivered,

    /// Any other failure reported by the native client.
    #[error("Native client error: {0}")]
    Native(String),

    #[error("Operation cancelled")]
    Cancelled,

    /// A blocking native call panicked or was cancelled on the blocking pool.
    #[error("Blocking task failed: {0}")]
    TaskJoin(String),
}

/// Coarse classification of [`Error`], for matching without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    QueueFull,
    Broker,
    TransactionState,
    InconsistentState,
    ClientState,
    Undelivered,
    Native,
    Cancelled,
    TaskJoin,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::QueueFull => ErrorKind::QueueFull,
            Self::Broker { .. } => ErrorKind::Broker,
            Self::TransactionState { .. } => ErrorKind::TransactionState,
            Self::InconsistentState { .. } => ErrorKind::InconsistentState,
            Self::ClientState { .. } => ErrorKind::ClientState,
            Self::Undelivered => ErrorKind::Undelivered,
            Self::Native(_) => ErrorKind::Native,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::TaskJoin(_) => ErrorKind::TaskJoin,
        }
    }

    /// Whether the caller may retry the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull)
    }

    pub fn broker(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Broker {
            code: code.into(),
            reason: reason.into(),
        }
    }

    pub fn inconsistent(cause: Error, abort: Error) -> Self {
        Self::InconsistentState {
            cause: Box::new(cause),
            abort: Box::new(abort),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Error::Cancelled
        } else {
            Error::TaskJoin(err.to_string())
        }
    }
}

/// Result type alias for kafka-bridge operations.
pub type Result<T> = std::result::Result<T, Error>;
