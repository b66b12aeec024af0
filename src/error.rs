//! Error types for securebank.
//!
//! Business-rule and transport failures are *not* errors: they surface as
//! [`RetCode`](crate::protocol::RetCode) values inside replies. `BankError`
//! covers the remaining taxonomy: I/O faults, framing violations that abort
//! a whole channel, and synchronization-primitive failures (which indicate
//! an unrecoverable concurrency-control fault).

use thiserror::Error;

/// Main error type for all securebank operations.
#[derive(Debug, Error)]
pub enum BankError {
    /// I/O error during FIFO operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// FIFO creation error (mkfifo).
    #[error("FIFO error: {0}")]
    Fifo(#[from] nix::Error),

    /// Protocol error (invalid frame, unknown operation, bad length).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A counting semaphore was closed while a task waited on it.
    ///
    /// The semaphores live as long as the server context; seeing this is an
    /// internal invariant violation, not a recoverable condition.
    #[error("semaphore failure: {0}")]
    Sync(#[from] tokio::sync::AcquireError),

    /// Rejected bootstrap parameters (office count, password shape).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A bank office task panicked or was aborted.
    #[error("task failure: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type alias using BankError.
pub type Result<T> = std::result::Result<T, BankError>;
