//! Error types for the sync engine.

use storefront_sync_protocol::{EntityRef, ProtocolError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the sync engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Transport-level error reported by the change-feed provider.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether reconnection should be attempted.
        retryable: bool,
    },

    /// The provider refused to open a channel.
    #[error("failed to open channel `{stream}`: {message}")]
    ChannelOpen {
        /// Stream name.
        stream: String,
        /// Provider message.
        message: String,
    },

    /// Reconnection gave up after the configured number of attempts.
    #[error("reconnection failed after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// The operation was cancelled by `unsubscribe_all`.
    #[error("sync cancelled")]
    Cancelled,

    /// The engine has not been initialized.
    #[error("sync engine not initialized")]
    NotInitialized,

    /// No tokio runtime is available to drive reconnection.
    #[error("no async runtime available for reconnection")]
    NoRuntime,

    /// Reading the current value before an optimistic mutation failed.
    #[error("failed to read {target}: {message}")]
    ReadFailed {
        /// Entity that was read.
        target: EntityRef,
        /// Underlying error message.
        message: String,
    },

    /// The authoritative store rejected an optimistic mutation.
    ///
    /// The local change has already been rolled back when this is returned.
    #[error("failed to commit {target}: {message}")]
    CommitFailed {
        /// Entity that was written.
        target: EntityRef,
        /// Underlying error message.
        message: String,
    },

    /// Authoritative store error.
    #[error("store error: {0}")]
    Store(String),

    /// Row could not be interpreted.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if reconnection may clear this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ChannelOpen { .. } => true,
            _ => false,
        }
    }

    /// Returns true if the error ends the current session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncError::ReconnectExhausted { .. })
    }
}
