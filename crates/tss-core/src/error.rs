//! Error types for threshold wallet sessions

use std::time::Duration;
use thiserror::Error;

use crate::types::SessionKind;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while orchestrating keygen and signing sessions
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid session parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A participant's protocol engine rejected its input or failed internally
    #[error("Protocol error at party {party}: {reason}")]
    Protocol { party: String, reason: String },

    /// A message was addressed back to the party that produced it
    #[error("Party {party} tried to send a message to itself")]
    SelfRouting { party: String },

    /// A message named no recipients, or recipients outside the session
    #[error("Invalid message from party {party}: {reason}")]
    InvalidMessage { party: String, reason: String },

    /// Signing requested against an unknown address
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    /// A wallet with this address is already registered
    #[error("Wallet already exists: {0}")]
    DuplicateWallet(String),

    /// A wallet record does not satisfy the wallet invariants
    #[error("Invalid wallet record: {0}")]
    InvalidWalletRecord(String),

    /// Not enough distinct shares to form a signing quorum
    #[error("Quorum selection failed: required {required}, available {available}")]
    QuorumSelection { required: usize, available: usize },

    /// The session did not reach its expected terminal count in time
    #[error("{kind} session timed out after {elapsed:?}")]
    SessionTimeout { kind: SessionKind, elapsed: Duration },

    /// A terminal result was recorded after the session already completed
    #[error("Completion overrun: expected {expected} results, got {recorded}")]
    CompletionOverrun { expected: usize, recorded: usize },

    /// The session's channels were closed before the party could report
    #[error("Session closed")]
    SessionClosed,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a protocol failure attributed to `party`
    pub fn protocol(party: impl ToString, reason: impl Into<String>) -> Self {
        Error::Protocol {
            party: party.to_string(),
            reason: reason.into(),
        }
    }
}
