use thiserror::Error;

use palaver_shared::types::{GroupId, UserId};
use palaver_shared::{CryptoError, ProtocolError};

/// Errors produced by the group encryption layer.
#[derive(Error, Debug)]
pub enum GroupError {
    /// No local Sender Key exists for this group.
    #[error("No sender key for group {0}")]
    UnknownGroup(GroupId),

    /// No receiver state exists for this sender in this group.
    #[error("No sender key receiver for {sender} in group {group_id}")]
    UnknownSender { group_id: GroupId, sender: UserId },

    /// A key-distribution payload named a different group than expected.
    #[error("Distribution payload for group {actual}, expected {expected}")]
    GroupMismatch { expected: GroupId, actual: GroupId },

    /// Typed cryptographic validation failure (signature, index window,
    /// replay).  Always a local reject, never retried.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Persistence blob could not be decoded.
    #[error("Invalid key state export: {0}")]
    InvalidExport(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GroupError>;
