use thiserror::Error;

use palaver_shared::types::{GroupId, UserId};
use palaver_shared::{CryptoError, ProtocolError};

/// Errors surfaced by engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Group key error: {0}")]
    Group(#[from] palaver_group::GroupError),

    #[error("Store error: {0}")]
    Store(#[from] palaver_store::StoreError),

    #[error("Call error: {0}")]
    Call(#[from] palaver_media::CallError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Wire protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invite error: {0}")]
    Invite(#[from] palaver_shared::invite::InviteError),

    #[error("Key state serialization error: {0}")]
    Persistence(#[from] bincode::Error),

    #[error("{member} is not a member of group {group_id}")]
    NotAMember { group_id: GroupId, member: UserId },

    #[error("Operation requires admin rights")]
    NotAdmin(UserId),

    /// The creator can never be removed from their group.
    #[error("The group creator cannot be removed")]
    CreatorImmutable,

    #[error("Transport channel closed")]
    TransportClosed,

    /// The key rotation itself stands; these recipients did not confirm
    /// delivery of the new key and cannot read messages until they do.
    #[error("Key delivery unconfirmed for {} recipient(s)", failed.len())]
    KeyDeliveryIncomplete { failed: Vec<UserId> },

    #[error("Engine state lock poisoned")]
    StatePoisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
