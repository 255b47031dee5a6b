//! # palaver-group
//!
//! Sender-Keys broadcast encryption for groups.
//!
//! Each member maintains their own symmetric ratchet chain per group.  When
//! sending, a member derives a one-time message key from their chain,
//! encrypts once for the whole group, signs the ciphertext, and advances the
//! chain one-way.  Every other member holds a mirror of that chain
//! ([`SenderKeyReceiver`]) and can derive the same message keys, tolerating
//! bounded out-of-order delivery through a skipped-key cache.
//!
//! Forward secrecy comes from two places: the one-way chain advance (a
//! compromised chain key never reveals earlier messages) and key rotation
//! (removing a member replaces the local chain wholesale, so the removed
//! member cannot read anything sent afterwards).

pub mod distribution;
pub mod ratchet;
pub mod receiver;
pub mod sender_key;

mod error;

pub use distribution::{KeyDelivery, KeyDistributionManager};
pub use error::GroupError;
pub use receiver::SenderKeyReceiver;
pub use sender_key::{SenderKey, SenderKeyPublic};
