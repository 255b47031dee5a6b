//! Local Sender Key: the sending half of the group ratchet.

use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use palaver_shared::crypto;
use palaver_shared::protocol::{EncryptedGroupMessage, SenderKeyDistribution};
use palaver_shared::types::{GroupId, UserId};
use palaver_shared::CryptoError;

use crate::ratchet::{self, ChainKey};

/// Per-group, per-member encryption state: a chain key, an Ed25519 signing
/// keypair, and the current chain position.
///
/// Mutated on every local encryption (index increments, chain key advances
/// one-way) and replaced wholesale on rotation.
pub struct SenderKey {
    chain_key: ChainKey,
    signing_key: SigningKey,
    index: u64,
}

/// The public half of a [`SenderKey`], as handed to other members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderKeyPublic {
    pub chain_key: ChainKey,
    pub signature_public: [u8; 32],
    pub index: u64,
}

/// Full serializable state for persistence.  Contains secret material;
/// the store encrypts it before it touches disk.
#[derive(Serialize, Deserialize)]
pub struct SenderKeyExport {
    pub chain_key: [u8; 32],
    pub signing_secret: [u8; 32],
    pub index: u64,
}

impl SenderKey {
    /// Generate a brand-new Sender Key with a random chain seed and a fresh
    /// signing keypair.
    pub fn generate() -> Self {
        Self {
            chain_key: ratchet::random_chain_key(),
            signing_key: SigningKey::generate(&mut OsRng),
            index: 0,
        }
    }

    /// Current chain position (index of the next message).
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Encrypt one plaintext for the whole group.
    ///
    /// Order matters: derive, encrypt, sign the ciphertext, record the
    /// index, then advance the chain.  A crash at any point leaves the
    /// chain key and index either both pre-advance (message never sent) or
    /// both post-advance (message fully formed), so a message key is never
    /// reused.
    pub fn encrypt(
        &mut self,
        group_id: GroupId,
        sender_id: UserId,
        plaintext: &[u8],
    ) -> Result<EncryptedGroupMessage, CryptoError> {
        let message_key = ratchet::derive_message_key(&self.chain_key, self.index);
        let ciphertext = crypto::encrypt(&message_key, plaintext)?;
        let signature = self.signing_key.sign(&ciphertext);

        let message = EncryptedGroupMessage {
            group_id,
            message_id: Uuid::new_v4(),
            sender_id,
            timestamp: Utc::now(),
            message_index: self.index,
            ciphertext,
            signature: signature.to_bytes().to_vec(),
        };

        self.chain_key = ratchet::advance_chain_key(&self.chain_key);
        self.index += 1;

        Ok(message)
    }

    /// Current public chain state, for distribution to other members.
    pub fn export_public(&self) -> SenderKeyPublic {
        SenderKeyPublic {
            chain_key: self.chain_key,
            signature_public: self.signing_key.verifying_key().to_bytes(),
            index: self.index,
        }
    }

    /// Build the wire distribution payload for this key.
    pub fn distribution(&self, group_id: GroupId, sender_id: UserId) -> SenderKeyDistribution {
        SenderKeyDistribution {
            group_id,
            sender_id,
            chain_key: self.chain_key,
            signature_public: self.signing_key.verifying_key().to_bytes(),
            message_index: self.index,
        }
    }

    /// Full private state for persistence.
    pub fn export_private(&self) -> SenderKeyExport {
        SenderKeyExport {
            chain_key: self.chain_key,
            signing_secret: *self.signing_key.as_bytes(),
            index: self.index,
        }
    }

    /// Restore from a private export.
    pub fn from_private_export(export: &SenderKeyExport) -> Self {
        Self {
            chain_key: export.chain_key,
            signing_key: SigningKey::from_bytes(&export.signing_secret),
            index: export.index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_advances_state() {
        let mut key = SenderKey::generate();
        let before = key.export_public();

        let msg = key.encrypt(GroupId::new(), UserId([7u8; 32]), b"hello").unwrap();

        assert_eq!(msg.message_index, 0);
        assert_eq!(key.index(), 1);
        let after = key.export_public();
        assert_ne!(before.chain_key, after.chain_key);
        assert_eq!(before.signature_public, after.signature_public);
    }

    #[test]
    fn test_signature_covers_ciphertext() {
        let mut key = SenderKey::generate();
        let msg = key.encrypt(GroupId::new(), UserId([7u8; 32]), b"signed").unwrap();

        let vk = ed25519_dalek::VerifyingKey::from_bytes(&key.export_public().signature_public).unwrap();
        let sig = ed25519_dalek::Signature::from_slice(&msg.signature).unwrap();
        use ed25519_dalek::Verifier;
        assert!(vk.verify(&msg.ciphertext, &sig).is_ok());
    }

    #[test]
    fn test_private_export_roundtrip() {
        let mut key = SenderKey::generate();
        key.encrypt(GroupId::new(), UserId([7u8; 32]), b"one").unwrap();
        key.encrypt(GroupId::new(), UserId([7u8; 32]), b"two").unwrap();

        let export = key.export_private();
        let restored = SenderKey::from_private_export(&export);

        assert_eq!(restored.index(), 2);
        assert_eq!(restored.export_public(), key.export_public());
    }

    #[test]
    fn test_distribution_matches_public_export() {
        let key = SenderKey::generate();
        let group_id = GroupId::new();
        let sender = UserId([1u8; 32]);

        let public = key.export_public();
        let dist = key.distribution(group_id, sender.clone());

        assert_eq!(dist.chain_key, public.chain_key);
        assert_eq!(dist.signature_public, public.signature_public);
        assert_eq!(dist.message_index, public.index);
        assert_eq!(dist.sender_id, sender);
    }
}
