//! Receiving half of the group ratchet: a mirror of one remote member's
//! chain, plus a bounded cache of skipped-ahead message keys.

use std::collections::BTreeMap;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

use palaver_shared::constants::MAX_SKIP_KEYS;
use palaver_shared::crypto;
use palaver_shared::protocol::{EncryptedGroupMessage, SenderKeyDistribution};
use palaver_shared::CryptoError;

use crate::ratchet::{self, ChainKey, MessageKey};
use crate::sender_key::SenderKeyPublic;

/// Mirror of a remote member's public chain state.
///
/// Invariants: the chain key never regresses; `chain_index` is monotonically
/// non-decreasing.  Messages behind the chain position are only served from
/// the skip cache, each key at most once.
pub struct SenderKeyReceiver {
    chain_key: ChainKey,
    verify_key: [u8; 32],
    /// Index the chain key currently corresponds to.
    chain_index: u64,
    /// Highest message index ever requested, consumed or not.
    highest_seen: u64,
    /// Derived-but-unconsumed message keys, by index.  Capped at
    /// [`MAX_SKIP_KEYS`] entries, pruned oldest-index-first.
    skipped: BTreeMap<u64, MessageKey>,
}

/// Serializable receiver state for persistence across restarts.
#[derive(Serialize, Deserialize)]
pub struct ReceiverExport {
    pub chain_key: [u8; 32],
    pub verify_key: [u8; 32],
    pub chain_index: u64,
    pub highest_seen: u64,
    pub skipped: Vec<(u64, [u8; 32])>,
}

impl SenderKeyReceiver {
    /// Construct from a sender's exported public state.
    pub fn from_public_export(public: &SenderKeyPublic) -> Self {
        Self {
            chain_key: public.chain_key,
            verify_key: public.signature_public,
            chain_index: public.index,
            highest_seen: public.index,
            skipped: BTreeMap::new(),
        }
    }

    /// Construct from a wire distribution payload.
    pub fn from_distribution(dist: &SenderKeyDistribution) -> Self {
        Self::from_public_export(&SenderKeyPublic {
            chain_key: dist.chain_key,
            signature_public: dist.signature_public,
            index: dist.message_index,
        })
    }

    /// Verify and decrypt one group message.
    ///
    /// The signature is checked before any cipher work, so tampering fails
    /// fast without touching the ratchet.  Out-of-order delivery within the
    /// skip window is tolerated; a key is consumed at most once.
    pub fn decrypt(&mut self, message: &EncryptedGroupMessage) -> Result<Vec<u8>, CryptoError> {
        self.verify_signature(message)?;

        let index = message.message_index;

        if index < self.chain_index {
            // Behind the chain: only the skip cache can still serve this.
            if let Some(key) = self.skipped.remove(&index) {
                debug!(index, "Serving message key from skip cache");
                return crypto::decrypt(&key, &message.ciphertext);
            }
            if self.highest_seen.saturating_sub(index) > MAX_SKIP_KEYS as u64 {
                return Err(CryptoError::UnknownIndex {
                    index,
                    chain_index: self.chain_index,
                });
            }
            return Err(CryptoError::ReplayOrUnavailable { index });
        }

        // At or ahead of the chain: bounded catch-up derivation.
        if index - self.chain_index > MAX_SKIP_KEYS as u64 {
            return Err(CryptoError::UnknownIndex {
                index,
                chain_index: self.chain_index,
            });
        }

        while self.chain_index < index {
            let key = ratchet::derive_message_key(&self.chain_key, self.chain_index);
            self.skipped.insert(self.chain_index, key);
            self.chain_key = ratchet::advance_chain_key(&self.chain_key);
            self.chain_index += 1;
        }

        let message_key = ratchet::derive_message_key(&self.chain_key, index);
        self.chain_key = ratchet::advance_chain_key(&self.chain_key);
        self.chain_index = index + 1;
        self.highest_seen = self.highest_seen.max(index);

        self.prune_cache();

        crypto::decrypt(&message_key, &message.ciphertext)
    }

    fn verify_signature(&self, message: &EncryptedGroupMessage) -> Result<(), CryptoError> {
        let verifying_key = VerifyingKey::from_bytes(&self.verify_key)
            .map_err(|_| CryptoError::InvalidSignature)?;
        let signature = Signature::from_slice(&message.signature)
            .map_err(|_| CryptoError::InvalidSignature)?;
        verifying_key
            .verify(&message.ciphertext, &signature)
            .map_err(|_| CryptoError::InvalidSignature)
    }

    fn prune_cache(&mut self) {
        while self.skipped.len() > MAX_SKIP_KEYS {
            if let Some((&oldest, _)) = self.skipped.iter().next() {
                debug!(index = oldest, "Evicting oldest skipped message key");
                self.skipped.remove(&oldest);
            }
        }
    }

    /// Number of cached skipped-ahead keys.
    pub fn cached_keys(&self) -> usize {
        self.skipped.len()
    }

    /// Current chain position.
    pub fn chain_index(&self) -> u64 {
        self.chain_index
    }

    /// Serializable state for persistence.
    pub fn export_state(&self) -> ReceiverExport {
        ReceiverExport {
            chain_key: self.chain_key,
            verify_key: self.verify_key,
            chain_index: self.chain_index,
            highest_seen: self.highest_seen,
            skipped: self.skipped.iter().map(|(&i, &k)| (i, k)).collect(),
        }
    }

    /// Restore from a persisted export.
    pub fn from_state_export(export: &ReceiverExport) -> Self {
        Self {
            chain_key: export.chain_key,
            verify_key: export.verify_key,
            chain_index: export.chain_index,
            highest_seen: export.highest_seen,
            skipped: export.skipped.iter().copied().collect(),
        }
    }
}
