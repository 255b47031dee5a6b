//! One-way chain ratchet.
//!
//! Pure functions over 32-byte chain keys.  No I/O, no state beyond the key
//! material passed in.  Both derivations use BLAKE3 `derive_key` with fixed
//! context strings, so a message key can never collide with a chain key and
//! neither can collide with any other derivation in the system.

use rand::RngCore;

use palaver_shared::constants::{KDF_CONTEXT_CHAIN_ADVANCE, KDF_CONTEXT_MESSAGE_KEY};

pub type ChainKey = [u8; 32];
pub type MessageKey = [u8; 32];

/// Fresh random chain key from the OS RNG.
pub fn random_chain_key() -> ChainKey {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Derive the one-time message key for `index` from the current chain key.
pub fn derive_message_key(chain_key: &ChainKey, index: u64) -> MessageKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_MESSAGE_KEY);
    hasher.update(chain_key);
    hasher.update(&index.to_be_bytes());
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

/// Advance the chain one step.  Irreversible: the previous chain key cannot
/// be recovered from the output.
pub fn advance_chain_key(chain_key: &ChainKey) -> ChainKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_CHAIN_ADVANCE);
    hasher.update(chain_key);
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_deterministic() {
        let ck = [0xABu8; 32];
        assert_eq!(advance_chain_key(&ck), advance_chain_key(&ck));
    }

    #[test]
    fn test_advance_changes_key() {
        let ck = [0x42u8; 32];
        let next = advance_chain_key(&ck);
        assert_ne!(ck, next);
        assert_ne!(next, advance_chain_key(&next));
    }

    #[test]
    fn test_message_keys_differ_per_index() {
        let ck = [0x11u8; 32];
        assert_ne!(derive_message_key(&ck, 0), derive_message_key(&ck, 1));
    }

    #[test]
    fn test_message_key_differs_from_next_chain_key() {
        // Domain separation: the message key at index i must not equal the
        // advanced chain key.
        let ck = [0x33u8; 32];
        assert_ne!(derive_message_key(&ck, 0), advance_chain_key(&ck));
    }

    #[test]
    fn test_same_seed_same_keys_both_ends() {
        let seed = random_chain_key();
        let (mut a, mut b) = (seed, seed);
        for i in 0..20u64 {
            assert_eq!(derive_message_key(&a, i), derive_message_key(&b, i));
            a = advance_chain_key(&a);
            b = advance_chain_key(&b);
        }
    }

    #[test]
    fn test_forward_secrecy_one_way() {
        // Knowing the chain key after an advance gives a different message
        // key stream than before the advance.
        let ck0 = [0x77u8; 32];
        let ck1 = advance_chain_key(&ck0);
        assert_ne!(derive_message_key(&ck0, 0), derive_message_key(&ck1, 0));
        assert_ne!(derive_message_key(&ck1, 1), derive_message_key(&ck0, 1));
    }
}
