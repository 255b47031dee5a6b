//! # palaver-shared
//!
//! Types, cryptographic primitives, and the wire protocol shared by every
//! Palaver crate.
//!
//! A user's identity is an Ed25519 keypair; the 32-byte public key doubles
//! as the user id everywhere (no email, no phone number).  Symmetric
//! encryption is XChaCha20-Poly1305 with a random 24-byte nonce prefixed to
//! the ciphertext, and all key derivation goes through BLAKE3 `derive_key`
//! with fixed, versioned context strings.

pub mod constants;
pub mod crypto;
pub mod identity;
pub mod invite;
pub mod protocol;
pub mod types;

mod error;

pub use error::{CryptoError, IdentityError, PalaverError, ProtocolError};
