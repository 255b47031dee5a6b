use thiserror::Error;

#[derive(Error, Debug)]
pub enum PalaverError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cryptographic validation failures.  Every variant is a hard local
/// reject: the offending message is dropped and the error surfaced to the
/// caller, never retried and never silently ignored.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid signature over ciphertext")]
    InvalidSignature,

    #[error("Message index {index} outside the skip window (chain at {chain_index})")]
    UnknownIndex { index: u64, chain_index: u64 },

    #[error("Message key for index {index} already consumed or evicted")]
    ReplayOrUnavailable { index: u64 },

    #[error("Invalid key length")]
    InvalidKeyLength,
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Invalid signature bytes")]
    InvalidSignatureBytes,

    #[error("Signature verification failed")]
    VerificationFailed,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed wire payload: {0}")]
    Malformed(String),

    #[error("Payload exceeds maximum message size ({0} bytes)")]
    TooLarge(usize),
}
