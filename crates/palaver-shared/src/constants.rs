/// XChaCha20-Poly1305 nonce size in bytes.
pub const NONCE_SIZE: usize = 24;

/// Maximum group message size in bytes (256 KiB).
pub const MAX_MESSAGE_SIZE: usize = 262_144;

/// How far a receiver will ratchet ahead in one decryption, and the bound
/// on the skipped-key cache per sender.
pub const MAX_SKIP_KEYS: usize = 1000;

/// Per-stream audio bitrate used for mesh bandwidth estimates (kbps).
pub const AUDIO_STREAM_KBPS: u32 = 50;

/// Mesh call participant count above which a bandwidth warning is raised.
pub const CALL_SOFT_LIMIT: usize = 4;

/// Mesh call participant count that is refused outright.
pub const CALL_HARD_LIMIT: usize = 8;

/// Hard cap on a single peer-connection establishment, in seconds.
pub const PEER_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Key derivation contexts (BLAKE3).
pub const KDF_CONTEXT_MESSAGE_KEY: &str = "palaver-group-message-key-v1";
pub const KDF_CONTEXT_CHAIN_ADVANCE: &str = "palaver-group-chain-advance-v1";
pub const KDF_CONTEXT_DB_KEY: &str = "palaver-db-key-v1";
pub const KDF_CONTEXT_KEY_BLOB: &str = "palaver-key-blob-v1";
