use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User identity = Ed25519 public key (32 bytes)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub [u8; 32]);

impl UserId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }

    /// Whether this identity initiates the peer connection towards `other`
    /// in a mesh call.
    ///
    /// The identity comparing greater under the byte-wise total order takes
    /// the impolite (initiating) role; the other waits for an offer.  For
    /// any two distinct identities exactly one direction initiates.
    pub fn initiates_to(&self, other: &UserId) -> bool {
        self.0 > other.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct GroupId(pub Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn to_topic(&self) -> String {
        format!("group:{}", self.0)
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CallId(pub Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_hex_roundtrip() {
        let id = UserId([7u8; 32]);
        let restored = UserId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, restored);
    }

    #[test]
    fn test_user_id_hex_rejects_wrong_length() {
        assert!(UserId::from_hex("abcd").is_err());
    }

    #[test]
    fn test_tie_break_exactly_one_initiator() {
        let a = UserId([1u8; 32]);
        let b = UserId([2u8; 32]);
        assert_ne!(a.initiates_to(&b), b.initiates_to(&a));
        assert!(b.initiates_to(&a));
    }

    #[test]
    fn test_tie_break_deterministic() {
        let a = UserId([9u8; 32]);
        let b = UserId([4u8; 32]);
        for _ in 0..10 {
            assert!(a.initiates_to(&b));
            assert!(!b.initiates_to(&a));
        }
    }
}
