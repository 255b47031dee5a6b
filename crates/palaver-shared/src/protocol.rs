//! JSON wire format for everything that leaves the local process.
//!
//! Every payload is a type-tagged object so that foreign implementations can
//! dispatch on the `type` field.  Binary fields travel as base64, key
//! material as hex.  The enum is closed and matched exhaustively at the
//! boundary; no stringly-typed branching deeper in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::MAX_MESSAGE_SIZE;
use crate::error::ProtocolError;
use crate::types::{CallId, GroupId, UserId};

/// All wire protocol messages exchanged between peers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Broadcast-encrypted group message
    GroupMessage(EncryptedGroupMessage),

    /// Sender Key public export, carried inside an already-encrypted
    /// pairwise delivery
    SenderKeyDistribution(SenderKeyDistribution),

    /// Mesh call: SDP offer to one peer
    GroupCallOffer(CallSignal),

    /// Mesh call: SDP answer to one peer
    GroupCallAnswer(CallSignal),

    /// Mesh call: join notice to the group
    GroupCallJoin(CallSignal),

    /// Mesh call: leave notice to the group
    GroupCallLeave(CallSignal),
}

/// An encrypted group message as it travels over the group transport.
///
/// Immutable once constructed.  A receiver either accepts it whole
/// (signature valid, index within policy) or rejects it outright.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncryptedGroupMessage {
    pub group_id: GroupId,
    pub message_id: Uuid,
    #[serde(with = "user_hex")]
    pub sender_id: UserId,
    pub timestamp: DateTime<Utc>,
    /// Position in the sender's chain at encryption time.
    pub message_index: u64,
    /// nonce (24 bytes) || AEAD output, base64 on the wire.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// Detached Ed25519 signature over `ciphertext`, base64 on the wire.
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

/// A sender's public chain state, distributed to each member through the
/// pairwise secure channel.  Plaintext only from that channel's perspective.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SenderKeyDistribution {
    pub group_id: GroupId,
    #[serde(with = "user_hex")]
    pub sender_id: UserId,
    #[serde(with = "hex32")]
    pub chain_key: [u8; 32],
    #[serde(with = "hex32")]
    pub signature_public: [u8; 32],
    pub message_index: u64,
}

/// Call-negotiation signal routed through the signaling relay to one peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallSignal {
    pub group_id: GroupId,
    pub call_id: CallId,
    #[serde(with = "user_hex")]
    pub from: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
}

impl WireMessage {
    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    /// Parse JSON bytes.  Unknown or malformed payloads are a typed error,
    /// never a panic.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(data.len()));
        }
        serde_json::from_slice(data).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

mod hex32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(de)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

mod user_hex {
    use serde::{Deserializer, Serializer};

    use crate::types::UserId;

    pub fn serialize<S: Serializer>(id: &UserId, ser: S) -> Result<S::Ok, S::Error> {
        super::hex32::serialize(&id.0, ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<UserId, D::Error> {
        super::hex32::deserialize(de).map(UserId)
    }
}
