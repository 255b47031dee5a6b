//! Engine event mailbox.
//!
//! Instead of UI-framework callbacks the engine pushes every notification
//! into an `mpsc` channel; whatever front end embeds the engine drains it
//! at its own pace.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use palaver_media::{BandwidthEstimate, CallEvent};
use palaver_shared::types::{GroupId, UserId};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    GroupJoined {
        group_id: GroupId,
        name: String,
    },
    GroupLeft {
        group_id: GroupId,
    },
    MemberAdded {
        group_id: GroupId,
        member: UserId,
    },
    MemberRemoved {
        group_id: GroupId,
        member: UserId,
    },
    /// The local sender key was rotated (a member was removed).
    KeyRotated {
        group_id: GroupId,
    },
    /// A group message decrypted successfully.
    MessageReceived {
        group_id: GroupId,
        message_id: Uuid,
        sender: UserId,
        timestamp: DateTime<Utc>,
        plaintext: Vec<u8>,
    },
    /// A group message was rejected.  Never silent: bad signatures,
    /// replays, and unknown indices all land here with the typed reason.
    DecryptFailed {
        group_id: GroupId,
        sender: UserId,
        reason: String,
    },
    /// A call was started or joined with enough participants to strain
    /// the mesh.
    BandwidthWarning(BandwidthEstimate),
    Call(CallEvent),
}
