//! Key Distribution Manager: owns every local Sender Key and the per-sender
//! receiver map, keyed by group.
//!
//! All mutation for one group is serialized by a per-group `tokio::Mutex`;
//! no two rotations or distributions for the same group may interleave.
//! The lock is scoped to the operation and never held across an await that
//! crosses group boundaries.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use palaver_shared::protocol::{
    EncryptedGroupMessage, SenderKeyDistribution, WireMessage,
};
use palaver_shared::types::{GroupId, UserId};

use crate::error::{GroupError, Result};
use crate::receiver::{ReceiverExport, SenderKeyReceiver};
use crate::sender_key::{SenderKey, SenderKeyExport};

/// One pairwise delivery of a key-distribution payload.
///
/// The bytes are the serialized wire message; the pairwise secure channel
/// adds its own encryption per recipient.
#[derive(Debug, Clone)]
pub struct KeyDelivery {
    pub recipient: UserId,
    pub payload: Vec<u8>,
}

struct GroupKeys {
    sender: SenderKey,
    receivers: HashMap<UserId, SenderKeyReceiver>,
}

/// Creates and rotates local Sender Keys and ingests received ones.
pub struct KeyDistributionManager {
    local_user: UserId,
    /// Arena of per-group state.  The outer lock only guards the map; each
    /// group's operations serialize on the inner per-group lock.
    groups: Mutex<HashMap<GroupId, Arc<Mutex<GroupKeys>>>>,
}

impl KeyDistributionManager {
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    async fn entry(&self, group_id: GroupId) -> Option<Arc<Mutex<GroupKeys>>> {
        self.groups.lock().await.get(&group_id).cloned()
    }

    /// Generate a fresh Sender Key for a group we just created or joined.
    /// Replaces any existing key for that group.
    pub async fn create_group_key(&self, group_id: GroupId) -> SenderKeyDistribution {
        let keys = Arc::new(Mutex::new(GroupKeys {
            sender: SenderKey::generate(),
            receivers: HashMap::new(),
        }));
        let dist = keys
            .lock()
            .await
            .sender
            .distribution(group_id, self.local_user.clone());
        self.groups.lock().await.insert(group_id, keys);
        info!(group = %group_id, "Created sender key");
        dist
    }

    /// Current public export, for distribution to a newly added member.
    /// Adding a member does not rotate.
    pub async fn distribution_for(&self, group_id: GroupId) -> Result<SenderKeyDistribution> {
        let entry = self
            .entry(group_id)
            .await
            .ok_or(GroupError::UnknownGroup(group_id))?;
        let keys = entry.lock().await;
        Ok(keys.sender.distribution(group_id, self.local_user.clone()))
    }

    /// Rotate: replace the local Sender Key wholesale and return the new
    /// distribution for the remaining members.
    ///
    /// This is the forward-secrecy boundary on member removal: a removed
    /// member holding the old export cannot decrypt anything sent after.
    pub async fn rotate(&self, group_id: GroupId) -> Result<SenderKeyDistribution> {
        let entry = self
            .entry(group_id)
            .await
            .ok_or(GroupError::UnknownGroup(group_id))?;
        let mut keys = entry.lock().await;
        keys.sender = SenderKey::generate();
        info!(group = %group_id, "Rotated sender key");
        Ok(keys.sender.distribution(group_id, self.local_user.clone()))
    }

    /// Encrypt a group message with the local Sender Key, advancing it.
    pub async fn encrypt(
        &self,
        group_id: GroupId,
        plaintext: &[u8],
    ) -> Result<EncryptedGroupMessage> {
        let entry = self
            .entry(group_id)
            .await
            .ok_or(GroupError::UnknownGroup(group_id))?;
        let mut keys = entry.lock().await;
        let msg = keys
            .sender
            .encrypt(group_id, self.local_user.clone(), plaintext)?;
        Ok(msg)
    }

    /// Decrypt a group message against the sender's receiver state.
    pub async fn decrypt(&self, message: &EncryptedGroupMessage) -> Result<Vec<u8>> {
        let entry = self
            .entry(message.group_id)
            .await
            .ok_or(GroupError::UnknownGroup(message.group_id))?;
        let mut keys = entry.lock().await;
        let receiver =
            keys.receivers
                .get_mut(&message.sender_id)
                .ok_or_else(|| GroupError::UnknownSender {
                    group_id: message.group_id,
                    sender: message.sender_id.clone(),
                })?;
        Ok(receiver.decrypt(message)?)
    }

    /// Ingest a key-distribution payload received through the pairwise
    /// channel: construct or wholesale-replace the receiver for that sender.
    pub async fn ingest_distribution(
        &self,
        group_id: GroupId,
        dist: &SenderKeyDistribution,
    ) -> Result<()> {
        if dist.group_id != group_id {
            return Err(GroupError::GroupMismatch {
                expected: group_id,
                actual: dist.group_id,
            });
        }
        if dist.sender_id == self.local_user {
            debug!(group = %group_id, "Ignoring our own key distribution");
            return Ok(());
        }

        let entry = {
            let mut groups = self.groups.lock().await;
            groups
                .entry(group_id)
                .or_insert_with(|| {
                    Arc::new(Mutex::new(GroupKeys {
                        sender: SenderKey::generate(),
                        receivers: HashMap::new(),
                    }))
                })
                .clone()
        };

        let mut keys = entry.lock().await;
        keys.receivers.insert(
            dist.sender_id.clone(),
            SenderKeyReceiver::from_distribution(dist),
        );
        debug!(
            group = %group_id,
            sender = %dist.sender_id.short(),
            index = dist.message_index,
            "Ingested sender key distribution"
        );
        Ok(())
    }

    /// Build one pairwise delivery per recipient for a distribution payload.
    /// O(members): a single broadcast key travels to each member, there is
    /// no per-pair session setup.
    pub fn deliveries(
        dist: &SenderKeyDistribution,
        recipients: &[UserId],
    ) -> Result<Vec<KeyDelivery>> {
        let payload = WireMessage::SenderKeyDistribution(dist.clone()).to_bytes()?;
        Ok(recipients
            .iter()
            .map(|recipient| KeyDelivery {
                recipient: recipient.clone(),
                payload: payload.clone(),
            })
            .collect())
    }

    /// Drop a sender's receiver state (member removed).
    pub async fn remove_receiver(&self, group_id: GroupId, sender: &UserId) -> Result<()> {
        let entry = self
            .entry(group_id)
            .await
            .ok_or(GroupError::UnknownGroup(group_id))?;
        let mut keys = entry.lock().await;
        if keys.receivers.remove(sender).is_some() {
            debug!(group = %group_id, sender = %sender.short(), "Dropped receiver state");
        }
        Ok(())
    }

    /// Drop all key state for a group (local leave).
    pub async fn remove_group(&self, group_id: GroupId) {
        if self.groups.lock().await.remove(&group_id).is_some() {
            info!(group = %group_id, "Dropped group key state");
        }
    }

    /// Export a group's full key state for persistence.
    pub async fn export_group(
        &self,
        group_id: GroupId,
    ) -> Result<(SenderKeyExport, Vec<(UserId, ReceiverExport)>)> {
        let entry = self
            .entry(group_id)
            .await
            .ok_or(GroupError::UnknownGroup(group_id))?;
        let keys = entry.lock().await;
        let receivers = keys
            .receivers
            .iter()
            .map(|(user, r)| (user.clone(), r.export_state()))
            .collect();
        Ok((keys.sender.export_private(), receivers))
    }

    /// Restore a group's key state from persisted exports.
    pub async fn restore_group(
        &self,
        group_id: GroupId,
        sender: &SenderKeyExport,
        receivers: &[(UserId, ReceiverExport)],
    ) {
        let keys = GroupKeys {
            sender: SenderKey::from_private_export(sender),
            receivers: receivers
                .iter()
                .map(|(user, export)| {
                    (user.clone(), SenderKeyReceiver::from_state_export(export))
                })
                .collect(),
        };
        self.groups
            .lock()
            .await
            .insert(group_id, Arc::new(Mutex::new(keys)));
        info!(group = %group_id, "Restored group key state");
    }
}
