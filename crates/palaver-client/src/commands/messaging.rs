//! Group messaging: encrypt-and-broadcast, and inbound routing.

use tracing::{debug, info, warn};

use palaver_shared::protocol::WireMessage;
use palaver_shared::types::GroupId;
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::outbound::TransportCommand;

impl Engine {
    /// Encrypt a message with our group sender key and broadcast it on the
    /// group topic.  The advanced chain state hits disk before the
    /// ciphertext leaves the process: a crash anywhere after encryption
    /// can skip an index but never reuse one.
    pub async fn send_message(&self, group_id: GroupId, content: &[u8]) -> Result<Uuid> {
        let message = self.keys.encrypt(group_id, content).await?;
        let message_id = message.message_id;

        self.persist_group_keys(group_id).await?;

        let data = WireMessage::GroupMessage(message).to_bytes()?;
        self.transport_tx
            .send(TransportCommand::Broadcast {
                topic: group_id.to_topic(),
                data,
            })
            .await
            .map_err(|_| EngineError::TransportClosed)?;

        info!(msg_id = %message_id, group = %group_id, "Message sent");
        Ok(message_id)
    }

    /// Parse and route one inbound wire message.
    ///
    /// Group messages are decrypted and surfaced as events; rejects are
    /// reported as [`EngineEvent::DecryptFailed`] and returned as typed
    /// errors, never swallowed.  Key distributions update the receiver
    /// map; call signals go to the mesh coordinator.
    pub async fn handle_inbound(&self, data: &[u8]) -> Result<()> {
        let wire = WireMessage::from_bytes(data)?;
        match wire {
            WireMessage::GroupMessage(message) => {
                let group_id = message.group_id;
                let sender = message.sender_id.clone();
                match self.keys.decrypt(&message).await {
                    Ok(plaintext) => {
                        // Skip-cache and chain advances must survive restart.
                        self.persist_known_group(group_id).await?;
                        self.emit(EngineEvent::MessageReceived {
                            group_id,
                            message_id: message.message_id,
                            sender,
                            timestamp: message.timestamp,
                            plaintext,
                        })
                        .await;
                        Ok(())
                    }
                    Err(e) => {
                        warn!(
                            group = %group_id,
                            sender = %sender.short(),
                            error = %e,
                            "Rejected group message"
                        );
                        self.emit(EngineEvent::DecryptFailed {
                            group_id,
                            sender,
                            reason: e.to_string(),
                        })
                        .await;
                        Err(e.into())
                    }
                }
            }

            WireMessage::SenderKeyDistribution(dist) => {
                let group_id = dist.group_id;
                self.keys.ingest_distribution(group_id, &dist).await?;
                self.persist_known_group(group_id).await?;
                Ok(())
            }

            signal @ (WireMessage::GroupCallOffer(_)
            | WireMessage::GroupCallAnswer(_)
            | WireMessage::GroupCallJoin(_)
            | WireMessage::GroupCallLeave(_)) => {
                self.mesh.handle_signal(&signal).await?;
                Ok(())
            }
        }
    }

    /// Persist key state for a group we track locally.  Key material can
    /// arrive for groups we have no row for yet (distribution racing the
    /// invite); the in-memory state is kept and persistence waits for the
    /// group row.
    async fn persist_known_group(&self, group_id: GroupId) -> Result<()> {
        let known = match self.db()?.get_group(group_id) {
            Ok(_) => true,
            Err(palaver_store::StoreError::NotFound) => false,
            Err(e) => return Err(e.into()),
        };
        if known {
            self.persist_group_keys(group_id).await?;
        } else {
            debug!(group = %group_id, "Key state for unknown group kept in memory only");
        }
        Ok(())
    }
}
