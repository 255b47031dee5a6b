//! The engine core: construction, key persistence, and delivery plumbing.
//!
//! Command implementations live in the `commands` modules as further
//! `impl Engine` blocks.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use palaver_group::{KeyDelivery, KeyDistributionManager};
use palaver_media::MeshCoordinator;
use palaver_shared::constants::KDF_CONTEXT_KEY_BLOB;
use palaver_shared::crypto;
use palaver_shared::identity::Identity;
use palaver_shared::types::{GroupId, UserId};
use palaver_store::Database;

use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::outbound::TransportCommand;

/// Delivery of key material gets one retry before the failure is surfaced.
const KEY_DELIVERY_ATTEMPTS: usize = 2;

pub struct Engine {
    identity: Identity,
    database: Mutex<Database>,
    /// Seals key blobs before they reach SQLite; derived from the identity.
    vault_key: [u8; 32],
    pub(crate) keys: KeyDistributionManager,
    pub(crate) mesh: Arc<MeshCoordinator>,
    pub(crate) transport_tx: mpsc::Sender<TransportCommand>,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl Engine {
    /// Build an engine around an identity and an open database.
    ///
    /// Spawns the bridge tasks that turn mesh signaling into transport
    /// commands and call events into engine events, so a Tokio runtime
    /// must be running.
    pub fn new(
        identity: Identity,
        database: Database,
        transport_tx: mpsc::Sender<TransportCommand>,
        event_tx: mpsc::Sender<EngineEvent>,
    ) -> Arc<Self> {
        let local_user = identity.user_id();
        let vault_key =
            crypto::derive_key(KDF_CONTEXT_KEY_BLOB, &identity.to_export().secret_key);

        let (signal_tx, mut signal_rx) = mpsc::channel(64);
        let (call_event_tx, mut call_event_rx) = mpsc::channel(64);
        let mesh = MeshCoordinator::new(local_user.clone(), signal_tx, call_event_tx);

        // Mesh signaling goes out as direct transport sends.
        let signal_transport_tx = transport_tx.clone();
        tokio::spawn(async move {
            while let Some(signal) = signal_rx.recv().await {
                let data = match signal.message.to_bytes() {
                    Ok(data) => data,
                    Err(e) => {
                        warn!(error = %e, "Dropping unserializable call signal");
                        continue;
                    }
                };
                if signal_transport_tx
                    .send(TransportCommand::SendToPeer {
                        peer: signal.to,
                        data,
                    })
                    .await
                    .is_err()
                {
                    warn!("Transport channel closed, stopping signal bridge");
                    break;
                }
            }
        });

        // Call events are folded into the engine mailbox.
        let call_event_forward_tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = call_event_rx.recv().await {
                if call_event_forward_tx
                    .send(EngineEvent::Call(event))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        Arc::new(Self {
            identity,
            database: Mutex::new(database),
            vault_key,
            keys: KeyDistributionManager::new(local_user),
            mesh,
            transport_tx,
            event_tx,
        })
    }

    pub fn local_user(&self) -> UserId {
        self.identity.user_id()
    }

    pub(crate) fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Lock the database handle.  Never held across an await.
    pub(crate) fn db(&self) -> Result<MutexGuard<'_, Database>> {
        self.database.lock().map_err(|_| EngineError::StatePoisoned)
    }

    pub(crate) async fn emit(&self, event: EngineEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("Event mailbox closed");
        }
    }

    // ------------------------------------------------------------------
    // Key state persistence
    // ------------------------------------------------------------------

    /// Seal and write the in-memory key state of one group.
    pub(crate) async fn persist_group_keys(&self, group_id: GroupId) -> Result<()> {
        let (sender, receivers) = self.keys.export_group(group_id).await?;
        let sender_blob = bincode::serialize(&sender)?;

        let db = self.db()?;
        db.save_sender_key(&self.vault_key, group_id, &sender_blob)?;
        for (user, export) in &receivers {
            let blob = bincode::serialize(export)?;
            db.save_receiver_state(&self.vault_key, group_id, user, &blob)?;
        }
        Ok(())
    }

    /// Restore key state for every active group from the database.
    /// Groups without a stored sender key are skipped.
    pub async fn restore_groups(&self) -> Result<()> {
        let groups = self.db()?.list_groups()?;
        for group in groups {
            let sender_blob = match self.db()?.load_sender_key(&self.vault_key, group.id) {
                Ok(blob) => blob,
                Err(palaver_store::StoreError::NotFound) => continue,
                Err(e) => return Err(e.into()),
            };
            let sender = bincode::deserialize(&sender_blob)?;

            let mut receivers = Vec::new();
            for (user, blob) in self.db()?.load_receiver_states(&self.vault_key, group.id)? {
                receivers.push((user, bincode::deserialize(&blob)?));
            }

            self.keys.restore_group(group.id, &sender, &receivers).await;
            info!(group = %group.id, receivers = receivers.len(), "Restored group key state");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Key delivery
    // ------------------------------------------------------------------

    /// Send one key delivery over the pairwise channel, retrying once.
    async fn deliver_key(&self, delivery: &KeyDelivery) -> Result<bool> {
        for attempt in 1..=KEY_DELIVERY_ATTEMPTS {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.transport_tx
                .send(TransportCommand::Pairwise {
                    peer: delivery.recipient.clone(),
                    data: delivery.payload.clone(),
                    reply: reply_tx,
                })
                .await
                .map_err(|_| EngineError::TransportClosed)?;

            match reply_rx.await {
                Ok(true) => return Ok(true),
                Ok(false) | Err(_) => {
                    debug!(
                        recipient = %delivery.recipient.short(),
                        attempt,
                        "Key delivery unconfirmed"
                    );
                }
            }
        }
        Ok(false)
    }

    /// Deliver a distribution payload to each recipient.  All recipients
    /// are attempted; unconfirmed ones are reported together at the end.
    pub(crate) async fn distribute_keys(
        &self,
        deliveries: &[KeyDelivery],
    ) -> Result<()> {
        let mut failed = Vec::new();
        for delivery in deliveries {
            if !self.deliver_key(delivery).await? {
                failed.push(delivery.recipient.clone());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            warn!(count = failed.len(), "Key delivery incomplete");
            Err(EngineError::KeyDeliveryIncomplete { failed })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    struct TestNode {
        engine: Arc<Engine>,
        events: mpsc::Receiver<EngineEvent>,
        _dir: tempfile::TempDir,
    }

    fn node() -> (TestNode, mpsc::Receiver<TransportCommand>) {
        node_with_identity(Identity::generate())
    }

    fn node_with_identity(identity: Identity) -> (TestNode, mpsc::Receiver<TransportCommand>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let (transport_tx, transport_rx) = mpsc::channel(256);
        let (event_tx, events) = mpsc::channel(256);
        let engine = Engine::new(identity, db, transport_tx, event_tx);
        (
            TestNode {
                engine,
                events,
                _dir: dir,
            },
            transport_rx,
        )
    }

    /// Wire a node's outbound commands to the other engines: broadcasts
    /// fan out to everyone else, direct and pairwise sends go to the
    /// matching peer, pairwise delivery is confirmed after processing.
    fn connect(
        mut rx: mpsc::Receiver<TransportCommand>,
        sender: UserId,
        engines: Vec<Arc<Engine>>,
    ) {
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    TransportCommand::Broadcast { data, .. } => {
                        for engine in &engines {
                            if engine.local_user() != sender {
                                let _ = engine.handle_inbound(&data).await;
                            }
                        }
                    }
                    TransportCommand::SendToPeer { peer, data } => {
                        if let Some(engine) =
                            engines.iter().find(|e| e.local_user() == peer)
                        {
                            let _ = engine.handle_inbound(&data).await;
                        }
                    }
                    TransportCommand::Pairwise { peer, data, reply } => {
                        let delivered = match engines
                            .iter()
                            .find(|e| e.local_user() == peer)
                        {
                            Some(engine) => engine.handle_inbound(&data).await.is_ok(),
                            None => false,
                        };
                        let _ = reply.send(delivered);
                    }
                }
            }
        });
    }

    async fn next_message(events: &mut mpsc::Receiver<EngineEvent>) -> Vec<u8> {
        loop {
            let event = timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("event wait timed out")
                .expect("event channel closed");
            if let EngineEvent::MessageReceived { plaintext, .. } = event {
                return plaintext;
            }
        }
    }

    async fn next_decrypt_failure(events: &mut mpsc::Receiver<EngineEvent>) -> String {
        loop {
            let event = timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("event wait timed out")
                .expect("event channel closed");
            if let EngineEvent::DecryptFailed { reason, .. } = event {
                return reason;
            }
        }
    }

    #[tokio::test]
    async fn test_removed_member_cannot_read_after_rotation() {
        let (alice, alice_rx) = node();
        let (mut bob, bob_rx) = node();
        let (mut carol, carol_rx) = node();
        let all = vec![
            alice.engine.clone(),
            bob.engine.clone(),
            carol.engine.clone(),
        ];
        connect(alice_rx, alice.engine.local_user(), all.clone());
        connect(bob_rx, bob.engine.local_user(), all.clone());
        connect(carol_rx, carol.engine.local_user(), all);

        let group_id = alice.engine.create_group("trio").await.unwrap();

        let invite = alice.engine.create_invite(group_id).await.unwrap();
        bob.engine.join_group(&invite).await.unwrap();
        alice
            .engine
            .add_member(group_id, bob.engine.local_user(), None)
            .await
            .unwrap();

        let invite = alice.engine.create_invite(group_id).await.unwrap();
        carol.engine.join_group(&invite).await.unwrap();
        alice
            .engine
            .add_member(group_id, carol.engine.local_user(), None)
            .await
            .unwrap();

        alice
            .engine
            .send_message(group_id, b"hello everyone")
            .await
            .unwrap();
        assert_eq!(next_message(&mut bob.events).await, b"hello everyone");
        assert_eq!(next_message(&mut carol.events).await, b"hello everyone");

        alice
            .engine
            .remove_member(group_id, carol.engine.local_user())
            .await
            .unwrap();

        alice
            .engine
            .send_message(group_id, b"carol is gone")
            .await
            .unwrap();
        assert_eq!(next_message(&mut bob.events).await, b"carol is gone");
        // Carol still receives the broadcast but the rotated key is out of
        // her reach.
        let reason = next_decrypt_failure(&mut carol.events).await;
        assert!(!reason.is_empty());
    }

    #[tokio::test]
    async fn test_membership_changes_are_admin_gated() {
        let (alice, alice_rx) = node();
        let (bob, bob_rx) = node();
        let all = vec![alice.engine.clone(), bob.engine.clone()];
        connect(alice_rx, alice.engine.local_user(), all.clone());
        connect(bob_rx, bob.engine.local_user(), all);

        let group_id = alice.engine.create_group("gated").await.unwrap();
        let invite = alice.engine.create_invite(group_id).await.unwrap();
        bob.engine.join_group(&invite).await.unwrap();
        alice
            .engine
            .add_member(group_id, bob.engine.local_user(), None)
            .await
            .unwrap();

        // Even an admin cannot remove the creator.
        assert!(matches!(
            alice
                .engine
                .remove_member(group_id, alice.engine.local_user())
                .await,
            Err(EngineError::CreatorImmutable)
        ));

        // Bob is a plain member; admin operations are refused on his side.
        assert!(matches!(
            bob.engine
                .remove_member(group_id, alice.engine.local_user())
                .await,
            Err(EngineError::NotAdmin(_))
        ));
        assert!(matches!(
            bob.engine.create_invite(group_id).await,
            Err(EngineError::NotAdmin(_))
        ));
    }

    #[tokio::test]
    async fn test_unconfirmed_key_delivery_is_surfaced() {
        let (alice, mut alice_rx) = node();

        // Transport that never confirms pairwise delivery.
        tokio::spawn(async move {
            while let Some(cmd) = alice_rx.recv().await {
                if let TransportCommand::Pairwise { reply, .. } = cmd {
                    let _ = reply.send(false);
                }
            }
        });

        let group_id = alice.engine.create_group("flaky").await.unwrap();
        let stranger = UserId([0x55u8; 32]);

        let err = alice
            .engine
            .add_member(group_id, stranger.clone(), None)
            .await
            .unwrap_err();
        match err {
            EngineError::KeyDeliveryIncomplete { failed } => {
                assert_eq!(failed, vec![stranger.clone()]);
            }
            other => panic!("expected delivery failure, got {other}"),
        }

        // The membership row stands; only delivery is outstanding.
        let members = alice.engine.list_members(group_id).unwrap();
        assert!(members.iter().any(|m| m.member == stranger));
    }

    #[tokio::test]
    async fn test_key_state_survives_restart() {
        let identity = Identity::generate();
        let export = identity.to_export();

        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let group_id = {
            let db = Database::open_at(&db_path).unwrap();
            let (transport_tx, mut transport_rx) = mpsc::channel(64);
            let (event_tx, _events) = mpsc::channel(64);
            tokio::spawn(async move { while transport_rx.recv().await.is_some() {} });
            let engine = Engine::new(identity, db, transport_tx, event_tx);

            let group_id = engine.create_group("persistent").await.unwrap();
            engine.send_message(group_id, b"first").await.unwrap();
            group_id
        };

        // Fresh engine, same identity and database.
        let db = Database::open_at(&db_path).unwrap();
        let (transport_tx, mut transport_rx) = mpsc::channel(64);
        let (event_tx, _events) = mpsc::channel(64);
        tokio::spawn(async move { while transport_rx.recv().await.is_some() {} });
        let engine = Engine::new(Identity::from_export(&export), db, transport_tx, event_tx);

        engine.restore_groups().await.unwrap();

        assert_eq!(engine.list_groups().unwrap().len(), 1);
        // The restored sender key keeps counting from where it stopped.
        let (sender, _) = engine.keys.export_group(group_id).await.unwrap();
        assert_eq!(sender.index, 1);
        engine.send_message(group_id, b"second").await.unwrap();
    }

    #[tokio::test]
    async fn test_chain_state_is_persisted_before_broadcast() {
        let identity = Identity::generate();
        let export = identity.to_export();

        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        // The transport dies before the broadcast can be handed over,
        // modeling a crash between encryption and delivery.
        let group_id = {
            let db = Database::open_at(&db_path).unwrap();
            let (transport_tx, mut transport_rx) = mpsc::channel(64);
            let (event_tx, _events) = mpsc::channel(64);

            let engine = Engine::new(identity, db, transport_tx, event_tx);
            let group_id = engine.create_group("flaky-net").await.unwrap();
            transport_rx.close();

            assert!(matches!(
                engine.send_message(group_id, b"never delivered").await,
                Err(EngineError::TransportClosed)
            ));
            group_id
        };

        // The restarted engine must resume past the consumed index: a
        // rewound chain would re-derive the same message key.
        let db = Database::open_at(&db_path).unwrap();
        let (transport_tx, mut transport_rx) = mpsc::channel(64);
        let (event_tx, _events) = mpsc::channel(64);
        tokio::spawn(async move { while transport_rx.recv().await.is_some() {} });
        let engine = Engine::new(Identity::from_export(&export), db, transport_tx, event_tx);
        engine.restore_groups().await.unwrap();

        let (sender, _) = engine.keys.export_group(group_id).await.unwrap();
        assert_eq!(sender.index, 1);
    }

    #[tokio::test]
    async fn test_leave_group_drops_key_state() {
        let (alice, mut alice_rx) = node();
        tokio::spawn(async move { while alice_rx.recv().await.is_some() {} });

        let group_id = alice.engine.create_group("short-lived").await.unwrap();
        alice.engine.leave_group(group_id).await.unwrap();

        assert!(alice.engine.list_groups().unwrap().is_empty());
        assert!(alice
            .engine
            .send_message(group_id, b"into the void")
            .await
            .is_err());
    }
}

