//! Outbound transport command channel.
//!
//! The engine never talks to the network directly; it enqueues commands
//! that the embedding application's transport task executes.  Broadcast
//! covers the group topic, `SendToPeer` covers call signaling, and
//! `Pairwise` is the per-recipient secure channel used for key material,
//! with a delivery confirmation so the engine can retry and report.

use tokio::sync::oneshot;

use palaver_shared::types::UserId;

#[derive(Debug)]
pub enum TransportCommand {
    /// Publish to every subscriber of a group topic.
    Broadcast { topic: String, data: Vec<u8> },

    /// Direct message to one peer, fire and forget.
    SendToPeer { peer: UserId, data: Vec<u8> },

    /// Deliver over the pairwise secure channel.  `reply` carries whether
    /// the recipient confirmed delivery.
    Pairwise {
        peer: UserId,
        data: Vec<u8>,
        reply: oneshot::Sender<bool>,
    },
}
