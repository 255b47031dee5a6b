//! Per-peer connection negotiation state machine.
//!
//! For each peer pair, the identity comparing greater initiates the
//! connection (impolite role); the other waits for an offer (polite role).
//! That rule is deterministic and total, so duplicate simultaneous offers
//! cannot happen without any coordination round-trip.
//!
//! Candidate gathering is not incremental in this design: a side never
//! sends its session description before gathering completes, so each
//! handshake is a single offer/answer exchange with a bounded wait.

use tracing::{debug, warn};

use palaver_shared::protocol::CallSignal;
use palaver_shared::types::{CallId, GroupId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// We initiate: gather, then send the offer.
    Impolite,
    /// We wait for the remote offer, then answer.
    Polite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferSent,
    Connected,
    Failed,
    Closed,
}

/// What the caller should do after feeding a signal in.
#[derive(Debug, PartialEq, Eq)]
pub enum NegotiationAction {
    /// Send this signal to the peer through the relay.
    Send(CallSignal),
    /// Negotiation reached connected state.
    Established,
    /// Signal was stale or out of role order; drop it.
    Ignore,
    /// Remote side hung up; tear the connection down.
    Close,
}

pub struct PeerNegotiation {
    local_user: UserId,
    remote_user: UserId,
    group_id: GroupId,
    call_id: CallId,
    role: PeerRole,
    state: NegotiationState,
    local_sdp: Option<String>,
    remote_sdp: Option<String>,
}

impl PeerNegotiation {
    pub fn new(
        local_user: UserId,
        remote_user: UserId,
        group_id: GroupId,
        call_id: CallId,
    ) -> Self {
        let role = if local_user.initiates_to(&remote_user) {
            PeerRole::Impolite
        } else {
            PeerRole::Polite
        };
        Self {
            local_user,
            remote_user,
            group_id,
            call_id,
            role,
            state: NegotiationState::Idle,
            local_sdp: None,
            remote_sdp: None,
        }
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn state(&self) -> &NegotiationState {
        &self.state
    }

    pub fn remote_user(&self) -> &UserId {
        &self.remote_user
    }

    fn signal(&self, sdp: Option<String>) -> CallSignal {
        CallSignal {
            group_id: self.group_id,
            call_id: self.call_id,
            from: self.local_user.clone(),
            sdp,
        }
    }

    /// Impolite side: candidate gathering finished, send the offer.
    pub fn create_offer(&mut self, sdp: String) -> NegotiationAction {
        if self.role != PeerRole::Impolite || self.state != NegotiationState::Idle {
            return NegotiationAction::Ignore;
        }
        self.local_sdp = Some(sdp.clone());
        self.state = NegotiationState::OfferSent;
        debug!(remote = %self.remote_user.short(), "Sending offer");
        NegotiationAction::Send(self.signal(Some(sdp)))
    }

    /// Polite side: a remote offer arrived.  `local_sdp` is our own
    /// gathered description; the answer goes straight back.
    pub fn handle_offer(&mut self, signal: &CallSignal, local_sdp: String) -> NegotiationAction {
        if self.role != PeerRole::Polite {
            // Both sides agreeing on the tie-break means we never see an
            // offer as the impolite side; anything else is a stale peer.
            warn!(remote = %self.remote_user.short(), "Dropping offer received in impolite role");
            return NegotiationAction::Ignore;
        }
        if self.state != NegotiationState::Idle {
            return NegotiationAction::Ignore;
        }
        self.remote_sdp = signal.sdp.clone();
        self.local_sdp = Some(local_sdp.clone());
        self.state = NegotiationState::Connected;
        debug!(remote = %self.remote_user.short(), "Received offer, answering");
        NegotiationAction::Send(self.signal(Some(local_sdp)))
    }

    /// Impolite side: the answer to our offer arrived.
    pub fn handle_answer(&mut self, signal: &CallSignal) -> NegotiationAction {
        if self.role != PeerRole::Impolite || self.state != NegotiationState::OfferSent {
            return NegotiationAction::Ignore;
        }
        self.remote_sdp = signal.sdp.clone();
        self.state = NegotiationState::Connected;
        debug!(remote = %self.remote_user.short(), "Received answer");
        NegotiationAction::Established
    }

    /// Remote side left the call.
    pub fn handle_leave(&mut self) -> NegotiationAction {
        self.state = NegotiationState::Closed;
        NegotiationAction::Close
    }

    /// Mark this peer connection as failed (deadline elapsed or transport
    /// error).  Local to this peer; the call continues for the others.
    pub fn fail(&mut self) {
        self.state = NegotiationState::Failed;
    }

    pub fn is_connected(&self) -> bool {
        self.state == NegotiationState::Connected
    }
}
