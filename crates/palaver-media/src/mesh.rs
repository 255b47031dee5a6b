//! Call mesh coordinator.
//!
//! One [`CallSession`] per active or joining call, protected by its own
//! lock.  Setup for distinct peers runs in parallel so total join latency
//! is bounded by the slowest single peer, and each per-peer setup carries a
//! hard deadline: on expiry that one connection is marked failed and the
//! call continues for everyone reachable.
//!
//! The local session description is produced by the media stack once
//! candidate gathering completes (`gathering_complete`); until then every
//! per-peer task waits on a watch channel, inside its deadline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use palaver_shared::constants::{CALL_HARD_LIMIT, PEER_CONNECT_TIMEOUT_SECS};
use palaver_shared::protocol::{CallSignal, WireMessage};
use palaver_shared::types::{CallId, GroupId, UserId};

use crate::audio::{AudioConfig, SharedCapture};
use crate::error::{CallError, Result};
use crate::negotiation::{NegotiationAction, PeerNegotiation, PeerRole};

/// Call lifecycle.  `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Joining,
    Active,
    Leaving,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnState {
    Connecting,
    Connected,
    Failed,
    Closed,
}

/// A call-negotiation message addressed to one peer, handed to the
/// external signaling relay.
#[derive(Debug)]
pub struct OutboundSignal {
    pub to: UserId,
    pub message: WireMessage,
}

/// Notifications drained by the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    StateChanged { call_id: CallId, state: CallState },
    PeerConnected { call_id: CallId, peer: UserId },
    PeerFailed { call_id: CallId, peer: UserId },
    PeerLeft { call_id: CallId, peer: UserId },
}

struct PeerConnection {
    state: PeerConnState,
    /// Routes an inbound offer into the polite setup task.
    offer_tx: Option<oneshot::Sender<CallSignal>>,
    /// Routes an inbound answer into the impolite setup task.
    answer_tx: Option<oneshot::Sender<CallSignal>>,
    task: Option<JoinHandle<()>>,
    /// This peer's tap on the shared capture; kept alive for the
    /// connection's lifetime so the fan-out has a consumer per peer.
    _audio: Option<broadcast::Receiver<Vec<f32>>>,
}

/// State of one group call, owned by the coordinator.
pub struct CallSession {
    pub call_id: CallId,
    pub group_id: GroupId,
    pub state: CallState,
    peers: HashMap<UserId, PeerConnection>,
    capture: SharedCapture,
    sdp_tx: watch::Sender<Option<String>>,
    sdp_rx: watch::Receiver<Option<String>>,
}

/// Manages every peer connection of the local participant's calls.
pub struct MeshCoordinator {
    local_user: UserId,
    signal_tx: mpsc::Sender<OutboundSignal>,
    event_tx: mpsc::Sender<CallEvent>,
    calls: Mutex<HashMap<CallId, Arc<Mutex<CallSession>>>>,
}

impl MeshCoordinator {
    pub fn new(
        local_user: UserId,
        signal_tx: mpsc::Sender<OutboundSignal>,
        event_tx: mpsc::Sender<CallEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_user,
            signal_tx,
            event_tx,
            calls: Mutex::new(HashMap::new()),
        })
    }

    fn check_capacity(participant_count: usize) -> Result<()> {
        if participant_count > CALL_HARD_LIMIT {
            return Err(CallError::CapacityExceeded {
                count: participant_count,
                max: CALL_HARD_LIMIT,
            });
        }
        Ok(())
    }

    async fn any_call_in_progress(&self) -> bool {
        for session in self.calls.lock().await.values() {
            let state = session.lock().await.state;
            if state == CallState::Joining || state == CallState::Active {
                return true;
            }
        }
        false
    }

    /// Start a new call in a group, inviting `peers`.
    ///
    /// The capacity policy runs before any connection attempt.  Join
    /// notices go out to every invitee; peer setup is spawned for each and
    /// proceeds in parallel.
    pub async fn start_call(
        self: &Arc<Self>,
        group_id: GroupId,
        peers: Vec<UserId>,
    ) -> Result<CallId> {
        Self::check_capacity(peers.len() + 1)?;
        if self.any_call_in_progress().await {
            return Err(CallError::AlreadyInCall);
        }

        let call_id = CallId::new();
        self.open_session(group_id, call_id, &peers).await?;
        info!(call = %call_id, group = %group_id, peers = peers.len(), "Started call");
        Ok(call_id)
    }

    /// Join an existing call announced by another member.
    pub async fn join_call(
        self: &Arc<Self>,
        group_id: GroupId,
        call_id: CallId,
        peers: Vec<UserId>,
    ) -> Result<()> {
        Self::check_capacity(peers.len() + 1)?;
        if self.any_call_in_progress().await {
            return Err(CallError::AlreadyInCall);
        }

        self.open_session(group_id, call_id, &peers).await?;
        info!(call = %call_id, group = %group_id, "Joining call");
        Ok(())
    }

    async fn open_session(
        self: &Arc<Self>,
        group_id: GroupId,
        call_id: CallId,
        peers: &[UserId],
    ) -> Result<()> {
        let (sdp_tx, sdp_rx) = watch::channel(None);
        let session = Arc::new(Mutex::new(CallSession {
            call_id,
            group_id,
            state: CallState::Joining,
            peers: HashMap::new(),
            capture: SharedCapture::new(AudioConfig::default()),
            sdp_tx,
            sdp_rx,
        }));
        self.calls.lock().await.insert(call_id, session.clone());
        self.emit(CallEvent::StateChanged {
            call_id,
            state: CallState::Joining,
        })
        .await;

        let notices = peers.iter().map(|peer| {
            self.signal_tx.send(OutboundSignal {
                to: peer.clone(),
                message: WireMessage::GroupCallJoin(CallSignal {
                    group_id,
                    call_id,
                    from: self.local_user.clone(),
                    sdp: None,
                }),
            })
        });
        for result in join_all(notices).await {
            if result.is_err() {
                // Nobody was reachable to hear about this call; tear the
                // session down so it cannot block a later start_call.
                self.calls.lock().await.remove(&call_id);
                session.lock().await.state = CallState::Ended;
                self.emit(CallEvent::StateChanged {
                    call_id,
                    state: CallState::Ended,
                })
                .await;
                return Err(CallError::SignalingClosed);
            }
        }

        for peer in peers {
            self.spawn_peer_setup(&session, peer.clone()).await;
        }
        Ok(())
    }

    /// The media stack finished candidate gathering: publish the complete
    /// local description.  Per-peer tasks blocked on it proceed.
    pub async fn gathering_complete(&self, call_id: CallId, sdp: String) -> Result<()> {
        let session = self.session(call_id).await?;
        let guard = session.lock().await;
        let _ = guard.sdp_tx.send(Some(sdp));
        debug!(call = %call_id, "Local description ready");
        Ok(())
    }

    async fn session(&self, call_id: CallId) -> Result<Arc<Mutex<CallSession>>> {
        self.calls
            .lock()
            .await
            .get(&call_id)
            .cloned()
            .ok_or(CallError::UnknownCall(call_id))
    }

    async fn emit(&self, event: CallEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("Event mailbox closed");
        }
    }

    /// Spawn the setup task for one peer.  Each task independently
    /// negotiates within the per-peer deadline; failure or cancellation of
    /// one never disturbs the others.
    async fn spawn_peer_setup(self: &Arc<Self>, session: &Arc<Mutex<CallSession>>, peer: UserId) {
        let role = if self.local_user.initiates_to(&peer) {
            PeerRole::Impolite
        } else {
            PeerRole::Polite
        };

        let (offer_tx, offer_rx) = oneshot::channel();
        let (answer_tx, answer_rx) = oneshot::channel();

        let (call_id, group_id, sdp_rx) = {
            let mut guard = session.lock().await;
            if guard.peers.contains_key(&peer) {
                debug!(peer = %peer.short(), "Peer already in session");
                return;
            }
            let audio = guard.capture.subscribe();
            guard.peers.insert(
                peer.clone(),
                PeerConnection {
                    state: PeerConnState::Connecting,
                    offer_tx: Some(offer_tx),
                    answer_tx: Some(answer_tx),
                    task: None,
                    _audio: Some(audio),
                },
            );
            (guard.call_id, guard.group_id, guard.sdp_rx.clone())
        };

        let coordinator = Arc::clone(self);
        let session_arc = Arc::clone(session);
        let peer_clone = peer.clone();
        let handle = tokio::spawn(async move {
            coordinator
                .negotiate_peer(
                    session_arc,
                    peer_clone,
                    role,
                    call_id,
                    group_id,
                    sdp_rx,
                    offer_rx,
                    answer_rx,
                )
                .await;
        });

        if let Some(conn) = session.lock().await.peers.get_mut(&peer) {
            conn.task = Some(handle);
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn negotiate_peer(
        self: Arc<Self>,
        session: Arc<Mutex<CallSession>>,
        peer: UserId,
        role: PeerRole,
        call_id: CallId,
        group_id: GroupId,
        sdp_rx: watch::Receiver<Option<String>>,
        offer_rx: oneshot::Receiver<CallSignal>,
        answer_rx: oneshot::Receiver<CallSignal>,
    ) {
        let mut negotiation =
            PeerNegotiation::new(self.local_user.clone(), peer.clone(), group_id, call_id);
        let deadline = Duration::from_secs(PEER_CONNECT_TIMEOUT_SECS);

        let outcome = timeout(deadline, async {
            match role {
                PeerRole::Impolite => {
                    let local_sdp = wait_local_description(sdp_rx).await?;
                    if let NegotiationAction::Send(signal) = negotiation.create_offer(local_sdp) {
                        self.signal_tx
                            .send(OutboundSignal {
                                to: peer.clone(),
                                message: WireMessage::GroupCallOffer(signal),
                            })
                            .await
                            .map_err(|_| CallError::SignalingClosed)?;
                    }
                    let answer = answer_rx.await.map_err(|_| CallError::SignalingClosed)?;
                    match negotiation.handle_answer(&answer) {
                        NegotiationAction::Established => Ok(()),
                        _ => Err(CallError::InvalidState("unexpected answer")),
                    }
                }
                PeerRole::Polite => {
                    let offer = offer_rx.await.map_err(|_| CallError::SignalingClosed)?;
                    let local_sdp = wait_local_description(sdp_rx).await?;
                    match negotiation.handle_offer(&offer, local_sdp) {
                        NegotiationAction::Send(signal) => {
                            self.signal_tx
                                .send(OutboundSignal {
                                    to: peer.clone(),
                                    message: WireMessage::GroupCallAnswer(signal),
                                })
                                .await
                                .map_err(|_| CallError::SignalingClosed)?;
                            Ok(())
                        }
                        _ => Err(CallError::InvalidState("unexpected offer")),
                    }
                }
            }
        })
        .await;

        match outcome {
            Ok(Ok(())) => {
                let became_active = {
                    let mut guard = session.lock().await;
                    if let Some(conn) = guard.peers.get_mut(&peer) {
                        conn.state = PeerConnState::Connected;
                    }
                    if guard.state == CallState::Joining {
                        guard.state = CallState::Active;
                        true
                    } else {
                        false
                    }
                };
                info!(call = %call_id, peer = %peer.short(), "Peer connected");
                self.emit(CallEvent::PeerConnected {
                    call_id,
                    peer: peer.clone(),
                })
                .await;
                if became_active {
                    self.emit(CallEvent::StateChanged {
                        call_id,
                        state: CallState::Active,
                    })
                    .await;
                }
            }
            Ok(Err(err)) => {
                warn!(call = %call_id, peer = %peer.short(), error = %err, "Peer negotiation failed");
                self.mark_failed(&session, &peer, call_id).await;
            }
            Err(_) => {
                warn!(
                    call = %call_id,
                    peer = %peer.short(),
                    timeout_secs = PEER_CONNECT_TIMEOUT_SECS,
                    "Peer connection deadline elapsed"
                );
                self.mark_failed(&session, &peer, call_id).await;
            }
        }
    }

    async fn mark_failed(&self, session: &Arc<Mutex<CallSession>>, peer: &UserId, call_id: CallId) {
        {
            let mut guard = session.lock().await;
            if let Some(conn) = guard.peers.get_mut(peer) {
                conn.state = PeerConnState::Failed;
                conn._audio = None;
            }
        }
        self.emit(CallEvent::PeerFailed {
            call_id,
            peer: peer.clone(),
        })
        .await;
    }

    /// Route an inbound call signal.  Signals for unknown calls or stale
    /// peers are dropped with a debug log; malformed routing is never
    /// fatal.
    pub async fn handle_signal(self: &Arc<Self>, message: &WireMessage) -> Result<()> {
        match message {
            WireMessage::GroupCallOffer(signal) => {
                let session = match self.session(signal.call_id).await {
                    Ok(s) => s,
                    Err(_) => {
                        debug!(call = %signal.call_id, "Offer for unknown call");
                        return Ok(());
                    }
                };
                // Offers can arrive from a participant we have not set up
                // yet (they saw our join notice first).
                if !session.lock().await.peers.contains_key(&signal.from) {
                    self.spawn_peer_setup(&session, signal.from.clone()).await;
                }
                let tx = session
                    .lock()
                    .await
                    .peers
                    .get_mut(&signal.from)
                    .and_then(|conn| conn.offer_tx.take());
                match tx {
                    Some(tx) => {
                        let _ = tx.send(signal.clone());
                    }
                    None => debug!(peer = %signal.from.short(), "Dropping duplicate offer"),
                }
            }

            WireMessage::GroupCallAnswer(signal) => {
                let session = match self.session(signal.call_id).await {
                    Ok(s) => s,
                    Err(_) => return Ok(()),
                };
                let tx = session
                    .lock()
                    .await
                    .peers
                    .get_mut(&signal.from)
                    .and_then(|conn| conn.answer_tx.take());
                match tx {
                    Some(tx) => {
                        let _ = tx.send(signal.clone());
                    }
                    None => debug!(peer = %signal.from.short(), "Dropping stale answer"),
                }
            }

            WireMessage::GroupCallJoin(signal) => {
                let session = match self.session(signal.call_id).await {
                    Ok(s) => s,
                    Err(_) => {
                        debug!(call = %signal.call_id, "Join notice for a call we are not in");
                        return Ok(());
                    }
                };
                let count = session.lock().await.peers.len() + 2;
                if Self::check_capacity(count).is_err() {
                    warn!(peer = %signal.from.short(), "Ignoring join beyond mesh capacity");
                    return Ok(());
                }
                self.spawn_peer_setup(&session, signal.from.clone()).await;
            }

            WireMessage::GroupCallLeave(signal) => {
                let session = match self.session(signal.call_id).await {
                    Ok(s) => s,
                    Err(_) => return Ok(()),
                };
                let removed = {
                    let mut guard = session.lock().await;
                    guard.peers.remove(&signal.from)
                };
                if let Some(mut conn) = removed {
                    if let Some(task) = conn.task.take() {
                        task.abort();
                    }
                    self.emit(CallEvent::PeerLeft {
                        call_id: signal.call_id,
                        peer: signal.from.clone(),
                    })
                    .await;
                }
            }

            other => {
                debug!(msg = ?other, "Non-call signal routed to mesh coordinator");
            }
        }
        Ok(())
    }

    /// Leave a call: cancel all in-flight negotiations, notify every peer,
    /// release the shared capture.
    pub async fn leave_call(&self, call_id: CallId) -> Result<()> {
        let session = self
            .calls
            .lock()
            .await
            .remove(&call_id)
            .ok_or(CallError::UnknownCall(call_id))?;

        let (group_id, peers, capture) = {
            let mut guard = session.lock().await;
            guard.state = CallState::Leaving;
            for conn in guard.peers.values_mut() {
                if let Some(task) = conn.task.take() {
                    task.abort();
                }
                conn.state = PeerConnState::Closed;
                conn._audio = None;
            }
            let peers: Vec<UserId> = guard.peers.keys().cloned().collect();
            (guard.group_id, peers, guard.capture.clone())
        };
        self.emit(CallEvent::StateChanged {
            call_id,
            state: CallState::Leaving,
        })
        .await;

        let notices = peers.iter().map(|peer| {
            self.signal_tx.send(OutboundSignal {
                to: peer.clone(),
                message: WireMessage::GroupCallLeave(CallSignal {
                    group_id,
                    call_id,
                    from: self.local_user.clone(),
                    sdp: None,
                }),
            })
        });
        // Best effort: a closed relay must not keep us in the call.
        let _ = join_all(notices).await;

        capture.release();
        session.lock().await.state = CallState::Ended;
        self.emit(CallEvent::StateChanged {
            call_id,
            state: CallState::Ended,
        })
        .await;
        info!(call = %call_id, "Left call");
        Ok(())
    }

    /// Flip the local mute flag on the shared capture; applies to every
    /// peer connection at once.
    pub async fn set_mute(&self, call_id: CallId, muted: bool) -> Result<()> {
        let session = self.session(call_id).await?;
        let guard = session.lock().await;
        guard.capture.set_muted(muted);
        Ok(())
    }

    pub async fn is_muted(&self, call_id: CallId) -> Result<bool> {
        let session = self.session(call_id).await?;
        let muted = session.lock().await.capture.is_muted();
        Ok(muted)
    }

    pub async fn call_state(&self, call_id: CallId) -> Result<CallState> {
        let session = self.session(call_id).await?;
        let state = session.lock().await.state;
        Ok(state)
    }

    pub async fn connected_peers(&self, call_id: CallId) -> Result<Vec<UserId>> {
        let session = self.session(call_id).await?;
        let guard = session.lock().await;
        Ok(guard
            .peers
            .iter()
            .filter(|(_, conn)| conn.state == PeerConnState::Connected)
            .map(|(peer, _)| peer.clone())
            .collect())
    }

    /// The shared capture for a call (for wiring the device in the app).
    pub async fn capture(&self, call_id: CallId) -> Result<SharedCapture> {
        let session = self.session(call_id).await?;
        let capture = session.lock().await.capture.clone();
        Ok(capture)
    }
}

/// Block until candidate gathering publishes the local description.
async fn wait_local_description(
    mut sdp_rx: watch::Receiver<Option<String>>,
) -> Result<String> {
    loop {
        if let Some(sdp) = sdp_rx.borrow().clone() {
            return Ok(sdp);
        }
        sdp_rx
            .changed()
            .await
            .map_err(|_| CallError::SignalingClosed)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::Receiver;

    fn user(b: u8) -> UserId {
        UserId([b; 32])
    }

    struct Rig {
        coordinator: Arc<MeshCoordinator>,
        signal_rx: Receiver<OutboundSignal>,
        event_rx: Receiver<CallEvent>,
    }

    fn rig(local: UserId) -> Rig {
        let (signal_tx, signal_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        Rig {
            coordinator: MeshCoordinator::new(local, signal_tx, event_tx),
            signal_rx,
            event_rx,
        }
    }

    async fn next_event(rx: &mut Receiver<CallEvent>) -> CallEvent {
        // Guard must outlast PEER_CONNECT_TIMEOUT_SECS: under a paused
        // clock the runtime auto-advances to the earliest pending timer.
        timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("event wait timed out")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_capacity_rejected_before_negotiation() {
        let mut r = rig(user(1));
        let peers: Vec<UserId> = (2..=9).map(user).collect(); // 8 peers + self = 9
        let err = r
            .coordinator
            .start_call(GroupId::new(), peers)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::CapacityExceeded { count: 9, .. }));
        // No join notice went out.
        assert!(r.signal_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_hard_limit_boundary_allows_eight() {
        let r = rig(user(1));
        let peers: Vec<UserId> = (2..=8).map(user).collect(); // 7 peers + self = 8
        assert!(r.coordinator.start_call(GroupId::new(), peers).await.is_ok());
    }

    #[tokio::test]
    async fn test_two_party_connect_flow() {
        let group = GroupId::new();
        let mut alice = rig(user(9)); // greater id: impolite towards bob
        let mut bob = rig(user(1));

        let call_id = alice
            .coordinator
            .start_call(group, vec![user(1)])
            .await
            .unwrap();

        // Bob receives the join notice out-of-band and joins.
        let notice = alice.signal_rx.recv().await.unwrap();
        assert!(matches!(notice.message, WireMessage::GroupCallJoin(_)));
        bob.coordinator
            .join_call(group, call_id, vec![user(9)])
            .await
            .unwrap();

        // Both sides finish candidate gathering.
        alice
            .coordinator
            .gathering_complete(call_id, "sdp-alice".into())
            .await
            .unwrap();
        bob.coordinator
            .gathering_complete(call_id, "sdp-bob".into())
            .await
            .unwrap();

        // Pump the relay in both directions.
        let bob_coord = bob.coordinator.clone();
        let mut alice_signal_rx = alice.signal_rx;
        tokio::spawn(async move {
            while let Some(out) = alice_signal_rx.recv().await {
                let _ = bob_coord.handle_signal(&out.message).await;
            }
        });
        let alice_coord = alice.coordinator.clone();
        let mut bob_signal_rx = bob.signal_rx;
        tokio::spawn(async move {
            while let Some(out) = bob_signal_rx.recv().await {
                let _ = alice_coord.handle_signal(&out.message).await;
            }
        });

        // Alice: Joining, then PeerConnected + Active.
        assert_eq!(
            next_event(&mut alice.event_rx).await,
            CallEvent::StateChanged {
                call_id,
                state: CallState::Joining
            }
        );
        let mut saw_connected = false;
        let mut saw_active = false;
        for _ in 0..2 {
            match next_event(&mut alice.event_rx).await {
                CallEvent::PeerConnected { peer, .. } => {
                    assert_eq!(peer, user(1));
                    saw_connected = true;
                }
                CallEvent::StateChanged { state, .. } => {
                    assert_eq!(state, CallState::Active);
                    saw_active = true;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(saw_connected && saw_active);

        assert_eq!(
            alice.coordinator.call_state(call_id).await.unwrap(),
            CallState::Active
        );
        assert_eq!(
            alice.coordinator.connected_peers(call_id).await.unwrap(),
            vec![user(1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_peer_fails_call_continues() {
        let group = GroupId::new();
        let mut r = rig(user(9));

        let call_id = r
            .coordinator
            .start_call(group, vec![user(1)])
            .await
            .unwrap();
        r.coordinator
            .gathering_complete(call_id, "sdp".into())
            .await
            .unwrap();

        // Drain outbound so the channel never blocks; nobody answers.
        let mut signal_rx = r.signal_rx;
        tokio::spawn(async move { while signal_rx.recv().await.is_some() {} });

        assert_eq!(
            next_event(&mut r.event_rx).await,
            CallEvent::StateChanged {
                call_id,
                state: CallState::Joining
            }
        );
        // Paused clock: the 30s deadline elapses immediately once idle.
        assert_eq!(
            next_event(&mut r.event_rx).await,
            CallEvent::PeerFailed {
                call_id,
                peer: user(1)
            }
        );
        // The call itself is still alive.
        assert_eq!(
            r.coordinator.call_state(call_id).await.unwrap(),
            CallState::Joining
        );
    }

    #[tokio::test]
    async fn test_leave_call_reaches_ended_and_notifies() {
        let group = GroupId::new();
        let mut r = rig(user(9));

        let call_id = r
            .coordinator
            .start_call(group, vec![user(1)])
            .await
            .unwrap();
        // join notice
        let _ = r.signal_rx.recv().await.unwrap();

        r.coordinator.leave_call(call_id).await.unwrap();

        let notice = r.signal_rx.recv().await.unwrap();
        assert_eq!(notice.to, user(1));
        assert!(matches!(notice.message, WireMessage::GroupCallLeave(_)));

        // Session is gone afterwards.
        assert!(matches!(
            r.coordinator.call_state(call_id).await.unwrap_err(),
            CallError::UnknownCall(_)
        ));

        let mut states = Vec::new();
        while let Ok(event) = r.event_rx.try_recv() {
            if let CallEvent::StateChanged { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![CallState::Joining, CallState::Leaving, CallState::Ended]
        );
    }

    #[tokio::test]
    async fn test_failed_announce_does_not_strand_session() {
        let mut r = rig(user(9));
        drop(r.signal_rx);

        let group = GroupId::new();
        assert!(matches!(
            r.coordinator.start_call(group, vec![user(1)]).await,
            Err(CallError::SignalingClosed)
        ));

        // The dead session was torn down, so the retry reaches the relay
        // again instead of bouncing off AlreadyInCall.
        assert!(matches!(
            r.coordinator.start_call(group, vec![user(1)]).await,
            Err(CallError::SignalingClosed)
        ));

        // Joining then Ended, for the caller watching call state.
        let mut states = Vec::new();
        while let Ok(event) = r.event_rx.try_recv() {
            if let CallEvent::StateChanged { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                CallState::Joining,
                CallState::Ended,
                CallState::Joining,
                CallState::Ended
            ]
        );
    }

    #[tokio::test]
    async fn test_second_call_rejected_while_active() {
        let r = rig(user(9));
        let group = GroupId::new();
        r.coordinator.start_call(group, vec![user(1)]).await.unwrap();
        assert!(matches!(
            r.coordinator.start_call(group, vec![user(2)]).await,
            Err(CallError::AlreadyInCall)
        ));
    }

    #[tokio::test]
    async fn test_mute_is_shared_across_the_call() {
        let r = rig(user(9));
        let call_id = r
            .coordinator
            .start_call(GroupId::new(), vec![user(1)])
            .await
            .unwrap();

        assert!(!r.coordinator.is_muted(call_id).await.unwrap());
        r.coordinator.set_mute(call_id, true).await.unwrap();
        assert!(r.coordinator.is_muted(call_id).await.unwrap());
        // The capture handle observes the same flag.
        assert!(r.coordinator.capture(call_id).await.unwrap().is_muted());
    }

    #[tokio::test]
    async fn test_peer_leave_signal_removes_peer() {
        let group = GroupId::new();
        let mut r = rig(user(9));
        let call_id = r
            .coordinator
            .start_call(group, vec![user(1)])
            .await
            .unwrap();
        let _ = r.signal_rx.recv().await;

        r.coordinator
            .handle_signal(&WireMessage::GroupCallLeave(CallSignal {
                group_id: group,
                call_id,
                from: user(1),
                sdp: None,
            }))
            .await
            .unwrap();

        // Joining event first, then the peer-left notification.
        assert_eq!(
            next_event(&mut r.event_rx).await,
            CallEvent::StateChanged {
                call_id,
                state: CallState::Joining
            }
        );
        assert_eq!(
            next_event(&mut r.event_rx).await,
            CallEvent::PeerLeft {
                call_id,
                peer: user(1)
            }
        );
        assert!(r
            .coordinator
            .connected_peers(call_id)
            .await
            .unwrap()
            .is_empty());
    }
}
