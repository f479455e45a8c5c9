//! Session and connection management.
//!
//! The manager composes the key agreement engine, the envelope codecs, the
//! transport collaborator, and the reconnection scheduler. It owns all
//! per-peer mutable state (sessions, pending handshakes, connection states)
//! behind one async mutex, so handshake finalize, sequence increment, and
//! replay-check-then-advance never interleave for the same peer.
//!
//! Decrypted payloads, connection state changes, reconnection offers, and
//! errors flow upward through an unbounded event channel.

use crate::error::{Error, ProtocolError, TransportError};
use crate::payload::AppPayload;
use crate::reconnect::ReconnectScheduler;
use crate::session::{ConnectionState, PeerSession, SessionCipher};
use crate::signal::{
    self, AnswerSignal, KeyAgreementBlock, OfferSignal, Signal, TransportDescriptor,
};
use crate::transport::{ChannelEvent, Transport};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tether_crypto::{
    Identity, KeyAgreement, KeyAgreementError, KeyContext, LegacyEnvelope, LegacySecret,
    SecureEnvelope, envelope, legacy, random,
};
use tokio::sync::{Mutex, mpsc};

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long to wait for the transport descriptor to settle before using
    /// whatever partial snapshot is available
    pub settle_timeout: Duration,
    /// Reconnection backoff policy
    pub reconnect: crate::reconnect::ReconnectConfig,
    /// Whether offers carry a pre-shared secret so v1-only peers can answer
    pub legacy_interop: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            settle_timeout: Duration::from_secs(12),
            reconnect: crate::reconnect::ReconnectConfig::default(),
            legacy_interop: true,
        }
    }
}

/// Events delivered to the application layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A decrypted application payload arrived
    Message {
        /// Peer the payload came from
        peer_id: String,
        /// The decoded payload
        payload: AppPayload,
    },
    /// A peer's connection state changed
    StateChanged {
        /// Peer whose state changed
        peer_id: String,
        /// The new state
        state: ConnectionState,
    },
    /// A reconnection attempt produced a fresh offer token to deliver
    /// out-of-band
    ReconnectOffer {
        /// Peer the offer targets
        peer_id: String,
        /// Encoded offer token
        token: String,
    },
    /// A non-fatal protocol error occurred
    Error {
        /// Peer the error relates to, when known
        peer_id: Option<String>,
        /// Human-readable description
        detail: String,
    },
}

/// What handling an inbound signal produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalStatus {
    /// An offer was handled; the response token must travel back
    /// out-of-band
    AnswerReady,
    /// An answer was handled; the session key is derived
    SessionEstablished,
}

/// Result of [`SessionManager::handle_signal`].
#[derive(Debug, Clone)]
pub struct SignalOutcome {
    /// What the signal produced
    pub status: SignalStatus,
    /// The peer the signal came from
    pub peer_id: String,
    /// Answer token to deliver back, present for offers
    pub response_token: Option<String>,
}

/// All per-peer mutable state, guarded by one lock.
struct ManagerState {
    agreement: KeyAgreement,
    sessions: HashMap<String, PeerSession>,
    connections: HashMap<String, ConnectionState>,
    offered_secrets: HashMap<String, LegacySecret>,
}

struct Inner<T> {
    local_id: String,
    local_fingerprint: String,
    config: ManagerConfig,
    transport: T,
    state: Mutex<ManagerState>,
    reconnect: ReconnectScheduler,
    events: mpsc::UnboundedSender<SessionEvent>,
}

/// Per-peer secure session orchestration.
///
/// Cheap to clone; clones share the same state, which is how the
/// reconnection timer tasks call back into the manager.
pub struct SessionManager<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for SessionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> SessionManager<T> {
    /// Create a manager and the event stream the application consumes.
    pub fn new(
        local_id: impl Into<String>,
        identity: &Identity,
        transport: T,
        config: ManagerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let manager = Self {
            inner: Arc::new(Inner {
                local_id: local_id.into(),
                local_fingerprint: identity.fingerprint().to_string(),
                reconnect: ReconnectScheduler::new(config.reconnect.clone()),
                config,
                transport,
                state: Mutex::new(ManagerState {
                    agreement: KeyAgreement::new(),
                    sessions: HashMap::new(),
                    connections: HashMap::new(),
                    offered_secrets: HashMap::new(),
                }),
                events,
            }),
        };
        (manager, receiver)
    }

    /// The local peer id.
    #[must_use]
    pub fn local_id(&self) -> &str {
        &self.inner.local_id
    }

    /// The local identity fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.inner.local_fingerprint
    }

    /// Create an offer token for `peer_id`.
    ///
    /// Always starts a fresh initiator handshake, discarding any stale
    /// pending state for the peer. With `restart` set, the offer tells the
    /// responder to replace an existing pairing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyAgreement`] on CSPRNG failure,
    /// [`Error::Protocol`] if token encoding fails.
    pub async fn create_offer(&self, peer_id: &str, restart: bool) -> Result<String, Error> {
        let (material, legacy_secret) = {
            let mut state = self.inner.state.lock().await;
            let material = state.agreement.begin_as_initiator(peer_id)?;
            let legacy_secret = if self.inner.config.legacy_interop {
                let secret = LegacySecret::generate().map_err(KeyAgreementError::from)?;
                let exposed = secret.expose().to_string();
                state.offered_secrets.insert(peer_id.to_string(), secret);
                Some(exposed)
            } else {
                None
            };
            (material, legacy_secret)
        };

        self.transition(peer_id, ConnectionState::Connecting).await;
        let descriptor = self.gather_descriptor(peer_id).await;

        let offer = OfferSignal {
            version: signal::PROTOCOL_VERSION,
            from: self.inner.local_id.clone(),
            to: peer_id.to_string(),
            identity: self.inner.local_fingerprint.clone(),
            transport: descriptor,
            key_agreement: Some(KeyAgreementBlock {
                curve: material.curve,
                public_key: material.public_key.to_vec(),
            }),
            legacy_secret,
            nonce: hex::encode(material.nonce),
            sent_at: now_millis(),
            restart,
        };
        let token = signal::encode_signal(&Signal::Offer(offer))?;
        tracing::info!(peer = peer_id, restart, "created offer");
        Ok(token)
    }

    /// Handle a scanned or pasted signal token.
    ///
    /// Offers produce an answer token to deliver back out-of-band; answers
    /// finalize the pending handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for malformed tokens,
    /// [`Error::KeyAgreement`] when the handshake cannot proceed.
    pub async fn handle_signal(&self, token: &str) -> Result<SignalOutcome, Error> {
        match signal::decode_signal(token)? {
            Signal::Offer(offer) => self.answer_offer(offer).await,
            Signal::Answer(answer) => self.accept_answer(answer).await,
        }
    }

    /// Run the responder flow for an inbound offer.
    async fn answer_offer(&self, offer: OfferSignal) -> Result<SignalOutcome, Error> {
        let peer_id = offer.from.clone();

        let (version, key_agreement, legacy_secret, own_nonce) = {
            let mut state = self.inner.state.lock().await;
            // An inbound offer supersedes any initiator handshake we had in
            // flight with this peer.
            state.agreement.abandon(&peer_id);

            if offer.version >= signal::PROTOCOL_VERSION {
                let block = offer
                    .key_agreement
                    .as_ref()
                    .ok_or(ProtocolError::MissingField("keyAgreement"))?;
                let offer_nonce = signal::nonce_bytes(&offer.nonce)?;
                let context = KeyContext {
                    initiator_id: peer_id.clone(),
                    responder_id: self.inner.local_id.clone(),
                    initiator_fingerprint: offer.identity.clone(),
                    responder_fingerprint: self.inner.local_fingerprint.clone(),
                };
                let (key, material) =
                    state
                        .agreement
                        .begin_as_responder(&block.public_key, &offer_nonce, &context)?;

                state.offered_secrets.remove(&peer_id);
                state.sessions.insert(
                    peer_id.clone(),
                    PeerSession::with_key(key, offer.identity.clone()),
                );
                (
                    signal::PROTOCOL_VERSION,
                    Some(KeyAgreementBlock {
                        curve: material.curve,
                        public_key: material.public_key.to_vec(),
                    }),
                    None,
                    hex::encode(material.nonce),
                )
            } else {
                // Legacy peer: no key agreement, fall back to the shared
                // secret carried in the offer, minting one if absent.
                let (secret, minted) = match &offer.legacy_secret {
                    Some(raw) => (LegacySecret::new(raw.clone()), false),
                    None => (
                        LegacySecret::generate().map_err(KeyAgreementError::from)?,
                        true,
                    ),
                };
                let echoed = minted.then(|| secret.expose().to_string());

                state.offered_secrets.remove(&peer_id);
                state.sessions.insert(
                    peer_id.clone(),
                    PeerSession::with_legacy_secret(secret, offer.identity.clone()),
                );
                (
                    signal::LEGACY_PROTOCOL_VERSION,
                    None,
                    echoed,
                    hex::encode(random::random_16().map_err(KeyAgreementError::from)?),
                )
            }
        };

        tracing::info!(peer = %peer_id, version, "answered offer, session key ready");
        self.transition(&peer_id, ConnectionState::Connecting).await;
        let descriptor = self.gather_descriptor(&peer_id).await;

        let answer = AnswerSignal {
            version,
            from: self.inner.local_id.clone(),
            to: peer_id.clone(),
            identity: self.inner.local_fingerprint.clone(),
            transport: descriptor,
            key_agreement,
            legacy_secret,
            echoed_nonce: offer.nonce.clone(),
            nonce: own_nonce,
            sent_at: now_millis(),
        };
        let token = signal::encode_signal(&Signal::Answer(answer))?;

        Ok(SignalOutcome {
            status: SignalStatus::AnswerReady,
            peer_id,
            response_token: Some(token),
        })
    }

    /// Finalize the initiator flow from an inbound answer.
    async fn accept_answer(&self, answer: AnswerSignal) -> Result<SignalOutcome, Error> {
        let peer_id = answer.from.clone();

        {
            let mut state = self.inner.state.lock().await;
            if answer.version >= signal::PROTOCOL_VERSION {
                let block = answer
                    .key_agreement
                    .as_ref()
                    .ok_or(ProtocolError::MissingField("keyAgreement"))?;
                let echoed_nonce = signal::nonce_bytes(&answer.echoed_nonce)?;
                let answer_nonce = signal::nonce_bytes(&answer.nonce)?;
                let context = KeyContext {
                    initiator_id: self.inner.local_id.clone(),
                    responder_id: peer_id.clone(),
                    initiator_fingerprint: self.inner.local_fingerprint.clone(),
                    responder_fingerprint: answer.identity.clone(),
                };
                let key = state.agreement.finalize_as_initiator(
                    &peer_id,
                    &block.public_key,
                    &echoed_nonce,
                    &answer_nonce,
                    &context,
                )?;

                state.offered_secrets.remove(&peer_id);
                state.sessions.insert(
                    peer_id.clone(),
                    PeerSession::with_key(key, answer.identity.clone()),
                );
            } else {
                // The peer negotiated down to the legacy channel. Prefer the
                // secret we recorded at offer time; fall back to one the
                // responder minted and echoed.
                let secret = match state.offered_secrets.remove(&peer_id) {
                    Some(secret) => secret,
                    None => answer
                        .legacy_secret
                        .as_ref()
                        .map(|raw| LegacySecret::new(raw.clone()))
                        .ok_or(ProtocolError::MissingField("legacySecret"))?,
                };
                state.agreement.abandon(&peer_id);
                state.sessions.insert(
                    peer_id.clone(),
                    PeerSession::with_legacy_secret(secret, answer.identity.clone()),
                );
            }
        }

        tracing::info!(peer = %peer_id, version = answer.version, "accepted answer, session key ready");
        Ok(SignalOutcome {
            status: SignalStatus::SessionEstablished,
            peer_id,
            response_token: None,
        })
    }

    /// Encrypt and send an application payload to `peer_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ChannelNotOpen`] if the peer channel is not
    /// open, [`KeyAgreementError::NoSessionKey`] if no session key has been
    /// derived yet, [`Error::Envelope`] on encryption failure.
    pub async fn send_secure(&self, peer_id: &str, payload: &AppPayload) -> Result<(), Error> {
        if !self.inner.transport.is_open(peer_id) {
            return Err(TransportError::ChannelNotOpen.into());
        }

        let frame = {
            let mut state = self.inner.state.lock().await;
            let session = state
                .sessions
                .get_mut(peer_id)
                .ok_or(KeyAgreementError::NoSessionKey)?;
            let plaintext = serde_json::to_vec(payload).map_err(ProtocolError::Payload)?;

            match session.cipher() {
                SessionCipher::V2 { key } => {
                    let key = key.clone();
                    let seq = session.next_seq();
                    let sealed =
                        envelope::pack(&plaintext, &key, &self.inner.local_id, seq)?;
                    tracing::debug!(peer = peer_id, seq, "sealed envelope");
                    serde_json::to_vec(&sealed).map_err(ProtocolError::Payload)?
                }
                SessionCipher::V1 { secret } => {
                    let sealed =
                        legacy::pack_legacy(&plaintext, secret, &self.inner.local_id)?;
                    tracing::debug!(peer = peer_id, "sealed legacy envelope");
                    serde_json::to_vec(&sealed).map_err(ProtocolError::Payload)?
                }
            }
        };

        self.inner.transport.send(peer_id, &frame)?;
        Ok(())
    }

    /// Send an acknowledgement-style payload, best effort.
    ///
    /// Transport failures are reported as `Ok(false)` rather than errors;
    /// callers are free to discard the result. Crypto and protocol failures
    /// still propagate, since they indicate a broken session rather than
    /// expected channel churn.
    ///
    /// # Errors
    ///
    /// Returns non-transport errors from the send path.
    pub async fn send_best_effort(
        &self,
        peer_id: &str,
        payload: &AppPayload,
    ) -> Result<bool, Error> {
        match self.send_secure(peer_id, payload).await {
            Ok(()) => Ok(true),
            Err(Error::Transport(e)) => {
                tracing::debug!(peer = peer_id, error = %e, "best-effort send dropped");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Feed a transport channel event into the manager.
    pub async fn handle_channel_event(&self, peer_id: &str, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => {
                tracing::info!(peer = peer_id, "channel open");
                self.transition(peer_id, ConnectionState::Connected).await;
                self.inner.reconnect.reset(peer_id).await;
            }
            ChannelEvent::Closed => {
                tracing::info!(peer = peer_id, "channel closed");
                self.transition(peer_id, ConnectionState::Disconnected).await;
                self.arm_reconnect(peer_id).await;
            }
            ChannelEvent::Error(detail) => {
                tracing::warn!(peer = peer_id, detail = %detail, "channel error");
                self.transition(peer_id, ConnectionState::Failed).await;
                self.arm_reconnect(peer_id).await;
            }
            ChannelEvent::Message(frame) => self.dispatch_inbound(peer_id, &frame).await,
        }
    }

    /// Tear down the session with one peer.
    pub async fn close(&self, peer_id: &str) {
        {
            let mut state = self.inner.state.lock().await;
            state.sessions.remove(peer_id);
            state.offered_secrets.remove(peer_id);
            state.agreement.abandon(peer_id);
        }
        self.inner.reconnect.reset(peer_id).await;
        self.transition(peer_id, ConnectionState::Closed).await;
        tracing::info!(peer = peer_id, "session closed");
    }

    /// Tear down every session and cancel every timer.
    pub async fn shutdown(&self) {
        let peers: Vec<String> = {
            let mut state = self.inner.state.lock().await;
            let peers: HashSet<String> = state
                .sessions
                .keys()
                .chain(state.connections.keys())
                .cloned()
                .collect();
            state.sessions.clear();
            state.offered_secrets.clear();
            state.agreement.clear();
            peers.into_iter().collect()
        };
        self.inner.reconnect.clear_all().await;
        for peer_id in peers {
            self.transition(&peer_id, ConnectionState::Closed).await;
        }
        tracing::info!("session manager shut down");
    }

    /// Current connection state for a peer.
    pub async fn connection_state(&self, peer_id: &str) -> ConnectionState {
        let state = self.inner.state.lock().await;
        state
            .connections
            .get(peer_id)
            .copied()
            .unwrap_or(ConnectionState::New)
    }

    /// Whether a session key exists for a peer.
    pub async fn has_session(&self, peer_id: &str) -> bool {
        let state = self.inner.state.lock().await;
        state.sessions.contains_key(peer_id)
    }

    /// Number of active sessions.
    pub async fn session_count(&self) -> usize {
        let state = self.inner.state.lock().await;
        state.sessions.len()
    }

    /// Peer ids with an active session.
    pub async fn peers(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        state.sessions.keys().cloned().collect()
    }

    /// Apply a state transition if legal, emitting the change upward.
    async fn transition(&self, peer_id: &str, to: ConnectionState) {
        let changed = {
            let mut state = self.inner.state.lock().await;
            let current = state
                .connections
                .get(peer_id)
                .copied()
                .unwrap_or(ConnectionState::New);
            if current == to {
                false
            } else if current.can_transition(to) {
                state.connections.insert(peer_id.to_string(), to);
                true
            } else {
                tracing::warn!(
                    peer = peer_id,
                    from = %current,
                    to = %to,
                    "ignoring invalid state transition"
                );
                false
            }
        };
        if changed {
            tracing::debug!(peer = peer_id, state = %to, "connection state changed");
            self.emit(SessionEvent::StateChanged {
                peer_id: peer_id.to_string(),
                state: to,
            });
        }
    }

    /// Arm the reconnection scheduler unless a handshake or timer is
    /// already in flight for the peer.
    async fn arm_reconnect(&self, peer_id: &str) {
        {
            let state = self.inner.state.lock().await;
            if state.agreement.has_pending(peer_id) {
                tracing::debug!(peer = peer_id, "handshake in flight, not arming reconnect");
                return;
            }
        }

        let manager = self.clone();
        let peer = peer_id.to_string();
        let armed = self
            .inner
            .reconnect
            .schedule(peer_id, move || {
                let manager = manager.clone();
                let peer = peer.clone();
                async move { manager.reattempt_handshake(&peer).await }
            })
            .await;
        if armed {
            tracing::debug!(peer = peer_id, "reconnect timer armed");
        }
    }

    /// One reconnection attempt: mint a restart offer and hand it upward.
    ///
    /// Returns whether the scheduler should keep retrying.
    async fn reattempt_handshake(&self, peer_id: &str) -> bool {
        let state = self.connection_state(peer_id).await;
        if matches!(
            state,
            ConnectionState::Connected | ConnectionState::Closed
        ) {
            return false;
        }

        match self.create_offer(peer_id, true).await {
            Ok(token) => {
                self.emit(SessionEvent::ReconnectOffer {
                    peer_id: peer_id.to_string(),
                    token,
                });
                true
            }
            Err(e) => {
                tracing::warn!(peer = peer_id, error = %e, "reconnect offer failed");
                true
            }
        }
    }

    /// Route an inbound frame to the codec matching its envelope version.
    async fn dispatch_inbound(&self, peer_id: &str, frame: &[u8]) {
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(frame) else {
            self.emit_error(Some(peer_id), "undecodable frame");
            return;
        };
        // Older peers omit the version field entirely; absent means v1.
        let version = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(u64::from(tether_crypto::LEGACY_VERSION));

        match version {
            2 => self.dispatch_secure(peer_id, value).await,
            1 => self.dispatch_legacy(peer_id, value).await,
            v => self.emit_error(Some(peer_id), format!("unsupported envelope version: {v}")),
        }
    }

    async fn dispatch_secure(&self, peer_id: &str, value: serde_json::Value) {
        let Ok(sealed) = serde_json::from_value::<SecureEnvelope>(value) else {
            self.emit_error(Some(peer_id), "malformed envelope");
            return;
        };

        let opened = {
            let mut state = self.inner.state.lock().await;
            let Some(session) = state.sessions.get_mut(peer_id) else {
                self.emit_error(Some(peer_id), "envelope for unknown session");
                return;
            };
            let key = match session.cipher() {
                SessionCipher::V2 { key } => key.clone(),
                SessionCipher::V1 { .. } => {
                    self.emit_error(Some(peer_id), "v2 envelope on a legacy session");
                    return;
                }
            };

            // Stale sequence: expected duplicate delivery, dropped without
            // side effects or an error event.
            if session.is_replay(sealed.seq) {
                tracing::trace!(peer = peer_id, seq = sealed.seq, "dropping stale envelope");
                return;
            }

            match envelope::unpack(&sealed, &key) {
                Ok(opened) => {
                    session.advance_received(opened.seq);
                    opened
                }
                Err(e) => {
                    // Fresh sequence but failed authentication: tampering or
                    // key mismatch, surfaced as a hard error.
                    self.emit_error(Some(peer_id), format!("envelope rejected: {e}"));
                    return;
                }
            }
        };

        self.deliver(peer_id, &opened.payload);
    }

    async fn dispatch_legacy(&self, peer_id: &str, value: serde_json::Value) {
        let Ok(sealed) = serde_json::from_value::<LegacyEnvelope>(value) else {
            self.emit_error(Some(peer_id), "malformed legacy envelope");
            return;
        };

        let opened = {
            let state = self.inner.state.lock().await;
            let Some(session) = state.sessions.get(peer_id) else {
                self.emit_error(Some(peer_id), "envelope for unknown session");
                return;
            };
            let SessionCipher::V1 { secret } = session.cipher() else {
                self.emit_error(Some(peer_id), "legacy envelope on a v2 session");
                return;
            };

            match legacy::unpack_legacy(&sealed, secret) {
                Ok(opened) => opened,
                Err(e) => {
                    self.emit_error(Some(peer_id), format!("legacy envelope rejected: {e}"));
                    return;
                }
            }
        };

        self.deliver(peer_id, &opened.payload);
    }

    /// Decode a decrypted payload and hand it to the application layer.
    fn deliver(&self, peer_id: &str, plaintext: &[u8]) {
        match serde_json::from_slice::<AppPayload>(plaintext) {
            Ok(payload) => self.emit(SessionEvent::Message {
                peer_id: peer_id.to_string(),
                payload,
            }),
            Err(_) => self.emit_error(Some(peer_id), "unrecognized payload kind"),
        }
    }

    async fn gather_descriptor(&self, peer_id: &str) -> TransportDescriptor {
        match tokio::time::timeout(
            self.inner.config.settle_timeout,
            self.inner.transport.negotiate_descriptor(peer_id),
        )
        .await
        {
            Ok(descriptor) => descriptor,
            Err(_) => {
                tracing::debug!(
                    peer = peer_id,
                    "descriptor negotiation timed out, using snapshot"
                );
                self.inner.transport.descriptor_snapshot(peer_id)
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.inner.events.send(event);
    }

    fn emit_error(&self, peer_id: Option<&str>, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::warn!(peer = ?peer_id, detail = %detail, "session error");
        self.emit(SessionEvent::Error {
            peer_id: peer_id.map(str::to_string),
            detail,
        });
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
