//! Per-peer session state and the connection state machine.

use tether_crypto::{LegacySecret, SessionKey};

/// Connection lifecycle state for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt yet
    New,
    /// Handshake or transport setup in progress
    Connecting,
    /// Channel open, session usable
    Connected,
    /// Transport lost, reconnection may be armed
    Disconnected,
    /// Transport failed, reconnection may be armed
    Failed,
    /// Explicit teardown; terminal
    Closed,
}

impl ConnectionState {
    /// Whether a transition from `self` to `to` is legal.
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        use ConnectionState::{Closed, Connected, Connecting, Disconnected, Failed, New};
        if self == to {
            return false;
        }
        match (self, to) {
            // Closed is terminal; everything else may close.
            (Closed, _) => false,
            (_, Closed) => true,

            (New, Connecting | Connected) => true,
            (Connecting, Connected | Disconnected | Failed) => true,
            // A restart handshake re-enters Connecting from an open channel.
            (Connected, Disconnected | Failed | Connecting) => true,
            (Disconnected, Connecting | Connected | Failed) => true,
            (Failed, Connecting | Connected) => true,
            _ => false,
        }
    }

    /// Whether this state permits no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// The cipher negotiated for a session, fixed once at handshake time.
///
/// Codec selection happens here, once, rather than per call site.
pub enum SessionCipher {
    /// Ephemeral key agreement, v2 envelopes
    V2 {
        /// Derived session key
        key: SessionKey,
    },
    /// Pre-shared secret, v1 envelopes (interop fallback)
    V1 {
        /// Shared secret carried in the handshake signals
        secret: LegacySecret,
    },
}

impl SessionCipher {
    /// The envelope version this cipher produces.
    #[must_use]
    pub fn version(&self) -> u8 {
        match self {
            SessionCipher::V2 { .. } => tether_crypto::ENVELOPE_VERSION,
            SessionCipher::V1 { .. } => tether_crypto::LEGACY_VERSION,
        }
    }
}

/// Mutable per-peer session state. In-memory only; never persisted.
pub struct PeerSession {
    cipher: SessionCipher,
    remote_fingerprint: String,
    send_seq: u64,
    last_received_seq: u64,
}

impl PeerSession {
    /// Create a v2 session from a derived key.
    #[must_use]
    pub fn with_key(key: SessionKey, remote_fingerprint: String) -> Self {
        Self {
            cipher: SessionCipher::V2 { key },
            remote_fingerprint,
            send_seq: 0,
            last_received_seq: 0,
        }
    }

    /// Create a v1 session from a pre-shared secret.
    #[must_use]
    pub fn with_legacy_secret(secret: LegacySecret, remote_fingerprint: String) -> Self {
        Self {
            cipher: SessionCipher::V1 { secret },
            remote_fingerprint,
            send_seq: 0,
            last_received_seq: 0,
        }
    }

    /// The negotiated cipher.
    #[must_use]
    pub fn cipher(&self) -> &SessionCipher {
        &self.cipher
    }

    /// The remote identity fingerprint recorded at handshake time.
    #[must_use]
    pub fn remote_fingerprint(&self) -> &str {
        &self.remote_fingerprint
    }

    /// Claim the next outbound sequence number.
    ///
    /// Incremented before encryption, so sequence numbers start at 1 and a
    /// number is never reused within the session's lifetime even if the
    /// subsequent send fails.
    pub fn next_seq(&mut self) -> u64 {
        self.send_seq += 1;
        self.send_seq
    }

    /// Whether an incoming sequence number is a replay.
    ///
    /// Assumes an ordered, reliable transport: anything at or below the
    /// high-water mark is a duplicate, never a reordering. A transport that
    /// relaxes ordering would need a dedup window here instead.
    #[must_use]
    pub fn is_replay(&self, seq: u64) -> bool {
        seq <= self.last_received_seq
    }

    /// Advance the receive high-water mark after a successful unpack.
    pub fn advance_received(&mut self, seq: u64) {
        debug_assert!(seq > self.last_received_seq);
        self.last_received_seq = self.last_received_seq.max(seq);
    }

    /// Last sequence number claimed for sending.
    #[must_use]
    pub fn send_seq(&self) -> u64 {
        self.send_seq
    }

    /// Receive high-water mark.
    #[must_use]
    pub fn last_received_seq(&self) -> u64 {
        self.last_received_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use ConnectionState::*;
        assert!(New.can_transition(Connecting));
        assert!(Connecting.can_transition(Connected));
        assert!(Connected.can_transition(Disconnected));
        assert!(Disconnected.can_transition(Connecting));
        assert!(Failed.can_transition(Connecting));
        assert!(Connected.can_transition(Closed));
    }

    #[test]
    fn test_closed_is_terminal() {
        use ConnectionState::*;
        for to in [New, Connecting, Connected, Disconnected, Failed] {
            assert!(!Closed.can_transition(to));
        }
        assert!(Closed.is_terminal());
    }

    #[test]
    fn test_invalid_transitions() {
        use ConnectionState::*;
        assert!(!New.can_transition(Disconnected));
        assert!(!New.can_transition(Failed));
        assert!(!Connecting.can_transition(New));
        assert!(!Connected.can_transition(New));
    }

    #[test]
    fn test_seq_starts_at_one() {
        let key = SessionKey::from_bytes([1u8; 32]);
        let mut session = PeerSession::with_key(key, "fp".into());
        assert_eq!(session.send_seq(), 0);
        assert_eq!(session.next_seq(), 1);
        assert_eq!(session.next_seq(), 2);
    }

    #[test]
    fn test_replay_watermark() {
        let key = SessionKey::from_bytes([1u8; 32]);
        let mut session = PeerSession::with_key(key, "fp".into());
        assert!(!session.is_replay(1));
        session.advance_received(3);
        assert!(session.is_replay(1));
        assert!(session.is_replay(3));
        assert!(!session.is_replay(4));
    }

    #[test]
    fn test_cipher_version() {
        let v2 = PeerSession::with_key(SessionKey::from_bytes([1u8; 32]), "fp".into());
        assert_eq!(v2.cipher().version(), 2);
        let v1 = PeerSession::with_legacy_secret(LegacySecret::new("s".into()), "fp".into());
        assert_eq!(v1.cipher().version(), 1);
    }
}
