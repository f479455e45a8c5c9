//! Shared helpers for Tether integration tests.

use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tether_core::error::TransportError;
use tether_core::signal::TransportDescriptor;
use tether_core::transport::{ChannelEvent, Transport};
use tether_core::{ManagerConfig, SessionEvent, SessionManager};
use tether_crypto::Identity;
use tokio::sync::mpsc::UnboundedReceiver;

/// Install a tracing subscriber once, honoring `RUST_LOG`.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// In-memory transport: frames are queued per peer until a test pumps them
/// into the other manager.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<TransportState>>,
}

#[derive(Default)]
struct TransportState {
    open: HashSet<String>,
    outbox: HashMap<String, Vec<Vec<u8>>>,
}

impl MemoryTransport {
    /// Mark the channel to `peer_id` open.
    pub fn open_channel(&self, peer_id: &str) {
        self.inner.lock().unwrap().open.insert(peer_id.to_string());
    }

    /// Mark the channel to `peer_id` closed.
    pub fn close_channel(&self, peer_id: &str) {
        self.inner.lock().unwrap().open.remove(peer_id);
    }

    /// Take every frame queued for `peer_id`.
    pub fn drain(&self, peer_id: &str) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .outbox
            .remove(peer_id)
            .unwrap_or_default()
    }
}

impl Transport for MemoryTransport {
    fn is_open(&self, peer_id: &str) -> bool {
        self.inner.lock().unwrap().open.contains(peer_id)
    }

    fn send(&self, peer_id: &str, frame: &[u8]) -> Result<(), TransportError> {
        let mut state = self.inner.lock().unwrap();
        if !state.open.contains(peer_id) {
            return Err(TransportError::ChannelNotOpen);
        }
        state
            .outbox
            .entry(peer_id.to_string())
            .or_default()
            .push(frame.to_vec());
        Ok(())
    }

    fn negotiate_descriptor(
        &self,
        peer_id: &str,
    ) -> impl Future<Output = TransportDescriptor> + Send {
        let descriptor = self.descriptor_snapshot(peer_id);
        async move { descriptor }
    }

    fn descriptor_snapshot(&self, peer_id: &str) -> TransportDescriptor {
        json!({ "kind": "memory", "peer": peer_id })
    }
}

/// One side of a test pairing.
pub struct TestPeer {
    /// The peer's session manager
    pub manager: SessionManager<MemoryTransport>,
    /// The peer's upward event stream
    pub events: UnboundedReceiver<SessionEvent>,
    /// The peer's transport
    pub transport: MemoryTransport,
    /// The peer's id on the wire
    pub id: String,
}

impl TestPeer {
    /// Create a peer with a fresh identity and defaults.
    pub fn new(id: &str) -> Self {
        Self::with_config(id, ManagerConfig::default())
    }

    /// Create a peer with a custom manager configuration.
    pub fn with_config(id: &str, config: ManagerConfig) -> Self {
        let transport = MemoryTransport::default();
        let identity = Identity::generate().expect("csprng");
        let (manager, events) = SessionManager::new(id, &identity, transport.clone(), config);
        Self {
            manager,
            events,
            transport,
            id: id.to_string(),
        }
    }

    /// Pop every event currently queued.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    /// Deliver every frame this peer has queued for `other`, as inbound
    /// channel messages on the other side.
    pub async fn pump_to(&self, other: &TestPeer) {
        for frame in self.transport.drain(&other.id) {
            other
                .manager
                .handle_channel_event(&self.id, ChannelEvent::Message(frame))
                .await;
        }
    }
}

/// Pair two peers end to end: offer, answer, accept, channels open.
pub async fn establish(initiator: &mut TestPeer, responder: &mut TestPeer) {
    init_tracing();
    let offer = initiator
        .manager
        .create_offer(&responder.id, false)
        .await
        .expect("offer");
    let outcome = responder.manager.handle_signal(&offer).await.expect("answer");
    let answer = outcome.response_token.expect("answer token");
    initiator.manager.handle_signal(&answer).await.expect("accept");

    initiator.transport.open_channel(&responder.id);
    responder.transport.open_channel(&initiator.id);
    initiator
        .manager
        .handle_channel_event(&responder.id, ChannelEvent::Open)
        .await;
    responder
        .manager
        .handle_channel_event(&initiator.id, ChannelEvent::Open)
        .await;

    initiator.drain_events();
    responder.drain_events();
    tracing::debug!(initiator = %initiator.id, responder = %responder.id, "test pair established");
}
