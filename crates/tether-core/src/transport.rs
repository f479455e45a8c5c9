//! Transport collaborator contract.
//!
//! The protocol core does not open sockets or data channels. It rides on an
//! ordered, reliable, bidirectional byte-stream channel per peer, provided
//! by the surrounding networking layer, which also pushes channel lifecycle
//! events into the session manager.

use crate::error::TransportError;
use crate::signal::TransportDescriptor;
use std::future::Future;

/// Channel lifecycle events pushed into the session manager.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The peer channel became usable
    Open,
    /// The peer channel closed
    Closed,
    /// The peer channel failed
    Error(String),
    /// A frame arrived on the peer channel
    Message(Vec<u8>),
}

/// An ordered, reliable peer channel.
///
/// The ordering guarantee matters: replay protection in the session manager
/// is a single high-water mark, which is only sound because frames cannot
/// legitimately arrive out of order.
pub trait Transport: Send + Sync + 'static {
    /// Whether the channel to `peer_id` is currently open.
    fn is_open(&self, peer_id: &str) -> bool;

    /// Send one frame to `peer_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ChannelNotOpen`] or
    /// [`TransportError::SendFailed`].
    fn send(&self, peer_id: &str, frame: &[u8]) -> Result<(), TransportError>;

    /// Gather the complete local connection descriptor for `peer_id`.
    ///
    /// May take arbitrarily long (path candidates trickle in); the session
    /// manager bounds the wait and falls back to
    /// [`Transport::descriptor_snapshot`].
    fn negotiate_descriptor(
        &self,
        peer_id: &str,
    ) -> impl Future<Output = TransportDescriptor> + Send;

    /// Whatever descriptor is available right now, possibly partial.
    fn descriptor_snapshot(&self, peer_id: &str) -> TransportDescriptor;
}
