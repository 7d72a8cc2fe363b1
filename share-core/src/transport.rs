//! Transport abstraction: a multi-peer reliable-messaging channel plus the
//! event stream it pushes membership and data notifications through.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::identity::PeerIdentity;

/// Connection state of a known peer, as last reported by the transport.
/// Transitions are pushed by the transport layer, never polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    NotConnected,
    Connecting,
    Connected,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Delivery mode for [`SessionTransport::send`]. The session core always asks
/// for `Reliable`; `Unreliable` exists for transports that expose a datagram
/// path next to the ordered one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    Reliable,
    Unreliable,
}

/// Events pushed by a transport. Order is preserved per originating peer;
/// events from different peers may interleave in either relative order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    PeerStateChanged { peer: PeerIdentity, state: PeerState },
    DataReceived { payload: Vec<u8>, from: PeerIdentity },
    PeerFound { peer: PeerIdentity },
    PeerLost { peer: PeerIdentity },
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Transport faults. Always recoverable: the session survives every one of
/// these; retry policy is the consumer's call.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),
    /// Some targets of a fan-out could not be attempted. Sends to the other
    /// targets are not rolled back.
    #[error("delivery failed for {failed} of {attempted} peers")]
    PartialDelivery { failed: usize, attempted: usize },
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("I/O fault: {0}")]
    Io(String),
    #[error("transport closed")]
    Closed,
}

/// A connectionless-capable, multi-peer reliable-messaging channel.
///
/// Implementations own the wire-level connection set and push
/// [`TransportEvent`]s through the channel handed out at construction. The
/// session controller keeps its own derived membership view from that stream;
/// it never polls the transport.
pub trait SessionTransport: Send + Sync {
    /// The local device identity this transport was built around.
    fn local_peer(&self) -> &PeerIdentity;

    /// Open a connection to a discovered peer. Driven by the advertiser /
    /// browser handshake, not called by the consumer directly.
    fn connect(&self, peer: &PeerIdentity) -> Result<(), TransportError>;

    /// Drop the connection to a peer, if one exists. Safe to call for peers
    /// that are already gone.
    fn disconnect(&self, peer: &PeerIdentity);

    /// Send one payload to every peer in `to`. Best effort per peer: the call
    /// fails if delivery to ANY target could not be attempted, but successful
    /// dispatches to the other targets stand. Local dispatch only; no remote
    /// acknowledgment is awaited.
    fn send(
        &self,
        payload: &[u8],
        to: &[PeerIdentity],
        reliability: Reliability,
    ) -> Result<(), TransportError>;

    /// Discovery mechanics for the advertiser role.
    fn advertise_driver(&self) -> Arc<dyn AdvertiseDriver>;

    /// Discovery mechanics for the browser role.
    fn browse_driver(&self) -> Arc<dyn BrowseDriver>;
}

/// Outcome of one join attempt. Reported exactly once per attempt.
#[derive(Debug)]
pub enum JoinOutcome {
    Joined,
    Failed(TransportError),
    Cancelled,
}

/// Single-shot completion callback for a join attempt.
pub type JoinCallback = Box<dyn FnOnce(JoinOutcome) + Send>;

/// Announces the local peer under a service namespace and answers discovery
/// probes until stopped.
pub trait AdvertiseDriver: Send + Sync {
    fn start(&self, namespace: &str) -> Result<(), TransportError>;
    fn stop(&self);
}

/// Probes for peers advertising under a namespace. Found/lost peers surface
/// as [`TransportEvent::PeerFound`] / [`TransportEvent::PeerLost`] on the
/// transport's event stream.
pub trait BrowseDriver: Send + Sync {
    fn start(&self, namespace: &str) -> Result<(), TransportError>;
    fn stop(&self);

    /// Negotiate joining a discovered peer's session. Completion arrives via
    /// `done`; connection progress arrives on the event stream.
    fn join(&self, peer: &PeerIdentity, done: JoinCallback) -> Result<(), TransportError>;
}
