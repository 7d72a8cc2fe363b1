//! Session/connectivity core for local-mesh group sharing.
//!
//! Embeddable library: no I/O of its own. The host application injects a
//! [`SessionTransport`] (see [`memory::MemoryMesh`] for the in-process one,
//! or the `share-lan` crate for UDP/TCP), then drives a [`SessionController`]
//! to host or join a session and broadcast opaque payloads to every member.
//! All consumer callbacks are marshaled onto a single [`DeliveryContext`].

pub mod advertiser;
pub mod browser;
pub mod config;
pub mod delivery;
pub mod identity;
pub mod listener;
pub mod memory;
pub mod session;
pub mod transport;

pub use advertiser::Advertiser;
pub use browser::{BrowseError, BrowseState, Browser};
pub use config::{SessionConfig, DEFAULT_MAX_PAYLOAD_LEN, DEFAULT_SERVICE_NAMESPACE};
pub use delivery::{DeliveryContext, InlineDelivery, QueuedDelivery};
pub use identity::{PeerId, PeerIdentity};
pub use listener::{
    DataListener, DecodeDiagnostics, DecodeError, DiscoveryListener, IdentityCodec, PayloadCodec,
    PeerStateListener,
};
pub use session::{EventPump, SessionController, SessionError};
pub use transport::{
    AdvertiseDriver, BrowseDriver, EventReceiver, EventSender, JoinCallback, JoinOutcome,
    PeerState, Reliability, SessionTransport, TransportError, TransportEvent,
};
