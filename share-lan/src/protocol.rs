//! LAN wire messages: discovery over UDP, payload frames over TCP links.
//! Encoding is bincode (see the wire module).

use serde::{Deserialize, Serialize};
use share_core::PeerIdentity;

/// Bumped on incompatible changes; mismatched peers ignore each other.
pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LanMessage {
    /// Browser asking who advertises `namespace`. Sent to the multicast
    /// group and to configured seed addresses.
    Probe {
        protocol_version: u8,
        namespace: String,
        peer: PeerIdentity,
    },
    /// Advertiser's reply: identity plus the TCP port accepting links.
    Announce {
        protocol_version: u8,
        namespace: String,
        peer: PeerIdentity,
        listen_port: u16,
    },
    /// Advertiser going away gracefully.
    Bye { peer: PeerIdentity },
    /// Application payload on an established link. Opaque to this crate.
    Data { payload: Vec<u8> },
}
