//! LAN transport for `share-core` sessions.
//!
//! Discovery is UDP probe/announce: browsing nodes probe a multicast group
//! (plus any configured seed addresses) and advertising nodes answer with
//! their TCP listen port. Each connected peer gets one TCP link carrying
//! length-prefixed ChaCha20-Poly1305 frames, keyed by a per-pair X25519
//! agreement struck during the hello handshake.

pub mod config;
pub mod crypto;
pub mod discovery;
pub mod protocol;
pub mod transport;
pub mod wire;

pub use config::{LanConfig, DEFAULT_DISCOVERY_PORT, DEFAULT_MAX_FRAME_LEN, DEFAULT_MULTICAST_GROUP};
pub use discovery::{LanAdvertiseDriver, LanBrowseDriver};
pub use protocol::{LanMessage, PROTOCOL_VERSION};
pub use transport::LanTransport;
pub use wire::{decode_message, encode_message, FrameDecodeError, FrameEncodeError};
