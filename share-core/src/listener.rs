//! Consumer-facing listener interfaces, one small trait per event source.
//!
//! Handlers are independent objects injected into the session controller;
//! all of them are invoked only on the controller's delivery context and must
//! not block.

use crate::identity::PeerIdentity;
use crate::transport::PeerState;

/// Membership notifications.
pub trait PeerStateListener: Send + Sync {
    fn peer_state_changed(&self, peer: &PeerIdentity, state: PeerState);
}

/// Inbound broadcast payloads, post-decode.
pub trait DataListener: Send + Sync {
    fn data_received(&self, payload: &[u8], from: &PeerIdentity);
}

/// Peers appearing and disappearing while browsing.
pub trait DiscoveryListener: Send + Sync {
    fn peer_found(&self, peer: &PeerIdentity);

    fn peer_lost(&self, peer: &PeerIdentity) {
        let _ = peer;
    }
}

/// Inbound bytes that could not be interpreted as the expected payload type.
#[derive(Debug, thiserror::Error)]
#[error("payload decode failed: {0}")]
pub struct DecodeError(pub String);

/// Observability hook for frames dropped on decode failure. The event never
/// reaches data listeners, but it is not silently ignored either.
pub trait DecodeDiagnostics: Send + Sync {
    fn decode_failed(&self, err: &DecodeError, from: &PeerIdentity);
}

/// Interprets raw payload bytes before they reach data listeners. A frame
/// failing `decode` is dropped and reported through [`DecodeDiagnostics`].
pub trait PayloadCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, DecodeError>;
}

/// Default codec: hands bytes through untouched, so nothing is ever dropped.
pub struct IdentityCodec;

impl PayloadCodec for IdentityCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
        Ok(bytes.to_vec())
    }
}
