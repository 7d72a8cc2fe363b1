//! Peer identity: display name plus a stable opaque node token.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque node token. Generated once per process; uniquely distinguishes a
/// device across a session.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn generate() -> Self {
        PeerId(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        PeerId(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form: first 8 hex chars is enough to tell peers apart in logs.
        let simple = self.0.simple().to_string();
        write!(f, "{}", &simple[..8])
    }
}

/// A device participating in, or discoverable for, a session.
///
/// Equality and hashing go by [`PeerId`] only; the display name is
/// presentation data and two devices may legitimately share one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerIdentity {
    display_name: String,
    id: PeerId,
}

impl PeerIdentity {
    /// Create an identity with a fresh node token. Called once per device at
    /// startup.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            id: PeerId::generate(),
        }
    }

    /// Rehydrate an identity whose token is already known (wire decode,
    /// tests).
    pub fn with_id(display_name: impl Into<String>, id: PeerId) -> Self {
        Self {
            display_name: display_name.into(),
            id,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl PartialEq for PeerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerIdentity {}

impl Hash for PeerIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}
