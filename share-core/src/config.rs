//! Session configuration. Injected by the embedding application; the core
//! reads no files and no environment.

use serde::{Deserialize, Serialize};

/// Discovery domain shared by advertiser and browser. Both sides must use an
/// identical value to find each other; treat it as configuration, not a
/// protocol detail.
pub const DEFAULT_SERVICE_NAMESPACE: &str = "hws-project25";

/// Practical per-message ceiling of the reference transports.
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024; // 16 MiB

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Service namespace under which this session advertises and browses.
    #[serde(default = "default_namespace")]
    pub service_namespace: String,
    /// Largest payload `broadcast` accepts, in bytes.
    #[serde(default = "default_max_payload_len")]
    pub max_payload_len: usize,
}

fn default_namespace() -> String {
    DEFAULT_SERVICE_NAMESPACE.to_string()
}

fn default_max_payload_len() -> usize {
    DEFAULT_MAX_PAYLOAD_LEN
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_namespace: default_namespace(),
            max_payload_len: default_max_payload_len(),
        }
    }
}
