//! LAN transport configuration. Plain values injected by the embedding
//! application; this crate reads no files and no environment.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 71, 25);
pub const DEFAULT_DISCOVERY_PORT: u16 = 45871;

/// Hard ceiling for one wire frame, and therefore one broadcast payload.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

#[derive(Debug, Clone)]
pub struct LanConfig {
    /// TCP listen address for peer links. Port 0 picks an ephemeral port.
    pub listen_addr: SocketAddr,
    /// UDP discovery bind port. Port 0 picks an ephemeral port; peers then
    /// find this node only through `seed_addrs`.
    pub discovery_port: u16,
    pub multicast_group: Ipv4Addr,
    /// Extra unicast probe targets, for networks where multicast is filtered.
    pub seed_addrs: Vec<SocketAddr>,
    /// How often a browsing node probes for advertisers.
    pub probe_interval: Duration,
    /// Discovered peers silent for this long are reported lost.
    pub peer_timeout: Duration,
    pub max_frame_len: u32,
}

impl Default for LanConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:0".parse().expect("static addr"),
            discovery_port: DEFAULT_DISCOVERY_PORT,
            multicast_group: DEFAULT_MULTICAST_GROUP,
            seed_addrs: Vec::new(),
            probe_interval: Duration::from_secs(2),
            peer_timeout: Duration::from_secs(8),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}
