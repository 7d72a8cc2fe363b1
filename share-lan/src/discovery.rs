//! UDP discovery: browsers probe the multicast group (and any seed
//! addresses); advertisers answer with their TCP listen port.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use share_core::{
    AdvertiseDriver, BrowseDriver, JoinCallback, JoinOutcome, PeerIdentity, TransportError,
    TransportEvent,
};
use tracing::{debug, info, warn};

use crate::protocol::{LanMessage, PROTOCOL_VERSION};
use crate::transport::{dial, Discovered, LanShared, FRAME_OVERHEAD};
use crate::wire;

fn multicast_dest(shared: &LanShared) -> SocketAddr {
    SocketAddr::new(
        IpAddr::V4(shared.config.multicast_group),
        shared.config.discovery_port,
    )
}

/// Single receive loop per transport: answers probes while advertising,
/// collects announces while browsing. Runs from bind until shutdown.
pub(crate) async fn udp_recv_loop(shared: Arc<LanShared>) {
    let max = shared.config.max_frame_len + FRAME_OVERHEAD;
    let mut buf = vec![0u8; 65536];
    loop {
        let (n, from) = match shared.udp.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "discovery socket failed");
                break;
            }
        };
        let msg = match wire::decode_message(&buf[..n], max) {
            Ok(msg) => msg,
            Err(_) => continue, // not ours
        };
        match msg {
            LanMessage::Probe {
                protocol_version,
                namespace,
                peer,
            } => {
                if protocol_version != PROTOCOL_VERSION || peer.id() == shared.local.id() {
                    continue;
                }
                let advertising = shared.advertising.lock().unwrap().clone();
                if advertising.as_deref() != Some(namespace.as_str()) {
                    continue;
                }
                debug!(peer = %peer, %from, "probe answered");
                let reply = LanMessage::Announce {
                    protocol_version: PROTOCOL_VERSION,
                    namespace,
                    peer: shared.local.clone(),
                    listen_port: shared.listen_port,
                };
                if let Ok(bytes) = wire::encode_message(&reply, max) {
                    let _ = shared.udp.send_to(&bytes, from).await;
                }
            }
            LanMessage::Announce {
                protocol_version,
                namespace,
                peer,
                listen_port,
            } => {
                if protocol_version != PROTOCOL_VERSION || peer.id() == shared.local.id() {
                    continue;
                }
                let browsing = shared.browsing.lock().unwrap().clone();
                if browsing.as_deref() != Some(namespace.as_str()) {
                    continue;
                }
                let addr = SocketAddr::new(from.ip(), listen_port);
                let is_new = {
                    let mut discovered = shared.discovered.lock().unwrap();
                    let is_new = !discovered.contains_key(&peer.id());
                    discovered.insert(
                        peer.id(),
                        Discovered {
                            identity: peer.clone(),
                            addr,
                            last_seen: Instant::now(),
                        },
                    );
                    is_new
                };
                if is_new {
                    info!(peer = %peer, %addr, "peer discovered");
                    let _ = shared.events.send(TransportEvent::PeerFound { peer });
                }
            }
            LanMessage::Bye { peer } => {
                let known = shared
                    .discovered
                    .lock()
                    .unwrap()
                    .remove(&peer.id())
                    .is_some();
                if known {
                    info!(peer = %peer, "peer said goodbye");
                    let _ = shared.events.send(TransportEvent::PeerLost { peer });
                }
            }
            // Payloads travel over links, never over the discovery socket.
            LanMessage::Data { .. } => {}
        }
    }
}

async fn probe_loop(shared: Arc<LanShared>, namespace: String) {
    let max = shared.config.max_frame_len + FRAME_OVERHEAD;
    let probe = LanMessage::Probe {
        protocol_version: PROTOCOL_VERSION,
        namespace,
        peer: shared.local.clone(),
    };
    let bytes = match wire::encode_message(&probe, max) {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "probe encode failed");
            return;
        }
    };
    let mcast = multicast_dest(&shared);
    loop {
        let _ = shared.udp.send_to(&bytes, mcast).await;
        for seed in &shared.config.seed_addrs {
            let _ = shared.udp.send_to(&bytes, *seed).await;
        }
        sweep_lost(&shared);
        tokio::time::sleep(shared.config.probe_interval).await;
    }
}

/// Report peers that stopped announcing as lost.
fn sweep_lost(shared: &Arc<LanShared>) {
    let timeout = shared.config.peer_timeout;
    let lost: Vec<PeerIdentity> = {
        let mut discovered = shared.discovered.lock().unwrap();
        let gone: Vec<_> = discovered
            .iter()
            .filter(|(_, d)| d.last_seen.elapsed() >= timeout)
            .map(|(id, d)| (*id, d.identity.clone()))
            .collect();
        for (id, _) in &gone {
            discovered.remove(id);
        }
        gone.into_iter().map(|(_, identity)| identity).collect()
    };
    for peer in lost {
        debug!(peer = %peer, "peer announcement timed out");
        let _ = shared.events.send(TransportEvent::PeerLost { peer });
    }
}

pub struct LanAdvertiseDriver {
    pub(crate) shared: Arc<LanShared>,
}

impl AdvertiseDriver for LanAdvertiseDriver {
    fn start(&self, namespace: &str) -> Result<(), TransportError> {
        *self.shared.advertising.lock().unwrap() = Some(namespace.to_string());
        info!(namespace, "answering probes");
        Ok(())
    }

    fn stop(&self) {
        if self.shared.advertising.lock().unwrap().take().is_none() {
            return;
        }
        info!("no longer answering probes");
        // Best-effort goodbye; browsers also age us out via their timeout.
        let bye = LanMessage::Bye {
            peer: self.shared.local.clone(),
        };
        if let Ok(bytes) = wire::encode_message(&bye, self.shared.config.max_frame_len) {
            let _ = self.shared.udp.try_send_to(&bytes, multicast_dest(&self.shared));
            for seed in &self.shared.config.seed_addrs {
                let _ = self.shared.udp.try_send_to(&bytes, *seed);
            }
        }
    }
}

pub struct LanBrowseDriver {
    pub(crate) shared: Arc<LanShared>,
}

impl BrowseDriver for LanBrowseDriver {
    fn start(&self, namespace: &str) -> Result<(), TransportError> {
        *self.shared.browsing.lock().unwrap() = Some(namespace.to_string());
        let mut task = self.shared.probe_task.lock().unwrap();
        if let Some(old) = task.take() {
            old.abort();
        }
        *task = Some(tokio::spawn(probe_loop(
            self.shared.clone(),
            namespace.to_string(),
        )));
        info!(namespace, "probing for peers");
        Ok(())
    }

    fn stop(&self) {
        *self.shared.browsing.lock().unwrap() = None;
        if let Some(task) = self.shared.probe_task.lock().unwrap().take() {
            task.abort();
        }
        self.shared.discovered.lock().unwrap().clear();
    }

    fn join(&self, peer: &PeerIdentity, done: JoinCallback) -> Result<(), TransportError> {
        let addr = self
            .shared
            .discovered
            .lock()
            .unwrap()
            .get(&peer.id())
            .map(|d| d.addr)
            .ok_or_else(|| TransportError::Unreachable(peer.to_string()))?;
        let shared = self.shared.clone();
        let peer = peer.clone();
        tokio::spawn(async move {
            match dial(&shared, addr).await {
                Ok(_) => done(JoinOutcome::Joined),
                Err(e) => {
                    warn!(peer = %peer, error = %e, "join failed");
                    done(JoinOutcome::Failed(TransportError::Io(e.to_string())));
                }
            }
        });
        Ok(())
    }
}
