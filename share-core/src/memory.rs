//! In-process transport: a mesh hub wiring any number of nodes together.
//!
//! Deterministic and single-process: delivery is reliable and in-order per
//! sender while both endpoints stay attached. This is the test vehicle for
//! the session controller and a usable transport for same-process sessions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use crate::identity::{PeerId, PeerIdentity};
use crate::transport::{
    AdvertiseDriver, BrowseDriver, EventReceiver, JoinCallback, JoinOutcome, PeerState,
    Reliability, SessionTransport, TransportError, TransportEvent,
};

/// Cloneable handle to the shared hub.
#[derive(Clone, Default)]
pub struct MemoryMesh {
    inner: Arc<Mutex<MeshInner>>,
}

#[derive(Default)]
struct MeshInner {
    nodes: HashMap<PeerId, Node>,
}

struct Node {
    identity: PeerIdentity,
    events: mpsc::UnboundedSender<TransportEvent>,
    advertising: Option<String>,
    browsing: Option<String>,
    connected: HashSet<PeerId>,
}

impl MemoryMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node to the mesh. Returns its transport handle and the event
    /// stream the session controller consumes.
    pub fn attach(&self, identity: PeerIdentity) -> (Arc<MemoryTransport>, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.insert(
            identity.id(),
            Node {
                identity: identity.clone(),
                events: tx,
                advertising: None,
                browsing: None,
                connected: HashSet::new(),
            },
        );
        let transport = Arc::new(MemoryTransport {
            local: identity,
            mesh: self.inner.clone(),
            sent: Mutex::new(Vec::new()),
        });
        (transport, rx)
    }

    /// Remove a node abruptly, as if the device vanished. Its connections see
    /// `NotConnected`; browsers watching its namespace see `PeerLost`.
    pub fn detach(&self, peer: PeerId) {
        let mut inner = self.inner.lock().unwrap();
        let Some(node) = inner.nodes.remove(&peer) else {
            return;
        };
        for other_id in &node.connected {
            if let Some(other) = inner.nodes.get_mut(other_id) {
                other.connected.remove(&peer);
                let _ = other.events.send(TransportEvent::PeerStateChanged {
                    peer: node.identity.clone(),
                    state: PeerState::NotConnected,
                });
            }
        }
        if let Some(ns) = &node.advertising {
            notify_browsers(&inner, ns, &node.identity, false);
        }
    }
}

fn notify_browsers(inner: &MeshInner, namespace: &str, who: &PeerIdentity, found: bool) {
    for (id, node) in &inner.nodes {
        if *id == who.id() || node.browsing.as_deref() != Some(namespace) {
            continue;
        }
        let event = if found {
            TransportEvent::PeerFound { peer: who.clone() }
        } else {
            TransportEvent::PeerLost { peer: who.clone() }
        };
        let _ = node.events.send(event);
    }
}

fn connect_pair(inner: &mut MeshInner, a: PeerId, b: PeerId) -> Result<(), TransportError> {
    if !inner.nodes.contains_key(&a) || !inner.nodes.contains_key(&b) {
        return Err(TransportError::Unreachable(format!("peer {} not attached", b)));
    }
    if inner.nodes[&a].connected.contains(&b) {
        return Ok(());
    }
    let identity_a = inner.nodes[&a].identity.clone();
    let identity_b = inner.nodes[&b].identity.clone();
    for state in [PeerState::Connecting, PeerState::Connected] {
        let _ = inner.nodes[&a].events.send(TransportEvent::PeerStateChanged {
            peer: identity_b.clone(),
            state,
        });
        let _ = inner.nodes[&b].events.send(TransportEvent::PeerStateChanged {
            peer: identity_a.clone(),
            state,
        });
    }
    inner.nodes.get_mut(&a).unwrap().connected.insert(b);
    inner.nodes.get_mut(&b).unwrap().connected.insert(a);
    debug!(a = %identity_a, b = %identity_b, "mesh pair connected");
    Ok(())
}

fn disconnect_pair(inner: &mut MeshInner, a: PeerId, b: PeerId) {
    let was_connected = inner
        .nodes
        .get(&a)
        .map(|n| n.connected.contains(&b))
        .unwrap_or(false);
    if !was_connected {
        return;
    }
    let identity_a = inner.nodes[&a].identity.clone();
    let identity_b = inner.nodes[&b].identity.clone();
    inner.nodes.get_mut(&a).unwrap().connected.remove(&b);
    inner.nodes.get_mut(&b).unwrap().connected.remove(&a);
    let _ = inner.nodes[&a].events.send(TransportEvent::PeerStateChanged {
        peer: identity_b,
        state: PeerState::NotConnected,
    });
    let _ = inner.nodes[&b].events.send(TransportEvent::PeerStateChanged {
        peer: identity_a,
        state: PeerState::NotConnected,
    });
}

/// One node's view of the mesh.
pub struct MemoryTransport {
    local: PeerIdentity,
    mesh: Arc<Mutex<MeshInner>>,
    sent: Mutex<Vec<(PeerId, Vec<u8>)>>,
}

impl MemoryTransport {
    /// Log of per-peer dispatches made by `send`, oldest first. Test hook.
    pub fn take_sent(&self) -> Vec<(PeerId, Vec<u8>)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl SessionTransport for MemoryTransport {
    fn local_peer(&self) -> &PeerIdentity {
        &self.local
    }

    fn connect(&self, peer: &PeerIdentity) -> Result<(), TransportError> {
        let mut inner = self.mesh.lock().unwrap();
        connect_pair(&mut inner, self.local.id(), peer.id())
    }

    fn disconnect(&self, peer: &PeerIdentity) {
        let mut inner = self.mesh.lock().unwrap();
        disconnect_pair(&mut inner, self.local.id(), peer.id());
    }

    fn send(
        &self,
        payload: &[u8],
        to: &[PeerIdentity],
        _reliability: Reliability,
    ) -> Result<(), TransportError> {
        let inner = self.mesh.lock().unwrap();
        let me = match inner.nodes.get(&self.local.id()) {
            Some(node) => node,
            None => return Err(TransportError::Closed),
        };
        let mut failed = 0usize;
        for target in to {
            let reachable =
                me.connected.contains(&target.id()) && inner.nodes.contains_key(&target.id());
            if !reachable {
                failed += 1;
                continue;
            }
            let _ = inner.nodes[&target.id()]
                .events
                .send(TransportEvent::DataReceived {
                    payload: payload.to_vec(),
                    from: self.local.clone(),
                });
            self.sent.lock().unwrap().push((target.id(), payload.to_vec()));
        }
        if failed > 0 {
            Err(TransportError::PartialDelivery {
                failed,
                attempted: to.len(),
            })
        } else {
            Ok(())
        }
    }

    fn advertise_driver(&self) -> Arc<dyn AdvertiseDriver> {
        Arc::new(MemoryAdvertiseDriver {
            local: self.local.id(),
            mesh: self.mesh.clone(),
        })
    }

    fn browse_driver(&self) -> Arc<dyn BrowseDriver> {
        Arc::new(MemoryBrowseDriver {
            local: self.local.id(),
            mesh: self.mesh.clone(),
        })
    }
}

struct MemoryAdvertiseDriver {
    local: PeerId,
    mesh: Arc<Mutex<MeshInner>>,
}

impl AdvertiseDriver for MemoryAdvertiseDriver {
    fn start(&self, namespace: &str) -> Result<(), TransportError> {
        let mut inner = self.mesh.lock().unwrap();
        let identity = match inner.nodes.get_mut(&self.local) {
            Some(node) => {
                node.advertising = Some(namespace.to_string());
                node.identity.clone()
            }
            None => return Err(TransportError::Closed),
        };
        notify_browsers(&inner, namespace, &identity, true);
        Ok(())
    }

    fn stop(&self) {
        let mut inner = self.mesh.lock().unwrap();
        let stopped = inner
            .nodes
            .get_mut(&self.local)
            .and_then(|node| node.advertising.take().map(|ns| (ns, node.identity.clone())));
        if let Some((ns, identity)) = stopped {
            notify_browsers(&inner, &ns, &identity, false);
        }
    }
}

struct MemoryBrowseDriver {
    local: PeerId,
    mesh: Arc<Mutex<MeshInner>>,
}

impl BrowseDriver for MemoryBrowseDriver {
    fn start(&self, namespace: &str) -> Result<(), TransportError> {
        let mut inner = self.mesh.lock().unwrap();
        match inner.nodes.get_mut(&self.local) {
            Some(node) => node.browsing = Some(namespace.to_string()),
            None => return Err(TransportError::Closed),
        }
        // Report everyone already advertising; later arrivals stream in as
        // they start.
        let me = &inner.nodes[&self.local];
        for (id, node) in &inner.nodes {
            if *id != self.local && node.advertising.as_deref() == Some(namespace) {
                let _ = me.events.send(TransportEvent::PeerFound {
                    peer: node.identity.clone(),
                });
            }
        }
        Ok(())
    }

    fn stop(&self) {
        let mut inner = self.mesh.lock().unwrap();
        if let Some(node) = inner.nodes.get_mut(&self.local) {
            node.browsing = None;
        }
    }

    fn join(&self, peer: &PeerIdentity, done: JoinCallback) -> Result<(), TransportError> {
        let result = {
            let mut inner = self.mesh.lock().unwrap();
            let advertising = inner
                .nodes
                .get(&peer.id())
                .map(|n| n.advertising.is_some())
                .unwrap_or(false);
            if advertising {
                connect_pair(&mut inner, self.local, peer.id())
            } else {
                Err(TransportError::Unreachable(peer.to_string()))
            }
        };
        // Callback runs outside the hub lock.
        match result {
            Ok(()) => done(JoinOutcome::Joined),
            Err(e) => done(JoinOutcome::Failed(e)),
        }
        Ok(())
    }
}
