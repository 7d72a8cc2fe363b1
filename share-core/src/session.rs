//! Session orchestration: hosting, joining, broadcast, and the event fan-out
//! that marshals every consumer callback onto one delivery context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::advertiser::Advertiser;
use crate::browser::{BrowseError, Browser};
use crate::config::SessionConfig;
use crate::delivery::DeliveryContext;
use crate::identity::{PeerId, PeerIdentity};
use crate::listener::{
    DataListener, DecodeDiagnostics, DiscoveryListener, IdentityCodec, PayloadCodec,
    PeerStateListener,
};
use crate::transport::{
    EventReceiver, JoinCallback, PeerState, Reliability, SessionTransport, TransportError,
    TransportEvent,
};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Re-entrant `start_hosting` without an intervening `stop_hosting`.
    #[error("already hosting")]
    AlreadyHosting,
    /// Re-entrant `start_joining` without an intervening `stop_joining`.
    #[error("already browsing")]
    AlreadyBrowsing,
    /// `request_join` with no browse in progress.
    #[error("not browsing")]
    NotBrowsing,
    #[error(transparent)]
    Browse(#[from] BrowseError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

struct Shared {
    config: SessionConfig,
    transport: Arc<dyn SessionTransport>,
    delivery: Arc<dyn DeliveryContext>,
    codec: Arc<dyn PayloadCodec>,
    /// Peers whose last reported state is Connected. Mutated only from
    /// closures running on the delivery context; read under the lock.
    connected: Mutex<HashMap<PeerId, PeerIdentity>>,
    peer_listeners: Mutex<Vec<Arc<dyn PeerStateListener>>>,
    data_listeners: Mutex<Vec<Arc<dyn DataListener>>>,
    discovery_listeners: Mutex<Vec<Arc<dyn DiscoveryListener>>>,
    diagnostics: Mutex<Option<Arc<dyn DecodeDiagnostics>>>,
}

/// The orchestrator exposed to the consumer: owns a transport, tracks the
/// derived membership view, and fans broadcasts out to every connected peer.
pub struct SessionController {
    shared: Arc<Shared>,
    hosting: Mutex<Option<Advertiser>>,
    browsing: Mutex<Option<Browser>>,
}

impl SessionController {
    /// Build a controller around a transport and the event stream it was
    /// created with. The returned [`EventPump`] must be driven (spawn
    /// `run()`, or call `pump_pending()` from a loop of your own) for any
    /// callback to fire.
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn SessionTransport>,
        events: EventReceiver,
        delivery: Arc<dyn DeliveryContext>,
    ) -> (Self, EventPump) {
        Self::with_codec(config, transport, events, delivery, Arc::new(IdentityCodec))
    }

    /// Like [`SessionController::new`] with an explicit payload codec.
    pub fn with_codec(
        config: SessionConfig,
        transport: Arc<dyn SessionTransport>,
        events: EventReceiver,
        delivery: Arc<dyn DeliveryContext>,
        codec: Arc<dyn PayloadCodec>,
    ) -> (Self, EventPump) {
        let shared = Arc::new(Shared {
            config,
            transport,
            delivery,
            codec,
            connected: Mutex::new(HashMap::new()),
            peer_listeners: Mutex::new(Vec::new()),
            data_listeners: Mutex::new(Vec::new()),
            discovery_listeners: Mutex::new(Vec::new()),
            diagnostics: Mutex::new(None),
        });
        let controller = Self {
            shared: shared.clone(),
            hosting: Mutex::new(None),
            browsing: Mutex::new(None),
        };
        (controller, EventPump { shared, events })
    }

    pub fn local_peer(&self) -> PeerIdentity {
        self.shared.transport.local_peer().clone()
    }

    pub fn add_peer_listener(&self, listener: Arc<dyn PeerStateListener>) {
        self.shared.peer_listeners.lock().unwrap().push(listener);
    }

    pub fn add_data_listener(&self, listener: Arc<dyn DataListener>) {
        self.shared.data_listeners.lock().unwrap().push(listener);
    }

    pub fn add_discovery_listener(&self, listener: Arc<dyn DiscoveryListener>) {
        self.shared
            .discovery_listeners
            .lock()
            .unwrap()
            .push(listener);
    }

    pub fn set_decode_diagnostics(&self, diagnostics: Arc<dyn DecodeDiagnostics>) {
        *self.shared.diagnostics.lock().unwrap() = Some(diagnostics);
    }

    /// Start advertising under the configured namespace. Rejects re-entrant
    /// calls: the first advertiser stays active and untouched.
    pub fn start_hosting(&self) -> Result<(), SessionError> {
        let mut hosting = self.hosting.lock().unwrap();
        if hosting.is_some() {
            return Err(SessionError::AlreadyHosting);
        }
        let advertiser = Advertiser::new(
            self.shared.config.service_namespace.clone(),
            self.shared.transport.advertise_driver(),
        );
        advertiser.start()?;
        info!(namespace = %advertiser.namespace(), "hosting started");
        *hosting = Some(advertiser);
        Ok(())
    }

    /// Stop advertising. Safe to call when not hosting.
    pub fn stop_hosting(&self) {
        if let Some(advertiser) = self.hosting.lock().unwrap().take() {
            advertiser.stop();
            info!("hosting stopped");
        }
    }

    pub fn is_hosting(&self) -> bool {
        self.hosting.lock().unwrap().is_some()
    }

    /// Start browsing for advertised peers under the configured namespace.
    /// Symmetric guard to `start_hosting`.
    pub fn start_joining(&self) -> Result<(), SessionError> {
        let mut browsing = self.browsing.lock().unwrap();
        if browsing.is_some() {
            return Err(SessionError::AlreadyBrowsing);
        }
        let browser = Browser::new(
            self.shared.config.service_namespace.clone(),
            self.shared.transport.browse_driver(),
        );
        browser.start_discovery()?;
        info!(namespace = %browser.namespace(), "browsing started");
        *browsing = Some(browser);
        Ok(())
    }

    /// Stop browsing and abandon any in-flight join. Safe to call when not
    /// browsing.
    pub fn stop_joining(&self) {
        if let Some(browser) = self.browsing.lock().unwrap().take() {
            browser.cancel();
            info!("browsing stopped");
        }
    }

    pub fn is_browsing(&self) -> bool {
        self.browsing.lock().unwrap().is_some()
    }

    /// Attempt to join a peer discovered while browsing. One completion
    /// callback per attempt.
    pub fn request_join(
        &self,
        peer: &PeerIdentity,
        done: JoinCallback,
    ) -> Result<(), SessionError> {
        let browsing = self.browsing.lock().unwrap();
        let browser = browsing.as_ref().ok_or(SessionError::NotBrowsing)?;
        browser.request_join(peer, done)?;
        Ok(())
    }

    /// Send one payload to every connected peer. Trivially succeeds on an
    /// empty session without touching the transport. Fire-and-forget: the
    /// result reflects local dispatch only.
    pub fn broadcast(&self, payload: &[u8]) -> Result<(), TransportError> {
        let max = self.shared.config.max_payload_len;
        if payload.len() > max {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }
        let targets: Vec<PeerIdentity> = {
            let connected = self.shared.connected.lock().unwrap();
            connected.values().cloned().collect()
        };
        if targets.is_empty() {
            return Ok(());
        }
        debug!(peers = targets.len(), bytes = payload.len(), "broadcast");
        self.shared
            .transport
            .send(payload, &targets, Reliability::Reliable)
    }

    /// Snapshot of the peers whose last reported state is Connected.
    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.shared
            .connected
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect()
    }

    /// Tear the session down: stop both roles and drop every connection.
    pub fn shutdown(&self) {
        self.stop_hosting();
        self.stop_joining();
        for peer in self.connected_peers() {
            self.shared.transport.disconnect(&peer);
        }
    }
}

/// Owns the transport event stream and turns each event into one task posted
/// to the delivery context. Membership mutation happens inside those tasks,
/// so everything the consumer observes is serialized.
pub struct EventPump {
    shared: Arc<Shared>,
    events: EventReceiver,
}

impl EventPump {
    /// Drain events until the transport closes its stream.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            dispatch(&self.shared, event);
        }
        debug!("transport event stream closed");
    }

    /// Synchronously drain whatever is queued right now. Returns the number
    /// of events dispatched. Hook for tests and single-threaded hosts.
    pub fn pump_pending(&mut self) -> usize {
        let mut n = 0;
        while let Ok(event) = self.events.try_recv() {
            dispatch(&self.shared, event);
            n += 1;
        }
        n
    }
}

fn dispatch(shared: &Arc<Shared>, event: TransportEvent) {
    let shared = shared.clone();
    let delivery = shared.delivery.clone();
    delivery.post(Box::new(move || apply(&shared, event)));
}

/// Runs on the delivery context: update the derived membership view, then
/// invoke listeners. Listener vectors are cloned out of their locks first so
/// a handler may register further listeners without deadlocking.
fn apply(shared: &Shared, event: TransportEvent) {
    match event {
        TransportEvent::PeerStateChanged { peer, state } => {
            {
                let mut connected = shared.connected.lock().unwrap();
                match state {
                    PeerState::Connected => {
                        connected.insert(peer.id(), peer.clone());
                    }
                    // Idempotent: removing an absent peer is a no-op.
                    PeerState::NotConnected => {
                        connected.remove(&peer.id());
                    }
                    PeerState::Connecting => {}
                }
            }
            info!(peer = %peer, %state, "peer state changed");
            let listeners = shared.peer_listeners.lock().unwrap().clone();
            for listener in listeners {
                listener.peer_state_changed(&peer, state);
            }
        }
        TransportEvent::DataReceived { payload, from } => match shared.codec.decode(&payload) {
            Ok(decoded) => {
                debug!(from = %from, bytes = decoded.len(), "data received");
                let listeners = shared.data_listeners.lock().unwrap().clone();
                for listener in listeners {
                    listener.data_received(&decoded, &from);
                }
            }
            Err(err) => {
                warn!(from = %from, %err, "dropping undecodable payload");
                let diagnostics = shared.diagnostics.lock().unwrap().clone();
                if let Some(diagnostics) = diagnostics {
                    diagnostics.decode_failed(&err, &from);
                }
            }
        },
        TransportEvent::PeerFound { peer } => {
            debug!(peer = %peer, "peer found");
            let listeners = shared.discovery_listeners.lock().unwrap().clone();
            for listener in listeners {
                listener.peer_found(&peer);
            }
        }
        TransportEvent::PeerLost { peer } => {
            debug!(peer = %peer, "peer lost");
            let listeners = shared.discovery_listeners.lock().unwrap().clone();
            for listener in listeners {
                listener.peer_lost(&peer);
            }
        }
    }
}
