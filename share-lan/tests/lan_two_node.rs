//! Two-node LAN session over loopback: seeded discovery, join handshake,
//! and a byte-identical broadcast round trip in both directions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use share_core::{
    DataListener, DiscoveryListener, JoinOutcome, PeerIdentity, PeerState, PeerStateListener,
    QueuedDelivery, SessionConfig, SessionController, SessionTransport,
};
use share_lan::{LanConfig, LanTransport};
use tokio::sync::mpsc;
use tokio::time::timeout;

struct PeerStates(mpsc::UnboundedSender<(PeerIdentity, PeerState)>);

impl PeerStateListener for PeerStates {
    fn peer_state_changed(&self, peer: &PeerIdentity, state: PeerState) {
        let _ = self.0.send((peer.clone(), state));
    }
}

struct Payloads(mpsc::UnboundedSender<(Vec<u8>, PeerIdentity)>);

impl DataListener for Payloads {
    fn data_received(&self, payload: &[u8], from: &PeerIdentity) {
        let _ = self.0.send((payload.to_vec(), from.clone()));
    }
}

struct Found(mpsc::UnboundedSender<PeerIdentity>);

impl DiscoveryListener for Found {
    fn peer_found(&self, peer: &PeerIdentity) {
        let _ = self.0.send(peer.clone());
    }
}

struct Node {
    controller: SessionController,
    transport: Arc<LanTransport>,
    states: mpsc::UnboundedReceiver<(PeerIdentity, PeerState)>,
    payloads: mpsc::UnboundedReceiver<(Vec<u8>, PeerIdentity)>,
    found: mpsc::UnboundedReceiver<PeerIdentity>,
}

async fn node(name: &str, seeds: Vec<SocketAddr>) -> Node {
    let config = LanConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        discovery_port: 0,
        seed_addrs: seeds,
        probe_interval: Duration::from_millis(100),
        peer_timeout: Duration::from_secs(5),
        ..LanConfig::default()
    };
    let (transport, events) = LanTransport::bind(config, PeerIdentity::new(name))
        .await
        .expect("bind");
    let (controller, pump) = SessionController::new(
        SessionConfig::default(),
        transport.clone() as Arc<dyn SessionTransport>,
        events,
        QueuedDelivery::spawn(),
    );
    tokio::spawn(pump.run());

    let (state_tx, states) = mpsc::unbounded_channel();
    controller.add_peer_listener(Arc::new(PeerStates(state_tx)));
    let (payload_tx, payloads) = mpsc::unbounded_channel();
    controller.add_data_listener(Arc::new(Payloads(payload_tx)));
    let (found_tx, found) = mpsc::unbounded_channel();
    controller.add_discovery_listener(Arc::new(Found(found_tx)));

    Node {
        controller,
        transport,
        states,
        payloads,
        found,
    }
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

async fn wait_connected(node: &mut Node) -> PeerIdentity {
    loop {
        let (peer, state) = recv(&mut node.states).await;
        if state == PeerState::Connected {
            return peer;
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn two_node_session_round_trip() {
    let mut host = node("host", Vec::new()).await;
    let host_seed = {
        let addr = host.transport.discovery_addr().unwrap();
        SocketAddr::new("127.0.0.1".parse().unwrap(), addr.port())
    };
    let mut guest = node("guest", vec![host_seed]).await;

    host.controller.start_hosting().unwrap();
    guest.controller.start_joining().unwrap();

    let discovered = recv(&mut guest.found).await;
    assert_eq!(discovered, host.controller.local_peer());
    assert_eq!(discovered.display_name(), "host");

    let (join_tx, mut join_rx) = mpsc::unbounded_channel();
    guest
        .controller
        .request_join(
            &discovered,
            Box::new(move |outcome| {
                let _ = join_tx.send(matches!(outcome, JoinOutcome::Joined));
            }),
        )
        .unwrap();
    assert!(recv(&mut join_rx).await, "join should succeed");

    let host_sees = wait_connected(&mut host).await;
    let guest_sees = wait_connected(&mut guest).await;
    assert_eq!(host_sees, guest.controller.local_peer());
    assert_eq!(guest_sees, host.controller.local_peer());
    assert_eq!(host.controller.connected_peers().len(), 1);
    assert_eq!(guest.controller.connected_peers().len(), 1);

    // Host -> guest: a payload big enough to span many TCP segments.
    let photo: Vec<u8> = (0u8..=255).cycle().take(512 * 1024).collect();
    host.controller.broadcast(&photo).unwrap();
    let (received, from) = recv(&mut guest.payloads).await;
    assert_eq!(received, photo);
    assert_eq!(from, host.controller.local_peer());

    // Guest -> host.
    guest.controller.broadcast(b"thanks for the photo").unwrap();
    let (reply, from) = recv(&mut host.payloads).await;
    assert_eq!(reply, b"thanks for the photo".to_vec());
    assert_eq!(from, guest.controller.local_peer());

    // Teardown propagates: the host observes the guest leaving.
    guest.controller.shutdown();
    loop {
        let (peer, state) = recv(&mut host.states).await;
        if state == PeerState::NotConnected {
            assert_eq!(peer, guest.controller.local_peer());
            break;
        }
    }
    assert!(host.controller.connected_peers().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn join_unknown_peer_is_unreachable() {
    let guest = node("loner", Vec::new()).await;
    guest.controller.start_joining().unwrap();
    let result = guest
        .controller
        .request_join(&PeerIdentity::new("ghost"), Box::new(|_| {}));
    assert!(result.is_err());
}
