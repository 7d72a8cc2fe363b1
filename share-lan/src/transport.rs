//! LAN transport: TCP listener for peer links, hello handshake, encrypted
//! frame loops, and fan-out send.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use share_core::{
    AdvertiseDriver, BrowseDriver, EventReceiver, EventSender, PeerId, PeerIdentity, PeerState,
    Reliability, SessionTransport, TransportError, TransportEvent,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LanConfig;
use crate::crypto::{FrameCipher, Keypair, PublicKey};
use crate::discovery::{udp_recv_loop, LanAdvertiseDriver, LanBrowseDriver};
use crate::protocol::{LanMessage, PROTOCOL_VERSION};
use crate::wire;

const LEN_SIZE: usize = 4;
// version + peer id + public key + display-name length
const HELLO_FIXED: usize = 1 + 16 + 32 + 1;
/// Bincode and AEAD overhead allowed on top of `max_frame_len` payload bytes.
pub(crate) const FRAME_OVERHEAD: u32 = 80;

pub(crate) struct Link {
    pub(crate) tx: mpsc::UnboundedSender<Vec<u8>>,
}

pub(crate) struct Discovered {
    pub(crate) identity: PeerIdentity,
    pub(crate) addr: SocketAddr,
    pub(crate) last_seen: Instant,
}

pub(crate) struct LanShared {
    pub(crate) config: LanConfig,
    pub(crate) local: PeerIdentity,
    pub(crate) keypair: Keypair,
    pub(crate) events: EventSender,
    pub(crate) udp: Arc<UdpSocket>,
    pub(crate) listen_port: u16,
    pub(crate) links: Mutex<HashMap<PeerId, Link>>,
    pub(crate) discovered: Mutex<HashMap<PeerId, Discovered>>,
    pub(crate) advertising: Mutex<Option<String>>,
    pub(crate) browsing: Mutex<Option<String>>,
    pub(crate) probe_task: Mutex<Option<JoinHandle<()>>>,
    io_tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// [`SessionTransport`] over the local network: UDP probe/announce discovery
/// plus one encrypted TCP link per connected peer.
pub struct LanTransport {
    shared: Arc<LanShared>,
}

impl LanTransport {
    /// Bind the TCP listener and the discovery socket, start the accept and
    /// discovery loops, and hand back the event stream for the session
    /// controller. Must run inside a tokio runtime.
    pub async fn bind(
        config: LanConfig,
        local: PeerIdentity,
    ) -> io::Result<(Arc<Self>, EventReceiver)> {
        let (events, events_rx) = mpsc::unbounded_channel();
        let listener = TcpListener::bind(config.listen_addr).await?;
        let listen_port = listener.local_addr()?.port();
        let udp = UdpSocket::from_std(make_discovery_socket(&config)?)?;
        info!(
            peer = %local,
            tcp = listen_port,
            udp = udp.local_addr()?.port(),
            "lan transport up"
        );

        let shared = Arc::new(LanShared {
            config,
            local,
            keypair: Keypair::generate(),
            events,
            udp: Arc::new(udp),
            listen_port,
            links: Mutex::new(HashMap::new()),
            discovered: Mutex::new(HashMap::new()),
            advertising: Mutex::new(None),
            browsing: Mutex::new(None),
            probe_task: Mutex::new(None),
            io_tasks: Mutex::new(Vec::new()),
        });
        let accept = tokio::spawn(accept_loop(listener, shared.clone()));
        let recv = tokio::spawn(udp_recv_loop(shared.clone()));
        shared.io_tasks.lock().unwrap().extend([accept, recv]);
        Ok((Arc::new(Self { shared: shared.clone() }), events_rx))
    }

    /// Address of the discovery socket; useful as a seed for other nodes.
    pub fn discovery_addr(&self) -> io::Result<SocketAddr> {
        self.shared.udp.local_addr()
    }

    /// TCP port accepting peer links.
    pub fn listen_port(&self) -> u16 {
        self.shared.listen_port
    }

    /// Stop every background task and drop all links. No further events are
    /// emitted after this returns.
    pub fn shutdown(&self) {
        if let Some(task) = self.shared.probe_task.lock().unwrap().take() {
            task.abort();
        }
        for task in self.shared.io_tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.shared.links.lock().unwrap().clear();
    }
}

fn make_discovery_socket(config: &LanConfig) -> io::Result<std::net::UdpSocket> {
    let sock = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;
    // Multiple nodes on one host share the fixed discovery port.
    sock.set_reuse_address(true)?;
    #[cfg(unix)]
    sock.set_reuse_port(true)?;
    let bind_addr =
        SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, config.discovery_port));
    sock.bind(&bind_addr.into())?;
    sock.set_nonblocking(true)?;
    let sock: std::net::UdpSocket = sock.into();
    // Multicast is best effort; seed addresses cover filtered networks.
    let _ = sock.join_multicast_v4(&config.multicast_group, &std::net::Ipv4Addr::UNSPECIFIED);
    let _ = sock.set_multicast_ttl_v4(1);
    Ok(sock)
}

async fn accept_loop(listener: TcpListener, shared: Arc<LanShared>) {
    loop {
        let (stream, from) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                break;
            }
        };
        debug!(%from, "inbound link");
        let shared = shared.clone();
        tokio::spawn(async move {
            match handshake_accept(stream, &shared).await {
                Ok((stream, remote, key)) => spawn_link(&shared, stream, remote, key, false),
                Err(e) => debug!(%from, error = %e, "inbound handshake failed"),
            }
        });
    }
}

/// Dial a peer's TCP listener, run the hello exchange, and start the link.
pub(crate) async fn dial(shared: &Arc<LanShared>, addr: SocketAddr) -> io::Result<PeerIdentity> {
    let mut stream = TcpStream::connect(addr).await?;
    send_hello(&mut stream, shared).await?;
    let (remote, remote_key) = recv_hello(&mut stream).await?;
    let key = shared.keypair.link_key(&remote_key);
    spawn_link(shared, stream, remote.clone(), key, true);
    Ok(remote)
}

async fn handshake_accept(
    mut stream: TcpStream,
    shared: &Arc<LanShared>,
) -> io::Result<(TcpStream, PeerIdentity, [u8; 32])> {
    let (remote, remote_key) = recv_hello(&mut stream).await?;
    send_hello(&mut stream, shared).await?;
    let key = shared.keypair.link_key(&remote_key);
    Ok((stream, remote, key))
}

async fn send_hello(stream: &mut TcpStream, shared: &Arc<LanShared>) -> io::Result<()> {
    let name = shared.local.display_name().as_bytes();
    let name_len = name.len().min(255);
    let mut out = Vec::with_capacity(HELLO_FIXED + name_len);
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(shared.local.id().as_bytes());
    out.extend_from_slice(shared.keypair.public_key().as_bytes());
    out.push(name_len as u8);
    out.extend_from_slice(&name[..name_len]);
    stream.write_all(&out).await?;
    stream.flush().await
}

async fn recv_hello(stream: &mut TcpStream) -> io::Result<(PeerIdentity, PublicKey)> {
    let mut fixed = [0u8; HELLO_FIXED];
    stream.read_exact(&mut fixed).await?;
    if fixed[0] != PROTOCOL_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported protocol version",
        ));
    }
    let mut id = [0u8; 16];
    id.copy_from_slice(&fixed[1..17]);
    let mut key = [0u8; 32];
    key.copy_from_slice(&fixed[17..49]);
    let name_len = fixed[49] as usize;
    let mut name = vec![0u8; name_len];
    stream.read_exact(&mut name).await?;
    let name = String::from_utf8_lossy(&name).into_owned();
    Ok((
        PeerIdentity::with_id(name, PeerId::from_bytes(id)),
        PublicKey::from_bytes(key),
    ))
}

/// Register the link and start its read/write loops.
///
/// A simultaneous mutual dial gives each end two streams for the same peer.
/// Both ends keep the one dialed by the lower peer id, so they settle on the
/// SAME stream; keeping whichever registered first would have each side keep
/// the stream the other dropped.
pub(crate) fn spawn_link(
    shared: &Arc<LanShared>,
    stream: TcpStream,
    remote: PeerIdentity,
    key: [u8; 32],
    outbound: bool,
) {
    let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let first = {
        let mut links = shared.links.lock().unwrap();
        match links.entry(remote.id()) {
            Entry::Occupied(mut entry) => {
                let keep_new = outbound == (shared.local.id() < remote.id());
                if !keep_new {
                    debug!(peer = %remote, "duplicate link dropped");
                    return;
                }
                // Replacing the entry drops the old sender: its write loop
                // ends and shuts that stream down without a teardown event.
                debug!(peer = %remote, "duplicate link replaced");
                entry.insert(Link { tx: tx.clone() });
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(Link { tx: tx.clone() });
                true
            }
        }
    };
    if first {
        for state in [PeerState::Connecting, PeerState::Connected] {
            let _ = shared.events.send(TransportEvent::PeerStateChanged {
                peer: remote.clone(),
                state,
            });
        }
        info!(peer = %remote, "link established");
    }

    let (reader, writer) = stream.into_split();
    tokio::spawn(write_loop(writer, rx, key));
    let shared = shared.clone();
    tokio::spawn(async move {
        read_loop(reader, &shared, &remote, key).await;
        // Remove only our own registration; a replaced link ending must not
        // tear down its successor.
        let removed = {
            let mut links = shared.links.lock().unwrap();
            match links.get(&remote.id()) {
                Some(link) if link.tx.same_channel(&tx) => {
                    links.remove(&remote.id());
                    true
                }
                _ => false,
            }
        };
        if removed {
            info!(peer = %remote, "link closed");
            let _ = shared.events.send(TransportEvent::PeerStateChanged {
                peer: remote,
                state: PeerState::NotConnected,
            });
        }
    });
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    key: [u8; 32],
) {
    let mut cipher = match FrameCipher::new(&key) {
        Ok(c) => c,
        Err(_) => return,
    };
    while let Some(plain) = rx.recv().await {
        let sealed = match cipher.seal(&plain) {
            Ok(s) => s,
            Err(_) => break,
        };
        if writer
            .write_all(&(sealed.len() as u32).to_le_bytes())
            .await
            .is_err()
            || writer.write_all(&sealed).await.is_err()
            || writer.flush().await.is_err()
        {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    shared: &Arc<LanShared>,
    remote: &PeerIdentity,
    key: [u8; 32],
) {
    let max = shared.config.max_frame_len + FRAME_OVERHEAD;
    let mut cipher = match FrameCipher::new(&key) {
        Ok(c) => c,
        Err(_) => return,
    };
    loop {
        let mut len_buf = [0u8; LEN_SIZE];
        if reader.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let len = u32::from_le_bytes(len_buf);
        if len > max {
            warn!(peer = %remote, len, "oversized link frame");
            break;
        }
        let mut sealed = vec![0u8; len as usize];
        if reader.read_exact(&mut sealed).await.is_err() {
            break;
        }
        let plain = match cipher.open(&sealed) {
            Ok(p) => p,
            Err(e) => {
                warn!(peer = %remote, error = %e, "link frame rejected");
                break;
            }
        };
        match wire::decode_message(&plain, max) {
            Ok(LanMessage::Data { payload }) => {
                let _ = shared.events.send(TransportEvent::DataReceived {
                    payload,
                    from: remote.clone(),
                });
            }
            Ok(_) => debug!(peer = %remote, "non-data message on link ignored"),
            Err(e) => warn!(peer = %remote, error = %e, "undecodable link message"),
        }
    }
}

impl SessionTransport for LanTransport {
    fn local_peer(&self) -> &PeerIdentity {
        &self.shared.local
    }

    fn connect(&self, peer: &PeerIdentity) -> Result<(), TransportError> {
        if self.shared.links.lock().unwrap().contains_key(&peer.id()) {
            return Ok(());
        }
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
            if let Err(e) = dial(&shared, addr).await {
                warn!(peer = %peer, error = %e, "outbound link failed");
            }
        });
        Ok(())
    }

    fn disconnect(&self, peer: &PeerIdentity) {
        // Dropping the link sender ends the write loop, which shuts the
        // socket down; the remote side observes EOF.
        let removed = self
            .shared
            .links
            .lock()
            .unwrap()
            .remove(&peer.id())
            .is_some();
        if removed {
            info!(peer = %peer, "link dropped");
            let _ = self.shared.events.send(TransportEvent::PeerStateChanged {
                peer: peer.clone(),
                state: PeerState::NotConnected,
            });
        }
    }

    fn send(
        &self,
        payload: &[u8],
        to: &[PeerIdentity],
        _reliability: Reliability,
    ) -> Result<(), TransportError> {
        let max = self.shared.config.max_frame_len;
        if payload.len() > max as usize {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max: max as usize,
            });
        }
        let frame = wire::encode_message(
            &LanMessage::Data {
                payload: payload.to_vec(),
            },
            max + FRAME_OVERHEAD,
        )
        .map_err(|e| TransportError::Io(e.to_string()))?;

        let links = self.shared.links.lock().unwrap();
        let mut failed = 0usize;
        for target in to {
            match links.get(&target.id()) {
                Some(link) if link.tx.send(frame.clone()).is_ok() => {}
                _ => failed += 1,
            }
        }
        if failed > 0 {
            warn!(failed, attempted = to.len(), "fan-out partially failed");
            Err(TransportError::PartialDelivery {
                failed,
                attempted: to.len(),
            })
        } else {
            Ok(())
        }
    }

    fn advertise_driver(&self) -> Arc<dyn AdvertiseDriver> {
        Arc::new(LanAdvertiseDriver {
            shared: self.shared.clone(),
        })
    }

    fn browse_driver(&self) -> Arc<dyn BrowseDriver> {
        Arc::new(LanBrowseDriver {
            shared: self.shared.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> LanConfig {
        LanConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            discovery_port: 0,
            ..LanConfig::default()
        }
    }

    async fn stream_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), server.unwrap().0)
    }

    async fn transport_with_id(name: &str, id_byte: u8) -> (Arc<LanTransport>, EventReceiver) {
        let local = PeerIdentity::with_id(name, PeerId::from_bytes([id_byte; 16]));
        LanTransport::bind(test_config(), local).await.unwrap()
    }

    fn drain_states(rx: &mut EventReceiver) -> Vec<PeerState> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let TransportEvent::PeerStateChanged { state, .. } = ev {
                out.push(state);
            }
        }
        out
    }

    #[test]
    fn discovery_port_is_shareable_between_nodes() {
        let probe = std::net::UdpSocket::bind(("0.0.0.0", 0)).unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let config = LanConfig {
            discovery_port: port,
            ..test_config()
        };
        let a = make_discovery_socket(&config).unwrap();
        let b = make_discovery_socket(&config).unwrap();
        assert_eq!(a.local_addr().unwrap().port(), port);
        assert_eq!(b.local_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn mutual_dial_lower_end_keeps_its_outbound_link() {
        let (transport, mut events) = transport_with_id("low", 0x00).await;
        let shared = transport.shared.clone();
        let remote = PeerIdentity::with_id("high", PeerId::from_bytes([0xff; 16]));
        let key = [7u8; 32];

        let (ours, _their_a) = stream_pair().await;
        spawn_link(&shared, ours, remote.clone(), key, true);
        let winner = shared.links.lock().unwrap()[&remote.id()].tx.clone();
        assert_eq!(
            drain_states(&mut events),
            vec![PeerState::Connecting, PeerState::Connected]
        );

        // The remote's competing dial lands as an inbound duplicate and loses.
        let (inbound, _their_b) = stream_pair().await;
        spawn_link(&shared, inbound, remote.clone(), key, false);
        {
            let links = shared.links.lock().unwrap();
            assert_eq!(links.len(), 1);
            assert!(links[&remote.id()].tx.same_channel(&winner));
        }
        // No second connect cycle and no teardown.
        assert!(drain_states(&mut events).is_empty());
    }

    #[tokio::test]
    async fn mutual_dial_higher_end_yields_to_the_inbound_link() {
        let (transport, mut events) = transport_with_id("high", 0xff).await;
        let shared = transport.shared.clone();
        let remote = PeerIdentity::with_id("low", PeerId::from_bytes([0x00; 16]));
        let key = [7u8; 32];

        let (ours, their_a) = stream_pair().await;
        spawn_link(&shared, ours, remote.clone(), key, true);
        let loser = shared.links.lock().unwrap()[&remote.id()].tx.clone();
        drain_states(&mut events);

        let (inbound, _their_b) = stream_pair().await;
        spawn_link(&shared, inbound, remote.clone(), key, false);
        {
            let links = shared.links.lock().unwrap();
            assert_eq!(links.len(), 1);
            assert!(!links[&remote.id()].tx.same_channel(&loser));
        }

        // The replaced stream closing must not tear the winner down.
        drop(their_a);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(shared.links.lock().unwrap().contains_key(&remote.id()));
        assert!(drain_states(&mut events).is_empty());
    }
}
