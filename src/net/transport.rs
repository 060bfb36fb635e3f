// Copyright (C) 2023-2024 StorSwift Inc.
// This file is part of the Drand-RS library.

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
// http://www.apache.org/licenses/LICENSE-2.0

// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::peer::InvalidMultiaddr;
use super::peer::Multiaddr;
use super::peer::PeerId;
use super::utils::NewTcpListener;
use super::utils::NodeListener;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::info;
use tracing::warn;
use tracing::Span;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound for a handshake line: peer id is a 64-char hex string.
const MAX_HANDSHAKE_LEN: usize = 256;
const MAX_INBOUND: usize = 1024;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error(transparent)]
    InvalidAddress(#[from] InvalidMultiaddr),
    #[error("connection string announces {announced}, expected {expected}")]
    UnexpectedPeer { expected: PeerId, announced: PeerId },
    #[error("remote identified itself as {received}, expected {expected}")]
    HandshakeMismatch { expected: PeerId, received: PeerId },
    #[error("handshake timed out")]
    Timeout,
    #[error("io: {0}")]
    Io(String),
    #[error("transport is stopped")]
    Stopped,
}

/// Peer-to-peer connectivity used to confirm committee members are reachable.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn dial(&self, peer: &PeerId, p2p_connection: &str) -> Result<(), TransportError>;
    fn self_peer_id(&self) -> PeerId;
}

/// Connections dialed by this node, keyed by the verified remote id.
type Outbound = Arc<Mutex<BTreeMap<PeerId, TcpStream>>>;
/// Accepted connections. The remote id is only claimed, never trusted for dialing.
type Inbound = Arc<Mutex<BTreeMap<SocketAddr, (PeerId, TcpStream)>>>;

/// TCP transport with a line-based identity handshake.
pub struct TcpTransport {
    self_id: PeerId,
    listen_port: u16,
    outbound: Outbound,
    inbound: Inbound,
    token: CancellationToken,
    tracker: TaskTracker,
    span: Span,
}

impl TcpTransport {
    /// Binds the p2p port and starts accepting inbound peers.
    pub async fn start(self_id: PeerId, port: u16, span: Span) -> Result<Self, TransportError> {
        let listener = NodeListener::bind(port)
            .await
            .map_err(|e| TransportError::Io(format!("bind p2p port {port}: {e}")))?;
        Self::with_listener(self_id, listener, span)
    }

    pub fn with_listener(
        self_id: PeerId,
        listener: TcpListener,
        span: Span,
    ) -> Result<Self, TransportError> {
        let listen_port = listener
            .local_addr()
            .map_err(|e| TransportError::Io(e.to_string()))?
            .port();

        let transport = Self {
            self_id,
            listen_port,
            outbound: Arc::default(),
            inbound: Arc::default(),
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            span,
        };
        transport.spawn_acceptor(listener);
        info!(parent: &transport.span, "p2p transport listening on port {listen_port}, peer id {}", transport.self_id);

        Ok(transport)
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// Peers this node has dialed.
    pub async fn connected_peers(&self) -> Vec<PeerId> {
        self.outbound.lock().await.keys().cloned().collect()
    }

    /// Ids claimed by peers that dialed this node.
    pub async fn inbound_peers(&self) -> Vec<PeerId> {
        let mut inbound = self.inbound.lock().await;
        inbound.retain(|_, (_, stream)| is_alive(stream));
        inbound.values().map(|(peer, _)| peer.clone()).collect()
    }

    /// Stops the acceptor and drops all pooled connections.
    pub async fn stop(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.outbound.lock().await.clear();
        self.inbound.lock().await.clear();
        debug!(parent: &self.span, "p2p transport stopped");
    }

    fn spawn_acceptor(&self, listener: TcpListener) {
        let token = self.token.clone();
        let inbound = Arc::clone(&self.inbound);
        let self_id = self.self_id.clone();
        let span = self.span.clone();
        let tracker = self.tracker.clone();

        self.tracker.spawn(async move {
            loop {
                let (stream, remote) = tokio::select! {
                    () = token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(parent: &span, "p2p accept: {e}");
                            continue;
                        }
                    },
                };

                let inbound = Arc::clone(&inbound);
                let self_id = self_id.clone();
                let span = span.clone();
                tracker.spawn(async move {
                    match accept_handshake(stream, &self_id).await {
                        Ok((peer, stream)) => {
                            let mut inbound = inbound.lock().await;
                            inbound.retain(|_, (_, stream)| is_alive(stream));
                            if inbound.len() >= MAX_INBOUND {
                                warn!(parent: &span, "inbound limit reached, dropping {peer} from {remote}");
                            } else {
                                debug!(parent: &span, "inbound peer {peer} from {remote}");
                                inbound.insert(remote, (peer, stream));
                            }
                        }
                        Err(e) => debug!(parent: &span, "inbound handshake from {remote}: {e}"),
                    }
                });
            }
        });
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn dial(&self, peer: &PeerId, p2p_connection: &str) -> Result<(), TransportError> {
        if self.token.is_cancelled() {
            return Err(TransportError::Stopped);
        }
        if *peer == self.self_id {
            return Ok(());
        }
        {
            let mut outbound = self.outbound.lock().await;
            match outbound.get(peer).map(is_alive) {
                Some(true) => return Ok(()),
                Some(false) => {
                    debug!(parent: &self.span, "connection to {peer} is closed, redialing");
                    outbound.remove(peer);
                }
                None => {}
            }
        }

        let addr = Multiaddr::parse(p2p_connection)?;
        if addr.peer_id != *peer {
            return Err(TransportError::UnexpectedPeer {
                expected: peer.clone(),
                announced: addr.peer_id,
            });
        }

        let stream = tokio::time::timeout(HANDSHAKE_TIMEOUT, TcpStream::connect(addr.socket_addr()))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Io(format!("{}: {e}", addr.socket_addr())))?;
        let (received, stream) = dial_handshake(stream, &self.self_id).await?;
        if received != *peer {
            return Err(TransportError::HandshakeMismatch {
                expected: peer.clone(),
                received,
            });
        }

        debug!(parent: &self.span, "connected to peer {peer} at {}", addr.socket_addr());
        self.outbound.lock().await.insert(peer.clone(), stream);
        Ok(())
    }

    fn self_peer_id(&self) -> PeerId {
        self.self_id.clone()
    }
}

/// Pooled stream is usable until the remote closes it. Nothing is expected
/// after the handshake, so any received byte is discarded.
fn is_alive(stream: &TcpStream) -> bool {
    let mut buf = [0u8; 1];
    match stream.try_read(&mut buf) {
        Ok(0) => false,
        Ok(_) => true,
        Err(e) => e.kind() == ErrorKind::WouldBlock,
    }
}

/// Dialer announces itself first, then reads the remote identity.
async fn dial_handshake(
    mut stream: TcpStream,
    self_id: &PeerId,
) -> Result<(PeerId, TcpStream), TransportError> {
    write_id(&mut stream, self_id).await?;
    let remote = read_id(&mut stream).await?;
    Ok((remote, stream))
}

async fn accept_handshake(
    mut stream: TcpStream,
    self_id: &PeerId,
) -> Result<(PeerId, TcpStream), TransportError> {
    let remote = read_id(&mut stream).await?;
    write_id(&mut stream, self_id).await?;
    Ok((remote, stream))
}

async fn write_id(stream: &mut TcpStream, id: &PeerId) -> Result<(), TransportError> {
    let line = format!("{id}\n");
    stream
        .write_all(line.as_bytes())
        .await
        .map_err(|e| TransportError::Io(e.to_string()))
}

async fn read_id(stream: &mut TcpStream) -> Result<PeerId, TransportError> {
    let mut reader = BufReader::new(stream).take(MAX_HANDSHAKE_LEN as u64);
    let mut line = String::new();

    let read = tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::Io(e.to_string()))?;
    let id = line.trim_end();
    if read == 0 || id.is_empty() || !line.ends_with('\n') {
        return Err(TransportError::Io("malformed handshake".into()));
    }

    Ok(PeerId::from(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn transport(id: &str) -> TcpTransport {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        TcpTransport::with_listener(PeerId::from(id), listener, Span::none()).unwrap()
    }

    #[tokio::test]
    async fn dial_and_handshake() {
        let a = transport("aaaa").await;
        let b = transport("bbbb").await;
        let b_conn = format!("/ip4/127.0.0.1/tcp/{}/p2p/bbbb", b.listen_port());

        a.dial(&PeerId::from("bbbb"), &b_conn).await.unwrap();
        assert_eq!(a.connected_peers().await, vec![PeerId::from("bbbb")]);
        // Pooled connection is reused.
        a.dial(&PeerId::from("bbbb"), &b_conn).await.unwrap();

        // Inbound side registers the dialer once handshake completes.
        for _ in 0..50 {
            if !b.inbound_peers().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(b.inbound_peers().await, vec![PeerId::from("aaaa")]);
        assert!(b.connected_peers().await.is_empty());

        a.stop().await;
        b.stop().await;
        assert!(a.connected_peers().await.is_empty());
        assert_eq!(
            a.dial(&PeerId::from("bbbb"), &b_conn).await,
            Err(TransportError::Stopped)
        );
    }

    #[tokio::test]
    async fn reject_wrong_identity() {
        let a = transport("aaaa").await;
        let b = transport("bbbb").await;

        // Connection string points at b but claims another id.
        let spoofed = format!("/ip4/127.0.0.1/tcp/{}/p2p/cccc", b.listen_port());
        assert!(matches!(
            a.dial(&PeerId::from("cccc"), &spoofed).await,
            Err(TransportError::HandshakeMismatch { .. })
        ));
        assert!(matches!(
            a.dial(&PeerId::from("dddd"), &spoofed).await,
            Err(TransportError::UnexpectedPeer { .. })
        ));
        assert!(matches!(
            a.dial(&PeerId::from("cccc"), "not-a-multiaddr").await,
            Err(TransportError::InvalidAddress(_))
        ));

        // Dialing self never touches the network.
        a.dial(&PeerId::from("aaaa"), "").await.unwrap();
    }

    #[tokio::test]
    async fn inbound_claim_does_not_satisfy_dial() {
        let a = transport("aaaa").await;

        // Anyone reaching the p2p port may claim to be "bbbb".
        let mut impostor = TcpStream::connect(("127.0.0.1", a.listen_port()))
            .await
            .unwrap();
        impostor.write_all(b"bbbb\n").await.unwrap();
        assert_eq!(read_id(&mut impostor).await.unwrap(), PeerId::from("aaaa"));
        for _ in 0..50 {
            if !a.inbound_peers().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(a.inbound_peers().await, vec![PeerId::from("bbbb")]);

        // Nothing listens on port 1: "bbbb" is not reachable.
        let unreachable = "/ip4/127.0.0.1/tcp/1/p2p/bbbb";
        assert!(a.dial(&PeerId::from("bbbb"), unreachable).await.is_err());
        assert!(a.connected_peers().await.is_empty());

        drop(impostor);
        assert!(a.dial(&PeerId::from("bbbb"), unreachable).await.is_err());
        a.stop().await;
    }

    #[tokio::test]
    async fn closed_connection_is_evicted() {
        let a = transport("aaaa").await;
        let b = transport("bbbb").await;
        let b_conn = format!("/ip4/127.0.0.1/tcp/{}/p2p/bbbb", b.listen_port());

        a.dial(&PeerId::from("bbbb"), &b_conn).await.unwrap();
        for _ in 0..50 {
            if !b.inbound_peers().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Closes the listener and every accepted stream.
        b.stop().await;

        let mut evicted = false;
        for _ in 0..50 {
            if a.dial(&PeerId::from("bbbb"), &b_conn).await.is_err() {
                evicted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(evicted, "closed peer is still reported as connected");
        assert!(a.connected_peers().await.is_empty());
        a.stop().await;
    }
}
