//! Peer connection
//!
//! Drives one remote peer from TCP connect through handshake into the
//! message loop, feeding received blocks to the piece manager and pulling
//! block requests from it. Strictly leeching: this client sends only the
//! handshake, `interested` and `request` messages.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, trace};

use crate::error::TorrentError;
use crate::peer::state::{Bitfield, PeerSession};
use crate::protocol::{Handshake, Message, StreamParser, HANDSHAKE_LEN};
use crate::storage::{PeerId, PieceManager};

/// Bound on connect plus handshake exchange
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Socket read chunk size
const READ_CHUNK: usize = 10 * 1024;

/// A connection to a single remote peer
pub struct PeerConnection {
    addr: SocketAddr,
    info_hash: [u8; 20],
    our_id: [u8; 20],
    manager: Arc<Mutex<PieceManager>>,
    shutdown: watch::Receiver<bool>,
    session: PeerSession,
}

impl PeerConnection {
    /// Create a connection for the given endpoint
    pub fn new(
        addr: SocketAddr,
        info_hash: [u8; 20],
        our_id: [u8; 20],
        manager: Arc<Mutex<PieceManager>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            addr,
            info_hash,
            our_id,
            manager,
            shutdown,
            session: PeerSession::new(),
        }
    }

    /// Run the connection until the remote closes, an error occurs or
    /// shutdown is signalled
    ///
    /// Whatever the exit path, the peer is deregistered from the piece
    /// manager, which returns its pending blocks to the pool.
    pub async fn run(mut self) -> Result<()> {
        debug!("Connecting to peer {}", self.addr);
        let result = self.drive().await;

        if let Some(remote_id) = self.session.remote_id {
            self.manager.lock().await.remove_peer(&remote_id);
        }
        result
    }

    async fn drive(&mut self) -> Result<()> {
        let (mut stream, remote_id) = timeout(HANDSHAKE_TIMEOUT, self.establish())
            .await
            .map_err(|_| {
                TorrentError::peer_error_with_peer("Handshake timed out", self.addr.to_string())
            })??;
        self.session.remote_id = Some(remote_id);
        info!(
            "Handshake complete with peer {} ({})",
            self.addr,
            String::from_utf8_lossy(&remote_id)
        );

        // Register before any messages so `have`-only peers count too
        {
            let mut manager = self.manager.lock().await;
            let piece_count = manager.piece_count();
            manager.add_peer(remote_id, Bitfield::new(piece_count));
        }

        stream
            .write_all(&Message::Interested.encode())
            .await
            .map_err(|e| {
                TorrentError::peer_error_full(
                    "Failed to send Interested",
                    self.addr.to_string(),
                    e.to_string(),
                )
            })?;
        self.session.am_interested = true;
        debug!("Sent Interested to {}", self.addr);

        let mut parser = StreamParser::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                debug!("Shutdown observed, closing peer {}", self.addr);
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Shutdown observed, closing peer {}", self.addr);
                        break;
                    }
                }
                read = stream.read(&mut chunk) => {
                    let n = read.map_err(|e| {
                        TorrentError::peer_error_full(
                            "Read failed",
                            self.addr.to_string(),
                            e.to_string(),
                        )
                    })?;
                    if n == 0 {
                        debug!("Peer {} closed the connection", self.addr);
                        break;
                    }

                    parser.push(&chunk[..n]);
                    while let Some(message) = parser.next_message()? {
                        self.on_message(&remote_id, message).await?;
                    }
                    self.pump(&remote_id, &mut stream).await?;
                }
            }
        }
        Ok(())
    }

    /// Open the socket and exchange handshakes
    async fn establish(&self) -> Result<(TcpStream, PeerId)> {
        let mut stream = TcpStream::connect(self.addr).await.map_err(|e| {
            TorrentError::peer_error_full(
                "Failed to connect",
                self.addr.to_string(),
                e.to_string(),
            )
        })?;

        let ours = Handshake::new(self.info_hash, self.our_id);
        stream.write_all(&ours.encode()).await.map_err(|e| {
            TorrentError::peer_error_full(
                "Failed to send handshake",
                self.addr.to_string(),
                e.to_string(),
            )
        })?;

        let mut buf = [0u8; HANDSHAKE_LEN];
        stream.read_exact(&mut buf).await.map_err(|e| {
            TorrentError::peer_error_full(
                "Failed to read handshake",
                self.addr.to_string(),
                e.to_string(),
            )
        })?;

        let theirs = Handshake::decode(&buf)?;
        if !theirs.validate(&self.info_hash) {
            return Err(TorrentError::protocol_error_with_source(
                "Handshake info hash mismatch",
                self.addr.to_string(),
            )
            .into());
        }

        Ok((stream, theirs.peer_id))
    }

    /// Apply one incoming message to the session and the piece manager
    async fn on_message(&mut self, remote_id: &PeerId, message: Message) -> Result<()> {
        match message {
            Message::Bitfield { bitfield } => {
                let mut manager = self.manager.lock().await;
                let claimed = Bitfield::from_bytes(bitfield, manager.piece_count())?;
                debug!("Peer {} claims {} pieces", self.addr, claimed.count());
                manager.add_peer(*remote_id, claimed);
            }
            Message::Have { piece_index } => {
                trace!("Peer {} has piece {}", self.addr, piece_index);
                self.manager.lock().await.update_peer(remote_id, piece_index);
            }
            Message::Choke => {
                debug!("Choked by {}", self.addr);
                self.session.peer_choking = true;
                // The ledger will time the dropped request out and recycle it
                self.session.in_flight = None;
            }
            Message::Unchoke => {
                debug!("Unchoked by {}", self.addr);
                self.session.peer_choking = false;
            }
            Message::Piece { index, begin, block } => {
                self.session.in_flight = None;
                self.manager
                    .lock()
                    .await
                    .block_received(remote_id, index, begin, block)?;
            }
            Message::KeepAlive => {
                trace!("Keep-alive from {}", self.addr);
            }
            Message::Interested => {
                self.session.peer_interested = true;
                debug!("Peer {} is interested; ignoring, we do not upload", self.addr);
            }
            Message::NotInterested => {
                self.session.peer_interested = false;
            }
            Message::Request { index, begin, .. } => {
                debug!(
                    "Ignoring Request {}+{} from {}, we do not upload",
                    index, begin, self.addr
                );
            }
            Message::Cancel { .. } => {
                debug!("Ignoring Cancel from {}, we do not upload", self.addr);
            }
            Message::Port { listen_port } => {
                trace!("Ignoring Port {} from {}", listen_port, self.addr);
            }
            Message::Unknown { id } => {
                debug!("Skipping unknown message id {} from {}", id, self.addr);
            }
        }
        Ok(())
    }

    /// Issue the next block request when the session allows one
    async fn pump(&mut self, remote_id: &PeerId, stream: &mut TcpStream) -> Result<()> {
        if !self.session.can_request() {
            return Ok(());
        }

        let request = self.manager.lock().await.next_request(remote_id);
        if let Some(request) = request {
            let message = Message::Request {
                index: request.piece_index,
                begin: request.offset,
                length: request.length,
            };
            stream.write_all(&message.encode()).await.map_err(|e| {
                TorrentError::peer_error_full(
                    "Failed to send request",
                    self.addr.to_string(),
                    e.to_string(),
                )
            })?;
            self.session.in_flight = Some((request.piece_index, request.offset));
            debug!(
                "Requested block {}+{} ({} bytes) from {}",
                request.piece_index, request.offset, request.length, self.addr
            );
        } else {
            trace!("No eligible block for peer {}", self.addr);
        }
        Ok(())
    }
}
