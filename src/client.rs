//! Torrent client orchestrator
//!
//! Owns the session: the peer queue fed by tracker announces, a bounded
//! pool of peer workers, the periodic announce scheduler and the
//! shutdown broadcast. `start` returns once the torrent is fully
//! downloaded, a fatal error occurs, or `stop` is called.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::peer::PeerConnection;
use crate::protocol::Handshake;
use crate::storage::PieceManager;
use crate::torrent::Metainfo;
use crate::tracker::{AnnounceEvent, Tracker};

/// Number of peer workers in the pool
pub const MAX_PEER_CONNECTIONS: usize = 40;

/// Endpoints held in the queue at most; refills drop the overflow
const QUEUE_CAPACITY: usize = 256;

/// Fallback when the tracker does not name a usable interval
const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Session options
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Directory the output file is created in
    pub output_dir: PathBuf,
    /// Port reported to the tracker
    pub port: u16,
    /// Size of the peer worker pool
    pub max_peers: usize,
    /// Cadence of the completion/announce check loop
    pub poll_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./downloads"),
            port: 6889,
            max_peers: MAX_PEER_CONNECTIONS,
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// A bounded many-consumer queue of peer endpoints
///
/// The tracker task is the sole producer; each announce replaces the
/// stale endpoints wholesale. Duplicates are allowed, workers that dial
/// a dead endpoint just come back for the next one.
pub struct PeerQueue {
    inner: Mutex<VecDeque<SocketAddr>>,
    notify: Notify,
    capacity: usize,
}

impl PeerQueue {
    /// Create a queue holding at most `capacity` endpoints
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Take the next endpoint, waiting until one is available
    pub async fn pop(&self) -> SocketAddr {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register for a wakeup before checking, so a refill between
            // the check and the await cannot be missed
            notified.as_mut().enable();

            if let Some(addr) = self.inner.lock().await.pop_front() {
                return addr;
            }
            notified.await;
        }
    }

    /// Replace the queue contents with a fresh peer list
    pub async fn refill(&self, peers: Vec<SocketAddr>) {
        let mut queue = self.inner.lock().await;
        queue.clear();
        queue.extend(peers.into_iter().take(self.capacity));
        debug!("Peer queue refilled with {} endpoints", queue.len());
        drop(queue);
        self.notify.notify_waiters();
    }

    /// Endpoints currently queued
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Cloneable handle that aborts the session
#[derive(Clone)]
pub struct StopHandle {
    shutdown: watch::Sender<bool>,
}

impl StopHandle {
    /// Request shutdown; every task unwinds at its next suspension point
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

/// The local peer: downloads one torrent, then exits
pub struct TorrentClient {
    metainfo: Arc<Metainfo>,
    manager: Arc<Mutex<PieceManager>>,
    tracker: Tracker,
    queue: Arc<PeerQueue>,
    shutdown_tx: watch::Sender<bool>,
    peer_id: [u8; 20],
    options: ClientOptions,
}

impl TorrentClient {
    /// Build a session for the given torrent
    pub fn new(metainfo: Metainfo, options: ClientOptions) -> Result<Self> {
        let peer_id = Handshake::generate_peer_id();
        let manager = PieceManager::new(&metainfo, &options.output_dir)?;
        let tracker = Tracker::new(
            metainfo.announce.clone(),
            metainfo.info_hash,
            peer_id,
            options.port,
        )?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            metainfo: Arc::new(metainfo),
            manager: Arc::new(Mutex::new(manager)),
            tracker,
            queue: Arc::new(PeerQueue::new(QUEUE_CAPACITY)),
            shutdown_tx,
            peer_id,
            options,
        })
    }

    /// Handle for stopping the session from elsewhere (e.g. a signal task)
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shutdown: self.shutdown_tx.clone(),
        }
    }

    /// Request shutdown
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Download the torrent; returns when it is complete, aborted or
    /// fatally failed
    pub async fn start(&mut self) -> Result<()> {
        info!(
            "Starting download of '{}' ({} bytes, {} pieces)",
            self.metainfo.name,
            self.metainfo.length,
            self.metainfo.piece_count()
        );

        // The first announce is load-bearing: without it there are no
        // peers at all, so a double failure is fatal.
        let first = self
            .tracker
            .announce_with_retry(Some(AnnounceEvent::Started), 0, 0, self.metainfo.length)
            .await?;
        let interval = effective_interval(first.interval);
        if let (Some(seeders), Some(leechers)) = (first.complete, first.incomplete) {
            debug!("Swarm has {} seeders, {} leechers", seeders, leechers);
        }
        self.queue.refill(first.peers).await;

        let mut workers = Vec::with_capacity(self.options.max_peers);
        for worker_id in 0..self.options.max_peers {
            workers.push(tokio::spawn(peer_worker(
                worker_id,
                Arc::clone(&self.queue),
                self.metainfo.info_hash,
                self.peer_id,
                Arc::clone(&self.manager),
                self.shutdown_tx.subscribe(),
            )));
        }

        let result = self.supervise(interval).await;

        // Broadcast shutdown and drain every worker before returning
        self.shutdown_tx.send_replace(true);
        for worker in workers {
            let _ = worker.await;
        }
        result
    }

    /// The scheduler loop: poll for completion, re-announce on interval
    async fn supervise(&mut self, mut interval: Duration) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut last_announce = Instant::now();

        loop {
            if *shutdown_rx.borrow() {
                info!("Stop requested, aborting download");
                return Ok(());
            }

            {
                let mut manager = self.manager.lock().await;
                if let Some(fatal) = manager.take_fatal() {
                    error!("Aborting session: {}", fatal);
                    return Err(fatal.into());
                }
                if manager.complete() {
                    manager.finish()?;
                    drop(manager);
                    info!("Torrent fully downloaded");
                    if let Err(e) = self
                        .tracker
                        .announce(Some(AnnounceEvent::Completed), self.metainfo.length, 0, 0)
                        .await
                    {
                        warn!("Completed announce failed: {}", e);
                    }
                    return Ok(());
                }
            }

            if last_announce.elapsed() >= interval {
                let (downloaded, left) = {
                    let manager = self.manager.lock().await;
                    (manager.bytes_downloaded(), manager.bytes_left())
                };
                // Tracker trouble after the first announce is not fatal,
                // the next interval gets another chance
                match self.tracker.announce(None, downloaded, 0, left).await {
                    Ok(response) => {
                        interval = effective_interval(response.interval);
                        self.queue.refill(response.peers).await;
                    }
                    Err(e) => warn!("Periodic announce failed: {}", e),
                }
                last_announce = Instant::now();
            }

            tokio::select! {
                _ = tokio::time::sleep(self.options.poll_interval) => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Stop requested, aborting download");
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn effective_interval(interval: Duration) -> Duration {
    if interval.is_zero() {
        DEFAULT_ANNOUNCE_INTERVAL
    } else {
        interval
    }
}

/// One worker: take an endpoint, run the connection to the end, repeat
async fn peer_worker(
    worker_id: usize,
    queue: Arc<PeerQueue>,
    info_hash: [u8; 20],
    our_id: [u8; 20],
    manager: Arc<Mutex<PieceManager>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Worker {} started", worker_id);
    loop {
        if *shutdown.borrow() {
            break;
        }

        let addr = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            addr = queue.pop() => addr,
        };

        debug!("Worker {} assigned peer {}", worker_id, addr);
        let connection =
            PeerConnection::new(addr, info_hash, our_id, Arc::clone(&manager), shutdown.clone());
        if let Err(e) = connection.run().await {
            // Peer-level errors end at this boundary; the worker moves on
            debug!("Worker {}: peer {} dropped: {}", worker_id, addr, e);
        }
    }
    debug!("Worker {} exited", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Handshake, Message, HANDSHAKE_LEN};
    use crate::storage::BLOCK_SIZE;
    use sha1::{Digest, Sha1};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_queue_pop_waits_for_refill() {
        let queue = Arc::new(PeerQueue::new(8));
        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.refill(vec!["10.0.0.1:6881".parse().unwrap()]).await;

        let addr = timeout(Duration::from_secs(5), popper).await.unwrap().unwrap();
        assert_eq!(addr, "10.0.0.1:6881".parse().unwrap());
    }

    #[tokio::test]
    async fn test_queue_refill_replaces_and_caps() {
        let queue = PeerQueue::new(2);
        queue.refill(vec!["10.0.0.1:1".parse().unwrap()]).await;
        queue
            .refill(vec![
                "10.0.0.2:2".parse().unwrap(),
                "10.0.0.3:3".parse().unwrap(),
                "10.0.0.4:4".parse().unwrap(),
            ])
            .await;

        // Old entry gone, overflow dropped at capacity
        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.pop().await, "10.0.0.2:2".parse().unwrap());
        assert_eq!(queue.pop().await, "10.0.0.3:3".parse().unwrap());
    }

    /// Serve announce requests forever, always returning `peers`
    async fn stub_tracker(peers: Vec<SocketAddr>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { break };
                let peers = peers.clone();
                tokio::spawn(async move {
                    let mut request = vec![0u8; 2048];
                    let _ = stream.read(&mut request).await;

                    let mut compact = Vec::new();
                    for peer in &peers {
                        if let SocketAddr::V4(v4) = peer {
                            compact.extend_from_slice(&v4.ip().octets());
                            compact.extend_from_slice(&v4.port().to_be_bytes());
                        }
                    }
                    let mut body = b"d8:intervali1800e5:peers".to_vec();
                    body.extend_from_slice(compact.len().to_string().as_bytes());
                    body.push(b':');
                    body.extend_from_slice(&compact);
                    body.push(b'e');

                    let header = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = stream.write_all(header.as_bytes()).await;
                    let _ = stream.write_all(&body).await;
                });
            }
        });
        addr
    }

    /// Serve the whole of a one-piece, one-block, all-zeros torrent
    async fn stub_peer(info_hash: [u8; 20]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else { return };

            let mut handshake = [0u8; HANDSHAKE_LEN];
            stream.read_exact(&mut handshake).await.unwrap();
            stream
                .write_all(&Handshake::new(info_hash, [b's'; 20]).encode())
                .await
                .unwrap();

            let mut interested = [0u8; 5];
            stream.read_exact(&mut interested).await.unwrap();

            stream
                .write_all(&Message::Bitfield { bitfield: vec![0b1000_0000] }.encode())
                .await
                .unwrap();
            stream.write_all(&Message::Unchoke.encode()).await.unwrap();

            let mut request = [0u8; 17];
            stream.read_exact(&mut request).await.unwrap();
            stream
                .write_all(
                    &Message::Piece {
                        index: 0,
                        begin: 0,
                        block: vec![0u8; BLOCK_SIZE as usize],
                    }
                    .encode(),
                )
                .await
                .unwrap();

            // Stay open until the client shuts the session down
            let mut buf = [0u8; 1];
            let _ = stream.read(&mut buf).await;
        });
        addr
    }

    fn zeros_metainfo(announce: String) -> Metainfo {
        let hash: [u8; 20] = {
            let mut hasher = Sha1::new();
            hasher.update(vec![0u8; BLOCK_SIZE as usize]);
            hasher.finalize().into()
        };
        Metainfo {
            announce,
            info_hash: [3u8; 20],
            piece_length: BLOCK_SIZE as u64,
            pieces: vec![hash],
            name: "zeros.bin".to_string(),
            length: BLOCK_SIZE as u64,
        }
    }

    fn test_options(test: &str) -> (ClientOptions, PathBuf) {
        let dir = std::env::temp_dir().join(format!("remora_client_{}", test));
        let _ = std::fs::remove_dir_all(&dir);
        let options = ClientOptions {
            output_dir: dir.clone(),
            max_peers: 2,
            poll_interval: Duration::from_millis(100),
            ..ClientOptions::default()
        };
        (options, dir)
    }

    #[tokio::test]
    async fn test_full_session_downloads_file() {
        let metainfo = zeros_metainfo(String::new());
        let peer_addr = stub_peer(metainfo.info_hash).await;
        let tracker_addr = stub_tracker(vec![peer_addr]).await;

        let metainfo = Metainfo {
            announce: format!("http://{}/announce", tracker_addr),
            ..metainfo
        };
        let (options, dir) = test_options("full_session");

        let mut client = TorrentClient::new(metainfo, options).unwrap();
        timeout(Duration::from_secs(30), client.start())
            .await
            .unwrap()
            .unwrap();

        let written = std::fs::read(dir.join("zeros.bin")).unwrap();
        assert_eq!(written.len(), BLOCK_SIZE as usize);
        assert!(written.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_stop_aborts_session() {
        // Tracker yields no peers, so the session would idle forever
        let tracker_addr = stub_tracker(Vec::new()).await;
        let metainfo = zeros_metainfo(format!("http://{}/announce", tracker_addr));
        let (options, dir) = test_options("stop");

        let mut client = TorrentClient::new(metainfo, options).unwrap();
        let handle = client.stop_handle();

        let session = tokio::spawn(async move { client.start().await });
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.stop();

        timeout(Duration::from_secs(10), session)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        // Nothing was downloaded
        let written = std::fs::read(dir.join("zeros.bin")).unwrap();
        assert!(written.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_start_fails_without_tracker() {
        // Nothing is listening on this port
        let metainfo = zeros_metainfo("http://127.0.0.1:1/announce".to_string());
        let (options, _) = test_options("no_tracker");

        let mut client = TorrentClient::new(metainfo, options).unwrap();
        let err = timeout(Duration::from_secs(30), client.start())
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("Tracker"));
    }
}
