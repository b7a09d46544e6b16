//! HTTP tracker client
//!
//! Announces are plain GETs against the metainfo's announce URL. The
//! info hash is raw bytes and has to be percent-encoded by hand; reqwest
//! only takes UTF-8 query pairs, so the remaining parameters go through
//! `form_urlencoded` and the hash is appended separately.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::bencode::{Decoder, Value};
use crate::error::TorrentError;

/// Timeout for a single announce round-trip
pub const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(30);

/// The event reported with an announce; periodic refreshes carry none
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    Started,
    Completed,
}

impl fmt::Display for AnnounceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnounceEvent::Started => write!(f, "started"),
            AnnounceEvent::Completed => write!(f, "completed"),
        }
    }
}

/// A successfully parsed announce response
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// Seconds the tracker wants us to wait before the next announce
    pub interval: Duration,
    /// Peer endpoints to try
    pub peers: Vec<SocketAddr>,
    /// Number of seeders, when reported
    pub complete: Option<i64>,
    /// Number of leechers, when reported
    pub incomplete: Option<i64>,
}

/// Client for one tracker's announce endpoint
pub struct Tracker {
    announce_url: String,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    port: u16,
    http: reqwest::Client,
}

impl Tracker {
    /// Create a tracker client for the given announce URL
    pub fn new(
        announce_url: impl Into<String>,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        port: u16,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(ANNOUNCE_TIMEOUT)
            .build()
            .map_err(TorrentError::from)?;

        Ok(Self {
            announce_url: announce_url.into(),
            info_hash,
            peer_id,
            port,
            http,
        })
    }

    /// The session peer ID reported to the tracker
    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Issue one announce and parse the response
    pub async fn announce(
        &self,
        event: Option<AnnounceEvent>,
        downloaded: u64,
        uploaded: u64,
        left: u64,
    ) -> Result<AnnounceResponse> {
        let url = self.build_url(event, downloaded, uploaded, left);
        info!("Announcing to tracker: {}", self.announce_url);
        debug!("Announce URL: {}", url);

        let response = self.http.get(&url).send().await.map_err(TorrentError::from)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TorrentError::tracker_error_full(
                "Tracker returned HTTP error",
                self.announce_url.clone(),
                status.to_string(),
            )
            .into());
        }

        let body = response.bytes().await.map_err(TorrentError::from)?;
        let parsed = Self::parse_response(&body)?;
        info!(
            "Tracker returned {} peers (interval {}s)",
            parsed.peers.len(),
            parsed.interval.as_secs()
        );
        Ok(parsed)
    }

    /// Announce, retrying a transport failure exactly once
    ///
    /// An explicit tracker failure is final; only unreachability is
    /// worth a second attempt.
    pub async fn announce_with_retry(
        &self,
        event: Option<AnnounceEvent>,
        downloaded: u64,
        uploaded: u64,
        left: u64,
    ) -> Result<AnnounceResponse> {
        match self.announce(event, downloaded, uploaded, left).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if let Some(TorrentError::TrackerFailure { .. }) = e.downcast_ref::<TorrentError>()
                {
                    return Err(e);
                }
                warn!("Announce failed ({}), retrying once", e);
                self.announce(event, downloaded, uploaded, left).await
            }
        }
    }

    fn build_url(
        &self,
        event: Option<AnnounceEvent>,
        downloaded: u64,
        uploaded: u64,
        left: u64,
    ) -> String {
        let mut params = form_urlencoded::Serializer::new(String::new());
        params
            .append_pair("peer_id", &String::from_utf8_lossy(&self.peer_id))
            .append_pair("port", &self.port.to_string())
            .append_pair("uploaded", &uploaded.to_string())
            .append_pair("downloaded", &downloaded.to_string())
            .append_pair("left", &left.to_string())
            .append_pair("compact", "1");
        if let Some(event) = event {
            params.append_pair("event", &event.to_string());
        }

        // reqwest cannot carry raw bytes in a query pair, encode by hand
        let info_hash = urlencoding::encode_binary(&self.info_hash);
        format!("{}?{}&info_hash={}", self.announce_url, params.finish(), info_hash)
    }

    /// Parse a bencoded announce response body
    fn parse_response(data: &[u8]) -> Result<AnnounceResponse> {
        let root = Decoder::new(data).decode()?;

        if let Some(reason) = root.get(b"failure reason") {
            let reason = reason
                .as_str()
                .unwrap_or("tracker sent a non-UTF-8 failure reason")
                .to_string();
            return Err(TorrentError::tracker_failure(reason).into());
        }

        let interval = root
            .get(b"interval")
            .and_then(|v| v.as_int())
            .ok_or_else(|| TorrentError::tracker_error("Response missing interval"))?;
        if interval < 0 {
            return Err(TorrentError::tracker_error("Response interval is negative").into());
        }

        let peers = match root.get(b"peers") {
            Some(Value::Bytes(compact)) => Self::parse_compact_peers(compact)?,
            Some(Value::List(dicts)) => Self::parse_dict_peers(dicts),
            Some(_) => {
                return Err(TorrentError::tracker_error("Unrecognized peers format").into())
            }
            None => return Err(TorrentError::tracker_error("Response missing peers").into()),
        };

        Ok(AnnounceResponse {
            interval: Duration::from_secs(interval as u64),
            peers,
            complete: root.get(b"complete").and_then(|v| v.as_int()),
            incomplete: root.get(b"incomplete").and_then(|v| v.as_int()),
        })
    }

    /// Compact form: 6 bytes per peer, IPv4 + port, both big-endian
    fn parse_compact_peers(data: &[u8]) -> Result<Vec<SocketAddr>> {
        if data.len() % 6 != 0 {
            return Err(TorrentError::tracker_error(format!(
                "Compact peer list length {} is not a multiple of 6",
                data.len()
            ))
            .into());
        }

        Ok(data
            .chunks_exact(6)
            .map(|chunk| {
                let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                SocketAddr::new(IpAddr::V4(ip), port)
            })
            .collect())
    }

    /// Dictionary form: a list of dicts with `ip` and `port` entries
    fn parse_dict_peers(dicts: &[Value]) -> Vec<SocketAddr> {
        let mut peers = Vec::new();
        for entry in dicts {
            let ip = entry.get(b"ip").and_then(|v| v.as_str());
            let port = entry.get(b"port").and_then(|v| v.as_int());
            match (ip.and_then(|s| s.parse::<IpAddr>().ok()), port) {
                (Some(ip), Some(port)) if (0..=u16::MAX as i64).contains(&port) => {
                    peers.push(SocketAddr::new(ip, port as u16));
                }
                _ => warn!("Skipping malformed peer entry in tracker response"),
            }
        }
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn tracker() -> Tracker {
        Tracker::new("http://t.example/ann", [0xffu8; 20], [b'p'; 20], 6889).unwrap()
    }

    #[test]
    fn test_build_url_parameters() {
        let url = tracker().build_url(Some(AnnounceEvent::Started), 10, 0, 90);
        assert!(url.starts_with("http://t.example/ann?"));
        assert!(url.contains("port=6889"));
        assert!(url.contains("uploaded=0"));
        assert!(url.contains("downloaded=10"));
        assert!(url.contains("left=90"));
        assert!(url.contains("compact=1"));
        assert!(url.contains("event=started"));
        assert!(url.contains(&format!("info_hash={}", "%FF".repeat(20))));
    }

    #[test]
    fn test_build_url_without_event() {
        let url = tracker().build_url(None, 0, 0, 100);
        assert!(!url.contains("event="));
    }

    #[test]
    fn test_parse_compact_response() {
        // 2 peers: 10.0.0.1:6881 and 192.168.1.2:51413
        let mut body = b"d8:completei5e10:incompletei2e8:intervali1800e5:peers12:".to_vec();
        body.extend_from_slice(&[10, 0, 0, 1, 0x1a, 0xe1]);
        body.extend_from_slice(&[192, 168, 1, 2, 0xc8, 0xd5]);
        body.push(b'e');

        let response = Tracker::parse_response(&body).unwrap();
        assert_eq!(response.interval, Duration::from_secs(1800));
        assert_eq!(response.complete, Some(5));
        assert_eq!(response.incomplete, Some(2));
        assert_eq!(
            response.peers,
            vec![
                "10.0.0.1:6881".parse().unwrap(),
                "192.168.1.2:51413".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn test_parse_dict_response() {
        let body =
            b"d8:intervali900e5:peersld2:ip8:10.0.0.94:porti6881eed2:ip3:bad4:porti1eeee";
        let response = Tracker::parse_response(body).unwrap();
        // The malformed entry is skipped, not fatal
        assert_eq!(response.peers, vec!["10.0.0.9:6881".parse().unwrap()]);
    }

    #[test]
    fn test_parse_failure_reason() {
        let body = b"d14:failure reason21:torrent not availablee";
        let err = Tracker::parse_response(body).unwrap_err();
        let err = err.downcast_ref::<TorrentError>().unwrap();
        match err {
            TorrentError::TrackerFailure { reason } => {
                assert_eq!(reason, "torrent not available")
            }
            other => panic!("expected TrackerFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_odd_compact_length() {
        let body = b"d8:intervali900e5:peers5:xxxxxe";
        assert!(Tracker::parse_response(body).is_err());
    }

    #[test]
    fn test_parse_rejects_missing_interval() {
        let body = b"d5:peers0:e";
        assert!(Tracker::parse_response(body).is_err());
    }

    /// End to end against a one-shot local HTTP stub
    #[tokio::test]
    async fn test_announce_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stub = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 2048];
            let n = stream.read(&mut request).await.unwrap();
            let request = String::from_utf8_lossy(&request[..n]).to_string();

            let mut body = b"d8:intervali120e5:peers6:".to_vec();
            body.extend_from_slice(&[127, 0, 0, 1, 0x1a, 0xe1]);
            body.push(b'e');

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.write_all(&body).await.unwrap();
            request
        });

        let tracker = Tracker::new(
            format!("http://{}/announce", addr),
            [0xabu8; 20],
            [b'p'; 20],
            6889,
        )
        .unwrap();

        let response = tracker
            .announce(Some(AnnounceEvent::Started), 0, 0, 1000)
            .await
            .unwrap();
        assert_eq!(response.interval, Duration::from_secs(120));
        assert_eq!(response.peers, vec!["127.0.0.1:6881".parse().unwrap()]);

        let request = stub.await.unwrap();
        assert!(request.starts_with("GET /announce?"));
        assert!(request.contains("event=started"));
        assert!(request.contains("info_hash=%AB"));
    }
}
