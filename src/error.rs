//! Error types for the torrent client
//!
//! This module defines the error type shared by all components of the
//! client, from metainfo parsing through tracker announces and peer I/O.

use std::fmt;

/// Error type for torrent operations
#[derive(Debug, Clone)]
pub enum TorrentError {
    /// Malformed bencoded data
    BencodeError {
        message: String,
        position: Option<usize>,
    },

    /// Structurally valid bencoding that is not a usable metainfo
    MetainfoError {
        message: String,
        field: Option<String>,
    },

    /// A torrent this client does not handle (e.g. multi-file)
    UnsupportedTorrent {
        reason: String,
    },

    /// The tracker answered with an explicit failure reason
    TrackerFailure {
        reason: String,
    },

    /// Tracker transport or response errors
    TrackerError {
        message: String,
        url: Option<String>,
        source: Option<String>,
    },

    /// BitTorrent wire protocol errors
    ProtocolError {
        message: String,
        source: Option<String>,
    },

    /// Peer connection errors
    PeerError {
        message: String,
        peer: Option<String>,
        source: Option<String>,
    },

    /// File I/O and storage errors
    StorageError {
        message: String,
        path: Option<String>,
        source: Option<String>,
    },
}

impl TorrentError {
    /// Create a new BencodeError
    pub fn bencode_error(message: impl Into<String>) -> Self {
        TorrentError::BencodeError {
            message: message.into(),
            position: None,
        }
    }

    /// Create a new BencodeError with the byte offset it occurred at
    pub fn bencode_error_at(message: impl Into<String>, position: usize) -> Self {
        TorrentError::BencodeError {
            message: message.into(),
            position: Some(position),
        }
    }

    /// Create a new MetainfoError
    pub fn metainfo_error(message: impl Into<String>) -> Self {
        TorrentError::MetainfoError {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new MetainfoError naming the offending field
    pub fn metainfo_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        TorrentError::MetainfoError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new UnsupportedTorrent error
    pub fn unsupported_torrent(reason: impl Into<String>) -> Self {
        TorrentError::UnsupportedTorrent {
            reason: reason.into(),
        }
    }

    /// Create a new TrackerFailure carrying the tracker's reason string
    pub fn tracker_failure(reason: impl Into<String>) -> Self {
        TorrentError::TrackerFailure {
            reason: reason.into(),
        }
    }

    /// Create a new TrackerError
    pub fn tracker_error(message: impl Into<String>) -> Self {
        TorrentError::TrackerError {
            message: message.into(),
            url: None,
            source: None,
        }
    }

    /// Create a new TrackerError with announce URL and source
    pub fn tracker_error_full(
        message: impl Into<String>,
        url: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        TorrentError::TrackerError {
            message: message.into(),
            url: Some(url.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new ProtocolError
    pub fn protocol_error(message: impl Into<String>) -> Self {
        TorrentError::ProtocolError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new ProtocolError with source
    pub fn protocol_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::ProtocolError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new PeerError
    pub fn peer_error(message: impl Into<String>) -> Self {
        TorrentError::PeerError {
            message: message.into(),
            peer: None,
            source: None,
        }
    }

    /// Create a new PeerError with peer address
    pub fn peer_error_with_peer(message: impl Into<String>, peer: impl Into<String>) -> Self {
        TorrentError::PeerError {
            message: message.into(),
            peer: Some(peer.into()),
            source: None,
        }
    }

    /// Create a new PeerError with peer and source
    pub fn peer_error_full(
        message: impl Into<String>,
        peer: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        TorrentError::PeerError {
            message: message.into(),
            peer: Some(peer.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new StorageError
    pub fn storage_error(message: impl Into<String>) -> Self {
        TorrentError::StorageError {
            message: message.into(),
            path: None,
            source: None,
        }
    }

    /// Create a new StorageError with path
    pub fn storage_error_with_path(message: impl Into<String>, path: impl Into<String>) -> Self {
        TorrentError::StorageError {
            message: message.into(),
            path: Some(path.into()),
            source: None,
        }
    }

    /// Create a new StorageError with path and source
    pub fn storage_error_full(
        message: impl Into<String>,
        path: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        TorrentError::StorageError {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

}

impl fmt::Display for TorrentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TorrentError::BencodeError { message, position } => {
                if let Some(pos) = position {
                    write!(f, "Bencode error: {} (at byte {})", message, pos)
                } else {
                    write!(f, "Bencode error: {}", message)
                }
            }
            TorrentError::MetainfoError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Metainfo error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Metainfo error: {}", message)
                }
            }
            TorrentError::UnsupportedTorrent { reason } => {
                write!(f, "Unsupported torrent: {}", reason)
            }
            TorrentError::TrackerFailure { reason } => {
                write!(f, "Tracker failure: {}", reason)
            }
            TorrentError::TrackerError { message, url, source } => match (url, source) {
                (Some(u), Some(s)) => {
                    write!(f, "Tracker error: {} (url: {}, source: {})", message, u, s)
                }
                (Some(u), None) => write!(f, "Tracker error: {} (url: {})", message, u),
                (None, Some(s)) => write!(f, "Tracker error: {} (source: {})", message, s),
                (None, None) => write!(f, "Tracker error: {}", message),
            },
            TorrentError::ProtocolError { message, source } => {
                if let Some(src) = source {
                    write!(f, "Protocol error: {} (source: {})", message, src)
                } else {
                    write!(f, "Protocol error: {}", message)
                }
            }
            TorrentError::PeerError { message, peer, source } => match (peer, source) {
                (Some(p), Some(s)) => {
                    write!(f, "Peer error: {} (peer: {}, source: {})", message, p, s)
                }
                (Some(p), None) => write!(f, "Peer error: {} (peer: {})", message, p),
                (None, Some(s)) => write!(f, "Peer error: {} (source: {})", message, s),
                (None, None) => write!(f, "Peer error: {}", message),
            },
            TorrentError::StorageError { message, path, source } => match (path, source) {
                (Some(p), Some(s)) => {
                    write!(f, "Storage error: {} (path: {}, source: {})", message, p, s)
                }
                (Some(p), None) => write!(f, "Storage error: {} (path: {})", message, p),
                (None, Some(s)) => write!(f, "Storage error: {} (source: {})", message, s),
                (None, None) => write!(f, "Storage error: {}", message),
            },
        }
    }
}

impl std::error::Error for TorrentError {}

// Implement From traits for common error types

impl From<std::io::Error> for TorrentError {
    fn from(err: std::io::Error) -> Self {
        TorrentError::storage_error_full(err.to_string(), "unknown".to_string(), err.kind().to_string())
    }
}

impl From<reqwest::Error> for TorrentError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        TorrentError::tracker_error_full("HTTP request failed", url, err.to_string())
    }
}
