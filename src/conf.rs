//! This module defines types used to configure the engine and its parts.

use std::time::Duration;

use crate::PeerId;

/// The default client id this engine announces to trackers and peers.
pub const CLIENT_ID: &PeerId = b"-LC0001-000000000000";

/// The default block request read timeout, per §5 of the design: a stalled
/// peer (or tracker) must not be allowed to block a worker forever.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// The global configuration for the download engine.
#[derive(Clone, Debug)]
pub struct Conf {
    pub engine: EngineConf,
    pub torrent: TorrentConf,
}

impl Conf {
    /// Returns a configuration with reasonable defaults and the default
    /// client id, [`CLIENT_ID`].
    pub fn new() -> Self {
        Self {
            engine: EngineConf {
                client_id: *CLIENT_ID,
            },
            torrent: TorrentConf::new(),
        }
    }
}

impl Default for Conf {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration related to the engine itself.
#[derive(Clone, Debug)]
pub struct EngineConf {
    /// The ID of the client to announce to trackers and other peers.
    pub client_id: PeerId,
}

/// Configuration for a single download.
#[derive(Clone, Debug)]
pub struct TorrentConf {
    /// The minimum number of peers we want the tracker to hand us. Anything
    /// less is a waste of a network round trip.
    pub min_requested_peer_count: usize,

    /// After this many read timeouts/transport errors against a given peer
    /// within a single session, the peer is retired rather than retried.
    pub tracker_error_threshold: usize,

    /// The deadline imposed on every blocking read: a handshake, a bitfield,
    /// an unchoke, a piece block, or a tracker round trip. A read that
    /// doesn't complete within this window is treated exactly like an I/O
    /// error (§5 Timeouts): the piece is requeued and the connection is
    /// closed.
    pub read_timeout: Duration,
}

impl TorrentConf {
    /// Returns the torrent configuration with reasonable defaults.
    pub fn new() -> Self {
        Self {
            // We always request at least 10 peers as anything less is a waste
            // of network round trip and it allows us to buffer up a bit more
            // than needed.
            min_requested_peer_count: 10,
            tracker_error_threshold: 15,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl Default for TorrentConf {
    fn default() -> Self {
        Self::new()
    }
}
