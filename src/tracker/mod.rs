//! The tracker client: a single entry point, [`get_peers`], that dispatches
//! to the HTTP or UDP variant depending on the announce URL's scheme.

mod http;
mod udp;

use std::net::SocketAddrV4;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::metainfo::Metainfo;
use crate::{conf::Conf, PeerId};

/// The result of a tracker round trip: the peers it returned, and the
/// interval the tracker would like between re-announces (unused by this
/// engine, which only ever announces once, but kept since it's part of the
/// tracker's actual response).
#[derive(Debug, Clone)]
pub struct TrackerResponse {
    pub interval: Duration,
    pub peers: Vec<SocketAddrV4>,
}

/// Announces to the torrent's tracker and returns the peers it hands back.
///
/// Dispatches on `metainfo.announce`'s URL scheme: `http`/`https` goes
/// through [`http::announce`], `udp` through [`udp::announce`]. Any other
/// scheme is rejected outright, since this engine doesn't speak anything
/// else (no multi-tracker / tracker-list extensions either).
pub async fn get_peers(
    metainfo: &Metainfo,
    peer_id: PeerId,
    conf: &Conf,
) -> Result<TrackerResponse> {
    let url = Url::parse(&metainfo.announce)
        .map_err(|_| Error::UnsupportedAnnounceScheme(metainfo.announce.clone()))?;

    let response = match url.scheme() {
        "http" | "https" => http::announce(&url, metainfo, peer_id, conf).await?,
        "udp" => udp::announce(&url, metainfo, peer_id, conf).await?,
        other => return Err(Error::UnsupportedAnnounceScheme(other.to_string())),
    };

    if response.peers.is_empty() {
        return Err(Error::NoPeers);
    }

    Ok(response)
}

/// Parses a BEP 23 compact peer list: a byte string that is a concatenation
/// of 6-byte records, each 4 bytes of IPv4 address followed by a 2-byte
/// big-endian port.
fn parse_compact_peers(bytes: &[u8]) -> Vec<SocketAddrV4> {
    bytes
        .chunks_exact(6)
        .map(|chunk| {
            let ip = std::net::Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddrV4::new(ip, port)
        })
        .collect()
}
