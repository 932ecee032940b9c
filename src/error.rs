//! The crate-wide error type and the `Result` alias built on top of it.
//!
//! Workers never propagate these upward past their own dequeue loop (§7):
//! they translate every variant here into a queue action (requeue the piece,
//! maybe retire the peer) and log it. Only the coordinator's own startup
//! steps (the initial tracker round trip) and the writer's I/O errors ever
//! reach [`crate::engine::download`]'s caller.

use std::fmt;

/// The result type used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All the ways a download can fail, grouped the way §7 of the design groups
/// them: decode errors, tracker errors, peer connection errors, peer session
/// errors, piece integrity errors, and writer errors.
#[derive(Debug)]
pub enum Error {
    // -- decode errors (fatal at startup) --
    /// The raw bytes were not valid bencode.
    Bencode(crate::bencode::DecodeError),
    /// The decoded bencode value didn't have the shape a `Metainfo` needs.
    Metainfo(&'static str),
    /// The torrent declares a multi-file `info.files` list. Multi-file
    /// archives are a Non-goal of this engine.
    MultiFileUnsupported,

    // -- tracker errors (fatal at startup) --
    /// The tracker responded with a non-200 HTTP status.
    TrackerHttpStatus(u16),
    /// The tracker (HTTP or UDP) reported a failure reason.
    TrackerFailure(String),
    /// A UDP tracker reply had an unexpected `action` or `transaction_id`.
    TrackerUdpProtocol(&'static str),
    /// A tracker round trip exceeded the configured read timeout.
    TrackerTimeout,
    /// The tracker returned an empty peer list.
    NoPeers,
    /// The announce URL's scheme is neither `http(s)` nor `udp`.
    UnsupportedAnnounceScheme(String),

    // -- peer connection errors (retire peer, requeue piece) --
    /// Connecting to the peer, performing the handshake, or awaiting the
    /// peer's bitfield failed.
    PeerConnection(String),
    /// The peer's handshake advertised a different info-hash than ours.
    PeerInfoHashMismatch,

    // -- peer session errors (close connection, requeue piece) --
    /// The peer sent a message that wasn't valid in the current state, or a
    /// different message id than expected.
    UnexpectedMessage(&'static str),
    /// The peer re-choked us mid piece-download.
    Choke,
    /// A transport-level I/O error.
    Io(std::io::Error),
    /// A read exceeded [`crate::conf::TorrentConf::read_timeout`].
    Timeout,
    /// The requested piece index is not in the peer's advertised bitfield.
    PieceNotAvailable,

    // -- piece integrity errors (requeue piece, don't retire peer) --
    /// The concatenation of a piece's blocks didn't hash to the expected
    /// value.
    PieceHashMismatch,
    /// A piece or block index was out of range for this torrent.
    InvalidPieceIndex,

    // -- writer / fatal errors --
    /// Every peer the tracker gave us has been retired, but pieces remain
    /// outstanding: the download cannot make further progress.
    AllPeersExhausted,
    /// The output path already exists; this engine doesn't support resuming
    /// or overwriting a previous download.
    OutputAlreadyExists,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bencode(e) => write!(f, "invalid bencode: {}", e),
            Self::Metainfo(field) => {
                write!(f, "invalid metainfo: missing or malformed {}", field)
            }
            Self::MultiFileUnsupported => {
                write!(f, "multi-file torrents are not supported")
            }
            Self::TrackerHttpStatus(status) => {
                write!(f, "tracker returned HTTP status {}", status)
            }
            Self::TrackerFailure(reason) => {
                write!(f, "tracker failure: {}", reason)
            }
            Self::TrackerUdpProtocol(reason) => {
                write!(f, "UDP tracker protocol violation: {}", reason)
            }
            Self::TrackerTimeout => write!(f, "tracker request timed out"),
            Self::NoPeers => write!(f, "tracker returned no peers"),
            Self::UnsupportedAnnounceScheme(scheme) => {
                write!(f, "unsupported announce URL scheme: {}", scheme)
            }
            Self::PeerConnection(reason) => {
                write!(f, "peer connection failed: {}", reason)
            }
            Self::PeerInfoHashMismatch => {
                write!(f, "peer handshake info-hash does not match ours")
            }
            Self::UnexpectedMessage(ctx) => {
                write!(f, "unexpected peer message: {}", ctx)
            }
            Self::Choke => write!(f, "peer choked us mid-transfer"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Timeout => write!(f, "read timed out"),
            Self::PieceNotAvailable => {
                write!(f, "peer does not have the requested piece")
            }
            Self::PieceHashMismatch => {
                write!(f, "piece hash does not match expected value")
            }
            Self::InvalidPieceIndex => write!(f, "invalid piece index"),
            Self::AllPeersExhausted => {
                write!(f, "all peers were retired before the download finished")
            }
            Self::OutputAlreadyExists => {
                write!(f, "output path already exists")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<crate::bencode::DecodeError> for Error {
    fn from(e: crate::bencode::DecodeError) -> Self {
        Self::Bencode(e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::PeerConnection(e.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        // the only way a send can fail on our queues is if the receiving
        // half has already been dropped, which only happens during/after
        // coordinator shutdown
        Self::AllPeersExhausted
    }
}
