//! The peer wire-protocol state machine.
//!
//! One [`PeerSession`] per remote peer: it owns the TCP connection (created
//! lazily), the peer's advertised [`crate::Bitfield`], and the choke state.
//! It is never shared between workers — the download coordinator hands
//! each session to exactly one worker task, which drives it synchronously
//! through [`PeerSession::download_piece`].

pub mod codec;

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Framed, FramedParts};

use codec::{Handshake, HandshakeCodec, Message, PeerCodec};

use crate::error::{Error, Result};
use crate::{block_count, block_len, Bitfield, BlockInfo, PeerId, PieceIndex, Sha1Hash};

/// Where a session is in its connection lifecycle.
///
/// Mirrors the table in the design: `Disconnected -> Connected ->
/// HandshookAwaitingBitfield -> Ready -> (Closed)`. `Closed` isn't a
/// distinct variant here — a closed session simply drops its connection
/// and goes back to `Disconnected`, since the only thing the coordinator
/// ever does with a closed session is reconnect it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Disconnected,
    Connected,
    HandshookAwaitingBitfield,
    Ready,
}

/// A session with a single remote peer.
pub struct PeerSession {
    addr: SocketAddr,
    our_peer_id: PeerId,
    info_hash: Sha1Hash,
    read_timeout: Duration,

    state: State,
    /// The raw stream, held here only between `connect` and `handshake`.
    raw: Option<TcpStream>,
    conn: Option<Framed<TcpStream, PeerCodec>>,
    remote_peer_id: Option<PeerId>,
    have_pieces: Bitfield,
    is_choked: bool,
    is_interested_sent: bool,
}

impl PeerSession {
    /// Creates a session for an as-yet unconnected peer.
    pub fn new(
        addr: SocketAddr,
        our_peer_id: PeerId,
        info_hash: Sha1Hash,
        read_timeout: Duration,
    ) -> Self {
        Self {
            addr,
            our_peer_id,
            info_hash,
            read_timeout,
            state: State::Disconnected,
            raw: None,
            conn: None,
            remote_peer_id: None,
            have_pieces: Bitfield::new(),
            is_choked: true,
            is_interested_sent: false,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Drops the connection and resets the session back to `Disconnected`
    /// so the next [`download_piece`](Self::download_piece) call
    /// reconnects from scratch.
    pub fn close(&mut self) {
        self.raw = None;
        self.conn = None;
        self.state = State::Disconnected;
        self.is_choked = true;
        self.is_interested_sent = false;
    }

    /// Runs the full piece-download protocol of §4.3 against this peer:
    /// connects/handshakes/awaits the bitfield if necessary, rejects early
    /// if the peer doesn't have the piece, sends interested, pipelines a
    /// request for every block once unchoked, and collects every block.
    pub async fn download_piece(
        &mut self,
        piece_index: PieceIndex,
        piece_len: u32,
    ) -> Result<Vec<(u32, Vec<u8>)>> {
        self.ensure_ready().await?;

        if !self.has_piece(piece_index) {
            return Err(Error::PieceNotAvailable);
        }

        self.send_interested().await?;
        self.await_unchoke().await?;
        self.send_requests(piece_index, piece_len).await?;
        self.collect_blocks(piece_index, piece_len).await
    }

    fn has_piece(&self, index: PieceIndex) -> bool {
        self.have_pieces.get(index).unwrap_or(false)
    }

    /// Brings the session up to `Ready`, connecting, handshaking, and
    /// awaiting the peer's bitfield if it isn't already there.
    async fn ensure_ready(&mut self) -> Result<()> {
        if self.state == State::Ready {
            return Ok(());
        }
        if self.state == State::Disconnected {
            self.connect().await?;
        }
        if self.state == State::Connected {
            self.handshake().await?;
        }
        if self.state == State::HandshookAwaitingBitfield {
            // a failure at this step is still part of the "can we even get
            // a session going with this peer" question (§4.6), same as a
            // connect or handshake failure, so it retires the peer rather
            // than merely closing the connection for a reconnect attempt
            self.await_bitfield().await.map_err(|e| match e {
                Error::PeerInfoHashMismatch => e,
                other => Error::PeerConnection(other.to_string()),
            })?;
        }
        debug_assert_eq!(self.state, State::Ready);
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        log::info!("connecting to peer {}", self.addr);
        let socket = timeout(self.read_timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| Error::PeerConnection("connect timed out".into()))?
            .map_err(|e| Error::PeerConnection(e.to_string()))?;
        self.raw = Some(socket);
        self.state = State::Connected;
        Ok(())
    }

    async fn handshake(&mut self) -> Result<()> {
        let socket = self.raw.take().expect("handshake called without a connection");
        let mut hs_conn = Framed::new(socket, HandshakeCodec);

        let handshake = Handshake::new(self.info_hash, self.our_peer_id);
        timeout(self.read_timeout, hs_conn.send(handshake))
            .await
            .map_err(|_| Error::PeerConnection("handshake send timed out".into()))?
            .map_err(|e| Error::PeerConnection(e.to_string()))?;

        let peer_handshake = timeout(self.read_timeout, hs_conn.next())
            .await
            .map_err(|_| Error::PeerConnection("handshake read timed out".into()))?
            .ok_or_else(|| Error::PeerConnection("connection closed during handshake".into()))?
            .map_err(|e| Error::PeerConnection(e.to_string()))?;

        if peer_handshake.info_hash != self.info_hash {
            return Err(Error::PeerInfoHashMismatch);
        }
        self.remote_peer_id = Some(peer_handshake.peer_id);

        // switch from the handshake codec to the message codec, carrying
        // over whatever bytes the peer already queued up behind the
        // handshake (a cooperative peer may pipeline its bitfield right
        // behind the handshake bytes)
        let old_parts = hs_conn.into_parts();
        let mut new_parts = FramedParts::new(old_parts.io, PeerCodec);
        new_parts.read_buf = old_parts.read_buf;
        new_parts.write_buf = old_parts.write_buf;
        self.conn = Some(Framed::from_parts(new_parts));

        self.state = State::HandshookAwaitingBitfield;
        Ok(())
    }

    async fn await_bitfield(&mut self) -> Result<()> {
        loop {
            match self.next_message().await? {
                Message::Bitfield(bitfield) => {
                    self.have_pieces = bitfield;
                    self.state = State::Ready;
                    return Ok(());
                }
                Message::KeepAlive => continue,
                _ => return Err(Error::UnexpectedMessage("expected bitfield after handshake")),
            }
        }
    }

    async fn send_interested(&mut self) -> Result<()> {
        if self.is_interested_sent {
            return Ok(());
        }
        self.send(Message::Interested).await?;
        self.is_interested_sent = true;
        Ok(())
    }

    /// Consumes incoming messages until the peer unchokes us (or we
    /// discover we already are unchoked from a previous piece).
    async fn await_unchoke(&mut self) -> Result<()> {
        if !self.is_choked {
            return Ok(());
        }
        loop {
            match self.next_message().await? {
                Message::Unchoke => {
                    self.is_choked = false;
                    return Ok(());
                }
                Message::Choke => {
                    self.is_choked = true;
                }
                Message::Have { piece_index } => self.mark_have(piece_index),
                Message::KeepAlive => {}
                Message::Bitfield(_) => {
                    return Err(Error::UnexpectedMessage("bitfield sent twice"));
                }
                // we never advertise any pieces, so a compliant peer has
                // nothing to request from us; ignore rather than abort
                Message::Interested | Message::NotInterested | Message::Request(_)
                | Message::Cancel(_) => {}
                Message::Block { .. } => {
                    return Err(Error::UnexpectedMessage("block sent before unchoke"));
                }
            }
        }
    }

    async fn send_requests(&mut self, piece_index: PieceIndex, piece_len: u32) -> Result<()> {
        let count = block_count(piece_len);
        for i in 0..count {
            let offset = i as u32 * crate::BLOCK_LEN;
            let len = block_len(piece_len, i);
            self.send(Message::Request(BlockInfo {
                piece_index,
                offset,
                len,
            }))
            .await?;
        }
        Ok(())
    }

    /// Consumes frames until every requested block of `piece_index` has
    /// been gathered, or an unexpected id / choke / I/O error occurs.
    async fn collect_blocks(
        &mut self,
        piece_index: PieceIndex,
        piece_len: u32,
    ) -> Result<Vec<(u32, Vec<u8>)>> {
        let count = block_count(piece_len);
        let mut pending: BTreeSet<u32> = (0..count)
            .map(|i| i as u32 * crate::BLOCK_LEN)
            .collect();
        let mut blocks = Vec::with_capacity(count);

        while !pending.is_empty() {
            match self.next_message().await? {
                Message::Block {
                    piece_index: pi,
                    offset,
                    data,
                } => {
                    if pi != piece_index {
                        return Err(Error::UnexpectedMessage("block for wrong piece"));
                    }
                    if pending.remove(&offset) {
                        blocks.push((offset, data));
                    } else {
                        log::debug!(
                            "peer {} sent duplicate/unrequested block at offset {}",
                            self.addr,
                            offset
                        );
                    }
                }
                Message::Choke => {
                    self.is_choked = true;
                    return Err(Error::Choke);
                }
                Message::Have { piece_index } => self.mark_have(piece_index),
                Message::Unchoke | Message::KeepAlive => {}
                Message::Interested | Message::NotInterested | Message::Request(_)
                | Message::Cancel(_) => {}
                Message::Bitfield(_) => {
                    return Err(Error::UnexpectedMessage("bitfield sent twice"));
                }
            }
        }

        blocks.sort_by_key(|(offset, _)| *offset);
        Ok(blocks)
    }

    fn mark_have(&mut self, index: PieceIndex) {
        if index >= self.have_pieces.len() {
            self.have_pieces.resize(index + 1, false);
        }
        self.have_pieces.set(index, true);
    }

    async fn send(&mut self, msg: Message) -> Result<()> {
        let conn = self.conn.as_mut().expect("send called without a connection");
        timeout(self.read_timeout, conn.send(msg))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(Error::Io)
    }

    async fn next_message(&mut self) -> Result<Message> {
        let conn = self.conn.as_mut().expect("recv called without a connection");
        let msg = timeout(self.read_timeout, conn.next())
            .await
            .map_err(|_| Error::Timeout)?
            .ok_or(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )))?
            .map_err(Error::Io)?;
        Ok(msg)
    }
}
