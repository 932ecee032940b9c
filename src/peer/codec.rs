//! The two wire codecs used during a peer session: [`HandshakeCodec`] for
//! the one-shot 68 byte handshake, and [`PeerCodec`] for every message
//! exchanged afterward.
//!
//! Both are implemented against `tokio_util::codec`'s `Decoder`/`Encoder`
//! traits so they can be driven through a `Framed` stream exactly like the
//! rest of this session's I/O; the handshake codec is swapped out for the
//! message codec the moment the handshake completes, carrying over
//! whatever bytes the peer already queued up behind it.

use std::convert::TryInto;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{BlockInfo, Bitfield, PeerId, PieceIndex, Sha1Hash};

/// The fixed protocol string identifying the BitTorrent v1 wire protocol.
pub const PROTOCOL_STRING: &str = "BitTorrent protocol";

/// The length, in bytes, of a serialized handshake.
const HANDSHAKE_LEN: usize = 68;

/// The initial message exchanged between two peers, identifying the
/// protocol and the torrent both sides intend to speak about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub prot: [u8; 19],
    pub reserved: [u8; 8],
    pub info_hash: Sha1Hash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: Sha1Hash, peer_id: PeerId) -> Self {
        let mut prot = [0; 19];
        prot.copy_from_slice(PROTOCOL_STRING.as_bytes());
        Self {
            prot,
            reserved: [0; 8],
            info_hash,
            peer_id,
        }
    }
}

/// Encodes and decodes [`Handshake`]s.
///
/// This is only ever used for the very first message of a session: once a
/// handshake has been exchanged both ends switch to [`PeerCodec`].
pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = std::io::Error;

    fn encode(
        &mut self,
        handshake: Handshake,
        buf: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        let Handshake {
            prot,
            reserved,
            info_hash,
            peer_id,
        } = handshake;
        buf.reserve(HANDSHAKE_LEN);
        buf.put_u8(prot.len() as u8);
        buf.extend_from_slice(&prot);
        buf.extend_from_slice(&reserved);
        buf.extend_from_slice(&info_hash);
        buf.extend_from_slice(&peer_id);
        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = std::io::Error;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        if buf.is_empty() {
            return Ok(None);
        }
        let prot_len = buf[0] as usize;
        if prot_len != 19 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "invalid protocol string length in handshake",
            ));
        }
        if buf.len() < HANDSHAKE_LEN {
            return Ok(None);
        }

        buf.advance(1);
        let mut prot = [0; 19];
        prot.copy_from_slice(&buf[..19]);
        buf.advance(19);
        let mut reserved = [0; 8];
        reserved.copy_from_slice(&buf[..8]);
        buf.advance(8);
        let mut info_hash = [0; 20];
        info_hash.copy_from_slice(&buf[..20]);
        buf.advance(20);
        let mut peer_id = [0; 20];
        peer_id.copy_from_slice(&buf[..20]);
        buf.advance(20);

        Ok(Some(Handshake {
            prot,
            reserved,
            info_hash,
            peer_id,
        }))
    }
}

/// The message type tag sent as the first byte of a message's payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Block = 7,
    Cancel = 8,
}

impl MessageId {
    fn from_u8(id: u8) -> Option<Self> {
        Some(match id {
            0 => Self::Choke,
            1 => Self::Unchoke,
            2 => Self::Interested,
            3 => Self::NotInterested,
            4 => Self::Have,
            5 => Self::Bitfield,
            6 => Self::Request,
            7 => Self::Block,
            8 => Self::Cancel,
            _ => return None,
        })
    }
}

/// A single message of the peer wire protocol, after the handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: PieceIndex },
    Bitfield(Bitfield),
    Request(BlockInfo),
    Block { piece_index: PieceIndex, offset: u32, data: Vec<u8> },
    Cancel(BlockInfo),
}

impl Message {
    pub fn id(&self) -> Option<MessageId> {
        match self {
            Self::KeepAlive => None,
            Self::Choke => Some(MessageId::Choke),
            Self::Unchoke => Some(MessageId::Unchoke),
            Self::Interested => Some(MessageId::Interested),
            Self::NotInterested => Some(MessageId::NotInterested),
            Self::Have { .. } => Some(MessageId::Have),
            Self::Bitfield(_) => Some(MessageId::Bitfield),
            Self::Request(_) => Some(MessageId::Request),
            Self::Block { .. } => Some(MessageId::Block),
            Self::Cancel(_) => Some(MessageId::Cancel),
        }
    }
}

/// Encodes and decodes post-handshake [`Message`]s.
///
/// Every message is framed as a 4 byte big endian length prefix (excluding
/// the prefix itself), followed by a 1 byte message id (absent for
/// keep-alives, whose length prefix is simply zero), followed by the
/// message's payload, if any.
pub struct PeerCodec;

impl Encoder<Message> for PeerCodec {
    type Error = std::io::Error;

    fn encode(
        &mut self,
        msg: Message,
        buf: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        match msg {
            Message::KeepAlive => {
                buf.put_u32(0);
            }
            Message::Choke => write_header(buf, MessageId::Choke, 0),
            Message::Unchoke => write_header(buf, MessageId::Unchoke, 0),
            Message::Interested => write_header(buf, MessageId::Interested, 0),
            Message::NotInterested => {
                write_header(buf, MessageId::NotInterested, 0)
            }
            Message::Have { piece_index } => {
                write_header(buf, MessageId::Have, 4);
                buf.put_u32(piece_index as u32);
            }
            Message::Bitfield(bitfield) => {
                let bytes = bitfield.into_vec();
                write_header(buf, MessageId::Bitfield, bytes.len());
                buf.extend_from_slice(&bytes);
            }
            Message::Request(block) => {
                write_header(buf, MessageId::Request, 12);
                buf.put_u32(block.piece_index as u32);
                buf.put_u32(block.offset);
                buf.put_u32(block.len);
            }
            Message::Block { piece_index, offset, data } => {
                write_header(buf, MessageId::Block, 8 + data.len());
                buf.put_u32(piece_index as u32);
                buf.put_u32(offset);
                buf.extend_from_slice(&data);
            }
            Message::Cancel(block) => {
                write_header(buf, MessageId::Cancel, 12);
                buf.put_u32(block.piece_index as u32);
                buf.put_u32(block.offset);
                buf.put_u32(block.len);
            }
        }
        Ok(())
    }
}

fn write_header(buf: &mut BytesMut, id: MessageId, payload_len: usize) {
    buf.reserve(5 + payload_len);
    buf.put_u32((1 + payload_len) as u32);
    buf.put_u8(id as u8);
}

impl Decoder for PeerCodec {
    type Item = Message;
    type Error = std::io::Error;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let msg_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if msg_len == 0 {
            buf.advance(4);
            return Ok(Some(Message::KeepAlive));
        }
        if buf.len() < 4 + msg_len {
            buf.reserve(4 + msg_len - buf.len());
            return Ok(None);
        }

        buf.advance(4);
        let id_byte = buf[0];
        let id = MessageId::from_u8(id_byte).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown message id: {}", id_byte),
            )
        })?;
        buf.advance(1);
        let payload_len = msg_len - 1;
        let payload = buf.split_to(payload_len);

        let msg = match id {
            MessageId::Choke => Message::Choke,
            MessageId::Unchoke => Message::Unchoke,
            MessageId::Interested => Message::Interested,
            MessageId::NotInterested => Message::NotInterested,
            MessageId::Have => {
                if payload.len() != 4 {
                    return Err(invalid_payload_len("have"));
                }
                Message::Have {
                    piece_index: u32::from_be_bytes(
                        payload[..4].try_into().unwrap(),
                    ) as PieceIndex,
                }
            }
            MessageId::Bitfield => {
                Message::Bitfield(Bitfield::from_vec(payload.to_vec()))
            }
            MessageId::Request => {
                if payload.len() != 12 {
                    return Err(invalid_payload_len("request"));
                }
                Message::Request(decode_block_info(&payload))
            }
            MessageId::Block => {
                if payload.len() < 8 {
                    return Err(invalid_payload_len("block"));
                }
                let piece_index =
                    u32::from_be_bytes(payload[0..4].try_into().unwrap())
                        as PieceIndex;
                let offset =
                    u32::from_be_bytes(payload[4..8].try_into().unwrap());
                let data = payload[8..].to_vec();
                Message::Block { piece_index, offset, data }
            }
            MessageId::Cancel => {
                if payload.len() != 12 {
                    return Err(invalid_payload_len("cancel"));
                }
                Message::Cancel(decode_block_info(&payload))
            }
        };

        Ok(Some(msg))
    }
}

fn decode_block_info(payload: &[u8]) -> BlockInfo {
    BlockInfo {
        piece_index: u32::from_be_bytes(payload[0..4].try_into().unwrap())
            as PieceIndex,
        offset: u32::from_be_bytes(payload[4..8].try_into().unwrap()),
        len: u32::from_be_bytes(payload[8..12].try_into().unwrap()),
    }
}

fn invalid_payload_len(kind: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid {} message payload length", kind),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_round_trips_through_codec() {
        let info_hash = [7u8; 20];
        let peer_id = [9u8; 20];
        let handshake = Handshake::new(info_hash, peer_id);

        let mut buf = BytesMut::new();
        HandshakeCodec.encode(handshake, &mut buf).unwrap();
        assert_eq!(buf.len(), HANDSHAKE_LEN);
        assert_eq!(buf[0], 19);
        assert_eq!(&buf[1..20], PROTOCOL_STRING.as_bytes());

        let decoded = HandshakeCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, handshake);
    }

    #[test]
    fn handshake_decode_waits_for_full_frame() {
        let info_hash = [1u8; 20];
        let peer_id = [2u8; 20];
        let handshake = Handshake::new(info_hash, peer_id);
        let mut full = BytesMut::new();
        HandshakeCodec.encode(handshake, &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..HANDSHAKE_LEN - 1]);
        assert_eq!(HandshakeCodec.decode(&mut partial).unwrap(), None);
    }

    #[test]
    fn keep_alive_round_trips() {
        let mut buf = BytesMut::new();
        PeerCodec.encode(Message::KeepAlive, &mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 0]);
        let decoded = PeerCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, Message::KeepAlive);
    }

    #[test]
    fn request_message_round_trips() {
        let block = BlockInfo { piece_index: 2, offset: 16384, len: 10143 };
        let mut buf = BytesMut::new();
        PeerCodec.encode(Message::Request(block), &mut buf).unwrap();
        // 4 (len prefix) + 1 (id) + 12 (payload)
        assert_eq!(buf.len(), 17);
        let decoded = PeerCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, Message::Request(block));
    }

    #[test]
    fn block_message_round_trips() {
        let data = vec![1, 2, 3, 4, 5];
        let msg = Message::Block { piece_index: 3, offset: 0, data: data.clone() };
        let mut buf = BytesMut::new();
        PeerCodec.encode(msg.clone(), &mut buf).unwrap();
        let decoded = PeerCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_waits_for_full_message() {
        let block = BlockInfo { piece_index: 0, offset: 0, len: 1 };
        let mut buf = BytesMut::new();
        PeerCodec.encode(Message::Request(block), &mut buf).unwrap();
        let mut partial = BytesMut::from(&buf[..buf.len() - 1]);
        assert_eq!(PeerCodec.decode(&mut partial).unwrap(), None);
    }

    #[test]
    fn rejects_unknown_message_id() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u8(200);
        assert!(PeerCodec.decode(&mut buf).is_err());
    }
}
