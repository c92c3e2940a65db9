//! Wire framing for the handshake and for peer messages.
//!
//! Two `tokio_util` codecs live here: [`HandshakeCodec`], used for exactly
//! the first 68 bytes exchanged with a peer, and [`PeerCodec`], used for
//! every length-prefixed message after that. A session starts with the
//! former and swaps to the latter via `Framed::into_parts`/`FramedParts`,
//! carrying over whatever bytes were already buffered.

use crate::{
    bitfield::Bitfield, error::Error, error::Result, BlockInfo, PeerId,
    PieceIndex, Sha1Hash,
};
use bytes::{Buf, BufMut, BytesMut};
use std::convert::TryFrom;
use tokio_util::codec::{Decoder, Encoder};

/// The protocol identifier string sent in every handshake.
pub(crate) const PROTOCOL_STRING: &str = "BitTorrent protocol";

const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;

/// The fixed-size initial handshake exchanged before any other message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Handshake {
    pub info_hash: Sha1Hash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub(crate) fn new(info_hash: Sha1Hash, peer_id: PeerId) -> Self {
        Self { info_hash, peer_id }
    }
}

/// Codec for the one-shot 68 byte handshake frame.
pub(crate) struct HandshakeCodec;

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Handshake>> {
        if src.is_empty() {
            return Ok(None);
        }
        let prot_len = src[0] as usize;
        if prot_len != 19 {
            return Err(Error::HandshakeMalformed);
        }
        if src.len() < HANDSHAKE_LEN {
            // wait for the rest of the frame
            return Ok(None);
        }

        let mut buf = src.split_to(HANDSHAKE_LEN);
        buf.advance(1); // length byte, already checked

        let prot = buf.split_to(19);
        if prot.as_ref() != PROTOCOL_STRING.as_bytes() {
            return Err(Error::HandshakeMalformed);
        }

        buf.advance(8); // reserved bytes, ignored

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf.split_to(20));
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf.split_to(20));

        Ok(Some(Handshake { info_hash, peer_id }))
    }
}

impl Encoder<Handshake> for HandshakeCodec {
    type Error = Error;

    fn encode(&mut self, item: Handshake, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(HANDSHAKE_LEN);
        dst.put_u8(19);
        dst.put_slice(PROTOCOL_STRING.as_bytes());
        dst.put_slice(&[0u8; 8]);
        dst.put_slice(&item.info_hash);
        dst.put_slice(&item.peer_id);
        Ok(())
    }
}

/// The message IDs defined by the wire protocol, one byte each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Choke,
            1 => Self::Unchoke,
            2 => Self::Interested,
            3 => Self::NotInterested,
            4 => Self::Have,
            5 => Self::Bitfield,
            6 => Self::Request,
            7 => Self::Piece,
            8 => Self::Cancel,
            _ => return Err(Error::MalformedMessage),
        })
    }
}

/// A single peer-message frame, or the out-of-band keep-alive sentinel.
///
/// `Piece`'s payload is kept in its raw, unparsed wire form (`index`,
/// `begin`, and block bytes) because validating it requires context this
/// codec doesn't have: which piece the caller actually expects, and where
/// its reassembly buffer lives. [`parse_piece`] does that validation once
/// the caller can supply both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(PieceIndex),
    Bitfield(Bitfield),
    Request(BlockInfo),
    Piece(Vec<u8>),
    Cancel(BlockInfo),
}

impl Message {
    /// Returns the message's wire ID, or `None` for the keep-alive
    /// sentinel, which carries no ID on the wire.
    pub(crate) fn id(&self) -> Option<MessageId> {
        Some(match self {
            Self::KeepAlive => return None,
            Self::Choke => MessageId::Choke,
            Self::Unchoke => MessageId::Unchoke,
            Self::Interested => MessageId::Interested,
            Self::NotInterested => MessageId::NotInterested,
            Self::Have(_) => MessageId::Have,
            Self::Bitfield(_) => MessageId::Bitfield,
            Self::Request(_) => MessageId::Request,
            Self::Piece(_) => MessageId::Piece,
            Self::Cancel(_) => MessageId::Cancel,
        })
    }
}

/// Codec for all post-handshake peer messages.
pub(crate) struct PeerCodec;

impl Decoder for PeerCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if len == 0 {
            src.advance(4);
            return Ok(Some(Message::KeepAlive));
        }

        if src.len() < 4 + len {
            // don't yet have the full frame; wait for more bytes rather
            // than treating a merely-incomplete read as an error
            return Ok(None);
        }

        src.advance(4);
        let mut payload = src.split_to(len);
        let id = MessageId::try_from(payload[0])?;
        payload.advance(1);

        let msg = match id {
            MessageId::Choke => Message::Choke,
            MessageId::Unchoke => Message::Unchoke,
            MessageId::Interested => Message::Interested,
            MessageId::NotInterested => Message::NotInterested,
            MessageId::Have => Message::Have(parse_have(&payload)? as PieceIndex),
            MessageId::Bitfield => Message::Bitfield(Bitfield::from_vec(payload.to_vec())),
            MessageId::Request => Message::Request(parse_block_info(&payload)?),
            MessageId::Piece => {
                if payload.len() < 8 {
                    return Err(Error::MalformedMessage);
                }
                Message::Piece(payload.to_vec())
            }
            MessageId::Cancel => Message::Cancel(parse_block_info(&payload)?),
        };
        Ok(Some(msg))
    }
}

impl Encoder<Message> for PeerCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        match item {
            Message::KeepAlive => {
                dst.reserve(4);
                dst.put_u32(0);
            }
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {
                dst.reserve(5);
                dst.put_u32(1);
                dst.put_u8(item.id().expect("non-keepalive message") as u8);
            }
            Message::Have(index) => {
                dst.reserve(9);
                dst.put_u32(5);
                dst.put_u8(MessageId::Have as u8);
                dst.put_u32(index as u32);
            }
            Message::Bitfield(bitfield) => {
                let bytes = bitfield.into_vec();
                dst.reserve(5 + bytes.len());
                dst.put_u32(1 + bytes.len() as u32);
                dst.put_u8(MessageId::Bitfield as u8);
                dst.put_slice(&bytes);
            }
            Message::Request(block) => {
                encode_block_info(MessageId::Request, block, dst);
            }
            Message::Cancel(block) => {
                encode_block_info(MessageId::Cancel, block, dst);
            }
            Message::Piece(payload) => {
                dst.reserve(5 + payload.len());
                dst.put_u32(1 + payload.len() as u32);
                dst.put_u8(MessageId::Piece as u8);
                dst.put_slice(&payload);
            }
        }
        Ok(())
    }
}

/// Parses a `Have` message's payload, returning the reported piece index.
///
/// # Errors
///
/// Returns [`Error::MalformedMessage`] if the payload isn't exactly 4 bytes.
pub(crate) fn parse_have(payload: &[u8]) -> Result<u32> {
    if payload.len() != 4 {
        return Err(Error::MalformedMessage);
    }
    Ok(u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]))
}

fn encode_block_info(id: MessageId, block: BlockInfo, dst: &mut BytesMut) {
    dst.reserve(17);
    dst.put_u32(13);
    dst.put_u8(id as u8);
    dst.put_u32(block.piece_index as u32);
    dst.put_u32(block.offset);
    dst.put_u32(block.len);
}

fn parse_block_info(payload: &[u8]) -> Result<BlockInfo> {
    if payload.len() != 12 {
        return Err(Error::MalformedMessage);
    }
    let piece_index = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as PieceIndex;
    let offset = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    let len = u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]);
    Ok(BlockInfo {
        piece_index,
        offset,
        len,
    })
}

/// Parses a `Piece` message's raw payload (`index`(4) `begin`(4) `block`...)
/// and copies `block` into `dest_buffer[begin..]`, returning the number of
/// bytes written.
///
/// # Errors
///
/// Returns [`Error::MalformedMessage`] if the payload is shorter than 8
/// bytes, if the decoded index doesn't match `expected_index`, or if the
/// block would write past the end of `dest_buffer`.
pub(crate) fn parse_piece(
    payload: &[u8],
    expected_index: PieceIndex,
    dest_buffer: &mut [u8],
) -> Result<usize> {
    if payload.len() < 8 {
        return Err(Error::MalformedMessage);
    }
    let index = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as PieceIndex;
    if index != expected_index {
        return Err(Error::MalformedMessage);
    }
    let begin = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]) as usize;
    let block = &payload[8..];
    let end = begin
        .checked_add(block.len())
        .ok_or(Error::MalformedMessage)?;
    if end > dest_buffer.len() {
        return Err(Error::MalformedMessage);
    }
    dest_buffer[begin..end].copy_from_slice(block);
    Ok(block.len())
}
