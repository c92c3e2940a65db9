//! A single outbound connection to a peer: opening handshake, availability
//! exchange, and the send/receive primitives the piece downloader drives.

mod codec;

pub(crate) use codec::{parse_piece, Message};

use crate::{
    bitfield::{self, Bitfield},
    conf::Conf,
    error::{Error, Result},
    BlockInfo, PeerId, PieceIndex, Sha1Hash,
};
use codec::{Handshake, HandshakeCodec, PeerCodec};
use futures::{SinkExt, StreamExt};
use std::{io, net::SocketAddr, time::Duration};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, FramedParts};

/// An established session with a peer.
///
/// Unlike a multi-torrent engine's sessions, this one has no internal
/// command channel: the owning worker task is the sole caller of every
/// method below, so there's nothing to arbitrate between.
pub(crate) struct PeerSession {
    addr: SocketAddr,
    framed: Framed<TcpStream, PeerCodec>,
    /// The peer's declared piece availability, seeded from its opening
    /// bitfield and updated by later `Have` messages.
    availability: Bitfield,
    /// Whether the peer currently has us choked. The downloader, not this
    /// struct, decides when to flip this in response to a `Choke`/`Unchoke`
    /// message; `send_request` does not check it itself.
    choked: bool,
    #[allow(dead_code)]
    peer_id: PeerId,
}

impl PeerSession {
    /// Connects to `addr`, performs the handshake, and waits for the peer's
    /// opening bitfield.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the connection or handshake doesn't complete
    /// within `conf`'s timeouts, [`Error::HandshakeMalformed`] or
    /// [`Error::HashMismatch`] if the peer's handshake is invalid, and
    /// [`Error::ProtocolViolation`] if the peer's first message isn't a
    /// bitfield.
    pub(crate) async fn connect(
        addr: SocketAddr,
        conf: &Conf,
        info_hash: Sha1Hash,
        piece_count: usize,
    ) -> Result<Self> {
        log::info!("Connecting to peer {}", addr);
        let socket = with_timeout(conf.connect_timeout, TcpStream::connect(addr)).await?;
        log::info!("Connected to peer {}", addr);

        let mut handshake_socket = Framed::new(socket, HandshakeCodec);
        let handshake = Handshake::new(info_hash, conf.client_id);
        log::info!("Sending handshake to peer {}", addr);
        with_timeout(conf.handshake_timeout, handshake_socket.send(handshake)).await??;

        log::info!("Waiting for peer {} handshake", addr);
        let peer_handshake = with_timeout(conf.handshake_timeout, handshake_socket.next())
            .await?
            .ok_or_else(|| peer_closed(addr, "handshake"))??;
        log::debug!("Peer {} handshake: {:?}", addr, peer_handshake);

        if peer_handshake.info_hash != info_hash {
            log::warn!("Peer {} handshake carries a mismatched info hash", addr);
            return Err(Error::HashMismatch);
        }

        // swap to the peer-message codec, carrying over whatever bytes the
        // peer may have already sent past the handshake
        let old_parts = handshake_socket.into_parts();
        let mut new_parts = FramedParts::new(old_parts.io, PeerCodec);
        new_parts.read_buf = old_parts.read_buf;
        new_parts.write_buf = old_parts.write_buf;
        let mut framed = Framed::from_parts(new_parts);

        log::info!("Waiting for peer {} bitfield", addr);
        let msg = with_timeout(conf.handshake_timeout, framed.next())
            .await?
            .ok_or_else(|| peer_closed(addr, "bitfield"))??;
        let mut availability = match msg {
            Message::Bitfield(bitfield) => bitfield,
            other => {
                log::warn!("Peer {} opened with {:?} instead of a bitfield", addr, other.id());
                return Err(Error::ProtocolViolation);
            }
        };
        bitfield::truncate_padding(&mut availability, piece_count);
        log::info!("Peer {} session established", addr);

        Ok(Self {
            addr,
            framed,
            availability,
            choked: true,
            peer_id: peer_handshake.peer_id,
        })
    }

    pub(crate) fn is_choked(&self) -> bool {
        self.choked
    }

    pub(crate) fn set_choked(&mut self, choked: bool) {
        self.choked = choked;
    }

    pub(crate) fn has_piece(&self, index: PieceIndex) -> bool {
        bitfield::has(&self.availability, index)
    }

    pub(crate) fn set_piece(&mut self, index: PieceIndex) -> Result<()> {
        bitfield::set(&mut self.availability, index)
    }

    pub(crate) async fn send_unchoke(&mut self) -> Result<()> {
        self.framed.send(Message::Unchoke).await
    }

    pub(crate) async fn send_interested(&mut self) -> Result<()> {
        self.framed.send(Message::Interested).await
    }

    #[allow(dead_code)]
    pub(crate) async fn send_have(&mut self, index: PieceIndex) -> Result<()> {
        self.framed.send(Message::Have(index)).await
    }

    pub(crate) async fn send_request(&mut self, piece_index: PieceIndex, offset: u32, len: u32) -> Result<()> {
        self.framed
            .send(Message::Request(BlockInfo { piece_index, offset, len }))
            .await
    }

    /// Reads the next message, or `Ok(None)` if the peer closed the
    /// connection.
    pub(crate) async fn read_message(&mut self) -> Result<Option<Message>> {
        match self.framed.next().await {
            Some(msg) => Ok(Some(msg?)),
            None => Ok(None),
        }
    }

    pub(crate) fn close(self) {
        log::info!("Closing session with peer {}", self.addr);
    }
}

fn peer_closed(addr: SocketAddr, during: &str) -> Error {
    log::warn!("Peer {} closed the connection during {}", addr, during);
    Error::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("connection closed during {}", during),
    ))
}

/// Runs `fut` with a deadline, converting an elapsed timeout into
/// [`Error::Io`].
async fn with_timeout<F, T>(duration: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| Error::Io(io::Error::new(io::ErrorKind::TimedOut, "timed out waiting for peer")))
}
