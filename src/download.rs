//! Pipelined download of a single piece over a single peer session.

use crate::{
    error::{Error, Result},
    peer::{parse_piece, Message, PeerSession},
    PieceIndex,
};

/// Drives a pipelined fetch of exactly one piece over `session`.
///
/// Keeps up to `max_inflight_blocks` (from the session's [`Conf`](crate::conf::Conf))
/// block requests outstanding at once, dispatching whatever messages arrive
/// in between, until the whole piece has been downloaded.
///
/// # Errors
///
/// Any I/O, framing, or malformed-message error aborts the piece immediately;
/// the caller decides whether to requeue it. Hash verification is the
/// caller's responsibility: this function only assembles bytes.
pub(crate) async fn download_piece(
    session: &mut PeerSession,
    piece_index: PieceIndex,
    piece_len: u32,
    max_block_len: u32,
    max_inflight: usize,
) -> Result<Vec<u8>> {
    let mut dest_buffer = vec![0u8; piece_len as usize];
    let mut bytes_requested = 0u32;
    let mut bytes_downloaded = 0u32;
    let mut inflight = 0usize;

    while bytes_downloaded < piece_len {
        while !session.is_choked() && inflight < max_inflight && bytes_requested < piece_len {
            let remaining = piece_len - bytes_requested;
            let block = std::cmp::min(max_block_len, remaining);
            session
                .send_request(piece_index, bytes_requested, block)
                .await?;
            bytes_requested += block;
            inflight += 1;
        }

        let msg = session
            .read_message()
            .await?
            .ok_or(Error::ShortRead)?;
        match msg {
            Message::Choke => session.set_choked(true),
            Message::Unchoke => session.set_choked(false),
            Message::Have(index) => {
                session.set_piece(index)?;
            }
            Message::Piece(payload) => {
                let written = parse_piece(&payload, piece_index, &mut dest_buffer)?;
                bytes_downloaded += written as u32;
                inflight = inflight.saturating_sub(1);
            }
            Message::KeepAlive => {}
            other => {
                log::trace!("Ignoring {:?} while downloading piece {}", other, piece_index);
            }
        }
    }

    debug_assert!(bytes_requested <= piece_len);
    Ok(dest_buffer)
}
