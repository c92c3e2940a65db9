//! The work-queue dispatcher that drives a download to completion: seeds a
//! piece queue, spawns one worker per peer, and assembles their results into
//! a single output file.

use crate::{
    conf::Conf,
    disk,
    download::download_piece,
    error::{Error, Result},
    metainfo::Metainfo,
    peer::PeerSession,
    PieceIndex, Sha1Hash,
};
use sha1::{Digest, Sha1};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex as StdMutex},
};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

/// One piece's worth of work: what to fetch and how to verify it.
#[derive(Clone, Debug)]
pub struct PieceWork {
    pub index: PieceIndex,
    pub len: u32,
    pub hash: Sha1Hash,
}

/// Downloads every piece of `metainfo` from `peers` and writes the
/// assembled file into `conf.download_dir`.
///
/// # Errors
///
/// Returns [`Error::IncompleteDownload`] if every worker exits before all
/// pieces are collected, and propagates the metainfo's own errors (there are
/// none left to propagate here since `metainfo` is already validated) or any
/// I/O error from the final write.
pub async fn run(metainfo: &Metainfo, peers: Vec<SocketAddr>, conf: Conf) -> Result<()> {
    let info_hash = metainfo.info_hash()?;
    let piece_count = metainfo.piece_count();
    let piece_hashes = metainfo.piece_hashes();
    let piece_work: Vec<PieceWork> = (0..piece_count)
        .map(|index| {
            Ok(PieceWork {
                index,
                len: metainfo.piece_len(index)?,
                hash: piece_hashes[index],
            })
        })
        .collect::<Result<_>>()?;

    let (todo_tx, todo_rx) = mpsc::channel::<PieceWork>(piece_count.max(1));
    for work in piece_work {
        // the channel was just created with exactly this many slots, so this
        // never actually awaits
        todo_tx
            .send(work)
            .await
            .expect("piece queue has room for every piece at startup");
    }
    let todo_rx = Arc::new(AsyncMutex::new(todo_rx));

    let (done_tx, mut done_rx) = mpsc::channel::<PieceIndex>(1);
    let output = Arc::new(StdMutex::new(vec![0u8; metainfo.info.length as usize]));

    log::info!(
        "Starting download of {} ({} pieces, {} peers)",
        metainfo.info.name,
        piece_count,
        peers.len()
    );

    let piece_length = metainfo.info.piece_length;
    let mut handles = Vec::with_capacity(peers.len());
    for addr in peers {
        let todo_tx = todo_tx.clone();
        let todo_rx = Arc::clone(&todo_rx);
        let done_tx = done_tx.clone();
        let output = Arc::clone(&output);
        let conf = conf.clone();
        handles.push(tokio::spawn(async move {
            worker(
                addr,
                info_hash,
                piece_count,
                conf,
                todo_tx,
                todo_rx,
                done_tx,
                output,
                piece_length,
            )
            .await;
        }));
    }
    // the coordinator's own handles don't keep the channels open; only the
    // workers' clones do, and those are dropped as each worker task ends
    drop(todo_tx);
    drop(done_tx);

    let mut completed = 0usize;
    while let Some(index) = done_rx.recv().await {
        completed += 1;
        log::debug!("Piece {} complete ({}/{})", index, completed, piece_count);
        if completed == piece_count {
            // no more work will ever be produced; wake any worker still
            // blocked in recv() so it can exit
            todo_rx.lock().await.close();
            break;
        }
    }

    for handle in handles {
        let _ = handle.await;
    }

    if completed == piece_count {
        let bytes = std::mem::take(&mut *output.lock().expect("output buffer mutex poisoned"));
        let file_name = conf
            .output_name
            .clone()
            .unwrap_or_else(|| metainfo.info.name.clone());
        let path = conf.download_dir.join(file_name);
        disk::write_output(path, bytes).await?;
        log::info!("Download of {} complete", metainfo.info.name);
        Ok(())
    } else {
        Err(Error::IncompleteDownload {
            done: completed,
            total: piece_count,
        })
    }
}

/// A single peer worker: owns one session for its entire lifetime, pulling
/// pieces from `todo` until the queue closes or its session dies.
#[allow(clippy::too_many_arguments)]
async fn worker(
    addr: SocketAddr,
    info_hash: Sha1Hash,
    piece_count: usize,
    conf: Conf,
    todo_tx: mpsc::Sender<PieceWork>,
    todo_rx: Arc<AsyncMutex<mpsc::Receiver<PieceWork>>>,
    done_tx: mpsc::Sender<PieceIndex>,
    output: Arc<StdMutex<Vec<u8>>>,
    piece_length: u32,
) {
    let mut session = match PeerSession::connect(addr, &conf, info_hash, piece_count).await {
        Ok(session) => session,
        Err(err) => {
            log::warn!("Peer {} session failed to open: {}", addr, err);
            return;
        }
    };

    if session.send_unchoke().await.is_err() || session.send_interested().await.is_err() {
        log::warn!("Peer {} rejected our opening messages", addr);
        return;
    }

    loop {
        let work = {
            let mut rx = todo_rx.lock().await;
            match rx.recv().await {
                Some(work) => work,
                None => break,
            }
        };

        if !session.has_piece(work.index) {
            // accepted known limitation: this can spin against a peer that
            // never gets more of the torrent
            let _ = todo_tx.send(work).await;
            continue;
        }

        match download_piece(
            &mut session,
            work.index,
            work.len,
            conf.max_block_len,
            conf.max_inflight_blocks,
        )
        .await
        {
            Ok(bytes) => {
                if verify_piece(&bytes, &work.hash) {
                    let offset = work.index * piece_length as usize;
                    {
                        let mut out = output.lock().expect("output buffer mutex poisoned");
                        out[offset..offset + bytes.len()].copy_from_slice(&bytes);
                    }
                    if done_tx.send(work.index).await.is_err() {
                        break;
                    }
                } else {
                    log::warn!(
                        "Piece {} failed hash verification from {} (expected {})",
                        work.index,
                        addr,
                        hex::encode(&work.hash)
                    );
                    let _ = todo_tx.send(work).await;
                }
            }
            Err(err) => {
                log::warn!("Piece {} failed against peer {}: {}", work.index, addr, err);
                let _ = todo_tx.send(work).await;
                break;
            }
        }
    }

    session.close();
}

fn verify_piece(bytes: &[u8], expected: &Sha1Hash) -> bool {
    let digest = Sha1::digest(bytes);
    &digest[..] == &expected[..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metainfo::Info;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    async fn send_message(socket: &mut TcpStream, id: u8, payload: &[u8]) {
        let len = (1 + payload.len()) as u32;
        let mut frame = Vec::with_capacity(5 + payload.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.push(id);
        frame.extend_from_slice(payload);
        socket.write_all(&frame).await.unwrap();
    }

    /// Plays a single peer: handshakes, advertises both pieces, unchokes
    /// immediately, and serves block requests. The first request for piece
    /// 0 is deliberately answered with corrupt bytes so the coordinator is
    /// exercised re-requesting a piece that fails hash verification.
    async fn fake_peer(listener: TcpListener, info_hash: Sha1Hash) {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut handshake = [0u8; 68];
        socket.read_exact(&mut handshake).await.unwrap();
        assert_eq!(handshake[0], 19);
        assert_eq!(&handshake[1..20], b"BitTorrent protocol");
        assert_eq!(&handshake[28..48], &info_hash[..]);

        let mut reply = Vec::with_capacity(68);
        reply.push(19);
        reply.extend_from_slice(b"BitTorrent protocol");
        reply.extend_from_slice(&[0u8; 8]);
        reply.extend_from_slice(&info_hash);
        reply.extend_from_slice(&[7u8; 20]);
        socket.write_all(&reply).await.unwrap();

        // bitfield: two pieces, both present -> 0b1100_0000
        send_message(&mut socket, 5, &[0xC0]).await;
        // unchoke immediately, we have no choking policy to enforce here
        send_message(&mut socket, 1, &[]).await;

        let mut piece0_attempts = 0u32;
        loop {
            let mut len_buf = [0u8; 4];
            if socket.read_exact(&mut len_buf).await.is_err() {
                break;
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            if len == 0 {
                continue;
            }
            let mut payload = vec![0u8; len];
            if socket.read_exact(&mut payload).await.is_err() {
                break;
            }
            if payload[0] != 6 {
                continue;
            }
            let index = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
            let begin = u32::from_be_bytes([payload[5], payload[6], payload[7], payload[8]]);
            let block_len =
                u32::from_be_bytes([payload[9], payload[10], payload[11], payload[12]]) as usize;

            let data = if index == 0 {
                piece0_attempts += 1;
                if piece0_attempts == 1 {
                    vec![0u8; block_len]
                } else {
                    b"AAAAAAAA"[..block_len].to_vec()
                }
            } else {
                b"BBBB"[..block_len].to_vec()
            };

            let mut piece_payload = Vec::with_capacity(8 + data.len());
            piece_payload.extend_from_slice(&index.to_be_bytes());
            piece_payload.extend_from_slice(&begin.to_be_bytes());
            piece_payload.extend_from_slice(&data);
            send_message(&mut socket, 7, &piece_payload).await;
        }
    }

    #[tokio::test]
    async fn single_peer_run_retries_corrupt_piece_and_assembles_file() {
        let hash0 = Sha1::digest(b"AAAAAAAA");
        let hash1 = Sha1::digest(b"BBBB");
        let mut pieces = Vec::with_capacity(40);
        pieces.extend_from_slice(&hash0[..]);
        pieces.extend_from_slice(&hash1[..]);

        let metainfo = Metainfo {
            announce: "http://tracker.example/announce".into(),
            info: Info {
                name: "out.bin".into(),
                pieces,
                piece_length: 8,
                length: 12,
            },
        };
        let info_hash = metainfo.info_hash().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(fake_peer(listener, info_hash));

        let dir = std::env::temp_dir().join(format!("leechcrate-coordinator-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let conf = Conf::new(dir.clone());

        run(&metainfo, vec![addr], conf).await.unwrap();

        let written = std::fs::read(dir.join("out.bin")).unwrap();
        assert_eq!(written, b"AAAAAAAABBBB");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
