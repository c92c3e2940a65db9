//! This module defines the tunables used to configure the download: timeouts,
//! pipelining parameters, the client's announced identity, and where the
//! finished file is written.

use std::{path::PathBuf, time::Duration};

use crate::{PeerId, BLOCK_LEN, MAX_INFLIGHT_BLOCKS};

/// The default client id this crate announces to trackers and peers.
pub const DEFAULT_CLIENT_ID: &PeerId = b"-LC0001-000000000000";

/// The configuration for a single download run.
#[derive(Clone, Debug)]
pub struct Conf {
    /// The ID this client announces to the tracker and to peers.
    ///
    /// Callers that want a genuinely unique ID (recommended: every run
    /// should get a fresh one) should override this with 20 random bytes;
    /// [`DEFAULT_CLIENT_ID`] is provided mainly for tests and quick scripts.
    pub client_id: PeerId,

    /// The directory the finished file is written into.
    pub download_dir: PathBuf,

    /// Overrides the metainfo's suggested file name, if set.
    pub output_name: Option<String>,

    /// The bound on establishing the initial TCP connection to a peer.
    pub connect_timeout: Duration,

    /// The bound on completing the handshake and availability exchange with
    /// a peer, measured from the moment the TCP connection is established.
    pub handshake_timeout: Duration,

    /// The length of a single block request, in bytes. Always [`BLOCK_LEN`]
    /// (16 KiB) except where overridden for testing.
    pub max_block_len: u32,

    /// The number of block requests kept outstanding at once per piece
    /// download.
    pub max_inflight_blocks: usize,
}

impl Conf {
    /// Returns a configuration with reasonable defaults, except for the
    /// download directory, which is not sensible to guess on the caller's
    /// behalf.
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            client_id: *DEFAULT_CLIENT_ID,
            download_dir: download_dir.into(),
            output_name: None,
            // generous but bounded: a dead or firewalled peer shouldn't hang
            // a worker indefinitely
            connect_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(5),
            max_block_len: BLOCK_LEN,
            max_inflight_blocks: MAX_INFLIGHT_BLOCKS,
        }
    }
}

/// Generates a fresh random 20 byte peer ID with the given ASCII prefix.
///
/// Panics if `prefix` is longer than 20 bytes.
pub fn random_peer_id(prefix: &[u8]) -> PeerId {
    use rand::RngCore;
    assert!(prefix.len() <= 20);
    let mut id = [0u8; 20];
    id[..prefix.len()].copy_from_slice(prefix);
    rand::thread_rng().fill_bytes(&mut id[prefix.len()..]);
    id
}
