//! Bencode decoding of a single-file torrent's metainfo ("`.torrent`") file.
//!
//! Multi-file torrents are out of scope (see the crate's non-goals): the
//! `info` dictionary is expected to describe exactly one file, via the
//! `length` key rather than a `files` list.

use crate::{error::Error, error::Result, PieceIndex, Sha1Hash};
use sha1::{Digest, Sha1};

/// A decoded, validated metainfo file.
#[derive(Debug, Deserialize)]
pub struct Metainfo {
    /// The tracker's announce URL.
    pub announce: String,
    pub info: Info,
}

/// The `info` dictionary of a single-file torrent.
#[derive(Debug, Serialize, Deserialize)]
pub struct Info {
    /// The suggested name of the downloaded file.
    pub name: String,
    /// The concatenation of each piece's 20 byte SHA-1 hash.
    #[serde(with = "serde_bytes")]
    pub pieces: Vec<u8>,
    /// The nominal length of a piece, in bytes. Only the last piece may be
    /// shorter.
    #[serde(rename = "piece length")]
    pub piece_length: u32,
    /// The length of the file, in bytes.
    pub length: u64,
}

impl Metainfo {
    /// Parses and validates a metainfo file from its bencoded bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bencode`] if the bytes aren't a valid bencoded
    /// dictionary matching this shape, and [`Error::MetainfoInvalid`] if the
    /// decoded values don't satisfy the piece-count invariant below.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let metainfo: Self = serde_bencode::from_bytes(buf)?;
        metainfo.validate()?;
        Ok(metainfo)
    }

    /// Checks that `ceil(length / piece_length) == piece_hashes.len()` and
    /// that the piece length is non-zero.
    fn validate(&self) -> Result<()> {
        if self.info.piece_length == 0 {
            return Err(Error::MetainfoInvalid(
                "piece length must be non-zero".into(),
            ));
        }
        if self.info.pieces.len() % 20 != 0 {
            return Err(Error::MetainfoInvalid(
                "pieces string length is not a multiple of 20".into(),
            ));
        }
        let expected_piece_count = self.piece_count();
        let actual_piece_count = self.info.pieces.len() / 20;
        if expected_piece_count != actual_piece_count {
            return Err(Error::MetainfoInvalid(format!(
                "expected {} pieces from file length but pieces string has {}",
                expected_piece_count, actual_piece_count
            )));
        }
        Ok(())
    }

    /// Computes the info hash: the SHA-1 digest of the bencoded `info`
    /// sub-dictionary, re-serialized from the decoded struct (rather than
    /// sliced from the original bytes).
    pub fn info_hash(&self) -> Result<Sha1Hash> {
        let info = serde_bencode::to_bytes(&self.info)?;
        let digest = Sha1::digest(&info);
        let mut info_hash = [0; 20];
        info_hash.copy_from_slice(&digest);
        Ok(info_hash)
    }

    /// Returns the number of pieces implied by the file and piece lengths.
    pub fn piece_count(&self) -> usize {
        let piece_length = self.info.piece_length as u64;
        ((self.info.length + piece_length - 1) / piece_length) as usize
    }

    /// Splits the concatenated pieces string into one 20 byte SHA-1 hash per
    /// piece, in piece order.
    pub fn piece_hashes(&self) -> Vec<Sha1Hash> {
        self.info
            .pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect()
    }

    /// Returns the actual byte length of the piece at `index`: the nominal
    /// `piece_length` for every piece but the last, and the remainder for
    /// the last piece.
    pub fn piece_len(&self, index: PieceIndex) -> Result<u32> {
        let piece_count = self.piece_count();
        if index >= piece_count {
            return Err(Error::InvalidPieceIndex);
        }
        if index == piece_count - 1 {
            let full_pieces = (piece_count - 1) as u64 * self.info.piece_length as u64;
            Ok((self.info.length - full_pieces) as u32)
        } else {
            Ok(self.info.piece_length)
        }
    }
}
