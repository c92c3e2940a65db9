//! A compact per-piece availability bitmap.
//!
//! Bit `i` (piece `i`) is the bit at position `7 - (i % 8)` of byte `i / 8`,
//! i.e. most-significant-bit first within each byte, matching the wire
//! format of the `Bitfield` and `Have` peer messages.

use crate::error::{Error, Result};
use bitvec::prelude::{BitVec, Msb0};

/// The bitfield type used across the crate: a `bitvec` bit-vector with
/// most-significant-bit-first ordering, backed by a `Vec<u8>`.
pub type Bitfield = BitVec<Msb0, u8>;

/// Returns whether piece `index` is marked available.
///
/// Reaching this with an out-of-range index coming off the wire (a `Have`
/// for a piece index that doesn't exist) is the caller's responsibility to
/// reject with [`Error::MalformedMessage`]; this accessor simply returns
/// `false` for indices past the end of the bitfield, mirroring `bitvec`'s own
/// `get` semantics.
pub fn has(bitfield: &Bitfield, index: usize) -> bool {
    bitfield.get(index).map(|b| *b).unwrap_or(false)
}

/// Sets piece `index` as available.
///
/// # Errors
///
/// Returns [`Error::MalformedMessage`] if `index` is out of range. Callers
/// that already know the index is in range (e.g. after `resize`) may ignore
/// this.
pub fn set(bitfield: &mut Bitfield, index: usize) -> Result<()> {
    if index >= bitfield.len() {
        return Err(Error::MalformedMessage);
    }
    bitfield.set(index, true);
    Ok(())
}

/// Creates an empty bitfield sized for `piece_count` pieces, all pieces
/// marked unavailable.
pub fn empty(piece_count: usize) -> Bitfield {
    bitvec::bitvec![Msb0, u8; 0; piece_count]
}

/// Trims a bitfield received from the wire down to `piece_count` bits.
///
/// The wire representation pads the last byte with zero bits so the
/// bitfield is a whole number of bytes; those padding bits must never be
/// mistaken for real pieces, so every received bitfield is resized to the
/// torrent's logical piece count before being read.
pub fn truncate_padding(bitfield: &mut Bitfield, piece_count: usize) {
    bitfield.resize(piece_count, false);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_has_is_true_others_unchanged() {
        let mut bf = empty(24);
        set(&mut bf, 5).unwrap();
        assert!(has(&bf, 5));
        for i in 0..24 {
            if i != 5 {
                assert!(!has(&bf, i), "piece {} should be unaffected", i);
            }
        }
    }

    #[test]
    fn bit_ordering_matches_wire_format() {
        // 0b1000_0000, 0b0000_0000, 0b0000_0001
        let bytes: Vec<u8> = vec![0x80, 0x00, 0x01];
        let bf: Bitfield = Bitfield::from_vec(bytes);
        assert!(has(&bf, 0));
        assert!(!has(&bf, 1));
        assert!(!has(&bf, 16));
        assert!(has(&bf, 23));
    }

    #[test]
    fn set_out_of_range_is_malformed_message() {
        let mut bf = empty(4);
        assert!(matches!(set(&mut bf, 10), Err(Error::MalformedMessage)));
    }

    #[test]
    fn truncate_padding_drops_trailing_bits() {
        let mut bf: Bitfield = Bitfield::from_vec(vec![0xff]);
        truncate_padding(&mut bf, 5);
        assert_eq!(bf.len(), 5);
        assert!(has(&bf, 4));
    }
}
