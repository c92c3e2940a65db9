//! The crate's error taxonomy.
//!
//! Every fallible function in this crate returns [`Result`], which is a thin
//! alias over [`std::result::Result`] with [`Error`] as its error type.

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by this crate's fallible operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The peer's handshake did not have the expected layout (wrong protocol
    /// string length or content).
    #[error("peer handshake malformed")]
    HandshakeMalformed,

    /// The peer's handshake carried an info hash different from ours.
    #[error("peer handshake info hash mismatch")]
    HashMismatch,

    /// The peer violated the expected message ordering (e.g. didn't send a
    /// bitfield as the first post-handshake message).
    #[error("peer violated the wire protocol")]
    ProtocolViolation,

    /// A peer message's framing or payload was invalid.
    #[error("peer sent a malformed message")]
    MalformedMessage,

    /// The connection closed before a fully framed message could be read.
    #[error("short read while framing a peer message")]
    ShortRead,

    /// A piece's downloaded bytes did not hash to the expected value.
    #[error("piece failed hash verification")]
    HashVerificationFailed,

    /// The tracker could not be reached, or responded with a failure.
    #[error("tracker unreachable: {0}")]
    TrackerUnreachable(String),

    /// The metainfo file was structurally invalid (e.g. piece count
    /// disagrees with the file length / piece length).
    #[error("metainfo invalid: {0}")]
    MetainfoInvalid(String),

    /// All workers exited before every piece of the torrent completed.
    #[error("download incomplete: {done}/{total} pieces")]
    IncompleteDownload { done: usize, total: usize },

    /// A piece index outside `0..piece_count` was used.
    #[error("invalid piece index")]
    InvalidPieceIndex,

    /// Wraps I/O errors from the socket, filesystem, or a blocking task join.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Wraps bencode (de)serialization errors from the metainfo or tracker
    /// response decoders.
    #[error(transparent)]
    Bencode(#[from] serde_bencode::Error),
}
