//! QPACK error types.
//!
//! Fatal protocol errors terminate the connection's codec state; the caller
//! is expected to close the QUIC connection with the matching HTTP/3 error
//! code. Buffer-exhaustion conditions are recoverable: the caller retries
//! the same operation with more room.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Errors surfaced by the encoder and decoder.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// QPACK_DECOMPRESSION_FAILED (0x0200)
    #[error("decompression failed: {0}")]
    DecompressionFailed(&'static str),

    /// QPACK_ENCODER_STREAM_ERROR (0x0201)
    #[error("encoder stream error: {0}")]
    EncoderStreamError(&'static str),

    /// QPACK_DECODER_STREAM_ERROR (0x0202)
    #[error("decoder stream error: {0}")]
    DecoderStreamError(&'static str),

    /// Prefix integer did not fit in 64 bits or ran past the read limit.
    #[error("integer overflow in prefix encoding")]
    IntegerOverflow,

    /// Malformed Huffman sequence or invalid padding.
    #[error("huffman decoding error")]
    HuffmanError,

    /// Static table reference outside 1..=61.
    #[error("invalid static table index {0}")]
    InvalidStaticIndex(u64),

    /// Dynamic table reference to an evicted or never-inserted entry.
    #[error("invalid dynamic table index {0}")]
    InvalidDynamicIndex(u64),

    /// Set Dynamic Table Capacity above the configured maximum.
    #[error("table capacity exceeds configured maximum")]
    TableCapacityExceeded,

    /// Required Insert Count failed RFC 9204 reconstruction.
    #[error("invalid required insert count")]
    InvalidRequiredInsertCount,

    /// A block would block but the blocked-stream budget is spent.
    #[error("blocked stream limit exceeded")]
    BlockedStreamLimitExceeded,

    /// Instruction or block ended mid-field.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Invalid constructor parameter (limit exceeded).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// `start_header` while another header block is open.
    #[error("a header block is already being encoded")]
    HeaderBlockInProgress,

    /// `encode`/`end_header` without an open header block.
    #[error("no header block is being encoded")]
    NoHeaderBlock,

    /// Recoverable: the encoder-stream output buffer cannot hold the
    /// instruction for the current field. Retry with a larger buffer.
    #[error("encoder stream buffer too small")]
    EncoderBufferFull,

    /// Recoverable: the header-block output buffer cannot hold the
    /// representation for the current field. Retry with a larger buffer.
    #[error("header block buffer too small")]
    HeaderBufferFull,

    /// `header_in`/`header_read` for a stream the decoder does not know.
    #[error("unknown stream")]
    UnknownStream,

    /// The host's read callback reported a stream error.
    #[error("header block read failed")]
    ReadError,
}
