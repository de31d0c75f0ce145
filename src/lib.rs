//! QPACK: field compression for HTTP/3 (RFC 9204 family).
//!
//! QPACK compresses header lists across the many concurrent request
//! streams of one QUIC connection. The shared dynamic table is updated on
//! a dedicated encoder stream whose delivery is decoupled from the request
//! streams referencing it, so the encoder manages head-of-line-blocking
//! risk explicitly and the decoder tolerates it by blocking individual
//! streams.
//!
//! The crate is transport-agnostic and single-threaded: the [`Encoder`]
//! writes into caller-provided buffers and suspends on exhaustion, the
//! [`Decoder`] is resumable at every byte boundary and talks to the host
//! through [`DecoderHooks`].
//!
//! # Example
//!
//! ```
//! use quix_qpack::Encoder;
//!
//! let mut encoder = Encoder::new(4096, 16).unwrap();
//! let mut enc_stream = [0u8; 128];
//! let mut block = [0u8; 128];
//!
//! encoder.start_header(0, 0).unwrap();
//! let (enc_n, hea_n) = encoder
//!     .encode(&mut enc_stream, &mut block, b":method", b"GET", false)
//!     .unwrap();
//! assert_eq!(enc_n, 0); // static match, nothing on the encoder stream
//! assert_eq!(hea_n, 1);
//! let mut prefix = [0u8; 16];
//! let n = encoder.end_header(&mut prefix).unwrap();
//! assert_eq!(n, 2);
//! ```

mod blocked;
mod dec_table;
pub mod decoder;
mod enc_stream;
mod enc_table;
pub mod encoder;
pub mod error;
pub mod field;
mod header_block;
pub mod huffman;
pub mod integer;
pub mod static_table;

pub use decoder::{Decoder, DecoderHooks};
pub use encoder::Encoder;
pub use error::{Error, Result};
pub use field::{Header, HeaderList};

/// Largest dynamic table capacity either side accepts.
pub const MAX_DYN_TABLE_SIZE: usize = (1 << 24) - 1;

/// Upper bound on the configured blocked/risked stream budget.
pub const MAX_RISKED_STREAMS_LIMIT: usize = (1 << 16) - 1;

/// Absolute IDs are 62-bit and never reused within a connection.
pub const MAX_ABS_ID: u64 = (1u64 << 62) - 1;
