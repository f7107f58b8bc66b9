//! # Codec Module
//!
//! Encoder/decoder pairs for the packed representations found inside the
//! containers: run length encoding and the seven DMS track modes, the
//! classic 4K-ring LZSS used by CopyQM, LZSS with adaptive Huffman coding
//! used by Teledisk advanced compression, Commodore 4-and-5 GCR, and the
//! ZX/Amstrad tape waveform generator.
//!
//! Every decoder is a strict computation over byte buffers.  Codecs that
//! carry state between tracks (rings, trees) own that state in a context
//! struct created once per decode session, so independent sessions never
//! share mutable state.

pub mod rle;
pub mod lzss;
pub mod lzhuf;
pub mod dms;
pub mod gcr;
pub mod tape;

/// Enumerates codec errors.  The `Display` trait will print the equivalent
/// long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("unknown compression mode")]
    BadCompressionMode,
    #[error("invalid GCR group")]
    BadGcr,
    #[error("corrupt Huffman tree")]
    BadHuffmanTree,
    #[error("corrupt run length data")]
    BadRle,
    #[error("unexpected end of coded data")]
    UnexpectedEof,
    #[error("output buffer limit reached")]
    OutputFull,
    #[error("checksum mismatch")]
    Checksum,
    #[error("archive is encrypted, password required")]
    PasswordRequired,
    #[error("password does not match")]
    WrongPassword
}
