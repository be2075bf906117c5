//! Bitcoin p2p wire framing.
//!
//! Every message on the wire is a fixed 24 byte header followed by a
//! variable length payload.
//!
//! ```text
//! +------------+--------------+---------------+--------------+
//! | magic (4)  | command (12) | length (4 LE) | checksum (4) |
//! +------------+--------------+---------------+--------------+
//! | payload (length bytes)                              ...  |
//! +-----------------------------------------------------------+
//! ```
//!
//! The checksum is the first four bytes of `SHA256(SHA256(payload))`.
//!
//! The codec knows nothing about the handshake. It does not reject a
//! foreign network magic and it does not verify checksums on the read
//! path; both are left to the caller (see [`Message::verify_checksum`]).
//!
//! # Example
//!
//! ```
//! use bitcoin::p2p::Magic;
//! use bitcoin_handshake::codec::{self, Command};
//!
//! let bytes = codec::encode(Magic::REGTEST, &Command::VERACK, &[]);
//! let header = codec::decode_header(&bytes[..codec::HEADER_SIZE]).unwrap();
//! assert_eq!(header.command, Command::VERACK);
//! assert_eq!(header.length, 0);
//! ```

mod io;
mod message;

pub use io::{read_message, try_read_message, write_message};
pub use message::{checksum, decode_header, encode, Command, Header, Message};

use bitcoin::consensus::encode;
use std::error::Error;
use std::fmt;

/// Size of a bitcoin message header in bytes.
pub const HEADER_SIZE: usize = 24;
/// Size of the zero padded command field.
pub const COMMAND_SIZE: usize = 12;
/// Offset in the header where the command field starts.
const COMMAND_OFFSET: usize = 4;
/// Offset in the header where the payload length is stored.
const PAYLOAD_LENGTH_OFFSET: usize = 16;
/// Offset in the header where the checksum is stored.
const CHECKSUM_OFFSET: usize = 20;

/// Largest payload the codec is willing to allocate for.
///
/// Matches the serialization limit of bitcoin core (`MAX_SIZE`).
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

/// Which part of a frame was being read when a read failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPhase {
    /// The fixed 24 byte header.
    Header,
    /// The payload announced by the header.
    Payload,
}

impl fmt::Display for ReadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadPhase::Header => write!(f, "header"),
            ReadPhase::Payload => write!(f, "payload"),
        }
    }
}

/// Errors produced while encoding or decoding wire messages.
#[derive(Debug)]
pub enum CodecError {
    /// The header is not exactly 24 bytes.
    MalformedHeader(&'static str),
    /// Command names are limited to 12 bytes.
    CommandTooLong(usize),
    /// Command names must be ASCII without NUL bytes.
    InvalidCommand,
    /// The header announces a payload larger than [`MAX_PAYLOAD_SIZE`].
    PayloadTooLarge { size: usize, max: usize },
    /// The stream ended or failed before the requested bytes arrived.
    TruncatedRead { phase: ReadPhase, source: std::io::Error },
    /// The checksum in the header does not match the payload.
    ChecksumMismatch { expected: [u8; 4], actual: [u8; 4] },
    /// A command specific payload could not be parsed.
    MalformedPayload(encode::Error),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::MalformedHeader(reason) => write!(f, "Malformed message header: {reason}"),
            CodecError::CommandTooLong(len) => {
                write!(f, "Command is {len} bytes, limit is {COMMAND_SIZE}")
            }
            CodecError::InvalidCommand => write!(f, "Command must be ASCII"),
            CodecError::PayloadTooLarge { size, max } => {
                write!(f, "Payload of {size} bytes exceeds limit of {max} bytes")
            }
            CodecError::TruncatedRead { phase, source } => {
                write!(f, "Truncated read of message {phase}: {source}")
            }
            CodecError::ChecksumMismatch { expected, actual } => write!(
                f,
                "Checksum mismatch: header has {:02x?}, payload hashes to {:02x?}",
                expected, actual
            ),
            CodecError::MalformedPayload(e) => write!(f, "Malformed payload: {e}"),
        }
    }
}

impl From<encode::Error> for CodecError {
    fn from(e: encode::Error) -> Self {
        CodecError::MalformedPayload(e)
    }
}

impl Error for CodecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CodecError::TruncatedRead { source, .. } => Some(source),
            CodecError::MalformedPayload(e) => Some(e),
            _ => None,
        }
    }
}
