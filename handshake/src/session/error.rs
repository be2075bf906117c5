//! Error types for session handling.

use crate::codec::{CodecError, Command};
use bitcoin::p2p::Magic;
use std::error::Error;
use std::fmt;
use std::io;

/// The stage of a session an operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Establishing the transport.
    Connect,
    /// Writing a message.
    Send,
    /// Reading a message.
    Read,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Connect => write!(f, "connect"),
            Phase::Send => write!(f, "send"),
            Phase::Read => write!(f, "read"),
        }
    }
}

/// Errors that end a session.
///
/// A completed handshake is not an error, see
/// [`TerminationReason`](super::TerminationReason).
#[derive(Debug)]
pub enum SessionError {
    /// The transport could not be established.
    Connect(io::Error),
    /// Writing a message to the connection failed.
    Send { command: Command, source: io::Error },
    /// Reading or decoding a message failed, including checksum verification.
    Read(CodecError),
    /// A message was tagged with another network's magic.
    MagicMismatch { expected: Magic, actual: Magic },
    /// A message handler refused a message.
    Handler { command: Command, reason: String },
    /// A connect, read or write did not finish within the configured limit.
    Timeout(Phase),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Connect(err) => write!(f, "Failed to connect to node: {err}"),
            SessionError::Send { command, source } => {
                write!(f, "Failed to send {command} message: {source}")
            }
            SessionError::Read(err) => write!(f, "Failed to read message: {err}"),
            SessionError::MagicMismatch { expected, actual } => {
                write!(f, "Network magic mismatch: expected {expected}, got {actual}")
            }
            SessionError::Handler { command, reason } => {
                write!(f, "Failed to handle {command} message: {reason}")
            }
            SessionError::Timeout(phase) => write!(f, "Timed out during {phase}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SessionError::Connect(err) => Some(err),
            SessionError::Send { source, .. } => Some(source),
            SessionError::Read(err) => Some(err),
            SessionError::MagicMismatch { .. } => None,
            SessionError::Handler { .. } => None,
            SessionError::Timeout(_) => None,
        }
    }
}

impl From<CodecError> for SessionError {
    fn from(err: CodecError) -> Self {
        SessionError::Read(err)
    }
}
