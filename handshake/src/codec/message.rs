//! Message and header types, plus the pure encode/decode functions.

use super::{
    CodecError, CHECKSUM_OFFSET, COMMAND_OFFSET, COMMAND_SIZE, HEADER_SIZE,
    PAYLOAD_LENGTH_OFFSET,
};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::p2p::Magic;
use std::borrow::Cow;
use std::fmt;

/// Computes the message checksum: the first four bytes of `SHA256(SHA256(payload))`.
///
/// # Arguments
///
/// * `payload` - The message body, possibly empty.
///
/// # Returns
///
/// `5d f6 e0 e2` for an empty payload.
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let hash = sha256d::Hash::hash(payload).to_byte_array();
    [hash[0], hash[1], hash[2], hash[3]]
}

/// A bitcoin p2p command name such as `version` or `verack`.
///
/// Commands built locally are at most 12 ASCII bytes, without NUL bytes
/// since those are used as padding in the fixed width wire field. A peer may
/// send a field that breaks these rules; it is kept as an unrecognized
/// command which never equals a well formed one, so it never reaches a
/// handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(Name);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Name {
    Valid(Cow<'static, str>),
    /// Raw wire field plus its escaped rendering.
    Unrecognized {
        field: [u8; COMMAND_SIZE],
        escaped: String,
    },
}

impl Command {
    /// The `version` command which opens the handshake.
    pub const VERSION: Command = Command::from_static("version");
    /// The `verack` command which acknowledges a `version`.
    pub const VERACK: Command = Command::from_static("verack");

    /// Creates a command from a literal, checked at compile time when used in a const.
    ///
    /// # Panics
    ///
    /// If `name` is longer than 12 bytes or contains non-ASCII or NUL bytes.
    pub const fn from_static(name: &'static str) -> Self {
        let bytes = name.as_bytes();
        assert!(bytes.len() <= COMMAND_SIZE, "command longer than 12 bytes");
        let mut i = 0;
        while i < bytes.len() {
            assert!(
                bytes[i].is_ascii() && bytes[i] != 0,
                "command must be ASCII without NUL bytes"
            );
            i += 1;
        }
        Command(Name::Valid(Cow::Borrowed(name)))
    }

    /// Creates a command from a runtime string.
    ///
    /// # Arguments
    ///
    /// * `name` - The command name, for example `"ping"`.
    ///
    /// # Errors
    ///
    /// * [`CodecError::CommandTooLong`] if `name` is longer than 12 bytes.
    /// * [`CodecError::InvalidCommand`] if `name` has non-ASCII or NUL bytes.
    pub fn new(name: &str) -> Result<Self, CodecError> {
        if name.len() > COMMAND_SIZE {
            return Err(CodecError::CommandTooLong(name.len()));
        }
        if !name.bytes().all(|b| b.is_ascii() && b != 0) {
            return Err(CodecError::InvalidCommand);
        }
        Ok(Command(Name::Valid(Cow::Owned(name.to_owned()))))
    }

    /// The command name.
    ///
    /// For an unrecognized wire field this is the field up to its trailing
    /// padding, with non-printable bytes escaped (`abc\x00def`).
    pub fn as_str(&self) -> &str {
        match &self.0 {
            Name::Valid(name) => name.as_ref(),
            Name::Unrecognized { escaped, .. } => escaped.as_str(),
        }
    }

    /// Whether the command is zero padded ASCII without NUL bytes.
    pub fn is_well_formed(&self) -> bool {
        matches!(self.0, Name::Valid(_))
    }

    /// The command right padded with zero bytes to the 12 byte wire field.
    ///
    /// An unrecognized command returns the field exactly as it was received.
    pub fn to_bytes(&self) -> [u8; COMMAND_SIZE] {
        match &self.0 {
            Name::Valid(name) => {
                let mut field = [0u8; COMMAND_SIZE];
                let name = name.as_bytes();
                field[..name.len()].copy_from_slice(name);
                field
            }
            Name::Unrecognized { field, .. } => *field,
        }
    }

    /// Recovers a command from the 12 byte wire field by stripping the trailing padding.
    fn from_field(field: [u8; COMMAND_SIZE]) -> Self {
        let end = field.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        let valid = std::str::from_utf8(&field[..end])
            .ok()
            .and_then(|name| Command::new(name).ok());

        valid.unwrap_or_else(|| {
            Command(Name::Unrecognized {
                field,
                escaped: field[..end].escape_ascii().to_string(),
            })
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parsed fixed size prefix of a wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Network magic, not checked against any expected value.
    pub magic: Magic,
    pub command: Command,
    /// Payload length in bytes.
    pub length: u32,
    /// Checksum as sent by the peer, not verified.
    pub checksum: [u8; 4],
}

/// Decodes a 24 byte message header.
///
/// Any magic value is accepted. Trailing zero bytes of the command field are
/// stripped; a field that is not zero padded ASCII decodes to an
/// unrecognized [`Command`] rather than an error.
///
/// # Arguments
///
/// * `bytes` - The header, exactly [`HEADER_SIZE`] bytes.
///
/// # Errors
///
/// [`CodecError::MalformedHeader`] if `bytes` is not exactly 24 bytes long.
pub fn decode_header(bytes: &[u8]) -> Result<Header, CodecError> {
    if bytes.len() != HEADER_SIZE {
        return Err(CodecError::MalformedHeader("header must be exactly 24 bytes"));
    }

    let magic = Magic::from_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let mut field = [0u8; COMMAND_SIZE];
    field.copy_from_slice(&bytes[COMMAND_OFFSET..PAYLOAD_LENGTH_OFFSET]);
    let command = Command::from_field(field);
    let length = u32::from_le_bytes([
        bytes[PAYLOAD_LENGTH_OFFSET],
        bytes[PAYLOAD_LENGTH_OFFSET + 1],
        bytes[PAYLOAD_LENGTH_OFFSET + 2],
        bytes[PAYLOAD_LENGTH_OFFSET + 3],
    ]);
    let checksum = [
        bytes[CHECKSUM_OFFSET],
        bytes[CHECKSUM_OFFSET + 1],
        bytes[CHECKSUM_OFFSET + 2],
        bytes[CHECKSUM_OFFSET + 3],
    ];

    Ok(Header {
        magic,
        command,
        length,
        checksum,
    })
}

/// Encodes a complete frame: header followed by payload.
///
/// The length and checksum are always computed from `payload`.
///
/// # Arguments
///
/// * `magic` - Network magic of the frame.
/// * `command` - Command name, padded to 12 bytes on the wire.
/// * `payload` - Message body, may be empty.
///
/// # Returns
///
/// The 24 byte header followed by `payload`.
///
/// # Panics
///
/// If `payload` is longer than `u32::MAX` bytes, which the length field
/// cannot express.
pub fn encode(magic: Magic, command: &Command, payload: &[u8]) -> Vec<u8> {
    frame(magic, command, checksum(payload), payload)
}

fn frame(magic: Magic, command: &Command, checksum: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&magic.to_bytes());
    bytes.extend_from_slice(&command.to_bytes());
    bytes.extend_from_slice(&wire_length(payload.len()).to_le_bytes());
    bytes.extend_from_slice(&checksum);
    bytes.extend_from_slice(payload);
    bytes
}

/// Converts a payload length to the 4 byte header field.
///
/// # Panics
///
/// If `len` does not fit in a `u32`.
fn wire_length(len: usize) -> u32 {
    match u32::try_from(len) {
        Ok(len) => len,
        Err(_) => panic!("payload of {len} bytes exceeds the u32 length field"),
    }
}

/// A bitcoin p2p wire message.
///
/// The declared length always equals the payload length. Messages built with
/// [`Message::new`] carry a freshly computed checksum, decoded messages carry
/// whatever the peer sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    magic: Magic,
    command: Command,
    checksum: [u8; 4],
    payload: Vec<u8>,
}

impl Message {
    /// Creates an outbound message, computing its checksum.
    ///
    /// # Panics
    ///
    /// If `payload` is longer than `u32::MAX` bytes.
    pub fn new(magic: Magic, command: Command, payload: Vec<u8>) -> Self {
        wire_length(payload.len());
        Self {
            magic,
            checksum: checksum(&payload),
            command,
            payload,
        }
    }

    /// Joins a decoded header with the payload read after it.
    pub(super) fn from_parts(header: Header, payload: Vec<u8>) -> Self {
        debug_assert_eq!(header.length as usize, payload.len());
        Self {
            magic: header.magic,
            command: header.command,
            checksum: header.checksum,
            payload,
        }
    }

    pub fn magic(&self) -> Magic {
        self.magic
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Payload length as it appears in the header.
    pub fn length(&self) -> u32 {
        wire_length(self.payload.len())
    }

    pub fn checksum(&self) -> [u8; 4] {
        self.checksum
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Checks the carried checksum against the payload.
    ///
    /// # Errors
    ///
    /// [`CodecError::ChecksumMismatch`] if they differ.
    pub fn verify_checksum(&self) -> Result<(), CodecError> {
        let actual = checksum(&self.payload);
        if actual != self.checksum {
            return Err(CodecError::ChecksumMismatch {
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }

    /// Serializes the message exactly as it would appear on the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        frame(self.magic, &self.command, self.checksum, &self.payload)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bytes, magic {})",
            self.command,
            self.payload.len(),
            self.magic
        )
    }
}
