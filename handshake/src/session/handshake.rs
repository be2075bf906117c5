//! Bitcoin p2p protocol version handshake pieces.
//!
//! The state machine tracking handshake progress, the `version` payload, and
//! the clock and nonce sources it is built from.

use super::configuration::SessionConfiguration;
use crate::codec::CodecError;
use bitcoin::consensus::encode;
use bitcoin::p2p::address::Address;
use bitcoin::p2p::message_network::VersionMessage;
use bitcoin::p2p::ServiceFlags;
use log::debug;
use std::time::{SystemTime, UNIX_EPOCH};

/// Gets the current Unix timestamp (seconds since January 1, 1970 00:00:00 UTC).
///
/// A clock set before the epoch yields 0.
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

/// Generates a random 64-bit nonce for the version message.
///
/// Drawn from the thread local CSPRNG. Peers use it to detect connections to
/// themselves.
pub fn generate_nonce() -> u64 {
    rand::random()
}

/// State machine for tracking handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Transport is up, nothing sent yet.
    Connecting,
    /// Sent version message, but haven't received anything yet.
    VersionSent,
    /// Received the peer's version message (and sent verack), but no verack response yet.
    VersionReceived,
    /// Received a verack, but no version message yet.
    VerackReceived,
    /// Both version and verack received - handshake complete.
    Complete,
}

impl HandshakeState {
    /// Our version message went out.
    pub fn on_version_sent(self) -> Self {
        match self {
            HandshakeState::Connecting => HandshakeState::VersionSent,
            _ => self,
        }
    }

    /// The peer's version message arrived.
    pub fn on_version_received(self) -> Self {
        match self {
            HandshakeState::VersionSent => HandshakeState::VersionReceived,
            HandshakeState::VerackReceived => HandshakeState::Complete,
            _ => {
                debug!("Received version message in state {self:?}, state unchanged");
                self
            }
        }
    }

    /// The peer's verack arrived.
    pub fn on_verack_received(self) -> Self {
        match self {
            HandshakeState::VersionSent => HandshakeState::VerackReceived,
            HandshakeState::VersionReceived => HandshakeState::Complete,
            _ => {
                debug!("Received verack message in state {self:?}, state unchanged");
                self
            }
        }
    }
}

/// Zeroed placeholder for the address fields of our version message.
fn unspecified_address() -> Address {
    Address {
        services: ServiceFlags::NONE,
        address: [0; 8],
        port: 0,
    }
}

/// Contents of a `version` message.
///
/// The wire layout (all integers little-endian):
///
/// ```text
/// version (u32) | services (u64) | timestamp (i64) | addr_recv (26) | addr_from (26)
/// nonce (u64) | user agent (var str) | start height (i32) | relay (u8)
/// ```
///
/// Serialization is bitcoin consensus encoding of [`VersionMessage`]. We send
/// both addresses zeroed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPayload {
    message: VersionMessage,
}

impl VersionPayload {
    /// Builds our version payload from the session configuration.
    ///
    /// # Arguments
    ///
    /// * `configuration` - Supplies the protocol version, services, user agent,
    ///   start height and relay flag.
    /// * `timestamp` - Unix time in seconds, usually [`unix_timestamp`].
    /// * `nonce` - Random value, usually [`generate_nonce`].
    pub fn new(configuration: &SessionConfiguration, timestamp: i64, nonce: u64) -> Self {
        Self {
            message: VersionMessage {
                version: configuration.protocol_version,
                services: configuration.services,
                timestamp,
                receiver: unspecified_address(),
                sender: unspecified_address(),
                nonce,
                user_agent: configuration.user_agent.as_str().to_string(),
                start_height: configuration.start_height,
                relay: configuration.relay,
            },
        }
    }

    pub fn version(&self) -> u32 {
        self.message.version
    }

    pub fn services(&self) -> ServiceFlags {
        self.message.services
    }

    pub fn timestamp(&self) -> i64 {
        self.message.timestamp
    }

    pub fn nonce(&self) -> u64 {
        self.message.nonce
    }

    pub fn user_agent(&self) -> &str {
        &self.message.user_agent
    }

    pub fn start_height(&self) -> i32 {
        self.message.start_height
    }

    pub fn relay(&self) -> bool {
        self.message.relay
    }

    pub fn as_message(&self) -> &VersionMessage {
        &self.message
    }

    pub fn into_message(self) -> VersionMessage {
        self.message
    }

    /// Serializes the payload for the body of a `version` frame.
    ///
    /// # Returns
    ///
    /// 85 bytes plus the user agent and its length prefix.
    pub fn encode(&self) -> Vec<u8> {
        encode::serialize(&self.message)
    }

    /// Parses a version payload sent by a peer.
    ///
    /// Trailing bytes from newer protocol versions are ignored. The relay
    /// byte is required.
    ///
    /// # Arguments
    ///
    /// * `bytes` - The payload of a `version` frame.
    ///
    /// # Errors
    ///
    /// [`CodecError::MalformedPayload`] if a field is cut short or the user
    /// agent is not valid UTF-8.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (message, consumed) = encode::deserialize_partial::<VersionMessage>(bytes)?;
        if consumed < bytes.len() {
            debug!(
                "Ignoring {} trailing bytes of version payload",
                bytes.len() - consumed
            );
        }
        Ok(Self { message })
    }
}

impl From<VersionMessage> for VersionPayload {
    fn from(message: VersionMessage) -> Self {
        Self { message }
    }
}
