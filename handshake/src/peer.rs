//! What a session knows about the remote node.

use crate::user_agent::UserAgent;
use bitcoin::p2p::ServiceFlags;
use std::fmt;

/// Protocol version this client advertises.
///
/// 70016 is the version of Bitcoin Core 0.21.0 (BIP-339 wtxid relay).
pub const PROTOCOL_VERSION: u32 = 70016;

/// Represents the service state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerServices {
    /// Known services with specific ServiceFlags.
    Known(ServiceFlags),
    /// Unknown services state.
    Unknown,
}

/// Represents the protocol version of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerProtocolVersion {
    /// Known protocol version.
    Known(u32),
    /// Unknown protocol version.
    Unknown,
}

/// Represents the bitcoin node on the other end of a session.
///
/// Starts out with only the address known, the rest is filled in from the
/// peer's `version` message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    /// The address the session was opened with.
    pub address: String,
    /// The service flags advertised by the peer.
    pub services: PeerServices,
    /// The protocol version of the peer.
    pub version: PeerProtocolVersion,
    /// The user agent the peer announced.
    pub user_agent: Option<UserAgent>,
}

impl Peer {
    /// Create a new peer with unknown services and version.
    pub fn new(address: impl Into<String>) -> Self {
        Peer {
            address: address.into(),
            services: PeerServices::Unknown,
            version: PeerProtocolVersion::Unknown,
            user_agent: None,
        }
    }

    /// Checks if the peer advertises the specified service.
    pub fn has_service(&self, service: ServiceFlags) -> bool {
        match self.services {
            PeerServices::Known(flags) => flags.has(service),
            PeerServices::Unknown => false,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ([peer] services: {}, version: {}, user agent: {})",
            self.address,
            match self.services {
                PeerServices::Known(flags) => flags.to_string(),
                PeerServices::Unknown => "unknown".to_string(),
            },
            match self.version {
                PeerProtocolVersion::Known(v) => v.to_string(),
                PeerProtocolVersion::Unknown => "unknown".to_string(),
            },
            match &self.user_agent {
                Some(user_agent) => user_agent.as_str(),
                None => "unknown",
            }
        )
    }
}
