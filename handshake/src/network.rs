//! Selection of the bitcoin network a session speaks on.

use bitcoin::p2p::Magic;
use bitcoin::Network;
use std::fmt;

/// Network names accepted by [`parse_network`].
pub const NETWORK_NAMES: [&str; 4] = ["mainnet", "testnet", "regtest", "signet"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The name is not one of [`NETWORK_NAMES`].
    Unknown(String),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::Unknown(name) => write!(
                f,
                "Unknown network '{name}', expected one of: {}",
                NETWORK_NAMES.join(", ")
            ),
        }
    }
}

impl std::error::Error for NetworkError {}

/// Parses a network name.
///
/// `bitcoin` is accepted as an alias of `mainnet`. Names are case insensitive.
///
/// # Example
///
/// ```
/// use bitcoin::Network;
/// use bitcoin_handshake::network::parse_network;
///
/// assert_eq!(parse_network("regtest").unwrap(), Network::Regtest);
/// assert!(parse_network("testnet4").is_err());
/// ```
pub fn parse_network(name: &str) -> Result<Network, NetworkError> {
    match name.to_ascii_lowercase().as_str() {
        "mainnet" | "bitcoin" => Ok(Network::Bitcoin),
        "testnet" => Ok(Network::Testnet),
        "regtest" => Ok(Network::Regtest),
        "signet" => Ok(Network::Signet),
        _ => Err(NetworkError::Unknown(name.to_string())),
    }
}

/// Magic bytes for a network name.
pub fn magic_for(name: &str) -> Result<Magic, NetworkError> {
    parse_network(name).map(|network| network.magic())
}
