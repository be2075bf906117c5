//! User agent validation and utilities for Bitcoin p2p protocol.
//!
//! The user agent is announced in the `version` message. Bitcoin Core and most
//! other implementations follow the `/name:version/` convention.

use std::fmt;

/// The version payload prefixes the user agent with a single length byte.
pub const MAX_USER_AGENT_LENGTH: usize = u8::MAX as usize;

/// Errors that can occur during user agent validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAgentError {
    /// The user agent format is invalid (must be `/name:version/`).
    InvalidFormat,
    /// The name component is missing or empty.
    MissingName,
    /// The version component is missing or empty.
    MissingVersion,
    /// The user agent does not fit the one byte length prefix.
    TooLong(usize),
}

impl fmt::Display for UserAgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserAgentError::InvalidFormat => {
                write!(f, "User agent must follow format '/name:version/'")
            }
            UserAgentError::MissingName => {
                write!(f, "User agent name component cannot be empty")
            }
            UserAgentError::MissingVersion => {
                write!(f, "User agent version component cannot be empty")
            }
            UserAgentError::TooLong(len) => {
                write!(
                    f,
                    "User agent is {len} bytes, limit is {MAX_USER_AGENT_LENGTH}"
                )
            }
        }
    }
}

impl std::error::Error for UserAgentError {}

/// Validates Bitcoin Core-style user agent format: `/name:version/`.
///
/// # Example
///
/// ```
/// use bitcoin_handshake::user_agent::validate_bitcoin_core_format;
///
/// assert!(validate_bitcoin_core_format("/my-client:0.1/").is_ok());
/// assert!(validate_bitcoin_core_format("my-client:0.1").is_err());
/// assert!(validate_bitcoin_core_format("/:0.1/").is_err());
/// ```
pub fn validate_bitcoin_core_format(user_agent: &str) -> Result<(), UserAgentError> {
    if user_agent.len() > MAX_USER_AGENT_LENGTH {
        return Err(UserAgentError::TooLong(user_agent.len()));
    }

    if user_agent.len() < 2 || !user_agent.starts_with('/') || !user_agent.ends_with('/') {
        return Err(UserAgentError::InvalidFormat);
    }

    let contents = &user_agent[1..user_agent.len() - 1];
    let (name, version) = contents
        .split_once(':')
        .ok_or(UserAgentError::InvalidFormat)?;

    if version.contains(':') {
        return Err(UserAgentError::InvalidFormat);
    }
    if name.is_empty() {
        return Err(UserAgentError::MissingName);
    }
    if version.is_empty() {
        return Err(UserAgentError::MissingVersion);
    }

    Ok(())
}

/// Creates a Bitcoin Core-style user agent string.
///
/// ```
/// use bitcoin_handshake::user_agent::bitcoin_core_format;
///
/// assert_eq!(bitcoin_core_format("my-client", "0.1"), "/my-client:0.1/");
/// ```
pub fn bitcoin_core_format(name: &str, version: &str) -> String {
    format!("/{name}:{version}/")
}

/// A validated user agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserAgent(String);

impl UserAgent {
    /// Validates and wraps a user agent string.
    pub fn new(user_agent: impl Into<String>) -> Result<Self, UserAgentError> {
        let user_agent = user_agent.into();
        validate_bitcoin_core_format(&user_agent)?;
        Ok(Self(user_agent))
    }

    /// Builds `/name:version/`.
    pub fn from_name_version(name: &str, version: &str) -> Result<Self, UserAgentError> {
        Self::new(bitcoin_core_format(name, version))
    }

    /// Wraps a string announced by a peer without validating it.
    ///
    /// Peers are free to send anything here, so it is only kept for display.
    pub(crate) fn unchecked(user_agent: String) -> Self {
        Self(user_agent)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UserAgent {
    /// `/my-client:0.1/`
    fn default() -> Self {
        Self("/my-client:0.1/".to_string())
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
