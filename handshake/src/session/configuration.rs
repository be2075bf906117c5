//! Session configuration types and constants.

use crate::peer::PROTOCOL_VERSION;
use crate::user_agent::UserAgent;
use bitcoin::p2p::ServiceFlags;
use std::fmt;
use std::time::Duration;

/// Default timeout for connection establishment.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// How much of an inbound message is checked before it is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Reject messages with a foreign network magic or a bad checksum.
    Strict,
    /// Dispatch every message that frames correctly.
    Permissive,
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verification::Strict => write!(f, "Strict"),
            Verification::Permissive => write!(f, "Permissive"),
        }
    }
}

/// Configuration used to build a session.
#[derive(Debug, Clone)]
pub struct SessionConfiguration {
    /// Protocol version advertised in the version message.
    pub protocol_version: u32,
    /// Service flags advertised in the version message.
    pub services: ServiceFlags,
    /// User agent advertised in the version message.
    pub user_agent: UserAgent,
    /// Block height advertised in the version message.
    pub start_height: i32,
    /// Whether the peer should relay transactions to us.
    pub relay: bool,
    /// Receive side checks.
    pub verification: Verification,
    /// Timeout for connection establishment.
    pub connection_timeout: Duration,
    /// Limit for a single message read. `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Limit for a single message write. `None` waits forever.
    pub write_timeout: Option<Duration>,
}

impl SessionConfiguration {
    /// Creates the default configuration.
    ///
    /// Advertises protocol version 70016, the `NETWORK` service bit, user agent
    /// `/my-client:0.1/`, start height 0 and no relay. Inbound messages are
    /// strictly verified and reads and writes never time out.
    pub fn new() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            services: ServiceFlags::NETWORK,
            user_agent: UserAgent::default(),
            start_height: 0,
            relay: false,
            verification: Verification::Strict,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// Set the user agent advertised in the version message.
    pub fn with_user_agent(mut self, user_agent: UserAgent) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// Set the receive side checks.
    pub fn with_verification(mut self, verification: Verification) -> Self {
        self.verification = verification;
        self
    }

    /// Set the timeout for connection establishment.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use bitcoin_handshake::SessionConfiguration;
    ///
    /// let config = SessionConfiguration::new().with_connection_timeout(Duration::from_secs(30));
    /// assert_eq!(config.connection_timeout, Duration::from_secs(30));
    /// ```
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Bound every message read by `timeout`.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Bound every message write by `timeout`.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }
}

impl Default for SessionConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionConfiguration {{ protocol: {}, user_agent: \"{}\", services: {}, start_height: {}, relay: {}, verification: {} }}",
            self.protocol_version,
            self.user_agent,
            self.services,
            self.start_height,
            self.relay,
            self.verification
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfiguration::default();
        assert_eq!(config.protocol_version, 70016);
        assert_eq!(config.services.to_u64(), 1);
        assert_eq!(config.user_agent.as_str(), "/my-client:0.1/");
        assert_eq!(config.start_height, 0);
        assert!(!config.relay);
        assert_eq!(config.verification, Verification::Strict);
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
        assert!(config.read_timeout.is_none());
        assert!(config.write_timeout.is_none());
    }

    #[test]
    fn test_builders() {
        let user_agent = UserAgent::from_name_version("test", "1.0").unwrap();
        let config = SessionConfiguration::new()
            .with_user_agent(user_agent.clone())
            .with_verification(Verification::Permissive)
            .with_read_timeout(Duration::from_secs(5))
            .with_write_timeout(Duration::from_secs(6));

        assert_eq!(config.user_agent, user_agent);
        assert_eq!(config.verification, Verification::Permissive);
        assert_eq!(config.read_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.write_timeout, Some(Duration::from_secs(6)));
    }
}
