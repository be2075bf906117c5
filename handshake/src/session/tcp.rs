//! TCP-specific sessions.

use super::{Phase, Session, SessionConfiguration, SessionError};
use crate::peer::Peer;
use bitcoin::Network;
use log::{debug, info};
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// A session over a TCP stream.
///
/// The read half is buffered since every frame is read as a header and a
/// payload in two steps.
pub type TcpSession = Session<BufReader<OwnedReadHalf>, OwnedWriteHalf>;

/// Helper function to establish TCP connection with timeout and nodelay.
async fn establish_tcp_connection(
    address: &str,
    timeout: Duration,
) -> Result<TcpStream, SessionError> {
    let stream = connect_within(timeout, TcpStream::connect(address)).await?;
    // No delay is helpful for the small packets of the bitcoin p2p protocol.
    stream.set_nodelay(true).map_err(SessionError::Connect)?;
    Ok(stream)
}

/// Bounds a connection attempt by `timeout`.
///
/// # Errors
///
/// * [`SessionError::Timeout`] with [`Phase::Connect`] if the attempt is still
///   pending after `timeout`.
/// * [`SessionError::Connect`] if the attempt itself fails.
async fn connect_within<F, T>(timeout: Duration, connect: F) -> Result<T, SessionError>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(timeout, connect).await {
        Ok(result) => result.map_err(SessionError::Connect),
        Err(_) => Err(SessionError::Timeout(Phase::Connect)),
    }
}

impl TcpSession {
    /// Open a TCP connection to a bitcoin node.
    ///
    /// The handshake has not started when this returns, drive it with
    /// [`Session::run`] or [`Session::run_until`].
    ///
    /// # Arguments
    ///
    /// * `address` - A `host:port` string, resolved through the system resolver.
    /// * `network` - The bitcoin [`Network`] the node is on.
    /// * `configuration` - Configuration for the session.
    ///
    /// # Errors
    ///
    /// * [`SessionError::Connect`] if the address does not resolve or the
    ///   node refuses the connection.
    /// * [`SessionError::Timeout`] with [`Phase::Connect`] if the attempt
    ///   exceeds [`SessionConfiguration::connection_timeout`].
    pub async fn connect(
        address: &str,
        network: Network,
        configuration: SessionConfiguration,
    ) -> Result<Self, SessionError> {
        debug!("Connecting to {address} on {network}");
        let stream = establish_tcp_connection(address, configuration.connection_timeout).await?;
        match stream.peer_addr() {
            Ok(resolved) => info!("Connected to {address} ({resolved})"),
            Err(_) => info!("Connected to {address}"),
        }

        let (reader, writer) = stream.into_split();
        Ok(Session::new(
            Peer::new(address),
            network,
            configuration,
            BufReader::new(reader),
            writer,
        ))
    }
}
