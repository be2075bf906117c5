//! Bitcoin p2p protocol session.
//!
//! A [`Session`] owns one connection to a bitcoin node. It opens with our
//! `version` message and then runs a read, dispatch, write cycle: every
//! inbound message is verified, routed by command name to a
//! [`MessageHandler`], and whatever the handler queued on the
//! [`SessionContext`] is written back before the next read. The default
//! handler table answers the peer's `version` with a `verack` and stops the
//! session once the peer's `verack` arrives.
//!
//! # Examples
//!
//! Performing a handshake with a local regtest node.
//!
//! ```no_run
//! use bitcoin::Network;
//! use bitcoin_handshake::{SessionConfiguration, TcpSession, TerminationReason};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = TcpSession::connect(
//!     "127.0.0.1:18444",
//!     Network::Regtest,
//!     SessionConfiguration::new(),
//! )
//! .await?;
//!
//! let reason = session.run().await?;
//! assert_eq!(reason, TerminationReason::HandshakeComplete);
//! # Ok(())
//! # }
//! ```
//!
//! Extending the handler table.
//!
//! ```no_run
//! use bitcoin::Network;
//! use bitcoin_handshake::codec::{Command, Message};
//! use bitcoin_handshake::{
//!     Flow, HandlerRegistry, SessionConfiguration, SessionContext, SessionError, TcpSession,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ping = Command::new("ping")?;
//! let handlers = HandlerRegistry::handshake().with_handler(
//!     ping,
//!     |message: &Message, context: &mut SessionContext| -> Result<Flow, SessionError> {
//!         context.send(Command::new("pong").expect("valid"), message.payload().to_vec());
//!         Ok(Flow::Continue)
//!     },
//! );
//!
//! let session = TcpSession::connect("127.0.0.1:18444", Network::Regtest, SessionConfiguration::new())
//!     .await?
//!     .with_handlers(handlers);
//! session.run().await?;
//! # Ok(())
//! # }
//! ```

mod configuration;
mod error;
mod handler;
mod handshake;
mod tcp;

pub use configuration::{SessionConfiguration, Verification, DEFAULT_CONNECTION_TIMEOUT};
pub use error::{Phase, SessionError};
pub use handler::{
    Flow, HandlerRegistry, MessageHandler, SessionContext, TerminationReason, VerackHandler,
    VersionHandler,
};
pub use handshake::{generate_nonce, unix_timestamp, HandshakeState, VersionPayload};
pub use tcp::TcpSession;

use crate::codec::{try_read_message, write_message, Command, Message};
use crate::peer::Peer;
use bitcoin::Network;
use log::{debug, error, info};
use std::fmt;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// A single connection to a bitcoin node running the version handshake.
///
/// Generic over the byte stream so it runs on TCP (see [`TcpSession`]) as
/// well as on in-memory pipes.
#[derive(Debug)]
pub struct Session<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    configuration: SessionConfiguration,
    network: Network,
    reader: R,
    writer: W,
    handlers: HandlerRegistry,
    context: SessionContext,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap an established byte stream.
    ///
    /// The session starts with the built-in handshake handlers, see
    /// [`HandlerRegistry::handshake`].
    pub fn new(
        peer: Peer,
        network: Network,
        configuration: SessionConfiguration,
        reader: R,
        writer: W,
    ) -> Self {
        Self {
            context: SessionContext::new(network.magic(), peer),
            configuration,
            network,
            reader,
            writer,
            handlers: HandlerRegistry::handshake(),
        }
    }

    /// Replace the handler table.
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// The node on the other end.
    pub fn peer(&self) -> &Peer {
        &self.context.peer
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.context.handshake_state
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn configuration(&self) -> &SessionConfiguration {
        &self.configuration
    }

    /// Run the session until a handler terminates it or it fails.
    ///
    /// Consumes the session; the connection is closed on every exit path.
    ///
    /// # Returns
    ///
    /// * `Ok(`[`TerminationReason`]`)` - The handshake completed or the peer closed the connection.
    /// * `Err(`[`SessionError`]`)` - The first failure, nothing is retried.
    pub async fn run(self) -> Result<TerminationReason, SessionError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Like [`Session::run`], but stops with [`TerminationReason::Shutdown`]
    /// as soon as `shutdown` resolves.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<TerminationReason, SessionError>
    where
        F: Future<Output = ()>,
    {
        let result = tokio::select! {
            result = self.drive() => result,
            _ = shutdown => {
                info!("Shutdown requested");
                Ok(TerminationReason::Shutdown)
            }
        };

        match &result {
            Ok(reason) => info!("Session with {} ended: {reason}", self.context.peer),
            Err(e) => debug!("Session with {} failed: {e}", self.context.peer.address),
        }

        self.close().await;
        result
    }

    async fn drive(&mut self) -> Result<TerminationReason, SessionError> {
        let version = VersionPayload::new(&self.configuration, unix_timestamp(), generate_nonce());
        self.send(Message::new(
            self.context.magic(),
            Command::VERSION,
            version.encode(),
        ))
        .await?;
        self.context.handshake_state = self.context.handshake_state.on_version_sent();
        debug!("Handshake state: {:?}", self.context.handshake_state);

        loop {
            let message = match self.receive().await? {
                Some(message) => message,
                None => {
                    info!("{} closed the connection", self.context.peer.address);
                    return Ok(TerminationReason::PeerClosed);
                }
            };
            self.verify(&message)?;

            let flow = match self.handlers.get_mut(message.command()) {
                Some(handler) => {
                    let flow = handler.handle(&message, &mut self.context)?;
                    debug!("Handshake state: {:?}", self.context.handshake_state);
                    flow
                }
                None => {
                    info!("Ignoring unhandled {} message", message.command());
                    Flow::Continue
                }
            };

            for reply in self.context.take_outbox() {
                self.send(reply).await?;
            }

            if let Flow::Terminate(reason) = flow {
                return Ok(reason);
            }
        }
    }

    async fn receive(&mut self) -> Result<Option<Message>, SessionError> {
        let read = try_read_message(&mut self.reader);
        let message = match self.configuration.read_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| SessionError::Timeout(Phase::Read))??,
            None => read.await?,
        };

        if let Some(message) = &message {
            debug!("Received {message}");
        }
        Ok(message)
    }

    fn verify(&self, message: &Message) -> Result<(), SessionError> {
        if self.configuration.verification == Verification::Permissive {
            return Ok(());
        }

        let expected = self.context.magic();
        if message.magic() != expected {
            error!(
                "Rejecting {} message with magic {}, expected {expected}",
                message.command(),
                message.magic()
            );
            return Err(SessionError::MagicMismatch {
                expected,
                actual: message.magic(),
            });
        }

        message.verify_checksum().map_err(|e| {
            error!("Rejecting {} message: {e}", message.command());
            SessionError::Read(e)
        })
    }

    async fn send(&mut self, message: Message) -> Result<(), SessionError> {
        debug!("Sending {message}");
        let write = write_message(&mut self.writer, &message);
        let result = match self.configuration.write_timeout {
            Some(limit) => tokio::time::timeout(limit, write)
                .await
                .map_err(|_| SessionError::Timeout(Phase::Send))?,
            None => write.await,
        };

        result.map_err(|source| SessionError::Send {
            command: message.command().clone(),
            source,
        })
    }

    /// Shut down the write half and drop both halves.
    async fn close(mut self) {
        let shutdown = self.writer.shutdown();
        let result = match self.configuration.write_timeout {
            Some(limit) => tokio::time::timeout(limit, shutdown)
                .await
                .unwrap_or_else(|_| Ok(())),
            None => shutdown.await,
        };
        if let Err(e) = result {
            debug!("Error shutting down connection: {e}");
        }
    }
}

impl<R, W> fmt::Display for Session<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} session with {} ({:?})",
            self.network, self.context.peer, self.context.handshake_state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode, read_message, CodecError, ReadPhase};
    use crate::peer::{PeerProtocolVersion, PeerServices};
    use crate::user_agent::UserAgent;
    use bitcoin::p2p::{Magic, ServiceFlags};
    use std::time::Duration;
    use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};

    type TestSession = Session<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn session(configuration: SessionConfiguration) -> (TestSession, DuplexStream) {
        session_with_buffer(configuration, 4096)
    }

    fn session_with_buffer(
        configuration: SessionConfiguration,
        max_buf_size: usize,
    ) -> (TestSession, DuplexStream) {
        let (local, remote) = duplex(max_buf_size);
        let (reader, writer) = split(local);
        let session = Session::new(
            Peer::new("127.0.0.1:18444"),
            Network::Regtest,
            configuration,
            reader,
            writer,
        );
        (session, remote)
    }

    fn peer_version(magic: Magic) -> Message {
        let configuration = SessionConfiguration::new()
            .with_user_agent(UserAgent::from_name_version("remote", "27.0").unwrap());
        let payload = VersionPayload::new(&configuration, 1_700_000_000, 42);
        Message::new(magic, Command::VERSION, payload.encode())
    }

    fn verack(magic: Magic) -> Message {
        Message::new(magic, Command::VERACK, Vec::new())
    }

    /// Everything the session wrote, up to the closed connection.
    async fn drain(remote: &mut DuplexStream) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = try_read_message(remote).await.unwrap() {
            messages.push(message);
        }
        messages
    }

    fn commands(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.command().as_str()).collect()
    }

    #[tokio::test]
    async fn test_handshake() {
        let (session, mut remote) = session(SessionConfiguration::new());
        let task = tokio::spawn(session.run());

        let version = read_message(&mut remote).await.unwrap();
        assert_eq!(version.command(), &Command::VERSION);
        assert_eq!(version.magic(), Magic::REGTEST);
        version.verify_checksum().unwrap();

        let payload = VersionPayload::decode(version.payload()).unwrap();
        assert_eq!(payload.version(), 70016);
        assert_eq!(payload.services(), ServiceFlags::NETWORK);
        assert_eq!(payload.user_agent(), "/my-client:0.1/");
        assert_eq!(payload.start_height(), 0);
        assert!(!payload.relay());

        write_message(&mut remote, &peer_version(Magic::REGTEST))
            .await
            .unwrap();
        let ack = read_message(&mut remote).await.unwrap();
        assert_eq!(ack.command(), &Command::VERACK);
        assert!(ack.payload().is_empty());
        assert_eq!(ack.checksum(), [0x5d, 0xf6, 0xe0, 0xe2]);

        write_message(&mut remote, &verack(Magic::REGTEST))
            .await
            .unwrap();
        assert_eq!(
            task.await.unwrap().unwrap(),
            TerminationReason::HandshakeComplete
        );

        // Nothing else was sent and the connection is closed.
        assert!(drain(&mut remote).await.is_empty());
    }

    #[tokio::test]
    async fn test_handshake_records_peer() {
        let (mut session, mut remote) = session(SessionConfiguration::new());
        write_message(&mut remote, &peer_version(Magic::REGTEST))
            .await
            .unwrap();
        write_message(&mut remote, &verack(Magic::REGTEST))
            .await
            .unwrap();

        assert_eq!(
            session.drive().await.unwrap(),
            TerminationReason::HandshakeComplete
        );
        assert_eq!(session.handshake_state(), HandshakeState::Complete);
        assert_eq!(session.peer().version, PeerProtocolVersion::Known(70016));
        assert_eq!(
            session.peer().services,
            PeerServices::Known(ServiceFlags::NETWORK)
        );
        assert_eq!(
            session.peer().user_agent.as_ref().map(|ua| ua.as_str()),
            Some("/remote:27.0/")
        );
    }

    #[tokio::test]
    async fn test_unknown_command_is_skipped() {
        let (session, mut remote) = session(SessionConfiguration::new());
        let unknown = Message::new(
            Magic::REGTEST,
            Command::new("unknown1").unwrap(),
            vec![1, 2, 3, 4],
        );
        write_message(&mut remote, &unknown).await.unwrap();
        write_message(&mut remote, &peer_version(Magic::REGTEST))
            .await
            .unwrap();
        write_message(&mut remote, &verack(Magic::REGTEST))
            .await
            .unwrap();

        assert_eq!(
            session.run().await.unwrap(),
            TerminationReason::HandshakeComplete
        );
        assert_eq!(commands(&drain(&mut remote).await), ["version", "verack"]);
    }

    #[tokio::test]
    async fn test_unrecognized_command_field_is_skipped() {
        // A handler for the name before the embedded NUL must not fire.
        let abc = Command::new("abc").unwrap();
        let handlers = HandlerRegistry::handshake().with_handler(
            abc.clone(),
            move |_: &Message, _: &mut SessionContext| -> Result<Flow, SessionError> {
                Err(SessionError::Handler {
                    command: abc.clone(),
                    reason: "dispatched".to_string(),
                })
            },
        );
        let (session, mut remote) = session(SessionConfiguration::new());
        let session = session.with_handlers(handlers);

        // Command field `abc\0def` plus padding, checksum still valid.
        let mut frame = encode(Magic::REGTEST, &Command::new("abcxdef").unwrap(), &[9; 8]);
        frame[4 + 3] = 0;
        remote.write_all(&frame).await.unwrap();
        write_message(&mut remote, &peer_version(Magic::REGTEST))
            .await
            .unwrap();
        write_message(&mut remote, &verack(Magic::REGTEST))
            .await
            .unwrap();

        assert_eq!(
            session.run().await.unwrap(),
            TerminationReason::HandshakeComplete
        );
        assert_eq!(commands(&drain(&mut remote).await), ["version", "verack"]);
    }

    #[tokio::test]
    async fn test_nothing_read_after_verack() {
        let mut inbound = peer_version(Magic::REGTEST).to_bytes();
        inbound.extend_from_slice(&verack(Magic::REGTEST).to_bytes());
        let handshake_len = inbound.len() as u64;
        let extra = Message::new(Magic::REGTEST, Command::new("ping").unwrap(), vec![0; 8]);
        inbound.extend_from_slice(&extra.to_bytes());

        let mut session = Session::new(
            Peer::new("127.0.0.1:18444"),
            Network::Regtest,
            SessionConfiguration::new(),
            std::io::Cursor::new(inbound),
            Vec::new(),
        );
        assert_eq!(
            session.drive().await.unwrap(),
            TerminationReason::HandshakeComplete
        );

        // The trailing ping is still unread.
        assert_eq!(session.reader.position(), handshake_len);

        let mut written = &session.writer[..];
        let mut sent = Vec::new();
        while let Some(message) = try_read_message(&mut written).await.unwrap() {
            sent.push(message);
        }
        assert_eq!(commands(&sent), ["version", "verack"]);
    }

    #[tokio::test]
    async fn test_verack_without_version_terminates() {
        let (session, mut remote) = session(SessionConfiguration::new());
        write_message(&mut remote, &verack(Magic::REGTEST))
            .await
            .unwrap();

        assert_eq!(
            session.run().await.unwrap(),
            TerminationReason::HandshakeComplete
        );
        assert_eq!(commands(&drain(&mut remote).await), ["version"]);
    }

    #[tokio::test]
    async fn test_strict_rejects_foreign_magic() {
        let (session, mut remote) = session(SessionConfiguration::new());
        write_message(&mut remote, &peer_version(Magic::BITCOIN))
            .await
            .unwrap();

        match session.run().await {
            Err(SessionError::MagicMismatch { expected, actual }) => {
                assert_eq!(expected, Magic::REGTEST);
                assert_eq!(actual, Magic::BITCOIN);
            }
            other => panic!("Expected magic mismatch, got {other:?}"),
        }
        assert_eq!(commands(&drain(&mut remote).await), ["version"]);
    }

    #[tokio::test]
    async fn test_permissive_accepts_foreign_magic() {
        let configuration = SessionConfiguration::new().with_verification(Verification::Permissive);
        let (session, mut remote) = session(configuration);
        write_message(&mut remote, &peer_version(Magic::BITCOIN))
            .await
            .unwrap();
        write_message(&mut remote, &verack(Magic::BITCOIN))
            .await
            .unwrap();

        assert_eq!(
            session.run().await.unwrap(),
            TerminationReason::HandshakeComplete
        );

        // Replies still carry our own magic.
        let sent = drain(&mut remote).await;
        assert_eq!(commands(&sent), ["version", "verack"]);
        assert!(sent.iter().all(|m| m.magic() == Magic::REGTEST));
    }

    fn corrupted_version() -> Vec<u8> {
        let mut bytes = peer_version(Magic::REGTEST).to_bytes();
        bytes[23] ^= 0xff;
        bytes
    }

    #[tokio::test]
    async fn test_strict_rejects_bad_checksum() {
        let (session, mut remote) = session(SessionConfiguration::new());
        remote.write_all(&corrupted_version()).await.unwrap();

        assert!(matches!(
            session.run().await,
            Err(SessionError::Read(CodecError::ChecksumMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_permissive_accepts_bad_checksum() {
        let configuration = SessionConfiguration::new().with_verification(Verification::Permissive);
        let (session, mut remote) = session(configuration);
        remote.write_all(&corrupted_version()).await.unwrap();
        remote
            .write_all(&encode(Magic::REGTEST, &Command::VERACK, &[]))
            .await
            .unwrap();

        assert_eq!(
            session.run().await.unwrap(),
            TerminationReason::HandshakeComplete
        );
    }

    #[tokio::test]
    async fn test_peer_closed() {
        let (session, mut remote) = session(SessionConfiguration::new());
        let task = tokio::spawn(session.run());

        read_message(&mut remote).await.unwrap();
        drop(remote);

        assert_eq!(task.await.unwrap().unwrap(), TerminationReason::PeerClosed);
    }

    #[tokio::test]
    async fn test_truncated_header() {
        let (session, mut remote) = session(SessionConfiguration::new());
        let bytes = verack(Magic::REGTEST).to_bytes();
        remote.write_all(&bytes[..10]).await.unwrap();
        remote.shutdown().await.unwrap();

        assert!(matches!(
            session.run().await,
            Err(SessionError::Read(CodecError::TruncatedRead {
                phase: ReadPhase::Header,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let configuration = SessionConfiguration::new().with_read_timeout(Duration::from_millis(50));
        let (session, _remote) = session(configuration);

        assert!(matches!(
            session.run().await,
            Err(SessionError::Timeout(Phase::Read))
        ));
    }

    #[tokio::test]
    async fn test_write_timeout() {
        // The peer never reads and the pipe holds less than a version message.
        let configuration =
            SessionConfiguration::new().with_write_timeout(Duration::from_millis(50));
        let (session, _remote) = session_with_buffer(configuration, 16);

        assert!(matches!(
            session.run().await,
            Err(SessionError::Timeout(Phase::Send))
        ));
    }

    #[tokio::test]
    async fn test_shutdown() {
        let (session, mut remote) = session(SessionConfiguration::new());

        let reason = session
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(reason, TerminationReason::Shutdown);
        assert_eq!(commands(&drain(&mut remote).await), ["version"]);
    }

    #[tokio::test]
    async fn test_custom_handler() {
        let ping = Command::new("ping").unwrap();
        let pong = Command::new("pong").unwrap();
        let handlers = HandlerRegistry::handshake().with_handler(
            ping.clone(),
            move |message: &Message, context: &mut SessionContext| -> Result<Flow, SessionError> {
                context.send(pong.clone(), message.payload().to_vec());
                Ok(Flow::Continue)
            },
        );

        let (session, mut remote) = session(SessionConfiguration::new());
        let session = session.with_handlers(handlers);

        let nonce = 7u64.to_le_bytes().to_vec();
        write_message(&mut remote, &Message::new(Magic::REGTEST, ping, nonce.clone()))
            .await
            .unwrap();
        write_message(&mut remote, &peer_version(Magic::REGTEST))
            .await
            .unwrap();
        write_message(&mut remote, &verack(Magic::REGTEST))
            .await
            .unwrap();

        assert_eq!(
            session.run().await.unwrap(),
            TerminationReason::HandshakeComplete
        );

        let sent = drain(&mut remote).await;
        assert_eq!(commands(&sent), ["version", "pong", "verack"]);
        assert_eq!(sent[1].payload(), &nonce[..]);
    }

    #[tokio::test]
    async fn test_handler_error_ends_session() {
        let handlers = HandlerRegistry::new().with_handler(
            Command::VERSION,
            |message: &Message, _: &mut SessionContext| -> Result<Flow, SessionError> {
                Err(SessionError::Handler {
                    command: message.command().clone(),
                    reason: "refused".to_string(),
                })
            },
        );
        let (session, mut remote) = session(SessionConfiguration::new());
        let session = session.with_handlers(handlers);
        write_message(&mut remote, &peer_version(Magic::REGTEST))
            .await
            .unwrap();

        match session.run().await {
            Err(SessionError::Handler { command, reason }) => {
                assert_eq!(command, Command::VERSION);
                assert_eq!(reason, "refused");
            }
            other => panic!("Expected handler error, got {other:?}"),
        }
    }

    #[test]
    fn test_display() {
        let (session, _remote) = session(SessionConfiguration::new());
        assert_eq!(
            session.to_string(),
            "regtest session with 127.0.0.1:18444 ([peer] services: unknown, version: unknown, user agent: unknown) (Connecting)"
        );
    }
}
