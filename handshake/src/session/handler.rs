//! Command dispatch.
//!
//! Inbound messages are routed by command name to a [`MessageHandler`]. A
//! handler gets the message and a [`SessionContext`], queues any replies on
//! the context, and tells the session whether to keep reading with a [`Flow`].

use super::error::SessionError;
use super::handshake::{HandshakeState, VersionPayload};
use crate::codec::{Command, Message};
use crate::peer::{Peer, PeerProtocolVersion, PeerServices};
use crate::user_agent::UserAgent;
use bitcoin::p2p::Magic;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;

/// Why a session stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The peer acknowledged our version with a verack.
    HandshakeComplete,
    /// The peer closed the connection between two messages.
    PeerClosed,
    /// The caller's shutdown signal fired.
    Shutdown,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::HandshakeComplete => write!(f, "handshake complete"),
            TerminationReason::PeerClosed => write!(f, "peer closed the connection"),
            TerminationReason::Shutdown => write!(f, "shutdown requested"),
        }
    }
}

/// What the session does after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next message.
    Continue,
    /// Stop the session successfully.
    Terminate(TerminationReason),
}

/// Session state handed to every handler call.
#[derive(Debug)]
pub struct SessionContext {
    magic: Magic,
    /// Progress of the version handshake.
    pub handshake_state: HandshakeState,
    /// What is known about the remote node.
    pub peer: Peer,
    outbox: Vec<Message>,
}

impl SessionContext {
    pub fn new(magic: Magic, peer: Peer) -> Self {
        Self {
            magic,
            handshake_state: HandshakeState::Connecting,
            peer,
            outbox: Vec::new(),
        }
    }

    /// The network magic of the session.
    pub fn magic(&self) -> Magic {
        self.magic
    }

    /// Queue a message for the peer.
    ///
    /// Queued messages are written in order as soon as the handler returns,
    /// before the next message is read.
    pub fn send(&mut self, command: Command, payload: Vec<u8>) {
        self.outbox.push(Message::new(self.magic, command, payload));
    }

    /// Messages queued so far.
    pub fn outbox(&self) -> &[Message] {
        &self.outbox
    }

    pub(crate) fn take_outbox(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbox)
    }
}

/// Handles one command.
///
/// Implemented for any `FnMut(&Message, &mut SessionContext) -> Result<Flow, SessionError>`.
pub trait MessageHandler: Send {
    fn handle(
        &mut self,
        message: &Message,
        context: &mut SessionContext,
    ) -> Result<Flow, SessionError>;
}

impl<F> MessageHandler for F
where
    F: FnMut(&Message, &mut SessionContext) -> Result<Flow, SessionError> + Send,
{
    fn handle(
        &mut self,
        message: &Message,
        context: &mut SessionContext,
    ) -> Result<Flow, SessionError> {
        self(message, context)
    }
}

/// Answers the peer's `version` with a `verack`.
///
/// The payload is decoded on a best effort basis to fill in the [`Peer`]; a
/// payload that does not parse is logged and still acknowledged.
#[derive(Debug, Default)]
pub struct VersionHandler;

impl MessageHandler for VersionHandler {
    fn handle(
        &mut self,
        message: &Message,
        context: &mut SessionContext,
    ) -> Result<Flow, SessionError> {
        debug!("Handling version message");

        match VersionPayload::decode(message.payload()) {
            Ok(version) => {
                context.peer.services = PeerServices::Known(version.services());
                context.peer.version = PeerProtocolVersion::Known(version.version());
                context.peer.user_agent =
                    Some(UserAgent::unchecked(version.user_agent().to_string()));
                debug!("Peer announced {}", context.peer);
            }
            Err(e) => warn!("Could not decode peer version payload: {e}"),
        }

        context.handshake_state = context.handshake_state.on_version_received();
        context.send(Command::VERACK, Vec::new());

        Ok(Flow::Continue)
    }
}

/// Ends the session once the peer acknowledges our `version`.
#[derive(Debug, Default)]
pub struct VerackHandler;

impl MessageHandler for VerackHandler {
    fn handle(
        &mut self,
        _message: &Message,
        context: &mut SessionContext,
    ) -> Result<Flow, SessionError> {
        context.handshake_state = context.handshake_state.on_verack_received();
        if context.handshake_state != HandshakeState::Complete {
            info!(
                "Verack received before the peer's version (state {:?})",
                context.handshake_state
            );
        } else {
            info!("Verack received, handshake complete");
        }

        Ok(Flow::Terminate(TerminationReason::HandshakeComplete))
    }
}

/// Command name to handler table.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Command, Box<dyn MessageHandler>>,
}

impl HandlerRegistry {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in table.
    ///
    /// # Returns
    ///
    /// A table answering `version` with [`VersionHandler`] and `verack` with
    /// [`VerackHandler`].
    pub fn handshake() -> Self {
        Self::new()
            .with_handler(Command::VERSION, VersionHandler)
            .with_handler(Command::VERACK, VerackHandler)
    }

    /// Add a handler, replacing any existing one for the same command.
    ///
    /// # Arguments
    ///
    /// * `command` - The command to route. Only well formed commands can
    ///   match an inbound message.
    /// * `handler` - A [`MessageHandler`] or a closure with the same signature.
    pub fn register<H>(&mut self, command: Command, handler: H)
    where
        H: MessageHandler + 'static,
    {
        self.handlers.insert(command, Box::new(handler));
    }

    /// Builder form of [`HandlerRegistry::register`].
    ///
    /// # Returns
    ///
    /// The table with `handler` added.
    pub fn with_handler<H>(mut self, command: Command, handler: H) -> Self
    where
        H: MessageHandler + 'static,
    {
        self.register(command, handler);
        self
    }

    pub fn contains(&self, command: &Command) -> bool {
        self.handlers.contains_key(command)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn get_mut(&mut self, command: &Command) -> Option<&mut Box<dyn MessageHandler>> {
        self.handlers.get_mut(command)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut commands: Vec<&str> = self.handlers.keys().map(Command::as_str).collect();
        commands.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("commands", &commands)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::configuration::SessionConfiguration;
    use bitcoin::p2p::ServiceFlags;

    fn context() -> SessionContext {
        let mut context = SessionContext::new(Magic::REGTEST, Peer::new("127.0.0.1:18444"));
        context.handshake_state = HandshakeState::VersionSent;
        context
    }

    fn version_message() -> Message {
        let payload = VersionPayload::new(&SessionConfiguration::new(), 1_700_000_000, 99);
        Message::new(Magic::REGTEST, Command::VERSION, payload.encode())
    }

    #[test]
    fn test_version_handler_queues_verack() {
        let mut context = context();
        let flow = VersionHandler
            .handle(&version_message(), &mut context)
            .unwrap();

        assert_eq!(flow, Flow::Continue);
        assert_eq!(context.handshake_state, HandshakeState::VersionReceived);
        assert_eq!(context.outbox().len(), 1);

        let verack = &context.outbox()[0];
        assert_eq!(verack.command(), &Command::VERACK);
        assert_eq!(verack.magic(), Magic::REGTEST);
        assert!(verack.payload().is_empty());
    }

    #[test]
    fn test_version_handler_records_peer() {
        let mut context = context();
        VersionHandler
            .handle(&version_message(), &mut context)
            .unwrap();

        assert_eq!(context.peer.version, PeerProtocolVersion::Known(70016));
        assert_eq!(
            context.peer.services,
            PeerServices::Known(ServiceFlags::NETWORK)
        );
        assert_eq!(
            context.peer.user_agent.as_ref().map(|ua| ua.as_str()),
            Some("/my-client:0.1/")
        );
    }

    #[test]
    fn test_version_handler_tolerates_bad_payload() {
        let mut context = context();
        let message = Message::new(Magic::REGTEST, Command::VERSION, vec![1, 2, 3]);
        let flow = VersionHandler.handle(&message, &mut context).unwrap();

        assert_eq!(flow, Flow::Continue);
        assert_eq!(context.peer.version, PeerProtocolVersion::Unknown);
        assert_eq!(context.outbox().len(), 1);
    }

    #[test]
    fn test_verack_handler_terminates() {
        let mut context = context();
        context.handshake_state = HandshakeState::VersionReceived;
        let message = Message::new(Magic::REGTEST, Command::VERACK, Vec::new());

        let flow = VerackHandler.handle(&message, &mut context).unwrap();
        assert_eq!(flow, Flow::Terminate(TerminationReason::HandshakeComplete));
        assert_eq!(context.handshake_state, HandshakeState::Complete);
        assert!(context.outbox().is_empty());
    }

    #[test]
    fn test_verack_before_version_still_terminates() {
        let mut context = context();
        let message = Message::new(Magic::REGTEST, Command::VERACK, Vec::new());

        let flow = VerackHandler.handle(&message, &mut context).unwrap();
        assert_eq!(flow, Flow::Terminate(TerminationReason::HandshakeComplete));
        assert_eq!(context.handshake_state, HandshakeState::VerackReceived);
    }

    #[test]
    fn test_registry() {
        let mut registry = HandlerRegistry::handshake();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&Command::VERSION));
        assert!(registry.contains(&Command::VERACK));

        let ping = Command::new("ping").unwrap();
        assert!(!registry.contains(&ping));
        registry.register(ping.clone(), |_: &Message, _: &mut SessionContext| -> Result<Flow, SessionError> {
            Ok(Flow::Continue)
        });
        assert!(registry.contains(&ping));
        assert_eq!(
            format!("{registry:?}"),
            "HandlerRegistry { commands: [\"ping\", \"verack\", \"version\"] }"
        );
    }

    #[test]
    fn test_registry_replaces_handler() {
        let mut registry = HandlerRegistry::handshake();
        registry.register(Command::VERACK, |_: &Message, _: &mut SessionContext| -> Result<Flow, SessionError> {
            Ok(Flow::Continue)
        });
        assert_eq!(registry.len(), 2);

        let mut context = context();
        let message = Message::new(Magic::REGTEST, Command::VERACK, Vec::new());
        let handler = registry.get_mut(&Command::VERACK).unwrap();
        assert_eq!(handler.handle(&message, &mut context).unwrap(), Flow::Continue);
    }
}
