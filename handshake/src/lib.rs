pub mod codec;
pub mod network;
mod peer;
mod session;
pub mod user_agent;

pub use peer::{Peer, PeerProtocolVersion, PeerServices, PROTOCOL_VERSION};
pub use session::{
    generate_nonce, unix_timestamp, Flow, HandlerRegistry, HandshakeState, MessageHandler, Phase,
    Session, SessionConfiguration, SessionContext, SessionError, TcpSession, TerminationReason,
    Verification, VerackHandler, VersionHandler, VersionPayload, DEFAULT_CONNECTION_TIMEOUT,
};
