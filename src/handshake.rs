//! The application-facing side of destination negotiation.

use bytes::Bytes;

use crate::{request::ConnectRequest, response::ConnectResponse};

/// What a [`ClientHandshake`] needs to happen next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// More bytes must be read from the application.
    NeedMore,

    /// These bytes must be written to the application. The handshake is fed an empty slice once
    /// the write completes.
    Reply(Bytes),

    /// The application asked for this destination. Nothing else is read until it's answered.
    Request(ConnectRequest),

    /// The application spoke something we can't serve. If there's a `reply`, it is written to the
    /// application before closing.
    Reject { reply: Option<Bytes>, reason: String },
}

/// An incremental parser for the handshake an application starts a proxied connection with.
///
/// Bytes are fed in whatever chunks they arrive in, and the handshake keeps whatever it can't
/// use yet buffered internally.
pub trait ClientHandshake {
    fn feed(&mut self, data: &[u8]) -> HandshakeStep;

    /// Builds the bytes telling the application how negotiating its destination went.
    fn reply(&self, response: &ConnectResponse) -> Bytes;
}
