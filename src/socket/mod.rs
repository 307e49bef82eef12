//! The two legs of a relayed connection and the contract they share.

use std::{fmt, rc::Weak};

use bytes::Bytes;

use crate::{
    error::{DisconnectReason, LegError},
    request::ConnectRequest,
    response::ConnectResponse,
    SocketState,
};

mod adapter_socket;
mod leg_core;
mod proxy_socket;

pub use adapter_socket::AdapterSocket;
pub use proxy_socket::ProxySocket;

/// A caller-chosen value used to match an I/O completion with the operation that caused it. Legs
/// assign no meaning to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub u32);

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which side of a tunnel a leg is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegRole {
    /// Faces the application that connected to us.
    Proxy,

    /// Faces the destination, or the upstream proxy that reaches it.
    Adapter,
}

impl LegRole {
    pub fn other(self) -> Self {
        match self {
            Self::Proxy => Self::Adapter,
            Self::Adapter => Self::Proxy,
        }
    }
}

impl fmt::Display for LegRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proxy => write!(f, "proxy"),
            Self::Adapter => write!(f, "adapter"),
        }
    }
}

/// The operations every leg offers to the owner relaying between them.
///
/// Nothing here blocks. Operations that can't be carried out right now fail synchronously with a
/// [`LegError`], and everything else that happens to the leg is reported later through its
/// [`SocketDelegate`].
///
/// Reads and writes follow the one-in-flight rule: a second read (or write) submitted before the
/// completion of the previous one was delivered is refused with a busy error.
pub trait SocketLeg {
    fn role(&self) -> LegRole;

    fn state(&self) -> SocketState;

    /// Whether the leg reached a terminal state, either [`SocketState::Closed`] or
    /// [`SocketState::Invalid`].
    fn is_disconnected(&self) -> bool {
        self.state().is_disconnected()
    }

    /// Starts the leg's active phase. May only be called once.
    fn open_socket(&self) -> Result<(), LegError>;

    /// Hands the outcome of a destination negotiation to the leg that asked for it.
    fn respond_to_response(&self, response: ConnectResponse) -> Result<(), LegError>;

    fn read_data(&self, tag: Tag) -> Result<(), LegError>;

    fn write_data(&self, data: Bytes, tag: Tag) -> Result<(), LegError>;

    /// Closes the leg after any pending write was flushed.
    fn disconnect(&self);

    /// Closes the leg right away. A pending write is dropped and its completion never delivered.
    fn force_disconnect(&self);

    fn set_delegate(&self, delegate: Weak<dyn SocketDelegate>);
}

/// Receives the events of one or more legs. The owner of a leg is usually its delegate.
///
/// Events are always delivered from a separate task on the current
/// [`LocalSet`](tokio::task::LocalSet), never from inside a call to one of the leg's methods, so
/// implementations may freely call back into the leg. If the delegate was dropped by the time an
/// event is delivered, the event is discarded.
pub trait SocketDelegate {
    /// The proxy leg finished its handshake with the application and wants this destination.
    fn did_receive_request(&self, role: LegRole, request: ConnectRequest);

    /// The adapter leg is connected and started negotiating with the destination.
    fn did_connect(&self, role: LegRole);

    /// The adapter leg finished negotiating.
    fn did_receive_response(&self, role: LegRole, response: ConnectResponse);

    /// The proxy leg delivered a successful response to the application and can now relay.
    fn ready_to_forward(&self, role: LegRole);

    fn did_read_data(&self, role: LegRole, data: Bytes, tag: Tag);

    /// The write submitted with `tag` completed. The written bytes aren't retained.
    fn did_write_data(&self, role: LegRole, tag: Tag);

    /// The leg reached a terminal state. Delivered exactly once per leg.
    fn did_disconnect(&self, role: LegRole, reason: DisconnectReason);
}
