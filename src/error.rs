use std::io;

use portal_relay_sm::{Direction, IoRejection};

use crate::{response::ConnectFailure, socket::LegRole};

/// An operation a leg refused synchronously because the caller broke its usage contract.
///
/// These never move the leg towards a disconnect by themselves, but a well-behaved owner treats
/// them as fatal for the tunnel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LegError {
    #[error(transparent)]
    Rejected(#[from] IoRejection),

    #[error("the {0} leg was already opened")]
    AlreadyOpened(LegRole),

    #[error("the {0} leg is not forwarding yet")]
    NotForwarding(LegRole),

    #[error("the {0} leg is not waiting for a connect response")]
    UnexpectedResponse(LegRole),

    #[error("{operation} is not supported by the {role} leg")]
    Unsupported { operation: &'static str, role: LegRole },
}

impl LegError {
    /// Whether the call was refused because an operation in the same direction is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Rejected(IoRejection::Busy(_)))
    }

    /// Whether the call was refused because the leg is no longer established.
    pub fn is_not_open(&self) -> bool {
        matches!(self, Self::Rejected(IoRejection::NotOpen(_)))
    }

    pub fn busy_direction(&self) -> Option<Direction> {
        match self {
            Self::Rejected(IoRejection::Busy(direction)) => Some(*direction),
            _ => None,
        }
    }
}

/// Why a leg disconnected. Delivered exactly once per leg.
#[derive(Debug, thiserror::Error)]
pub enum DisconnectReason {
    /// The transport closed cleanly, either because the peer closed it or because we asked.
    #[error("connection closed")]
    Closed,

    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    /// The peer spoke something we couldn't understand during the handshake.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Destination negotiation failed.
    #[error("negotiation rejected: {0}")]
    Rejected(ConnectFailure),
}

impl DisconnectReason {
    pub(crate) fn from_transport(error: Option<io::Error>) -> Self {
        match error {
            Some(error) => Self::Transport(error),
            None => Self::Closed,
        }
    }

    /// Whether this is a plain close rather than a failure.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// The negotiation failure, if this disconnect was caused by one.
    pub fn failure(&self) -> Option<&ConnectFailure> {
        match self {
            Self::Rejected(failure) => Some(failure),
            _ => None,
        }
    }
}
