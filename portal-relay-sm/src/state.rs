use std::{error::Error, fmt};

/// The lifecycle state of a socket leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum SocketState {
    /// The underlying transport is connected and usable. Every leg starts here.
    #[default]
    Established,

    /// A close was requested. The transport may still be flushing writes that were already
    /// submitted, but no new operations are accepted.
    Disconnecting,

    /// The transport is fully closed. No further I/O will happen.
    Closed,

    /// The leg was torn down because of a protocol or negotiation failure. Treated just like
    /// [`SocketState::Closed`], except the disconnect carries a failure reason.
    Invalid,
}

impl SocketState {
    /// Whether the leg has reached a state it can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Invalid)
    }

    /// Whether the leg should be reported as disconnected to its owner. This is the case for both
    /// terminal states.
    pub fn is_disconnected(&self) -> bool {
        self.is_terminal()
    }

    /// Whether a leg in this state may move to `next`. Staying in the same state is not
    /// considered a transition.
    pub fn can_transition_to(&self, next: SocketState) -> bool {
        match (self, next) {
            (Self::Established, Self::Disconnecting | Self::Closed | Self::Invalid) => true,
            (Self::Disconnecting, Self::Closed | Self::Invalid) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Established => write!(f, "established"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Closed => write!(f, "closed"),
            Self::Invalid => write!(f, "invalid"),
        }
    }
}

/// One of the two independent I/O directions of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// The reasons an I/O submission can be refused on the spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoRejection {
    /// An operation in this direction is still in flight.
    Busy(Direction),

    /// The leg is not in the [`SocketState::Established`] state.
    NotOpen(SocketState),
}

impl fmt::Display for IoRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy(direction) => write!(f, "leg busy: a {direction} is already in flight"),
            Self::NotOpen(state) => write!(f, "leg not open: state is {state}"),
        }
    }
}

impl Error for IoRejection {}
