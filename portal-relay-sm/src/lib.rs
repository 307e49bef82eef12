//! The lifecycle of a single leg of a relayed connection, without any I/O.
//!
//! A leg starts out [`Established`](SocketState::Established) and only ever moves forward:
//! ```text
//! Established ──► Disconnecting ──► Closed | Invalid
//!      │                                 ▲
//!      └─────────────────────────────────┘
//! ```
//!
//! On top of the state itself, a [`Lifecycle`] keeps track of which I/O directions have an
//! operation in flight. At most one read and one write may be outstanding at any time, and a new
//! operation is refused (never queued) while the previous one of the same direction hasn't
//! completed. It also remembers whether the owner was already told the leg disconnected, so that
//! notification happens exactly once no matter how many close signals arrive.

mod state;

pub use crate::state::*;

/// What the transport under a leg must be asked to do after a close request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Nothing, the request was redundant.
    None,

    /// Close once the pending writes have been flushed.
    Graceful,

    /// Close immediately, dropping any pending writes.
    Force,
}

/// Whether an I/O completion should be handed to the leg's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Deliver,
    Suppress,
}

impl Completion {
    pub fn is_deliver(&self) -> bool {
        matches!(self, Self::Deliver)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Lifecycle {
    state: SocketState,
    reading: bool,
    writing: bool,
    forced: bool,
    notified: bool,
}

impl Lifecycle {
    pub const fn new() -> Self {
        Self {
            state: SocketState::Established,
            reading: false,
            writing: false,
            forced: false,
            notified: false,
        }
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn is_disconnected(&self) -> bool {
        self.state.is_disconnected()
    }

    /// Whether an operation in the given direction is currently in flight.
    pub fn is_busy(&self, direction: Direction) -> bool {
        match direction {
            Direction::Read => self.reading,
            Direction::Write => self.writing,
        }
    }

    pub fn is_forced(&self) -> bool {
        self.forced
    }

    /// Whether the owner has already been told this leg disconnected.
    pub fn is_notified(&self) -> bool {
        self.notified
    }

    /// Marks an operation in `direction` as in flight.
    ///
    /// Fails with [`IoRejection::NotOpen`] unless the leg is established, and with
    /// [`IoRejection::Busy`] if the previous operation in that direction hasn't completed yet.
    /// A rejection leaves the lifecycle untouched.
    pub fn begin(&mut self, direction: Direction) -> Result<(), IoRejection> {
        if self.state != SocketState::Established {
            return Err(IoRejection::NotOpen(self.state));
        }

        let busy = match direction {
            Direction::Read => &mut self.reading,
            Direction::Write => &mut self.writing,
        };

        if *busy {
            return Err(IoRejection::Busy(direction));
        }

        *busy = true;
        Ok(())
    }

    /// Records the completion of the operation in flight in `direction`, freeing that direction
    /// up for the next operation.
    ///
    /// Completions arriving after a forced close or once the leg is terminal are suppressed.
    pub fn complete(&mut self, direction: Direction) -> Completion {
        match direction {
            Direction::Read => self.reading = false,
            Direction::Write => self.writing = false,
        }

        match self.forced || self.state.is_terminal() {
            true => Completion::Suppress,
            false => Completion::Deliver,
        }
    }

    /// Requests a graceful close. Only an established leg moves to
    /// [`SocketState::Disconnecting`], any other state ignores the request.
    pub fn disconnect(&mut self) -> CloseAction {
        match self.state {
            SocketState::Established => {
                self.state = SocketState::Disconnecting;
                CloseAction::Graceful
            }
            _ => CloseAction::None,
        }
    }

    /// Requests an immediate close. Unlike [`disconnect`](Self::disconnect), this is also
    /// honored while a graceful close is underway, so it can cut a pending flush short.
    pub fn force_disconnect(&mut self) -> CloseAction {
        if self.forced || self.state.is_terminal() {
            return CloseAction::None;
        }

        self.state = SocketState::Disconnecting;
        self.forced = true;
        CloseAction::Force
    }

    /// Processes the transport reporting that it fully disconnected.
    ///
    /// Returns `true` if the owner must be notified. This happens only the first time the leg
    /// reaches a terminal state, so any further disconnect signals return `false`.
    pub fn transport_closed(&mut self) -> bool {
        if !self.state.is_terminal() {
            self.enter_terminal(SocketState::Closed);
        }

        self.take_notification()
    }

    /// Moves the leg to [`SocketState::Invalid`] because of a protocol or negotiation failure.
    ///
    /// Returns `true` if the owner must be notified. A leg that is already terminal stays as it
    /// is and returns `false`.
    pub fn invalidate(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        self.enter_terminal(SocketState::Invalid);
        self.take_notification()
    }

    fn enter_terminal(&mut self, state: SocketState) {
        self.state = state;
        self.reading = false;
        self.writing = false;
    }

    fn take_notification(&mut self) -> bool {
        !std::mem::replace(&mut self.notified, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_established_and_idle() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), SocketState::Established);
        assert!(!lifecycle.is_busy(Direction::Read));
        assert!(!lifecycle.is_busy(Direction::Write));
        assert!(!lifecycle.is_disconnected());
    }

    #[test]
    fn overlapping_read_is_rejected() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.begin(Direction::Read), Ok(()));
        assert_eq!(lifecycle.begin(Direction::Read), Err(IoRejection::Busy(Direction::Read)));

        // The rejected call must not have disturbed the read in flight.
        assert!(lifecycle.is_busy(Direction::Read));
        assert_eq!(lifecycle.complete(Direction::Read), Completion::Deliver);
        assert_eq!(lifecycle.begin(Direction::Read), Ok(()));
    }

    #[test]
    fn reads_and_writes_are_independent() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.begin(Direction::Read), Ok(()));
        assert_eq!(lifecycle.begin(Direction::Write), Ok(()));
        assert_eq!(lifecycle.begin(Direction::Write), Err(IoRejection::Busy(Direction::Write)));
        assert_eq!(lifecycle.complete(Direction::Write), Completion::Deliver);
        assert!(lifecycle.is_busy(Direction::Read));
    }

    #[test]
    fn io_is_refused_once_disconnecting() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.disconnect(), CloseAction::Graceful);
        assert_eq!(
            lifecycle.begin(Direction::Write),
            Err(IoRejection::NotOpen(SocketState::Disconnecting))
        );
        assert_eq!(lifecycle.disconnect(), CloseAction::None);
    }

    #[test]
    fn graceful_close_still_delivers_flushed_write() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.begin(Direction::Write).unwrap();
        lifecycle.disconnect();
        assert_eq!(lifecycle.complete(Direction::Write), Completion::Deliver);
    }

    #[test]
    fn force_close_suppresses_pending_write() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.begin(Direction::Write).unwrap();
        assert_eq!(lifecycle.force_disconnect(), CloseAction::Force);
        assert_eq!(lifecycle.complete(Direction::Write), Completion::Suppress);
        assert!(lifecycle.transport_closed());
        assert_eq!(lifecycle.state(), SocketState::Closed);
    }

    #[test]
    fn force_close_overrides_graceful_close_once() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.disconnect(), CloseAction::Graceful);
        assert_eq!(lifecycle.force_disconnect(), CloseAction::Force);
        assert_eq!(lifecycle.force_disconnect(), CloseAction::None);
        assert_eq!(lifecycle.state(), SocketState::Disconnecting);
    }

    #[test]
    fn disconnect_notifies_once() {
        let mut lifecycle = Lifecycle::new();
        assert!(lifecycle.transport_closed());
        assert!(!lifecycle.transport_closed());
        assert!(!lifecycle.invalidate());
        assert_eq!(lifecycle.state(), SocketState::Closed);
    }

    #[test]
    fn invalid_is_terminal_and_absorbs_transport_close() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.begin(Direction::Read).unwrap();
        assert!(lifecycle.invalidate());
        assert_eq!(lifecycle.state(), SocketState::Invalid);
        assert!(lifecycle.is_disconnected());
        assert!(!lifecycle.transport_closed());
        assert_eq!(lifecycle.state(), SocketState::Invalid);
        assert_eq!(lifecycle.complete(Direction::Read), Completion::Suppress);
        assert_eq!(lifecycle.force_disconnect(), CloseAction::None);
    }

    #[test]
    fn transition_graph() {
        use SocketState::*;
        assert!(Established.can_transition_to(Disconnecting));
        assert!(Established.can_transition_to(Invalid));
        assert!(Disconnecting.can_transition_to(Closed));
        assert!(!Disconnecting.can_transition_to(Established));
        assert!(!Closed.can_transition_to(Invalid));
        assert!(!Invalid.can_transition_to(Closed));
    }
}
