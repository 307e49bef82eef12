use std::{
    cell::RefCell,
    io,
    rc::{Rc, Weak},
};

use bytes::Bytes;
use portal_relay_sm::{CloseAction, Direction, IoRejection, Lifecycle};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::{LegRole, SocketDelegate, Tag};
use crate::{
    error::{DisconnectReason, LegError},
    raw::{RawSocketDelegate, RawTcpSocket},
    SocketState,
};

/// The tag of a last write sent right before invalidating a leg. Its completion is never
/// delivered.
const FAREWELL_TAG: Tag = Tag(u32::MAX - 1);

/// The plumbing shared by both legs: the lifecycle, the transport under it, and the delegate
/// events are delivered to.
pub(super) struct LegCore {
    role: LegRole,
    lifecycle: Rc<RefCell<Lifecycle>>,
    raw: RawTcpSocket,
    delegate: RefCell<Option<Weak<dyn SocketDelegate>>>,
}

impl LegCore {
    pub fn new<S>(role: LegRole, stream: S, raw_delegate: Weak<dyn RawSocketDelegate>, read_buffer_size: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + 'static,
    {
        Self {
            role,
            lifecycle: Rc::new(RefCell::new(Lifecycle::new())),
            raw: RawTcpSocket::new(stream, raw_delegate, read_buffer_size),
            delegate: RefCell::new(None),
        }
    }

    pub fn state(&self) -> SocketState {
        self.lifecycle.borrow().state()
    }

    pub fn set_delegate(&self, delegate: Weak<dyn SocketDelegate>) {
        *self.delegate.borrow_mut() = Some(delegate);
    }

    /// Fails with a not-open error unless the leg is still established.
    pub fn ensure_open(&self) -> Result<(), LegError> {
        match self.state() {
            SocketState::Established => Ok(()),
            state => Err(IoRejection::NotOpen(state).into()),
        }
    }

    pub fn read(&self, tag: Tag) -> Result<(), LegError> {
        self.begin(Direction::Read, tag)?;
        self.raw.read_data(tag);
        Ok(())
    }

    pub fn write(&self, data: Bytes, tag: Tag) -> Result<(), LegError> {
        self.begin(Direction::Write, tag)?;
        self.raw.write_data(data, tag);
        Ok(())
    }

    fn begin(&self, direction: Direction, tag: Tag) -> Result<(), LegError> {
        let result = self.lifecycle.borrow_mut().begin(direction);
        if let Err(rejection) = &result {
            debug!(role = %self.role, %tag, "Rejected {direction}: {rejection}");
        }

        Ok(result?)
    }

    /// Records the completion of an internal operation, one whose outcome the leg consumes itself
    /// and never hands to the delegate. Returns whether the leg should still act on it.
    pub fn complete_now(&self, direction: Direction) -> bool {
        self.lifecycle.borrow_mut().complete(direction).is_deliver()
    }

    pub fn disconnect(&self) {
        let action = self.lifecycle.borrow_mut().disconnect();
        self.close_transport(action);
    }

    pub fn force_disconnect(&self) {
        let action = self.lifecycle.borrow_mut().force_disconnect();
        self.close_transport(action);
    }

    fn close_transport(&self, action: CloseAction) {
        match action {
            CloseAction::None => {}
            CloseAction::Graceful => {
                debug!(role = %self.role, "Disconnecting leg");
                self.raw.disconnect();
            }
            CloseAction::Force => {
                debug!(role = %self.role, "Force-disconnecting leg");
                self.raw.force_disconnect();
            }
        }
    }

    /// Processes the transport reporting it closed, notifying the delegate if this is the first
    /// time the leg reached a terminal state.
    pub fn transport_closed(&self, error: Option<io::Error>) {
        if !self.lifecycle.borrow_mut().transport_closed() {
            return;
        }

        let reason = DisconnectReason::from_transport(error);
        debug!(role = %self.role, %reason, "Leg closed");
        self.dispatch(move |delegate, role| delegate.did_disconnect(role, reason));
    }

    /// Moves the leg to [`SocketState::Invalid`] and notifies the delegate.
    ///
    /// With a `farewell`, those bytes are flushed to the peer before the transport is closed.
    /// Otherwise the transport is closed immediately.
    pub fn invalidate(&self, reason: DisconnectReason, farewell: Option<Bytes>) {
        if !self.lifecycle.borrow_mut().invalidate() {
            return;
        }

        debug!(role = %self.role, %reason, "Leg invalidated");
        match farewell {
            Some(data) => {
                self.raw.write_data(data, FAREWELL_TAG);
                self.raw.disconnect();
            }
            None => self.raw.force_disconnect(),
        }

        self.dispatch(move |delegate, role| delegate.did_disconnect(role, reason));
    }

    /// Delivers an event to the delegate from a separate local task.
    pub fn dispatch<F>(&self, event: F)
    where
        F: FnOnce(&dyn SocketDelegate, LegRole) + 'static,
    {
        let delegate = self.delegate.borrow().clone();
        let role = self.role;
        tokio::task::spawn_local(async move {
            if let Some(delegate) = delegate.and_then(|weak| weak.upgrade()) {
                event(delegate.as_ref(), role);
            }
        });
    }

    /// Delivers the completion of an owner-submitted operation.
    ///
    /// The direction stays busy until the delivery task runs, so the owner can't submit another
    /// operation in that direction before it has seen this completion. Completions are dropped if
    /// the leg was force-closed or became terminal by then.
    pub fn dispatch_completion<F>(&self, direction: Direction, event: F)
    where
        F: FnOnce(&dyn SocketDelegate, LegRole) + 'static,
    {
        let lifecycle = Rc::clone(&self.lifecycle);
        let delegate = self.delegate.borrow().clone();
        let role = self.role;
        tokio::task::spawn_local(async move {
            let completion = lifecycle.borrow_mut().complete(direction);
            if !completion.is_deliver() {
                debug!(%role, %direction, "Dropping completion of a closed leg");
                return;
            }

            if let Some(delegate) = delegate.and_then(|weak| weak.upgrade()) {
                event(delegate.as_ref(), role);
            }
        });
    }
}
