use std::{
    cell::{Cell, RefCell},
    io,
    rc::{Rc, Weak},
};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::{leg_core::LegCore, LegRole, SocketDelegate, SocketLeg, Tag};
use crate::{
    adapter::{AdapterProtocol, AdapterStep},
    error::{DisconnectReason, LegError},
    raw::RawSocketDelegate,
    request::ConnectRequest,
    response::ConnectResponse,
    Direction, SocketState,
};

const NEGOTIATION_TAG: Tag = Tag(u32::MAX);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdapterPhase {
    Idle,
    Negotiating,
    Forwarding,
    Failed,
}

/// The leg facing the destination.
///
/// It is built on an already connected transport. Opening it reports
/// [`did_connect`](SocketDelegate::did_connect) and runs the [`AdapterProtocol`] until the
/// negotiation has an outcome, which is reported once through
/// [`did_receive_response`](SocketDelegate::did_receive_response). If negotiating failed, the leg
/// also becomes [`Invalid`](SocketState::Invalid) and closes.
pub struct AdapterSocket {
    core: LegCore,
    phase: Cell<AdapterPhase>,
    request: ConnectRequest,
    protocol: RefCell<Box<dyn AdapterProtocol>>,
}

impl AdapterSocket {
    pub fn new<S>(stream: S, request: ConnectRequest, protocol: Box<dyn AdapterProtocol>, read_buffer_size: usize) -> Rc<Self>
    where
        S: AsyncRead + AsyncWrite + 'static,
    {
        Rc::new_cyclic(|weak: &Weak<Self>| {
            let raw_delegate: Weak<dyn RawSocketDelegate> = weak.clone();
            Self {
                core: LegCore::new(LegRole::Adapter, stream, raw_delegate, read_buffer_size),
                phase: Cell::new(AdapterPhase::Idle),
                request,
                protocol: RefCell::new(protocol),
            }
        })
    }

    fn ensure_forwarding(&self) -> Result<(), LegError> {
        self.core.ensure_open()?;
        match self.phase.get() {
            AdapterPhase::Forwarding => Ok(()),
            _ => Err(LegError::NotForwarding(LegRole::Adapter)),
        }
    }

    fn advance(&self, step: AdapterStep) {
        let result = match step {
            AdapterStep::NeedMore => self.core.read(NEGOTIATION_TAG),
            AdapterStep::Send(data) => self.core.write(data, NEGOTIATION_TAG),
            AdapterStep::Done(Ok(leftover)) => {
                debug!(role = %LegRole::Adapter, id = %self.request.id(), request = %self.request, "Negotiation succeeded");
                self.phase.set(AdapterPhase::Forwarding);
                let response = ConnectResponse::success(self.request.id()).with_leftover(leftover);
                self.core.dispatch(move |delegate, role| delegate.did_receive_response(role, response));
                Ok(())
            }
            AdapterStep::Done(Err(failure)) => {
                debug!(role = %LegRole::Adapter, id = %self.request.id(), reason = %failure, "Negotiation failed");
                self.phase.set(AdapterPhase::Failed);
                let response = ConnectResponse::failure(self.request.id(), failure.clone());
                self.core.dispatch(move |delegate, role| delegate.did_receive_response(role, response));
                self.core.invalidate(DisconnectReason::Rejected(failure), None);
                Ok(())
            }
        };

        if let Err(error) = result {
            debug!(role = %LegRole::Adapter, "Negotiation stalled: {error}");
        }
    }
}

impl SocketLeg for AdapterSocket {
    fn role(&self) -> LegRole {
        LegRole::Adapter
    }

    fn state(&self) -> SocketState {
        self.core.state()
    }

    fn open_socket(&self) -> Result<(), LegError> {
        self.core.ensure_open()?;
        if self.phase.get() != AdapterPhase::Idle {
            return Err(LegError::AlreadyOpened(LegRole::Adapter));
        }

        self.phase.set(AdapterPhase::Negotiating);
        debug!(role = %LegRole::Adapter, request = %self.request, "Leg opened, negotiating");
        self.core.dispatch(|delegate, role| delegate.did_connect(role));

        let step = self.protocol.borrow_mut().start(&self.request);
        self.advance(step);
        Ok(())
    }

    fn respond_to_response(&self, _response: ConnectResponse) -> Result<(), LegError> {
        Err(LegError::Unsupported {
            operation: "respond_to_response",
            role: LegRole::Adapter,
        })
    }

    fn read_data(&self, tag: Tag) -> Result<(), LegError> {
        self.ensure_forwarding()?;
        self.core.read(tag)
    }

    fn write_data(&self, data: Bytes, tag: Tag) -> Result<(), LegError> {
        self.ensure_forwarding()?;
        self.core.write(data, tag)
    }

    fn disconnect(&self) {
        self.core.disconnect();
    }

    fn force_disconnect(&self) {
        self.core.force_disconnect();
    }

    fn set_delegate(&self, delegate: Weak<dyn SocketDelegate>) {
        self.core.set_delegate(delegate);
    }
}

impl RawSocketDelegate for AdapterSocket {
    fn did_read_data(&self, data: Bytes, tag: Tag) {
        let phase = self.phase.get();
        if phase == AdapterPhase::Forwarding {
            self.core
                .dispatch_completion(Direction::Read, move |delegate, role| delegate.did_read_data(role, data, tag));
            return;
        }

        if !self.core.complete_now(Direction::Read) {
            return;
        }

        match phase {
            AdapterPhase::Negotiating => {
                let step = self.protocol.borrow_mut().feed(&data);
                self.advance(step);
            }
            phase => debug!(role = %LegRole::Adapter, %tag, ?phase, "Discarding read completed out of phase"),
        }
    }

    fn did_write_data(&self, tag: Tag) {
        let phase = self.phase.get();
        if phase == AdapterPhase::Forwarding {
            self.core
                .dispatch_completion(Direction::Write, move |delegate, role| delegate.did_write_data(role, tag));
            return;
        }

        if !self.core.complete_now(Direction::Write) {
            return;
        }

        match phase {
            AdapterPhase::Negotiating => {
                let step = self.protocol.borrow_mut().feed(&[]);
                self.advance(step);
            }
            phase => debug!(role = %LegRole::Adapter, %tag, ?phase, "Discarding write completed out of phase"),
        }
    }

    fn did_disconnect(&self, error: Option<io::Error>) {
        self.core.transport_closed(error);
    }
}
