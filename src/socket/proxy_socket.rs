use std::{
    cell::{Cell, RefCell},
    io,
    rc::{Rc, Weak},
};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use super::{leg_core::LegCore, LegRole, SocketDelegate, SocketLeg, Tag};
use crate::{
    error::{DisconnectReason, LegError},
    handshake::{ClientHandshake, HandshakeStep},
    raw::RawSocketDelegate,
    request::RequestId,
    response::{ConnectFailure, ConnectResponse, FailureKind},
    socks::Socks5Handshake,
    Direction, SocketState,
};

const HANDSHAKE_TAG: Tag = Tag(u32::MAX);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProxyPhase {
    Idle,
    Negotiating,
    AwaitingResponse(RequestId),
    Replying,
    Forwarding,
}

/// The leg facing the application that connected to us.
///
/// Once opened, it runs a [`ClientHandshake`] with the application until it learns where the
/// application wants to go, hands that [`ConnectRequest`](crate::request::ConnectRequest) to its
/// delegate and stops reading. The owner then answers with
/// [`respond_to_response`](SocketLeg::respond_to_response). A successful answer is written back to
/// the application, after which the leg signals
/// [`ready_to_forward`](SocketDelegate::ready_to_forward) and accepts the owner's reads and
/// writes. A failed answer is also written back, but then the leg becomes
/// [`Invalid`](SocketState::Invalid) and closes.
pub struct ProxySocket {
    core: LegCore,
    phase: Cell<ProxyPhase>,
    handshake: RefCell<Box<dyn ClientHandshake>>,
}

impl ProxySocket {
    /// Wraps a connection accepted from an application. Must be called from within a
    /// [`LocalSet`](tokio::task::LocalSet).
    pub fn new<S>(stream: S, handshake: Box<dyn ClientHandshake>, read_buffer_size: usize) -> Rc<Self>
    where
        S: AsyncRead + AsyncWrite + 'static,
    {
        Rc::new_cyclic(|weak: &Weak<Self>| {
            let raw_delegate: Weak<dyn RawSocketDelegate> = weak.clone();
            Self {
                core: LegCore::new(LegRole::Proxy, stream, raw_delegate, read_buffer_size),
                phase: Cell::new(ProxyPhase::Idle),
                handshake: RefCell::new(handshake),
            }
        })
    }

    /// Wraps a connection from an application speaking SOCKS5.
    pub fn socks5<S>(stream: S, read_buffer_size: usize) -> Rc<Self>
    where
        S: AsyncRead + AsyncWrite + 'static,
    {
        Self::new(stream, Box::new(Socks5Handshake::new()), read_buffer_size)
    }

    /// Whether the handshake is over and the leg is relaying.
    pub fn is_forwarding(&self) -> bool {
        self.phase.get() == ProxyPhase::Forwarding
    }

    fn ensure_forwarding(&self) -> Result<(), LegError> {
        self.core.ensure_open()?;
        match self.phase.get() {
            ProxyPhase::Forwarding => Ok(()),
            _ => Err(LegError::NotForwarding(LegRole::Proxy)),
        }
    }

    fn advance_handshake(&self, data: &[u8]) {
        let step = self.handshake.borrow_mut().feed(data);

        let result = match step {
            HandshakeStep::NeedMore => self.core.read(HANDSHAKE_TAG),
            HandshakeStep::Reply(reply) => self.core.write(reply, HANDSHAKE_TAG),
            HandshakeStep::Request(request) => {
                debug!(role = %LegRole::Proxy, id = %request.id(), %request, "Application requested a destination");
                self.phase.set(ProxyPhase::AwaitingResponse(request.id()));
                self.core.dispatch(move |delegate, role| delegate.did_receive_request(role, request));
                Ok(())
            }
            HandshakeStep::Reject { reply, reason } => {
                self.core.invalidate(DisconnectReason::Protocol(reason), reply);
                Ok(())
            }
        };

        if let Err(error) = result {
            debug!(role = %LegRole::Proxy, "Handshake stalled: {error}");
        }
    }

    fn reject(&self, expected: RequestId, failure: ConnectFailure) {
        let reply = self.handshake.borrow().reply(&ConnectResponse::failure(expected, failure.clone()));
        self.core.invalidate(DisconnectReason::Rejected(failure), Some(reply));
    }
}

impl SocketLeg for ProxySocket {
    fn role(&self) -> LegRole {
        LegRole::Proxy
    }

    fn state(&self) -> SocketState {
        self.core.state()
    }

    fn open_socket(&self) -> Result<(), LegError> {
        self.core.ensure_open()?;
        if self.phase.get() != ProxyPhase::Idle {
            return Err(LegError::AlreadyOpened(LegRole::Proxy));
        }

        self.core.read(HANDSHAKE_TAG)?;
        self.phase.set(ProxyPhase::Negotiating);
        debug!(role = %LegRole::Proxy, "Leg opened, waiting for the application's handshake");
        Ok(())
    }

    fn respond_to_response(&self, response: ConnectResponse) -> Result<(), LegError> {
        self.core.ensure_open()?;
        let expected = match self.phase.get() {
            ProxyPhase::AwaitingResponse(id) => id,
            _ => return Err(LegError::UnexpectedResponse(LegRole::Proxy)),
        };

        if response.request_id() != expected {
            warn!(role = %LegRole::Proxy, %expected, got = %response.request_id(), "Response doesn't match the pending request");
            let reason = format!("response {} does not answer request {expected}", response.request_id());
            let failure = ConnectFailure::new(FailureKind::General, reason.clone());
            let reply = self.handshake.borrow().reply(&ConnectResponse::failure(expected, failure));
            self.core.invalidate(DisconnectReason::Protocol(reason), Some(reply));
            return Ok(());
        }

        if let Err(failure) = response.outcome() {
            debug!(role = %LegRole::Proxy, id = %expected, reason = %failure, "Destination negotiation failed");
            self.reject(expected, failure.clone());
            return Ok(());
        }

        let reply = self.handshake.borrow().reply(&response);
        let data = match response.leftover().is_empty() {
            true => reply,
            false => {
                let mut buf = BytesMut::with_capacity(reply.len() + response.leftover().len());
                buf.extend_from_slice(&reply);
                buf.extend_from_slice(response.leftover());
                buf.freeze()
            }
        };

        self.core.write(data, HANDSHAKE_TAG)?;
        self.phase.set(ProxyPhase::Replying);
        Ok(())
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

impl RawSocketDelegate for ProxySocket {
    fn did_read_data(&self, data: Bytes, tag: Tag) {
        let phase = self.phase.get();
        if phase == ProxyPhase::Forwarding {
            self.core
                .dispatch_completion(Direction::Read, move |delegate, role| delegate.did_read_data(role, data, tag));
            return;
        }

        if !self.core.complete_now(Direction::Read) {
            return;
        }

        match phase {
            ProxyPhase::Negotiating => self.advance_handshake(&data),
            phase => debug!(role = %LegRole::Proxy, %tag, ?phase, "Discarding read completed out of phase"),
        }
    }

    fn did_write_data(&self, tag: Tag) {
        let phase = self.phase.get();
        if phase == ProxyPhase::Forwarding {
            self.core
                .dispatch_completion(Direction::Write, move |delegate, role| delegate.did_write_data(role, tag));
            return;
        }

        if !self.core.complete_now(Direction::Write) {
            return;
        }

        match phase {
            ProxyPhase::Negotiating => self.advance_handshake(&[]),
            ProxyPhase::Replying => {
                self.phase.set(ProxyPhase::Forwarding);
                debug!(role = %LegRole::Proxy, "Reply delivered, ready to forward");
                self.core.dispatch(|delegate, role| delegate.ready_to_forward(role));
            }
            phase => debug!(role = %LegRole::Proxy, %tag, ?phase, "Discarding write completed out of phase"),
        }
    }

    fn did_disconnect(&self, error: Option<io::Error>) {
        self.core.transport_closed(error);
    }
}
