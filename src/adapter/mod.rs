//! The destination-facing side of destination negotiation.

use std::io;

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::{request::ConnectRequest, response::ConnectFailure, utils::connect_host};

/// What an [`AdapterProtocol`] needs to happen next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterStep {
    /// More bytes must be read from upstream.
    NeedMore,

    /// These bytes must be written upstream. The protocol is fed an empty slice once the write
    /// completes.
    Send(Bytes),

    /// Negotiation is over. A success carries any bytes already read from the destination beyond
    /// the protocol's own messages.
    Done(Result<Bytes, ConnectFailure>),
}

/// An incremental negotiation with whatever sits at the other end of an adapter leg's
/// connection, be it the destination itself or an upstream proxy.
pub trait AdapterProtocol {
    fn start(&mut self, request: &ConnectRequest) -> AdapterStep;

    fn feed(&mut self, data: &[u8]) -> AdapterStep;
}

/// The protocol of a direct connection: there is nothing to negotiate, so only the request's
/// payload (if any) is sent before succeeding.
#[derive(Debug, Default)]
pub struct DirectProtocol;

impl AdapterProtocol for DirectProtocol {
    fn start(&mut self, request: &ConnectRequest) -> AdapterStep {
        match request.payload().is_empty() {
            true => AdapterStep::Done(Ok(Bytes::new())),
            false => AdapterStep::Send(request.payload().clone()),
        }
    }

    fn feed(&mut self, data: &[u8]) -> AdapterStep {
        AdapterStep::Done(Ok(Bytes::copy_from_slice(data)))
    }
}

/// Opens the connections adapter legs are built on.
#[allow(async_fn_in_trait)]
pub trait AdapterFactory {
    type Stream: AsyncRead + AsyncWrite + 'static;

    async fn connect(&self, request: &ConnectRequest) -> io::Result<Self::Stream>;

    fn protocol(&self, request: &ConnectRequest) -> Box<dyn AdapterProtocol>;
}

/// Connects straight to the requested destination.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectFactory;

impl AdapterFactory for DirectFactory {
    type Stream = TcpStream;

    async fn connect(&self, request: &ConnectRequest) -> io::Result<TcpStream> {
        let stream = connect_host(request.host(), request.port()).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn protocol(&self, _request: &ConnectRequest) -> Box<dyn AdapterProtocol> {
        Box::new(DirectProtocol)
    }
}
