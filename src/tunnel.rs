//! The owner of a relayed connection, pairing a proxy leg with an adapter leg.

use std::{
    cell::{Cell, RefCell},
    io,
    rc::{Rc, Weak},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
};
use tracing::{debug, info, warn};

use crate::{
    adapter::AdapterFactory,
    error::{DisconnectReason, LegError},
    raw::DEFAULT_READ_BUFFER_SIZE,
    request::ConnectRequest,
    response::{ConnectFailure, ConnectResponse, FailureKind},
    socket::{AdapterSocket, LegRole, ProxySocket, SocketDelegate, SocketLeg, Tag},
};

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

static NEXT_TUNNEL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelConfig {
    /// The largest chunk a single read hands out, on either leg.
    pub read_buffer_size: usize,

    /// How long the application gets to finish negotiating its destination before the tunnel is
    /// torn down.
    pub handshake_timeout: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Relays one application connection to its destination.
///
/// The tunnel is the delegate of both of its legs. It routes the proxy leg's request to the
/// factory, builds the adapter leg on the resulting connection, routes the negotiated response
/// back, and once the proxy leg is ready relays both directions. Each direction has exactly one
/// read or one write in flight at any time: a read completing on one leg submits a write with the
/// same tag on the other, and that write completing submits the next read.
pub struct Tunnel<F: AdapterFactory + 'static> {
    id: u64,
    config: TunnelConfig,
    factory: Rc<F>,
    weak_self: Weak<Self>,
    proxy: Rc<dyn SocketLeg>,
    adapter: RefCell<Option<Rc<dyn SocketLeg>>>,
    forwarding: Cell<bool>,
    uploaded: Cell<u64>,
    downloaded: Cell<u64>,
    closed: watch::Sender<bool>,
}

impl<F: AdapterFactory + 'static> Tunnel<F> {
    /// Takes ownership of `proxy` and opens it. Must be called from within a
    /// [`LocalSet`](tokio::task::LocalSet).
    pub fn start(proxy: Rc<dyn SocketLeg>, factory: Rc<F>, config: TunnelConfig) -> Result<Rc<Self>, LegError> {
        let tunnel = Rc::new_cyclic(|weak_self| Self {
            id: NEXT_TUNNEL_ID.fetch_add(1, Ordering::Relaxed),
            config,
            factory,
            weak_self: weak_self.clone(),
            proxy,
            adapter: RefCell::new(None),
            forwarding: Cell::new(false),
            uploaded: Cell::new(0),
            downloaded: Cell::new(0),
            closed: watch::Sender::new(false),
        });

        let delegate: Weak<dyn SocketDelegate> = tunnel.weak_self.clone();
        tunnel.proxy.set_delegate(delegate);
        tunnel.proxy.open_socket()?;
        tunnel.spawn_handshake_timeout();

        debug!(tunnel = tunnel.id, "Tunnel started");
        Ok(tunnel)
    }

    /// Starts a tunnel for an application speaking SOCKS5.
    pub fn socks5<S>(stream: S, factory: Rc<F>, config: TunnelConfig) -> Result<Rc<Self>, LegError>
    where
        S: AsyncRead + AsyncWrite + 'static,
    {
        let proxy = ProxySocket::socks5(stream, config.read_buffer_size);
        Self::start(proxy, factory, config)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether both legs are relaying.
    pub fn is_forwarding(&self) -> bool {
        self.forwarding.get()
    }

    /// The amount of bytes relayed so far, as `(application to destination, destination to
    /// application)`.
    pub fn bytes_relayed(&self) -> (u64, u64) {
        (self.uploaded.get(), self.downloaded.get())
    }

    /// Waits until both legs are disconnected.
    pub async fn closed(&self) {
        let mut receiver = self.closed.subscribe();
        let _ = receiver.wait_for(|closed| *closed).await;
    }

    fn adapter(&self) -> Option<Rc<dyn SocketLeg>> {
        self.adapter.borrow().clone()
    }

    fn leg(&self, role: LegRole) -> Option<Rc<dyn SocketLeg>> {
        match role {
            LegRole::Proxy => Some(Rc::clone(&self.proxy)),
            LegRole::Adapter => self.adapter(),
        }
    }

    fn spawn_handshake_timeout(&self) {
        let weak = self.weak_self.clone();
        let timeout = self.config.handshake_timeout;
        tokio::task::spawn_local(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tunnel) = weak.upgrade() {
                if !tunnel.forwarding.get() && !*tunnel.closed.borrow() {
                    warn!(tunnel = tunnel.id, ?timeout, "Handshake timed out");
                    tunnel.abort();
                }
            }
        });
    }

    /// Force-disconnects both legs.
    fn abort(&self) {
        self.proxy.force_disconnect();
        if let Some(adapter) = self.adapter() {
            adapter.force_disconnect();
        }
    }

    /// Handles the result of a call the tunnel expects to always succeed.
    fn expect_ok(&self, result: Result<(), LegError>, action: &str) {
        if let Err(error) = result {
            warn!(tunnel = self.id, "Failed to {action}: {error}");
            self.abort();
        }
    }

    fn respond(&self, response: ConnectResponse) {
        let result = self.proxy.respond_to_response(response);
        self.expect_ok(result, "respond to the application");
    }

    fn connect_adapter(&self, request: ConnectRequest) {
        let weak = self.weak_self.clone();
        let factory = Rc::clone(&self.factory);
        tokio::task::spawn_local(async move {
            let result = factory.connect(&request).await;
            if let Some(tunnel) = weak.upgrade() {
                tunnel.adapter_connected(request, result);
            }
        });
    }

    fn adapter_connected(&self, request: ConnectRequest, result: io::Result<F::Stream>) {
        if self.proxy.is_disconnected() {
            debug!(tunnel = self.id, %request, "Application left before the destination was reached");
            return;
        }

        let stream = match result {
            Ok(stream) => stream,
            Err(error) => {
                info!(tunnel = self.id, %request, "Failed to connect to destination: {error}");
                let failure = ConnectFailure::from(&error);
                self.respond(ConnectResponse::failure(request.id(), failure));
                return;
            }
        };

        let protocol = self.factory.protocol(&request);
        let adapter: Rc<dyn SocketLeg> = AdapterSocket::new(stream, request, protocol, self.config.read_buffer_size);
        let delegate: Weak<dyn SocketDelegate> = self.weak_self.clone();
        adapter.set_delegate(delegate);
        *self.adapter.borrow_mut() = Some(Rc::clone(&adapter));

        let result = adapter.open_socket();
        self.expect_ok(result, "open the adapter leg");
    }

    fn start_forwarding(&self) {
        let Some(adapter) = self.adapter() else {
            warn!(tunnel = self.id, "Proxy leg ready without an adapter leg");
            self.abort();
            return;
        };

        self.forwarding.set(true);
        info!(tunnel = self.id, "Relaying");
        let result = self.proxy.read_data(Tag(0)).and_then(|()| adapter.read_data(Tag(0)));
        self.expect_ok(result, "start relaying");
    }

    fn finish_if_closed(&self) {
        let adapter_closed = self.adapter().map_or(true, |adapter| adapter.is_disconnected());
        if !self.proxy.is_disconnected() || !adapter_closed || *self.closed.borrow() {
            return;
        }

        let (uploaded, downloaded) = self.bytes_relayed();
        info!(tunnel = self.id, uploaded, downloaded, "Tunnel closed");
        self.closed.send_replace(true);
    }
}

impl<F: AdapterFactory + 'static> SocketDelegate for Tunnel<F> {
    fn did_receive_request(&self, role: LegRole, request: ConnectRequest) {
        info!(tunnel = self.id, %role, %request, "Connection requested");

        if request.is_udp() {
            let failure = ConnectFailure::new(FailureKind::Unsupported, "UDP relaying is not supported");
            self.respond(ConnectResponse::failure(request.id(), failure));
            return;
        }

        self.connect_adapter(request);
    }

    fn did_connect(&self, role: LegRole) {
        debug!(tunnel = self.id, %role, "Destination reached");
    }

    fn did_receive_response(&self, role: LegRole, response: ConnectResponse) {
        debug!(tunnel = self.id, %role, success = response.is_success(), "Negotiation finished");

        let failed = !response.is_success();
        self.respond(response);
        if failed {
            if let Some(adapter) = self.adapter() {
                adapter.force_disconnect();
            }
        }
    }

    fn ready_to_forward(&self, _role: LegRole) {
        self.start_forwarding();
    }

    fn did_read_data(&self, role: LegRole, data: Bytes, tag: Tag) {
        let counter = match role {
            LegRole::Proxy => &self.uploaded,
            LegRole::Adapter => &self.downloaded,
        };
        counter.set(counter.get() + data.len() as u64);

        let Some(other) = self.leg(role.other()) else {
            return;
        };

        if let Err(error) = other.write_data(data, tag) {
            debug!(tunnel = self.id, %role, %tag, "Dropping relayed data: {error}");
            if !error.is_not_open() {
                self.abort();
            }
        }
    }

    fn did_write_data(&self, role: LegRole, tag: Tag) {
        let Some(source) = self.leg(role.other()) else {
            return;
        };

        if let Err(error) = source.read_data(Tag(tag.0.wrapping_add(1))) {
            debug!(tunnel = self.id, role = %role.other(), "Stopped reading: {error}");
            if !error.is_not_open() {
                self.abort();
            }
        }
    }

    fn did_disconnect(&self, role: LegRole, reason: DisconnectReason) {
        match reason.is_clean() {
            true => debug!(tunnel = self.id, %role, "Leg closed"),
            false => info!(tunnel = self.id, %role, %reason, "Leg disconnected"),
        }

        if let Some(other) = self.leg(role.other()) {
            match reason.failure() {
                Some(_) if role == LegRole::Adapter => other.disconnect(),
                Some(_) => other.force_disconnect(),
                None => other.disconnect(),
            }
        }

        self.finish_if_closed();
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::{
        adapter::{AdapterProtocol, AdapterStep, DirectProtocol},
        utils::test_utils::run_local,
        SocketState,
    };

    const CONNECT_EXAMPLE: &[u8] = &[5, 1, 0, 3, 11, b'e', b'x', b'a', b'm', b'p', b'l', b'e', b'.', b'c', b'o', b'm', 1, 187];

    /// Connects every request to a local task echoing everything back.
    struct EchoFactory;

    impl AdapterFactory for EchoFactory {
        type Stream = DuplexStream;

        async fn connect(&self, _request: &ConnectRequest) -> io::Result<DuplexStream> {
            let (ours, theirs) = duplex(1024);
            tokio::task::spawn_local(async move {
                let (mut reader, mut writer) = tokio::io::split(theirs);
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });

            Ok(ours)
        }

        fn protocol(&self, _request: &ConnectRequest) -> Box<dyn AdapterProtocol> {
            Box::new(DirectProtocol)
        }
    }

    struct RefusingFactory;

    impl AdapterFactory for RefusingFactory {
        type Stream = DuplexStream;

        async fn connect(&self, _request: &ConnectRequest) -> io::Result<DuplexStream> {
            Err(io::Error::new(ErrorKind::ConnectionRefused, "connection refused"))
        }

        fn protocol(&self, _request: &ConnectRequest) -> Box<dyn AdapterProtocol> {
            Box::new(DirectProtocol)
        }
    }

    /// Reaches every destination, but the upstream negotiation always refuses the request.
    struct NegotiationRefusingFactory;

    struct RefusingProtocol;

    impl AdapterProtocol for RefusingProtocol {
        fn start(&mut self, _request: &ConnectRequest) -> AdapterStep {
            AdapterStep::Done(Err(ConnectFailure::new(FailureKind::ConnectionRefused, "connection refused")))
        }

        fn feed(&mut self, _data: &[u8]) -> AdapterStep {
            AdapterStep::NeedMore
        }
    }

    impl AdapterFactory for NegotiationRefusingFactory {
        type Stream = DuplexStream;

        async fn connect(&self, _request: &ConnectRequest) -> io::Result<DuplexStream> {
            let (ours, _theirs) = duplex(1024);
            Ok(ours)
        }

        fn protocol(&self, _request: &ConnectRequest) -> Box<dyn AdapterProtocol> {
            Box::new(RefusingProtocol)
        }
    }

    async fn socks5_connect(app: &mut DuplexStream) -> [u8; 10] {
        app.write_all(&[5, 1, 0]).await.unwrap();
        let mut method = [0u8; 2];
        app.read_exact(&mut method).await.unwrap();
        assert_eq!(method, [5, 0]);

        app.write_all(CONNECT_EXAMPLE).await.unwrap();
        let mut reply = [0u8; 10];
        app.read_exact(&mut reply).await.unwrap();
        reply
    }

    async fn wait_closed<F: AdapterFactory + 'static>(tunnel: &Tunnel<F>) {
        tokio::time::timeout(Duration::from_secs(5), tunnel.closed())
            .await
            .expect("Tunnel didn't close in time");
    }

    #[test]
    fn relays_both_ways() {
        run_local(async {
            let (stream, mut app) = duplex(1024);
            let tunnel = Tunnel::socks5(stream, Rc::new(EchoFactory), TunnelConfig::default()).unwrap();

            assert_eq!(socks5_connect(&mut app).await, [5, 0, 0, 1, 0, 0, 0, 0, 0, 0]);

            app.write_all(b"ping").await.unwrap();
            let mut echoed = [0u8; 4];
            app.read_exact(&mut echoed).await.unwrap();
            assert_eq!(&echoed, b"ping");
            assert!(tunnel.is_forwarding());

            drop(app);
            wait_closed(&tunnel).await;
            assert_eq!(tunnel.bytes_relayed(), (4, 4));
        });
    }

    #[test]
    fn refused_destination_is_reported() {
        run_local(async {
            let (stream, mut app) = duplex(1024);
            let tunnel = Tunnel::socks5(stream, Rc::new(RefusingFactory), TunnelConfig::default()).unwrap();

            assert_eq!(socks5_connect(&mut app).await, [5, 5, 0, 1, 0, 0, 0, 0, 0, 0]);
            let mut rest = Vec::new();
            app.read_to_end(&mut rest).await.unwrap();
            assert!(rest.is_empty());

            wait_closed(&tunnel).await;
            assert!(!tunnel.is_forwarding());
        });
    }

    #[test]
    fn failed_negotiation_tears_down_both_legs() {
        run_local(async {
            let (stream, mut app) = duplex(1024);
            let tunnel = Tunnel::socks5(stream, Rc::new(NegotiationRefusingFactory), TunnelConfig::default()).unwrap();

            assert_eq!(socks5_connect(&mut app).await, [5, 5, 0, 1, 0, 0, 0, 0, 0, 0]);
            let mut rest = Vec::new();
            app.read_to_end(&mut rest).await.unwrap();
            assert!(rest.is_empty());

            wait_closed(&tunnel).await;
            assert_eq!(tunnel.proxy.state(), SocketState::Invalid);
            assert_eq!(tunnel.adapter().map(|adapter| adapter.state()), Some(SocketState::Invalid));
            assert!(!tunnel.is_forwarding());
        });
    }

    #[test]
    fn udp_associate_is_refused() {
        run_local(async {
            let (stream, mut app) = duplex(1024);
            let tunnel = Tunnel::socks5(stream, Rc::new(EchoFactory), TunnelConfig::default()).unwrap();

            app.write_all(&[5, 1, 0, 5, 3, 0, 1, 0, 0, 0, 0, 0, 53]).await.unwrap();
            let mut reply = Vec::new();
            app.read_to_end(&mut reply).await.unwrap();
            assert_eq!(reply, [5, 0, 5, 7, 0, 1, 0, 0, 0, 0, 0, 0]);

            wait_closed(&tunnel).await;
        });
    }

    #[test]
    fn silent_application_times_out() {
        run_local(async {
            let (stream, mut app) = duplex(1024);
            let config = TunnelConfig {
                handshake_timeout: Duration::from_millis(50),
                ..TunnelConfig::default()
            };
            let tunnel = Tunnel::socks5(stream, Rc::new(EchoFactory), config).unwrap();

            let mut received = Vec::new();
            app.read_to_end(&mut received).await.unwrap();
            assert!(received.is_empty());

            wait_closed(&tunnel).await;
        });
    }
}
