use std::{
    fmt,
    io::{self, Error, ErrorKind},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    rc::Rc,
};

use tokio::{net::TcpListener, select};
use tracing::{debug, info, warn};

use crate::{
    adapter::{AdapterFactory, DirectFactory},
    request::Host,
    tunnel::{Tunnel, TunnelConfig},
    utils::{accept_from_any, bind_listeners},
};

pub const DEFAULT_SOCKS5_PORT: u16 = 1080;

/// An address to listen for applications on. A domain name binds every address it resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddress {
    pub host: Host,
    pub port: u16,
}

impl ListenAddress {
    pub fn new(host: Host, port: u16) -> Self {
        Self { host, port }
    }
}

impl Default for ListenAddress {
    fn default() -> Self {
        Self::new(Host::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST)), DEFAULT_SOCKS5_PORT)
    }
}

impl From<SocketAddr> for ListenAddress {
    fn from(value: SocketAddr) -> Self {
        Self::new(Host::Ip(value.ip()), value.port())
    }
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Host::Ip(ip) => SocketAddr::new(*ip, self.port).fmt(f),
            Host::Domain(domain) => write!(f, "{domain}:{}", self.port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen_addresses: Vec<ListenAddress>,
    pub tunnel: TunnelConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addresses: vec![ListenAddress::default()],
            tunnel: TunnelConfig::default(),
        }
    }
}

/// Accepts SOCKS5 applications and relays each of them through its own [`Tunnel`].
pub struct RelayServer<F: AdapterFactory + 'static = DirectFactory> {
    listeners: Vec<TcpListener>,
    factory: Rc<F>,
    config: TunnelConfig,
}

impl RelayServer<DirectFactory> {
    /// Binds every listen address in `config`. Fails if any of them can't be bound.
    pub async fn bind(config: &ServerConfig) -> io::Result<Self> {
        if config.listen_addresses.is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput, "No listen addresses were specified"));
        }

        let mut listeners = Vec::new();
        for address in &config.listen_addresses {
            match bind_listeners(&address.host, address.port).await {
                Ok(bound) => listeners.extend(bound),
                Err(error) => {
                    warn!(%address, "Failed to bind listener: {error}");
                    return Err(error);
                }
            }
        }

        Ok(Self {
            listeners,
            factory: Rc::new(DirectFactory),
            config: config.tunnel,
        })
    }
}

impl<F: AdapterFactory + 'static> RelayServer<F> {
    /// Replaces how adapter legs reach their destinations.
    pub fn with_factory<G: AdapterFactory + 'static>(self, factory: G) -> RelayServer<G> {
        RelayServer {
            listeners: self.listeners,
            factory: Rc::new(factory),
            config: self.config,
        }
    }

    pub fn local_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        self.listeners.iter().map(|listener| listener.local_addr()).collect()
    }

    /// Accepts applications forever. Must be run from within a
    /// [`LocalSet`](tokio::task::LocalSet).
    pub async fn run(self) -> io::Result<()> {
        for listener in &self.listeners {
            info!("Listening for SOCKS5 applications at {}", listener.local_addr()?);
        }

        loop {
            let (index, accept_result) = accept_from_any(&self.listeners).await;
            let (stream, address) = match accept_result {
                Ok(accepted) => accepted,
                Err(error) => {
                    warn!(listener = index, "Failed to accept incoming connection: {error}");
                    continue;
                }
            };

            if let Err(error) = stream.set_nodelay(true) {
                debug!(%address, "Failed to set TCP_NODELAY: {error}");
            }

            match Tunnel::socks5(stream, Rc::clone(&self.factory), self.config) {
                Ok(tunnel) => {
                    info!(tunnel = tunnel.id(), %address, "Accepted application");
                    tokio::task::spawn_local(async move {
                        tunnel.closed().await;
                    });
                }
                Err(error) => warn!(%address, "Failed to start tunnel: {error}"),
            }
        }
    }
}

/// Binds the configured addresses and relays applications until Ctrl-C is pressed.
pub async fn run_server(config: ServerConfig) -> io::Result<()> {
    let server = RelayServer::bind(&config).await?;

    select! {
        result = server.run() => result,
        result = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
            result
        }
    }
}
