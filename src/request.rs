use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    num::NonZeroU16,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;

/// The longest domain name that may appear in a [`ConnectRequest`], in bytes.
pub const MAX_DOMAIN_NAME_LENGTH: usize = 255;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// A number that uniquely identifies a [`ConnectRequest`] within this process, used to match a
/// [`ConnectResponse`](crate::response::ConnectResponse) with the request it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Allocates a fresh identifier.
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("The destination host is empty")]
    EmptyHost,

    #[error("The destination domain name is {0} bytes long, but at most {MAX_DOMAIN_NAME_LENGTH} are allowed")]
    DomainTooLong(usize),

    #[error("The destination domain name contains an invalid character: {0:?}")]
    InvalidDomainCharacter(char),

    #[error("The destination port must not be zero")]
    ZeroPort,
}

/// The host part of a destination: either an IP address or a domain name that is still to be
/// resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    Ip(IpAddr),
    Domain(String),
}

impl Host {
    /// Parses a host, taking it as an IP address if possible and as a domain name otherwise.
    pub fn parse(s: &str) -> Result<Self, RequestError> {
        match s.parse::<IpAddr>() {
            Ok(ip) => Ok(Self::Ip(ip)),
            Err(_) => {
                validate_domain(s)?;
                Ok(Self::Domain(s.to_string()))
            }
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(ip) => ip.fmt(f),
            Self::Domain(domain) => f.write_str(domain),
        }
    }
}

impl From<IpAddr> for Host {
    fn from(value: IpAddr) -> Self {
        Self::Ip(value)
    }
}

fn validate_domain(domain: &str) -> Result<(), RequestError> {
    if domain.is_empty() {
        return Err(RequestError::EmptyHost);
    }

    if domain.len() > MAX_DOMAIN_NAME_LENGTH {
        return Err(RequestError::DomainTooLong(domain.len()));
    }

    match domain.chars().find(|c| !c.is_ascii_graphic()) {
        Some(c) => Err(RequestError::InvalidDomainCharacter(c)),
        None => Ok(()),
    }
}

/// A destination the application asked us to connect to, produced by the client leg once its
/// handshake completes and consumed by the adapter leg that negotiates it upstream.
///
/// Requests are immutable once created. The optional hints describe how the application intends
/// to use the connection: whether it asked for a UDP-like association, and any payload bytes it
/// sent along with the request which must reach the destination before anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    id: RequestId,
    host: Host,
    port: NonZeroU16,
    udp: bool,
    payload: Bytes,
}

impl ConnectRequest {
    /// Creates a request for `host:port`, where `host` is either an IP address or a domain name.
    pub fn new(host: &str, port: u16) -> Result<Self, RequestError> {
        Self::from_host(Host::parse(host)?, port)
    }

    pub fn from_host(host: Host, port: u16) -> Result<Self, RequestError> {
        if let Host::Domain(domain) = &host {
            validate_domain(domain)?;
        }

        let port = NonZeroU16::new(port).ok_or(RequestError::ZeroPort)?;

        Ok(Self {
            id: RequestId::next(),
            host,
            port,
            udp: false,
            payload: Bytes::new(),
        })
    }

    /// Marks whether the application asked for a UDP-like association instead of a stream.
    pub fn with_udp(mut self, udp: bool) -> Self {
        self.udp = udp;
        self
    }

    /// Attaches bytes the application already sent, which must be forwarded to the destination
    /// ahead of any relayed data.
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port.get()
    }

    pub fn is_udp(&self) -> bool {
        self.udp
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The destination as a socket address, if the host is an IP address.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self.host {
            Host::Ip(ip) => Some(SocketAddr::new(ip, self.port.get())),
            Host::Domain(_) => None,
        }
    }
}

impl fmt::Display for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Host::Ip(ip) => SocketAddr::new(*ip, self.port.get()).fmt(f),
            Host::Domain(domain) => write!(f, "{domain}:{}", self.port),
        }
    }
}
