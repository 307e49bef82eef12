use std::{
    fmt,
    net::{IpAddr, SocketAddr},
};

use portal_relay::{request::Host, server::ListenAddress};

#[derive(Debug, PartialEq, Eq)]
pub enum ListenErrorType {
    UnexpectedEnd(String),
    InvalidListenAddress(String, String),
}

impl fmt::Display for ListenErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEnd(arg) => write!(f, "Expected socket address after {arg}"),
            Self::InvalidListenAddress(arg, addr) => write!(f, "Invalid socket address after {arg}: {addr}"),
        }
    }
}

/// Parses a listen address argument. Domain names are kept as they are, to be resolved when
/// binding. The resulting [`ListenAddress`] is pushed onto `result_vec` unless it's already there.
pub(super) fn parse_listen_arg(
    result_vec: &mut Vec<ListenAddress>,
    arg: String,
    maybe_arg2: Option<String>,
    default_port: u16,
) -> Result<(), ListenErrorType> {
    let arg2 = match maybe_arg2 {
        Some(value) => value,
        None => return Err(ListenErrorType::UnexpectedEnd(arg)),
    };

    let address = match parse_listen_address(&arg2, default_port) {
        Some(address) => address,
        None => return Err(ListenErrorType::InvalidListenAddress(arg, arg2)),
    };

    if !result_vec.contains(&address) {
        result_vec.push(address);
    }

    Ok(())
}

fn parse_listen_address(s: &str, default_port: u16) -> Option<ListenAddress> {
    if let Ok(address) = s.parse::<SocketAddr>() {
        return Some(address.into());
    }

    let unbracketed = s.strip_prefix('[').and_then(|s| s.strip_suffix(']')).unwrap_or(s);
    if let Ok(ip) = unbracketed.parse::<IpAddr>() {
        return Some(ListenAddress::new(Host::Ip(ip), default_port));
    }

    let (host, port) = match s.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().ok()?),
        None => (s, default_port),
    };

    Host::parse(host).ok().map(|host| ListenAddress::new(host, port))
}
