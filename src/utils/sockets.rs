use std::{
    future::poll_fn,
    io::{self, Error, ErrorKind},
    net::SocketAddr,
    task::Poll,
};

use tokio::net::{TcpListener, TcpStream};

use crate::request::Host;

/// Accepts from any [`TcpListener`], returning the index and the accept result of the first
/// listener to get an incoming connection.
///
/// This function never returns an [`ErrorKind::WouldBlock`] error.
pub async fn accept_from_any(listeners: &[TcpListener]) -> (usize, io::Result<(TcpStream, SocketAddr)>) {
    loop {
        let (index, result) = poll_fn(|cx| {
            for (index, listener) in listeners.iter().enumerate() {
                if let Poll::Ready(result) = listener.poll_accept(cx) {
                    return Poll::Ready((index, result));
                }
            }

            Poll::Pending
        })
        .await;

        if !result.as_ref().is_err_and(|error| error.kind() == ErrorKind::WouldBlock) {
            return (index, result);
        }
    }
}

/// Binds a listener for every address `host` resolves to.
///
/// Fails only if no listener at all could be bound.
pub async fn bind_listeners(host: &Host, port: u16) -> io::Result<Vec<TcpListener>> {
    match host {
        Host::Ip(ip) => Ok(vec![TcpListener::bind(SocketAddr::new(*ip, port)).await?]),
        Host::Domain(domain) => {
            let addresses = tokio::net::lookup_host((domain.as_str(), port)).await?;

            let mut listeners = Vec::new();
            let mut last_error = None;

            for address in addresses {
                match TcpListener::bind(address).await {
                    Ok(listener) => listeners.push(listener),
                    Err(error) => last_error = Some(error),
                }
            }

            if listeners.is_empty() {
                Err(last_error.unwrap_or_else(|| {
                    let msg = format!("The domain name \"{domain}\" could not be resolved to any addresses");
                    Error::new(ErrorKind::InvalidInput, msg)
                }))
            } else {
                Ok(listeners)
            }
        }
    }
}

/// Connects to `host:port`, resolving domain names and trying each resolved address in order.
pub async fn connect_host(host: &Host, port: u16) -> io::Result<TcpStream> {
    match host {
        Host::Ip(ip) => TcpStream::connect(SocketAddr::new(*ip, port)).await,
        Host::Domain(domain) => TcpStream::connect((domain.as_str(), port)).await,
    }
}
