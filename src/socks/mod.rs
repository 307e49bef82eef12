use std::fmt;

use bytes::Bytes;

use crate::request::RequestError;

mod socks5;

pub use socks5::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocksRequestError {
    InvalidVersion(u8),
    NoAuthMethodAcceptable,
    InvalidCommand(u8),
    InvalidAtyp(u8),
    InvalidDomainName,
    InvalidDestination(RequestError),
    AlreadyFinished,
}

impl fmt::Display for SocksRequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidVersion(ver) => write!(f, "Client requested invalid SOCKS version: {ver}"),
            Self::NoAuthMethodAcceptable => write!(f, "No acceptable SOCKS5 authentication method"),
            Self::InvalidCommand(cmd) => write!(f, "Client requested invalid SOCKS5 command: {cmd}"),
            Self::InvalidAtyp(atyp) => write!(f, "Client requested invalid SOCKS5 address type: {atyp}"),
            Self::InvalidDomainName => write!(f, "Client requested a domain name that isn't valid UTF-8"),
            Self::InvalidDestination(error) => write!(f, "Client requested an invalid destination: {error}"),
            Self::AlreadyFinished => write!(f, "Client sent data after the SOCKS5 handshake finished"),
        }
    }
}

impl std::error::Error for SocksRequestError {}

impl SocksRequestError {
    /// The bytes to send back to the client before closing, if the protocol has a way to
    /// report this error.
    pub fn reply(&self) -> Option<Bytes> {
        match self {
            Self::NoAuthMethodAcceptable => Some(Bytes::from_static(&[VERSION_BYTE, NO_ACCEPTABLE_METHODS])),
            Self::InvalidCommand(_) => Some(status_reply(SocksStatus::CommandNotSupported)),
            Self::InvalidAtyp(_) => Some(status_reply(SocksStatus::AtypNotSupported)),
            Self::InvalidDomainName | Self::InvalidDestination(_) => Some(status_reply(SocksStatus::GeneralFailure)),
            Self::InvalidVersion(_) | Self::AlreadyFinished => None,
        }
    }
}
