use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::SocksRequestError;
use crate::{
    handshake::{ClientHandshake, HandshakeStep},
    request::{ConnectRequest, Host},
    response::{ConnectResponse, FailureKind},
};

pub const VERSION_BYTE: u8 = 5;
pub const NO_AUTHENTICATION: u8 = 0;
pub const NO_ACCEPTABLE_METHODS: u8 = 0xFF;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum SocksStatus {
    Succeeded = 0,
    GeneralFailure = 1,
    NotAllowedByRuleset = 2,
    NetworkUnreachable = 3,
    HostUnreachable = 4,
    ConnectionRefused = 5,
    TTLExpired = 6,
    CommandNotSupported = 7,
    AtypNotSupported = 8,
}

impl From<FailureKind> for SocksStatus {
    fn from(value: FailureKind) -> Self {
        match value {
            FailureKind::General => Self::GeneralFailure,
            FailureKind::NotAllowed => Self::NotAllowedByRuleset,
            FailureKind::NetworkUnreachable => Self::NetworkUnreachable,
            FailureKind::HostUnreachable | FailureKind::TimedOut => Self::HostUnreachable,
            FailureKind::ConnectionRefused => Self::ConnectionRefused,
            FailureKind::Unsupported => Self::CommandNotSupported,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum SocksCommand {
    Connect = 1,
    Bind = 2,
    UdpAssociate = 3,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum SocksAtyp {
    IPv4 = 1,
    Domainname = 3,
    IPv6 = 4,
}

/// Builds a reply with the given status and an unspecified IPv4 bound address.
pub fn status_reply(status: SocksStatus) -> Bytes {
    let rep = u8::from(status);
    let atyp = u8::from(SocksAtyp::IPv4);
    Bytes::copy_from_slice(&[VERSION_BYTE, rep, 0, atyp, 0, 0, 0, 0, 0, 0])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Greeting,
    Request,
    Finished,
}

/// The server side of a SOCKS5 handshake without authentication, as described in RFC 1928.
///
/// Handles CONNECT and UDP ASSOCIATE requests with any address type. A UDP ASSOCIATE request is
/// turned into a request with the UDP hint set, and it's up to whoever answers it to refuse it.
/// Bytes the client pipelines after its request become the request's payload.
#[derive(Debug)]
pub struct Socks5Handshake {
    buffer: BytesMut,
    stage: Stage,
}

impl Socks5Handshake {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            stage: Stage::Greeting,
        }
    }

    fn reject(&mut self, error: SocksRequestError) -> HandshakeStep {
        self.stage = Stage::Finished;
        HandshakeStep::Reject {
            reply: error.reply(),
            reason: error.to_string(),
        }
    }

    fn parse_greeting(&mut self) -> Result<Option<Bytes>, SocksRequestError> {
        // VER, NMETHODS, METHODS...
        if self.buffer.len() < 2 {
            return Ok(None);
        }

        if self.buffer[0] != VERSION_BYTE {
            return Err(SocksRequestError::InvalidVersion(self.buffer[0]));
        }

        let nmethods = self.buffer[1] as usize;
        if self.buffer.len() < 2 + nmethods {
            return Ok(None);
        }

        let noauth_found = self.buffer[2..(2 + nmethods)].contains(&NO_AUTHENTICATION);
        self.buffer.advance(2 + nmethods);

        match noauth_found {
            true => Ok(Some(Bytes::from_static(&[VERSION_BYTE, NO_AUTHENTICATION]))),
            false => Err(SocksRequestError::NoAuthMethodAcceptable),
        }
    }

    fn parse_request(&mut self) -> Result<Option<ConnectRequest>, SocksRequestError> {
        // VER, CMD, RSV, ATYP, DST.ADDR, DST.PORT
        if self.buffer.len() < 4 {
            return Ok(None);
        }

        if self.buffer[0] != VERSION_BYTE {
            return Err(SocksRequestError::InvalidVersion(self.buffer[0]));
        }

        let command = match SocksCommand::try_from(self.buffer[1]) {
            Ok(SocksCommand::Bind) | Err(_) => return Err(SocksRequestError::InvalidCommand(self.buffer[1])),
            Ok(command) => command,
        };

        let atyp = SocksAtyp::try_from(self.buffer[3]).map_err(|_| SocksRequestError::InvalidAtyp(self.buffer[3]))?;

        let address_len = match atyp {
            SocksAtyp::IPv4 => 4,
            SocksAtyp::IPv6 => 16,
            SocksAtyp::Domainname => match self.buffer.get(4) {
                Some(len) => 1 + *len as usize,
                None => return Ok(None),
            },
        };

        let total_len = 4 + address_len + 2;
        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let address = &self.buffer[4..(4 + address_len)];
        let host = match atyp {
            SocksAtyp::IPv4 => {
                let octets: [u8; 4] = [address[0], address[1], address[2], address[3]];
                Host::Ip(IpAddr::V4(Ipv4Addr::from(octets)))
            }
            SocksAtyp::IPv6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(address);
                Host::Ip(IpAddr::V6(Ipv6Addr::from(octets)))
            }
            SocksAtyp::Domainname => {
                let domainname = std::str::from_utf8(&address[1..]).map_err(|_| SocksRequestError::InvalidDomainName)?;
                Host::parse(domainname).map_err(SocksRequestError::InvalidDestination)?
            }
        };

        let port = u16::from_be_bytes([self.buffer[total_len - 2], self.buffer[total_len - 1]]);
        let request = ConnectRequest::from_host(host, port).map_err(SocksRequestError::InvalidDestination)?;

        self.buffer.advance(total_len);
        let payload = self.buffer.split().freeze();

        Ok(Some(
            request
                .with_udp(command == SocksCommand::UdpAssociate)
                .with_payload(payload),
        ))
    }
}

impl Default for Socks5Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientHandshake for Socks5Handshake {
    fn feed(&mut self, data: &[u8]) -> HandshakeStep {
        self.buffer.extend_from_slice(data);

        match self.stage {
            Stage::Greeting => match self.parse_greeting() {
                Ok(None) => HandshakeStep::NeedMore,
                Ok(Some(reply)) => {
                    self.stage = Stage::Request;
                    HandshakeStep::Reply(reply)
                }
                Err(error) => self.reject(error),
            },
            Stage::Request => match self.parse_request() {
                Ok(None) => HandshakeStep::NeedMore,
                Ok(Some(request)) => {
                    self.stage = Stage::Finished;
                    HandshakeStep::Request(request)
                }
                Err(error) => self.reject(error),
            },
            Stage::Finished => self.reject(SocksRequestError::AlreadyFinished),
        }
    }

    fn reply(&self, response: &ConnectResponse) -> Bytes {
        let status = match response.outcome() {
            Ok(()) => SocksStatus::Succeeded,
            Err(failure) => SocksStatus::from(failure.kind),
        };

        status_reply(status)
    }
}
