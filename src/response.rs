use std::{
    fmt,
    io::{self, ErrorKind},
};

use bytes::Bytes;

use crate::request::RequestId;

/// A coarse classification of why connecting to a destination failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    General,
    NotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TimedOut,
    Unsupported,
}

impl From<ErrorKind> for FailureKind {
    fn from(value: ErrorKind) -> Self {
        match value {
            ErrorKind::ConnectionAborted | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => Self::ConnectionRefused,
            ErrorKind::NotConnected => Self::NetworkUnreachable,
            ErrorKind::PermissionDenied => Self::NotAllowed,
            ErrorKind::TimedOut => Self::TimedOut,
            ErrorKind::AddrNotAvailable => Self::HostUnreachable,
            ErrorKind::Unsupported => Self::Unsupported,
            _ => Self::General,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::General => write!(f, "general failure"),
            Self::NotAllowed => write!(f, "not allowed"),
            Self::NetworkUnreachable => write!(f, "network unreachable"),
            Self::HostUnreachable => write!(f, "host unreachable"),
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// The failed outcome of a destination negotiation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {reason}")]
pub struct ConnectFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl ConnectFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl From<&io::Error> for ConnectFailure {
    fn from(value: &io::Error) -> Self {
        Self::new(value.kind().into(), value.to_string())
    }
}

/// The result of negotiating a [`ConnectRequest`](crate::request::ConnectRequest), produced by
/// the adapter leg and delivered exactly once to the client leg that issued the request.
///
/// A successful response may carry leftover bytes the adapter already read from the destination
/// while negotiating. These are written to the application before relaying begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    request_id: RequestId,
    outcome: Result<(), ConnectFailure>,
    leftover: Bytes,
}

impl ConnectResponse {
    pub fn success(request_id: RequestId) -> Self {
        Self {
            request_id,
            outcome: Ok(()),
            leftover: Bytes::new(),
        }
    }

    pub fn failure(request_id: RequestId, failure: ConnectFailure) -> Self {
        Self {
            request_id,
            outcome: Err(failure),
            leftover: Bytes::new(),
        }
    }

    pub fn with_leftover(mut self, leftover: Bytes) -> Self {
        self.leftover = leftover;
        self
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn outcome(&self) -> Result<(), &ConnectFailure> {
        self.outcome.as_ref().map(|_| ())
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn failure_reason(&self) -> Option<&ConnectFailure> {
        self.outcome.as_ref().err()
    }

    pub fn leftover(&self) -> &Bytes {
        &self.leftover
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_from_io_error() {
        let error = io::Error::new(ErrorKind::ConnectionRefused, "connection refused");
        let failure = ConnectFailure::from(&error);
        assert_eq!(failure.kind, FailureKind::ConnectionRefused);
        assert_eq!(failure.reason, "connection refused");
        assert_eq!(failure.to_string(), "connection refused: connection refused");
    }

    #[test]
    fn response_outcomes() {
        let id = RequestId(7);
        let ok = ConnectResponse::success(id).with_leftover(Bytes::from_static(b"banner"));
        assert!(ok.is_success());
        assert_eq!(ok.outcome(), Ok(()));
        assert_eq!(ok.leftover().as_ref(), b"banner");
        assert_eq!(ok.request_id(), id);

        let failure = ConnectFailure::new(FailureKind::HostUnreachable, "no route");
        let failed = ConnectResponse::failure(id, failure.clone());
        assert!(!failed.is_success());
        assert_eq!(failed.outcome(), Err(&failure));
        assert_eq!(failed.failure_reason(), Some(&failure));
    }
}
