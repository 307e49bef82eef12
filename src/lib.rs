//! The connection-relay core of a local tunneling proxy.
//!
//! Every proxied connection is made of two legs: a [`ProxySocket`](socket::ProxySocket) facing
//! the application that connected to us, and an [`AdapterSocket`](socket::AdapterSocket) facing
//! the destination (directly, or through an upstream proxy). Both legs implement the same
//! [`SocketLeg`](socket::SocketLeg) contract and report everything that happens to them to a
//! [`SocketDelegate`](socket::SocketDelegate), usually a [`Tunnel`](tunnel::Tunnel), which pairs
//! them up and relays bytes between them.
//!
//! All of the types here are single-threaded. Legs, transports and tunnels must be created and
//! used from within a [`LocalSet`](tokio::task::LocalSet), which acts as the serialized execution
//! context for every state transition and every event.

pub mod adapter;
pub mod error;
pub mod handshake;
pub mod raw;
pub mod request;
pub mod response;
pub mod server;
pub mod socket;
pub mod socks;
pub mod tunnel;
pub mod utils;

pub use portal_relay_sm::{Direction, SocketState};
