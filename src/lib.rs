//! Chord ring node over connectionless UDP datagrams.
//!
//! Every peer is an equal node on an m-bit identifier circle. Lookups route
//! through per-node finger tables in O(log N) hops, a set of periodic
//! maintenance loops repairs the ring under churn, and stored keys are
//! fanned out to the owner's successor group for durability.
//!
//! The crate exposes a single entry point, [`NodeHandle`], which binds the
//! datagram endpoint, spawns the listener and the maintenance loops, and
//! offers the application-facing operations (join, store, lookup, leave,
//! summary).

use std::net::SocketAddr;

pub mod handle;
pub mod kv;
pub mod node;
pub mod threads;
pub mod transport;
pub mod utils;
pub mod wire;

pub use handle::{NodeHandle, NodeSummary};
pub use node::peer::Peer;
pub use utils::config::Config;

/// Error type covering endpoint setup, codec and request failures.
///
/// Background loops never propagate these; they log and retry on the next
/// cycle. Direct application requests surface them to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The local datagram endpoint could not be bound. Fatal at startup.
    #[error("failed to bind datagram endpoint on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// An encoded message does not fit into a single datagram.
    #[error("datagram of {len} bytes exceeds the {max} byte limit")]
    DatagramTooLarge { len: usize, max: usize },

    /// A datagram carried no command token.
    #[error("empty datagram")]
    EmptyDatagram,

    /// The command token is not part of the protocol.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The command is known but its arguments do not parse.
    #[error("malformed {command} message: {reason}")]
    Malformed {
        command: &'static str,
        reason: &'static str,
    },

    /// A synchronous request saw no reply within its deadline.
    #[error("timed out waiting for a {0} reply")]
    ReplyTimeout(&'static str),

    /// A synchronous request was answered with the wrong message kind.
    #[error("expected a {expected} reply, got {got}")]
    UnexpectedReply {
        expected: &'static str,
        got: &'static str,
    },

    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Keys travel as single whitespace-free tokens on the wire.
    #[error("invalid key {0:?}: keys must be non-empty and whitespace-free")]
    InvalidKey(String),

    /// Values fill the remainder of a datagram and cannot be empty.
    #[error("invalid value: values must be non-empty")]
    InvalidValue,

    /// The node has already left the ring or been shut down.
    #[error("node is stopped")]
    Stopped,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience result type for ring operations.
pub type Result<T> = std::result::Result<T, Error>;
