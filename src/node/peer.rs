use std::fmt;
use std::fmt::Debug;
use std::net::{IpAddr, SocketAddr};

use serde::Serialize;

use crate::utils::crypto::hash;
use crate::utils::types::Id;

/// Value-type descriptor of one ring participant.
///
/// Nodes never hold owning references to each other; the ring's cycle exists
/// only across processes, as copies of these triples.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Peer {
    pub address: IpAddr,
    pub port: u16,
    pub id: Id,
}

impl Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("")
            .field("id", &self.id)
            .field("address", &format_args!("{}:{}", self.address, self.port))
            .finish()
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.address, self.port)
    }
}

impl Peer {
    pub fn new(address: IpAddr, port: u16, id: Id) -> Self {
        Peer { address, port, id }
    }

    /// Derives the ring position from the `address:port` byte string.
    pub fn from_endpoint(address: IpAddr, port: u16, ring_bits: u32) -> Self {
        let id = hash(format!("{address}:{port}").as_bytes(), ring_bits);
        Peer { address, port, id }
    }

    pub fn sock_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Whether a datagram source address belongs to this peer's endpoint.
    pub fn is_endpoint(&self, addr: &SocketAddr) -> bool {
        self.address == addr.ip() && self.port == addr.port()
    }
}
