//! Connectionless datagram transport.
//!
//! One [`Endpoint`] per node carries all protocol traffic: sends may come
//! from any task, receives belong to the listener. Synchronous exchanges
//! (`request`, `probe`) open a transient ephemeral-port socket instead, so
//! their replies can never be misdelivered to the shared dispatcher.
//!
//! Framing is one message per datagram, UTF-8 text, no reliability.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use log::debug;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::wire::Message;
use crate::{Error, Result};

pub struct Endpoint {
    socket: UdpSocket,
    local: SocketAddr,
    max_datagram: usize,
}

impl Endpoint {
    /// Binds the node's shared endpoint. Failure here is fatal to startup
    /// and surfaces to the caller.
    pub async fn bind(addr: SocketAddr, max_datagram: usize) -> Result<Endpoint> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let local = socket.local_addr().map_err(|source| Error::Bind { addr, source })?;
        Ok(Endpoint {
            socket,
            local,
            max_datagram,
        })
    }

    /// The bound address, with the OS-assigned port filled in.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Fire-and-forget send of one message. Never blocks on the peer.
    pub async fn send(&self, message: &Message, to: SocketAddr) -> Result<()> {
        let line = message.encode();
        if line.len() > self.max_datagram {
            return Err(Error::DatagramTooLarge {
                len: line.len(),
                max: self.max_datagram,
            });
        }
        self.socket.send_to(line.as_bytes(), to).await?;
        Ok(())
    }

    /// Receives one datagram as text together with its source address.
    pub async fn recv(&self) -> Result<(String, SocketAddr)> {
        let mut buf = vec![0u8; self.max_datagram];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        Ok((String::from_utf8_lossy(&buf[..len]).into_owned(), from))
    }
}

/// Sends `request` to `target` from a transient socket and waits for a
/// single reply datagram, decoded, under `deadline`.
pub async fn request(
    target: SocketAddr,
    request: &Message,
    deadline: Duration,
    max_datagram: usize,
) -> Result<Message> {
    let transient = Endpoint::bind(unspecified_for(target), max_datagram).await?;
    transient.send(request, target).await?;
    match timeout(deadline, transient.recv()).await {
        Ok(received) => {
            let (line, _) = received?;
            Message::decode(&line)
        }
        Err(_) => Err(Error::ReplyTimeout(request.command())),
    }
}

/// Liveness probe: PING from a transient socket, true on a PONG within the
/// deadline.
pub async fn probe(target: SocketAddr, deadline: Duration, max_datagram: usize) -> bool {
    match request(target, &Message::Ping, deadline, max_datagram).await {
        Ok(Message::Pong) => true,
        Ok(other) => {
            debug!("probe of {target} answered with {} instead of PONG", other.command());
            false
        }
        Err(_) => false,
    }
}

/// An unbound local address in the target's family, for transient sockets.
fn unspecified_for(target: SocketAddr) -> SocketAddr {
    let ip: IpAddr = if target.is_ipv4() {
        IpAddr::from([0, 0, 0, 0])
    } else {
        IpAddr::from([0u16; 8])
    };
    SocketAddr::new(ip, 0)
}
