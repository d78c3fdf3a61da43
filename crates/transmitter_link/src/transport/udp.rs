//! Connected UDP transport

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::debug;

use super::Transport;
use crate::codec::{decode_datagram, Packet, OVERHEAD, MAX_PAYLOAD};
use crate::error::LinkError;

/// One unit per datagram
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpTransport {
    /// Bind `local` and connect to `peer`
    pub async fn connect(local: SocketAddr, peer: SocketAddr) -> Result<Self, LinkError> {
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        debug!(local = %socket.local_addr()?, %peer, "udp transport connected");
        Ok(Self::from_socket(socket))
    }

    /// Wrap an already connected socket
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket,
            buf: vec![0; OVERHEAD + MAX_PAYLOAD],
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        Ok(self.socket.local_addr()?)
    }
}

impl Transport for UdpTransport {
    async fn send(&mut self, packet: &Packet) -> Result<(), LinkError> {
        let wire = packet.encode()?;
        self.socket.send(&wire).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Packet, LinkError> {
        let n = self.socket.recv(&mut self.buf).await?;
        Ok(decode_datagram(&self.buf[..n])?)
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        // dropping the socket releases it; nothing is sent to the peer
        Ok(())
    }
}
