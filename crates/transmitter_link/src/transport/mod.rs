//! Link transports
//!
//! A transport moves whole units. Datagram transports decode one unit per
//! datagram; stream transports run a [`StreamDecoder`](crate::codec::StreamDecoder).
//! `recv` must be cancel-safe: the engine polls it inside `select!`.

mod memory;
mod stream;
mod udp;

pub use memory::{memory_pair, MemoryTransport};
pub use stream::StreamTransport;
pub use udp::UdpTransport;

use contracts::TransmitterEndpoint;
use tokio::fs::File;
use tracing::info;

use crate::codec::Packet;
use crate::error::LinkError;
use crate::peer::SimulatedPeer;

/// Unit transport
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport {
    /// Write one unit
    async fn send(&mut self, packet: &Packet) -> Result<(), LinkError>;

    /// Next unit; a corrupt unit surfaces as [`LinkError::Framing`]
    async fn recv(&mut self) -> Result<Packet, LinkError>;

    /// Release the underlying resource
    async fn close(&mut self) -> Result<(), LinkError>;
}

/// Every transport an endpoint can open
pub enum AnyTransport {
    Udp(UdpTransport),
    Serial(StreamTransport<File>),
    Memory(MemoryTransport),
}

impl Transport for AnyTransport {
    async fn send(&mut self, packet: &Packet) -> Result<(), LinkError> {
        match self {
            Self::Udp(t) => Transport::send(t, packet).await,
            Self::Serial(t) => Transport::send(t, packet).await,
            Self::Memory(t) => Transport::send(t, packet).await,
        }
    }

    async fn recv(&mut self) -> Result<Packet, LinkError> {
        match self {
            Self::Udp(t) => Transport::recv(t).await,
            Self::Serial(t) => Transport::recv(t).await,
            Self::Memory(t) => Transport::recv(t).await,
        }
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Udp(t) => Transport::close(t).await,
            Self::Serial(t) => Transport::close(t).await,
            Self::Memory(t) => Transport::close(t).await,
        }
    }
}

/// Open the transport for `endpoint`
///
/// `Loopback` spawns a [`SimulatedPeer`] on the far end of an in-memory pair.
pub async fn open_transport(endpoint: &TransmitterEndpoint) -> Result<AnyTransport, LinkError> {
    info!(endpoint = %endpoint.describe(), "opening transmitter transport");
    match endpoint {
        TransmitterEndpoint::Udp { bind, peer } => {
            Ok(AnyTransport::Udp(UdpTransport::connect(*bind, *peer).await?))
        }
        TransmitterEndpoint::Serial { path } => {
            Ok(AnyTransport::Serial(StreamTransport::open_device(path).await?))
        }
        TransmitterEndpoint::Loopback { drop_every } => {
            let (local, remote) = memory_pair(256);
            let local = match drop_every {
                Some(n) => local.drop_every(*n),
                None => local,
            };
            // detached: the peer task ends when `local` is dropped
            drop(SimulatedPeer::spawn(remote));
            Ok(AnyTransport::Memory(local))
        }
    }
}
