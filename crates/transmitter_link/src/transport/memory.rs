//! In-memory datagram transport with deterministic loss injection

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

use super::Transport;
use crate::codec::{decode_datagram, Packet};
use crate::error::LinkError;

/// One end of an in-memory link
///
/// Behaves like a datagram socket: a full queue drops the unit instead of
/// waiting, and units travel as encoded bytes so corruption is observable.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Option<mpsc::Sender<Bytes>>,
    rx: mpsc::Receiver<Bytes>,
    drop_every: Option<u64>,
    corrupt_every: Option<u64>,
    sent: u64,
    dropped: u64,
}

/// Connected pair; each direction buffers `capacity` units
pub fn memory_pair(capacity: usize) -> (MemoryTransport, MemoryTransport) {
    let (a_tx, a_rx) = mpsc::channel(capacity.max(1));
    let (b_tx, b_rx) = mpsc::channel(capacity.max(1));
    (MemoryTransport::new(a_tx, b_rx), MemoryTransport::new(b_tx, a_rx))
}

impl MemoryTransport {
    fn new(tx: mpsc::Sender<Bytes>, rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            tx: Some(tx),
            rx,
            drop_every: None,
            corrupt_every: None,
            sent: 0,
            dropped: 0,
        }
    }

    /// Silently lose every `n`-th outbound unit
    pub fn drop_every(mut self, n: u64) -> Self {
        self.drop_every = Some(n).filter(|n| *n > 0);
        self
    }

    /// Flip a payload bit in every `n`-th outbound unit
    pub fn corrupt_every(mut self, n: u64) -> Self {
        self.corrupt_every = Some(n).filter(|n| *n > 0);
        self
    }

    /// Units offered to `send`
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Units lost to injection or a full queue
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Push raw bytes as if they had arrived from the wire
    pub async fn send_raw(&mut self, bytes: Bytes) -> Result<(), LinkError> {
        let tx = self.tx.as_ref().ok_or(LinkError::Closed)?;
        tx.send(bytes).await.map_err(|_| LinkError::Closed)
    }

    fn hits(every: Option<u64>, count: u64) -> bool {
        every.is_some_and(|n| count % n == 0)
    }
}

impl Transport for MemoryTransport {
    async fn send(&mut self, packet: &Packet) -> Result<(), LinkError> {
        let tx = self.tx.as_ref().ok_or(LinkError::Closed)?;
        self.sent += 1;
        if Self::hits(self.drop_every, self.sent) {
            self.dropped += 1;
            trace!(seq = packet.seq, "injected loss");
            return Ok(());
        }

        let mut wire = packet.encode()?;
        if Self::hits(self.corrupt_every, self.sent) {
            let mut bytes = wire.to_vec();
            let last = bytes.len() - 3;
            bytes[last] ^= 0x5A;
            wire = Bytes::from(bytes);
        }

        match tx.try_send(wire) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(LinkError::Closed),
        }
    }

    async fn recv(&mut self) -> Result<Packet, LinkError> {
        let wire = self.rx.recv().await.ok_or(LinkError::Closed)?;
        Ok(decode_datagram(&wire)?)
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PacketType;
    use crate::error::FramingError;

    #[tokio::test]
    async fn delivers_in_order() {
        let (mut a, mut b) = memory_pair(8);
        for seq in 0..3 {
            a.send(&Packet::empty(seq, PacketType::Heartbeat)).await.unwrap();
        }
        for seq in 0..3 {
            assert_eq!(b.recv().await.unwrap().seq, seq);
        }
    }

    #[tokio::test]
    async fn drops_every_nth() {
        let (a, mut b) = memory_pair(16);
        let mut a = a.drop_every(3);
        for seq in 1..=6 {
            a.send(&Packet::empty(seq, PacketType::Heartbeat)).await.unwrap();
        }
        drop(a);
        let mut got = Vec::new();
        while let Ok(p) = b.recv().await {
            got.push(p.seq);
        }
        assert_eq!(got, vec![1, 2, 4, 5]);
    }

    #[tokio::test]
    async fn corruption_surfaces_as_framing_error() {
        let (a, mut b) = memory_pair(4);
        let mut a = a.corrupt_every(1);
        a.send(&Packet::new(1, PacketType::Telemetry, vec![1, 2, 3])).await.unwrap();
        assert!(matches!(
            b.recv().await,
            Err(LinkError::Framing(FramingError::Checksum { .. }))
        ));
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_waiting() {
        let (mut a, _b) = memory_pair(1);
        a.send(&Packet::empty(1, PacketType::Heartbeat)).await.unwrap();
        a.send(&Packet::empty(2, PacketType::Heartbeat)).await.unwrap();
        assert_eq!(a.dropped(), 1);
    }

    #[tokio::test]
    async fn closed_peer_is_reported() {
        let (mut a, b) = memory_pair(1);
        drop(b);
        assert!(matches!(
            a.send(&Packet::empty(1, PacketType::Heartbeat)).await,
            Err(LinkError::Closed)
        ));
        assert!(matches!(a.recv().await, Err(LinkError::Closed)));
    }
}
