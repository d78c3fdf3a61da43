//! Byte-stream transport (serial devices)

use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::Transport;
use crate::codec::{Packet, StreamDecoder};
use crate::error::LinkError;

/// Units over any `AsyncRead + AsyncWrite` stream
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: S,
    decoder: StreamDecoder,
    chunk: Box<[u8]>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: StreamDecoder::new(),
            chunk: vec![0; 4096].into_boxed_slice(),
        }
    }

    /// Bytes skipped while resynchronising
    pub fn skipped(&self) -> u64 {
        self.decoder.skipped()
    }
}

impl StreamTransport<File> {
    /// Open a serial device node read-write
    ///
    /// Line settings (baud rate, parity) are expected to be configured on
    /// the device beforehand.
    pub async fn open_device(path: &Path) -> Result<Self, LinkError> {
        let file = OpenOptions::new().read(true).write(true).open(path).await?;
        debug!(path = %path.display(), "serial transport opened");
        Ok(Self::new(file))
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, packet: &Packet) -> Result<(), LinkError> {
        let wire = packet.encode()?;
        self.stream.write_all(&wire).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Packet, LinkError> {
        loop {
            if let Some(result) = self.decoder.next_packet() {
                return Ok(result?);
            }
            // `read` is cancel-safe: bytes are only consumed when it completes
            let n = self.stream.read(&mut self.chunk).await?;
            if n == 0 {
                return Err(LinkError::Closed);
            }
            self.decoder.extend(&self.chunk[..n]);
        }
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
