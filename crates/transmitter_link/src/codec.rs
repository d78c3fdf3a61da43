//! Unit framing
//!
//! ```text
//! 0x55 0xAA | seq:u16 | type:u8 | len:u16 | payload[len] | crc16:u16
//! ```
//!
//! All integers little endian. The CRC-16/ARC (reflected poly 0xA001, init 0)
//! covers every byte after the start marker through the end of the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FramingError, LinkError};

/// Start-of-unit marker
pub const START_MARKER: [u8; 2] = [0x55, 0xAA];

/// Marker + seq + type + len
pub const HEADER_LEN: usize = 7;

pub const CRC_LEN: usize = 2;

/// Bytes a unit adds around its payload
pub const OVERHEAD: usize = HEADER_LEN + CRC_LEN;

pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// CRC-16/ARC
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Handshake,
    HandshakeAck,
    Heartbeat,
    HeartbeatAck,
    Command,
    CommandAck,
    Telemetry,
    VideoFragment,
    /// Ignored by the receiver
    Unknown(u8),
}

impl PacketType {
    pub fn code(self) -> u8 {
        match self {
            Self::Handshake => 0x01,
            Self::HandshakeAck => 0x02,
            Self::Heartbeat => 0x03,
            Self::HeartbeatAck => 0x04,
            Self::Command => 0x10,
            Self::CommandAck => 0x11,
            Self::Telemetry => 0x20,
            Self::VideoFragment => 0x30,
            Self::Unknown(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::Handshake,
            0x02 => Self::HandshakeAck,
            0x03 => Self::Heartbeat,
            0x04 => Self::HeartbeatAck,
            0x10 => Self::Command,
            0x11 => Self::CommandAck,
            0x20 => Self::Telemetry,
            0x30 => Self::VideoFragment,
            other => Self::Unknown(other),
        }
    }
}

/// One protocol unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u16,
    pub kind: PacketType,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(seq: u16, kind: PacketType, payload: impl Into<Bytes>) -> Self {
        Self {
            seq,
            kind,
            payload: payload.into(),
        }
    }

    /// Payload-less unit (heartbeats, acks)
    pub fn empty(seq: u16, kind: PacketType) -> Self {
        Self::new(seq, kind, Bytes::new())
    }

    /// Size on the wire
    pub fn encoded_len(&self) -> usize {
        OVERHEAD + self.payload.len()
    }

    /// Append the framed unit to `dst`
    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<(), LinkError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(LinkError::PayloadTooLarge {
                len: self.payload.len(),
            });
        }
        dst.reserve(self.encoded_len());
        let start = dst.len();
        dst.put_slice(&START_MARKER);
        dst.put_u16_le(self.seq);
        dst.put_u8(self.kind.code());
        dst.put_u16_le(self.payload.len() as u16);
        dst.put_slice(&self.payload);
        let crc = crc16(&dst[start + START_MARKER.len()..]);
        dst.put_u16_le(crc);
        Ok(())
    }

    pub fn encode(&self) -> Result<Bytes, LinkError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// Decode exactly one unit from a datagram
pub fn decode_datagram(buf: &[u8]) -> Result<Packet, FramingError> {
    if buf.len() < START_MARKER.len() {
        return Err(FramingError::Truncated {
            needed: OVERHEAD,
            available: buf.len(),
        });
    }
    if buf[..2] != START_MARKER {
        return Err(FramingError::BadMarker);
    }
    if buf.len() < OVERHEAD {
        return Err(FramingError::Truncated {
            needed: OVERHEAD,
            available: buf.len(),
        });
    }

    let declared = usize::from(u16::from_le_bytes([buf[5], buf[6]]));
    let total = OVERHEAD + declared;
    if buf.len() < total {
        return Err(FramingError::Truncated {
            needed: total,
            available: buf.len(),
        });
    }
    if buf.len() > total {
        return Err(FramingError::LengthMismatch {
            declared,
            actual: buf.len() - OVERHEAD,
        });
    }

    let body_end = HEADER_LEN + declared;
    let expected = u16::from_le_bytes([buf[body_end], buf[body_end + 1]]);
    let computed = crc16(&buf[START_MARKER.len()..body_end]);
    if expected != computed {
        return Err(FramingError::Checksum { expected, computed });
    }

    Ok(Packet {
        seq: u16::from_le_bytes([buf[2], buf[3]]),
        kind: PacketType::from_code(buf[4]),
        payload: Bytes::copy_from_slice(&buf[HEADER_LEN..body_end]),
    })
}

/// Incremental decoder for serial byte streams
///
/// Resynchronises on the start marker. A candidate that fails its checksum
/// costs one byte before the search resumes, so a marker inside a corrupt
/// unit is still found.
#[derive(Debug)]
pub struct StreamDecoder {
    buf: BytesMut,
    max_payload: usize,
    skipped: u64,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD)
    }

    /// Candidates declaring more than `max_payload` bytes are rejected
    /// immediately instead of waiting for that many bytes
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_payload: max_payload.min(MAX_PAYLOAD),
            skipped: 0,
        }
    }

    /// Feed received bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes discarded while hunting for a marker
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete unit, a framing error for a rejected candidate, or
    /// `None` when more bytes are needed
    pub fn next_packet(&mut self) -> Option<Result<Packet, FramingError>> {
        self.seek_marker();
        if self.buf.len() < HEADER_LEN {
            return None;
        }

        let declared = usize::from(u16::from_le_bytes([self.buf[5], self.buf[6]]));
        if declared > self.max_payload {
            self.skip(1);
            return Some(Err(FramingError::LengthMismatch {
                declared,
                actual: self.max_payload,
            }));
        }

        let total = OVERHEAD + declared;
        if self.buf.len() < total {
            return None;
        }

        match decode_datagram(&self.buf[..total]) {
            Ok(packet) => {
                self.buf.advance(total);
                Some(Ok(packet))
            }
            Err(e) => {
                self.skip(1);
                Some(Err(e))
            }
        }
    }

    fn seek_marker(&mut self) {
        let found = self
            .buf
            .windows(START_MARKER.len())
            .position(|w| w == START_MARKER);
        match found {
            Some(0) => {}
            Some(pos) => self.skip(pos),
            None => {
                // keep a trailing first marker byte, its partner may be in flight
                let keep = usize::from(self.buf.last() == Some(&START_MARKER[0]));
                let drop = self.buf.len() - keep;
                self.skip(drop);
            }
        }
    }

    fn skip(&mut self, n: usize) {
        self.buf.advance(n);
        self.skipped += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_arc_check_value() {
        assert_eq!(crc16(b"123456789"), 0xBB3D);
        assert_eq!(crc16(&[]), 0);
    }

    #[test]
    fn encode_layout() {
        let packet = Packet::new(0x0102, PacketType::Command, vec![0x20, 0x01]);
        let wire = packet.encode().unwrap();
        assert_eq!(&wire[..7], &[0x55, 0xAA, 0x02, 0x01, 0x10, 0x02, 0x00]);
        assert_eq!(wire.len(), OVERHEAD + 2);
        let crc = crc16(&wire[2..9]);
        assert_eq!(&wire[9..], &crc.to_le_bytes());
        assert_eq!(decode_datagram(&wire).unwrap(), packet);
    }

    #[test]
    fn corrupted_byte_fails_checksum() {
        let wire = Packet::new(7, PacketType::Telemetry, vec![1, 2, 3, 4]).encode().unwrap();
        let mut bad = wire.to_vec();
        bad[8] ^= 0xFF;
        assert!(matches!(
            decode_datagram(&bad),
            Err(FramingError::Checksum { .. })
        ));
    }

    #[test]
    fn rejects_short_and_oversized_datagrams() {
        let wire = Packet::new(1, PacketType::Heartbeat, vec![9; 10]).encode().unwrap();
        assert!(matches!(
            decode_datagram(&wire[..wire.len() - 1]),
            Err(FramingError::Truncated { .. })
        ));

        let mut long = wire.to_vec();
        long.push(0);
        assert!(matches!(
            decode_datagram(&long),
            Err(FramingError::LengthMismatch { declared: 10, actual: 11 })
        ));

        assert_eq!(
            decode_datagram(&[0xAA, 0x55, 0, 0, 0, 0, 0, 0, 0]),
            Err(FramingError::BadMarker)
        );
    }

    #[test]
    fn unknown_type_survives_decoding() {
        let wire = Packet::empty(3, PacketType::Unknown(0x7E)).encode().unwrap();
        assert_eq!(decode_datagram(&wire).unwrap().kind, PacketType::Unknown(0x7E));
    }

    #[test]
    fn oversized_payload_is_refused() {
        let packet = Packet::new(1, PacketType::Telemetry, vec![0u8; MAX_PAYLOAD + 1]);
        assert!(matches!(packet.encode(), Err(LinkError::PayloadTooLarge { .. })));
    }

    #[test]
    fn stream_decoder_handles_split_units_and_garbage() {
        let a = Packet::new(1, PacketType::Heartbeat, Bytes::new()).encode().unwrap();
        let b = Packet::new(2, PacketType::Telemetry, vec![5; 20]).encode().unwrap();

        let mut decoder = StreamDecoder::new();
        decoder.extend(&[0x00, 0x13, 0x55]);
        decoder.extend(&a[..4]);
        assert!(decoder.next_packet().is_none());

        decoder.extend(&a[4..]);
        decoder.extend(&b[..10]);
        assert_eq!(decoder.next_packet().unwrap().unwrap().seq, 1);
        assert!(decoder.next_packet().is_none());

        decoder.extend(&b[10..]);
        assert_eq!(decoder.next_packet().unwrap().unwrap().seq, 2);
        assert!(decoder.next_packet().is_none());
        assert_eq!(decoder.skipped(), 3);
    }

    #[test]
    fn stream_decoder_resyncs_after_corruption() {
        let mut bad = Packet::new(1, PacketType::Command, vec![1, 2, 3]).encode().unwrap().to_vec();
        bad[8] ^= 0x01;
        let good = Packet::new(2, PacketType::Command, vec![4]).encode().unwrap();

        let mut decoder = StreamDecoder::new();
        decoder.extend(&bad);
        decoder.extend(&good);

        assert!(matches!(decoder.next_packet(), Some(Err(FramingError::Checksum { .. }))));
        let packet = decoder.next_packet().unwrap().unwrap();
        assert_eq!(packet.seq, 2);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn stream_decoder_rejects_absurd_length() {
        let mut decoder = StreamDecoder::with_max_payload(64);
        decoder.extend(&[0x55, 0xAA, 0, 0, 0x10, 0xFF, 0xFF]);
        assert!(matches!(
            decoder.next_packet(),
            Some(Err(FramingError::LengthMismatch { declared: 65535, .. }))
        ));
        assert!(decoder.next_packet().is_none());
    }
}
