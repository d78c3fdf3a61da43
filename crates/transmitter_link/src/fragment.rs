//! Video fragmentation
//!
//! Fragment payload: `frame_seq:u32 | index:u16 | count:u16 | bytes` (little
//! endian). Fragments are fire-and-forget; a newer frame preempts whatever is
//! left of the current one.

use bytes::{BufMut, Bytes, BytesMut};
use contracts::Frame;

use crate::codec::OVERHEAD;
use crate::error::{FramingError, LinkError};

pub const FRAGMENT_HEADER_LEN: usize = 8;

/// Frame bytes carried per fragment for a given transport MTU
pub fn chunk_size(mtu: usize) -> usize {
    mtu.saturating_sub(OVERHEAD + FRAGMENT_HEADER_LEN).max(1)
}

/// `(frameSequence, fragmentIndex, fragmentCount)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub frame_seq: u32,
    pub index: u16,
    pub count: u16,
}

impl FragmentHeader {
    /// Header followed by `data`
    pub fn encode_with(&self, data: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAGMENT_HEADER_LEN + data.len());
        buf.put_u32_le(self.frame_seq);
        buf.put_u16_le(self.index);
        buf.put_u16_le(self.count);
        buf.put_slice(data);
        buf.freeze()
    }

    pub fn decode(payload: &Bytes) -> Result<(Self, Bytes), FramingError> {
        if payload.len() < FRAGMENT_HEADER_LEN {
            return Err(FramingError::Payload {
                what: "video fragment",
            });
        }
        let header = Self {
            frame_seq: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
            index: u16::from_le_bytes([payload[4], payload[5]]),
            count: u16::from_le_bytes([payload[6], payload[7]]),
        };
        if header.count == 0 || header.index >= header.count {
            return Err(FramingError::Payload {
                what: "video fragment",
            });
        }
        Ok((header, payload.slice(FRAGMENT_HEADER_LEN..)))
    }
}

/// Outbound slicing position within one frame
#[derive(Debug)]
pub struct FragmentCursor {
    frame_seq: u32,
    data: Bytes,
    chunk: usize,
    next: u16,
    count: u16,
}

impl FragmentCursor {
    /// Slice `frame` for `mtu`; an empty frame still yields one fragment
    pub fn new(frame: &Frame, mtu: usize) -> Result<Self, LinkError> {
        let chunk = chunk_size(mtu);
        let count = frame.data.len().div_ceil(chunk).max(1);
        let count = u16::try_from(count).map_err(|_| LinkError::PayloadTooLarge {
            len: frame.data.len(),
        })?;
        Ok(Self {
            // the wire carries the low 32 bits; receivers compare with wrapping arithmetic
            frame_seq: frame.sequence as u32,
            data: frame.data.clone(),
            chunk,
            next: 0,
            count,
        })
    }

    pub fn frame_seq(&self) -> u32 {
        self.frame_seq
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    /// Fragments not yet emitted
    pub fn remaining(&self) -> usize {
        usize::from(self.count - self.next)
    }

    pub fn is_done(&self) -> bool {
        self.next >= self.count
    }

    /// Encoded payload of the next fragment
    pub fn next_payload(&mut self) -> Option<Bytes> {
        if self.is_done() {
            return None;
        }
        let start = usize::from(self.next) * self.chunk;
        let end = (start + self.chunk).min(self.data.len());
        let header = FragmentHeader {
            frame_seq: self.frame_seq,
            index: self.next,
            count: self.count,
        };
        self.next += 1;
        Some(header.encode_with(&self.data[start.min(end)..end]))
    }
}

/// Whether `a` is after `b` in wrapping 32-bit sequence space
pub fn seq_after(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// A fully reassembled frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFrame {
    pub frame_seq: u32,
    pub data: Bytes,
}

/// Receiver-side reassembly counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub fragments: u64,
    pub completed: u64,
    /// Frames abandoned because a newer frame started
    pub incomplete_dropped: u64,
    /// Fragments of a frame older than the one being assembled
    pub late_fragments: u64,
}

#[derive(Debug)]
struct Partial {
    frame_seq: u32,
    parts: Vec<Option<Bytes>>,
    received: usize,
}

/// Keeps only the newest frame; older or incomplete frames are discarded
#[derive(Debug, Default)]
pub struct Reassembler {
    current: Option<Partial>,
    newest_seen: Option<u32>,
    stats: ReassemblyStats,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Accept one fragment, returning the frame it completes
    pub fn push(&mut self, header: FragmentHeader, data: Bytes) -> Option<CompletedFrame> {
        self.stats.fragments += 1;

        match self.newest_seen {
            Some(newest) if header.frame_seq == newest => {}
            Some(newest) if !seq_after(header.frame_seq, newest) => {
                self.stats.late_fragments += 1;
                return None;
            }
            _ => {
                if self.current.take().is_some() {
                    self.stats.incomplete_dropped += 1;
                }
                self.newest_seen = Some(header.frame_seq);
                self.current = Some(Partial {
                    frame_seq: header.frame_seq,
                    parts: vec![None; usize::from(header.count)],
                    received: 0,
                });
            }
        }

        let partial = self.current.as_mut()?;
        let slot = partial.parts.get_mut(usize::from(header.index))?;
        if slot.is_none() {
            *slot = Some(data);
            partial.received += 1;
        }
        if partial.received < partial.parts.len() {
            return None;
        }

        let done = self.current.take()?;
        let mut buf = BytesMut::new();
        for part in done.parts.into_iter().flatten() {
            buf.extend_from_slice(&part);
        }
        self.stats.completed += 1;
        Some(CompletedFrame {
            frame_seq: done.frame_seq,
            data: buf.freeze(),
        })
    }
}
