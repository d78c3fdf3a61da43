//! Frame - FrameSource output
//!
//! Immutable captured video frame shared by every sink.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Pixel layout of a raw frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 8-bit BGR, the capture backend's native layout
    #[default]
    Bgr8,
    /// 8-bit RGBA
    Rgba8,
    /// Already-encoded bitstream (JPEG/H.264 access unit)
    Encoded,
}

impl PixelFormat {
    /// Bytes per pixel for raw layouts
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            Self::Bgr8 => Some(3),
            Self::Rgba8 => Some(4),
            Self::Encoded => None,
        }
    }
}

/// Captured frame
///
/// The pixel buffer is a reference-counted `Bytes`, so cloning a `Frame` for
/// fan-out never copies pixels and no two frames share a mutable buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Sequence number, strictly increasing per FrameSource
    pub sequence: u64,

    /// Capture timestamp (seconds)
    pub timestamp: f64,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Pixel layout
    pub format: PixelFormat,

    /// Pixel buffer
    pub data: Bytes,
}

impl Frame {
    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// What a capture backend hands over on each poll
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Backend-assigned sequence
    pub sequence: u64,
    /// Capture timestamp (seconds)
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Bytes,
}

impl From<RawFrame> for Frame {
    fn from(raw: RawFrame) -> Self {
        Self {
            sequence: raw.sequence,
            timestamp: raw.timestamp,
            width: raw.width,
            height: raw.height,
            format: raw.format,
            data: raw.data,
        }
    }
}
