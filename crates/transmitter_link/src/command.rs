//! Control commands and peer telemetry payloads
//!
//! A command payload is `opcode:u8 | args`. Peer telemetry is
//! `lat:f32 | lon:f32 | alt:f32 | roll:i16 | pitch:i16 | yaw:i16`, big endian,
//! angles in hundredths of a degree.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use contracts::VideoQuality;
use serde::{Deserialize, Serialize};

use crate::error::FramingError;

/// Command opcodes understood by the transmitter
pub mod opcode {
    pub const GIMBAL_SPEED: u8 = 0x07;
    pub const CENTER_GIMBAL: u8 = 0x08;
    pub const START_VIDEO: u8 = 0x20;
    pub const STOP_VIDEO: u8 = 0x21;
    pub const SET_VIDEO_QUALITY: u8 = 0x22;
    pub const REQUEST_TELEMETRY: u8 = 0x30;
}

/// Gimbal speed limit in either direction
pub const GIMBAL_SPEED_LIMIT: i8 = 100;

/// Acknowledged control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    StartVideo(VideoQuality),
    StopVideo,
    SetVideoQuality(VideoQuality),
    RequestTelemetry,
    /// Gimbal rotation speed, clamped to ±100
    GimbalSpeed { yaw: i8, pitch: i8 },
    CenterGimbal,
    /// Opcode this crate does not model
    Raw { opcode: u8, args: Bytes },
}

impl LinkCommand {
    /// Gimbal speed command with clamping
    pub fn gimbal_speed(yaw: i32, pitch: i32) -> Self {
        let clamp = |v: i32| {
            v.clamp(-i32::from(GIMBAL_SPEED_LIMIT), i32::from(GIMBAL_SPEED_LIMIT)) as i8
        };
        Self::GimbalSpeed {
            yaw: clamp(yaw),
            pitch: clamp(pitch),
        }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Self::StartVideo(_) => opcode::START_VIDEO,
            Self::StopVideo => opcode::STOP_VIDEO,
            Self::SetVideoQuality(_) => opcode::SET_VIDEO_QUALITY,
            Self::RequestTelemetry => opcode::REQUEST_TELEMETRY,
            Self::GimbalSpeed { .. } => opcode::GIMBAL_SPEED,
            Self::CenterGimbal => opcode::CENTER_GIMBAL,
            Self::Raw { opcode, .. } => *opcode,
        }
    }

    /// Label for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartVideo(_) => "start_video",
            Self::StopVideo => "stop_video",
            Self::SetVideoQuality(_) => "set_video_quality",
            Self::RequestTelemetry => "request_telemetry",
            Self::GimbalSpeed { .. } => "gimbal_speed",
            Self::CenterGimbal => "center_gimbal",
            Self::Raw { .. } => "raw",
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u8(self.opcode());
        match self {
            Self::StartVideo(quality) | Self::SetVideoQuality(quality) => {
                buf.put_u8(quality.code())
            }
            Self::GimbalSpeed { yaw, pitch } => {
                buf.put_i8(*yaw);
                buf.put_i8(*pitch);
            }
            Self::Raw { args, .. } => buf.put_slice(args),
            Self::StopVideo | Self::RequestTelemetry | Self::CenterGimbal => {}
        }
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, FramingError> {
        let malformed = FramingError::Payload { what: "command" };
        let (&op, args) = payload.split_first().ok_or(malformed.clone())?;
        let quality = |args: &[u8]| {
            args.first()
                .and_then(|&code| VideoQuality::from_code(code))
                .ok_or(malformed.clone())
        };
        Ok(match op {
            opcode::START_VIDEO => Self::StartVideo(quality(args)?),
            opcode::STOP_VIDEO => Self::StopVideo,
            opcode::SET_VIDEO_QUALITY => Self::SetVideoQuality(quality(args)?),
            opcode::REQUEST_TELEMETRY => Self::RequestTelemetry,
            opcode::GIMBAL_SPEED => match args {
                [yaw, pitch, ..] => {
                    Self::gimbal_speed(i32::from(*yaw as i8), i32::from(*pitch as i8))
                }
                _ => return Err(FramingError::Payload { what: "command" }),
            },
            opcode::CENTER_GIMBAL => Self::CenterGimbal,
            other => Self::Raw {
                opcode: other,
                args: Bytes::copy_from_slice(args),
            },
        })
    }
}

/// Attitude and position reported by the transmitter
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PeerTelemetry {
    pub latitude: f32,
    pub longitude: f32,
    pub altitude: f32,
    /// Degrees
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl PeerTelemetry {
    pub const ENCODED_LEN: usize = 18;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::ENCODED_LEN);
        buf.put_f32(self.latitude);
        buf.put_f32(self.longitude);
        buf.put_f32(self.altitude);
        for angle in [self.roll, self.pitch, self.yaw] {
            buf.put_i16((angle * 100.0).round() as i16);
        }
        buf.freeze()
    }

    pub fn decode(mut payload: &[u8]) -> Result<Self, FramingError> {
        if payload.len() < Self::ENCODED_LEN {
            return Err(FramingError::Payload {
                what: "peer telemetry",
            });
        }
        Ok(Self {
            latitude: payload.get_f32(),
            longitude: payload.get_f32(),
            altitude: payload.get_f32(),
            roll: f32::from(payload.get_i16()) / 100.0,
            pitch: f32::from(payload.get_i16()) / 100.0,
            yaw: f32::from(payload.get_i16()) / 100.0,
        })
    }
}
