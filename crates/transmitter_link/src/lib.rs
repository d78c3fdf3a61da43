//! # Transmitter Link
//!
//! Binary request/response protocol engine for the ground-station transmitter.
//!
//! Layers, bottom-up:
//! - [`codec`]: unit framing (`0x55 0xAA | seq | type | len | payload | crc16`)
//! - [`fragment`]: video frame slicing with preemption
//! - [`command`]: control command and peer telemetry payloads
//! - [`machine`]: the pure connection state machine (time passed in)
//! - [`transport`]: UDP, serial stream and in-memory transports
//! - [`engine`]: the async task that drives a machine over a transport
//! - [`peer`]: a simulated transmitter for tests and loopback runs
//!
//! ```ignore
//! let transport = open_transport(&endpoint).await?;
//! let link = TransmitterLinkEngine::spawn(transport, LinkConfig::from_settings(&core), cancel);
//! link.offer_frame(frame);
//! let reply = link.command(LinkCommand::StartVideo(VideoQuality::High)).await?;
//! ```

pub mod codec;
pub mod command;
pub mod engine;
mod error;
pub mod fragment;
mod inflight;
pub mod machine;
pub mod peer;
mod stats;
pub mod transport;

pub use codec::{crc16, decode_datagram, Packet, PacketType, StreamDecoder};
pub use command::{LinkCommand, PeerTelemetry};
pub use engine::{LinkCommander, LinkHandle, TransmitterLinkEngine};
pub use error::{FramingError, LinkError};
pub use fragment::{FragmentCursor, FragmentHeader, Reassembler};
pub use machine::{Action, LinkConfig, LinkMachine};
pub use peer::{PeerHandle, PeerStats, SimulatedPeer};
pub use stats::{LinkStats, LinkStatsSnapshot};
pub use transport::{
    memory_pair, open_transport, AnyTransport, LocalTransport, MemoryTransport, StreamTransport,
    Transport, UdpTransport,
};
