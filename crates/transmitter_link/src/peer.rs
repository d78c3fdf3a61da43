//! Simulated transmitter
//!
//! Answers handshakes, heartbeats and commands and reassembles video the way
//! the ground-station firmware does. Used by tests and by `loopback`
//! endpoints when no hardware is attached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::codec::{Packet, PacketType};
use crate::command::{LinkCommand, PeerTelemetry};
use crate::error::LinkError;
use crate::fragment::{FragmentHeader, ReassemblyStats, Reassembler};
use crate::inflight::DedupWindow;
use crate::machine::PROTOCOL_VERSION;
use crate::transport::Transport;

/// What the simulated transmitter has observed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerStats {
    pub handshakes: u64,
    pub heartbeats: u64,
    /// Distinct commands, in arrival order
    pub commands: Vec<LinkCommand>,
    pub telemetry_units: u64,
    pub last_telemetry: Option<Bytes>,
    pub last_frame_seq: Option<u32>,
    pub reassembly: ReassemblyStats,
    pub framing_errors: u64,
}

struct PeerShared {
    stats: Mutex<PeerStats>,
    silent: AtomicBool,
    answer_commands: AtomicBool,
    telemetry: Mutex<PeerTelemetry>,
}

impl PeerShared {
    fn stats(&self) -> std::sync::MutexGuard<'_, PeerStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Spawns simulated transmitters
pub struct SimulatedPeer;

impl SimulatedPeer {
    pub fn spawn<T>(transport: T) -> PeerHandle
    where
        T: Transport + Send + 'static,
    {
        let shared = Arc::new(PeerShared {
            stats: Mutex::new(PeerStats::default()),
            silent: AtomicBool::new(false),
            answer_commands: AtomicBool::new(true),
            telemetry: Mutex::new(PeerTelemetry {
                latitude: 22.543,
                longitude: 114.057,
                altitude: 120.0,
                ..Default::default()
            }),
        });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(transport, Arc::clone(&shared), cancel.clone()));
        PeerHandle {
            shared,
            cancel,
            task,
        }
    }
}

/// Control and inspection of a simulated transmitter
pub struct PeerHandle {
    shared: Arc<PeerShared>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PeerHandle {
    pub fn stats(&self) -> PeerStats {
        self.shared.stats().clone()
    }

    /// Ignore everything received while set
    pub fn set_silent(&self, silent: bool) {
        self.shared.silent.store(silent, Ordering::Relaxed);
    }

    /// Stop acknowledging commands (heartbeats are still answered)
    pub fn set_answer_commands(&self, answer: bool) {
        self.shared.answer_commands.store(answer, Ordering::Relaxed);
    }

    /// Attitude reported in `RequestTelemetry` replies
    pub fn set_telemetry(&self, telemetry: PeerTelemetry) {
        *self
            .shared
            .telemetry
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = telemetry;
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn run<T: Transport>(mut transport: T, shared: Arc<PeerShared>, cancel: CancellationToken) {
    let mut reassembler = Reassembler::new();
    let mut seen_commands = DedupWindow::new(64);
    let mut next_seq: u16 = 0x8000;

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = transport.recv() => received,
        };
        let packet = match received {
            Ok(packet) => packet,
            Err(LinkError::Framing(_)) => {
                shared.stats().framing_errors += 1;
                continue;
            }
            Err(e) => {
                debug!(error = %e, "simulated peer transport ended");
                break;
            }
        };
        if shared.silent.load(Ordering::Relaxed) {
            continue;
        }

        let mut replies = Vec::new();
        {
            let mut stats = shared.stats();
            match packet.kind {
                PacketType::Handshake => {
                    stats.handshakes += 1;
                    replies.push(Packet::new(
                        packet.seq,
                        PacketType::HandshakeAck,
                        vec![PROTOCOL_VERSION],
                    ));
                }
                PacketType::Heartbeat => {
                    stats.heartbeats += 1;
                    replies.push(Packet::empty(packet.seq, PacketType::HeartbeatAck));
                }
                PacketType::Command if shared.answer_commands.load(Ordering::Relaxed) => {
                    let command = LinkCommand::decode(&packet.payload);
                    if seen_commands.insert(packet.seq, packet.kind) {
                        match &command {
                            Ok(command) => stats.commands.push(command.clone()),
                            Err(_) => stats.framing_errors += 1,
                        }
                    }
                    replies.push(Packet::empty(packet.seq, PacketType::CommandAck));
                    if matches!(command, Ok(LinkCommand::RequestTelemetry)) {
                        let telemetry = *shared
                            .telemetry
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner);
                        let payload = telemetry.encode();
                        replies.push(Packet::new(next_seq, PacketType::Telemetry, payload));
                        next_seq = next_seq.wrapping_add(1);
                    }
                }
                PacketType::Telemetry => {
                    stats.telemetry_units += 1;
                    stats.last_telemetry = Some(packet.payload.clone());
                }
                PacketType::VideoFragment => match FragmentHeader::decode(&packet.payload) {
                    Ok((header, data)) => {
                        if let Some(frame) = reassembler.push(header, data) {
                            trace!(
                                frame_seq = frame.frame_seq,
                                bytes = frame.data.len(),
                                "frame reassembled"
                            );
                            stats.last_frame_seq = Some(frame.frame_seq);
                        }
                        stats.reassembly = reassembler.stats();
                    }
                    Err(_) => stats.framing_errors += 1,
                },
                _ => {}
            }
        }

        for reply in replies {
            if let Err(e) = transport.send(&reply).await {
                debug!(error = %e, "simulated peer send failed");
            }
        }
    }

    let _ = transport.close().await;
}
