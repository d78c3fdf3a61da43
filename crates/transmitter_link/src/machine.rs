//! Link state machine
//!
//! `Disconnected -> Handshaking -> Connected -> (Recovering) -> Disconnected`
//!
//! The machine does no I/O and reads no clock: every entry point takes `now`
//! and returns the [`Action`]s the caller must carry out, so handshake,
//! heartbeat, retry and recovery timing is testable without a runtime.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use contracts::{Backoff, CoreSettings, Frame, LinkState};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::codec::{Packet, PacketType, MAX_PAYLOAD};
use crate::command::{LinkCommand, PeerTelemetry};
use crate::error::LinkError;
use crate::fragment::FragmentCursor;
use crate::inflight::{DedupWindow, InflightTable};
use crate::stats::{bump, LinkStats};

/// Carried in handshake payloads
pub const PROTOCOL_VERSION: u8 = 1;

/// Timing and sizing for one link
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub heartbeat_interval: Duration,
    /// Silence that forces `Recovering`
    pub heartbeat_timeout: Duration,
    /// First handshake attempt timeout, scaled by `retry_backoff` per attempt
    pub handshake_timeout: Duration,
    pub handshake_retries: u32,
    pub command_timeout: Duration,
    pub command_retries: u32,
    pub retry_backoff: f64,
    pub recovery_window: Duration,
    /// Longest pause between recovery handshake rounds
    pub recovery_backoff_cap: Duration,
    pub fragment_mtu: usize,
    pub max_inflight: usize,
    pub dedup_window: usize,
}

impl LinkConfig {
    pub fn from_settings(core: &CoreSettings) -> Self {
        Self {
            heartbeat_interval: core.heartbeat_interval(),
            heartbeat_timeout: core.heartbeat_timeout(),
            handshake_timeout: core.handshake_timeout(),
            handshake_retries: core.handshake_retries,
            command_timeout: core.command_timeout(),
            command_retries: core.command_retries,
            retry_backoff: core.command_retry_backoff,
            recovery_window: core.recovery_window(),
            recovery_backoff_cap: Duration::from_secs(8),
            fragment_mtu: core.fragment_mtu,
            max_inflight: 256,
            dedup_window: 64,
        }
    }

    fn handshake_wait(&self, attempt: u32) -> Duration {
        scaled(self.handshake_timeout, self.retry_backoff, attempt)
    }

    fn command_wait(&self, retry: u32) -> Duration {
        scaled(self.command_timeout, self.retry_backoff, retry)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::from_settings(&CoreSettings::default())
    }
}

fn scaled(base: Duration, factor: f64, n: u32) -> Duration {
    base.mul_f64(factor.max(1.0).powi(n.min(32) as i32))
}

/// Work the caller performs on the machine's behalf
#[derive(Debug)]
pub enum Action {
    /// Write a unit to the transport
    Send(Packet),
    StateChanged { from: LinkState, to: LinkState },
    CommandAcked { seq: u16, response: Bytes },
    /// Reported to the issuer of that command only
    CommandFailed { seq: u16, error: LinkError },
    PeerTelemetry(PeerTelemetry),
    PeerCommand { seq: u16, command: LinkCommand },
    /// Recovery failed; the link is `Disconnected`
    LinkDown { reason: String },
}

#[derive(Debug, Clone, Copy)]
struct HandshakeAttempt {
    seq: u16,
    attempt: u32,
    deadline: Instant,
}

#[derive(Debug)]
struct Recovery {
    started: Instant,
    backoff: Backoff,
    resume_at: Option<Instant>,
}

/// Pure transmitter link protocol state
#[derive(Debug)]
pub struct LinkMachine {
    config: LinkConfig,
    state: LinkState,
    next_seq: u16,
    handshake: Option<HandshakeAttempt>,
    recovery: Option<Recovery>,
    last_rx: Option<Instant>,
    next_heartbeat: Option<Instant>,
    inflight: InflightTable,
    dedup: DedupWindow,
    cursor: Option<FragmentCursor>,
    stats: Arc<LinkStats>,
}

impl LinkMachine {
    pub fn new(config: LinkConfig) -> Self {
        Self::with_stats(config, Arc::new(LinkStats::new()))
    }

    pub fn with_stats(config: LinkConfig, stats: Arc<LinkStats>) -> Self {
        let dedup = DedupWindow::new(config.dedup_window);
        Self {
            config,
            state: LinkState::Disconnected,
            next_seq: 0,
            handshake: None,
            recovery: None,
            last_rx: None,
            next_heartbeat: None,
            inflight: InflightTable::default(),
            dedup,
            cursor: None,
            stats,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn stats(&self) -> Arc<LinkStats> {
        Arc::clone(&self.stats)
    }

    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    /// Open the link: `Disconnected -> Handshaking`
    pub fn start(&mut self, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state != LinkState::Disconnected {
            return actions;
        }
        self.last_rx = Some(now);
        self.transition(LinkState::Handshaking, &mut actions);
        self.begin_handshake(now, &mut actions);
        actions
    }

    /// Explicit stop; no disconnect unit is sent
    pub fn stop(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state == LinkState::Disconnected {
            return actions;
        }
        self.handshake = None;
        self.recovery = None;
        self.next_heartbeat = None;
        self.transition(LinkState::Disconnected, &mut actions);
        self.fail_inflight(|| LinkError::EngineStopped, &mut actions);
        self.dedup.clear();
        actions
    }

    /// Earliest instant at which [`on_timer`](Self::on_timer) has work
    pub fn next_deadline(&self) -> Option<Instant> {
        let active = matches!(self.state, LinkState::Connected | LinkState::Recovering);
        let liveness = match (self.state, self.last_rx) {
            (LinkState::Connected, Some(last)) => Some(last + self.config.heartbeat_timeout),
            _ => None,
        };
        let recovery = self.recovery.as_ref();
        [
            self.handshake.map(|h| h.deadline),
            recovery.and_then(|r| r.resume_at),
            recovery.map(|r| r.started + self.config.recovery_window),
            self.next_heartbeat.filter(|_| active),
            liveness,
            self.inflight.earliest_deadline().filter(|_| active),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Run timeouts, retransmissions and heartbeats due at `now`
    pub fn on_timer(&mut self, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        match self.state {
            LinkState::Disconnected => return actions,
            LinkState::Handshaking => self.check_handshake(now, &mut actions),
            LinkState::Connected => {
                if self.silence(now) >= self.config.heartbeat_timeout {
                    self.enter_recovery(now, &mut actions);
                }
            }
            LinkState::Recovering => {
                let window_end = self
                    .recovery
                    .as_ref()
                    .map(|r| r.started + self.config.recovery_window);
                if window_end.is_some_and(|end| now >= end) {
                    self.give_up("recovery window exhausted".to_string(), &mut actions);
                    return actions;
                }
                self.check_handshake(now, &mut actions);
                let resume = self
                    .recovery
                    .as_ref()
                    .and_then(|r| r.resume_at)
                    .is_some_and(|at| now >= at);
                if self.handshake.is_none() && resume {
                    if let Some(recovery) = self.recovery.as_mut() {
                        recovery.resume_at = None;
                    }
                    self.begin_handshake(now, &mut actions);
                }
            }
        }

        if matches!(self.state, LinkState::Connected | LinkState::Recovering) {
            self.sweep_inflight(now, &mut actions);
            self.heartbeat_if_due(now, &mut actions);
        }
        actions
    }

    /// Handle a valid inbound unit
    pub fn on_packet(&mut self, now: Instant, packet: Packet) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state == LinkState::Disconnected {
            return actions;
        }
        bump(&self.stats.packets_received);
        self.last_rx = Some(now);

        let Packet { seq, kind, payload } = packet;
        match kind {
            PacketType::HandshakeAck => self.on_handshake_ack(now, seq, &mut actions),
            PacketType::HeartbeatAck => {}
            PacketType::Heartbeat => {
                actions.push(Action::Send(Packet::empty(seq, PacketType::HeartbeatAck)));
            }
            PacketType::Handshake => {
                actions.push(Action::Send(Packet::new(
                    seq,
                    PacketType::HandshakeAck,
                    vec![PROTOCOL_VERSION],
                )));
            }
            PacketType::CommandAck => match self.inflight.remove(seq) {
                Some(_) => actions.push(Action::CommandAcked {
                    seq,
                    response: payload,
                }),
                None => {
                    bump(&self.stats.duplicates);
                    trace!(seq, "ack for no in-flight command");
                }
            },
            PacketType::Command => {
                // re-acknowledge every copy, deliver once
                actions.push(Action::Send(Packet::empty(seq, PacketType::CommandAck)));
                if !self.dedup.insert(seq, kind) {
                    bump(&self.stats.duplicates);
                } else {
                    match LinkCommand::decode(&payload) {
                        Ok(command) => actions.push(Action::PeerCommand { seq, command }),
                        Err(e) => {
                            bump(&self.stats.framing_errors);
                            debug!(seq, error = %e, "undecodable peer command");
                        }
                    }
                }
            }
            PacketType::Telemetry => {
                if !self.dedup.insert(seq, kind) {
                    bump(&self.stats.duplicates);
                } else {
                    match PeerTelemetry::decode(&payload) {
                        Ok(telemetry) => actions.push(Action::PeerTelemetry(telemetry)),
                        Err(e) => {
                            bump(&self.stats.framing_errors);
                            debug!(seq, error = %e, "undecodable peer telemetry");
                        }
                    }
                }
            }
            PacketType::VideoFragment | PacketType::Unknown(_) => {
                trace!(seq, ?kind, "ignoring inbound unit");
            }
        }
        actions
    }

    /// Count a unit the transport rejected
    pub fn on_framing_error(&mut self) {
        bump(&self.stats.framing_errors);
    }

    /// Queue an acknowledged command; returns its sequence
    pub fn send_command(
        &mut self,
        now: Instant,
        command: &LinkCommand,
    ) -> Result<(u16, Vec<Action>), LinkError> {
        if self.state != LinkState::Connected {
            return Err(LinkError::NotConnected { state: self.state });
        }
        let limit = self.config.max_inflight.min(usize::from(u16::MAX) / 2);
        if self.inflight.len() >= limit {
            return Err(LinkError::Busy { limit });
        }

        let payload = command.encode();
        let seq = self.alloc_seq();
        self.inflight
            .insert(seq, payload.clone(), now + self.config.command_timeout);
        bump(&self.stats.commands_sent);
        debug!(seq, command = command.name(), "command sent");
        Ok((seq, vec![Action::Send(Packet::new(seq, PacketType::Command, payload))]))
    }

    /// Telemetry is unacknowledged and only sent while `Connected`
    pub fn send_telemetry(&mut self, payload: Bytes) -> Result<Vec<Action>, LinkError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(LinkError::PayloadTooLarge { len: payload.len() });
        }
        if self.state != LinkState::Connected {
            return Ok(Vec::new());
        }
        let seq = self.alloc_seq();
        Ok(vec![Action::Send(Packet::new(seq, PacketType::Telemetry, payload))])
    }

    /// Make `frame` the one being fragmented, abandoning any older remainder
    pub fn offer_frame(&mut self, frame: &Frame) -> Result<(), LinkError> {
        if self.state != LinkState::Connected {
            bump(&self.stats.frames_skipped);
            return Ok(());
        }
        let cursor = FragmentCursor::new(frame, self.config.fragment_mtu)?;
        if let Some(old) = self.cursor.replace(cursor) {
            self.abandon(old);
        }
        Ok(())
    }

    pub fn has_pending_fragment(&self) -> bool {
        self.state == LinkState::Connected && self.cursor.as_ref().is_some_and(|c| !c.is_done())
    }

    /// Next fragment of the current frame
    pub fn next_fragment(&mut self) -> Option<Packet> {
        if self.state != LinkState::Connected {
            return None;
        }
        let cursor = self.cursor.as_mut()?;
        let payload = cursor.next_payload()?;
        if cursor.is_done() {
            self.cursor = None;
        }
        let seq = self.alloc_seq();
        bump(&self.stats.fragments_sent);
        Some(Packet::new(seq, PacketType::VideoFragment, payload))
    }

    fn abandon(&self, cursor: FragmentCursor) {
        let left = cursor.remaining() as u64;
        if left > 0 {
            self.stats
                .fragments_abandoned
                .fetch_add(left, std::sync::atomic::Ordering::Relaxed);
            trace!(frame_seq = cursor.frame_seq(), left, "preempted frame");
        }
    }

    fn transition(&mut self, to: LinkState, actions: &mut Vec<Action>) {
        if self.state == to {
            return;
        }
        let from = std::mem::replace(&mut self.state, to);
        if to != LinkState::Connected {
            if let Some(cursor) = self.cursor.take() {
                self.abandon(cursor);
            }
        }
        actions.push(Action::StateChanged { from, to });
    }

    fn alloc_seq(&mut self) -> u16 {
        loop {
            let seq = self.next_seq;
            self.next_seq = self.next_seq.wrapping_add(1);
            let handshake_pending = self.handshake.is_some_and(|h| h.seq == seq);
            if !self.inflight.contains(seq) && !handshake_pending {
                return seq;
            }
        }
    }

    fn silence(&self, now: Instant) -> Duration {
        self.last_rx
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or_default()
    }

    fn begin_handshake(&mut self, now: Instant, actions: &mut Vec<Action>) {
        let seq = self.alloc_seq();
        self.handshake = Some(HandshakeAttempt {
            seq,
            attempt: 0,
            deadline: now + self.config.handshake_wait(0),
        });
        bump(&self.stats.handshakes);
        debug!(seq, state = %self.state, "handshake sent");
        actions.push(Action::Send(handshake_packet(seq)));
    }

    fn check_handshake(&mut self, now: Instant, actions: &mut Vec<Action>) {
        let Some(current) = self.handshake else {
            return;
        };
        if now < current.deadline {
            return;
        }

        if current.attempt < self.config.handshake_retries {
            let attempt = current.attempt + 1;
            self.handshake = Some(HandshakeAttempt {
                seq: current.seq,
                attempt,
                deadline: now + self.config.handshake_wait(attempt),
            });
            debug!(seq = current.seq, attempt, "handshake retransmit");
            actions.push(Action::Send(handshake_packet(current.seq)));
            return;
        }

        self.handshake = None;
        match self.state {
            LinkState::Handshaking => {
                self.give_up("handshake not acknowledged".to_string(), actions);
            }
            LinkState::Recovering => {
                if let Some(recovery) = self.recovery.as_mut() {
                    let pause = recovery.backoff.next_delay();
                    recovery.resume_at = Some(now + pause);
                    debug!(pause_ms = pause.as_millis() as u64, "recovery round failed");
                }
            }
            _ => {}
        }
    }

    fn on_handshake_ack(&mut self, now: Instant, seq: u16, actions: &mut Vec<Action>) {
        if !self.handshake.is_some_and(|h| h.seq == seq) {
            bump(&self.stats.duplicates);
            return;
        }
        self.handshake = None;
        if self.recovery.take().is_some() {
            bump(&self.stats.recoveries);
            info!("link recovered");
        }
        self.next_heartbeat = Some(now + self.config.heartbeat_interval);
        self.transition(LinkState::Connected, actions);
    }

    fn enter_recovery(&mut self, now: Instant, actions: &mut Vec<Action>) {
        warn!(
            silence_ms = self.silence(now).as_millis() as u64,
            "heartbeat lost, recovering"
        );
        self.recovery = Some(Recovery {
            started: now,
            backoff: Backoff::new(
                self.config.heartbeat_interval,
                self.config.recovery_backoff_cap,
                2.0,
                0.0,
            ),
            resume_at: None,
        });
        self.transition(LinkState::Recovering, actions);
        self.begin_handshake(now, actions);
    }

    fn give_up(&mut self, reason: String, actions: &mut Vec<Action>) {
        warn!(%reason, "link down");
        self.handshake = None;
        self.recovery = None;
        self.next_heartbeat = None;
        self.transition(LinkState::Disconnected, actions);
        let lost = reason.clone();
        self.fail_inflight(move || LinkError::LinkLost(lost.clone()), actions);
        actions.push(Action::LinkDown { reason });
    }

    fn fail_inflight(&mut self, error: impl Fn() -> LinkError, actions: &mut Vec<Action>) {
        for seq in self.inflight.drain() {
            actions.push(Action::CommandFailed {
                seq,
                error: error(),
            });
        }
    }

    fn sweep_inflight(&mut self, now: Instant, actions: &mut Vec<Action>) {
        for seq in self.inflight.expired(now) {
            let retry_limit = self.config.command_retries;
            let Some(entry) = self.inflight.get_mut(seq) else {
                continue;
            };
            if entry.retries < retry_limit {
                entry.retries += 1;
                entry.deadline = now + self.config.command_wait(entry.retries);
                bump(&self.stats.command_retries);
                debug!(seq, retry = entry.retries, "command retransmit");
                actions.push(Action::Send(Packet::new(
                    seq,
                    PacketType::Command,
                    entry.payload.clone(),
                )));
            } else {
                let retries = entry.retries;
                self.inflight.remove(seq);
                bump(&self.stats.command_timeouts);
                warn!(seq, retries, "command timed out");
                actions.push(Action::CommandFailed {
                    seq,
                    error: LinkError::CommandTimeout { seq, retries },
                });
            }
        }
    }

    fn heartbeat_if_due(&mut self, now: Instant, actions: &mut Vec<Action>) {
        let due = *self.next_heartbeat.get_or_insert(now);
        if now < due {
            return;
        }
        let seq = self.alloc_seq();
        self.next_heartbeat = Some(now + self.config.heartbeat_interval);
        trace!(seq, "heartbeat");
        actions.push(Action::Send(Packet::empty(seq, PacketType::Heartbeat)));
    }
}

fn handshake_packet(seq: u16) -> Packet {
    Packet::new(seq, PacketType::Handshake, vec![PROTOCOL_VERSION])
}
