//! Async driver for [`LinkMachine`]
//!
//! One task owns the machine and the transport. It `select!`s, in priority
//! order, over cancellation, the newest-frame slot, caller requests, inbound
//! units, the machine's next deadline and finally fragment pacing, so a newer
//! frame always preempts the remaining fragments of an older one.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use contracts::{Frame, LinkState};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::codec::Packet;
use crate::command::{LinkCommand, PeerTelemetry};
use crate::error::LinkError;
use crate::machine::{Action, LinkConfig, LinkMachine};
use crate::stats::{bump, LinkStats, LinkStatsSnapshot};
use crate::transport::Transport;

const REQUEST_QUEUE: usize = 32;

type Reply = oneshot::Sender<Result<Bytes, LinkError>>;

enum Request {
    Command { command: LinkCommand, reply: Reply },
    Telemetry(Bytes),
}

/// Spawns link engines
pub struct TransmitterLinkEngine;

impl TransmitterLinkEngine {
    /// Start the engine task; it handshakes immediately
    ///
    /// The task ends on `cancel`, when the handle is dropped, or when the
    /// link gives up and goes `Disconnected`.
    pub fn spawn<T>(transport: T, config: LinkConfig, cancel: CancellationToken) -> LinkHandle
    where
        T: Transport + Send + 'static,
    {
        let cancel = cancel.child_token();
        let stats = Arc::new(LinkStats::new());
        let (frames_tx, frames_rx) = watch::channel(None);
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE);
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        let (peer_tx, peer_rx) = watch::channel(None);

        let worker = EngineWorker {
            machine: LinkMachine::with_stats(config, Arc::clone(&stats)),
            transport,
            frames: frames_rx,
            requests: requests_rx,
            state: state_tx,
            peer: peer_tx,
            pending: HashMap::new(),
            stats: Arc::clone(&stats),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());

        LinkHandle {
            frames: frames_tx,
            requests: requests_tx,
            state: state_rx,
            peer: peer_rx,
            stats,
            cancel,
            task: Some(task),
        }
    }
}

/// Caller side of a running link engine
pub struct LinkHandle {
    frames: watch::Sender<Option<Frame>>,
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<LinkState>,
    peer: watch::Receiver<Option<PeerTelemetry>>,
    stats: Arc<LinkStats>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LinkHandle {
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn state_changes(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Replace the frame being sent; never blocks
    pub fn offer_frame(&self, frame: Frame) {
        self.frames.send_replace(Some(frame));
    }

    /// Queue an unacknowledged telemetry unit
    ///
    /// A full request queue drops the unit; only a stopped engine is an error.
    pub fn send_telemetry(&self, payload: Bytes) -> Result<(), LinkError> {
        match self.requests.try_send(Request::Telemetry(payload)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                trace!("telemetry dropped, request queue full");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(LinkError::EngineStopped),
        }
    }

    /// Send an acknowledged command and wait for its outcome
    pub async fn command(&self, command: LinkCommand) -> Result<Bytes, LinkError> {
        send_command(&self.requests, command).await
    }

    /// Cloneable command-only handle that does not keep the engine alive
    pub fn commander(&self) -> LinkCommander {
        LinkCommander {
            requests: self.requests.clone(),
        }
    }

    /// Latest telemetry reported by the transmitter
    pub fn peer_telemetry(&self) -> Option<PeerTelemetry> {
        *self.peer.borrow()
    }

    pub fn stats(&self) -> LinkStatsSnapshot {
        self.stats.snapshot()
    }

    /// Engine task has exited
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the engine and close the transport
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "link engine task failed");
            }
        }
    }
}

/// Issues commands to a link engine from other tasks
#[derive(Clone)]
pub struct LinkCommander {
    requests: mpsc::Sender<Request>,
}

impl LinkCommander {
    pub async fn command(&self, command: LinkCommand) -> Result<Bytes, LinkError> {
        send_command(&self.requests, command).await
    }
}

async fn send_command(
    requests: &mpsc::Sender<Request>,
    command: LinkCommand,
) -> Result<Bytes, LinkError> {
    let (reply, outcome) = oneshot::channel();
    requests
        .send(Request::Command { command, reply })
        .await
        .map_err(|_| LinkError::EngineStopped)?;
    outcome.await.map_err(|_| LinkError::EngineStopped)?
}

impl Drop for LinkHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct EngineWorker<T> {
    machine: LinkMachine,
    transport: T,
    frames: watch::Receiver<Option<Frame>>,
    requests: mpsc::Receiver<Request>,
    state: watch::Sender<LinkState>,
    peer: watch::Sender<Option<PeerTelemetry>>,
    pending: HashMap<u16, Reply>,
    stats: Arc<LinkStats>,
    cancel: CancellationToken,
}

impl<T> EngineWorker<T>
where
    T: Transport + Send + 'static,
{
    #[instrument(name = "link_engine", skip(self))]
    async fn run(mut self) {
        let actions = self.machine.start(Instant::now());
        self.apply(actions).await;

        let mut transport_open = true;
        while self.machine.state() != LinkState::Disconnected {
            let deadline = self.machine.next_deadline();
            let fragment_ready = self.machine.has_pending_fragment();

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("link engine cancelled");
                    break;
                }

                changed = self.frames.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let frame = self.frames.borrow_and_update().clone();
                    if let Some(frame) = frame {
                        if let Err(e) = self.machine.offer_frame(&frame) {
                            warn!(sequence = frame.sequence, error = %e, "frame not sendable");
                        }
                    }
                }

                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },

                received = self.transport.recv(), if transport_open => match received {
                    Ok(packet) => {
                        let actions = self.machine.on_packet(Instant::now(), packet);
                        self.apply(actions).await;
                    }
                    Err(LinkError::Framing(e)) => {
                        self.machine.on_framing_error();
                        metrics::counter!("skyrelay_link_framing_errors_total").increment(1);
                        debug!(error = %e, "dropped corrupt unit");
                    }
                    Err(LinkError::Closed) => {
                        warn!("transport closed by the far end");
                        transport_open = false;
                    }
                    Err(e) => debug!(error = %e, "transport receive error"),
                },

                _ = sleep_until(deadline) => {
                    let actions = self.machine.on_timer(Instant::now());
                    self.apply(actions).await;
                }

                _ = std::future::ready(()), if fragment_ready => {
                    if let Some(packet) = self.machine.next_fragment() {
                        self.send(packet).await;
                    }
                }
            }
        }

        let actions = self.machine.stop();
        self.apply(actions).await;
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(LinkError::EngineStopped));
        }
        if let Err(e) = self.transport.close().await {
            debug!(error = %e, "transport close failed");
        }
        info!("link engine stopped");
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Command { command, reply } => {
                match self.machine.send_command(Instant::now(), &command) {
                    Ok((seq, actions)) => {
                        self.pending.insert(seq, reply);
                        self.apply(actions).await;
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Request::Telemetry(payload) => match self.machine.send_telemetry(payload) {
                Ok(actions) => self.apply(actions).await,
                Err(e) => debug!(error = %e, "telemetry not sent"),
            },
        }
    }

    async fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(packet) => self.send(packet).await,
                Action::StateChanged { from, to } => {
                    info!(%from, %to, "link state changed");
                    metrics::counter!("skyrelay_link_transitions_total", "to" => to.as_str())
                        .increment(1);
                    self.state.send_replace(to);
                }
                Action::CommandAcked { seq, response } => {
                    if let Some(reply) = self.pending.remove(&seq) {
                        let _ = reply.send(Ok(response));
                    }
                }
                Action::CommandFailed { seq, error } => {
                    if let Some(reply) = self.pending.remove(&seq) {
                        let _ = reply.send(Err(error));
                    }
                }
                Action::PeerTelemetry(telemetry) => {
                    self.peer.send_replace(Some(telemetry));
                }
                Action::PeerCommand { seq, command } => {
                    debug!(seq, command = command.name(), "command from transmitter");
                }
                Action::LinkDown { reason } => {
                    warn!(%reason, "transmitter link down");
                }
            }
        }
    }

    async fn send(&mut self, packet: Packet) {
        match self.transport.send(&packet).await {
            Ok(()) => bump(&self.stats.packets_sent),
            Err(e) => {
                bump(&self.stats.send_errors);
                debug!(seq = packet.seq, error = %e, "send failed");
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
