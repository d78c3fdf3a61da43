//! CloudSink - publishes into a cloud WebRTC room
//!
//! The room session is an external collaborator behind [`CloudSession`].
//! When the session drops, the sink keeps draining its mailbox and discards
//! what it reads until a jittered exponential backoff allows the next connect
//! attempt. Nothing dropped during an outage is replayed.

use bytes::Bytes;
use contracts::{
    Backoff, CloudSession, ContractError, DataSink, DisconnectSignal, Frame, HealthCell, RoomConfig,
    SinkHealth, SinkItem, WriteOutcome,
};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Data-channel topic for telemetry
pub const TELEMETRY_TOPIC: &str = "telemetry";

/// Session state as seen by the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudState {
    Connected,
    Reconnecting { next_attempt: Instant },
}

/// Sink publishing frames and telemetry to a cloud room
pub struct CloudSink<C> {
    name: String,
    room: RoomConfig,
    session: C,
    state: CloudState,
    lost: Option<DisconnectSignal>,
    backoff: Backoff,
    health: HealthCell,
    discarded: u64,
    published: u64,
}

impl<C: CloudSession> CloudSink<C> {
    pub fn new(name: impl Into<String>, room: RoomConfig, session: C) -> Self {
        Self {
            name: name.into(),
            room,
            session,
            state: CloudState::Reconnecting {
                next_attempt: Instant::now(),
            },
            lost: None,
            backoff: Backoff::cloud_reconnect(),
            health: HealthCell::default(),
            discarded: 0,
            published: 0,
        }
    }

    /// Override the reconnect schedule
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn state(&self) -> CloudState {
        self.state
    }

    /// Items discarded while the session was down
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    async fn try_connect(&mut self) {
        match self.session.connect(&self.room).await {
            Ok(lost) => {
                info!(
                    sink = %self.name,
                    room = %self.room.room,
                    attempts = self.backoff.attempts() + 1,
                    "Cloud session connected"
                );
                self.backoff.reset();
                self.lost = Some(lost);
                self.state = CloudState::Connected;
                self.health.set(SinkHealth::Connected);
            }
            Err(e) => self.schedule_reconnect(&e.to_string()),
        }
    }

    fn schedule_reconnect(&mut self, reason: &str) {
        let delay = self.backoff.next_delay();
        warn!(
            sink = %self.name,
            reason,
            retry_in_ms = delay.as_millis() as u64,
            "Cloud session unavailable"
        );
        self.lost = None;
        self.state = CloudState::Reconnecting {
            next_attempt: Instant::now() + delay,
        };
        self.health.set(SinkHealth::Degraded);
    }

    /// Notice a dropped session and reconnect when the backoff allows
    async fn poll_session(&mut self) {
        match self.state {
            CloudState::Connected => {
                if self.lost.as_ref().is_some_and(DisconnectSignal::is_cancelled) {
                    self.schedule_reconnect("session lost");
                }
            }
            CloudState::Reconnecting { next_attempt } => {
                if Instant::now() >= next_attempt {
                    self.try_connect().await;
                }
            }
        }
    }

    async fn publish(&mut self, item: &SinkItem) -> Result<(), ContractError> {
        match item {
            SinkItem::Frame(frame) => self.session.publish_frame(frame).await,
            SinkItem::Telemetry(snapshot) => {
                let payload = serde_json::to_vec(snapshot.as_ref()).map_err(|e| {
                    ContractError::sink_write(&self.name, format!("telemetry encode: {e}"))
                })?;
                self.session.publish_data(TELEMETRY_TOPIC, Bytes::from(payload)).await
            }
        }
    }
}

impl<C: CloudSession> DataSink for CloudSink<C> {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "cloud_sink_open", skip(self, health), fields(sink = %self.name))]
    async fn open(&mut self, health: HealthCell) -> Result<(), ContractError> {
        self.health = health;
        self.try_connect().await;
        Ok(())
    }

    async fn write(&mut self, item: &SinkItem) -> Result<WriteOutcome, ContractError> {
        self.poll_session().await;
        if self.state != CloudState::Connected {
            self.discarded += 1;
            return Ok(WriteOutcome::Discarded);
        }

        match self.publish(item).await {
            Ok(()) => {
                self.published += 1;
                Ok(WriteOutcome::Delivered)
            }
            Err(e) if e.is_transient() => {
                self.discarded += 1;
                self.schedule_reconnect(&e.to_string());
                Ok(WriteOutcome::Discarded)
            }
            Err(e) => Err(e),
        }
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "cloud_sink_close", skip(self), fields(sink = %self.name))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if self.state == CloudState::Connected {
            self.session.disconnect().await?;
        }
        info!(
            sink = %self.name,
            published = self.published,
            discarded = self.discarded,
            "CloudSink closed"
        );
        Ok(())
    }
}

/// Stand-in session that only logs what would be published
///
/// Used when no room client is linked into the binary.
#[derive(Debug, Default)]
pub struct TracingCloudSession {
    signal: Option<DisconnectSignal>,
    frames: u64,
    messages: u64,
}

impl TracingCloudSession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CloudSession for TracingCloudSession {
    async fn connect(&mut self, room: &RoomConfig) -> Result<DisconnectSignal, ContractError> {
        info!(
            url = %room.url,
            room = %room.room,
            participant = %room.participant,
            "Joined cloud room (tracing only)"
        );
        let signal = DisconnectSignal::new();
        self.signal = Some(signal.clone());
        Ok(signal)
    }

    async fn publish_frame(&mut self, frame: &Frame) -> Result<(), ContractError> {
        self.frames += 1;
        debug!(seq = frame.sequence, bytes = frame.len(), "publish frame");
        Ok(())
    }

    async fn publish_data(&mut self, topic: &str, data: Bytes) -> Result<(), ContractError> {
        self.messages += 1;
        debug!(topic, bytes = data.len(), "publish data");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ContractError> {
        if let Some(signal) = self.signal.take() {
            signal.cancel();
        }
        info!(frames = self.frames, messages = self.messages, "Left cloud room");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{SinkHandle, StopOutcome};
    use crate::testing::{frame_item, snapshot};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Script {
        connects: VecDeque<Result<(), ContractError>>,
        signal: Option<DisconnectSignal>,
        frames: Vec<u64>,
        topics: Vec<String>,
        connect_calls: usize,
        unreachable: bool,
    }

    #[derive(Clone, Default)]
    struct ScriptedSession(Arc<Mutex<Script>>);

    impl ScriptedSession {
        fn failing_first(n: usize) -> Self {
            let session = Self::default();
            {
                let mut script = session.0.lock().unwrap();
                for _ in 0..n {
                    script.connects.push_back(Err(ContractError::session_lost("room unreachable")));
                }
            }
            session
        }

        fn unreachable() -> Self {
            let session = Self::default();
            session.0.lock().unwrap().unreachable = true;
            session
        }

        fn drop_session(&self) {
            if let Some(signal) = &self.0.lock().unwrap().signal {
                signal.cancel();
            }
        }

        fn frames(&self) -> Vec<u64> {
            self.0.lock().unwrap().frames.clone()
        }
    }

    impl CloudSession for ScriptedSession {
        async fn connect(&mut self, _room: &RoomConfig) -> Result<DisconnectSignal, ContractError> {
            let mut script = self.0.lock().unwrap();
            script.connect_calls += 1;
            if script.unreachable {
                return Err(ContractError::session_lost("room unreachable"));
            }
            script.connects.pop_front().unwrap_or(Ok(()))?;
            let signal = DisconnectSignal::new();
            script.signal = Some(signal.clone());
            Ok(signal)
        }

        async fn publish_frame(&mut self, frame: &Frame) -> Result<(), ContractError> {
            self.0.lock().unwrap().frames.push(frame.sequence);
            Ok(())
        }

        async fn publish_data(&mut self, topic: &str, _data: Bytes) -> Result<(), ContractError> {
            self.0.lock().unwrap().topics.push(topic.to_string());
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    fn room() -> RoomConfig {
        RoomConfig {
            url: "wss://rtc.example.net".into(),
            room: "drone-1".into(),
            participant: "station".into(),
        }
    }

    fn no_jitter() -> Backoff {
        Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 2.0, 0.0)
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_frames_and_telemetry() {
        let session = ScriptedSession::default();
        let mut sink = CloudSink::new("cloud", room(), session.clone());
        let health = HealthCell::default();
        sink.open(health.clone()).await.unwrap();
        assert_eq!(health.get(), SinkHealth::Connected);

        sink.write(&frame_item(1)).await.unwrap();
        sink.write(&SinkItem::Telemetry(Arc::new(snapshot(1)))).await.unwrap();

        assert_eq!(session.frames(), vec![1]);
        assert_eq!(session.0.lock().unwrap().topics, vec![TELEMETRY_TOPIC.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn outage_discards_then_resumes_without_replay() {
        let session = ScriptedSession::default();
        let mut sink = CloudSink::new("cloud", room(), session.clone()).backoff(no_jitter());
        let health = HealthCell::default();
        sink.open(health.clone()).await.unwrap();
        assert_eq!(sink.write(&frame_item(1)).await.unwrap(), WriteOutcome::Delivered);

        session.drop_session();
        assert_eq!(sink.write(&frame_item(2)).await.unwrap(), WriteOutcome::Discarded);
        assert!(matches!(sink.state(), CloudState::Reconnecting { .. }));
        assert_eq!(health.get(), SinkHealth::Degraded);

        tokio::time::sleep(Duration::from_millis(500)).await;
        sink.write(&frame_item(3)).await.unwrap();
        assert_eq!(session.0.lock().unwrap().connect_calls, 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(sink.write(&frame_item(4)).await.unwrap(), WriteOutcome::Delivered);

        assert_eq!(sink.state(), CloudState::Connected);
        assert_eq!(health.get(), SinkHealth::Connected);
        assert_eq!(session.frames(), vec![1, 4]);
        assert_eq!(sink.discarded(), 2);
    }

    #[tokio::test]
    async fn worker_counts_outage_as_discarded_not_delivered() {
        let session = ScriptedSession::unreachable();
        let mut handle = SinkHandle::spawn(CloudSink::new("cloud", room(), session.clone()), 10);
        for i in 1..=5 {
            handle.offer(frame_item(i)).unwrap();
        }

        assert_eq!(handle.stop(Duration::from_secs(1)).await, StopOutcome::Drained);
        let metrics = handle.metrics();
        assert_eq!(metrics.write_count(), 0);
        assert_eq!(metrics.discarded_count(), 5);
        assert_eq!(metrics.failure_count(), 0);
        assert_eq!(metrics.delivery_rate().get(), 0.0);
        assert!(session.frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connects_back_off_exponentially() {
        let session = ScriptedSession::failing_first(3);
        let mut sink = CloudSink::new("cloud", room(), session.clone()).backoff(no_jitter());
        let health = HealthCell::default();
        let start = Instant::now();
        sink.open(health.clone()).await.unwrap();
        assert_eq!(health.get(), SinkHealth::Degraded);

        // attempts at 0s, 1s, 3s, 7s; the fourth succeeds
        let mut connected_at = None;
        for tick in 0..100u64 {
            sink.write(&frame_item(tick + 1)).await.unwrap();
            if sink.state() == CloudState::Connected {
                connected_at = Some(start.elapsed());
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let connected_at = connected_at.expect("never reconnected");
        assert!(
            connected_at >= Duration::from_secs(7) && connected_at < Duration::from_millis(7200),
            "{connected_at:?}"
        );
        assert_eq!(session.0.lock().unwrap().connect_calls, 4);
    }

    #[tokio::test]
    async fn tracing_session_trips_signal_on_disconnect() {
        let mut session = TracingCloudSession::new();
        let signal = session.connect(&room()).await.unwrap();
        session.publish_data(TELEMETRY_TOPIC, Bytes::from_static(b"{}")).await.unwrap();
        session.disconnect().await.unwrap();
        assert!(signal.is_cancelled());
    }
}
