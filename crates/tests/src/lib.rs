//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约冒烟测试
//! - 图传链路在丢包/抢占下的行为
//! - 模拟 e2e 测试（无需真实硬件）

#[cfg(test)]
mod contract_tests {
    use contracts::{LinkState, SinkHealth, StationBlueprint};

    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
        assert_eq!(LinkState::default(), LinkState::Disconnected);
        assert_eq!(SinkHealth::default().code(), 2);
    }

    #[test]
    fn test_blueprint_roundtrip_through_loader() {
        let blueprint = config_loader::ConfigLoader::load_from_str(
            r#"
[[sinks]]
name = "dash"
sink_type = "presentation"
"#,
            config_loader::ConfigFormat::Toml,
        )
        .unwrap();
        let toml = config_loader::ConfigLoader::to_toml(&blueprint).unwrap();
        let again: StationBlueprint =
            config_loader::ConfigLoader::load_from_str(&toml, config_loader::ConfigFormat::Toml)
                .unwrap();
        assert_eq!(again.sinks.len(), 1);
        assert_eq!(again.core, blueprint.core);
    }
}

#[cfg(test)]
mod link_tests {
    use std::time::Duration;

    use bytes::Bytes;
    use contracts::{Frame, LinkState, PixelFormat};
    use tokio_util::sync::CancellationToken;
    use transmitter_link::{
        memory_pair, LinkCommand, LinkConfig, LinkHandle, SimulatedPeer, TransmitterLinkEngine,
    };

    async fn wait_connected(link: &LinkHandle) {
        let mut changes = link.state_changes();
        let connected = changes.wait_for(|s| *s == LinkState::Connected);
        tokio::time::timeout(Duration::from_secs(30), connected)
            .await
            .expect("link never connected")
            .unwrap();
    }

    fn frame(sequence: u64, len: usize) -> Frame {
        Frame {
            sequence,
            timestamp: sequence as f64 / 30.0,
            width: 0,
            height: 0,
            format: PixelFormat::Encoded,
            data: Bytes::from(vec![sequence as u8; len]),
        }
    }

    /// Every third outbound unit is lost; heartbeats still keep the link up
    #[tokio::test(start_paused = true)]
    async fn test_lossy_link_reaches_steady_state() {
        let (local, remote) = memory_pair(256);
        let peer = SimulatedPeer::spawn(remote);
        let link = TransmitterLinkEngine::spawn(
            local.drop_every(3),
            LinkConfig::default(),
            CancellationToken::new(),
        );

        wait_connected(&link).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(link.state(), LinkState::Connected);

        // commands survive loss through retransmission
        let reply = link.command(LinkCommand::RequestTelemetry).await;
        assert!(reply.is_ok(), "{reply:?}");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(link.state(), LinkState::Connected);

        let stats = link.stats();
        assert_eq!(stats.recoveries, 0);
        let peer_stats = peer.stats();
        assert!(peer_stats.heartbeats > 0);
        assert!(peer_stats.heartbeats + peer_stats.handshakes < stats.packets_sent);
        peer.stop().await;
    }

    /// 30 Hz video over the same lossy link: the peer keeps seeing recent
    /// frames and the link settles back to Connected
    #[tokio::test(start_paused = true)]
    async fn test_lossy_link_carries_video() {
        let (local, remote) = memory_pair(256);
        let peer = SimulatedPeer::spawn(remote);
        let mut link = TransmitterLinkEngine::spawn(
            local.drop_every(3),
            LinkConfig::default(),
            CancellationToken::new(),
        );
        wait_connected(&link).await;

        let period = Duration::from_secs(1) / 30;
        for seq in 1..=300 {
            link.offer_frame(frame(seq, 1000));
            tokio::time::sleep(period).await;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        wait_connected(&link).await;

        let stats = peer.stats();
        assert!(stats.reassembly.completed > 100, "{stats:?}");
        assert!(stats.last_frame_seq.is_some_and(|seq| seq > 250), "{stats:?}");
        assert_eq!(stats.reassembly.late_fragments, 0);
        assert!(link.stats().recoveries <= 1);

        link.shutdown().await;
        peer.stop().await;
    }

    /// A newer frame replaces the one in flight; the receiver never sees
    /// fragments of an older frame after a newer one started
    #[tokio::test(start_paused = true)]
    async fn test_frame_preemption_leaves_no_late_fragments() {
        let (local, remote) = memory_pair(1024);
        let peer = SimulatedPeer::spawn(remote);
        let mut link =
            TransmitterLinkEngine::spawn(local, LinkConfig::default(), CancellationToken::new());
        wait_connected(&link).await;

        for seq in 1..=20 {
            link.offer_frame(frame(seq, 20_000));
            if seq % 4 == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            } else {
                tokio::task::yield_now().await;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stats = peer.stats();
        assert_eq!(stats.reassembly.late_fragments, 0);
        assert_eq!(stats.last_frame_seq, Some(20));
        assert!(stats.reassembly.completed >= 1);
        assert_eq!(stats.framing_errors, 0);

        link.shutdown().await;
        peer.stop().await;
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{
        ContractError, DataSink, HealthCell, SinkHealth, SinkItem, StationBlueprint, WriteOutcome,
    };
    use dispatcher::{DispatcherBuilder, PresentationHub, SinkHandle};
    use ingestion::{
        FrameSource, MockCaptureBackend, MockCaptureConfig, MockMetricSampler, TelemetrySource,
    };
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio_util::sync::CancellationToken;

    /// Accepts its first item and never returns
    struct StalledSink {
        entered: Arc<AtomicU64>,
    }

    impl DataSink for StalledSink {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn open(&mut self, health: HealthCell) -> Result<(), ContractError> {
            health.set(SinkHealth::Connected);
            Ok(())
        }

        async fn write(&mut self, _item: &SinkItem) -> Result<WriteOutcome, ContractError> {
            self.entered.fetch_add(1, Ordering::Relaxed);
            std::future::pending::<()>().await;
            Ok(WriteOutcome::Delivered)
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    fn blueprint() -> StationBlueprint {
        config_loader::ConfigLoader::load_from_str(
            r#"
[core]
tick_hz = 30.0
mailbox_capacity = 2
drain_timeout_ms = 200

[capture]
width = 16
height = 8
fps = 30.0

[telemetry]
update_rate_hz = 10.0

[[sinks]]
name = "diag"
sink_type = "log"

[[sinks]]
name = "dash"
sink_type = "presentation"

[[sinks]]
name = "uplink"
sink_type = "transmitter"
[sinks.params]
transport = "loopback"
quality = "high"
"#,
            config_loader::ConfigFormat::Toml,
        )
        .unwrap()
    }

    /// MockCaptureBackend + MockMetricSampler -> Dispatcher -> log, dashboard,
    /// loopback transmitter and a sink that never completes a write
    #[tokio::test]
    async fn test_e2e_stalled_sink_does_not_delay_others() {
        let blueprint = blueprint();
        let sources = CancellationToken::new();
        let links = CancellationToken::new();

        let frames = FrameSource::spawn(
            MockCaptureBackend::new(MockCaptureConfig {
                width: blueprint.capture.width,
                height: blueprint.capture.height,
                fps: blueprint.capture.fps,
                ..Default::default()
            }),
            blueprint.capture.fps * 2.0,
            sources.clone(),
        );
        let telemetry = TelemetrySource::spawn(
            MockMetricSampler::new(),
            blueprint.telemetry.update_rate_hz,
            sources.clone(),
        );

        let hub = PresentationHub::new(256);
        let mut viewer = hub.subscribe_frames();
        let entered = Arc::new(AtomicU64::new(0));
        let stalled = SinkHandle::spawn(
            StalledSink {
                entered: Arc::clone(&entered),
            },
            2,
        );

        let dispatcher =
            DispatcherBuilder::new(blueprint.core.clone(), frames.feed(), telemetry.feed())
                .sinks(blueprint.sinks.clone())
                .sink(stalled)
                .presenter(hub.clone())
                .cancel(&links)
                .build()
                .await
                .unwrap();
        let control = dispatcher.control();
        let dispatch = CancellationToken::new();
        let task = dispatcher.spawn(dispatch.clone());

        tokio::time::sleep(Duration::from_millis(1200)).await;

        let statuses = control.status().await.unwrap();
        let status = |name: &str| statuses.iter().find(|s| s.name == name).unwrap().clone();
        assert_eq!(entered.load(Ordering::Relaxed), 1);
        assert!(status("stalled").metrics.dropped_count > 0);
        assert!(status("diag").metrics.write_count > 10, "{:?}", status("diag"));
        assert!(status("dash").metrics.write_count > 10);
        assert_eq!(status("uplink").health, SinkHealth::Connected);
        assert!(status("uplink").metrics.write_count > 10);

        let snapshot = hub.latest_telemetry().expect("dashboard got telemetry");
        assert_eq!(snapshot.get("sink.stalled.health"), Some(0.0));
        assert!(snapshot.get("sink.stalled.dropped").unwrap_or(0.0) > 0.0);
        assert!(snapshot.get("capture.fps").is_some());

        dispatch.cancel();
        let stats = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("dispatcher shutdown is bounded")
            .unwrap();
        links.cancel();
        sources.cancel();
        frames.join().await.unwrap();
        telemetry.join().await.unwrap();

        assert!(stats.frames > 10);
        assert!(stats.sinks.iter().all(|s| s.health == SinkHealth::Disconnected));
        let stalled = stats.sinks.iter().find(|s| s.name == "stalled").unwrap();
        assert_eq!(stalled.metrics.discarded_count, 2);

        let mut viewed = 0;
        loop {
            match viewer.try_recv() {
                Ok(_) => viewed += 1,
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        assert!(viewed > 10);
    }
}
