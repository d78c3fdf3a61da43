//! TransmitterSink - feeds the ground-station transmitter link
//!
//! Frames replace the engine's newest-frame slot (older fragments are
//! preempted inside the engine); telemetry goes out as JSON units. Link
//! state is mirrored into the sink's health.

use std::collections::HashMap;

use bytes::Bytes;
use contracts::{
    ContractError, CoreSettings, DataSink, HealthCell, LinkState, SinkHealth, SinkItem,
    TransmitterEndpoint, VideoQuality, WriteOutcome,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use transmitter_link::{
    open_transport, LinkCommand, LinkCommander, LinkConfig, LinkHandle, TransmitterLinkEngine,
};

/// Sink that drives a [`TransmitterLinkEngine`]
pub struct TransmitterSink {
    name: String,
    endpoint: TransmitterEndpoint,
    config: LinkConfig,
    quality: VideoQuality,
    cancel: CancellationToken,
    link: Option<LinkHandle>,
    mirror: Option<JoinHandle<()>>,
}

impl TransmitterSink {
    pub fn new(name: impl Into<String>, endpoint: TransmitterEndpoint, config: LinkConfig) -> Self {
        Self {
            name: name.into(),
            endpoint,
            config,
            quality: VideoQuality::default(),
            cancel: CancellationToken::new(),
            link: None,
            mirror: None,
        }
    }

    /// Build from sink `params` (`transport`, `bind`, `peer`, `path`, `quality`)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
        core: &CoreSettings,
    ) -> Result<Self, ContractError> {
        let endpoint = TransmitterEndpoint::from_params(params)?;
        let quality = match params.get("quality") {
            Some(q) => q.parse().map_err(|_| {
                ContractError::config_validation("params.quality", format!("unknown quality '{q}'"))
            })?,
            None => VideoQuality::default(),
        };
        Ok(Self::new(name, endpoint, LinkConfig::from_settings(core)).quality(quality))
    }

    /// Quality requested with `StartVideo`
    pub fn quality(mut self, quality: VideoQuality) -> Self {
        self.quality = quality;
        self
    }

    /// Stop the engine together with an outer shutdown
    pub fn cancel_on(mut self, cancel: &CancellationToken) -> Self {
        self.cancel = cancel.child_token();
        self
    }

    fn link(&self) -> Result<&LinkHandle, ContractError> {
        self.link
            .as_ref()
            .ok_or_else(|| ContractError::sink_fatal(&self.name, "link not open"))
    }
}

impl DataSink for TransmitterSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "transmitter_sink_open", skip(self, health), fields(sink = %self.name))]
    async fn open(&mut self, health: HealthCell) -> Result<(), ContractError> {
        let transport = open_transport(&self.endpoint).await.map_err(|e| {
            ContractError::sink_connection(&self.name, format!("{}: {e}", self.endpoint.describe()))
        })?;
        let link =
            TransmitterLinkEngine::spawn(transport, self.config.clone(), self.cancel.clone());

        self.mirror = Some(tokio::spawn(mirror_link_state(
            self.name.clone(),
            link.state_changes(),
            health,
            link.commander(),
            self.quality,
        )));
        self.link = Some(link);
        info!(sink = %self.name, endpoint = %self.endpoint.describe(), "Transmitter link started");
        Ok(())
    }

    async fn write(&mut self, item: &SinkItem) -> Result<WriteOutcome, ContractError> {
        let link = self.link()?;
        if link.is_finished() {
            return Err(ContractError::link_lost(format!(
                "{}: transmitter link is down",
                self.name
            )));
        }
        match item {
            SinkItem::Frame(frame) => {
                link.offer_frame(frame.clone());
                Ok(WriteOutcome::Delivered)
            }
            SinkItem::Telemetry(snapshot) => {
                let payload = serde_json::to_vec(snapshot.as_ref()).map_err(|e| {
                    ContractError::sink_write(&self.name, format!("telemetry encode: {e}"))
                })?;
                link.send_telemetry(Bytes::from(payload))?;
                Ok(WriteOutcome::Delivered)
            }
        }
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "transmitter_sink_close", skip(self), fields(sink = %self.name))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some(mirror) = self.mirror.take() {
            mirror.abort();
        }
        if let Some(mut link) = self.link.take() {
            let stats = link.stats();
            link.shutdown().await;
            info!(
                sink = %self.name,
                packets_sent = stats.packets_sent,
                fragments_sent = stats.fragments_sent,
                fragments_abandoned = stats.fragments_abandoned,
                recoveries = stats.recoveries,
                "Transmitter link closed"
            );
        }
        Ok(())
    }
}

fn health_for(state: LinkState, started: bool) -> SinkHealth {
    match state {
        LinkState::Connected => SinkHealth::Connected,
        LinkState::Handshaking | LinkState::Recovering => SinkHealth::Degraded,
        LinkState::Disconnected if started => SinkHealth::Disconnected,
        LinkState::Disconnected => SinkHealth::Degraded,
    }
}

/// Mirror link state into sink health; ask for video on every (re)connect
async fn mirror_link_state(
    name: String,
    mut states: watch::Receiver<LinkState>,
    health: HealthCell,
    commander: LinkCommander,
    quality: VideoQuality,
) {
    let mut started = false;
    let mut previous = LinkState::Disconnected;
    loop {
        let state = *states.borrow_and_update();
        started |= state != LinkState::Disconnected;
        health.set(health_for(state, started));

        if state == LinkState::Connected && previous != LinkState::Connected {
            let commander = commander.clone();
            let name = name.clone();
            tokio::spawn(async move {
                match commander.command(LinkCommand::StartVideo(quality)).await {
                    Ok(_) => debug!(sink = %name, ?quality, "Video started"),
                    Err(e) => warn!(sink = %name, error = %e, "StartVideo not acknowledged"),
                }
            });
        }
        previous = state;

        if states.changed().await.is_err() {
            break;
        }
    }
    // engine task gone
    health.set(SinkHealth::Disconnected);
}
